use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One named stage and the seconds spent in it.
///
/// Keys are nested paths such as `./query/printing`; the final entry of
/// [`Timings::to_list`] is `.` and holds the total elapsed time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryTiming {
    /// Stage path.
    pub k: String,
    /// Seconds spent in the stage.
    pub t: f64,
}

#[derive(Default)]
struct TimingState {
    stack: Vec<String>,
    entries: Vec<QueryTiming>,
}

/// Per-request stage timer.
///
/// Created once per request and shared by every context derived from it.
/// Stages nest by name: a stage opened while another is running records under
/// the running stage's path.
pub struct Timings {
    started: Instant,
    state: Mutex<TimingState>,
}

impl Default for Timings {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Timings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timings")
            .field("entries", &self.state.lock().entries)
            .finish()
    }
}

impl Timings {
    /// Timer with no recorded stages.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            state: Mutex::new(TimingState::default()),
        }
    }

    /// Opens a stage that closes when the returned guard drops.
    pub fn measure(&self, name: &str) -> TimingGuard<'_> {
        let key = {
            let mut state = self.state.lock();
            state.stack.push(name.to_owned());
            format!("./{}", state.stack.join("/"))
        };
        TimingGuard {
            timings: self,
            key,
            started: Instant::now(),
        }
    }

    /// Runs `body` inside a stage named `name`.
    pub fn time<T>(&self, name: &str, body: impl FnOnce() -> T) -> T {
        let _guard = self.measure(name);
        body()
    }

    fn record(&self, key: String, seconds: f64) {
        let mut state = self.state.lock();
        state.stack.pop();
        match state.entries.iter_mut().find(|entry| entry.k == key) {
            Some(entry) => entry.t += seconds,
            None => state.entries.push(QueryTiming { k: key, t: seconds }),
        }
    }

    /// Completed stages in completion order, followed by the `.` total.
    pub fn to_list(&self) -> Vec<QueryTiming> {
        let mut list = self.state.lock().entries.clone();
        list.push(QueryTiming {
            k: ".".to_owned(),
            t: self.started.elapsed().as_secs_f64(),
        });
        list
    }
}

/// Closes a stage on drop.
#[must_use = "the stage closes as soon as the guard is dropped"]
pub struct TimingGuard<'a> {
    timings: &'a Timings,
    key: String,
    started: Instant,
}

impl Drop for TimingGuard<'_> {
    fn drop(&mut self) {
        let seconds = self.started.elapsed().as_secs_f64();
        self.timings.record(std::mem::take(&mut self.key), seconds);
    }
}
