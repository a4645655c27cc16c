//! Behavioural modifiers and their four-layer resolution.
//!
//! Precedence, highest first: explicit request modifiers, team-stored
//! overrides, computed defaults, static defaults. A layer only ever fills
//! fields that are still unset, so an explicit value always survives.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CompilerConfig;
use crate::query::services::FeatureFlags;
use crate::query::team::{Principal, TeamModifierSource};

/// Feature flag consulted for the materialized-views default.
pub const MATERIALIZED_VIEWS_FLAG: &str = "use-materialized-views";

/// How person data is joined onto events.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonsOnEventsMode {
    /// Persons are joined from the persons table.
    #[default]
    Disabled,
    /// Event person ids, no override table.
    PersonIdNoOverridePropertiesOnEvents,
    /// Event person ids with the override table applied.
    PersonIdOverridePropertiesOnEvents,
    /// Overridden person ids, properties joined from persons.
    PersonIdOverridePropertiesJoined,
}

/// Which argMax form deduplicates person versions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonsArgMaxVersion {
    /// Chosen by the compiler.
    Auto,
    /// Legacy form.
    V1,
    /// Current form.
    V2,
}

/// Strategy used to evaluate cohort membership.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum InCohortVia {
    /// Chosen by the compiler.
    #[serde(rename = "auto")]
    Auto,
    /// Join the cohort membership table.
    #[serde(rename = "leftjoin")]
    LeftJoin,
    /// `IN` subquery per cohort.
    #[serde(rename = "subquery")]
    Subquery,
    /// One join shared by all cohort conditions.
    #[serde(rename = "leftjoin_conjoined")]
    LeftJoinConjoined,
}

/// How materialized property columns are read.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializationMode {
    /// Chosen by the compiler.
    Auto,
    /// Missing values read as empty strings.
    LegacyNullAsString,
    /// Missing values read as NULL.
    LegacyNullAsNull,
    /// Always read from the JSON blob.
    Disabled,
}

/// Join used to attach persons.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonsJoinMode {
    /// `INNER JOIN`
    Inner,
    /// `LEFT JOIN`
    Left,
}

/// What counts as a page view for bounce rate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BounceRatePageViewMode {
    /// Raw pageview events.
    CountPageviews,
    /// Distinct URLs.
    UniqUrls,
    /// Distinct pageviews, screens and autocaptures.
    UniqPageScreenAutocaptures,
}

/// Sessions table generation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTableVersion {
    /// Chosen by the compiler.
    Auto,
    /// Original table.
    V1,
    /// Table keyed by session UUID.
    V2,
}

/// Key type used to join the v2 sessions table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionsV2JoinMode {
    /// Join on the string id.
    String,
    /// Join on the UUID.
    Uuid,
}

/// Whether grouped property columns are used.
///
/// `Disabled` is the resolved form of "no property groups".
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyGroupsMode {
    /// Always use property groups.
    Enabled,
    /// Never use property groups.
    Disabled,
    /// Use them where the rewrite is known to help.
    Optimized,
}

/// Attribute a channel rule condition tests.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRuleKey {
    /// `utm_source`
    UtmSource,
    /// `utm_medium`
    UtmMedium,
    /// `utm_campaign`
    UtmCampaign,
    /// Referring domain.
    ReferringDomain,
    /// Full URL.
    Url,
    /// URL path.
    Pathname,
    /// URL host.
    Hostname,
}

/// Comparison in a channel rule condition.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRuleOperator {
    /// Equals.
    Exact,
    /// Differs.
    IsNot,
    /// Present.
    IsSet,
    /// Absent.
    IsNotSet,
    /// Case-insensitive substring.
    Icontains,
    /// Negated substring match.
    NotIcontains,
    /// Regular expression match.
    Regex,
    /// Negated regular expression.
    NotRegex,
}

/// Operand of a channel rule condition.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelRuleValue {
    /// Single value.
    One(String),
    /// Any of several values.
    Many(Vec<String>),
}

/// One test inside a channel rule.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelRuleCondition {
    /// Client-assigned id.
    pub id: String,
    /// Attribute tested.
    pub key: ChannelRuleKey,
    /// Comparison.
    pub op: ChannelRuleOperator,
    /// Operand; unused by set/not-set.
    #[serde(default)]
    pub value: Option<ChannelRuleValue>,
}

/// How a rule joins its conditions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleCombiner {
    /// Every condition must hold.
    And,
    /// Any condition may hold.
    Or,
}

/// Team-defined rule assigning a marketing channel.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ChannelTypeRule {
    /// Client-assigned id.
    pub id: String,
    /// Conditions.
    pub items: Vec<ChannelRuleCondition>,
    /// How the conditions combine.
    pub combiner: RuleCombiner,
    /// Channel assigned when the rule matches.
    pub channel_type: String,
}

/// Flat record of behaviour toggles.
///
/// Every field is optional on input; after resolution every field is set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Modifiers {
    /// Person join strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persons_on_events_mode: Option<PersonsOnEventsMode>,
    /// Person version deduplication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persons_arg_max_version: Option<PersonsArgMaxVersion>,
    /// Cohort membership strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_cohort_via: Option<InCohortVia>,
    /// Materialized column reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub materialization_mode: Option<MaterializationMode>,
    /// Push filters into joined subqueries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimize_joined_filters: Option<bool>,
    /// Person join kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persons_join_mode: Option<PersonsJoinMode>,
    /// Bounce rate page view definition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounce_rate_page_view_mode: Option<BounceRatePageViewMode>,
    /// Sessions table generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_table_version: Option<SessionTableVersion>,
    /// Sessions v2 join key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions_v2_join_mode: Option<SessionsV2JoinMode>,
    /// Property group columns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_groups_mode: Option<PropertyGroupsMode>,
    /// Read from materialized views.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_materialized_views: Option<bool>,
    /// Team channel rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_channel_type_rules: Option<Vec<ChannelTypeRule>>,
    /// Render times in the project timezone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convert_to_project_timezone: Option<bool>,
    /// Tolerate invalid columns in S3 tables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_table_use_invalid_columns: Option<bool>,
    /// Capture stage failures and fill debug fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
}

macro_rules! modifier_fields {
    ($($field:ident),* $(,)?) => {
        impl Modifiers {
            /// Copies every field of `other` that is still unset here.
            pub fn fill_missing(&mut self, other: &Modifiers) {
                $(
                    if self.$field.is_none() {
                        self.$field = other.$field.clone();
                    }
                )*
            }

            /// Names of the fields that are still unset.
            pub fn unset_fields(&self) -> Vec<&'static str> {
                let mut unset = Vec::new();
                $(
                    if self.$field.is_none() {
                        unset.push(stringify!($field));
                    }
                )*
                unset
            }
        }
    };
}

modifier_fields!(
    persons_on_events_mode,
    persons_arg_max_version,
    in_cohort_via,
    materialization_mode,
    optimize_joined_filters,
    persons_join_mode,
    bounce_rate_page_view_mode,
    session_table_version,
    sessions_v2_join_mode,
    property_groups_mode,
    use_materialized_views,
    custom_channel_type_rules,
    convert_to_project_timezone,
    s3_table_use_invalid_columns,
    debug,
);

impl Modifiers {
    /// True once every field has a value.
    pub fn is_resolved(&self) -> bool {
        self.unset_fields().is_empty()
    }

    /// Debug mode gates error containment for the whole pipeline.
    pub fn debug_enabled(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    /// Set fields as a JSON map, the form attached to query tags.
    pub fn to_tag_map(&self) -> BTreeMap<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }

    /// Static system defaults. Computed defaults are layered separately.
    fn static_defaults() -> Self {
        Self {
            persons_arg_max_version: Some(PersonsArgMaxVersion::Auto),
            in_cohort_via: Some(InCohortVia::Subquery),
            materialization_mode: Some(MaterializationMode::LegacyNullAsNull),
            optimize_joined_filters: Some(false),
            persons_join_mode: Some(PersonsJoinMode::Inner),
            bounce_rate_page_view_mode: Some(BounceRatePageViewMode::CountPageviews),
            session_table_version: Some(SessionTableVersion::Auto),
            sessions_v2_join_mode: Some(SessionsV2JoinMode::String),
            custom_channel_type_rules: Some(Vec::new()),
            convert_to_project_timezone: Some(true),
            s3_table_use_invalid_columns: Some(false),
            debug: Some(false),
            ..Self::default()
        }
    }
}

/// Parses stored overrides one field at a time so a malformed entry only
/// drops that entry.
fn stored_overrides(source: &dyn TeamModifierSource) -> Modifiers {
    let mut overrides = Modifiers::default();
    let Some(stored) = source.stored_modifiers() else {
        return overrides;
    };
    for (key, value) in stored {
        let mut single = serde_json::Map::new();
        single.insert(key.clone(), value.clone());
        match serde_json::from_value::<Modifiers>(serde_json::Value::Object(single)) {
            Ok(parsed) => overrides.fill_missing(&parsed),
            Err(err) => warn!(
                team_id = %source.team_id(),
                field = %key,
                error = %err,
                "skipping malformed stored modifier"
            ),
        }
    }
    overrides
}

/// Computes fully populated [`Modifiers`].
pub struct ModifierResolver<'a> {
    config: &'a CompilerConfig,
    flags: &'a dyn FeatureFlags,
}

impl<'a> ModifierResolver<'a> {
    /// Resolver reading defaults from `config` and `flags`.
    pub fn new(config: &'a CompilerConfig, flags: &'a dyn FeatureFlags) -> Self {
        Self { config, flags }
    }

    /// Resolves `explicit` against team state and defaults.
    ///
    /// The caller's record is copied, never mutated. Always returns a record
    /// with every field set.
    pub fn resolve(
        &self,
        explicit: Option<&Modifiers>,
        team: &dyn TeamModifierSource,
        principal: &Principal,
    ) -> Modifiers {
        let mut modifiers = explicit.cloned().unwrap_or_default();
        modifiers.fill_missing(&stored_overrides(team));
        self.apply_computed_defaults(&mut modifiers, team, principal);
        modifiers.fill_missing(&Modifiers::static_defaults());
        debug!(team_id = %team.team_id(), "resolved query modifiers");
        modifiers
    }

    /// Resolution for cohort membership queries: an unset or `auto` cohort
    /// strategy becomes `subquery`.
    pub fn resolve_for_cohort(
        &self,
        explicit: Option<&Modifiers>,
        team: &dyn TeamModifierSource,
        principal: &Principal,
    ) -> Modifiers {
        let mut modifiers = self.resolve(explicit, team, principal);
        if matches!(modifiers.in_cohort_via, None | Some(InCohortVia::Auto)) {
            modifiers.in_cohort_via = Some(InCohortVia::Subquery);
        }
        modifiers
    }

    fn apply_computed_defaults(
        &self,
        modifiers: &mut Modifiers,
        team: &dyn TeamModifierSource,
        principal: &Principal,
    ) {
        if modifiers.persons_on_events_mode.is_none() {
            modifiers.persons_on_events_mode = Some(team.default_persons_on_events_mode());
        }
        if modifiers.use_materialized_views.is_none() {
            let enabled = match principal {
                Principal::User { distinct_id } => {
                    let mut attributes = BTreeMap::new();
                    attributes.insert("team_id".to_owned(), team.team_id().to_string());
                    self.flags
                        .feature_enabled(MATERIALIZED_VIEWS_FLAG, distinct_id, &attributes)
                        .unwrap_or(true)
                }
                Principal::System => true,
            };
            modifiers.use_materialized_views = Some(enabled);
        }
        if modifiers.property_groups_mode.is_none() {
            modifiers.property_groups_mode = Some(if self.config.is_cloud() {
                PropertyGroupsMode::Optimized
            } else {
                PropertyGroupsMode::Disabled
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Deployment;
    use crate::query::team::Team;
    use crate::query::testing::StaticFlags;
    use proptest::prelude::*;
    use serde_json::json;

    fn resolver_with<'a>(config: &'a CompilerConfig, flags: &'a StaticFlags) -> ModifierResolver<'a> {
        ModifierResolver::new(config, flags)
    }

    fn full_explicit() -> Modifiers {
        Modifiers {
            persons_on_events_mode: Some(PersonsOnEventsMode::PersonIdOverridePropertiesJoined),
            persons_arg_max_version: Some(PersonsArgMaxVersion::V2),
            in_cohort_via: Some(InCohortVia::LeftJoinConjoined),
            materialization_mode: Some(MaterializationMode::Disabled),
            optimize_joined_filters: Some(true),
            persons_join_mode: Some(PersonsJoinMode::Left),
            bounce_rate_page_view_mode: Some(BounceRatePageViewMode::UniqUrls),
            session_table_version: Some(SessionTableVersion::V1),
            sessions_v2_join_mode: Some(SessionsV2JoinMode::Uuid),
            property_groups_mode: Some(PropertyGroupsMode::Enabled),
            use_materialized_views: Some(false),
            custom_channel_type_rules: Some(vec![ChannelTypeRule {
                id: "r1".into(),
                items: vec![],
                combiner: RuleCombiner::Or,
                channel_type: "Paid".into(),
            }]),
            convert_to_project_timezone: Some(false),
            s3_table_use_invalid_columns: Some(true),
            debug: Some(true),
        }
    }

    fn team_with_every_override() -> Team {
        Team::new(7).with_stored_modifiers(json!({
            "personsOnEventsMode": "person_id_no_override_properties_on_events",
            "personsArgMaxVersion": "v1",
            "inCohortVia": "leftjoin",
            "materializationMode": "legacy_null_as_string",
            "optimizeJoinedFilters": false,
            "personsJoinMode": "inner",
            "bounceRatePageViewMode": "uniq_page_screen_autocaptures",
            "sessionTableVersion": "v2",
            "sessionsV2JoinMode": "string",
            "propertyGroupsMode": "optimized",
            "useMaterializedViews": true,
            "customChannelTypeRules": [],
            "convertToProjectTimezone": true,
            "s3TableUseInvalidColumns": false,
            "debug": false
        }))
    }

    #[test]
    fn system_defaults_fill_every_field() {
        let config = CompilerConfig::default();
        let flags = StaticFlags::default();
        let modifiers = resolver_with(&config, &flags).resolve(None, &Team::new(1), &Principal::System);
        assert!(modifiers.is_resolved(), "unset: {:?}", modifiers.unset_fields());
        assert_eq!(modifiers.in_cohort_via, Some(InCohortVia::Subquery));
        assert_eq!(
            modifiers.materialization_mode,
            Some(MaterializationMode::LegacyNullAsNull)
        );
        assert_eq!(
            modifiers.bounce_rate_page_view_mode,
            Some(BounceRatePageViewMode::CountPageviews)
        );
        assert_eq!(modifiers.property_groups_mode, Some(PropertyGroupsMode::Disabled));
        assert_eq!(modifiers.use_materialized_views, Some(true));
    }

    #[test]
    fn team_overrides_fill_gaps_but_not_explicit_values() {
        let config = CompilerConfig::default();
        let flags = StaticFlags::default();
        let explicit = Modifiers {
            in_cohort_via: Some(InCohortVia::Auto),
            ..Modifiers::default()
        };
        let modifiers = resolver_with(&config, &flags).resolve(
            Some(&explicit),
            &team_with_every_override(),
            &Principal::System,
        );
        assert_eq!(modifiers.in_cohort_via, Some(InCohortVia::Auto));
        assert_eq!(
            modifiers.materialization_mode,
            Some(MaterializationMode::LegacyNullAsString)
        );
        assert_eq!(explicit.materialization_mode, None, "caller record untouched");
    }

    #[test]
    fn malformed_channel_rules_are_skipped() {
        let config = CompilerConfig::default();
        let flags = StaticFlags::default();
        let team = Team::new(3).with_stored_modifiers(json!({
            "customChannelTypeRules": [{"id": "x", "channelType": 5}],
            "personsJoinMode": "left"
        }));
        let modifiers = resolver_with(&config, &flags).resolve(None, &team, &Principal::System);
        assert_eq!(modifiers.custom_channel_type_rules, Some(Vec::new()));
        assert_eq!(modifiers.persons_join_mode, Some(PersonsJoinMode::Left));
    }

    #[test]
    fn computed_defaults_follow_team_flags_and_deployment() {
        let config = CompilerConfig {
            deployment: Deployment::Cloud,
            ..CompilerConfig::default()
        };
        let flags = StaticFlags::default().with_flag(MATERIALIZED_VIEWS_FLAG, false);
        let team = Team::new(9)
            .with_persons_on_events_mode(PersonsOnEventsMode::PersonIdOverridePropertiesOnEvents);
        let user = Principal::User {
            distinct_id: "user-1".into(),
        };
        let modifiers = resolver_with(&config, &flags).resolve(None, &team, &user);
        assert_eq!(
            modifiers.persons_on_events_mode,
            Some(PersonsOnEventsMode::PersonIdOverridePropertiesOnEvents)
        );
        assert_eq!(modifiers.use_materialized_views, Some(false));
        assert_eq!(modifiers.property_groups_mode, Some(PropertyGroupsMode::Optimized));

        let undetermined = StaticFlags::default();
        let modifiers = resolver_with(&config, &undetermined).resolve(None, &team, &user);
        assert_eq!(modifiers.use_materialized_views, Some(true));
    }

    #[test]
    fn cohort_resolution_replaces_auto() {
        let config = CompilerConfig::default();
        let flags = StaticFlags::default();
        let explicit = Modifiers {
            in_cohort_via: Some(InCohortVia::Auto),
            ..Modifiers::default()
        };
        let resolver = resolver_with(&config, &flags);
        let modifiers = resolver.resolve_for_cohort(Some(&explicit), &Team::new(1), &Principal::System);
        assert_eq!(modifiers.in_cohort_via, Some(InCohortVia::Subquery));
        let explicit = Modifiers {
            in_cohort_via: Some(InCohortVia::LeftJoin),
            ..Modifiers::default()
        };
        let modifiers = resolver.resolve_for_cohort(Some(&explicit), &Team::new(1), &Principal::System);
        assert_eq!(modifiers.in_cohort_via, Some(InCohortVia::LeftJoin));
    }

    #[test]
    fn tag_map_omits_unset_fields() {
        let modifiers = Modifiers {
            debug: Some(true),
            ..Modifiers::default()
        };
        let tags = modifiers.to_tag_map();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.get("debug"), Some(&json!(true)));
    }

    proptest! {
        #[test]
        fn prop_explicit_values_always_win(mask in prop::collection::vec(any::<bool>(), 15)) {
            let full = serde_json::to_value(full_explicit()).expect("serialize");
            let serde_json::Value::Object(map) = full else { unreachable!() };
            let kept: serde_json::Map<_, _> = map
                .into_iter()
                .zip(mask.iter())
                .filter(|(_, keep)| **keep)
                .map(|(entry, _)| entry)
                .collect();
            let explicit: Modifiers =
                serde_json::from_value(serde_json::Value::Object(kept.clone())).expect("deserialize");

            let config = CompilerConfig::default();
            let flags = StaticFlags::default();
            let resolved = resolver_with(&config, &flags).resolve(
                Some(&explicit),
                &team_with_every_override(),
                &Principal::System,
            );
            prop_assert!(resolved.is_resolved());
            let resolved_map = resolved.to_tag_map();
            for (key, value) in kept {
                prop_assert_eq!(resolved_map.get(&key), Some(&value));
            }
        }
    }
}
