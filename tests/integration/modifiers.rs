#![allow(clippy::all)]
#![allow(missing_docs)]

use std::io::Write;
use std::sync::Arc;

use hogql_exec::error::Result;
use hogql_exec::query::ast::{Expr, SelectQuery};
use hogql_exec::query::database::StaticDatabaseProvider;
use hogql_exec::query::modifiers::{
    MaterializationMode, ModifierResolver, Modifiers, PersonsJoinMode, PropertyGroupsMode,
    MATERIALIZED_VIEWS_FLAG,
};
use hogql_exec::query::services::QueryServices;
use hogql_exec::query::team::{Principal, Team};
use hogql_exec::query::testing::{RecordingStorage, StaticFlags, StaticParser};
use hogql_exec::{CompilerConfig, QueryRequest, QueryRunner};
use serde_json::json;

fn cloud_config() -> Result<CompilerConfig> {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "deployment = \"cloud\"\n\n[limits]\ndefault_returned_rows = 25").expect("write");
    CompilerConfig::load(file.path())
}

#[test]
fn team_overrides_reach_the_response_and_tags() -> Result<()> {
    let storage = Arc::new(RecordingStorage::new());
    let parser = StaticParser::new().with_statement("SELECT 1", SelectQuery::new(vec![Expr::constant(1_i64)]));
    let services = QueryServices::new(
        Arc::new(parser),
        storage.clone(),
        Arc::new(StaticDatabaseProvider::default()),
    )
    .with_config(cloud_config()?)
    .with_flags(Arc::new(StaticFlags::default().with_flag(MATERIALIZED_VIEWS_FLAG, false)));
    let runner = QueryRunner::new(services);
    let team = Team::new(11).with_stored_modifiers(json!({
        "materializationMode": "disabled",
        "personsJoinMode": "not-a-mode",
        "customChannelTypeRules": "nonsense"
    }));
    let request = QueryRequest::new("SELECT 1")
        .with_principal(Principal::User {
            distinct_id: "u-1".into(),
        })
        .with_modifiers(Modifiers {
            persons_join_mode: Some(PersonsJoinMode::Left),
            ..Modifiers::default()
        });

    let response = runner.execute(&request, &team)?;

    let modifiers = &response.modifiers;
    assert!(modifiers.is_resolved());
    assert_eq!(modifiers.materialization_mode, Some(MaterializationMode::Disabled));
    assert_eq!(modifiers.persons_join_mode, Some(PersonsJoinMode::Left));
    assert_eq!(modifiers.custom_channel_type_rules, Some(Vec::new()));
    assert_eq!(modifiers.property_groups_mode, Some(PropertyGroupsMode::Optimized));
    assert_eq!(modifiers.use_materialized_views, Some(false));
    assert_eq!(response.hogql, "SELECT 1 LIMIT 25");

    let tags = &storage.calls()[0].tags;
    assert_eq!(tags.modifiers.get("materializationMode"), Some(&json!("disabled")));
    Ok(())
}

#[test]
fn resolution_never_mutates_the_callers_record() {
    let config = CompilerConfig::default();
    let flags = StaticFlags::default();
    let explicit = Modifiers::default();
    let resolved = ModifierResolver::new(&config, &flags).resolve(Some(&explicit), &Team::new(1), &Principal::System);
    assert!(resolved.is_resolved());
    assert_eq!(explicit, Modifiers::default());
    assert_eq!(explicit.unset_fields().len(), 15);
}

#[test]
fn modifiers_serialize_without_unset_fields() {
    let modifiers = Modifiers {
        materialization_mode: Some(MaterializationMode::LegacyNullAsNull),
        ..Modifiers::default()
    };
    assert_eq!(
        serde_json::to_value(&modifiers).expect("serialize"),
        json!({"materializationMode": "legacy_null_as_null"})
    );
}
