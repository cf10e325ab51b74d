use crate::config::Config;
use crate::database::Database;
use crate::engine::InputType;
use crate::fixtures::{self, Harness, IDENTITY_SCRIPT};
use crate::store::{profile_from_entity, Entity, EntityType, PipeConfig, Repository};

#[tokio::test]
async fn entity_bucket_round_trip() {
    let harness = Harness::new().await.expect("expected harness to build");
    let entity = fixtures::listener_entity("listener-1");
    harness.repository.listeners.insert(&entity).expect("expected insert to succeed");

    let found = harness.repository.listeners.one("listener-1").expect("expected entity to be found");
    assert_eq!(found, entity, "expected stored entity to round trip");

    let listed = harness.repository.listeners.list().expect("expected list to succeed");
    assert_eq!(listed.len(), 1, "unexpected listed entity count");

    harness.repository.listeners.delete("listener-1").expect("expected delete to succeed");
    let err = harness.repository.listeners.one("listener-1").expect_err("expected lookup to fail after delete");
    assert!(
        err.to_string().contains("listener with uid : listener-1 not found"),
        "unexpected error, got {}",
        err
    );
}

#[tokio::test]
async fn missing_entities_are_named_per_bucket() {
    let harness = Harness::new().await.expect("expected harness to build");
    let err = harness.repository.profiles.one("missing").expect_err("expected lookup to fail");
    assert!(err.to_string().contains("profile with uid : missing not found"), "unexpected error, got {}", err);
    let err = harness.repository.pipes.one("memory://missing").expect_err("expected lookup to fail");
    assert!(
        err.to_string().contains("pipe with uid : memory://missing not found"),
        "unexpected error, got {}",
        err
    );
}

#[tokio::test]
async fn update_or_create_derives_stable_content_uid() {
    let harness = Harness::new().await.expect("expected harness to build");
    let first = harness
        .repository
        .update_or_create_entity(&harness.registry, fixtures::listener_entity(""))
        .expect("expected create to succeed");
    let second = harness
        .repository
        .update_or_create_entity(&harness.registry, fixtures::listener_entity(""))
        .expect("expected create to succeed");
    assert_eq!(first, second, "expected identical configuration to land on the same uid");
    assert_eq!(
        harness.repository.listeners.list().expect("expected list to succeed").len(),
        1,
        "expected re-submission to update in place"
    );
}

#[tokio::test]
async fn update_or_create_uses_profile_name_as_uid() {
    let harness = Harness::new().await.expect("expected harness to build");
    let uid = harness
        .repository
        .update_or_create_entity(&harness.registry, fixtures::profile_entity("", "identity", IDENTITY_SCRIPT))
        .expect("expected create to succeed");
    assert_eq!(uid, "identity", "expected profile uid to be derived from its name");
}

#[tokio::test]
async fn update_or_create_refuses_unregistered_kind() {
    let harness = Harness::new().await.expect("expected harness to build");
    let mut entity = fixtures::listener_entity("");
    entity.kind = "mqtt".to_string();
    let err = harness
        .repository
        .update_or_create_entity(&harness.registry, entity)
        .expect_err("expected create to fail");
    assert!(err.to_string().contains("listener kind : mqtt not registered"), "unexpected error, got {}", err);
}

#[tokio::test]
async fn pipe_bucket_survives_database_reopen() {
    let (config, _tmpdir) = Config::new_test().expect("expected test config to build");
    let pipe = PipeConfig {
        uri: "memory://sensors".to_string(),
        listener: fixtures::listener_entity("listener-1"),
        endpoints: vec![fixtures::endpoint_entity("endpoint-1")],
        profile: profile_from_entity(&fixtures::profile_entity("identity", "identity", IDENTITY_SCRIPT))
            .expect("expected profile to parse"),
        tags: fixtures::config_map(&[("site", "lab")]),
    };

    {
        let db = Database::new(config.clone()).await.expect("expected database to open");
        let repository = Repository::new(&db).await.expect("expected repository to open");
        repository.pipes.insert(&pipe).expect("expected insert to succeed");
    }

    let db = Database::new(config).await.expect("expected database to reopen");
    let repository = Repository::new(&db).await.expect("expected repository to reopen");
    let listed = repository.pipes.list().expect("expected list to succeed");
    assert_eq!(listed, vec![pipe], "expected pipe configuration to survive a reopen");
}

#[test]
fn profile_from_entity_parses_all_fields() {
    let mut entity = fixtures::profile_entity("identity", "identity", IDENTITY_SCRIPT);
    entity
        .configuration
        .insert("schema".to_string(), r#"{"type": "object"}"#.to_string());
    let profile = profile_from_entity(&entity).expect("expected profile to parse");
    assert_eq!(profile.uid, "identity");
    assert_eq!(profile.name, "identity");
    assert_eq!(profile.version, "0.0.1");
    assert_eq!(profile.schema, serde_json::json!({"type": "object"}));
    assert_eq!(profile.script.main, "decode");
    assert_eq!(profile.script.input, InputType::Json);
    assert_eq!(profile.script.contents, IDENTITY_SCRIPT);
}

#[test]
fn profile_from_entity_names_missing_keys() {
    let mut entity = fixtures::profile_entity("identity", "identity", IDENTITY_SCRIPT);
    entity.configuration.remove("script-main");
    let err = profile_from_entity(&entity).expect_err("expected parse to fail");
    assert!(
        err.to_string().contains("profile configuration missing key : script-main"),
        "unexpected error, got {}",
        err
    );
}

#[test]
fn profile_from_entity_rejects_invalid_schema() {
    let mut entity = fixtures::profile_entity("identity", "identity", IDENTITY_SCRIPT);
    entity.configuration.insert("schema".to_string(), "{not json".to_string());
    let err = profile_from_entity(&entity).expect_err("expected parse to fail");
    assert!(err.to_string().contains("profile schema is not valid json"), "unexpected error, got {}", err);
}

#[test]
fn profile_from_entity_rejects_unknown_input_type() {
    let mut entity = fixtures::profile_entity("identity", "identity", IDENTITY_SCRIPT);
    entity.configuration.insert("script-input".to_string(), "xml".to_string());
    let err = profile_from_entity(&entity).expect_err("expected parse to fail");
    assert!(err.to_string().contains("script input type : xml not supported"), "unexpected error, got {}", err);
}

#[test]
fn entity_type_is_unaffected_by_serde_round_trip() {
    let entity = fixtures::endpoint_entity("endpoint-1");
    let encoded = serde_json::to_string(&entity).expect("expected entity to encode");
    assert!(encoded.contains(r#""type":"endpoint""#), "unexpected encoding, got {}", encoded);
    let decoded: Entity = serde_json::from_str(&encoded).expect("expected entity to decode");
    assert_eq!(decoded.entity_type, EntityType::Endpoint);
}
