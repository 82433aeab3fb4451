mod helpers;

use taleweaver::config::RegistryConfig;
use taleweaver::error::EngineError;
use taleweaver::story::memory::{append_memory, get_recent_memories, NewMemory};
use taleweaver::story::names::{scan, Mention};
use taleweaver::story::registry::{
    character_count, get_character, resolve_identity_claim, resolve_or_create, Entity, Resolution,
};
use taleweaver::story::relations::{get_relationships, record_interaction};
use taleweaver::story::timestamp;
use taleweaver::story::types::{EntityKind, Emotion, RelationKind};
use taleweaver::config::MemoryConfig;

fn character(name: &str) -> Mention {
    Mention::proper(name, EntityKind::Character)
}

fn created(resolution: Resolution) -> String {
    match resolution {
        Resolution::Created(e) => e.id().to_string(),
        other => panic!("expected a new entity, got {other:?}"),
    }
}

#[test]
fn differently_cased_names_are_one_character() {
    let conn = helpers::test_db();
    let config = RegistryConfig::default();

    let first = resolve_or_create(&conn, &character("Stella"), &config).unwrap();
    let id = created(first);
    let again = resolve_or_create(&conn, &character("stella"), &config).unwrap();

    assert!(matches!(again, Resolution::Matched(_)));
    assert_eq!(again.character_id(), Some(id.as_str()));
    assert_eq!(character_count(&conn).unwrap(), 1);
}

#[test]
fn near_miss_spelling_merges_and_becomes_alias() {
    let conn = helpers::test_db();
    let config = RegistryConfig::default();
    let stella = helpers::add_character(&conn, "Stella");

    let merged = resolve_or_create(&conn, &character("Stela"), &config).unwrap();
    assert!(matches!(merged, Resolution::Merged(_)));
    assert_eq!(merged.character_id(), Some(stella.id.as_str()));

    let reloaded = get_character(&conn, &stella.id).unwrap();
    assert!(reloaded.aliases.iter().any(|a| a == "Stela"));

    // the alias now matches exactly
    let exact = resolve_or_create(&conn, &character("STELA"), &config).unwrap();
    assert!(matches!(exact, Resolution::Matched(_)));
}

#[test]
fn hooded_man_revealed_as_viktor_keeps_identity() {
    let conn = helpers::test_db();
    let config = RegistryConfig::default();
    let player = helpers::add_character(&conn, "Ada");

    let first = scan("A hooded man watches from the corner.", &[]);
    assert_eq!(first.mentions.len(), 1);
    let hooded_id = created(resolve_or_create(&conn, &first.mentions[0], &config).unwrap());
    let hooded = get_character(&conn, &hooded_id).unwrap();
    assert!(hooded.pending_identity);

    append_memory(
        &conn,
        &NewMemory {
            character_id: hooded_id.clone(),
            emotion: Emotion::Neutral,
            user_text: "Who are you?".into(),
            response_text: "Nobody you know.".into(),
            scene_id: None,
        },
    )
    .unwrap();
    record_interaction(
        &conn,
        &player.id,
        &hooded_id,
        RelationKind::SpokeWith,
        &timestamp(),
        None,
        1.0,
    )
    .unwrap();

    let reveal = scan("The hooded man is Viktor.", &[]);
    assert_eq!(reveal.claims.len(), 1);
    let resolution = resolve_identity_claim(&conn, &reveal.claims[0], &config).unwrap();
    assert!(matches!(resolution, Resolution::Merged(Entity::Character(_))));
    assert_eq!(resolution.character_id(), Some(hooded_id.as_str()));

    let viktor = get_character(&conn, &hooded_id).unwrap();
    assert_eq!(viktor.name, "Viktor");
    assert!(!viktor.pending_identity);
    assert!(viktor.aliases.iter().any(|a| a == "hooded man"));

    let memories = get_recent_memories(&conn, &hooded_id, 5, &MemoryConfig::default()).unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(get_relationships(&conn, &hooded_id).unwrap().len(), 1);

    // the old description still finds him
    let later = resolve_or_create(&conn, &character("hooded man"), &config).unwrap();
    assert_eq!(later.character_id(), Some(hooded_id.as_str()));
}

#[test]
fn place_names_match_across_kinds() {
    let conn = helpers::test_db();
    let config = RegistryConfig::default();

    let tavern = Mention::proper("Rusty Anchor Tavern", EntityKind::Place);
    let place_id = created(resolve_or_create(&conn, &tavern, &config).unwrap());
    let again = resolve_or_create(
        &conn,
        &character("rusty anchor tavern"),
        &config,
    )
    .unwrap();
    match again.entity() {
        Some(Entity::Place(p)) => assert_eq!(p.id, place_id),
        other => panic!("expected the tavern, got {other:?}"),
    }
    assert_eq!(character_count(&conn).unwrap(), 0);
}

#[test]
fn capacity_drops_mention_and_logs_it() {
    let conn = helpers::test_db();
    let config = RegistryConfig {
        max_characters: 2,
        ..RegistryConfig::default()
    };
    helpers::add_character(&conn, "Stella");
    helpers::add_character(&conn, "Marco");

    let err = resolve_or_create(&conn, &character("Viktor"), &config).unwrap_err();
    assert!(matches!(err, EngineError::EntityCapacityExceeded { limit: 2, .. }));
    assert!(err.is_recoverable());
    assert_eq!(character_count(&conn).unwrap(), 2);

    let dropped: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM story_log \
             WHERE operation = 'mention_dropped' AND subject_id = 'Viktor'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(dropped, 1);

    // known names still resolve at capacity
    let known = resolve_or_create(&conn, &character("marco"), &config).unwrap();
    assert!(matches!(known, Resolution::Matched(_)));
}

#[test]
fn claim_naming_a_known_character_adds_an_alias_instead() {
    let conn = helpers::test_db();
    let config = RegistryConfig::default();
    let marco = helpers::add_character(&conn, "Marco");

    let intro = scan("A hooded man slips in from the storm.", &[]);
    let hooded_id = created(resolve_or_create(&conn, &intro.mentions[0], &config).unwrap());

    let reveal = scan("The hooded man is Marco.", &[]);
    let resolution = resolve_identity_claim(&conn, &reveal.claims[0], &config).unwrap();
    assert!(matches!(resolution, Resolution::Merged(_)));
    assert_eq!(resolution.character_id(), Some(marco.id.as_str()));

    let marco = get_character(&conn, &marco.id).unwrap();
    assert!(marco.aliases.iter().any(|a| a == "hooded man"));
    assert_eq!(get_character(&conn, &hooded_id).unwrap().name, "hooded man");

    // the description now lands on the named character
    let again = resolve_or_create(&conn, &Mention::indefinite("hooded man"), &config).unwrap();
    assert_eq!(again.character_id(), Some(marco.id.as_str()));
}
