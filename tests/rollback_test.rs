mod helpers;

use helpers::ScriptedModel;
use taleweaver::story::memory::{get_summary, list_recent, write_summary};
use taleweaver::story::registry::{get_character, player};
use taleweaver::story::relations::get_relationships;
use taleweaver::story::scene::{current_scene, present_ids};
use taleweaver::story::types::RelationKind;
use taleweaver::turn::{Addressee, TurnOutcome};
use taleweaver::Session;

async fn play(session: &mut Session, n: usize) -> Vec<String> {
    let stella = session.find_character("Stella").unwrap();
    let mut ids = Vec::new();
    for i in 0..n {
        match session
            .run_turn(&Addressee::Character(stella.id.clone()), &format!("Drink {i}"))
            .await
            .unwrap()
        {
            TurnOutcome::Completed(report) => ids.push(report.memory.id),
            TurnOutcome::Failed { reason } => panic!("turn {i} failed: {reason}"),
        }
    }
    ids
}

fn scripted(n: usize) -> ScriptedModel {
    ScriptedModel::new((1..=n).map(helpers::stella_reply))
}

#[tokio::test]
async fn delete_three_of_ten_leaves_seven() {
    let mut session = helpers::tavern_session(scripted(10));
    let ids = play(&mut session, 10).await;
    let stella = session.find_character("Stella").unwrap();
    let before = get_relationships(session.connection(), &stella.id).unwrap();

    let result = session.delete_last(3).unwrap();
    assert_eq!(result.reverted, 3);
    assert!(!result.clamped);
    assert!(result.inconsistency().is_none());

    let remaining = session.list_recent(10).unwrap();
    assert_eq!(remaining.len(), 7);
    for deleted in &ids[7..] {
        assert!(result.deleted_ids.contains(deleted));
        assert!(remaining.iter().all(|m| &m.id != deleted));
    }
    assert_eq!(remaining[0].id, ids[6]);

    let after = get_relationships(session.connection(), &stella.id).unwrap();
    for edge in &after {
        assert!(edge.strength >= 0.0);
        let old = before.iter().find(|e| e.id == edge.id).unwrap();
        assert!(edge.strength <= old.strength);
    }
    let spoke = after.iter().find(|e| e.kind == RelationKind::SpokeWith).unwrap();
    assert_eq!(spoke.interaction_count, 7);
    assert!((spoke.strength - 7.0).abs() < 1e-9);
    assert_eq!(spoke.last_interaction_at, remaining[0].created_at);
}

#[tokio::test]
async fn over_asking_clamps_and_reports() {
    let mut session = helpers::tavern_session(scripted(2));
    play(&mut session, 2).await;

    let result = session.delete_last(5).unwrap();
    assert_eq!(result.requested, 5);
    assert_eq!(result.reverted, 2);
    assert!(result.clamped);
    assert!(result.inconsistency().is_some());
    assert!(list_recent(session.connection(), 10).unwrap().is_empty());

    // setup relationships survive a full rollback
    let stella = session.find_character("Stella").unwrap();
    let edges = get_relationships(session.connection(), &stella.id).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].kind, RelationKind::Knows);
    assert!((edges[0].strength - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn undoing_an_introduction_clears_presence_and_edges() {
    let model = ScriptedModel::new([
        helpers::stella_reply(1),
        "Narrator: A hooded man slips in from the storm.\nStella: Another one.".to_string(),
    ]);
    let mut session = helpers::tavern_session(model);
    play(&mut session, 2).await;

    let hooded = session.find_character("hooded man").unwrap();
    let scene = current_scene(session.connection()).unwrap().unwrap();
    assert!(present_ids(session.connection(), &scene.id).unwrap().contains(&hooded.id));

    let result = session.delete_last(1).unwrap();
    assert_eq!(result.edges_removed, 1);

    let present = present_ids(session.connection(), &scene.id).unwrap();
    assert!(!present.contains(&hooded.id));
    let stella = session.find_character("Stella").unwrap();
    let ada = player(session.connection()).unwrap().unwrap();
    assert!(present.contains(&stella.id));
    assert!(present.contains(&ada.id));

    assert!(get_relationships(session.connection(), &hooded.id).unwrap().is_empty());
    assert!(get_character(session.connection(), &hooded.id).unwrap().last_seen_scene.is_none());
}

#[tokio::test]
async fn undoing_summarized_turns_marks_summary_stale() {
    let mut session = helpers::tavern_session(scripted(4));
    play(&mut session, 3).await;
    let newest = list_recent(session.connection(), 1).unwrap().remove(0);
    let covered = Some(newest.created_at.as_str());
    write_summary(session.connection(), "Three rounds were poured.", covered).unwrap();
    play(&mut session, 1).await;
    assert_eq!(get_summary(session.connection()).unwrap().turns_since, 1);

    // only the uncovered turn
    let result = session.delete_last(1).unwrap();
    assert!(!result.summary_marked_stale);
    let summary = get_summary(session.connection()).unwrap();
    assert!(!summary.stale);
    assert_eq!(summary.turns_since, 0);

    // reaching into the covered span
    let result = session.delete_last(1).unwrap();
    assert!(result.summary_marked_stale);
    assert!(get_summary(session.connection()).unwrap().stale);
}
