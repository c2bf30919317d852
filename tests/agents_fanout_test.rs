/// Fan-out orchestration over fake agents
///
/// Tests cover:
/// - Completeness: N agents, K failing -> N-K fulfilled, no error
/// - Circuit breaker opening after the sixth error and skipping the agent
/// - At-least-once scrobbling (duplicate push on a lost answer)
/// - Search fusion across agents
mod utils;

use kumo_lib::modules::agents::domain::{ScrobbleUpdate, SearchQuery};
use serde_json::json;
use utils::factories::{raw_chapter, MangaFactory};
use utils::fakes::FakeAgent;
use utils::helpers::{agents_manager, ids};

#[tokio::test]
async fn fan_out_reports_every_agent_without_erroring() {
    let monster = MangaFactory::new("m", "Monster");
    let agents = vec![
        FakeAgent::new("one", 10).with_manga("1", monster.raw()).build(),
        FakeAgent::new("two", 20).failing().build(),
        FakeAgent::new("three", 30).with_manga("3", monster.raw()).build(),
        FakeAgent::new("four", 40).failing().build(),
    ];
    let manager = agents_manager(&agents);

    let report = manager
        .fetch_manga(&ids(&[("one", "1"), ("two", "2"), ("three", "3"), ("four", "4")]), None)
        .await;

    assert_eq!(report.fulfilled.len(), 2);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.fulfilled_ids(), vec!["one", "three"]);
    let failed: Vec<&str> = report.failed.iter().map(|f| f.agent_id.as_str()).collect();
    assert_eq!(failed, vec!["two", "four"]);
    // each failing agent was tried twice
    assert_eq!(agents[1].calls(), 2);
    assert_eq!(agents[3].calls(), 2);
}

#[tokio::test]
async fn unknown_manga_is_an_empty_answer_not_a_failure() {
    let agent = FakeAgent::new("one", 10).build();
    let manager = agents_manager(&[agent.clone()]);

    let report = manager.fetch_manga(&ids(&[("one", "missing")]), None).await;

    assert!(report.failed.is_empty());
    assert_eq!(report.fulfilled.len(), 1);
    assert!(report.into_found().is_empty());
    assert_eq!(agent.calls(), 1, "not-found is not retried");
}

#[tokio::test]
async fn sixth_error_opens_the_circuit_and_the_next_call_is_skipped() {
    let broken = FakeAgent::new("broken", 10).failing().build();
    let manager = agents_manager(&[broken.clone()]);
    let target = ids(&[("broken", "b-1")]);

    // each fan-out makes two attempts: 2, 4, 6 errors
    for _ in 0..3 {
        let report = manager.fetch_manga(&target, None).await;
        assert_eq!(report.failed.len(), 1);
        assert!(report.skipped.is_empty());
    }
    assert_eq!(broken.calls(), 6);
    let status = manager.status();
    assert!(!status[0].active);

    let report = manager.fetch_manga(&target, None).await;
    assert_eq!(report.skipped, vec!["broken"]);
    assert_eq!(report.attempted(), 0);
    assert_eq!(broken.calls(), 6, "a skipped agent is never called");
    assert!(manager.get("broken").is_some(), "inactive agents stay registered");
}

#[tokio::test]
async fn lost_scrobble_answer_is_pushed_twice() {
    let tracker = FakeAgent::new("tracker", 10).tracking().losing_answers(1).build();
    let manager = agents_manager(&[tracker.clone()]);

    let update = ScrobbleUpdate {
        ids: ids(&[("tracker", "t-1")]),
        chapter: 12.0,
        ..ScrobbleUpdate::default()
    };
    let report = manager.scrobble(&update, None).await;

    // the first push landed but its answer was lost; the retry pushed again
    assert_eq!(report.value_of("tracker"), Some(&true));
    let pushes = tracker.pushes();
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[0], pushes[1]);
    assert_eq!(pushes[0]["chapter"], json!(12.0));
}

#[tokio::test]
async fn scrobble_only_reaches_tracking_agents_with_an_id() {
    let tracker = FakeAgent::new("tracker", 10).tracking().build();
    let reader = FakeAgent::new("reader", 20).build();
    let other = FakeAgent::new("other", 30).tracking().build();
    let manager = agents_manager(&[tracker.clone(), reader.clone(), other.clone()]);

    let update = ScrobbleUpdate {
        ids: ids(&[("tracker", "t-1"), ("reader", "r-1")]),
        chapter: 3.0,
        ..ScrobbleUpdate::default()
    };
    let report = manager.scrobble(&update, None).await;

    assert_eq!(report.fulfilled_ids(), vec!["tracker"]);
    assert_eq!(reader.calls(), 0);
    assert_eq!(other.calls(), 0);
}

#[tokio::test]
async fn search_fuses_hits_describing_the_same_manga() {
    let one = FakeAgent::new("one", 10)
        .with_search_hits(vec![
            MangaFactory::new("1", "Monster").year(1994).authors(&["Naoki Urasawa"]).raw(),
            MangaFactory::new("9", "Monster Musume").year(2012).raw(),
        ])
        .build();
    let two = FakeAgent::new("two", 20)
        .with_search_hits(vec![MangaFactory::new("2", "monster")
            .year(1995)
            .authors(&["Naoki Urasawa"])
            .raw()])
        .build();
    let manager = agents_manager(&[one, two]);

    let unified = manager
        .search_unified(&SearchQuery::title("Monster"), None)
        .await
        .unwrap();

    let monster = unified
        .iter()
        .find(|m| m.external_ids.contains_key("two"))
        .expect("fused entry");
    assert_eq!(monster.external_ids.get("one").map(String::as_str), Some("1"));
    assert_eq!(monster.external_ids.get("two").map(String::as_str), Some("2"));
    assert!(unified.iter().all(|m| m.external_ids.len() <= 2));
}

#[tokio::test]
async fn chapters_are_filtered_by_language() {
    let agent = FakeAgent::new("one", 10)
        .with_chapters("1", vec![raw_chapter("c1", 1.0, "en"), raw_chapter("c1-fr", 1.0, "fr")])
        .build();
    let manager = agents_manager(&[agent]);

    let report = manager.fetch_chapters(&ids(&[("one", "1")]), Some("en"), None).await;
    let chapters = report.into_flattened();

    assert_eq!(chapters.len(), 1);
    assert_eq!(chapters[0].record.language.as_deref(), Some("en"));
    assert_eq!(chapters[0].record.number, Some(1.0));
}
