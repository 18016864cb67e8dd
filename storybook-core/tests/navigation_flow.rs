//! Reading-flow tests over whole sessions.
//!
//! These drive the spread navigator through the test harness:
//! - Choice gating on advance
//! - Terminal spreads locking forward motion
//! - Path locking and mutual exclusivity rules
//! - Paired scenes and background prefetch triggers

use std::sync::Arc;
use std::time::{Duration, Instant};
use storybook_core::navigator::{BlockReason, Page, Phase, Transition};
use storybook_core::story::{Choice, Scene, Story, StoryMeta, StoryRules};
use storybook_core::testing::{assert_fully_revealed, assert_spread, TestHarness};
use storybook_core::{Intent, NavigatorConfig, ReadingSession};

fn meta() -> StoryMeta {
    StoryMeta {
        version: 1,
        title: "Flow".to_string(),
    }
}

/// Walk the sample story up to the decision at `1d`.
fn reach_fork(harness: &mut TestHarness) {
    assert_eq!(harness.advance(), Transition::RevealedRight);
    assert_eq!(harness.advance(), Transition::NextSpread);
    assert_eq!(harness.advance(), Transition::RevealedRight);
    harness.wait(Duration::from_millis(100));
    assert_eq!(harness.right_id(), Some("1d"));
}

#[test]
fn test_multi_choice_start_blocks_advance() {
    let story = Story::new(
        meta(),
        "s0",
        vec![
            Scene::new("s0", "Which way?")
                .with_choice(Choice::new("l", "Left", "s1"))
                .with_choice(Choice::new("r", "Right", "s2")),
            Scene::new("s1", "Left."),
            Scene::new("s2", "Right."),
        ],
        StoryRules::default(),
    )
    .unwrap();
    let mut harness = TestHarness::with_story(story);
    assert_spread(&harness, 0, Phase::LeftOnly);

    let blocked = harness.advance();
    assert_eq!(
        blocked,
        Transition::Blocked(BlockReason::ChoiceRequired { page: Page::Left })
    );
    assert_spread(&harness, 0, Phase::LeftOnly);
    assert!(harness.advisory().is_some());

    let entered = harness.choose("s2");
    assert_eq!(
        entered,
        Transition::Entered {
            scene_id: "s2".into()
        }
    );
    assert!(harness.session.visited().contains("s2"));
    assert_spread(&harness, 2, Phase::LeftOnly);
}

#[test]
fn test_terminal_right_page_locks_spread() {
    let story = Story::new(
        meta(),
        "a",
        vec![
            Scene::new("a", "").with_choice(Choice::new("go", "Go", "last")),
            Scene::new("b", ""),
            Scene::new("last", "Almost."),
            Scene::new("end", "The end.").terminal(),
        ],
        StoryRules::default(),
    )
    .unwrap();
    let mut harness = TestHarness::with_story(story);

    harness.choose("last");
    assert_spread(&harness, 2, Phase::FullSpread);
    assert_fully_revealed(&harness);
    let frame = harness.frame();
    assert!(frame.left_choices.is_empty());
    assert!(frame.right_choices.is_empty());
    assert!(frame.at_end);

    assert_eq!(
        harness.advance(),
        Transition::Blocked(BlockReason::StoryEnded)
    );
    assert_spread(&harness, 2, Phase::FullSpread);
    assert!(harness.advisory().unwrap().contains("ended"));

    harness.wait(Duration::from_secs(2));
    assert!(harness.advisory().is_none());
}

#[test]
fn test_sample_story_path_rules() {
    let mut harness = TestHarness::new();
    reach_fork(&mut harness);

    // 1d offers two choices
    assert_eq!(
        harness.advance(),
        Transition::Blocked(BlockReason::ChoiceRequired { page: Page::Right })
    );
    assert_eq!(
        harness.advisory().as_deref(),
        Some("Please select an option on the right page to continue")
    );

    harness.choose("2a");
    assert!(harness.session.flags().get("took_forest"));
    assert_spread(&harness, 4, Phase::LeftOnly);

    // Paired scene opens the full spread at its own index
    harness.choose("3a1");
    assert_spread(&harness, 6, Phase::FullSpread);
    assert_fully_revealed(&harness);
    assert_eq!(harness.right_id(), Some("3b1"));

    // 4a is locked from the 3* branch
    assert_eq!(
        harness.choose("4a"),
        Transition::Blocked(BlockReason::PathLocked {
            target: "4a".into()
        })
    );
    assert!(!harness.session.visited().contains("4a"));

    // Back to the tower/cellar fork: the cellar is now closed
    assert_eq!(harness.retreat(), Transition::HidRight);
    assert_eq!(harness.retreat(), Transition::PreviousSpread);
    assert_spread(&harness, 4, Phase::LeftOnly);
    assert_eq!(
        harness.choose("3a2"),
        Transition::Blocked(BlockReason::PathExcluded {
            target: "3a2".into(),
            visited: "3a1".into()
        })
    );

    // Replaying opens it again
    harness.session.replay(harness.now);
    assert!(harness.session.visited().is_empty());
    reach_fork(&mut harness);
    harness.choose("2a");
    assert_eq!(
        harness.choose("3a2"),
        Transition::Entered {
            scene_id: "3a2".into()
        }
    );
    assert_spread(&harness, 8, Phase::FullSpread);
}

#[test]
fn test_gated_choice_appears_after_effect() {
    let mut harness = TestHarness::new();
    reach_fork(&mut harness);
    harness.choose("2a");
    harness.choose("3a2");

    // Take the jar; 4b lands on the right page of spread 10
    harness.choose("4b");
    assert_spread(&harness, 10, Phase::LeftOnly);
    assert!(harness.session.flags().get("has_jar"));

    harness.advance();
    harness.wait(Duration::from_millis(80));
    let frame = harness.frame();
    let targets: Vec<&str> = frame
        .right_choices
        .iter()
        .map(|c| c.target.as_str())
        .collect();
    assert_eq!(targets, vec!["coda", "end"]);
}

#[test]
fn test_story_end_from_sample() {
    let mut harness = TestHarness::new();
    reach_fork(&mut harness);
    harness.choose("2a");

    // Right-page choices stay out of reach while the page is hidden
    assert!(matches!(
        harness.choose("4b"),
        Transition::Blocked(BlockReason::ChoiceUnavailable { .. })
    ));

    harness.choose("3a1");
    harness.choose("4b");
    assert_spread(&harness, 10, Phase::LeftOnly);
    assert_eq!(harness.advance(), Transition::RevealedRight);

    harness.choose("coda");
    assert_spread(&harness, 12, Phase::FullSpread);
    assert_eq!(harness.right_id(), Some("end"));
    assert!(harness.frame().at_end);
    assert_eq!(
        harness.choose("end"),
        Transition::Blocked(BlockReason::StoryEnded)
    );

    // Restart keeps what was learned
    assert_eq!(harness.restart(), Transition::Restarted);
    assert_spread(&harness, 0, Phase::LeftOnly);
    assert!(harness.session.visited().contains("3a1"));
    assert!(harness.session.flags().get("took_forest"));
}

#[test]
fn test_reveal_timing() {
    let mut harness = TestHarness::new();
    assert!(!harness.frame().left_revealed);

    harness.wait(Duration::from_millis(10));
    assert!(harness.frame().left_revealed);

    harness.advance();
    assert!(!harness.frame().right_revealed);
    harness.wait(Duration::from_millis(79));
    assert!(!harness.frame().right_revealed);
    harness.wait(Duration::from_millis(1));
    assert!(harness.frame().right_revealed);
}

#[test]
fn test_custom_timing() {
    let t0 = Instant::now();
    let config = NavigatorConfig::default()
        .with_reveal_delays(Duration::ZERO, Duration::from_millis(5))
        .with_advisory_ttls(Duration::from_millis(50), Duration::from_millis(60));
    let mut session = ReadingSession::new(
        Arc::new(storybook_core::testing::sample_story()),
        config,
        t0,
    );

    assert!(session.frame(t0).left_revealed);
    session.apply(Intent::Advance, t0);
    assert!(session.frame(t0 + Duration::from_millis(5)).right_revealed);
}

#[tokio::test]
async fn test_fork_triggers_background_prefetch() {
    let mut harness = TestHarness::new();
    reach_fork(&mut harness);

    let tasks = harness.session.take_background_tasks();
    assert_eq!(tasks.len(), 1);
    for task in tasks {
        let report = task.await.unwrap();
        assert_eq!(report.total(), 4);
    }
    assert_eq!(harness.generator.calls(), vec!["2a", "2b", "4a", "4b"]);

    // Firing again on the same spread does nothing
    harness.retreat();
    harness.advance();
    assert!(harness.session.take_background_tasks().is_empty());
}

#[tokio::test]
async fn test_replays_do_not_pile_up_finished_prefetches() {
    let mut harness = TestHarness::new();

    for _ in 0..3 {
        reach_fork(&mut harness);
        // Let the spawned prefetch run to completion
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.session.replay(harness.now);
    }
    reach_fork(&mut harness);

    assert_eq!(harness.session.take_background_tasks().len(), 1);
    // Only the first playthrough had anything to generate
    assert_eq!(harness.generator.call_count(), 4);
}

#[test]
fn test_bundled_story_matches_sample() {
    let bundled = Story::from_json(include_str!("../../reader/stories/sample.json")).unwrap();
    let sample = storybook_core::testing::sample_story();

    assert_eq!(bundled.meta(), sample.meta());
    assert_eq!(bundled.start(), sample.start());
    assert_eq!(bundled.scenes(), sample.scenes());
    assert_eq!(bundled.rules(), sample.rules());
}
