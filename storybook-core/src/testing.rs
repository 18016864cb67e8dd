//! Testing utilities for the storybook engine.
//!
//! This module provides tools for integration testing:
//! - `MockGenerator` for deterministic illustration without API calls
//! - `FailingStore` for exercising storage failures
//! - `sample_story` with branches, exclusivity, locking, pairing and an ending
//! - `TestHarness` for scripted reading sessions with a controllable clock
//! - Assertion helpers for verifying spread state

use crate::asset::{AssetRecord, CacheKey, ImagePayload};
use crate::cache::{CacheConfig, GenerationCache};
use crate::character::Character;
use crate::generator::{GenerationRequest, GeneratorError, GeneratorOutput, ImageGenerator};
use crate::navigator::{NavigatorConfig, Phase, SpreadFrame, Transition};
use crate::session::{Illustrator, Intent, ReadingSession};
use crate::store::{AssetStore, MemoryStore, StoreError};
use crate::story::{
    BlockedTransition, Choice, PairedScene, PrefetchTrigger, Scene, SourceMatcher, Story,
    StoryMeta, StoryRules,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A generator that returns scripted results.
///
/// Scenes without a script get a small inline PNG-typed payload.
#[derive(Debug, Default)]
pub struct MockGenerator {
    scripted: HashMap<String, Result<GeneratorOutput, GeneratorError>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the result for one scene.
    pub fn with_result(
        mut self,
        scene_id: impl Into<String>,
        result: Result<GeneratorOutput, GeneratorError>,
    ) -> Self {
        self.scripted.insert(scene_id.into(), result);
        self
    }

    /// Sleep before answering, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Scene ids requested so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The payload returned for unscripted scenes.
    pub fn default_payload(scene_id: &str) -> ImagePayload {
        ImagePayload::inline("image/png", format!("bW9jay1{scene_id}"))
    }
}

#[async_trait]
impl ImageGenerator for MockGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratorOutput, GeneratorError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.scene_id.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.scripted.get(&request.scene_id) {
            Some(result) => result.clone(),
            None => Ok(GeneratorOutput::Image(Self::default_payload(
                &request.scene_id,
            ))),
        }
    }
}

/// A store whose writes always fail.
#[derive(Debug, Default)]
pub struct FailingStore {
    fail_reads: bool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail reads as well as writes.
    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }
}

#[async_trait]
impl AssetStore for FailingStore {
    async fn get(&self, _key: &CacheKey) -> Result<Option<AssetRecord>, StoreError> {
        if self.fail_reads {
            Err(StoreError::Unavailable("read refused".to_string()))
        } else {
            Ok(None)
        }
    }

    async fn put(&self, _key: &CacheKey, _record: &AssetRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk full".to_string()))
    }
}

/// A small story exercising every navigation rule.
///
/// Spreads, by starting index:
/// - 0: `1a` (authored art) / `1b`
/// - 2: `1c` / `1d` (forest or river; prefetches `2a 2b 4a 4b`)
/// - 4: `2a` (tower or cellar) / `2b` (follow the river or rest)
/// - 6: `3a1` paired with `3b1` (`4a` is locked from any `3*` scene)
/// - 8: `3a2` paired with `3b2` (`3a1` and `3a2` exclude each other)
/// - 10: `4a` / `4b`
/// - 12: `coda` / `end` (terminal, no art)
pub fn sample_story() -> Story {
    let scenes = vec![
        Scene::new("1a", "The lamplighter's child wakes to find every lamp in town dark.")
            .with_setting("a cobbled street before dawn")
            .with_authored_image("/images/1a.png"),
        Scene::new("1b", "A moth the size of a hand lands on the windowsill and waits.")
            .with_setting("a bedroom window"),
        Scene::new("1c", "The moth leads the way to the edge of town.")
            .with_setting("the town gate"),
        Scene::new("1d", "Two paths: one into the forest, one along the river.")
            .with_setting("a fork in the road")
            .with_choice(Choice::new("forest", "Into the forest", "2a").setting("took_forest", true))
            .with_choice(Choice::new("river", "Along the river", "2b").setting("took_river", true)),
        Scene::new("2a", "An old tower leans over a cellar door.")
            .with_setting("a forest clearing")
            .with_choice(Choice::new("tower", "Climb the tower", "3a1"))
            .with_choice(Choice::new("cellar", "Open the cellar", "3a2")),
        Scene::new("2b", "The river hums a tune the moth seems to know.")
            .with_setting("a riverbank")
            .with_choice(Choice::new("follow", "Follow the river", "4a"))
            .with_choice(Choice::new("rest", "Rest by the water", "4b")),
        Scene::new("3a1", "From the top of the tower the whole valley glows.")
            .with_setting("a tower top")
            .with_branch("tower"),
        Scene::new("3b1", "A rope ladder hangs down toward the river.")
            .with_setting("the tower's far side")
            .with_branch("tower")
            .with_choice(Choice::new("ladder", "Climb down to the river", "4a"))
            .with_choice(Choice::new("stairs", "Take the stairs home", "4b")),
        Scene::new("3a2", "The cellar is full of jars of sleeping light.")
            .with_setting("a cellar")
            .with_branch("cellar"),
        Scene::new("3b2", "One jar is already open.")
            .with_setting("a cellar")
            .with_branch("cellar")
            .with_choice(Choice::new("jar", "Carry the jar home", "4b").setting("has_jar", true)),
        Scene::new("4a", "The river ends in a lake of reflected stars.")
            .with_setting("a starlit lake")
            .with_choice(Choice::new("onward", "Head home", "coda")),
        Scene::new("4b", "The way home is shorter than you remember.")
            .with_setting("the road home")
            .with_choice(Choice::new("onward", "Keep walking", "coda"))
            .with_choice(
                Choice::new("shortcut", "Release the light", "end").requiring("has_jar", true),
            ),
        Scene::new("coda", "One by one, the lamps flicker back to life.")
            .with_setting("the town square at dawn")
            .with_choice(Choice::new("finish", "Go to sleep", "end")),
        Scene::new("end", "The end.").terminal().no_generation(),
    ];

    let rules = StoryRules {
        mutually_exclusive: vec![["3a1".to_string(), "3a2".to_string()].into()],
        blocked_transitions: vec![BlockedTransition {
            target: "4a".to_string(),
            from: SourceMatcher::IdPrefix("3".to_string()),
        }],
        paired_scenes: vec![
            PairedScene {
                scene: "3a1".to_string(),
                partner: "3b1".to_string(),
            },
            PairedScene {
                scene: "3a2".to_string(),
                partner: "3b2".to_string(),
            },
        ],
        prefetch: vec![PrefetchTrigger {
            on: "1d".to_string(),
            scenes: ["2a", "2b", "4a", "4b"].map(String::from).to_vec(),
        }],
    };

    let meta = StoryMeta {
        version: 1,
        title: "The Lamplighter's Moth".to_string(),
    };

    match Story::new(meta, "1a", scenes, rules) {
        Ok(story) => story,
        Err(e) => panic!("sample story is invalid: {e}"),
    }
}

/// Test harness for scripted reading sessions.
///
/// The clock only moves when the test calls [`TestHarness::wait`].
pub struct TestHarness {
    pub session: ReadingSession,
    pub generator: Arc<MockGenerator>,
    pub cache: GenerationCache,
    pub character: Character,
    pub now: Instant,
}

impl TestHarness {
    /// A harness over [`sample_story`] with an in-memory cache.
    pub fn new() -> Self {
        Self::with_story(sample_story())
    }

    pub fn with_story(story: Story) -> Self {
        Self::with_parts(story, MockGenerator::new(), Arc::new(MemoryStore::new()))
    }

    pub fn with_parts(story: Story, generator: MockGenerator, store: Arc<dyn AssetStore>) -> Self {
        let story = Arc::new(story);
        let generator = Arc::new(generator);
        let cache = GenerationCache::new(
            Arc::clone(&story),
            store,
            generator.clone(),
            CacheConfig::default(),
        );
        let character = Character::new("Wren")
            .with_trait("hair", "short and silver")
            .with_trait("coat", "patched yellow raincoat")
            .with_personality("brave");
        let now = Instant::now();
        let session = ReadingSession::new(story, NavigatorConfig::default(), now)
            .with_illustrator(Illustrator::new(cache.clone(), character.clone()));

        Self {
            session,
            generator,
            cache,
            character,
            now,
        }
    }

    pub fn advance(&mut self) -> Transition {
        self.session.apply(Intent::Advance, self.now)
    }

    pub fn retreat(&mut self) -> Transition {
        self.session.apply(Intent::Retreat, self.now)
    }

    pub fn choose(&mut self, target: &str) -> Transition {
        self.session
            .apply(Intent::ChooseTarget(target.to_string()), self.now)
    }

    pub fn restart(&mut self) -> Transition {
        self.session.apply(Intent::Restart, self.now)
    }

    /// Move the clock forward and apply due reveals.
    pub fn wait(&mut self, duration: Duration) {
        self.now += duration;
        self.session.tick(self.now);
    }

    pub fn frame(&self) -> SpreadFrame<'_> {
        self.session.frame(self.now)
    }

    pub fn left_id(&self) -> Option<&str> {
        self.frame().left.map(|scene| scene.id.as_str())
    }

    pub fn right_id(&self) -> Option<&str> {
        self.frame().right.map(|scene| scene.id.as_str())
    }

    /// Current advisory text, if any.
    pub fn advisory(&self) -> Option<String> {
        self.frame().advisory.map(|a| a.message)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Assert the spread starts at `index` and is in `phase`.
#[track_caller]
pub fn assert_spread(harness: &TestHarness, index: usize, phase: Phase) {
    let state = harness.session.spread();
    assert_eq!(
        (state.index, state.phase),
        (index, phase),
        "unexpected spread position"
    );
}

/// Assert both pages are fully shown.
#[track_caller]
pub fn assert_fully_revealed(harness: &TestHarness) {
    let frame = harness.frame();
    assert_eq!(frame.phase, Phase::FullSpread);
    assert!(frame.left_revealed, "left page hidden");
    assert!(frame.right_revealed, "right page hidden");
}
