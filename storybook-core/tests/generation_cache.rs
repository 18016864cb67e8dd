//! Generation cache behavior across stores and concurrent readers.
//!
//! Covers:
//! - Authored scenes that never reach the generator
//! - Error records that stick until regenerated
//! - One generation per key under concurrent requests
//! - File-backed persistence across cache rebuilds
//! - Degraded stores

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use storybook_core::story::{Choice, Scene, Story, StoryMeta, StoryRules};
use storybook_core::testing::{sample_story, FailingStore, MockGenerator};
use storybook_core::{
    AssetStatus, AssetStore, CacheConfig, Character, FileStore, GeminiGenerator,
    GenerationCache, GeneratorError, ImagePayload, MemoryStore,
};
use tempfile::TempDir;

fn small_story() -> Arc<Story> {
    let scenes = vec![
        Scene::new("s0", "A gate.").with_choice(Choice::new("in", "Go in", "s2")),
        Scene::new("s1", "A painted sign.").with_authored_image("/art/s1.png"),
        Scene::new("s2", "A garden."),
    ];
    let meta = StoryMeta {
        version: 1,
        title: "Garden".to_string(),
    };
    Arc::new(Story::new(meta, "s0", scenes, StoryRules::default()).unwrap())
}

fn cache_over(
    story: Arc<Story>,
    generator: MockGenerator,
    store: Arc<dyn AssetStore>,
) -> (GenerationCache, Arc<MockGenerator>) {
    let generator = Arc::new(generator);
    let cache = GenerationCache::new(story, store, generator.clone(), CacheConfig::default());
    (cache, generator)
}

fn reader() -> Character {
    Character::new("Wren").with_trait("coat", "yellow raincoat")
}

// ============================================================================
// Skipped and failed generation
// ============================================================================

#[tokio::test]
async fn test_authored_scene_is_served_without_generating() {
    let (cache, generator) = cache_over(
        small_story(),
        MockGenerator::new(),
        Arc::new(MemoryStore::new()),
    );

    let record = cache.get_or_generate("s1", &reader()).await.unwrap();

    assert_eq!(record.status, AssetStatus::CachedOnDisk);
    assert_eq!(record.payload, ImagePayload::reference("/art/s1.png"));
    assert_eq!(record.note, "skipped-no-generation-required");
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn test_network_error_sticks_until_regenerated() {
    let generator = MockGenerator::new()
        .with_result("s2", Err(GeneratorError::Network("connection reset".into())));
    let (cache, generator) = cache_over(small_story(), generator, Arc::new(MemoryStore::new()));

    let first = cache.get_or_generate("s2", &reader()).await.unwrap();
    assert!(first.status.to_string().starts_with("error:"));
    assert!(first.payload.is_placeholder());

    let second = cache.get_or_generate("s2", &reader()).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(generator.call_count(), 1);

    // Only an explicit retry calls out again
    let retried = cache.regenerate("s2", &reader()).await.unwrap();
    assert!(retried.is_error());
    assert_eq!(generator.call_count(), 2);
}

#[tokio::test]
async fn test_missing_credential_becomes_error_record() {
    let store = Arc::new(MemoryStore::new());
    let cache = GenerationCache::new(
        small_story(),
        store.clone(),
        Arc::new(GeminiGenerator::unconfigured()),
        CacheConfig::default(),
    );

    let record = cache.get_or_generate("s2", &reader()).await.unwrap();

    assert_eq!(record.status, AssetStatus::Error("missing credential".into()));
    assert_eq!(store.len().await, 1);
}

// ============================================================================
// Coalescing
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_generation() {
    let (cache, generator) = cache_over(
        Arc::new(sample_story()),
        MockGenerator::new().with_delay(Duration::from_millis(50)),
        Arc::new(MemoryStore::new()),
    );

    let requests = (0..8).map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_or_generate("2a", &reader()).await })
    });
    let records: Vec<_> = join_all(requests)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(generator.calls(), vec!["2a"]);
    assert!(records.iter().all(|r| *r == records[0]));
    assert_eq!(records[0].status, AssetStatus::Generated);
    assert_eq!(cache.in_flight().await, 0);
}

#[tokio::test]
async fn test_abandoned_request_still_populates_cache() {
    let (cache, generator) = cache_over(
        Arc::new(sample_story()),
        MockGenerator::new().with_delay(Duration::from_millis(40)),
        Arc::new(MemoryStore::new()),
    );

    let gave_up = tokio::time::timeout(
        Duration::from_millis(5),
        cache.get_or_generate("2b", &reader()),
    )
    .await;
    assert!(gave_up.is_err());

    tokio::time::sleep(Duration::from_millis(150)).await;
    let stored = cache.cached("2b", &reader()).await.unwrap();
    assert!(stored.is_some());
    assert_eq!(generator.call_count(), 1);
}

// ============================================================================
// Stores
// ============================================================================

#[tokio::test]
async fn test_file_store_survives_cache_rebuild() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let story = Arc::new(sample_story());

    let (first_cache, first_generator) = cache_over(
        Arc::clone(&story),
        MockGenerator::new(),
        Arc::new(FileStore::open(dir.path()).await.unwrap()),
    );
    let original = first_cache.get_or_generate("4a", &reader()).await.unwrap();
    assert_eq!(first_generator.call_count(), 1);
    drop(first_cache);

    let (second_cache, second_generator) = cache_over(
        story,
        MockGenerator::new(),
        Arc::new(FileStore::open(dir.path()).await.unwrap()),
    );
    let reloaded = second_cache.get_or_generate("4a", &reader()).await.unwrap();

    assert_eq!(reloaded, original);
    assert_eq!(second_generator.call_count(), 0);
}

#[tokio::test]
async fn test_lookalike_scene_ids_get_their_own_art() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let scenes = vec![
        Scene::new("a.b", "A dotted door."),
        Scene::new("a_b", "An underlined door."),
    ];
    let story = Story::new(
        StoryMeta {
            version: 1,
            title: "Doors".to_string(),
        },
        "a.b",
        scenes,
        StoryRules::default(),
    )
    .unwrap();
    let (cache, generator) = cache_over(
        Arc::new(story),
        MockGenerator::new(),
        Arc::new(FileStore::open(dir.path()).await.unwrap()),
    );

    let dotted = cache.get_or_generate("a.b", &reader()).await.unwrap();
    let underlined = cache.get_or_generate("a_b", &reader()).await.unwrap();

    assert_eq!(dotted.scene_id, "a.b");
    assert_eq!(underlined.scene_id, "a_b");
    assert_eq!(generator.calls(), vec!["a.b", "a_b"]);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[tokio::test]
async fn test_unreadable_store_degrades_to_generation() {
    let (cache, generator) = cache_over(
        Arc::new(sample_story()),
        MockGenerator::new(),
        Arc::new(FailingStore::new().failing_reads()),
    );

    let record = cache.get_or_generate("2a", &reader()).await.unwrap();
    assert_eq!(record.status, AssetStatus::Generated);
    assert!(record.note.starts_with("failed-to-write:"));
    assert_eq!(cache.cached("2a", &reader()).await.unwrap(), None);

    cache.get_or_generate("2a", &reader()).await.unwrap();
    assert_eq!(generator.call_count(), 2);
}

#[tokio::test]
async fn test_per_character_art_in_file_store() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let generator = Arc::new(MockGenerator::new());
    let cache = GenerationCache::new(
        Arc::new(sample_story()),
        Arc::new(FileStore::open(dir.path()).await.unwrap()),
        generator.clone(),
        CacheConfig::default().with_per_character_art(true),
    );
    let wren = reader();
    let moss = Character::new("Moss").with_trait("coat", "green cloak");

    cache.get_or_generate("2a", &wren).await.unwrap();
    cache.get_or_generate("2a", &moss).await.unwrap();
    cache.get_or_generate("2a", &wren).await.unwrap();

    assert_eq!(generator.call_count(), 2);
    let files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 2);
}
