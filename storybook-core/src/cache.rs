//! The generation cache: scene id in, displayable illustration out.
//!
//! Every key is generated at most once. A stored record is always returned
//! as-is; only [`GenerationCache::regenerate`] overwrites one. Concurrent
//! requests for the same key share a single in-flight run, and that run lives
//! on its own task so a caller giving up does not cancel it.
//!
//! Failures never surface as errors to the reader. They become records with an
//! `error:<reason>` status over the placeholder image, which are cached like
//! any other outcome.

use crate::asset::{AssetRecord, AssetStatus, CacheKey, ImagePayload};
use crate::character::Character;
use crate::generator::{GenerationRequest, GeneratorOutput, ImageGenerator, DEFAULT_STYLE};
use crate::payload::detect_image;
use crate::story::{Scene, Story};
use crate::store::AssetStore;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors from cache requests.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Unknown scene: {0}")]
    UnknownScene(String),
}

/// Generation cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Style directive appended to every prompt.
    pub style: String,
    /// Key records by scene and character fingerprint instead of scene alone.
    pub per_character_art: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            style: DEFAULT_STYLE.to_string(),
            per_character_art: false,
        }
    }
}

impl CacheConfig {
    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    pub fn with_per_character_art(mut self, enabled: bool) -> Self {
        self.per_character_art = enabled;
        self
    }
}

type SharedRecord = Shared<BoxFuture<'static, AssetRecord>>;

/// A generation run that callers can join.
struct InFlight {
    id: u64,
    record: SharedRecord,
}

struct CacheInner {
    story: Arc<Story>,
    store: Arc<dyn AssetStore>,
    generator: Arc<dyn ImageGenerator>,
    config: CacheConfig,
    pending: Mutex<HashMap<CacheKey, InFlight>>,
    next_run: AtomicU64,
}

/// Shared, cloneable handle to the generation cache.
#[derive(Clone)]
pub struct GenerationCache {
    inner: Arc<CacheInner>,
}

impl GenerationCache {
    pub fn new(
        story: Arc<Story>,
        store: Arc<dyn AssetStore>,
        generator: Arc<dyn ImageGenerator>,
        config: CacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                story,
                store,
                generator,
                config,
                pending: Mutex::new(HashMap::new()),
                next_run: AtomicU64::new(0),
            }),
        }
    }

    pub fn story(&self) -> &Arc<Story> {
        &self.inner.story
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The store key for a scene illustrated for `character`.
    pub fn key_for(&self, scene_id: &str, character: &Character) -> CacheKey {
        if self.inner.config.per_character_art {
            CacheKey::for_character(scene_id, character.fingerprint())
        } else {
            CacheKey::scene(scene_id)
        }
    }

    /// The stored record for a scene, without generating anything.
    pub async fn cached(
        &self,
        scene_id: &str,
        character: &Character,
    ) -> Result<Option<AssetRecord>, CacheError> {
        self.scene(scene_id)?;
        Ok(self.inner.lookup(&self.key_for(scene_id, character)).await)
    }

    /// Return the stored record for a scene, generating it on first request.
    pub async fn get_or_generate(
        &self,
        scene_id: &str,
        character: &Character,
    ) -> Result<AssetRecord, CacheError> {
        let scene = self.scene(scene_id)?;
        let key = self.key_for(scene_id, character);

        if let Some(record) = self.inner.lookup(&key).await {
            return Ok(record);
        }

        let run = {
            let mut pending = self.inner.pending.lock().await;
            match pending.get(&key) {
                Some(run) => {
                    debug!(key = %key, "Joining in-flight generation");
                    run.record.clone()
                }
                None => self.start_run(&mut pending, key, scene.clone(), character.clone(), false),
            }
        };

        Ok(run.await)
    }

    /// Generate a scene again and overwrite its stored record.
    ///
    /// Waits for any run already in flight on the key before starting.
    pub async fn regenerate(
        &self,
        scene_id: &str,
        character: &Character,
    ) -> Result<AssetRecord, CacheError> {
        let scene = self.scene(scene_id)?;
        let key = self.key_for(scene_id, character);

        let run = loop {
            let current = {
                let mut pending = self.inner.pending.lock().await;
                match pending.get(&key) {
                    Some(run) => run.record.clone(),
                    None => {
                        break self.start_run(
                            &mut pending,
                            key.clone(),
                            scene.clone(),
                            character.clone(),
                            true,
                        )
                    }
                }
            };
            current.await;
        };

        Ok(run.await)
    }

    /// Number of generation runs currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    fn scene(&self, scene_id: &str) -> Result<&Scene, CacheError> {
        self.inner
            .story
            .scene(scene_id)
            .ok_or_else(|| CacheError::UnknownScene(scene_id.to_string()))
    }

    /// Spawn a run and register it. The caller holds the pending lock.
    fn start_run(
        &self,
        pending: &mut HashMap<CacheKey, InFlight>,
        key: CacheKey,
        scene: Scene,
        character: Character,
        force: bool,
    ) -> SharedRecord {
        let id = self.inner.next_run.fetch_add(1, Ordering::Relaxed);
        let scene_id = scene.id.clone();

        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let record = inner.resolve(&task_key, &scene, &character, force).await;
            inner.finish(&task_key, id).await;
            record
        });

        let inner = Arc::clone(&self.inner);
        let join_key = key.clone();
        let record = async move {
            match handle.await {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %join_key, error = %e, "Generation task failed");
                    inner.finish(&join_key, id).await;
                    AssetRecord::failed(scene_id, "generation-task-failed")
                }
            }
        }
        .boxed()
        .shared();

        pending.insert(
            key,
            InFlight {
                id,
                record: record.clone(),
            },
        );
        record
    }
}

impl CacheInner {
    /// Read the store, treating read failures as a miss.
    async fn lookup(&self, key: &CacheKey) -> Option<AssetRecord> {
        match self.store.get(key).await {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Drop the pending entry for a finished run, unless a newer run owns it.
    async fn finish(&self, key: &CacheKey, id: u64) {
        let mut pending = self.pending.lock().await;
        if pending.get(key).is_some_and(|run| run.id == id) {
            pending.remove(key);
        }
    }

    async fn resolve(
        &self,
        key: &CacheKey,
        scene: &Scene,
        character: &Character,
        force: bool,
    ) -> AssetRecord {
        if !force {
            if let Some(record) = self.lookup(key).await {
                debug!(key = %key, "Cache hit");
                return record;
            }
        }

        let record = self.produce(scene, character).await;

        match self.store.put(key, &record).await {
            Ok(()) => {
                info!(key = %key, status = %record.status, "Stored illustration");
                record
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to persist illustration");
                AssetRecord {
                    note: format!("failed-to-write:{e}"),
                    ..record
                }
            }
        }
    }

    async fn produce(&self, scene: &Scene, character: &Character) -> AssetRecord {
        if !scene.needs_generation {
            return match scene.authored_image() {
                Some(url) => AssetRecord::new(
                    &scene.id,
                    AssetStatus::CachedOnDisk,
                    ImagePayload::reference(url),
                    "skipped-no-generation-required",
                ),
                None => AssetRecord::new(
                    &scene.id,
                    AssetStatus::Placeholder,
                    ImagePayload::placeholder(),
                    "skipped-no-authored-image",
                ),
            };
        }

        let request = GenerationRequest::for_scene(scene, character, &self.config.style);
        debug!(scene_id = %scene.id, "Generating illustration");

        match self.generator.generate(request).await {
            Ok(GeneratorOutput::Image(payload)) => {
                AssetRecord::new(&scene.id, AssetStatus::Generated, payload, "generated-image-part")
            }
            Ok(GeneratorOutput::Text(text)) => {
                let detection = detect_image(&text);
                let note = detection.note();
                match detection.into_payload() {
                    Some(payload) => {
                        AssetRecord::new(&scene.id, AssetStatus::Generated, payload, note)
                    }
                    None => {
                        warn!(scene_id = %scene.id, "Generator returned text without an image");
                        AssetRecord::failed(&scene.id, "unrecognized-output")
                    }
                }
            }
            Err(e) => {
                warn!(scene_id = %scene.id, error = %e, "Generation failed");
                AssetRecord::failed(&scene.id, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GeneratorError;
    use crate::store::MemoryStore;
    use crate::testing::{sample_story, FailingStore, MockGenerator};

    fn cache_with(
        generator: MockGenerator,
        store: Arc<dyn AssetStore>,
    ) -> (GenerationCache, Arc<MockGenerator>) {
        let generator = Arc::new(generator);
        let cache = GenerationCache::new(
            Arc::new(sample_story()),
            store,
            generator.clone(),
            CacheConfig::default(),
        );
        (cache, generator)
    }

    #[tokio::test]
    async fn test_second_request_hits_cache() {
        let (cache, generator) = cache_with(MockGenerator::new(), Arc::new(MemoryStore::new()));
        let hero = Character::new("Ada");

        let first = cache.get_or_generate("2a", &hero).await.unwrap();
        let second = cache.get_or_generate("2a", &hero).await.unwrap();

        assert_eq!(first.status, AssetStatus::Generated);
        assert_eq!(first, second);
        assert_eq!(generator.call_count(), 1);
        assert_eq!(cache.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_authored_scene_skips_generator() {
        let (cache, generator) = cache_with(MockGenerator::new(), Arc::new(MemoryStore::new()));

        let record = cache.get_or_generate("1a", &Character::new("Ada")).await.unwrap();

        assert_eq!(record.status, AssetStatus::CachedOnDisk);
        assert!(matches!(record.payload, ImagePayload::Reference { .. }));
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_generator_error_is_cached_as_error_record() {
        let generator = MockGenerator::new()
            .with_result("2b", Err(GeneratorError::Network("connection reset".into())));
        let (cache, generator) = cache_with(generator, Arc::new(MemoryStore::new()));
        let hero = Character::new("Ada");

        let record = cache.get_or_generate("2b", &hero).await.unwrap();
        assert!(record.is_error());
        assert!(record.payload.is_placeholder());

        cache.get_or_generate("2b", &hero).await.unwrap();
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_text_output_is_parsed() {
        let generator = MockGenerator::new()
            .with_result("2a", Ok(GeneratorOutput::Text("data:image/webp;base64,UklGRgAA".into())))
            .with_result("2b", Ok(GeneratorOutput::Text("A lovely scene, sadly in words.".into())));
        let (cache, _) = cache_with(generator, Arc::new(MemoryStore::new()));
        let hero = Character::new("Ada");

        let parsed = cache.get_or_generate("2a", &hero).await.unwrap();
        assert_eq!(parsed.status, AssetStatus::Generated);
        assert_eq!(parsed.payload, ImagePayload::inline("image/webp", "UklGRgAA"));
        assert_eq!(parsed.note, "generated-inline");

        let prose = cache.get_or_generate("2b", &hero).await.unwrap();
        assert_eq!(prose.status, AssetStatus::Error("unrecognized-output".into()));
    }

    #[tokio::test]
    async fn test_unknown_scene() {
        let (cache, _) = cache_with(MockGenerator::new(), Arc::new(MemoryStore::new()));
        let err = cache.get_or_generate("zz", &Character::new("Ada")).await.unwrap_err();
        assert_eq!(err, CacheError::UnknownScene("zz".into()));
    }

    #[tokio::test]
    async fn test_write_failure_is_not_cached() {
        let (cache, generator) = cache_with(MockGenerator::new(), Arc::new(FailingStore::new()));
        let hero = Character::new("Ada");

        let record = cache.get_or_generate("2a", &hero).await.unwrap();
        assert_eq!(record.status, AssetStatus::Generated);
        assert!(record.note.starts_with("failed-to-write:"));

        cache.get_or_generate("2a", &hero).await.unwrap();
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_regenerate_overwrites() {
        let (cache, generator) = cache_with(MockGenerator::new(), Arc::new(MemoryStore::new()));
        let hero = Character::new("Ada");

        cache.get_or_generate("2a", &hero).await.unwrap();
        cache.regenerate("2a", &hero).await.unwrap();

        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_per_character_keys() {
        let generator = Arc::new(MockGenerator::new());
        let cache = GenerationCache::new(
            Arc::new(sample_story()),
            Arc::new(MemoryStore::new()),
            generator.clone(),
            CacheConfig::default().with_per_character_art(true),
        );

        cache.get_or_generate("2a", &Character::new("Ada")).await.unwrap();
        cache.get_or_generate("2a", &Character::new("Bo")).await.unwrap();
        assert_eq!(generator.call_count(), 2);

        let cached = cache.cached("2a", &Character::new("Ada")).await.unwrap();
        assert!(cached.is_some());
        assert!(cache.cached("2b", &Character::new("Ada")).await.unwrap().is_none());
    }
}
