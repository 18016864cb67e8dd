//! Sequential background illustration of upcoming scenes.

use crate::asset::AssetRecord;
use crate::cache::GenerationCache;
use crate::character::Character;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Progress for one scene of a prefetch batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchProgress {
    pub scene_id: String,
    /// Zero-based position in the batch.
    pub position: usize,
    pub total: usize,
    /// Whether the record was already stored.
    pub was_cached: bool,
    pub record: AssetRecord,
}

/// Summary of a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    pub already_cached: usize,
    pub generated: usize,
    pub failed: usize,
}

impl PrefetchReport {
    pub fn total(&self) -> usize {
        self.already_cached + self.generated + self.failed
    }
}

/// Illustrate `scene_ids` one after another.
///
/// Scenes already in the cache are reported without calling the generator.
/// A failing scene is reported as an error record and the batch moves on.
/// `on_progress` is called exactly once per id, in order.
pub async fn prefetch<F>(
    cache: &GenerationCache,
    scene_ids: &[String],
    character: &Character,
    mut on_progress: F,
) -> PrefetchReport
where
    F: FnMut(PrefetchProgress),
{
    let total = scene_ids.len();
    let mut report = PrefetchReport::default();
    info!(total, "Prefetching illustrations");

    for (position, scene_id) in scene_ids.iter().enumerate() {
        let cached = match cache.cached(scene_id, character).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(scene_id = %scene_id, error = %e, "Skipping prefetch");
                None
            }
        };

        let (record, was_cached) = match cached {
            Some(record) => {
                report.already_cached += 1;
                (record, true)
            }
            None => {
                let record = match cache.get_or_generate(scene_id, character).await {
                    Ok(record) => record,
                    Err(e) => AssetRecord::failed(scene_id.as_str(), e.to_string()),
                };
                if record.is_error() {
                    report.failed += 1;
                } else {
                    report.generated += 1;
                }
                (record, false)
            }
        };

        debug!(scene_id = %scene_id, position, status = %record.status, "Prefetched");
        on_progress(PrefetchProgress {
            scene_id: scene_id.clone(),
            position,
            total,
            was_cached,
            record,
        });
    }

    info!(
        cached = report.already_cached,
        generated = report.generated,
        failed = report.failed,
        "Prefetch complete"
    );
    report
}

/// Run [`prefetch`] on its own task, detached from the caller.
pub fn spawn_prefetch(
    cache: GenerationCache,
    scene_ids: Vec<String>,
    character: Character,
) -> JoinHandle<PrefetchReport> {
    tokio::spawn(async move { prefetch(&cache, &scene_ids, &character, |_| {}).await })
}
