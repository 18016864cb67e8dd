//! Reading sessions.
//!
//! A [`ReadingSession`] is the main entry point for a reader. It owns
//! everything that belongs to one playthrough:
//! - the flag store and the visited set ([`SessionState`])
//! - the spread navigator
//! - optionally an [`Illustrator`] that fetches page art and fires the
//!   story's prefetch triggers in the background
//!
//! Sessions share nothing mutable with each other. The story and the
//! generation cache are shared read-only or through their own locking.

use crate::asset::AssetRecord;
use crate::cache::GenerationCache;
use crate::character::Character;
use crate::flags::FlagStore;
use crate::navigator::{Navigator, NavigatorConfig, Page, Phase, SpreadFrame, SpreadState, Transition};
use crate::prefetch::{spawn_prefetch, PrefetchReport};
use crate::story::{Scene, Story};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Current bookmark file version.
const BOOKMARK_VERSION: u32 = 1;

/// Errors from saving or resuming a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Bookmark belongs to story {found:?}, not {expected:?}")]
    StoryMismatch { expected: String, found: String },

    #[error("Bookmark points past the end of the story: {0}")]
    InvalidBookmark(usize),
}

/// Scenes entered through explicit choices in this session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitedSet {
    scenes: BTreeSet<String>,
}

impl VisitedSet {
    pub fn contains(&self, scene_id: &str) -> bool {
        self.scenes.contains(scene_id)
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.scenes.iter().map(String::as_str)
    }

    /// Only the navigator records visits.
    pub(crate) fn insert(&mut self, scene_id: &str) {
        self.scenes.insert(scene_id.to_string());
    }
}

/// Per-playthrough state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    id: Uuid,
    flags: FlagStore,
    visited: VisitedSet,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// A fresh playthrough with no flags and nothing visited.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            flags: FlagStore::new(),
            visited: VisitedSet::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn flags(&self) -> &FlagStore {
        &self.flags
    }

    pub fn visited(&self) -> &VisitedSet {
        &self.visited
    }
}

/// A reader's request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Advance,
    Retreat,
    /// Follow the visible choice leading to a scene.
    ChooseTarget(String),
    /// Back to the start, keeping flags and visited scenes.
    Restart,
}

/// Illustrates pages for one character.
#[derive(Clone)]
pub struct Illustrator {
    pub cache: GenerationCache,
    pub character: Character,
}

impl Illustrator {
    pub fn new(cache: GenerationCache, character: Character) -> Self {
        Self { cache, character }
    }
}

/// The image to show on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub page: Page,
    pub scene_id: String,
    /// Something the UI can load: a data URI, URL or asset path.
    pub src: String,
    pub record: Option<AssetRecord>,
}

/// Pick the image for a page: generated art, then the page's authored image,
/// then the conventional per-scene asset path.
pub fn page_image_src(scene: &Scene, page: Page, record: Option<&AssetRecord>) -> String {
    if let Some(record) = record.filter(|r| !r.is_error() && !r.payload.is_placeholder()) {
        return record.payload.display_src();
    }
    let authored = match page {
        Page::Left => scene.image_left.as_deref(),
        Page::Right => scene.image_right.as_deref(),
    };
    match authored.filter(|s| !s.is_empty()) {
        Some(src) => src.to_string(),
        None => format!("/charassets/{}.png", scene.id),
    }
}

/// On-disk form of a saved session.
#[derive(Debug, Serialize, Deserialize)]
struct Bookmark {
    version: u32,
    story_title: String,
    index: usize,
    #[serde(default)]
    phase: Phase,
    state: SessionState,
}

/// One reader working through a story.
pub struct ReadingSession {
    story: Arc<Story>,
    state: SessionState,
    navigator: Navigator,
    illustrator: Option<Illustrator>,
    fired_triggers: HashSet<String>,
    background: Vec<JoinHandle<PrefetchReport>>,
}

impl ReadingSession {
    /// Start reading `story` from its start scene.
    pub fn new(story: Arc<Story>, config: NavigatorConfig, now: Instant) -> Self {
        let navigator = Navigator::new(&story, config, now);
        let state = SessionState::new();
        info!(session = %state.id, title = %story.title(), "Started reading session");
        Self {
            story,
            state,
            navigator,
            illustrator: None,
            fired_triggers: HashSet::new(),
            background: Vec::new(),
        }
    }

    /// Attach an illustrator for page art and background prefetching.
    pub fn with_illustrator(mut self, illustrator: Illustrator) -> Self {
        self.illustrator = Some(illustrator);
        self.fire_prefetch_triggers();
        self
    }

    pub fn id(&self) -> Uuid {
        self.state.id
    }

    pub fn story(&self) -> &Arc<Story> {
        &self.story
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn flags(&self) -> &FlagStore {
        &self.state.flags
    }

    pub fn visited(&self) -> &VisitedSet {
        &self.state.visited
    }

    pub fn spread(&self) -> &SpreadState {
        self.navigator.state()
    }

    pub fn navigator_config(&self) -> &NavigatorConfig {
        self.navigator.config()
    }

    pub fn illustrator(&self) -> Option<&Illustrator> {
        self.illustrator.as_ref()
    }

    /// Handle a reader intent.
    pub fn apply(&mut self, intent: Intent, now: Instant) -> Transition {
        let story = Arc::clone(&self.story);
        let transition = match &intent {
            Intent::Advance => self.navigator.advance(&story, &self.state.flags, now),
            Intent::Retreat => self.navigator.retreat(&story, now),
            Intent::ChooseTarget(target) => self.navigator.choose_target(
                &story,
                &mut self.state.flags,
                &mut self.state.visited,
                target,
                now,
            ),
            Intent::Restart => self.navigator.restart(&story, now),
        };

        debug!(
            session = %self.state.id,
            ?intent,
            ?transition,
            index = self.navigator.state().index,
            "Applied intent"
        );

        if !transition.is_blocked() {
            self.fire_prefetch_triggers();
        }
        transition
    }

    /// Start over with fresh flags and an empty visited set.
    pub fn replay(&mut self, now: Instant) {
        let previous = self.state.id;
        self.state = SessionState::new();
        self.navigator = Navigator::new(&self.story, self.navigator.config().clone(), now);
        self.fired_triggers.clear();
        self.background.retain(|handle| !handle.is_finished());
        info!(session = %self.state.id, %previous, "Replaying story");
        self.fire_prefetch_triggers();
    }

    /// Apply reveals that are due.
    pub fn tick(&mut self, now: Instant) {
        self.navigator.tick(now);
    }

    pub fn frame(&self, now: Instant) -> SpreadFrame<'_> {
        self.navigator.frame(&self.story, &self.state.flags, now)
    }

    /// Images for the visible pages, generating them if needed.
    ///
    /// Without an illustrator only authored images and asset paths are used.
    pub async fn illustrate_visible(&self) -> Vec<PageImage> {
        let (left, right) = self.navigator.spread(&self.story);
        let right = right.filter(|_| self.navigator.state().phase == Phase::FullSpread);
        let pages = left
            .map(|scene| (Page::Left, scene))
            .into_iter()
            .chain(right.map(|scene| (Page::Right, scene)));

        let mut images = Vec::new();
        for (page, scene) in pages {
            let record = match &self.illustrator {
                Some(illustrator) => {
                    match illustrator
                        .cache
                        .get_or_generate(&scene.id, &illustrator.character)
                        .await
                    {
                        Ok(record) => Some(record),
                        Err(e) => {
                            warn!(scene_id = %scene.id, error = %e, "Could not illustrate page");
                            None
                        }
                    }
                }
                None => None,
            };
            images.push(PageImage {
                page,
                scene_id: scene.id.clone(),
                src: page_image_src(scene, page, record.as_ref()),
                record,
            });
        }
        images
    }

    /// Background prefetch tasks started so far, leaving none behind.
    pub fn take_background_tasks(&mut self) -> Vec<JoinHandle<PrefetchReport>> {
        std::mem::take(&mut self.background)
    }

    /// Save flags, visited scenes and position to a JSON file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let bookmark = Bookmark {
            version: BOOKMARK_VERSION,
            story_title: self.story.title().to_string(),
            index: self.navigator.state().index,
            phase: self.navigator.state().phase,
            state: self.state.clone(),
        };
        let content = serde_json::to_string_pretty(&bookmark)?;
        fs::write(path.as_ref(), content).await?;
        info!(session = %self.state.id, path = %path.as_ref().display(), "Saved bookmark");
        Ok(())
    }

    /// Continue a saved session.
    pub async fn resume(
        story: Arc<Story>,
        config: NavigatorConfig,
        path: impl AsRef<Path>,
        now: Instant,
    ) -> Result<Self, SessionError> {
        let content = fs::read_to_string(path.as_ref()).await?;
        let bookmark: Bookmark = serde_json::from_str(&content)?;

        if bookmark.version != BOOKMARK_VERSION {
            return Err(SessionError::VersionMismatch {
                expected: BOOKMARK_VERSION,
                found: bookmark.version,
            });
        }
        if bookmark.story_title != story.title() {
            return Err(SessionError::StoryMismatch {
                expected: story.title().to_string(),
                found: bookmark.story_title,
            });
        }
        if bookmark.index >= story.len() {
            return Err(SessionError::InvalidBookmark(bookmark.index));
        }

        let navigator = Navigator::open_at(&story, config, bookmark.index, bookmark.phase, now);
        info!(
            session = %bookmark.state.id,
            index = bookmark.index,
            phase = ?bookmark.phase,
            "Resumed reading session"
        );
        Ok(Self {
            story,
            state: bookmark.state,
            navigator,
            illustrator: None,
            fired_triggers: HashSet::new(),
            background: Vec::new(),
        })
    }

    /// Spawn prefetches for visible scenes that carry a trigger, once each.
    fn fire_prefetch_triggers(&mut self) {
        let Some(illustrator) = &self.illustrator else {
            return;
        };

        let (left, right) = self.navigator.spread(&self.story);
        let right = right.filter(|_| self.navigator.state().phase == Phase::FullSpread);
        let due: Vec<(String, Vec<String>)> = left
            .into_iter()
            .chain(right)
            .filter(|scene| !self.fired_triggers.contains(&scene.id))
            .filter_map(|scene| {
                self.story
                    .rules()
                    .prefetch_for(&scene.id)
                    .map(|ids| (scene.id.clone(), ids.to_vec()))
            })
            .collect();
        if due.is_empty() {
            return;
        }

        if tokio::runtime::Handle::try_current().is_err() {
            warn!(session = %self.state.id, "No async runtime, skipping prefetch");
            return;
        }

        // Finished prefetches have already written to the cache
        self.background.retain(|handle| !handle.is_finished());
        for (trigger, scene_ids) in due {
            info!(session = %self.state.id, trigger = %trigger, ?scene_ids, "Prefetching ahead");
            let handle = spawn_prefetch(
                illustrator.cache.clone(),
                scene_ids,
                illustrator.character.clone(),
            );
            self.background.push(handle);
            self.fired_triggers.insert(trigger);
        }
    }
}
