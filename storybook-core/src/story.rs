//! Story definitions: scenes, choices and the per-story navigation rules.
//!
//! A [`Story`] is loaded once, validated, and then treated as immutable.
//! Authoring mistakes (dangling targets, duplicate ids, a missing start scene)
//! are reported as [`StoryError`] at load time so a reading session never
//! traverses into an undefined state.

use crate::flags::FlagStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::info;

/// Errors found while loading a story definition.
#[derive(Debug, Error)]
pub enum StoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Story has no scenes")]
    Empty,

    #[error("Duplicate scene id: {0}")]
    DuplicateScene(String),

    #[error("Scene {scene} has duplicate choice id: {choice}")]
    DuplicateChoice { scene: String, choice: String },

    #[error("Start scene not found: {0}")]
    MissingStart(String),

    #[error("Choice {choice} in scene {scene} targets unknown scene {target}")]
    DanglingTarget {
        scene: String,
        choice: String,
        target: String,
    },

    #[error("Story rule refers to unknown scene: {0}")]
    UnknownRuleScene(String),

    #[error("Paired scene {scene} must be followed directly by its partner {partner}")]
    InvalidPairing { scene: String, partner: String },
}

/// Story metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryMeta {
    pub version: u32,
    pub title: String,
}

/// Flag assignments applied when a choice is taken.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effects {
    #[serde(default)]
    pub set: BTreeMap<String, bool>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// A choice offered by a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    /// Unique within the owning scene.
    pub id: String,
    pub label: String,
    pub target: String,
    /// Every entry must match the flag store for the choice to be offered.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requires: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Effects::is_empty")]
    pub effects: Effects,
}

impl Choice {
    /// Create an unconditioned choice without effects.
    pub fn new(id: impl Into<String>, label: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            target: target.into(),
            requires: BTreeMap::new(),
            effects: Effects::default(),
        }
    }

    /// Require a flag to hold a value.
    pub fn requiring(mut self, flag: impl Into<String>, value: bool) -> Self {
        self.requires.insert(flag.into(), value);
        self
    }

    /// Set a flag when the choice is taken.
    pub fn setting(mut self, flag: impl Into<String>, value: bool) -> Self {
        self.effects.set.insert(flag.into(), value);
        self
    }

    /// Whether the choice is offered under the given flags.
    ///
    /// Flags missing from the store count as `false`.
    pub fn is_available(&self, flags: &FlagStore) -> bool {
        self.requires
            .iter()
            .all(|(flag, expected)| flags.get(flag) == *expected)
    }
}

/// A single page of the story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setting: Option<String>,
    /// No player-initiated forward motion is allowed from a terminal scene.
    #[serde(default)]
    pub terminal: bool,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_left: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_right: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// `false` means the pre-authored image is always used.
    #[serde(default = "default_true", alias = "imageNeedsGemini")]
    pub needs_generation: bool,
    /// Explicit path ancestry tag, matched by blocked transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Scene {
    /// Create a scene with text and no choices.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            setting: None,
            terminal: false,
            choices: Vec::new(),
            image_left: None,
            image_right: None,
            caption: None,
            needs_generation: true,
            branch: None,
        }
    }

    pub fn with_choice(mut self, choice: Choice) -> Self {
        self.choices.push(choice);
        self
    }

    pub fn with_setting(mut self, setting: impl Into<String>) -> Self {
        self.setting = Some(setting.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    /// Never call the generator for this scene.
    pub fn no_generation(mut self) -> Self {
        self.needs_generation = false;
        self
    }

    /// Use a pre-authored image instead of generating one.
    pub fn with_authored_image(mut self, image: impl Into<String>) -> Self {
        self.image_right = Some(image.into());
        self.needs_generation = false;
        self
    }

    /// The pre-authored image for this scene, right page first.
    pub fn authored_image(&self) -> Option<&str> {
        fn non_empty(image: &Option<String>) -> Option<&str> {
            image.as_deref().filter(|s| !s.is_empty())
        }
        non_empty(&self.image_right).or_else(|| non_empty(&self.image_left))
    }
}

/// Where a blocked transition must originate from to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceMatcher {
    /// Source scene id starts with this prefix.
    IdPrefix(String),
    /// Source scene carries this branch tag.
    Branch(String),
}

impl SourceMatcher {
    pub fn matches(&self, source: &Scene) -> bool {
        match self {
            SourceMatcher::IdPrefix(prefix) => source.id.starts_with(prefix.as_str()),
            SourceMatcher::Branch(branch) => source.branch.as_deref() == Some(branch.as_str()),
        }
    }
}

/// A target that cannot be reached from matching sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTransition {
    pub target: String,
    pub from: SourceMatcher,
}

/// A scene that always displays with a fixed partner on the right page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedScene {
    pub scene: String,
    pub partner: String,
}

/// Scenes to illustrate ahead of time once the reader lands on `on`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchTrigger {
    pub on: String,
    pub scenes: Vec<String>,
}

/// Per-story navigation rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRules {
    /// Once one member of a group has been entered, the others are closed.
    #[serde(default)]
    pub mutually_exclusive: Vec<BTreeSet<String>>,
    #[serde(default)]
    pub blocked_transitions: Vec<BlockedTransition>,
    #[serde(default)]
    pub paired_scenes: Vec<PairedScene>,
    #[serde(default)]
    pub prefetch: Vec<PrefetchTrigger>,
}

impl StoryRules {
    /// Whether `target` is locked when navigating from `source`.
    pub fn is_blocked(&self, source: &Scene, target: &str) -> bool {
        self.blocked_transitions
            .iter()
            .any(|rule| rule.target == target && rule.from.matches(source))
    }

    /// The already-visited sibling that excludes `target`, if any.
    pub fn excluding_sibling<'a>(
        &'a self,
        target: &str,
        visited: &crate::session::VisitedSet,
    ) -> Option<&'a str> {
        self.mutually_exclusive
            .iter()
            .filter(|group| group.contains(target))
            .flat_map(|group| group.iter())
            .find(|sibling| sibling.as_str() != target && visited.contains(sibling))
            .map(String::as_str)
    }

    /// The fixed right-page partner of a paired scene.
    pub fn partner_of(&self, scene_id: &str) -> Option<&str> {
        self.paired_scenes
            .iter()
            .find(|p| p.scene == scene_id)
            .map(|p| p.partner.as_str())
    }

    /// Scenes to prefetch when landing on `scene_id`.
    pub fn prefetch_for(&self, scene_id: &str) -> Option<&[String]> {
        self.prefetch
            .iter()
            .find(|t| t.on == scene_id)
            .map(|t| t.scenes.as_slice())
    }

    fn referenced_scenes(&self) -> impl Iterator<Item = &str> {
        let exclusive = self
            .mutually_exclusive
            .iter()
            .flat_map(|g| g.iter().map(String::as_str));
        let blocked = self.blocked_transitions.iter().map(|b| b.target.as_str());
        let paired = self
            .paired_scenes
            .iter()
            .flat_map(|p| [p.scene.as_str(), p.partner.as_str()]);
        let prefetch = self
            .prefetch
            .iter()
            .flat_map(|t| std::iter::once(t.on.as_str()).chain(t.scenes.iter().map(String::as_str)));
        exclusive.chain(blocked).chain(paired).chain(prefetch)
    }
}

/// The on-disk shape of a story document.
#[derive(Debug, Deserialize)]
struct StoryDocument {
    meta: StoryMeta,
    start: String,
    scenes: Vec<Scene>,
    #[serde(default)]
    rules: StoryRules,
}

/// A validated, immutable story.
#[derive(Debug, Clone, Serialize)]
pub struct Story {
    meta: StoryMeta,
    start: String,
    scenes: Vec<Scene>,
    rules: StoryRules,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Story {
    /// Build and validate a story.
    pub fn new(
        meta: StoryMeta,
        start: impl Into<String>,
        scenes: Vec<Scene>,
        rules: StoryRules,
    ) -> Result<Self, StoryError> {
        let start = start.into();
        if scenes.is_empty() {
            return Err(StoryError::Empty);
        }

        let mut index = HashMap::with_capacity(scenes.len());
        for (i, scene) in scenes.iter().enumerate() {
            if index.insert(scene.id.clone(), i).is_some() {
                return Err(StoryError::DuplicateScene(scene.id.clone()));
            }
        }

        if !index.contains_key(&start) {
            return Err(StoryError::MissingStart(start));
        }

        for scene in &scenes {
            let mut seen = HashSet::new();
            for choice in &scene.choices {
                if !seen.insert(choice.id.as_str()) {
                    return Err(StoryError::DuplicateChoice {
                        scene: scene.id.clone(),
                        choice: choice.id.clone(),
                    });
                }
                if !index.contains_key(&choice.target) {
                    return Err(StoryError::DanglingTarget {
                        scene: scene.id.clone(),
                        choice: choice.id.clone(),
                        target: choice.target.clone(),
                    });
                }
            }
        }

        if let Some(unknown) = rules.referenced_scenes().find(|id| !index.contains_key(*id)) {
            return Err(StoryError::UnknownRuleScene(unknown.to_string()));
        }

        for pair in &rules.paired_scenes {
            let follows = index
                .get(&pair.scene)
                .and_then(|i| scenes.get(i + 1))
                .is_some_and(|next| next.id == pair.partner);
            if !follows {
                return Err(StoryError::InvalidPairing {
                    scene: pair.scene.clone(),
                    partner: pair.partner.clone(),
                });
            }
        }

        Ok(Self {
            meta,
            start,
            scenes,
            rules,
            index,
        })
    }

    /// Parse and validate a story from JSON.
    pub fn from_json(json: &str) -> Result<Self, StoryError> {
        let doc: StoryDocument = serde_json::from_str(json)?;
        Self::new(doc.meta, doc.start, doc.scenes, doc.rules)
    }

    /// Load and validate a story from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoryError> {
        let content = fs::read_to_string(path.as_ref()).await?;
        let story = Self::from_json(&content)?;
        info!(
            title = %story.meta.title,
            scenes = story.scenes.len(),
            path = %path.as_ref().display(),
            "Loaded story"
        );
        Ok(story)
    }

    pub fn meta(&self) -> &StoryMeta {
        &self.meta
    }

    pub fn title(&self) -> &str {
        &self.meta.title
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    /// Position of the start scene in authored order.
    pub fn start_index(&self) -> usize {
        self.index.get(&self.start).copied().unwrap_or(0)
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn rules(&self) -> &StoryRules {
        &self.rules
    }

    pub fn scene(&self, id: &str) -> Option<&Scene> {
        self.index.get(id).map(|&i| &self.scenes[i])
    }

    pub fn scene_at(&self, index: usize) -> Option<&Scene> {
        self.scenes.get(index)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }
}
