//! Branching storybook engine with AI illustration.
//!
//! This crate provides:
//! - Story definitions with gated choices and declarative navigation rules
//! - A two-page spread navigator with reveal timing and terminal locking
//! - A generation cache that illustrates each scene at most once
//! - Sequential background prefetching of upcoming scenes
//! - Reading sessions that tie these together for one reader
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Instant;
//! use storybook_core::{Character, EngineConfig, Illustrator, Intent, ReadingSession, Story};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_env()?;
//!     let story = Arc::new(Story::load("story.json").await?);
//!     let cache = config.build_cache(Arc::clone(&story)).await?;
//!
//!     let mut session = ReadingSession::new(story, config.navigator.clone(), Instant::now())
//!         .with_illustrator(Illustrator::new(cache, Character::new("Wren")));
//!
//!     session.apply(Intent::Advance, Instant::now());
//!     for page in session.illustrate_visible().await {
//!         println!("{}: {}", page.scene_id, page.src);
//!     }
//!     Ok(())
//! }
//! ```

pub mod asset;
pub mod cache;
pub mod character;
pub mod config;
pub mod flags;
pub mod generator;
pub mod navigator;
pub mod payload;
pub mod prefetch;
pub mod resolver;
pub mod session;
pub mod store;
pub mod story;
pub mod testing;

// Primary public API
pub use asset::{AssetRecord, AssetStatus, CacheKey, ImagePayload};
pub use cache::{CacheConfig, CacheError, GenerationCache};
pub use character::Character;
pub use config::{ConfigError, EngineConfig};
pub use flags::FlagStore;
pub use generator::{
    GeminiGenerator, GenerationRequest, GeneratorError, GeneratorOutput, ImageGenerator,
};
pub use navigator::{
    Advisory, BlockReason, Navigator, NavigatorConfig, Page, Phase, SpreadFrame, SpreadState,
    Transition,
};
pub use prefetch::{prefetch, spawn_prefetch, PrefetchProgress, PrefetchReport};
pub use resolver::{apply_effects, resolve};
pub use session::{
    Illustrator, Intent, PageImage, ReadingSession, SessionError, SessionState, VisitedSet,
};
pub use store::{AssetStore, FileStore, MemoryStore, StoreError};
pub use story::{Choice, Effects, Scene, Story, StoryError, StoryRules};
pub use testing::{MockGenerator, TestHarness};
