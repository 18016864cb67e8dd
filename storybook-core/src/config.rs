//! Engine configuration.
//!
//! Built either in code with the `with_*` methods or from the environment:
//!
//! | variable                      | meaning                                   |
//! |-------------------------------|-------------------------------------------|
//! | `STORYBOOK_CACHE_DIR`         | directory for the file-backed asset cache |
//! | `STORYBOOK_PER_CHARACTER_ART` | `true` to key art by character            |
//! | `STORYBOOK_STYLE`             | style directive for every prompt          |
//! | `GEMINI_API_KEY`              | credential for the image generator        |
//! | `GEMINI_MODEL`                | image model override                      |

use crate::cache::{CacheConfig, GenerationCache};
use crate::generator::{GeminiGenerator, DEFAULT_STYLE};
use crate::navigator::NavigatorConfig;
use crate::store::{AssetStore, FileStore, MemoryStore, StoreError};
use crate::story::Story;
use gemini::Gemini;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors from building engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration for the generation pipeline and reading sessions.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Persist records here; in memory when unset.
    pub cache_dir: Option<PathBuf>,
    pub per_character_art: bool,
    pub style: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub navigator: NavigatorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            per_character_art: false,
            style: DEFAULT_STYLE.to_string(),
            gemini_api_key: None,
            gemini_model: None,
            navigator: NavigatorConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Self::new();

        if let Some(dir) = non_empty("STORYBOOK_CACHE_DIR") {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = non_empty("STORYBOOK_PER_CHARACTER_ART") {
            config.per_character_art = parse_bool("STORYBOOK_PER_CHARACTER_ART", &value)?;
        }
        if let Some(style) = non_empty("STORYBOOK_STYLE") {
            config.style = style;
        }
        config.gemini_api_key = non_empty("GEMINI_API_KEY");
        config.gemini_model = non_empty("GEMINI_MODEL");

        Ok(config)
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_per_character_art(mut self, enabled: bool) -> Self {
        self.per_character_art = enabled;
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    pub fn with_gemini_api_key(mut self, key: impl Into<String>) -> Self {
        self.gemini_api_key = Some(key.into());
        self
    }

    pub fn with_gemini_model(mut self, model: impl Into<String>) -> Self {
        self.gemini_model = Some(model.into());
        self
    }

    pub fn with_navigator(mut self, navigator: NavigatorConfig) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::default()
            .with_style(self.style.clone())
            .with_per_character_art(self.per_character_art)
    }

    /// The Gemini generator, unconfigured when no key is set.
    pub fn generator(&self) -> GeminiGenerator {
        match &self.gemini_api_key {
            Some(key) => {
                let mut client = Gemini::new(key.clone());
                if let Some(model) = &self.gemini_model {
                    client = client.with_model(model.clone());
                }
                GeminiGenerator::new(client)
            }
            None => GeminiGenerator::unconfigured(),
        }
    }

    /// The configured store: file-backed when a cache directory is set.
    pub async fn store(&self) -> Result<Arc<dyn AssetStore>, ConfigError> {
        let store: Arc<dyn AssetStore> = match &self.cache_dir {
            Some(dir) => {
                info!(dir = %dir.display(), "Using file asset cache");
                Arc::new(FileStore::open(dir).await?)
            }
            None => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }

    /// A generation cache for `story` wired to Gemini and the configured store.
    pub async fn build_cache(&self, story: Arc<Story>) -> Result<GenerationCache, ConfigError> {
        let generator = self.generator();
        if !generator.is_configured() {
            info!("GEMINI_API_KEY not set, new illustrations will be placeholders");
        }
        Ok(GenerationCache::new(
            story,
            self.store().await?,
            Arc::new(generator),
            self.cache_config(),
        ))
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        }),
    }
}
