//! The boundary to the external image generation service.
//!
//! The engine treats generation as opaque: a prompt goes in, an image or a
//! block of text comes out. [`GeminiGenerator`] is the production
//! implementation; tests use [`crate::testing::MockGenerator`].

use crate::asset::ImagePayload;
use crate::character::Character;
use crate::story::Scene;
use async_trait::async_trait;
use gemini::{Gemini, Request};
use thiserror::Error;
use tracing::debug;

/// Style directive appended to every prompt unless overridden.
pub const DEFAULT_STYLE: &str =
    "Children's storybook illustration, soft watercolor, warm light, no text or lettering.";

/// Errors reported by an image generator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("missing credential")]
    MissingCredential,

    #[error("network error: {0}")]
    Network(String),

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("unreadable response: {0}")]
    Parse(String),
}

impl From<gemini::Error> for GeneratorError {
    fn from(err: gemini::Error) -> Self {
        match err {
            gemini::Error::NoApiKey => GeneratorError::MissingCredential,
            gemini::Error::Network(msg) => GeneratorError::Network(msg),
            gemini::Error::Api { status, message } => GeneratorError::Api { status, message },
            gemini::Error::Parse(msg) | gemini::Error::Config(msg) => GeneratorError::Parse(msg),
        }
    }
}

/// One illustration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub scene_id: String,
    pub prompt: String,
}

impl GenerationRequest {
    /// Build the prompt for a scene featuring a character.
    pub fn for_scene(scene: &Scene, character: &Character, style: &str) -> Self {
        let mut prompt = format!("Illustrate story scene {}.", scene.id);
        if let Some(setting) = &scene.setting {
            prompt.push_str(&format!("\nSetting: {setting}"));
        }
        prompt.push_str(&format!("\nScene text: {}", scene.text));
        prompt.push_str(&format!(
            "\nMain character (keep appearance consistent): {}",
            character.prompt_description()
        ));
        prompt.push_str(&format!("\nStyle: {style}"));

        Self {
            scene_id: scene.id.clone(),
            prompt,
        }
    }
}

/// What a generator produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorOutput {
    /// A dedicated image part.
    Image(ImagePayload),
    /// Free text, which may still embed an image.
    Text(String),
}

/// An external image generation service.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratorOutput, GeneratorError>;
}

/// Image generation through the Gemini API.
#[derive(Clone)]
pub struct GeminiGenerator {
    client: Option<Gemini>,
}

impl GeminiGenerator {
    pub fn new(client: Gemini) -> Self {
        Self {
            client: Some(client),
        }
    }

    /// A generator with no credential. Every call fails with
    /// [`GeneratorError::MissingCredential`].
    pub fn unconfigured() -> Self {
        Self { client: None }
    }

    /// Build from `GEMINI_API_KEY`, falling back to an unconfigured generator.
    pub fn from_env() -> Self {
        match Gemini::from_env() {
            Ok(client) => Self::new(client),
            Err(_) => Self::unconfigured(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }
}

#[async_trait]
impl ImageGenerator for GeminiGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratorOutput, GeneratorError> {
        let client = self
            .client
            .as_ref()
            .ok_or(GeneratorError::MissingCredential)?;

        debug!(scene_id = %request.scene_id, model = client.model(), "Requesting illustration");
        let response = client
            .generate(Request::prompt(request.prompt).with_image_output())
            .await?;

        Ok(match response.first_image() {
            Some((media_type, data)) => GeneratorOutput::Image(ImagePayload::inline(media_type, data)),
            None => GeneratorOutput::Text(response.text()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_includes_scene_and_character() {
        let scene = Scene::new("2a", "The fox waits by the well.").with_setting("village square");
        let hero = Character::new("Tam").with_trait("hat", "yellow");

        let request = GenerationRequest::for_scene(&scene, &hero, DEFAULT_STYLE);

        assert_eq!(request.scene_id, "2a");
        assert!(request.prompt.contains("2a"));
        assert!(request.prompt.contains("village square"));
        assert!(request.prompt.contains("yellow"));
        assert!(request.prompt.contains("watercolor"));
    }

    #[test]
    fn test_prompt_without_setting() {
        let request =
            GenerationRequest::for_scene(&Scene::new("x", "text"), &Character::new("A"), "flat");
        assert!(!request.prompt.contains("Setting:"));
        assert!(request.prompt.ends_with("Style: flat"));
    }

    #[test]
    fn test_gemini_error_mapping() {
        assert_eq!(
            GeneratorError::from(gemini::Error::NoApiKey),
            GeneratorError::MissingCredential
        );
        assert_eq!(
            GeneratorError::from(gemini::Error::Api {
                status: 429,
                message: "quota".into()
            }),
            GeneratorError::Api {
                status: 429,
                message: "quota".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unconfigured_generator_fails() {
        let generator = GeminiGenerator::unconfigured();
        assert!(!generator.is_configured());

        let request = GenerationRequest {
            scene_id: "1a".into(),
            prompt: "anything".into(),
        };
        assert_eq!(
            generator.generate(request).await,
            Err(GeneratorError::MissingCredential)
        );
    }
}
