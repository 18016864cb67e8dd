//! Generated asset records and their cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Base64 body of a 1x1 transparent PNG shown when no illustration exists.
const PLACEHOLDER_PNG: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR4nGNgYAAAAAMAASsJTYQAAAAASUVORK5CYII=";

/// Where a record's image came from, or why it is missing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum AssetStatus {
    /// No illustration exists; the placeholder is shown.
    Placeholder,
    /// Freshly produced by the image generator.
    Generated,
    /// A pre-authored or previously persisted image.
    CachedOnDisk,
    /// Generation failed; the payload is the placeholder.
    Error(String),
}

impl AssetStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, AssetStatus::Error(_))
    }

    pub fn error_reason(&self) -> Option<&str> {
        match self {
            AssetStatus::Error(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetStatus::Placeholder => write!(f, "placeholder"),
            AssetStatus::Generated => write!(f, "generated"),
            AssetStatus::CachedOnDisk => write!(f, "cached-on-disk"),
            AssetStatus::Error(reason) => write!(f, "error:{reason}"),
        }
    }
}

impl FromStr for AssetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "placeholder" => Ok(AssetStatus::Placeholder),
            "generated" => Ok(AssetStatus::Generated),
            "cached-on-disk" => Ok(AssetStatus::CachedOnDisk),
            other => other
                .strip_prefix("error:")
                .map(|reason| AssetStatus::Error(reason.to_string()))
                .ok_or_else(|| format!("unknown asset status: {other}")),
        }
    }
}

impl From<AssetStatus> for String {
    fn from(status: AssetStatus) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for AssetStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// An image, either inline or by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImagePayload {
    /// Base64 encoded image bytes.
    Inline { media_type: String, data: String },
    /// A URL or path the UI can load.
    Reference { url: String },
}

impl ImagePayload {
    pub fn inline(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        ImagePayload::Inline {
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    pub fn reference(url: impl Into<String>) -> Self {
        ImagePayload::Reference { url: url.into() }
    }

    /// The transparent placeholder image.
    pub fn placeholder() -> Self {
        Self::inline("image/png", PLACEHOLDER_PNG)
    }

    pub fn is_placeholder(&self) -> bool {
        *self == Self::placeholder()
    }

    /// Something an `<img src>` can show: a data URI or the reference itself.
    pub fn display_src(&self) -> String {
        match self {
            ImagePayload::Inline { media_type, data } => format!("data:{media_type};base64,{data}"),
            ImagePayload::Reference { url } => url.clone(),
        }
    }
}

/// The cached outcome of illustrating one scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub scene_id: String,
    pub status: AssetStatus,
    pub payload: ImagePayload,
    pub note: String,
}

impl AssetRecord {
    pub fn new(
        scene_id: impl Into<String>,
        status: AssetStatus,
        payload: ImagePayload,
        note: impl Into<String>,
    ) -> Self {
        Self {
            scene_id: scene_id.into(),
            status,
            payload,
            note: note.into(),
        }
    }

    /// A failed attempt: error status over the placeholder image.
    pub fn failed(scene_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            scene_id: scene_id.into(),
            note: format!("error:{reason}"),
            status: AssetStatus::Error(reason),
            payload: ImagePayload::placeholder(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }
}

/// Cache key: a scene id, optionally salted with a character fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    scene_id: String,
    fingerprint: Option<String>,
}

impl CacheKey {
    /// Key shared by every character.
    pub fn scene(scene_id: impl Into<String>) -> Self {
        Self {
            scene_id: scene_id.into(),
            fingerprint: None,
        }
    }

    /// Key specific to one character's art.
    pub fn for_character(scene_id: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            scene_id: scene_id.into(),
            fingerprint: Some(fingerprint.into()),
        }
    }

    pub fn scene_id(&self) -> &str {
        &self.scene_id
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.fingerprint {
            Some(fp) => write!(f, "{}@{}", self.scene_id, fp),
            None => write!(f, "{}", self.scene_id),
        }
    }
}
