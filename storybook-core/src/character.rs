//! The reader's character, as supplied by an external character creator.
//!
//! The engine never interprets the fields. It only needs a prompt
//! description and a stable fingerprint for per-character cache keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Number of hex characters kept from the fingerprint digest.
const FINGERPRINT_LEN: usize = 16;

/// A character produced by the character-creation collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    /// Visual trait selections, e.g. `hair -> "curly black"`.
    #[serde(default)]
    pub traits: BTreeMap<String, String>,
    #[serde(default)]
    pub personality: Vec<String>,
    #[serde(default)]
    pub backstory: Option<String>,
}

impl Character {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_trait(mut self, category: impl Into<String>, value: impl Into<String>) -> Self {
        self.traits.insert(category.into(), value.into());
        self
    }

    pub fn with_personality(mut self, tag: impl Into<String>) -> Self {
        self.personality.push(tag.into());
        self
    }

    pub fn with_backstory(mut self, backstory: impl Into<String>) -> Self {
        self.backstory = Some(backstory.into());
        self
    }

    /// Serialized form used inside generation prompts.
    pub fn prompt_description(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.name.clone())
    }

    /// Short stable digest of the character, for salting cache keys.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.prompt_description().as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(FINGERPRINT_LEN);
        encoded
    }
}
