//! Detection of image payloads in free-form generator output.
//!
//! Image models sometimes answer with text that embeds the image rather than a
//! dedicated image part. Detection runs in order:
//! 1. a `data:image/<type>;base64,...` marker anywhere in the text;
//! 2. the whole (trimmed) text being a long base64 blob;
//! 3. otherwise the output is not an image.

use crate::asset::ImagePayload;
use regex_lite::Regex;

/// Raw base64 shorter than this is treated as prose, not an image.
pub const MIN_RAW_BASE64_LEN: usize = 100;

lazy_static::lazy_static! {
    static ref DATA_URI: Regex =
        Regex::new(r"(?i)data:(image/(?:png|jpe?g|gif|webp));base64,([A-Za-z0-9+/=]+)")
            .expect("data URI pattern is valid");
    static ref RAW_BASE64: Regex =
        Regex::new(r"^[A-Za-z0-9+/=\s]+$").expect("base64 pattern is valid");
}

/// How an image was found in generator output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Extracted from a data URI marker.
    Marker(ImagePayload),
    /// The whole output was base64 image data.
    RawBase64(ImagePayload),
    /// No image in the output.
    NotImage,
}

impl Detection {
    pub fn into_payload(self) -> Option<ImagePayload> {
        match self {
            Detection::Marker(payload) | Detection::RawBase64(payload) => Some(payload),
            Detection::NotImage => None,
        }
    }

    /// Short tag for record notes.
    pub fn note(&self) -> &'static str {
        match self {
            Detection::Marker(_) => "generated-inline",
            Detection::RawBase64(_) => "generated-rawbase64",
            Detection::NotImage => "response-not-image",
        }
    }
}

/// Find an image payload in generator text output.
pub fn detect_image(output: &str) -> Detection {
    if let Some(caps) = DATA_URI.captures(output) {
        let media_type = caps[1].to_ascii_lowercase().replace("image/jpg", "image/jpeg");
        return Detection::Marker(ImagePayload::inline(media_type, &caps[2]));
    }

    let trimmed = output.trim();
    if trimmed.len() > MIN_RAW_BASE64_LEN && RAW_BASE64.is_match(trimmed) {
        let data: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        let media_type = sniff_media_type(&data);
        return Detection::RawBase64(ImagePayload::inline(media_type, data));
    }

    Detection::NotImage
}

/// Guess the media type from the base64 form of well-known magic numbers.
fn sniff_media_type(data: &str) -> &'static str {
    if data.starts_with("/9j/") {
        "image/jpeg"
    } else if data.starts_with("R0lGOD") {
        "image/gif"
    } else if data.starts_with("UklGR") {
        "image/webp"
    } else {
        "image/png"
    }
}
