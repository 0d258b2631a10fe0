use crate::encoder::EncodeError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::fmt;

const DATA_URI_SCHEME: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

/// A self-contained image: MIME type plus base64 payload.
///
/// Renders as a `data:<mime>;base64,<payload>` URI, which doubles as the
/// preview source. The payload is always valid base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    mime: String,
    payload: String,
}

impl EncodedImage {
    /// Encode raw image bytes under the given MIME type.
    pub fn from_bytes(bytes: &[u8], mime: &str) -> Self {
        Self {
            mime: mime.to_string(),
            payload: STANDARD.encode(bytes),
        }
    }

    /// Parse a `data:<mime>;base64,<payload>` URI.
    pub fn parse(data_uri: &str) -> Result<Self, EncodeError> {
        let rest = data_uri
            .strip_prefix(DATA_URI_SCHEME)
            .ok_or_else(|| EncodeError::Malformed("missing `data:` scheme".into()))?;
        let (mime, payload) = rest
            .split_once(BASE64_MARKER)
            .ok_or_else(|| EncodeError::Malformed("missing `;base64,` marker".into()))?;

        if mime.is_empty() || !mime.contains('/') {
            return Err(EncodeError::Malformed(format!("invalid MIME type `{mime}`")));
        }
        if payload.is_empty() {
            return Err(EncodeError::Empty);
        }
        STANDARD
            .decode(payload)
            .map_err(|e| EncodeError::Malformed(format!("payload is not base64: {e}")))?;

        Ok(Self {
            mime: mime.to_string(),
            payload: payload.to_string(),
        })
    }

    /// Declared MIME type, e.g. `image/jpeg`.
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Base64 payload with the data-URI prefix stripped, ready for transport.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Decode the payload back to the original bytes.
    pub fn decode(&self) -> Vec<u8> {
        // Construction guarantees a valid payload.
        STANDARD.decode(&self.payload).unwrap_or_default()
    }

    /// The full data URI.
    pub fn to_data_uri(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DATA_URI_SCHEME}{}{BASE64_MARKER}{}", self.mime, self.payload)
    }
}

impl Serialize for EncodedImage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Profile image of a person found by the identity search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileImage {
    /// Name as reported by the search service.
    pub name: Option<String>,
    /// Path fragment returned by the search service (e.g. `/abc.jpg`).
    pub profile_path: String,
    /// Absolute, displayable URL (CDN base + path).
    pub url: String,
}

/// Coarse pipeline phase, the single source of truth for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Loading,
    Success,
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::Loading => "loading",
            Phase::Success => "success",
            Phase::Error => "error",
        })
    }
}

/// Status line shown while a submission is in flight.
pub const LOADING_STATUS: &str = "분석 중...";

/// Observable state of the submission pipeline.
///
/// Each variant carries only the fields valid for its phase, so combinations
/// such as "loading with an error message" cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum PipelineState {
    Idle {
        subject: Option<EncodedImage>,
    },
    Loading {
        subject: EncodedImage,
        /// Name produced by the inference stage, once available.
        candidate: Option<String>,
    },
    Success {
        subject: EncodedImage,
        name: String,
        image: ProfileImage,
    },
    Error {
        subject: Option<EncodedImage>,
        /// Candidate name, kept when inference succeeded but the lookup did not.
        candidate: Option<String>,
        message: String,
    },
}

impl Default for PipelineState {
    fn default() -> Self {
        PipelineState::Idle { subject: None }
    }
}

impl PipelineState {
    pub fn phase(&self) -> Phase {
        match self {
            PipelineState::Idle { .. } => Phase::Idle,
            PipelineState::Loading { .. } => Phase::Loading,
            PipelineState::Success { .. } => Phase::Success,
            PipelineState::Error { .. } => Phase::Error,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, PipelineState::Loading { .. })
    }

    /// Whether the submit control is enabled.
    pub fn can_submit(&self) -> bool {
        !self.is_loading()
    }

    /// The currently selected subject image, if any.
    pub fn subject(&self) -> Option<&EncodedImage> {
        match self {
            PipelineState::Idle { subject } | PipelineState::Error { subject, .. } => {
                subject.as_ref()
            }
            PipelineState::Loading { subject, .. } | PipelineState::Success { subject, .. } => {
                Some(subject)
            }
        }
    }

    /// The name to display: the resolved name, or the bare candidate.
    pub fn candidate(&self) -> Option<&str> {
        match self {
            PipelineState::Idle { .. } => None,
            PipelineState::Loading { candidate, .. } | PipelineState::Error { candidate, .. } => {
                candidate.as_deref()
            }
            PipelineState::Success { name, .. } => Some(name),
        }
    }

    pub fn resolved_image(&self) -> Option<&ProfileImage> {
        match self {
            PipelineState::Success { image, .. } => Some(image),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            PipelineState::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn status_text(&self) -> Option<&'static str> {
        self.is_loading().then_some(LOADING_STATUS)
    }
}
