//! lookalike-core — find the public figure who looks like the person in a photo.
//!
//! A submission encodes the photo, asks a multimodal Gemini model for the
//! name of a similar-looking celebrity, then resolves that name to a profile
//! image through the TMDB person search.

pub mod encoder;
pub mod inference;
pub mod pipeline;
pub mod resolver;
pub mod types;

pub use encoder::{encode, EncodeError};
pub use inference::{AnalysisError, GeminiClient, InferenceClient};
pub use pipeline::{
    PipelineController, PipelineError, SelectOutcome, Stage, StageDeadlines, SubmitOutcome,
};
pub use resolver::{IdentityResolver, LookupError, TmdbResolver};
pub use types::{EncodedImage, Phase, PipelineState, ProfileImage};
