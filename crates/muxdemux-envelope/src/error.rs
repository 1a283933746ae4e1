/// Errors that can occur while encoding or validating envelopes.
///
/// Decoding never surfaces these to the engine: a chunk that fails to decode
/// is passthrough data.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The envelope could not be (de)serialized.
    #[error("envelope json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope parsed but breaks a structural rule.
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;
