use thiserror::Error;

/// Fatal conditions that terminate a job (spec §7, categories 1 and 4).
///
/// Everything else — image decode failure, missing face detector, a
/// candidate line with zero pixels — is recovered locally and never reaches
/// the caller as an `Err`.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParam { field: &'static str, reason: String },

    #[error("frame has no usable pins (pin_count={pin_count}, frame_size={frame_size})")]
    EmptyFrame { pin_count: u32, frame_size: u32 },

    #[error("generation was cancelled")]
    Cancelled,

    #[error("continuation requires the original preprocessed target image")]
    MissingContinuationTarget,
}

pub type Result<T> = std::result::Result<T, GenerationError>;
