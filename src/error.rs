use thiserror::Error;

/// Error taxonomy for the conversion pipeline.
///
/// Converter-internal faults never surface here with implementation detail;
/// they are collapsed to `ConversionFailure` at the dispatch boundary and the
/// structured cause is logged, while the user only sees `user_message`.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("unsupported file type: .{0}")]
    UnsupportedFileType(String),

    #[error("file too large: {size} bytes (ceiling {ceiling})")]
    FileTooLarge { size: u64, ceiling: u64 },

    #[error("no conversion targets for .{0}")]
    NoTargetOptions(String),

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("{category} conversion failed: {cause}")]
    ConversionFailure {
        category: &'static str,
        cause: String,
    },

    #[error("transport I/O failure: {0}")]
    TransportIo(String),

    #[error("resource failure: {0}")]
    Resource(#[from] std::io::Error),
}

impl ConvertError {
    /// Human-readable message delivered back through the chat transport.
    /// Never leaks codec or transport internals.
    pub fn user_message(&self) -> String {
        match self {
            ConvertError::UnsupportedFileType(ext) => format!(
                "❌ Unsupported file type: .{ext}\nUse /formats to see supported formats."
            ),
            ConvertError::FileTooLarge { ceiling, .. } => format!(
                "❌ File too large. Maximum size is {}MB.",
                ceiling / 1024 / 1024
            ),
            ConvertError::NoTargetOptions(_) => {
                "❌ No conversion options available for this file.".to_string()
            }
            ConvertError::InvalidSelection(_) => {
                "❌ That conversion option is no longer available. Please send the file again."
                    .to_string()
            }
            ConvertError::ConversionFailure { .. } => {
                "❌ Conversion failed. Please try again.".to_string()
            }
            ConvertError::TransportIo(_) | ConvertError::Resource(_) => {
                "❌ An error occurred during conversion.".to_string()
            }
        }
    }
}
