use copilot_contracts::session::SessionError;
use copilot_contracts::suggestions::SuggestionParseError;

use crate::normalize::SUPPORTED_UPLOAD_EXTENSIONS;

/// Failure talking to the remote model. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("{provider} request timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },
    #[error("{provider} request failed: {message}")]
    Transport { provider: String, message: String },
    #[error("{provider} request failed ({status}): {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("{provider} returned an unusable response: {reason}")]
    MalformedResponse { provider: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ImageDecode,
    RemoteCall,
    ResponseParse,
    InvalidAction,
}

#[derive(Debug, thiserror::Error)]
pub enum CopilotError {
    #[error("unsupported upload '{file_name}': expected one of {}", SUPPORTED_UPLOAD_EXTENSIONS.join(", "))]
    UnsupportedUpload { file_name: String },
    #[error("could not decode the uploaded image: {0}")]
    ImageDecode(image::ImageError),
    #[error("could not re-encode the image as JPEG: {0}")]
    ImageEncode(image::ImageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("could not read the suggested questions: {0}")]
    Suggestions(#[from] SuggestionParseError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl CopilotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedUpload { .. } | Self::ImageDecode(_) | Self::ImageEncode(_) => {
                ErrorKind::ImageDecode
            }
            Self::Remote(RemoteError::MalformedResponse { .. }) | Self::Suggestions(_) => {
                ErrorKind::ResponseParse
            }
            Self::Remote(_) => ErrorKind::RemoteCall,
            Self::Session(_) => ErrorKind::InvalidAction,
        }
    }

    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::RemoteCall => {
                format!("The analysis service could not be reached. {self}. Please try again.")
            }
            _ => {
                let mut text = self.to_string();
                if let Some(first) = text.get(0..1) {
                    let upper = first.to_ascii_uppercase();
                    text.replace_range(0..1, &upper);
                }
                text
            }
        }
    }
}
