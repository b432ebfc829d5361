use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub const UPLOAD_NOTICE: &str = "Uploaded an image for analysis.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Original upload bytes, kept so the JPEG encoding can be regenerated for
/// later turns without asking for the file again.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedImage {
    file_name: String,
    bytes: Arc<[u8]>,
}

impl UploadedImage {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for UploadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedImage")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub image: Option<UploadedImage>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            image: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            image: None,
        }
    }

    pub fn upload(image: UploadedImage) -> Self {
        Self {
            role: Role::User,
            content: UPLOAD_NOTICE.to_string(),
            image: Some(image),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, Role, UploadedImage, UPLOAD_NOTICE};

    #[test]
    fn role_serializes_lowercase() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&Role::User)?, "\"user\"");
        assert_eq!(serde_json::to_string(&Role::Assistant)?, "\"assistant\"");
        Ok(())
    }

    #[test]
    fn upload_message_carries_notice_and_image() {
        let image = UploadedImage::new("chart.png", vec![1_u8, 2, 3]);
        let message = Message::upload(image.clone());
        assert_eq!(message.role, Role::User);
        assert_eq!(message.content, UPLOAD_NOTICE);
        assert_eq!(message.image, Some(image));
    }

    #[test]
    fn uploaded_image_debug_hides_bytes() {
        let image = UploadedImage::new("chart.png", vec![0_u8; 2048]);
        let rendered = format!("{image:?}");
        assert!(rendered.contains("chart.png"));
        assert!(rendered.contains("2048"));
        assert!(!rendered.contains("0, 0, 0"));
    }
}
