use std::fmt;
use std::str::FromStr;

use copilot_contracts::messages::{Message, Role};
use copilot_contracts::prompts::{suggestion_instruction, PromptTemplate};
use serde::Serialize;

use crate::normalize::EncodedImage;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub max_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: WireContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ContentPart {
    fn image(image: &EncodedImage) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl {
                url: image.data_url(),
            },
        }
    }

    fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FollowUpImagePolicy {
    #[default]
    Attach,
    TextOnly,
}

impl FollowUpImagePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attach => "attach",
            Self::TextOnly => "text-only",
        }
    }
}

impl fmt::Display for FollowUpImagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FollowUpImagePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "attach" => Ok(Self::Attach),
            "text-only" | "text" => Ok(Self::TextOnly),
            other => Err(format!(
                "unknown follow-up image policy '{other}' (expected attach or text-only)"
            )),
        }
    }
}

/// Builds the three request shapes. History is replayed in session order,
/// text only; nothing is dropped or reordered.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    pub model: String,
    pub max_tokens: u64,
    pub template: PromptTemplate,
    pub follow_up_image: FollowUpImagePolicy,
}

impl PayloadBuilder {
    pub fn initial_analysis(&self, image: &EncodedImage) -> ChatRequest {
        let content = vec![
            ContentPart::image(image),
            ContentPart::text(self.template.analysis_instruction()),
        ];
        self.request(vec![WireMessage {
            role: Role::User,
            content: WireContent::Parts(content),
        }])
    }

    pub fn attaches_follow_up_image(&self) -> bool {
        self.follow_up_image == FollowUpImagePolicy::Attach
    }

    /// `image` is only used when the policy attaches it.
    pub fn follow_up(
        &self,
        history: &[Message],
        question: &str,
        image: Option<&EncodedImage>,
    ) -> ChatRequest {
        let mut messages = history_messages(history);
        let content = match image.filter(|_| self.attaches_follow_up_image()) {
            Some(image) => {
                WireContent::Parts(vec![ContentPart::image(image), ContentPart::text(question)])
            }
            None => WireContent::Text(question.to_string()),
        };
        messages.push(WireMessage {
            role: Role::User,
            content,
        });
        self.request(messages)
    }

    pub fn suggestions(&self, history: &[Message]) -> ChatRequest {
        let mut messages = history_messages(history);
        messages.push(WireMessage {
            role: Role::User,
            content: WireContent::Text(suggestion_instruction()),
        });
        self.request(messages)
    }

    fn request(&self, messages: Vec<WireMessage>) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
        }
    }
}

fn history_messages(history: &[Message]) -> Vec<WireMessage> {
    history
        .iter()
        .map(|message| WireMessage {
            role: message.role,
            content: WireContent::Text(message.content.clone()),
        })
        .collect()
}
