use std::env;
use std::time::Duration;

use copilot_contracts::prompts::{suggestion_instruction, SUGGESTIONS_KEY};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Map, Value};

use crate::error::RemoteError;
use crate::payload::{ChatRequest, ContentPart, WireContent};

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";

pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;
    fn complete(&self, request: &ChatRequest) -> Result<String, RemoteError>;
}

pub fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        env::var(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

pub fn openai_api_key() -> Option<String> {
    first_non_empty_env(&["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"])
}

pub fn openai_api_base() -> String {
    first_non_empty_env(&["OPENAI_API_BASE", "OPENAI_BASE_URL"])
        .map(|raw| normalize_api_base(&raw))
        .unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.to_string())
}

/// Trims trailing slashes and adds `/v1` to a bare host.
pub fn normalize_api_base(raw: &str) -> String {
    let mut base = raw.trim().trim_end_matches('/').to_string();
    if let Ok(parsed) = reqwest::Url::parse(&base) {
        if parsed.path().trim().is_empty() || parsed.path() == "/" {
            base = format!("{base}/v1");
        }
    }
    base
}

pub struct OpenAiChatProvider {
    api_base: String,
    api_key: String,
    timeout: Duration,
    http: HttpClient,
}

impl OpenAiChatProvider {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            api_base: normalize_api_base(&api_base.into()),
            api_key: api_key.into(),
            timeout,
            http,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            return RemoteError::Timeout {
                provider: self.name().to_string(),
                seconds: self.timeout.as_secs(),
            };
        }
        RemoteError::Transport {
            provider: self.name().to_string(),
            message: error_chain_text(&err),
        }
    }
}

impl ChatProvider for OpenAiChatProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn complete(&self, request: &ChatRequest) -> Result<String, RemoteError> {
        let endpoint = format!("{}/chat/completions", self.api_base);
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .map_err(|err| self.transport_error(err))?;
        let body = response_json_or_error(self.name(), response)
            .map_err(|err| match err {
                ResponseFailure::Read(err) => self.transport_error(err),
                ResponseFailure::Remote(err) => err,
            })?;
        extract_reply_text(self.name(), &body)
    }
}

enum ResponseFailure {
    Read(reqwest::Error),
    Remote(RemoteError),
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value, ResponseFailure> {
    let status = response.status();
    let body = response.text().map_err(ResponseFailure::Read)?;
    if !status.is_success() {
        return Err(ResponseFailure::Remote(RemoteError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
            body: truncate_text(&body, 512),
        }));
    }
    serde_json::from_str(&body).map_err(|err| {
        ResponseFailure::Remote(RemoteError::MalformedResponse {
            provider: provider.to_string(),
            reason: format!("invalid JSON payload ({err})"),
        })
    })
}

pub fn extract_reply_text(provider: &str, body: &Value) -> Result<String, RemoteError> {
    let malformed = |reason: &str| RemoteError::MalformedResponse {
        provider: provider.to_string(),
        reason: reason.to_string(),
    };
    let content = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| malformed("no choices in response"))?
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("choices[0].message.content is missing"))?;
    let text = content.trim();
    if text.is_empty() {
        return Err(malformed("reply text is empty"));
    }
    Ok(text.to_string())
}

fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(String::as_str) != Some(trimmed) {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    truncate_text(&parts.join(" | caused by: "), 512)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[derive(Debug, Default)]
pub struct DryrunProvider;

impl ChatProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn complete(&self, request: &ChatRequest) -> Result<String, RemoteError> {
        let Some(last) = request.messages.last() else {
            return Err(RemoteError::MalformedResponse {
                provider: self.name().to_string(),
                reason: "request has no messages".to_string(),
            });
        };
        let question = match &last.content {
            WireContent::Text(text) => text.clone(),
            WireContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<&str>>()
                .join(" "),
        };

        if question == suggestion_instruction() {
            let mut body = Map::new();
            body.insert(
                SUGGESTIONS_KEY.to_string(),
                json!([
                    "Which point is the largest outlier?",
                    "Is the overall trend increasing or decreasing?",
                    "How much variance is there between periods?",
                    "What does the y-axis measure?",
                ]),
            );
            return Ok(Value::Object(body).to_string());
        }
        if request.messages.len() == 1 {
            return Ok(
                "**Overview:** This is a dry-run analysis; no model was called.\n\n**Insights:** Connect a vision model to interpret the chart."
                    .to_string(),
            );
        }
        Ok(format!("Dry-run reply to: {}", question.trim()))
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    use copilot_contracts::messages::Role;
    use copilot_contracts::prompts::PromptTemplate;
    use copilot_contracts::suggestions::parse_suggestions;
    use serde_json::json;

    use super::{
        extract_reply_text, normalize_api_base, ChatProvider, DryrunProvider, OpenAiChatProvider,
    };
    use crate::error::{CopilotError, RemoteError};
    use crate::payload::{
        ChatRequest, FollowUpImagePolicy, PayloadBuilder, WireContent, WireMessage,
    };

    fn text_request(question: &str) -> ChatRequest {
        ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![
                WireMessage {
                    role: Role::User,
                    content: WireContent::Text("Uploaded an image for analysis.".to_string()),
                },
                WireMessage {
                    role: Role::Assistant,
                    content: WireContent::Text("Trend is increasing.".to_string()),
                },
                WireMessage {
                    role: Role::User,
                    content: WireContent::Text(question.to_string()),
                },
            ],
            max_tokens: 1024,
        }
    }

    #[test]
    fn extract_reply_text_reads_first_choice() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "  Spike caused by X. "}}]});
        assert_eq!(
            extract_reply_text("openai", &body).unwrap(),
            "Spike caused by X."
        );
    }

    #[test]
    fn extract_reply_text_rejects_missing_fields() {
        for body in [
            json!({}),
            json!({"choices": []}),
            json!({"choices": [{"message": {}}]}),
            json!({"choices": [{"message": {"content": "   "}}]}),
        ] {
            assert!(matches!(
                extract_reply_text("openai", &body),
                Err(RemoteError::MalformedResponse { .. })
            ));
        }
    }

    #[test]
    fn api_base_normalization() {
        assert_eq!(
            normalize_api_base("https://api.openai.com/v1/"),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            normalize_api_base("http://localhost:8080"),
            "http://localhost:8080/v1"
        );
        assert_eq!(
            normalize_api_base("https://proxy.internal/openai/v1"),
            "https://proxy.internal/openai/v1"
        );
    }

    #[test]
    fn openai_provider_posts_request_with_bearer_auth() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(json!({
                "model": "gpt-4o",
                "max_tokens": 1024,
                "messages": [
                    {"role": "user", "content": "Uploaded an image for analysis."},
                    {"role": "assistant", "content": "Trend is increasing."},
                    {"role": "user", "content": "What caused the spike?"},
                ],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"choices": [{"message": {"role": "assistant", "content": "Spike caused by X."}}]})
                    .to_string(),
            )
            .create();

        let provider = OpenAiChatProvider::new(
            format!("{}/v1", server.url()),
            "sk-test",
            Duration::from_secs(5),
        )?;
        let reply = provider.complete(&text_request("What caused the spike?"))?;
        assert_eq!(reply, "Spike caused by X.");
        mock.assert();
        Ok(())
    }

    #[test]
    fn openai_provider_surfaces_error_status() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body("{\"error\": {\"message\": \"rate limited\"}}")
            .create();

        let provider = OpenAiChatProvider::new(
            format!("{}/v1", server.url()),
            "sk-test",
            Duration::from_secs(5),
        )?;
        let err = provider.complete(&text_request("Why?")).unwrap_err();
        match err {
            RemoteError::Status { status, body, .. } => {
                assert_eq!(status, 429);
                assert!(body.contains("rate limited"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn openai_provider_flags_non_json_success_body() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body("<html>gateway</html>")
            .create();

        let provider = OpenAiChatProvider::new(
            format!("{}/v1", server.url()),
            "sk-test",
            Duration::from_secs(5),
        )?;
        assert!(matches!(
            provider.complete(&text_request("Why?")),
            Err(RemoteError::MalformedResponse { .. })
        ));
        Ok(())
    }

    #[test]
    fn openai_provider_reports_unreachable_host_as_transport_error() -> anyhow::Result<()> {
        let provider =
            OpenAiChatProvider::new("http://127.0.0.1:9/v1", "sk-test", Duration::from_secs(2))?;
        assert!(matches!(
            provider.complete(&text_request("Why?")),
            Err(RemoteError::Transport { .. } | RemoteError::Timeout { .. })
        ));
        Ok(())
    }

    #[test]
    fn openai_provider_times_out_on_silent_server() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        thread::spawn(move || {
            // Accept and hold connections without ever answering.
            let mut held = Vec::new();
            for stream in listener.incoming().flatten() {
                held.push(stream);
            }
        });

        let provider = OpenAiChatProvider::new(
            format!("http://{addr}/v1"),
            "sk-test",
            Duration::from_secs(1),
        )?;
        let err = provider.complete(&text_request("Why?")).unwrap_err();
        assert_eq!(
            err,
            RemoteError::Timeout {
                provider: "openai".to_string(),
                seconds: 1,
            }
        );
        let message = CopilotError::from(err).user_message();
        assert!(message.contains("timed out after 1s"));
        assert!(message.ends_with("Please try again."));
        Ok(())
    }

    #[test]
    fn dryrun_answers_each_request_shape() -> anyhow::Result<()> {
        let builder = PayloadBuilder {
            model: "dryrun-vision-1".to_string(),
            max_tokens: 256,
            template: PromptTemplate::default(),
            follow_up_image: FollowUpImagePolicy::TextOnly,
        };
        let provider = DryrunProvider;

        let follow_up = provider.complete(&text_request("Peak?"))?;
        assert_eq!(follow_up, "Dry-run reply to: Peak?");

        let history = copilot_contracts::messages::Message::assistant("Trend.");
        let suggestions = provider.complete(&builder.suggestions(&[history]))?;
        assert_eq!(parse_suggestions(&suggestions)?.len(), 4);
        Ok(())
    }
}
