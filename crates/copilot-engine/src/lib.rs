pub mod config;
pub mod error;
pub mod normalize;
pub mod payload;
pub mod provider;

use anyhow::{bail, Result};
use copilot_contracts::events::{EventPayload, EventWriter, SessionEventKind};
use copilot_contracts::messages::UploadedImage;
use copilot_contracts::models::{ModelSelection, ModelSelector, ModelSpec};
use copilot_contracts::session::{SessionError, SessionPhase, SessionState};
use copilot_contracts::suggestions::parse_suggestions;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

pub use config::EngineConfig;
pub use error::{CopilotError, ErrorKind, RemoteError};
pub use normalize::{normalize_image, EncodedImage, NormalizeOptions};
pub use payload::{ChatRequest, FollowUpImagePolicy, PayloadBuilder};
pub use provider::{ChatProvider, DryrunProvider, OpenAiChatProvider};

#[derive(Debug)]
pub struct TurnOutcome {
    pub reply: String,
    pub suggestion_error: Option<CopilotError>,
}

/// Drives a [`SessionState`] through analysis, follow-ups and suggestions.
pub struct CopilotEngine {
    provider: Box<dyn ChatProvider>,
    payloads: PayloadBuilder,
    config: EngineConfig,
    fallback_reason: Option<String>,
    events: Option<EventWriter>,
}

impl CopilotEngine {
    pub fn new(provider: Box<dyn ChatProvider>, config: EngineConfig) -> Self {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| config::DEFAULT_MODEL.to_string());
        Self::with_model(provider, config, model, None)
    }

    /// Resolves the model against the registry and builds its provider.
    /// The OpenAI credential is read here, so a missing key fails startup.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let selection = select_model(config.model.as_deref())?;
        let provider = build_provider(&selection.model, &config, provider::openai_api_key())?;
        let ModelSelection {
            model,
            fallback_reason,
            ..
        } = selection;
        Ok(Self::with_model(provider, config, model.name, fallback_reason))
    }

    fn with_model(
        provider: Box<dyn ChatProvider>,
        config: EngineConfig,
        model: String,
        fallback_reason: Option<String>,
    ) -> Self {
        let payloads = PayloadBuilder {
            model,
            max_tokens: config.max_tokens,
            template: config.template.clone(),
            follow_up_image: config.follow_up_image,
        };
        Self {
            provider,
            payloads,
            config,
            fallback_reason,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn model(&self) -> &str {
        &self.payloads.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        self.fallback_reason.as_deref()
    }

    pub fn suggestions_enabled(&self) -> bool {
        self.config.suggestions_enabled
    }

    pub fn open_session(&self) -> SessionState {
        let state = SessionState::new();
        let mut payload = EventPayload::new();
        payload.insert("model".to_string(), json!(self.model()));
        payload.insert("provider".to_string(), json!(self.provider_name()));
        self.emit(state.id(), SessionEventKind::SessionStarted, payload);
        state
    }

    pub fn analyze_upload(
        &self,
        state: &mut SessionState,
        upload: UploadedImage,
    ) -> Result<String, CopilotError> {
        let result = self.try_analyze_upload(state, upload);
        self.report("initial_analysis", state, &result);
        result
    }

    fn try_analyze_upload(
        &self,
        state: &mut SessionState,
        upload: UploadedImage,
    ) -> Result<String, CopilotError> {
        state.ensure_can_analyze()?;
        normalize::ensure_supported_upload(upload.file_name())?;
        debug!(
            session = state.id(),
            phase = %SessionPhase::AwaitingFirstImage,
            file_name = upload.file_name(),
            bytes = upload.len(),
            "normalizing upload"
        );
        let encoded = normalize_image(upload.bytes(), &self.config.normalize)?;
        let request = self.payloads.initial_analysis(&encoded);
        info!(
            session = state.id(),
            phase = %SessionPhase::InitialAnalysisPending,
            model = self.model(),
            "requesting initial analysis"
        );
        let analysis = self.provider.complete(&request)?;
        let file_name = upload.file_name().to_string();
        state.record_initial_analysis(upload, analysis.clone())?;

        let mut payload = EventPayload::new();
        payload.insert("file_name".to_string(), json!(file_name));
        payload.insert("model".to_string(), json!(self.model()));
        payload.insert("reply_chars".to_string(), json!(analysis.chars().count()));
        self.emit(state.id(), SessionEventKind::AnalysisCompleted, payload);
        Ok(analysis)
    }

    pub fn ask(&self, state: &mut SessionState, question: &str) -> Result<String, CopilotError> {
        let result = self.try_ask(state, question);
        self.report("follow_up", state, &result);
        result
    }

    fn try_ask(&self, state: &mut SessionState, question: &str) -> Result<String, CopilotError> {
        state.ensure_can_converse()?;
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion.into());
        }

        let encoded = match state.image() {
            Some(image) if self.payloads.attaches_follow_up_image() => {
                Some(normalize_image(image.bytes(), &self.config.normalize)?)
            }
            _ => None,
        };
        let request = self
            .payloads
            .follow_up(state.messages(), question, encoded.as_ref());
        info!(
            session = state.id(),
            history = state.messages().len(),
            image_attached = encoded.is_some(),
            "requesting follow-up answer"
        );
        let reply = self.provider.complete(&request)?;
        state.record_turn(question, reply.clone())?;

        let mut payload = EventPayload::new();
        payload.insert("question".to_string(), json!(question));
        payload.insert("reply_chars".to_string(), json!(reply.chars().count()));
        payload.insert("messages".to_string(), json!(state.messages().len()));
        self.emit(state.id(), SessionEventKind::QuestionAnswered, payload);
        Ok(reply)
    }

    pub fn ask_suggestion(
        &self,
        state: &mut SessionState,
        choice: usize,
    ) -> Result<String, CopilotError> {
        if let Err(err) = state.select_suggestion(choice) {
            let result = Err(CopilotError::from(err));
            self.report("follow_up", state, &result);
            return result;
        }
        // Consumed before the call so a failed turn leaves no stale selection.
        let question = state.take_selected_suggestion().unwrap_or_default();
        self.ask(state, &question)
    }

    /// Replaces the session's suggested questions. On any failure the
    /// previous suggestions are cleared so stale ones are never shown.
    pub fn refresh_suggestions(
        &self,
        state: &mut SessionState,
    ) -> Result<Vec<String>, CopilotError> {
        let result = self.try_refresh_suggestions(state);
        if result.is_err() {
            state.clear_suggestions();
        }
        self.report("suggestions", state, &result);
        result
    }

    fn try_refresh_suggestions(
        &self,
        state: &mut SessionState,
    ) -> Result<Vec<String>, CopilotError> {
        state.ensure_can_converse()?;
        let request = self.payloads.suggestions(state.messages());
        info!(
            session = state.id(),
            phase = %SessionPhase::SuggestionsPending,
            "requesting suggested questions"
        );
        let raw = self.provider.complete(&request)?;
        let questions = parse_suggestions(&raw)?;
        state.set_suggestions(questions.clone())?;

        let mut payload = EventPayload::new();
        payload.insert("questions".to_string(), json!(questions));
        self.emit(state.id(), SessionEventKind::SuggestionsUpdated, payload);
        Ok(questions)
    }

    pub fn start_from_upload(
        &self,
        state: &mut SessionState,
        upload: UploadedImage,
    ) -> Result<TurnOutcome, CopilotError> {
        let reply = self.analyze_upload(state, upload)?;
        Ok(self.with_suggestions(state, reply))
    }

    pub fn submit_question(
        &self,
        state: &mut SessionState,
        question: &str,
    ) -> Result<TurnOutcome, CopilotError> {
        let reply = self.ask(state, question)?;
        Ok(self.with_suggestions(state, reply))
    }

    pub fn submit_suggestion(
        &self,
        state: &mut SessionState,
        choice: usize,
    ) -> Result<TurnOutcome, CopilotError> {
        let reply = self.ask_suggestion(state, choice)?;
        Ok(self.with_suggestions(state, reply))
    }

    fn with_suggestions(&self, state: &mut SessionState, reply: String) -> TurnOutcome {
        let suggestion_error = if self.config.suggestions_enabled {
            self.refresh_suggestions(state).err()
        } else {
            None
        };
        TurnOutcome {
            reply,
            suggestion_error,
        }
    }

    pub fn analyze_once(&self, upload: &UploadedImage) -> Result<String, CopilotError> {
        normalize::ensure_supported_upload(upload.file_name())?;
        let encoded = normalize_image(upload.bytes(), &self.config.normalize)?;
        let request = self.payloads.initial_analysis(&encoded);
        info!(
            file_name = upload.file_name(),
            model = self.model(),
            "requesting one-shot analysis"
        );
        let analysis = self.provider.complete(&request).map_err(|err| {
            warn!(file_name = upload.file_name(), error = %err, "one-shot analysis failed");
            err
        })?;
        Ok(analysis)
    }

    pub fn reset(&self, state: &mut SessionState) {
        let cleared = state.messages().len();
        state.reset();
        info!(session = state.id(), cleared, "session reset");
        let mut payload = EventPayload::new();
        payload.insert("cleared_messages".to_string(), json!(cleared));
        self.emit(state.id(), SessionEventKind::SessionReset, payload);
    }

    fn report<T>(&self, stage: &str, state: &SessionState, result: &Result<T, CopilotError>) {
        let Err(err) = result else {
            return;
        };
        warn!(session = state.id(), stage, error = %err, "turn failed");
        let mut payload = EventPayload::new();
        payload.insert("stage".to_string(), json!(stage));
        payload.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
        payload.insert("error".to_string(), json!(err.to_string()));
        self.emit(state.id(), SessionEventKind::TurnFailed, payload);
    }

    fn emit(&self, session_id: &str, kind: SessionEventKind, payload: EventPayload) -> Option<Value> {
        let events = self.events.as_ref()?;
        match events.emit(session_id, kind, payload) {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(
                    path = %events.path().display(),
                    event_type = kind.as_str(),
                    error = %err,
                    "failed to write event"
                );
                None
            }
        }
    }
}

pub fn select_model(requested: Option<&str>) -> Result<ModelSelection> {
    let selection = ModelSelector::new(None)
        .select_vision(requested)
        .map_err(anyhow::Error::msg)?;
    if let Some(reason) = &selection.fallback_reason {
        warn!(model = %selection.model.name, reason = %reason, "model fallback");
    }
    Ok(selection)
}

/// Builds the provider for a resolved model. `api_key` is only consulted
/// for OpenAI models.
pub fn build_provider(
    spec: &ModelSpec,
    config: &EngineConfig,
    api_key: Option<String>,
) -> Result<Box<dyn ChatProvider>> {
    match spec.provider.as_str() {
        "openai" => {
            let Some(api_key) = api_key else {
                bail!(
                    "OPENAI_API_KEY (or OPENAI_API_KEY_BACKUP) must be set to use model '{}'",
                    spec.name
                );
            };
            let provider =
                OpenAiChatProvider::new(config.resolved_api_base(), api_key, config.timeout)?;
            Ok(Box::new(provider))
        }
        "dryrun" => Ok(Box::new(DryrunProvider)),
        other => bail!("model '{}' uses unsupported provider '{other}'", spec.name),
    }
}
