use std::fmt;

use crate::messages::{Message, Role, UploadedImage};

pub const SUGGESTION_COUNT: usize = 4;

pub const SUMMARY_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Empty,
    AwaitingFirstImage,
    InitialAnalysisPending,
    Conversing,
    SuggestionsPending,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::AwaitingFirstImage => "awaiting_first_image",
            Self::InitialAnalysisPending => "initial_analysis_pending",
            Self::Conversing => "conversing",
            Self::SuggestionsPending => "suggestions_pending",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("an image has already been analyzed in this session; reset to start over")]
    AnalysisAlreadyDone,
    #[error("upload an image before asking follow-up questions")]
    AnalysisMissing,
    #[error("the question is empty")]
    EmptyQuestion,
    #[error("there is no suggested question #{choice}")]
    UnknownSuggestion { choice: usize },
    #[error("expected exactly {SUGGESTION_COUNT} suggested questions, got {0}")]
    SuggestionCount(usize),
}

/// Everything one user's conversation owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    id: String,
    messages: Vec<Message>,
    initial_analysis_done: bool,
    suggestions: Option<Vec<String>>,
    pending_selected_suggestion: Option<String>,
    image: Option<UploadedImage>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            initial_analysis_done: false,
            suggestions: None,
            pending_selected_suggestion: None,
            image: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn initial_analysis_done(&self) -> bool {
        self.initial_analysis_done
    }

    pub fn suggestions(&self) -> Option<&[String]> {
        self.suggestions.as_deref()
    }

    pub fn pending_selected_suggestion(&self) -> Option<&str> {
        self.pending_selected_suggestion.as_deref()
    }

    pub fn image(&self) -> Option<&UploadedImage> {
        self.image.as_ref()
    }

    pub fn phase(&self) -> SessionPhase {
        if self.messages.is_empty() {
            SessionPhase::Empty
        } else {
            SessionPhase::Conversing
        }
    }

    pub fn ensure_can_analyze(&self) -> Result<(), SessionError> {
        if self.initial_analysis_done {
            return Err(SessionError::AnalysisAlreadyDone);
        }
        Ok(())
    }

    pub fn ensure_can_converse(&self) -> Result<(), SessionError> {
        if !self.initial_analysis_done {
            return Err(SessionError::AnalysisMissing);
        }
        Ok(())
    }

    pub fn record_initial_analysis(
        &mut self,
        image: UploadedImage,
        analysis: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.ensure_can_analyze()?;
        self.messages.push(Message::upload(image.clone()));
        self.messages.push(Message::assistant(analysis));
        self.image = Some(image);
        self.initial_analysis_done = true;
        self.suggestions = None;
        self.pending_selected_suggestion = None;
        Ok(())
    }

    /// Appends one question/answer pair. Suggestions from the previous turn
    /// are dropped since they no longer follow the latest answer.
    pub fn record_turn(
        &mut self,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.ensure_can_converse()?;
        let question = question.into();
        if question.trim().is_empty() {
            return Err(SessionError::EmptyQuestion);
        }
        self.messages.push(Message::user(question));
        self.messages.push(Message::assistant(answer));
        self.suggestions = None;
        self.pending_selected_suggestion = None;
        Ok(())
    }

    pub fn set_suggestions(&mut self, suggestions: Vec<String>) -> Result<(), SessionError> {
        self.ensure_can_converse()?;
        if suggestions.len() != SUGGESTION_COUNT {
            return Err(SessionError::SuggestionCount(suggestions.len()));
        }
        self.suggestions = Some(suggestions);
        Ok(())
    }

    pub fn clear_suggestions(&mut self) {
        self.suggestions = None;
    }

    pub fn select_suggestion(&mut self, choice: usize) -> Result<&str, SessionError> {
        let selected = choice
            .checked_sub(1)
            .and_then(|index| self.suggestions.as_ref()?.get(index))
            .cloned()
            .ok_or(SessionError::UnknownSuggestion { choice })?;
        Ok(self.pending_selected_suggestion.insert(selected).as_str())
    }

    pub fn take_selected_suggestion(&mut self) -> Option<String> {
        self.pending_selected_suggestion.take()
    }

    /// Clears the log, flags, suggestions, and cached image in one step.
    /// The session id survives so event streams stay correlated.
    pub fn reset(&mut self) {
        *self = Self::with_id(std::mem::take(&mut self.id));
    }

    pub fn summary_lines(&self, max_chars: usize) -> Vec<String> {
        self.messages
            .iter()
            .filter(|message| message.role == Role::Assistant)
            .map(|message| truncate_with_ellipsis(&message.content, max_chars))
            .collect()
    }
}

fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect::<String>() + "..."
}
