use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use base64::Engine as _;
use chrono::Local;
use serde_json::{json, Value};

use crate::config::AgentSettings;
use crate::errors::{AgentError, BookingError};
use crate::models::{AgentState, ConversationTurn, Role};
use crate::services::ai::functions::{self, AgentCall};
use crate::services::ai::{
    fallback, guard, prompt, ChatRequest, Content, FunctionCall, FunctionDeclaration, LlmProvider,
    ModelReply, Part,
};
use crate::services::auth::AuthProvider;
use crate::services::booking::BookingService;
use crate::services::directory::DirectoryService;

/// Recorded in history in place of an audio clip, and sent alongside its bytes.
pub const AUDIO_MARKER: &str = "[Voice message] Listen to the attached audio and respond to the request in it.";

/// The user's input for one turn, ready to send.
struct UserMessage {
    history_text: String,
    parts: Vec<Part>,
}

impl UserMessage {
    fn text(input: &str) -> Self {
        Self {
            history_text: input.to_string(),
            parts: vec![Part::Text(input.to_string())],
        }
    }

    async fn audio(path: &Path) -> Result<Self, AgentError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| AgentError::Audio {
            path: path.display().to_string(),
            source,
        })?;
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        Ok(Self {
            history_text: AUDIO_MARKER.to_string(),
            parts: vec![
                Part::Text(AUDIO_MARKER.to_string()),
                Part::InlineData {
                    mime_type: audio_mime_type(path).to_string(),
                    data,
                },
            ],
        })
    }
}

fn audio_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "aac" => "audio/aac",
        "ogg" | "oga" => "audio/ogg",
        "flac" => "audio/flac",
        "webm" => "audio/webm",
        "3gp" => "audio/3gpp",
        _ => "audio/mp4",
    }
}

/// Result of running one function call: the raw payload for the model and a
/// rendering to fall back on if the model's follow-up is blank.
struct FunctionOutcome {
    payload: Value,
    fallback: String,
}

impl FunctionOutcome {
    fn failed(err: &BookingError) -> Self {
        Self {
            payload: json!({ "error": err.kind(), "message": err.to_string() }),
            fallback: fallback::render_error(err),
        }
    }
}

/// One conversation with the booking assistant. Not meant to run overlapping
/// turns; callers serialize access (the gateway holds it behind a mutex).
pub struct ConversationEngine {
    llm: Arc<dyn LlmProvider>,
    auth: Arc<dyn AuthProvider>,
    directory: DirectoryService,
    bookings: BookingService,
    settings: AgentSettings,
    functions: Vec<FunctionDeclaration>,
    history: Vec<ConversationTurn>,
    state: AgentState,
}

impl ConversationEngine {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        auth: Arc<dyn AuthProvider>,
        directory: DirectoryService,
        bookings: BookingService,
        settings: AgentSettings,
    ) -> Self {
        Self {
            llm,
            auth,
            directory,
            bookings,
            settings,
            functions: functions::declarations(),
            history: Vec::new(),
            state: AgentState::Idle,
        }
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn create_message(role: Role, content: &str) -> ConversationTurn {
        ConversationTurn::new(role, content)
    }

    pub fn add_message(&mut self, role: Role, content: &str) {
        self.history.push(Self::create_message(role, content));
    }

    pub fn reset_chat(&mut self) {
        self.history.clear();
        self.state = AgentState::Idle;
        tracing::info!("conversation reset");
    }

    /// Runs one user turn. `input` is the message text, or a path to a recorded
    /// clip when `is_audio_input` is set.
    pub async fn generate_response(&mut self, input: &str, is_audio_input: bool) -> Result<String, AgentError> {
        let message = if is_audio_input {
            UserMessage::audio(Path::new(input)).await?
        } else {
            UserMessage::text(input)
        };

        let result = self.run_turn(&message).await;
        self.state = AgentState::Idle;
        result
    }

    async fn run_turn(&mut self, message: &UserMessage) -> Result<String, AgentError> {
        let mut violations = 0;

        loop {
            self.add_message(Role::User, &message.history_text);
            let mut contents = self.replay_contents(message);

            self.state = AgentState::AwaitingModel;
            let reply = self.ask_model(&contents).await?;

            if let Some(call) = reply.function_call {
                let text = self.answer_function_call(&mut contents, call).await?;
                self.add_message(Role::Model, &text);
                return Ok(text);
            }

            let text = reply.text.trim().to_string();
            if guard::claims_booking_success(&text) {
                violations += 1;
                tracing::warn!(attempt = violations, "model claimed a booking without calling create_booking");
                if violations > self.settings.max_guard_retries {
                    return Err(AgentError::ProtocolViolation { attempts: violations });
                }
                self.add_message(Role::User, guard::CORRECTION_NOTE);
                continue;
            }

            if text.is_empty() {
                return Err(AgentError::EmptyResponse);
            }

            self.add_message(Role::Model, &text);
            return Ok(text);
        }
    }

    /// Every earlier turn as text, followed by the current input with its full parts.
    fn replay_contents(&self, message: &UserMessage) -> Vec<Content> {
        let earlier = &self.history[..self.history.len().saturating_sub(1)];
        let mut contents: Vec<Content> = earlier.iter().map(Content::from).collect();
        contents.push(Content::user(message.parts.clone()));
        contents
    }

    async fn ask_model(&self, contents: &[Content]) -> Result<ModelReply, AgentError> {
        let system_prompt = prompt::system_prompt(Local::now().date_naive());
        let request = ChatRequest {
            system_instruction: &system_prompt,
            contents,
            functions: &self.functions,
        };

        match tokio::time::timeout(self.settings.model_timeout, self.llm.generate(request)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(AgentError::Model(e)),
            Err(_) => Err(AgentError::Timeout("the model")),
        }
    }

    async fn answer_function_call(
        &mut self,
        contents: &mut Vec<Content>,
        call: FunctionCall,
    ) -> Result<String, AgentError> {
        self.state = AgentState::ExecutingFunction;
        let outcome = self.dispatch(&call).await;

        contents.push(Content::function_call(call.clone()));
        contents.push(Content::function_response(&call.name, outcome.payload));

        self.state = AgentState::AwaitingModelFinal;
        let reply = match self.ask_model(contents).await {
            Ok(reply) => reply,
            Err(e) => {
                // The function already ran; its result is still reported
                tracing::warn!(function = %call.name, error = %e, "model follow-up failed, using fallback text");
                return Ok(outcome.fallback);
            }
        };

        let text = reply.text.trim();
        if text.is_empty() {
            tracing::debug!(function = %call.name, "model follow-up was blank, using fallback text");
            Ok(outcome.fallback)
        } else {
            Ok(text.to_string())
        }
    }

    async fn dispatch(&self, call: &FunctionCall) -> FunctionOutcome {
        let parsed = match AgentCall::parse(call) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(function = %call.name, error = %e, "rejected function call");
                return FunctionOutcome::failed(&BookingError::InvalidArgument(e.to_string()));
            }
        };

        tracing::info!(function = %call.name, args = %call.args, "executing function call");

        match parsed {
            AgentCall::ListBusinesses => {
                match self.with_store_timeout(self.directory.list_businesses_with_details()).await {
                    Ok(businesses) => FunctionOutcome {
                        payload: json!(businesses),
                        fallback: fallback::render_businesses(&businesses),
                    },
                    Err(e) => FunctionOutcome::failed(&e),
                }
            }
            AgentCall::FindAvailableSlots(args) => {
                let search = self.bookings.find_available_slots(
                    &args.business_name,
                    &args.service_name,
                    &args.date,
                    args.staff_name.as_deref(),
                );
                match self.with_store_timeout(search).await {
                    Ok(slots) => FunctionOutcome {
                        fallback: fallback::render_slots(
                            &args.business_name,
                            &args.service_name,
                            &args.date,
                            &slots,
                        ),
                        payload: json!(slots),
                    },
                    Err(e) => FunctionOutcome::failed(&e),
                }
            }
            AgentCall::CreateBooking(args) => {
                let caller = self.auth.current_user();
                let create = self.bookings.create_booking(
                    caller.as_ref(),
                    &args.business_name,
                    &args.staff_name,
                    &args.service_name,
                    &args.date,
                    &args.start_time,
                );
                match self.with_store_timeout(create).await {
                    Ok(confirmation) => FunctionOutcome {
                        payload: json!(confirmation),
                        fallback: fallback::render_booking(&confirmation),
                    },
                    Err(e) => FunctionOutcome::failed(&e),
                }
            }
        }
    }

    async fn with_store_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, BookingError>>,
    ) -> Result<T, BookingError> {
        tokio::time::timeout(self.settings.store_timeout, fut)
            .await
            .unwrap_or_else(|_| {
                tracing::error!("document store call timed out");
                Err(BookingError::Unavailable("timed out".to_string()))
            })
    }
}
