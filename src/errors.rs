use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Failures of the directory and booking adapters. These never escape a turn:
/// the engine reports them back to the model as a function response.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BookingError {
    #[error("no signed-in user")]
    Unauthenticated,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{staff_name} is already booked on {date} at {start_time}")]
    Conflict {
        staff_name: String,
        date: String,
        start_time: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("booking service unavailable: {0}")]
    Unavailable(String),
}

impl BookingError {
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Unauthenticated => "unauthenticated",
            BookingError::NotFound(_) => "not_found",
            BookingError::Conflict { .. } => "slot_taken",
            BookingError::InvalidArgument(_) => "invalid_argument",
            BookingError::Unavailable(_) => "temporarily_unavailable",
        }
    }

    pub fn unavailable(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{err:#}"), "document store call failed");
        BookingError::Unavailable(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to read audio clip {path}: {source}")]
    Audio {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("AI provider error: {0:#}")]
    Model(anyhow::Error),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("the model returned an empty response")]
    EmptyResponse,

    #[error("the model claimed a booking without calling create_booking ({attempts} attempts)")]
    ProtocolViolation { attempts: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Agent(AgentError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Agent(AgentError::Audio { .. }) => StatusCode::BAD_REQUEST,
            AppError::Agent(_) => StatusCode::BAD_GATEWAY,
            AppError::Booking(BookingError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Booking(BookingError::Unauthenticated) => StatusCode::UNAUTHORIZED,
            AppError::Booking(BookingError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Booking(BookingError::Conflict { .. }) => StatusCode::CONFLICT,
            AppError::Booking(BookingError::InvalidArgument(_)) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
