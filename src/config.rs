use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_temperature: f32,
    pub gemini_safety_threshold: String,
    pub max_guard_retries: u32,
    pub model_timeout_secs: u64,
    pub store_timeout_secs: u64,
    /// Idle chat sessions older than this are dropped.
    pub session_ttl_secs: u64,
    pub seed_file: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "salon_agent.db".to_string()),
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            gemini_temperature: env::var("GEMINI_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.7),
            gemini_safety_threshold: env::var("GEMINI_SAFETY_THRESHOLD")
                .unwrap_or_else(|_| "BLOCK_MEDIUM_AND_ABOVE".to_string()),
            max_guard_retries: env::var("AGENT_MAX_GUARD_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            model_timeout_secs: env::var("MODEL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            store_timeout_secs: env::var("STORE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            session_ttl_secs: env::var("SESSION_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30 * 60),
            seed_file: env::var("SEED_FILE").ok().filter(|v| !v.is_empty()),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            max_guard_retries: self.max_guard_retries,
            model_timeout: Duration::from_secs(self.model_timeout_secs),
            store_timeout: Duration::from_secs(self.store_timeout_secs),
        }
    }
}

/// Knobs for a single conversation engine.
#[derive(Clone, Debug)]
pub struct AgentSettings {
    /// How many times a turn is retried after the model claims a booking it never made.
    pub max_guard_retries: u32,
    pub model_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_guard_retries: 2,
            model_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(10),
        }
    }
}
