use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use salon_agent::config::AppConfig;
use salon_agent::db::{self, DocumentStore, SqliteStore};
use salon_agent::handlers;
use salon_agent::services::ai::gemini::GeminiProvider;
use salon_agent::services::ai::LlmProvider;
use salon_agent::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open(&config.database_url)?);

    if let Some(seed_file) = &config.seed_file {
        let imported = db::seed::import_directory(store.as_ref(), Path::new(seed_file)).await?;
        tracing::info!("seeded {imported} businesses from {seed_file}");
    }

    anyhow::ensure!(!config.gemini_api_key.is_empty(), "GEMINI_API_KEY must be set");
    tracing::info!("using Gemini provider (model: {})", config.gemini_model);
    let llm: Arc<dyn LlmProvider> = Arc::new(GeminiProvider::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
        config.gemini_temperature,
        config.gemini_safety_threshold.clone(),
    ));

    let state = Arc::new(AppState::new(store, config.clone(), llm));
    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
