use anyhow::Context;
use std::sync::Arc;

use synthguard::analysis::Analyzer;
use synthguard::classifier::HttpClassifier;
use synthguard::config::Config;
use synthguard::frames::FfmpegSource;
use synthguard::services::history::HistoryBackend;
use synthguard::{AppState, build_app, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let config = Config::from_env()?;

    let history = HistoryBackend::from_database_url(config.database_url.as_deref())
        .await
        .context("Failed to open history store")?;

    let classifier = HttpClassifier::new(&config.classifier_url, config.classifier_timeout)
        .context("Failed to create classifier client")?;
    log::info!(
        "[classifier] Using {} ({:?} timeout, {:?} mode, {:?} on failure)",
        classifier.endpoint(),
        config.classifier_timeout,
        config.classify_mode,
        config.failure_policy
    );

    let analyzer = Analyzer::new(
        classifier,
        history,
        FfmpegSource::new(config.ffmpeg_threads),
        config.analyzer_options(),
    );

    let state = Arc::new(AppState {
        analyzer: Arc::new(analyzer),
        max_upload_bytes: config.max_upload_bytes,
    });
    let app = build_app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    log::info!("Listening on http://{}", addr);
    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}
