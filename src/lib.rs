pub mod api;
pub mod browser;
pub mod config;
pub mod dom;
pub mod error;
pub mod recording;
pub mod replay;
pub mod services;
pub mod state;

use browser::CdpPage;
use dom::Page;
use recording::{Recorder, ScreenshotSource};
use state::AppState;
use std::sync::Arc;

/// Load config, attach to the browser if one is listening, start the
/// coordinator, the page recorder and the local API, then run until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    // Never overwrite an existing file on failure
    let config = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}. Using in-memory defaults (not saving).", e);
            config::AppConfig::default()
        }
    };
    config::validate_config(&config)?;

    let cdp = if config.browser.cdp_port > 0 {
        match CdpPage::attach(config.browser.cdp_port).await {
            Ok(page) => Some(Arc::new(page)),
            Err(e) => {
                tracing::warn!(
                    "No browser on CDP port {}: {}. Recording from this process is disabled.",
                    config.browser.cdp_port,
                    e
                );
                None
            }
        }
    } else {
        None
    };

    let screenshots = cdp
        .clone()
        .map(|page| page as Arc<dyn ScreenshotSource>);
    let state = Arc::new(AppState::new(config.clone(), screenshots).await);

    if let Some(page) = cdp {
        let page: Arc<dyn Page> = page;
        state.attach_page(page.clone());
        Recorder::new(page, state.coordinator.clone()).spawn(state.coordinator.subscribe_signals());
    }

    if config.api.enabled && config.api.port > 0 {
        let server = api::run_server(state.clone(), config.api.port, config.api.api_key.clone());
        tokio::select! {
            result = server => result?,
            _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
        }
    } else {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
    }
    Ok(())
}
