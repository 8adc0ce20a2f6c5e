//! rtcrelay server library
//!
//! This module exposes the server components for testing and embedding.

pub mod api;
pub mod error;
pub mod sfu;
pub mod signaling;
pub mod state;
pub mod tls;
pub mod ws;

use anyhow::Result;
use std::path::Path;

/// Create and configure the server application
pub fn create_app(config: state::Config) -> Result<(axum::Router, state::AppState)> {
    let app_state = state::AppState::new(config)?;
    let router = api::create_router(app_state.clone());
    Ok((router, app_state))
}

/// Bind the configured port and serve until the process exits.
/// TLS is used only when both a certificate and a key are configured.
pub async fn serve(config: state::Config) -> Result<()> {
    let tls_config = match config.tls_paths() {
        Some((cert, key)) => Some(tls::load_tls_config(Path::new(cert), Path::new(key))?),
        None => None,
    };

    let address = config.bind_address();
    let (app, _state) = create_app(config)?;
    let listener = tokio::net::TcpListener::bind(address).await?;

    match tls_config {
        Some(tls_config) => {
            tracing::info!("Listening on https://{}", address);
            tls::serve_tls(listener, app, tls_config).await
        }
        None => {
            tracing::info!("Listening on http://{}", address);
            axum::serve(listener, app).await?;
            Ok(())
        }
    }
}
