use crate::sfu::{SfuRouter, SfuSettings, TrackRetention, WebRtcEngine};
use crate::signaling::MessageRouter;
use crate::ws::connections::SessionRegistry;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub port: u16,
    #[serde(default)]
    pub tls_cert: Option<String>,
    #[serde(default)]
    pub tls_key: Option<String>,
    /// Directory served for client assets
    pub static_dir: String,
    /// Where `<stream>.ivf` / `<stream>.ogg` recordings are written
    pub recordings_dir: String,
    pub record: bool,
    pub stun_servers: Vec<String>,
    /// Drop a stream's tracks once its publisher goes away
    pub prune_tracks: bool,
}

impl Config {
    /// Load from an optional `.env` file, then environment variables.
    pub fn load() -> anyhow::Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e.into());
            }
        }

        let settings = config::Config::builder()
            .set_default("port", 8000)?
            .set_default("static_dir", "static")?
            .set_default("recordings_dir", ".")?
            .set_default("record", true)?
            .set_default("stun_servers", vec![DEFAULT_STUN_SERVER])?
            .set_default("prune_tracks", false)?
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("stun_servers"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;

        if config.tls_paths().is_none() && (config.tls_cert.is_some() || config.tls_key.is_some()) {
            tracing::warn!("Only one of TLS_CERT / TLS_KEY is set, serving without TLS");
        }

        Ok(config)
    }

    /// Certificate and key paths, only when both are set and non-empty
    pub fn tls_paths(&self) -> Option<(&str, &str)> {
        match (self.tls_cert.as_deref(), self.tls_key.as_deref()) {
            (Some(cert), Some(key)) if !cert.is_empty() && !key.is_empty() => Some((cert, key)),
            _ => None,
        }
    }

    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn sfu_settings(&self) -> SfuSettings {
        SfuSettings {
            recordings_dir: self.record.then(|| PathBuf::from(&self.recordings_dir)),
            retention: if self.prune_tracks {
                TrackRetention::PruneOnDisconnect
            } else {
                TrackRetention::Retain
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8000,
            tls_cert: None,
            tls_key: None,
            static_dir: "static".to_string(),
            recordings_dir: ".".to_string(),
            record: true,
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            prune_tracks: false,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    pub signaling: Arc<MessageRouter>,
    pub sfu: Arc<SfuRouter<WebRtcEngine>>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let signaling = Arc::new(MessageRouter::new(registry.clone()));

        let engine = Arc::new(WebRtcEngine::new(&config.stun_servers)?);
        let sfu = Arc::new(SfuRouter::new(engine, config.sfu_settings()));

        Ok(Self {
            config,
            registry,
            signaling,
            sfu,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_requires_both_paths() {
        let mut config = Config::default();
        assert!(config.tls_paths().is_none());

        config.tls_cert = Some("cert.pem".to_string());
        assert!(config.tls_paths().is_none());

        config.tls_key = Some(String::new());
        assert!(config.tls_paths().is_none());

        config.tls_key = Some("key.pem".to_string());
        assert_eq!(config.tls_paths(), Some(("cert.pem", "key.pem")));
    }

    #[test]
    fn sfu_settings_follow_flags() {
        let mut config = Config::default();
        let settings = config.sfu_settings();
        assert_eq!(settings.recordings_dir, Some(PathBuf::from(".")));
        assert_eq!(settings.retention, TrackRetention::Retain);

        config.record = false;
        config.prune_tracks = true;
        let settings = config.sfu_settings();
        assert!(settings.recordings_dir.is_none());
        assert_eq!(settings.retention, TrackRetention::PruneOnDisconnect);
    }
}
