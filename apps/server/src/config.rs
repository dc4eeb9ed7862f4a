//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use jukebox_core::SpotifyCredentials;
use serde::Deserialize;

/// Spotify application credentials and the account's refresh token.
///
/// Not `Debug`: holds secrets.
#[derive(Default, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    /// Override: `JUKEBOX_SPOTIFY_CLIENT_ID`
    pub client_id: String,
    /// Override: `JUKEBOX_SPOTIFY_CLIENT_SECRET`
    pub client_secret: String,
    /// Override: `JUKEBOX_SPOTIFY_REFRESH_TOKEN`
    pub refresh_token: String,
}

/// Server configuration loaded from YAML with environment overrides.
#[derive(Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to (0 = first free port in the scan range).
    /// Override: `JUKEBOX_BIND_PORT`
    pub bind_port: u16,

    /// SQLite database for queue metadata and bans.
    /// Metadata lives in memory only when unset.
    /// Override: `JUKEBOX_DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Interval between reconciliation ticks in milliseconds.
    /// Override: `JUKEBOX_SYNC_INTERVAL_MS`
    pub sync_interval_ms: u64,

    /// Lifetime of a ban vote in seconds.
    pub vote_duration_secs: u64,

    /// Distinct online users needed to start a ban vote.
    pub min_online_for_vote: usize,

    /// Browser origins allowed by CORS. Empty allows any origin.
    pub trusted_origins: Vec<String>,

    pub spotify: SpotifyConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = jukebox_core::Config::default();
        Self {
            bind_port: 3000,
            database_path: None,
            sync_interval_ms: core.sync_interval_ms,
            vote_duration_secs: core.vote_duration_secs,
            min_online_for_vote: core.min_online_for_vote,
            trusted_origins: core.trusted_origins,
            spotify: SpotifyConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("JUKEBOX_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("JUKEBOX_SYNC_INTERVAL_MS") {
            if let Ok(interval) = val.parse() {
                self.sync_interval_ms = interval;
            }
        }

        if let Ok(val) = std::env::var("JUKEBOX_SPOTIFY_CLIENT_ID") {
            self.spotify.client_id = val;
        }
        if let Ok(val) = std::env::var("JUKEBOX_SPOTIFY_CLIENT_SECRET") {
            self.spotify.client_secret = val;
        }
        if let Ok(val) = std::env::var("JUKEBOX_SPOTIFY_REFRESH_TOKEN") {
            self.spotify.refresh_token = val;
        }

        // Note: JUKEBOX_DATABASE_PATH is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Credentials for the provider client; all three fields are required.
    pub fn spotify_credentials(&self) -> Result<SpotifyCredentials> {
        let spotify = &self.spotify;
        if spotify.client_id.is_empty()
            || spotify.client_secret.is_empty()
            || spotify.refresh_token.is_empty()
        {
            bail!(
                "Spotify credentials are incomplete. Set spotify.client_id, \
                 spotify.client_secret and spotify.refresh_token in the config file \
                 or the JUKEBOX_SPOTIFY_* environment variables."
            );
        }
        Ok(SpotifyCredentials {
            client_id: spotify.client_id.clone(),
            client_secret: spotify.client_secret.clone(),
            refresh_token: spotify.refresh_token.clone(),
        })
    }

    /// Converts to jukebox-core's Config type.
    pub fn to_core_config(&self) -> jukebox_core::Config {
        jukebox_core::Config {
            preferred_port: self.bind_port,
            sync_interval_ms: self.sync_interval_ms,
            vote_duration_secs: self.vote_duration_secs,
            min_online_for_vote: self.min_online_for_vote,
            trusted_origins: self.trusted_origins.clone(),
            ..Default::default()
        }
    }
}
