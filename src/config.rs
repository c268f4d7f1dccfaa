use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::AudioBackendConfig;
use crate::connection::ConnectionConfig;
use crate::session::SessionConfig;

/// Configuration file looked up when none is given (extension optional)
pub const DEFAULT_CONFIG_PATH: &str = "config/agent-voice-session";

/// Environment variable naming the agent server; wins over every other source
pub const SERVER_URL_ENV: &str = "AGENT_SERVER_URL";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub agent: AgentConfig,
    pub audio: AudioConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub base_url: String,
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Rate of microphone frames sent to the agent
    pub input_sample_rate: u32,
    /// Rate of agent audio received for playback
    pub output_sample_rate: u32,
    pub channels: u16,
    pub frame_duration_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is unset
    pub level: String,
}

impl Config {
    /// Layer built-in defaults, the optional file at `path`, then environment
    ///
    /// Environment keys use the `AGENT_SESSION__` prefix with `__` between
    /// sections, e.g. `AGENT_SESSION__HTTP__PORT=9000`.
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("agent.base_url", "http://localhost:8000")?
            .set_default("agent.reconnect_delay_ms", 5000_i64)?
            .set_default("audio.input_sample_rate", 16000_i64)?
            .set_default("audio.output_sample_rate", 24000_i64)?
            .set_default("audio.channels", 1_i64)?
            .set_default("audio.frame_duration_ms", 100_i64)?
            .set_default("http.enabled", false)?
            .set_default("http.bind", "127.0.0.1")?
            .set_default("http.port", 8080_i64)?
            .set_default("logging.level", "info")?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("AGENT_SESSION")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            if !url.trim().is_empty() {
                builder = builder.set_override("agent.base_url", url)?;
            }
        }

        let settings = builder
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path))?;

        let config: Self = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        anyhow::ensure!(
            audio.input_sample_rate > 0 && audio.output_sample_rate > 0,
            "audio sample rates must be positive (input {}, output {})",
            audio.input_sample_rate,
            audio.output_sample_rate
        );
        anyhow::ensure!(
            (1..=2).contains(&audio.channels),
            "audio.channels must be 1 or 2, got {}",
            audio.channels
        );
        anyhow::ensure!(
            audio.frame_duration_ms > 0,
            "audio.frame_duration_ms must be positive"
        );
        Ok(())
    }

    pub fn capture_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.audio.input_sample_rate,
            target_channels: self.audio.channels,
            frame_duration_ms: self.audio.frame_duration_ms,
        }
    }

    pub fn playback_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.audio.output_sample_rate,
            ..self.capture_config()
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            base_url: self.agent.base_url.clone(),
            reconnect_delay: Duration::from_millis(self.agent.reconnect_delay_ms),
            ..ConnectionConfig::default()
        }
    }

    /// Session settings with a fresh identifier
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connection: self.connection_config(),
            capture: self.capture_config(),
            playback: self.playback_config(),
            ..SessionConfig::default()
        }
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http.bind, self.http.port)
    }
}
