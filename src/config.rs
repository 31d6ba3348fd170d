use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub backend: BackendConfig,
    pub audio: AudioConfig,
    pub session: SessionLimits,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the homework API, e.g. "https://coach.example.com/api/homework"
    pub base_url: String,
    /// Bearer token; the HOMEWORK_TOKEN environment variable overrides this
    pub auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Deserialize)]
pub struct SessionLimits {
    /// Chunk cadence in seconds
    pub chunk_seconds: u64,
    /// Maximum recording duration in seconds
    pub max_duration_seconds: u64,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        let mut cfg: Config = settings.try_deserialize()?;

        if let Ok(token) = std::env::var("HOMEWORK_TOKEN") {
            if !token.is_empty() {
                cfg.backend.auth_token = Some(token);
            }
        }

        Ok(cfg)
    }
}
