use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::audio::engine::EngineSettings;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Reproducción
    pub max_queue_size: usize,
    pub prefetch_concurrency: usize,
    pub command_buffer: usize,
    pub connect_timeout: Duration,

    // Caché
    pub source_cache_size: usize,
    pub source_cache_ttl: Option<Duration>,
    pub maintenance_interval: Duration,

    // yt-dlp
    pub ytdlp_path: PathBuf,
    pub ytdlp_cookies: Option<PathBuf>,
    pub max_audio_bytes: u64,

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    /// Builds the configuration from an arbitrary variable source, applying
    /// defaults and validation.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            // Discord
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            application_id: parse(
                "APPLICATION_ID",
                var("APPLICATION_ID").context("APPLICATION_ID no definido")?,
            )?,
            guild_id: var("GUILD_ID").map(|v| parse("GUILD_ID", v)).transpose()?,

            // Reproducción
            max_queue_size: var("MAX_QUEUE_SIZE")
                .map(|v| parse("MAX_QUEUE_SIZE", v))
                .transpose()?
                .unwrap_or(defaults.max_queue_size),
            prefetch_concurrency: var("PREFETCH_CONCURRENCY")
                .map(|v| parse("PREFETCH_CONCURRENCY", v))
                .transpose()?
                .unwrap_or(defaults.prefetch_concurrency),
            command_buffer: var("COMMAND_BUFFER")
                .map(|v| parse("COMMAND_BUFFER", v))
                .transpose()?
                .unwrap_or(defaults.command_buffer),
            connect_timeout: var("CONNECT_TIMEOUT")
                .map(|v| duration("CONNECT_TIMEOUT", v))
                .transpose()?
                .unwrap_or(defaults.connect_timeout),

            // Caché
            source_cache_size: var("SOURCE_CACHE_SIZE")
                .map(|v| parse("SOURCE_CACHE_SIZE", v))
                .transpose()?
                .unwrap_or(defaults.source_cache_size),
            source_cache_ttl: var("SOURCE_CACHE_TTL")
                .map(|v| duration("SOURCE_CACHE_TTL", v))
                .transpose()?,
            maintenance_interval: var("MAINTENANCE_INTERVAL")
                .map(|v| duration("MAINTENANCE_INTERVAL", v))
                .transpose()?
                .unwrap_or(defaults.maintenance_interval),

            // yt-dlp
            ytdlp_path: var("YTDLP_PATH").map(PathBuf::from).unwrap_or(defaults.ytdlp_path),
            ytdlp_cookies: var("YTDLP_COOKIES").map(PathBuf::from),
            max_audio_bytes: var("MAX_AUDIO_BYTES")
                .map(|v| parse("MAX_AUDIO_BYTES", v))
                .transpose()?
                .unwrap_or(defaults.max_audio_bytes),

            // Paths
            data_dir: var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Application and guild ids must be non-zero
    /// - Queue, cache and channel sizes must be greater than 0
    /// - Connect timeout must be between 1s and 2 minutes
    /// - The maintenance interval must be at least one second
    /// - The download cap must be at least 1 MiB
    pub fn validate(&self) -> Result<()> {
        if self.application_id == 0 || self.guild_id == Some(0) {
            anyhow::bail!("Discord ids must be non-zero");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.prefetch_concurrency == 0 {
            anyhow::bail!("Prefetch concurrency must be greater than 0");
        }

        if self.command_buffer == 0 {
            anyhow::bail!("Command buffer must be greater than 0");
        }

        if self.source_cache_size == 0 {
            anyhow::bail!("Source cache size must be greater than 0");
        }

        if self.connect_timeout < Duration::from_secs(1) || self.connect_timeout > Duration::from_secs(120) {
            anyhow::bail!(
                "Connect timeout must be between 1s and 2m, got: {}",
                humantime::format_duration(self.connect_timeout)
            );
        }

        if self.maintenance_interval < Duration::from_secs(1) {
            anyhow::bail!("Maintenance interval must be at least 1s");
        }

        if self.max_audio_bytes < 1024 * 1024 {
            anyhow::bail!("Max audio size must be at least 1 MiB, got: {}", self.max_audio_bytes);
        }

        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_queue_size: self.max_queue_size,
            prefetch_concurrency: self.prefetch_concurrency,
            command_buffer: self.command_buffer,
            connect_timeout: self.connect_timeout,
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the token and the cookies path.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Playback: {} queue, {} prefetch, {} connect timeout\n  \
            Cache: {} songs, TTL {}, maintenance every {}\n  \
            Resolver: {} (cookies: {}), {} MiB max",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.max_queue_size,
            self.prefetch_concurrency,
            humantime::format_duration(self.connect_timeout),
            self.source_cache_size,
            self.source_cache_ttl
                .map_or("none".to_string(), |ttl| humantime::format_duration(ttl).to_string()),
            humantime::format_duration(self.maintenance_interval),
            self.ytdlp_path.display(),
            if self.ytdlp_cookies.is_some() { "yes" } else { "no" },
            self.max_audio_bytes / (1024 * 1024),
        )
    }
}

fn parse<T>(key: &str, raw: String) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{} inválido: {:?}", key, raw))
}

fn duration(key: &str, raw: String) -> Result<Duration> {
    humantime::parse_duration(raw.trim()).with_context(|| format!("{} inválido: {:?}", key, raw))
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            // Playback defaults
            max_queue_size: 100,
            prefetch_concurrency: 2,
            command_buffer: 256,
            connect_timeout: Duration::from_secs(15),

            // Cache defaults
            source_cache_size: 64,
            source_cache_ttl: None,
            maintenance_interval: Duration::from_secs(600),

            // yt-dlp defaults
            ytdlp_path: "yt-dlp".into(),
            ytdlp_cookies: None,
            max_audio_bytes: 64 * 1024 * 1024,

            // Path defaults
            data_dir: "/app/data".into(),
        }
    }
}
