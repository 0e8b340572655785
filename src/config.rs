use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Lavalink
    pub lavalink_host: String,
    pub lavalink_port: u16,
    pub lavalink_password: String,
    pub ssl_enabled: bool,
    pub search_prefix: String,

    // Audio
    pub bot_volume: u16,

    // Apariencia del panel
    pub now_playing_spin_gif_url: Option<String>,
    pub no_song_playing_image_url: Option<String>,

    // Paths
    pub data_dir: PathBuf,

    // Logging
    pub log_level: String,

    // Dashboard
    pub dashboard_enabled: bool,
    pub dashboard_host: String,
    pub dashboard_port: u16,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("No se pudo crear el directorio {}", config.data_dir.display())
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// `load` passes the process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let discord_token = var("DISCORD_BOT_TOKEN")
            .or_else(|| var("DISCORD_TOKEN"))
            .ok_or_else(|| anyhow::anyhow!("DISCORD_BOT_TOKEN (o DISCORD_TOKEN) no está definido"))?;

        Ok(Self {
            discord_token,
            guild_id: var("GUILD_ID").map(|s| s.parse::<u64>()).transpose()
                .context("GUILD_ID inválido")?,

            lavalink_host: or("LAVALINK_HOST", "localhost"),
            lavalink_port: or("LAVALINK_PORT", "2333").parse::<u16>()
                .context("LAVALINK_PORT inválido")?,
            lavalink_password: or("LAVALINK_PASSWORD", "youshallnotpass"),
            ssl_enabled: parse_flag(var("SSL_ENABLED")),
            search_prefix: or("SEARCH_PREFIX", "ytsearch"),

            bot_volume: or("BOT_VOLUME", "100").parse::<u16>()
                .context("BOT_VOLUME inválido")?,

            now_playing_spin_gif_url: var("NOW_PLAYING_SPIN_GIF_URL"),
            no_song_playing_image_url: var("NO_SONG_PLAYING_IMAGE_URL"),

            data_dir: or("DATA_DIR", "./data").into(),

            log_level: or("LOG_LEVEL", "info").to_lowercase(),

            dashboard_enabled: parse_flag(var("DASHBOARD_ENABLED")),
            dashboard_host: or("DASHBOARD_HOST", "127.0.0.1"),
            dashboard_port: or("DASHBOARD_PORT", "5000").parse::<u16>()
                .context("DASHBOARD_PORT inválido")?,
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The Discord token must not be blank
    /// - The Lavalink port must be non-zero
    /// - Volume must be between 0 and 1000 (Lavalink's accepted range)
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        if self.lavalink_port == 0 {
            anyhow::bail!("Lavalink port must be greater than 0");
        }

        if self.bot_volume > 1000 {
            anyhow::bail!("Bot volume must be between 0 and 1000, got: {}", self.bot_volume);
        }

        if self.dashboard_enabled && self.dashboard_port == 0 {
            anyhow::bail!("Dashboard port must be greater than 0");
        }

        Ok(())
    }

    /// Base URL for the Lavalink REST API, e.g. `http://localhost:2333`.
    pub fn lavalink_rest_url(&self) -> String {
        let scheme = if self.ssl_enabled { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.lavalink_host, self.lavalink_port)
    }

    /// Websocket endpoint of the Lavalink node.
    pub fn lavalink_ws_url(&self) -> String {
        let scheme = if self.ssl_enabled { "wss" } else { "ws" };
        format!("{}://{}:{}/v4/websocket", scheme, self.lavalink_host, self.lavalink_port)
    }

    pub fn setup_channels_path(&self) -> PathBuf {
        self.data_dir.join("setup_channels.json")
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and passwords are never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Lavalink: {} (ssl={}, search={})\n  \
            Audio: volume {}\n  \
            Data: {}\n  \
            Dashboard: {}",
            self.guild_id.map_or("global".to_string(), |id| format!("guild {}", id)),
            self.lavalink_rest_url(),
            self.ssl_enabled,
            self.search_prefix,
            self.bot_volume,
            self.data_dir.display(),
            if self.dashboard_enabled {
                format!("http://{}:{}", self.dashboard_host, self.dashboard_port)
            } else {
                "disabled".to_string()
            }
        )
    }
}

fn parse_flag(value: Option<String>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            guild_id: None,

            lavalink_host: "localhost".into(),
            lavalink_port: 2333,
            lavalink_password: "youshallnotpass".into(),
            ssl_enabled: false,
            search_prefix: "ytsearch".into(),

            bot_volume: 100,

            now_playing_spin_gif_url: None,
            no_song_playing_image_url: None,

            data_dir: "./data".into(),

            log_level: "info".into(),

            dashboard_enabled: false,
            dashboard_host: "127.0.0.1".into(),
            dashboard_port: 5000,
        }
    }
}
