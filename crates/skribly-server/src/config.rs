use serde::Deserialize;

/// Top-level server configuration, loaded from `skribly.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Directory holding `easy.json` / `medium.json` / `hard.json`.
    pub words_dir: String,
    pub cors: CorsConfig,
    pub game: GameTimings,
    pub rooms: RoomsConfig,
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:5000".to_string(),
            words_dir: "words".to_string(),
            cors: CorsConfig::default(),
            game: GameTimings::default(),
            rooms: RoomsConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Origins allowed to call the API with credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

/// Durations of the engine-controlled phases. The drawing phase duration is
/// per-room (host-chosen), not configured here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameTimings {
    pub word_selection_secs: u64,
    pub results_secs: u64,
    pub intermission_secs: u64,
}

impl Default for GameTimings {
    fn default() -> Self {
        Self {
            word_selection_secs: 10,
            results_secs: 5,
            intermission_secs: 3,
        }
    }
}

/// Room lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Rooms older than this are reaped regardless of occupancy.
    pub max_age_secs: u64,
    pub reap_interval_secs: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 86_400,
            reap_interval_secs: 60,
        }
    }
}

/// Infrastructure limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum chat/guess message length in characters.
    pub max_chat_len: usize,
    /// Outbound message buffer per socket; slow clients past this are skipped.
    pub socket_send_buffer: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_chat_len: 200,
            socket_send_buffer: 256,
        }
    }
}

impl ServerConfig {
    /// Validate configuration, exiting on fatal problems.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(
                addr = %self.listen_addr,
                "listen_addr is not a valid socket address"
            );
            std::process::exit(1);
        }
        if self.game.word_selection_secs == 0
            || self.game.results_secs == 0
            || self.game.intermission_secs == 0
        {
            tracing::error!("game phase durations must all be > 0");
            std::process::exit(1);
        }
        if self.rooms.max_age_secs == 0 {
            tracing::error!("rooms.max_age_secs must be > 0");
            std::process::exit(1);
        }
        if self.rooms.reap_interval_secs == 0 {
            tracing::error!("rooms.reap_interval_secs must be > 0");
            std::process::exit(1);
        }
        if self.limits.max_chat_len == 0 {
            tracing::error!("limits.max_chat_len must be > 0");
            std::process::exit(1);
        }
        if self.limits.socket_send_buffer == 0 {
            tracing::error!("limits.socket_send_buffer must be > 0");
            std::process::exit(1);
        }
    }

    /// Load config from `skribly.toml` if it exists, then apply env var
    /// overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("skribly.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from skribly.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse skribly.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No skribly.toml found, using defaults");
                ServerConfig::default()
            },
        };

        if let Ok(addr) = std::env::var("SKRIBLY_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(dir) = std::env::var("SKRIBLY_WORDS_DIR")
            && !dir.is_empty()
        {
            config.words_dir = dir;
        }
        if let Ok(origins) = std::env::var("SKRIBLY_CORS_ORIGINS")
            && !origins.is_empty()
        {
            config.cors.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = std::env::var("SKRIBLY_WORD_SELECTION_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.game.word_selection_secs = n;
        }
        if let Ok(val) = std::env::var("SKRIBLY_RESULTS_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.game.results_secs = n;
        }
        if let Ok(val) = std::env::var("SKRIBLY_INTERMISSION_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.game.intermission_secs = n;
        }

        config
    }
}
