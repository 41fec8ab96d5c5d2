//! Client and game tuning.
//!
//! Both structs follow the same pattern: `new()`/`Default` gives working
//! values, and `with_*` builders adjust single fields.
//!
//! ```
//! use std::time::Duration;
//! use zlehcito_client::config::{ClientConfig, GameConfig};
//!
//! let client = ClientConfig::new("ws://localhost:5000/ws")
//!     .with_send_retry_delay(Duration::from_secs(1));
//! assert_eq!(client.endpoint, "ws://localhost:5000/ws");
//!
//! let game = GameConfig::default().with_max_visible_pairs(4);
//! assert_eq!(game.countdown_seconds, 3);
//! assert_eq!(game.max_visible_pairs, 4);
//! ```

use std::time::Duration;

/// Production game server.
pub const DEFAULT_ENDPOINT: &str = "wss://zlehcito.cz/ws";

/// Environment variable that overrides [`DEFAULT_ENDPOINT`] in [`ClientConfig::from_env`].
pub const ENDPOINT_ENV_VAR: &str = "ZLEHCITO_URL";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SEND_RETRY_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_FRAME_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

const DEFAULT_COUNTDOWN_SECONDS: u32 = 3;
const DEFAULT_COUNTDOWN_TICK: Duration = Duration::from_secs(1);
const DEFAULT_MAX_VISIBLE_PAIRS: usize = 5;
const DEFAULT_FEEDBACK_DURATION: Duration = Duration::from_secs(1);

// ── ClientConfig ────────────────────────────────────────────────────

/// Connection-level configuration shared by every model on one session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the game server.
    pub endpoint: String,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// How long a send issued while disconnected waits for the reconnect
    /// before it is dropped. No backoff or jitter.
    pub send_retry_delay: Duration,
    /// Capacity of the inbound frame channel between the connection loop
    /// and the router. Values below 1 are clamped to 1.
    pub frame_channel_capacity: usize,
    /// Time given to background tasks to exit on shutdown before they are aborted.
    pub shutdown_timeout: Duration,
}

impl ClientConfig {
    /// Configuration for `endpoint` with default timings.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_retry_delay: DEFAULT_SEND_RETRY_DELAY,
            frame_channel_capacity: DEFAULT_FRAME_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Default configuration, with the endpoint taken from `ZLEHCITO_URL` if set.
    pub fn from_env() -> Self {
        match std::env::var(ENDPOINT_ENV_VAR) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_send_retry_delay(mut self, delay: Duration) -> Self {
        self.send_retry_delay = delay;
        self
    }

    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_frame_channel_capacity(mut self, capacity: usize) -> Self {
        self.frame_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

// ── GameConfig ──────────────────────────────────────────────────────

/// Tuning for a running game session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameConfig {
    /// Countdown length before each round, in ticks.
    pub countdown_seconds: u32,
    /// Length of one countdown tick.
    pub countdown_tick: Duration,
    /// Size of the visible window in Connecting mode. Clamped to at least 1.
    pub max_visible_pairs: usize,
    /// How long correct/incorrect feedback stays visible in Connecting mode.
    pub feedback_duration: Duration,
    /// Fixed seed for the Connecting-mode display shuffle. `None` seeds from the OS.
    pub shuffle_seed: Option<u64>,
}

impl GameConfig {
    pub fn new() -> Self {
        Self {
            countdown_seconds: DEFAULT_COUNTDOWN_SECONDS,
            countdown_tick: DEFAULT_COUNTDOWN_TICK,
            max_visible_pairs: DEFAULT_MAX_VISIBLE_PAIRS,
            feedback_duration: DEFAULT_FEEDBACK_DURATION,
            shuffle_seed: None,
        }
    }

    #[must_use]
    pub fn with_countdown(mut self, seconds: u32, tick: Duration) -> Self {
        self.countdown_seconds = seconds;
        self.countdown_tick = tick;
        self
    }

    #[must_use]
    pub fn with_max_visible_pairs(mut self, max: usize) -> Self {
        self.max_visible_pairs = max.max(1);
        self
    }

    #[must_use]
    pub fn with_feedback_duration(mut self, duration: Duration) -> Self {
        self.feedback_duration = duration;
        self
    }

    /// Make the Connecting-mode shuffle reproducible.
    #[must_use]
    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self::new()
    }
}
