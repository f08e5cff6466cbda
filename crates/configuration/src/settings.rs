use core_types::Network;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub venue: VenueConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Timing and concurrency parameters for the background loops.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often pending scheduled trades and active scheduled swaps are evaluated.
    #[serde(with = "humantime_serde")]
    pub trigger_interval: Duration,
    /// How often every user's trades and balance are reconciled with the venue.
    #[serde(with = "humantime_serde")]
    pub reconciliation_interval: Duration,
    /// How often the market data snapshot is refreshed.
    #[serde(with = "humantime_serde")]
    pub market_interval: Duration,
    /// Cool-down after an execution claim during which a schedule cannot fire again.
    #[serde(with = "humantime_serde")]
    pub duplicate_guard: Duration,
    /// Half-width of the match window around a recurring slot.
    #[serde(with = "humantime_serde")]
    pub recurring_window: Duration,
    /// Upper bound on schedules or users processed at the same time.
    pub max_concurrency: usize,
    #[serde(with = "humantime_serde")]
    pub venue_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub repository_timeout: Duration,
    /// How long shutdown waits for in-flight ticks before giving up.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            trigger_interval: Duration::from_secs(30),
            reconciliation_interval: Duration::from_secs(5 * 60),
            market_interval: Duration::from_secs(15),
            duplicate_guard: Duration::from_secs(5 * 60),
            recurring_window: Duration::from_secs(5 * 60),
            max_concurrency: 4,
            venue_timeout: Duration::from_secs(15),
            repository_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Connection parameters for the trading venue's REST API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
    /// Network used for the public ticker; users carry their own network.
    pub network: Network,
    pub mainnet_url: String,
    pub testnet_url: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// The symbol whose ticker feeds the market data snapshot.
    pub symbol: String,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            mainnet_url: "https://api.lnmarkets.com".to_string(),
            testnet_url: "https://api.testnet.lnmarkets.com".to_string(),
            request_timeout: Duration::from_secs(10),
            symbol: "BTCUSD".to_string(),
        }
    }
}

impl VenueConfig {
    pub fn base_url(&self, network: Network) -> &str {
        match network {
            Network::Mainnet => &self.mainnet_url,
            Network::Testnet => &self.testnet_url,
        }
    }
}

/// Pool settings. The connection string itself comes from `DATABASE_URL`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` overrides it.
    pub level: String,
    /// When set, logs are also written to a daily rolling file here.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}
