use clap::{Parser, ValueEnum};
use jiff::Timestamp;
use raindrop_storage::{TimeUnit, DEFAULT_TABLE_NAME};
use raindrop_flake::encoder::DEFAULT_MAX_NAMESPACES;
use raindrop_worker::RaindropConfig;
use std::fmt::{Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

pub const LISTEN_ADDR_ENV: &str = "RAINDROP_LISTEN_ADDR";
pub const STORAGE_BACKEND_ENV: &str = "RAINDROP_STORAGE_BACKEND";
pub const DATABASE_URL_ENV: &str = "RAINDROP_DATABASE_URL";
pub const TABLE_NAME_ENV: &str = "RAINDROP_TABLE_NAME";
pub const TIME_UNIT_ENV: &str = "RAINDROP_TIME_UNIT";
pub const START_TIME_ENV: &str = "RAINDROP_START_TIME";
pub const TIMESTAMP_BITS_ENV: &str = "RAINDROP_TIMESTAMP_BITS";
pub const WORKER_ID_BITS_ENV: &str = "RAINDROP_WORKER_ID_BITS";
pub const MIN_WORKER_ID_ENV: &str = "RAINDROP_MIN_WORKER_ID";
pub const MAX_WORKER_ID_ENV: &str = "RAINDROP_MAX_WORKER_ID";
pub const RESERVED_BITS_ENV: &str = "RAINDROP_RESERVED_BITS";
pub const RESERVED_VALUE_ENV: &str = "RAINDROP_RESERVED_VALUE";
pub const HEARTBEAT_INTERVAL_ENV: &str = "RAINDROP_HEARTBEAT_INTERVAL_MS";
pub const MAX_CLOCK_SKEW_ENV: &str = "RAINDROP_MAX_CLOCK_SKEW_MS";
pub const PREFER_OWN_SLOT_ENV: &str = "RAINDROP_PREFER_OWN_SLOT";
pub const MAX_NAMESPACES_ENV: &str = "RAINDROP_MAX_NAMESPACES";
pub const HOST_IP_ENV: &str = "RAINDROP_HOST_IP";
pub const LOG_FORMAT_ENV: &str = "RAINDROP_LOG_FORMAT";

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "in-memory")]
    InMemory,
    #[value(name = "mysql")]
    Mysql,
    #[value(name = "postgres")]
    Postgres,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::InMemory => write!(f, "in-memory"),
            StorageBackendArg::Mysql => write!(f, "mysql"),
            StorageBackendArg::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "raindrop-server", about = "Serves Raindrop IDs over HTTP")]
pub struct Cli {
    #[arg(long, env = LISTEN_ADDR_ENV, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen_addr: SocketAddr,

    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::InMemory
    )]
    pub storage: StorageBackendArg,

    #[arg(
        long,
        env = DATABASE_URL_ENV,
        required_if_eq_any([("storage", "mysql"), ("storage", "postgres")])
    )]
    pub database_url: Option<String>,

    #[arg(long, env = TABLE_NAME_ENV, default_value = DEFAULT_TABLE_NAME)]
    pub table_name: String,

    /// One of ms, s, min, h, d.
    #[arg(long, env = TIME_UNIT_ENV, default_value = "s")]
    pub time_unit: TimeUnit,

    /// Epoch of the timestamp field, RFC 3339.
    #[arg(long, env = START_TIME_ENV)]
    pub start_time: Option<Timestamp>,

    #[arg(long, env = TIMESTAMP_BITS_ENV)]
    pub timestamp_bits: Option<u8>,

    #[arg(long, env = WORKER_ID_BITS_ENV, default_value_t = 4)]
    pub worker_id_bits: u8,

    #[arg(long, env = MIN_WORKER_ID_ENV, default_value_t = 1)]
    pub min_worker_id: i64,

    #[arg(long, env = MAX_WORKER_ID_ENV, default_value_t = 15)]
    pub max_worker_id: i64,

    #[arg(long, env = RESERVED_BITS_ENV, default_value_t = 0)]
    pub reserved_bits: u8,

    #[arg(long, env = RESERVED_VALUE_ENV, default_value_t = 0)]
    pub reserved_value: i64,

    #[arg(long, env = HEARTBEAT_INTERVAL_ENV, default_value_t = 5_000)]
    pub heartbeat_interval_ms: u64,

    #[arg(long, env = MAX_CLOCK_SKEW_ENV, default_value_t = 30_000)]
    pub max_clock_skew_ms: u64,

    #[arg(long, env = PREFER_OWN_SLOT_ENV)]
    pub prefer_own_slot: bool,

    /// Most distinct codes served under `/v1/ids/{code}`.
    #[arg(long, env = MAX_NAMESPACES_ENV, default_value_t = DEFAULT_MAX_NAMESPACES)]
    pub max_namespaces: usize,

    /// Address recorded in the node identity instead of the detected one.
    #[arg(long, env = HOST_IP_ENV)]
    pub host_ip: Option<IpAddr>,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Generator settings; the service port is the listen port.
    pub fn raindrop_config(&self) -> RaindropConfig {
        let mut config = RaindropConfig::builder()
            .service_port(self.listen_addr.port())
            .time_unit(self.time_unit)
            .worker_id_bits(self.worker_id_bits)
            .min_worker_id(self.min_worker_id)
            .max_worker_id(self.max_worker_id)
            .reserved_bits(self.reserved_bits)
            .reserved_value(self.reserved_value)
            .heartbeat_interval(Duration::from_millis(self.heartbeat_interval_ms))
            .max_clock_skew(Duration::from_millis(self.max_clock_skew_ms))
            .prefer_own_slot(self.prefer_own_slot)
            .max_namespaces(self.max_namespaces)
            .build();

        if let Some(start_time) = self.start_time {
            config.start_time = start_time;
        }
        config.timestamp_bits = self.timestamp_bits;
        config.host_ip = self.host_ip;
        config
    }
}
