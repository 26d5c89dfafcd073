use std::{net::Ipv4Addr, path::PathBuf};

use clap::Parser;
use serde::Deserialize;

/// STUN/TURN wire-level settings.
#[derive(Deserialize, Debug)]
pub struct Turn {
    /// realm advertised in 401 challenges and used in the long-term key digest.
    #[serde(default = "Turn::realm")]
    pub realm: String,

    /// shared secret for the TURN-REST ephemeral-credential pattern.
    ///
    /// `password = base64(HMAC-SHA1(secret, username))`.
    #[serde(default = "Turn::secret")]
    pub secret: String,

    /// address the UDP/TCP listeners for the STUN/TURN wire bind to.
    #[serde(default = "Turn::listen")]
    pub listen: std::net::SocketAddr,

    /// external IPv4 advertised in XOR-RELAYED-ADDRESS.
    #[serde(default = "Turn::external_ip")]
    pub external_ip: Ipv4Addr,

    /// inclusive UDP port range relay sockets are drawn from.
    #[serde(default = "Turn::relay_port_min")]
    pub relay_port_min: u16,
    #[serde(default = "Turn::relay_port_max")]
    pub relay_port_max: u16,

    /// default/min/max allocation LIFETIME, seconds.
    #[serde(default = "Turn::default_lifetime")]
    pub default_lifetime: u32,
    #[serde(default = "Turn::min_lifetime")]
    pub min_lifetime: u32,
    #[serde(default = "Turn::max_lifetime")]
    pub max_lifetime: u32,

    /// product string sent in the SOFTWARE attribute.
    #[serde(default = "Turn::software")]
    pub software: String,
}

impl Turn {
    fn realm() -> String {
        "waf-edge".to_string()
    }

    fn secret() -> String {
        "change-me".to_string()
    }

    fn listen() -> std::net::SocketAddr {
        "0.0.0.0:3478".parse().unwrap()
    }

    fn external_ip() -> Ipv4Addr {
        Ipv4Addr::new(127, 0, 0, 1)
    }

    fn relay_port_min() -> u16 {
        49152
    }

    fn relay_port_max() -> u16 {
        65535
    }

    fn default_lifetime() -> u32 {
        600
    }

    fn min_lifetime() -> u32 {
        30
    }

    fn max_lifetime() -> u32 {
        3600
    }

    fn software() -> String {
        "waf-edge/0.1".to_string()
    }
}

impl Default for Turn {
    fn default() -> Self {
        Self {
            realm: Self::realm(),
            secret: Self::secret(),
            listen: Self::listen(),
            external_ip: Self::external_ip(),
            relay_port_min: Self::relay_port_min(),
            relay_port_max: Self::relay_port_max(),
            default_lifetime: Self::default_lifetime(),
            min_lifetime: Self::min_lifetime(),
            max_lifetime: Self::max_lifetime(),
            software: Self::software(),
        }
    }
}

/// The signaling/tunnel HTTP+WS surface.
#[derive(Deserialize, Debug)]
pub struct Signal {
    #[serde(default = "Signal::listen")]
    pub listen: std::net::SocketAddr,

    /// both must be set for TLS to be enabled on the signaling port.
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
    #[serde(default)]
    pub tls_key: Option<PathBuf>,

    /// secret admin endpoints accept as a bearer token when no identity
    /// provider is configured (or as a break-glass credential alongside it).
    #[serde(default = "Signal::admin_secret")]
    pub admin_secret: String,

    /// directory served under `/static/*`.
    #[serde(default = "Signal::static_dir")]
    pub static_dir: PathBuf,
}

impl Signal {
    fn listen() -> std::net::SocketAddr {
        "0.0.0.0:8443".parse().unwrap()
    }

    fn admin_secret() -> String {
        "change-me".to_string()
    }

    fn static_dir() -> PathBuf {
        PathBuf::from("./static")
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            tls_cert: None,
            tls_key: None,
            admin_secret: Self::admin_secret(),
            static_dir: Self::static_dir(),
        }
    }
}

/// Contract for the external, out-of-scope identity provider: verify a bearer
/// credential and return a subject + role claims. `mock_auth` bypasses the
/// network call entirely for local development and tests.
#[derive(Deserialize, Debug, Default)]
pub struct IdentityProvider {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub realm: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub mock_auth: bool,
}

#[derive(Deserialize, Debug)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub turn: Turn,
    #[serde(default)]
    pub signal: Signal,
    #[serde(default)]
    pub identity_provider: IdentityProvider,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    /// path to a json5 configuration file; defaults are used when absent.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Config {
    /// Load the CLI, then the configuration file it points at, if any.
    ///
    /// Process-level configuration loading is an out-of-scope external
    /// concern; this only fixes the shape other in-scope components read
    /// from.
    pub fn load() -> anyhow::Result<Self> {
        let cli = Cli::parse();

        Ok(match cli.config {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
                serde_json5::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?
            }
            None => Config::default(),
        })
    }
}
