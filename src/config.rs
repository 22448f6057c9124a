//! Node configuration: a YAML file plus command line overrides.

use std::fs;
use std::path::Path;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::chord_util::Identifier;
use crate::error::{ChordError, Result};
use crate::gval;
use crate::logging::LogLevel;
use crate::node_info::PeerRef;

/// How the node enters a ring once it is up.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Bootstrap {
    /// Do nothing; wait for a `create` or `join` RPC.
    #[default]
    Wait,
    Create,
    Join { address: String, port: u16 },
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    /// Address other peers use to reach this node. Defaults to `bind_address`.
    pub advertise_address: Option<String>,
    /// Ring position. Defaults to the hash of `advertise_address:port`.
    pub node_id: Option<Identifier>,
    pub stabilize_interval_ms: u64,
    pub fix_fingers_interval_ms: u64,
    pub check_predecessor_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub bootstrap: Bootstrap,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_address: gval::DEFAULT_BIND_ADDRESS.to_string(),
            port: gval::DEFAULT_PORT,
            advertise_address: None,
            node_id: None,
            stabilize_interval_ms: gval::DEFAULT_STABILIZE_INTERVAL_MS,
            fix_fingers_interval_ms: gval::DEFAULT_FIX_FINGERS_INTERVAL_MS,
            check_predecessor_interval_ms: gval::DEFAULT_CHECK_PREDECESSOR_INTERVAL_MS,
            rpc_timeout_ms: gval::DEFAULT_RPC_TIMEOUT_MS,
            bootstrap: Bootstrap::Wait,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let text = fs::read_to_string(path)?;
        Config::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Config> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let timings = [
            ("stabilize_interval_ms", self.stabilize_interval_ms),
            ("fix_fingers_interval_ms", self.fix_fingers_interval_ms),
            ("check_predecessor_interval_ms", self.check_predecessor_interval_ms),
            ("rpc_timeout_ms", self.rpc_timeout_ms),
        ];
        for (name, value) in timings {
            if value == 0 {
                return Err(ChordError::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.bind_address.is_empty() {
            return Err(ChordError::Config("bind_address must not be empty".to_string()));
        }
        Ok(())
    }

    /// The identity this node announces to the ring.
    pub fn self_peer(&self) -> PeerRef {
        let address = self
            .advertise_address
            .clone()
            .unwrap_or_else(|| self.bind_address.clone());
        match self.node_id {
            Some(id) => PeerRef::new(address, self.port, id),
            None => PeerRef::from_endpoint(address, self.port),
        }
    }

    pub fn stabilize_interval(&self) -> Duration {
        Duration::from_millis(self.stabilize_interval_ms)
    }

    pub fn fix_fingers_interval(&self) -> Duration {
        Duration::from_millis(self.fix_fingers_interval_ms)
    }

    pub fn check_predecessor_interval(&self) -> Duration {
        Duration::from_millis(self.check_predecessor_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Split `HOST:PORT`.
pub fn parse_endpoint(s: &str) -> Result<(String, u16)> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| ChordError::Config(format!("expected HOST:PORT, got {:?}", s)))?;
    if host.is_empty() {
        return Err(ChordError::Config(format!("missing host in {:?}", s)));
    }
    let port = port
        .parse::<u16>()
        .map_err(|e| ChordError::Config(format!("bad port in {:?}: {}", s, e)))?;
    Ok((host.to_string(), port))
}

#[derive(Parser, Debug)]
#[command(about = "A Chord DHT routing peer", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long, default_value_t = LogLevel::Info, value_enum, env = "RUST_CHORD_LOG_LEVEL", global = true)]
    pub log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum Command {
    #[command(about = "Runs a peer: RPC server plus periodic ring maintenance.")]
    Serve(ServeArgs),
    #[command(about = "Asks a running peer which node owns an id or key.")]
    Lookup(LookupArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, short = 'c', env = "RUST_CHORD_CONFIG", help = "YAML config file")]
    pub config: Option<String>,

    #[arg(long)]
    pub bind: Option<String>,

    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    #[arg(long, help = "Address announced to other peers")]
    pub advertise: Option<String>,

    #[arg(long, help = "Ring id; hashed from address:port when absent")]
    pub id: Option<Identifier>,

    #[arg(long, conflicts_with = "join", help = "Start a new ring")]
    pub create: bool,

    #[arg(long, value_name = "HOST:PORT", help = "Join the ring of this peer")]
    pub join: Option<String>,
}

impl ServeArgs {
    /// Load the config file (if any) and lay the flags over it.
    pub fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(advertise) = self.advertise {
            config.advertise_address = Some(advertise);
        }
        if let Some(id) = self.id {
            config.node_id = Some(id);
        }
        if self.create {
            config.bootstrap = Bootstrap::Create;
        }
        if let Some(endpoint) = self.join {
            let (address, port) = parse_endpoint(&endpoint)?;
            config.bootstrap = Bootstrap::Join { address, port };
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct LookupArgs {
    #[arg(long, value_name = "HOST:PORT", help = "Peer to ask")]
    pub peer: String,

    #[arg(long, conflicts_with = "key", required_unless_present = "key")]
    pub id: Option<Identifier>,

    #[arg(long, help = "Key hashed onto the ring")]
    pub key: Option<String>,

    #[arg(long, default_value_t = gval::DEFAULT_RPC_TIMEOUT_MS)]
    pub timeout_ms: u64,
}

impl LookupArgs {
    pub fn target_id(&self) -> Identifier {
        match (&self.id, &self.key) {
            (Some(id), _) => *id,
            (None, Some(key)) => crate::chord_util::hash_str_to_id(key),
            (None, None) => 0,
        }
    }
}
