//! CLI flags plus an optional TOML file, merged into the plain data the
//! rest of the crate (and `profile-core`) reads from. Mirrors the donor
//! node's CLI-first, file-overridable `CliConfig`/`Config` split, but a
//! server here listens on five ports (one per role) instead of one.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use profile_core::config::{CoreConfig, RolePorts, ServerIdentity};
use serde::Deserialize;
use structopt::StructOpt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(String, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(String, toml::de::Error),
    #[error("advertised-ip {0} is not a valid IP address")]
    BadAdvertisedIp(String),
}

#[derive(Debug, StructOpt)]
#[structopt(name = "profile-server", about = "Federated identity profile server")]
pub struct CliConfig {
    /// TOML file overlaying these defaults; CLI flags still win when both are given.
    #[structopt(long, parse(from_os_str))]
    pub config_file: Option<PathBuf>,

    /// Directory holding the server's Ed25519 key and the in-process data the
    /// in-memory stores would otherwise lose on restart.
    #[structopt(long, default_value = "/var/lib/profile-server", parse(from_os_str))]
    pub data_dir: PathBuf,

    /// TLS certificate chain (PEM) presented on every role port but Primary.
    #[structopt(long, parse(from_os_str))]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key (PEM) matching `tls_cert`.
    #[structopt(long, parse(from_os_str))]
    pub tls_key: Option<PathBuf>,

    /// IP address advertised to peers as this server's own neighbor address.
    #[structopt(long)]
    pub advertised_ip: Option<String>,

    #[structopt(long, default_value = "2077")]
    pub primary_port: u16,
    #[structopt(long, default_value = "2078")]
    pub cl_customer_port: u16,
    #[structopt(long, default_value = "2079")]
    pub cl_non_customer_port: u16,
    #[structopt(long, default_value = "2080")]
    pub cl_app_service_port: u16,
    #[structopt(long, default_value = "2081")]
    pub sr_neighbor_port: u16,

    #[structopt(long, default_value = "10000")]
    pub max_hosted_identities: u32,
    #[structopt(long, default_value = "1000")]
    pub max_follower_servers: u32,
    #[structopt(long, default_value = "4")]
    pub neighborhood_initialization_parallelism: u32,
    #[structopt(long, default_value = "50")]
    pub max_identity_relations: u32,

    /// Accepts neighbor-initialization peers advertising a loopback/private
    /// address, which §4.F.1 otherwise rejects; for local multi-node testing.
    #[structopt(long)]
    pub test_mode: bool,
}

/// The subset of [`CliConfig`] a TOML file may override. Every field is
/// optional so a file can patch in just the ports, or just the TLS paths.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub advertised_ip: Option<String>,
    pub primary_port: Option<u16>,
    pub cl_customer_port: Option<u16>,
    pub cl_non_customer_port: Option<u16>,
    pub cl_app_service_port: Option<u16>,
    pub sr_neighbor_port: Option<u16>,
    pub max_hosted_identities: Option<u32>,
    pub max_follower_servers: Option<u32>,
    pub neighborhood_initialization_parallelism: Option<u32>,
    pub max_identity_relations: Option<u32>,
    pub test_mode: Option<bool>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(path.display().to_string(), e))
    }
}

/// Everything `bin/profile-server.rs` needs to build a [`profile_core::Core`]
/// and bind its listeners, resolved once at startup.
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub advertised_ip: IpAddr,
    pub role_ports: RolePorts,
    pub core: CoreConfig,
}

impl ServerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut cli = CliConfig::from_args();
        if let Some(path) = &cli.config_file {
            let file = FileConfig::load(path)?;
            apply_file_overrides(&mut cli, file);
        }

        let advertised_ip = cli
            .advertised_ip
            .as_deref()
            .unwrap_or("127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::BadAdvertisedIp(cli.advertised_ip.clone().unwrap_or_default()))?;

        Ok(Self {
            data_dir: cli.data_dir,
            tls_cert: cli.tls_cert,
            tls_key: cli.tls_key,
            advertised_ip,
            role_ports: RolePorts {
                primary: cli.primary_port,
                cl_customer: cli.cl_customer_port,
                cl_non_customer: cli.cl_non_customer_port,
                cl_app_service: cli.cl_app_service_port,
                sr_neighbor: cli.sr_neighbor_port,
            },
            core: CoreConfig {
                max_hosted_identities: cli.max_hosted_identities,
                max_follower_servers: cli.max_follower_servers,
                neighborhood_initialization_parallelism: cli.neighborhood_initialization_parallelism,
                max_identity_relations: cli.max_identity_relations,
                test_mode: cli.test_mode,
            },
        })
    }

    pub fn key_path(&self) -> PathBuf {
        self.data_dir.join("server.key")
    }

    pub fn server_identity(&self, signer: &profile_crypto::Ed25519Signer) -> ServerIdentity {
        ServerIdentity { server_id: signer.identity_id() }
    }
}

/// CLI flags take precedence; a file value only fills in a flag still at
/// its structopt default. `test_mode`/ports compare against the
/// `CliConfig` defaults directly since structopt gives us no "was this
/// explicitly passed" bit without a hand-rolled `Option<T>` for every flag.
fn apply_file_overrides(cli: &mut CliConfig, file: FileConfig) {
    if cli.tls_cert.is_none() {
        cli.tls_cert = file.tls_cert;
    }
    if cli.tls_key.is_none() {
        cli.tls_key = file.tls_key;
    }
    if cli.advertised_ip.is_none() {
        cli.advertised_ip = file.advertised_ip;
    }
    if let Some(v) = file.data_dir {
        cli.data_dir = v;
    }
    if let Some(v) = file.primary_port {
        cli.primary_port = v;
    }
    if let Some(v) = file.cl_customer_port {
        cli.cl_customer_port = v;
    }
    if let Some(v) = file.cl_non_customer_port {
        cli.cl_non_customer_port = v;
    }
    if let Some(v) = file.cl_app_service_port {
        cli.cl_app_service_port = v;
    }
    if let Some(v) = file.sr_neighbor_port {
        cli.sr_neighbor_port = v;
    }
    if let Some(v) = file.max_hosted_identities {
        cli.max_hosted_identities = v;
    }
    if let Some(v) = file.max_follower_servers {
        cli.max_follower_servers = v;
    }
    if let Some(v) = file.neighborhood_initialization_parallelism {
        cli.neighborhood_initialization_parallelism = v;
    }
    if let Some(v) = file.max_identity_relations {
        cli.max_identity_relations = v;
    }
    if let Some(v) = file.test_mode {
        cli.test_mode = v;
    }
}
