use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use uuid::Uuid;

/// Command line options for the server.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Directory holding the database.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Print a bearer token for the given profile id and exit.
    #[arg(long, value_name = "PROFILE_ID")]
    pub issue_token: Option<Uuid>,
    /// Create a profile, print its id and a bearer token, and exit.
    #[arg(long, value_name = "NAME", conflicts_with = "issue_token")]
    pub create_profile: Option<String>,
}

/// HMAC secret used to sign and verify bearer tokens.
#[derive(Clone)]
pub struct JwtSecret {
    secret: String,
    generated: bool,
}

impl JwtSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            generated: false,
        }
    }

    /// A random secret for deployments that did not configure one.
    pub fn ephemeral() -> Self {
        Self {
            secret: format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()),
            generated: true,
        }
    }

    /// True when the secret was generated for this process only.
    pub fn is_ephemeral(&self) -> bool {
        self.generated
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.secret.as_bytes()
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JwtSecret(<redacted>)")
    }
}

/// First profile and server created on an empty database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bootstrap {
    pub profile: String,
    pub server: String,
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Directory holding `parley.db`.
    pub data_dir: PathBuf,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    pub jwt_secret: JwtSecret,
    /// Seed data, consumed on first run.
    pub bootstrap: Option<Bootstrap>,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    auth: FileAuth,
    #[serde(default)]
    bootstrap: Option<FileBootstrap>,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize, Default)]
struct FileAuth {
    jwt_secret: Option<String>,
}

#[derive(Deserialize)]
struct FileBootstrap {
    profile: String,
    #[serde(default = "default_server_name")]
    server: String,
}

fn default_port() -> u16 {
    8787
}

fn default_logging() -> bool {
    true
}

fn default_server_name() -> String {
    "Home".into()
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut port = default_port();
        let mut logging = default_logging();
        let mut secret: Option<String> = None;
        let mut bootstrap = None;

        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("PARLEY_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/parley.toml"));

        if let Ok(bytes) = fs::read(&config_path) {
            let contents = String::from_utf8_lossy(&bytes);
            let file_cfg: FileConfig = toml::from_str(&contents).context("invalid config file")?;
            port = file_cfg.server.port;
            logging = file_cfg.logging.enabled;
            secret = file_cfg.auth.jwt_secret;
            bootstrap = file_cfg.bootstrap.map(|b| Bootstrap {
                profile: b.profile,
                server: b.server,
            });
        }

        // environment overrides
        if let Ok(p) = std::env::var("PARLEY_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("PARLEY_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }
        if let Ok(s) = std::env::var("PARLEY_JWT_SECRET") {
            secret = Some(s);
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }

        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| std::env::var("DATA_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        let jwt_secret = match secret.filter(|s| !s.is_empty()) {
            Some(s) => JwtSecret::new(s),
            None => JwtSecret::ephemeral(),
        };

        Ok(Self {
            bind,
            data_dir,
            logging_enabled: logging,
            jwt_secret,
            bootstrap,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("parley.db")
    }
}

/// Determine the default data directory.
pub fn default_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".local/share/parley");
        p
    } else {
        PathBuf::from("./parley_data")
    }
}
