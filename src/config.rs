use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Social reading tracker: collections, reviews and favorite books.
#[derive(Parser, Debug, Clone)]
#[command(name = "mybook")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "MYBOOK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new, already verified user.
    Add {
        /// Username.
        username: String,
        /// Email address.
        #[arg(short, long)]
        email: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
        /// User role (admin or user).
        #[arg(short, long, default_value = "user")]
        role: String,
    },

    /// Delete a user.
    Del {
        /// Username to delete.
        username: String,
    },

    /// List all users.
    List,

    /// Change user password.
    Passwd {
        /// Username.
        username: String,
        /// New password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Grant the admin role, or revoke it with `--revoke`.
    Promote {
        /// Username.
        username: String,
        /// Demote back to a regular user.
        #[arg(long)]
        revoke: bool,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Book catalog configuration.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Upload configuration.
    #[serde(default)]
    pub uploads: UploadsConfig,

    /// Statistics configuration.
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Externally visible base URL, used in emailed links.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: default_public_url(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/mybook.db")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Registration mode: "open", "disabled".
    #[serde(default = "default_registration")]
    pub registration: String,

    /// Session token duration in days.
    #[serde(default = "default_session_days")]
    pub session_days: u32,

    /// Refuse logins until the email address is confirmed.
    #[serde(default = "default_require_verification")]
    pub require_verification: bool,

    /// Expired session purge interval in seconds (0 to disable).
    #[serde(default = "default_session_cleanup")]
    pub session_cleanup_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            registration: default_registration(),
            session_days: default_session_days(),
            require_verification: default_require_verification(),
            session_cleanup_seconds: default_session_cleanup(),
        }
    }
}

fn default_registration() -> String {
    "open".to_string()
}

fn default_session_days() -> u32 {
    30
}

fn default_require_verification() -> bool {
    true
}

fn default_session_cleanup() -> u64 {
    3600
}

impl AuthConfig {
    /// Check if registration is enabled.
    pub fn registration_enabled(&self) -> bool {
        self.registration == "open"
    }
}

/// Book catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Base URL of a Google Books compatible API.
    #[serde(default = "default_catalog_url")]
    pub base_url: String,

    /// Optional API key sent as `key`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Optional language restriction for searches (e.g. "fr").
    #[serde(default)]
    pub language: Option<String>,

    /// How long lookups and searches stay cached, in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Minimum delay between two outgoing requests, in milliseconds.
    #[serde(default)]
    pub throttle_ms: u64,

    /// Request timeout in seconds.
    #[serde(default = "default_catalog_timeout")]
    pub timeout_seconds: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_url(),
            api_key: None,
            language: None,
            cache_ttl_seconds: default_cache_ttl(),
            throttle_ms: 0,
            timeout_seconds: default_catalog_timeout(),
        }
    }
}

fn default_catalog_url() -> String {
    "https://www.googleapis.com/books/v1".to_string()
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_catalog_timeout() -> u64 {
    10
}

/// Upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    /// Directory for stored avatars.
    #[serde(default = "default_avatars_dir")]
    pub avatars_dir: PathBuf,

    /// Largest accepted avatar, in bytes.
    #[serde(default = "default_max_avatar_bytes")]
    pub max_avatar_bytes: usize,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            avatars_dir: default_avatars_dir(),
            max_avatar_bytes: default_max_avatar_bytes(),
        }
    }
}

fn default_avatars_dir() -> PathBuf {
    PathBuf::from("data/avatars")
}

fn default_max_avatar_bytes() -> usize {
    5 * 1024 * 1024
}

/// Statistics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Books per year each user aims for.
    #[serde(default = "default_reading_goal")]
    pub reading_goal: u32,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            reading_goal: default_reading_goal(),
        }
    }
}

fn default_reading_goal() -> u32 {
    20
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> crate::error::Result<Self> {
        toml::from_str(content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("mybook.toml"),
            dirs::config_dir()
                .map(|p| p.join("mybook").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/mybook/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# mybook configuration

[server]
bind = "0.0.0.0:8080"
# Base URL used in verification emails
public_url = "http://localhost:8080"

[database]
# path = "/var/lib/mybook/mybook.db"

[auth]
# Registration mode: "open" or "disabled"
registration = "open"
# Session duration in days
session_days = 30
# Refuse logins until the email address is confirmed
require_verification = true
# Expired session purge interval in seconds (0 to disable)
session_cleanup_seconds = 3600

[catalog]
base_url = "https://www.googleapis.com/books/v1"
# api_key = "..."
# language = "fr"
cache_ttl_seconds = 300
# Minimum delay between catalog requests in milliseconds
throttle_ms = 0
timeout_seconds = 10

[uploads]
# avatars_dir = "/var/lib/mybook/avatars"
max_avatar_bytes = 5242880

[stats]
# Books per year
reading_goal = 20
"#
        .to_string()
    }
}
