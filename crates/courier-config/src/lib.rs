//! Environment configuration surface.
//!
//! Three settings are required (the bot token, the user allowlist, and the
//! approved directory roots); everything else has a default and is clamped
//! into a sane range rather than rejected.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const ENV_BOT_TOKEN: &str = "COURIER_BOT_TOKEN";
pub const ENV_ALLOWED_USERS: &str = "COURIER_ALLOWED_USERS";
pub const ENV_APPROVED_DIRS: &str = "COURIER_APPROVED_DIRS";
pub const ENV_IDLE_TIMEOUT_SECS: &str = "COURIER_IDLE_TIMEOUT_SECS";
pub const ENV_EDIT_INTERVAL_SECS: &str = "COURIER_EDIT_INTERVAL_SECS";
pub const ENV_MAX_MESSAGE_LEN: &str = "COURIER_MAX_MESSAGE_LEN";
pub const ENV_MEDIA_GROUP_TIMEOUT_SECS: &str = "COURIER_MEDIA_GROUP_TIMEOUT_SECS";
pub const ENV_AGENT_CONFIG_DIR: &str = "COURIER_AGENT_CONFIG_DIR";
pub const ENV_AGENT_BIN: &str = "COURIER_AGENT_BIN";
pub const ENV_SESSION_GC_HOURS: &str = "COURIER_SESSION_GC_HOURS";
pub const ENV_DB_PATH: &str = "COURIER_DB_PATH";
pub const ENV_WEBHOOK_ADDR: &str = "COURIER_WEBHOOK_ADDR";

const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_EDIT_INTERVAL_SECS: f64 = 2.0;
const DEFAULT_MAX_MESSAGE_LEN: usize = 4000;
const DEFAULT_MEDIA_GROUP_TIMEOUT_SECS: f64 = 1.0;
const DEFAULT_SESSION_GC_HOURS: u64 = 24;
const DEFAULT_AGENT_BIN: &str = "agent";
const DEFAULT_WEBHOOK_ADDR: &str = "127.0.0.1:8484";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[derive(Debug, Clone)]
pub struct CourierConfig {
    pub bot_token: String,
    pub allowed_users: Vec<i64>,
    pub approved_dirs: Vec<PathBuf>,
    pub idle_timeout: Duration,
    pub edit_interval: Duration,
    pub max_message_len: usize,
    pub media_group_timeout: Duration,
    pub agent_config_dir: PathBuf,
    pub agent_binary: PathBuf,
    pub session_gc_hours: u64,
    pub db_path: PathBuf,
    pub webhook_addr: SocketAddr,
}

impl CourierConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = required_string(ENV_BOT_TOKEN)?;
        let allowed_users = parse_allowed_users(&required_string(ENV_ALLOWED_USERS)?)?;
        let approved_dirs = parse_approved_dirs(&required_string(ENV_APPROVED_DIRS)?)?;

        let idle_timeout_secs =
            optional_parse(ENV_IDLE_TIMEOUT_SECS, DEFAULT_IDLE_TIMEOUT_SECS)?.clamp(60, 86_400);
        let edit_interval_secs =
            optional_parse(ENV_EDIT_INTERVAL_SECS, DEFAULT_EDIT_INTERVAL_SECS)?.clamp(0.5, 30.0);
        let max_message_len =
            optional_parse(ENV_MAX_MESSAGE_LEN, DEFAULT_MAX_MESSAGE_LEN)?.clamp(1_000, 4_096);
        let media_group_timeout_secs = optional_parse(
            ENV_MEDIA_GROUP_TIMEOUT_SECS,
            DEFAULT_MEDIA_GROUP_TIMEOUT_SECS,
        )?
        .clamp(0.2, 10.0);
        let session_gc_hours =
            optional_parse(ENV_SESSION_GC_HOURS, DEFAULT_SESSION_GC_HOURS)?.max(1);

        let agent_config_dir = match optional_string(ENV_AGENT_CONFIG_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => default_agent_config_dir(),
        };
        let agent_binary = PathBuf::from(
            optional_string(ENV_AGENT_BIN).unwrap_or_else(|| DEFAULT_AGENT_BIN.to_owned()),
        );
        let db_path = match optional_string(ENV_DB_PATH) {
            Some(path) => PathBuf::from(path),
            None => default_data_dir().join("courier.db"),
        };
        let webhook_addr = optional_string(ENV_WEBHOOK_ADDR)
            .unwrap_or_else(|| DEFAULT_WEBHOOK_ADDR.to_owned())
            .parse::<SocketAddr>()
            .map_err(|err| {
                ConfigError::configuration(format!("{ENV_WEBHOOK_ADDR} is not a socket address: {err}"))
            })?;

        Ok(Self {
            bot_token,
            allowed_users,
            approved_dirs,
            idle_timeout: Duration::from_secs(idle_timeout_secs),
            edit_interval: Duration::from_secs_f64(edit_interval_secs),
            max_message_len,
            media_group_timeout: Duration::from_secs_f64(media_group_timeout_secs),
            agent_config_dir,
            agent_binary,
            session_gc_hours,
            db_path,
            webhook_addr,
        })
    }

    pub fn is_user_allowed(&self, user_id: i64) -> bool {
        self.allowed_users.contains(&user_id)
    }

    /// The first approved root doubles as the default working directory.
    pub fn default_directory(&self) -> &PathBuf {
        &self.approved_dirs[0]
    }
}

fn required_string(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_owned()),
        Ok(_) | Err(std::env::VarError::NotPresent) => Err(ConfigError::configuration(format!(
            "required setting {name} is missing"
        ))),
        Err(_) => Err(ConfigError::configuration(format!(
            "{name} contained invalid UTF-8"
        ))),
    }
}

fn optional_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn optional_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match optional_string(name) {
        Some(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::configuration(format!("{name} has an unparseable value '{raw}'"))
        }),
        None => Ok(default),
    }
}

fn parse_allowed_users(raw: &str) -> Result<Vec<i64>, ConfigError> {
    let users = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>().map_err(|_| {
                ConfigError::configuration(format!(
                    "{ENV_ALLOWED_USERS} contains a non-numeric user id '{part}'"
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if users.is_empty() {
        return Err(ConfigError::configuration(format!(
            "{ENV_ALLOWED_USERS} must list at least one user id"
        )));
    }
    Ok(users)
}

fn parse_approved_dirs(raw: &str) -> Result<Vec<PathBuf>, ConfigError> {
    let dirs: Vec<PathBuf> = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
        .collect();
    if dirs.is_empty() {
        return Err(ConfigError::configuration(format!(
            "{ENV_APPROVED_DIRS} must list at least one directory"
        )));
    }
    for dir in &dirs {
        if dir.is_relative() {
            return Err(ConfigError::configuration(format!(
                "{ENV_APPROVED_DIRS} entries must be absolute, got '{}'",
                dir.display()
            )));
        }
    }
    Ok(dirs)
}

fn resolve_home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn default_agent_config_dir() -> PathBuf {
    resolve_home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".agent")
}

fn default_data_dir() -> PathBuf {
    resolve_home_dir()
        .map(|home| home.join(".local").join("share"))
        .unwrap_or_else(std::env::temp_dir)
        .join("courier")
}
