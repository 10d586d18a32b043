//! Configuration Management
//!
//! This module builds the [`ServiceSettings`] value the service runs with.
//! Settings are resolved once at process start and passed down by reference;
//! nothing reads the environment for them afterwards.
//!
//! # Sources
//! 1. Environment variables (highest priority)
//! 2. Settings file: `--settings PATH`, else `~/.config/dbquery/settings.json`
//!    when present
//!
//! # Settings File
//! Keys are the kebab-case setting names:
//! ```json
//! {
//!   "rds-engine": "postgres",
//!   "rds-host": "mydb.cluster-abc.eu-west-1.rds.amazonaws.com",
//!   "rds-user": "app_user",
//!   "rds-port": 5432,
//!   "rds-database": "orders",
//!   "rds-password-initial-env": "ORDERS_DB_PASSWORD",
//!   "rds-switch-to-iam-auth": true,
//!   "aws-default-region": "eu-west-1"
//! }
//! ```
//! The fallback password may be stored inline (`rds-password-initial`) or
//! referenced through an environment variable (`rds-password-initial-env`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::Engine;
use crate::error::{DbQueryError, Result};

/// Settings file contents
///
/// Every field is optional here; [`ServiceSettings::from_lookup`] enforces
/// what is required after the environment overlay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rds_engine: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rds_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rds_user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rds_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rds_database: Option<String>,

    /// Fallback password stored directly in the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rds_password_initial: Option<String>,

    /// Environment variable holding the fallback password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rds_password_initial_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rds_switch_to_iam_auth: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_default_region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rds_ssl_root_cert: Option<PathBuf>,
}

/// Resolved service settings
///
/// WARNING: Holds the fallback password. `Debug` redacts it.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Engine identifier as configured; parsed when a connection is attempted
    pub engine: String,

    pub host: String,

    pub user: String,

    /// Explicit port; `None` uses the engine's default
    pub port: Option<u16>,

    /// Default database name
    pub database: Option<String>,

    /// Static fallback password
    pub password_initial: Option<String>,

    /// Record a migration intent when fallback auth is used
    pub switch_to_iam_auth: bool,

    /// Region the identity token is signed for
    pub region: Option<String>,

    /// Extra PEM root bundle trusted for TLS
    pub ssl_root_cert: Option<PathBuf>,
}

impl std::fmt::Debug for ServiceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSettings")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("password_initial", &self.password_initial.as_ref().map(|_| "<redacted>"))
            .field("switch_to_iam_auth", &self.switch_to_iam_auth)
            .field("region", &self.region)
            .field("ssl_root_cert", &self.ssl_root_cert)
            .finish()
    }
}

impl ServiceSettings {
    /// Load settings from the settings file (if any) and the process environment
    pub fn load(settings_path: Option<&Path>) -> Result<Self> {
        let file = match resolve_settings_path(settings_path)? {
            Some(path) => load_settings_file(&path)?,
            None => SettingsFile::default(),
        };

        Self::from_lookup(&file, |key| std::env::var(key).ok())
    }

    /// Overlay `lookup` on `file` and validate the result
    ///
    /// Empty variables count as unset.
    pub fn from_lookup(file: &SettingsFile, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let engine = env("RDS_ENGINE").or_else(|| file.rds_engine.clone()).unwrap_or_default();

        let host = env("RDS_HOST")
            .or_else(|| file.rds_host.clone())
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| missing_setting("host", "RDS_HOST"))?;

        let user = env("RDS_USER")
            .or_else(|| file.rds_user.clone())
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| missing_setting("user", "RDS_USER"))?;

        let port = match env("RDS_PORT") {
            Some(raw) => Some(parse_port(&raw)?),
            None => match file.rds_port {
                Some(0) => return Err(DbQueryError::invalid_configuration("rds-port must not be 0")),
                other => other,
            },
        };

        let database = env("RDS_DATABASE").or_else(|| file.rds_database.clone()).filter(|d| !d.is_empty());

        let password_initial = match env("RDS_PASSWORD_INITIAL") {
            Some(password) => Some(password),
            None => match &file.rds_password_initial_env {
                Some(var) => Some(lookup(var.as_str()).ok_or_else(|| {
                    DbQueryError::invalid_configuration(format!(
                        "Environment variable {var} not found for rds-password-initial"
                    ))
                })?),
                None => file.rds_password_initial.clone(),
            },
        };

        let switch_to_iam_auth = match env("RDS_SWITCH_TO_IAM_AUTH") {
            Some(raw) => parse_flag("RDS_SWITCH_TO_IAM_AUTH", &raw)?,
            None => file.rds_switch_to_iam_auth.unwrap_or(false),
        };

        let region = env("AWS_DEFAULT_REGION")
            .or_else(|| env("AWS_REGION"))
            .or_else(|| file.aws_default_region.clone())
            .filter(|r| !r.is_empty());

        let ssl_root_cert =
            env("RDS_SSL_ROOT_CERT").map(PathBuf::from).or_else(|| file.rds_ssl_root_cert.clone());

        Ok(Self {
            engine,
            host,
            user,
            port,
            database,
            password_initial,
            switch_to_iam_auth,
            region,
            ssl_root_cert,
        })
    }

    /// Port to connect to for `engine`
    #[must_use]
    pub fn port_for(&self, engine: Engine) -> u16 {
        self.port.unwrap_or_else(|| engine.default_port())
    }
}

/// Get path to the default settings file (`~/.config/dbquery/settings.json`)
pub fn default_settings_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        DbQueryError::invalid_configuration("Could not determine user config directory")
    })?;

    Ok(config_dir.join("dbquery").join("settings.json"))
}

/// Pick the settings file to read, if any
///
/// An explicit path must exist; the default path is only used when present.
pub fn resolve_settings_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(DbQueryError::invalid_configuration(format!(
                "Settings file {} does not exist",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    // No config directory is not an error when nothing was asked for
    Ok(default_settings_path().ok().filter(|path| path.exists()))
}

/// Read and parse a settings file
pub fn load_settings_file(path: &Path) -> Result<SettingsFile> {
    let contents = fs::read_to_string(path).map_err(|e| {
        DbQueryError::invalid_configuration(format!(
            "Could not read settings file {}: {e}",
            path.display()
        ))
    })?;

    serde_json::from_str(&contents).map_err(|e| {
        DbQueryError::invalid_configuration(format!(
            "Invalid settings file format in {}: {e}",
            path.display()
        ))
    })
}

/// Parse a boolean setting (`1/t/true/yes/on`, `0/f/false/no/off`)
pub fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Ok(true),
        "0" | "f" | "false" | "no" | "off" => Ok(false),
        other => Err(DbQueryError::invalid_configuration(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(DbQueryError::invalid_configuration(format!(
            "RDS_PORT must be a port number between 1 and 65535, got '{}'",
            raw.trim()
        ))),
        Ok(port) => Ok(port),
    }
}

fn missing_setting(name: &str, env_var: &str) -> DbQueryError {
    DbQueryError::invalid_configuration(format!(
        "database {name} is not configured (set {env_var} or rds-{name} in the settings file)"
    ))
}
