//! Credential loading from the environment or an INI profile file.
//!
//! Lookup order for [`load_config`]:
//! 1. `DB_NAME`, `DB_USER` and `DB_PASS` in the environment (only when no profile is requested)
//! 2. the file named by `DB_BRIDGE_CONFIG`, if it exists
//! 3. `~/.db_bridge.cfg`
//!
//! Inside the file the profile is the requested one, else `DB_BRIDGE_PROFILE`,
//! else `[DEFAULT] active`, else the first section.

use crate::result::{BridgeError, Result};
use ini::Ini;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CONFIG_PATH_ENV_VAR: &str = "DB_BRIDGE_CONFIG";
pub const PROFILE_ENV_VAR: &str = "DB_BRIDGE_PROFILE";
pub const CONFIG_FILE_NAME: &str = ".db_bridge.cfg";
const DEFAULT_SECTION: &str = "DEFAULT";

/// Database backends a profile can point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Sqlite,
    #[serde(alias = "postgresql")]
    Postgres,
    #[default]
    MySql,
}

impl Driver {
    pub fn default_port(&self) -> u16 {
        match self {
            Driver::Postgres => 5432,
            _ => 3306,
        }
    }

    /// Operator used for regular-expression matching in generated SQL
    pub fn regexp_operator(&self) -> &'static str {
        match self {
            Driver::Postgres => "~",
            _ => "REGEXP",
        }
    }
}

impl FromStr for Driver {
    type Err = BridgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Driver::Sqlite),
            "postgres" | "postgresql" => Ok(Driver::Postgres),
            "mysql" => Ok(Driver::MySql),
            other => Err(BridgeError::UnsupportedDriver(other.to_string())),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Driver::Sqlite => "sqlite",
            Driver::Postgres => "postgres",
            Driver::MySql => "mysql",
        };
        write!(f, "{s}")
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

/// Connection credentials for one database
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DbCreds {
    #[serde(default)]
    pub driver: Driver,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    /// File path for SQLite, database name otherwise
    #[serde(alias = "name")]
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default, alias = "passwd")]
    pub password: Option<String>,
}

impl DbCreds {
    pub fn new(driver: Driver, database: impl Into<String>) -> Self {
        Self {
            driver,
            host: default_host(),
            port: None,
            database: database.into(),
            user: None,
            password: None,
        }
    }

    pub fn sqlite(path: impl Into<String>) -> Self {
        Self::new(Driver::Sqlite, path)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Build credentials from a JSON object such as `{"driver": "sqlite", "database": "/tmp/a.db"}`
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Configured port, or the driver default
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.driver.default_port())
    }
}

impl fmt::Debug for DbCreds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCreds")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Load credentials from the process environment (and `.env`) or the INI file.
pub fn load_config(profile: Option<&str>) -> Result<DbCreds> {
    if let Some(e) = dotenv_problem(&dotenvy::dotenv()) {
        tracing::warn!(error = %e, "ignoring unreadable .env file");
    }
    load_config_with(|key| std::env::var(key).ok(), profile)
}

/// The load error, unless the file simply does not exist
fn dotenv_problem<T>(result: &dotenvy::Result<T>) -> Option<&dotenvy::Error> {
    match result {
        Err(e) if !e.not_found() => Some(e),
        _ => None,
    }
}

/// Same as [`load_config`], reading variables through `env` instead of the process environment
pub fn load_config_with<F>(env: F, profile: Option<&str>) -> Result<DbCreds>
where
    F: Fn(&str) -> Option<String>,
{
    let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

    if profile.is_none() {
        if let Some(creds) = creds_from_env(&env)? {
            tracing::debug!(driver = %creds.driver, "using credentials from environment");
            return Ok(creds);
        }
    }

    let path = config_path(&env)?;
    load_config_file(&path, profile, &env)
}

fn creds_from_env(env: &dyn Fn(&str) -> Option<String>) -> Result<Option<DbCreds>> {
    let (Some(name), Some(user), Some(password)) = (env("DB_NAME"), env("DB_USER"), env("DB_PASS"))
    else {
        return Ok(None);
    };

    let driver = match env("DB_DRIVER") {
        Some(d) => d.parse()?,
        None => Driver::default(),
    };
    let database = match driver {
        Driver::Sqlite => expand_path(&name),
        _ => name,
    };
    let mut creds = DbCreds::new(driver, database)
        .with_host(env("DB_HOST").unwrap_or_else(default_host))
        .with_user(user)
        .with_password(password);
    if let Some(port) = env("DB_PORT") {
        creds.port = Some(parse_port(&port, "environment")?);
    }
    Ok(Some(creds))
}

fn config_path(env: &dyn Fn(&str) -> Option<String>) -> Result<PathBuf> {
    if let Some(custom) = env(CONFIG_PATH_ENV_VAR) {
        let custom = PathBuf::from(custom.trim());
        if custom.is_file() {
            return Ok(custom);
        }
        tracing::warn!(path = %custom.display(), "{CONFIG_PATH_ENV_VAR} does not name a file, falling back to home directory");
    }

    let home = env("HOME")
        .or_else(|| env("USERPROFILE"))
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .ok_or_else(|| BridgeError::new_config("Cannot determine home directory"))?;
    Ok(home.join(CONFIG_FILE_NAME))
}

/// Load a profile from an INI file.
///
/// `[DEFAULT]` keys are fallbacks for every section; `env` is only consulted for `DB_BRIDGE_PROFILE`.
pub fn load_config_file(
    path: &Path,
    profile: Option<&str>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<DbCreds> {
    if !path.is_file() {
        return Err(BridgeError::new_config(format!(
            "No DB config found at {}. Please create ~/{CONFIG_FILE_NAME} or set {CONFIG_PATH_ENV_VAR} correctly.",
            path.display()
        )));
    }

    let ini = Ini::load_from_file(path)?;
    let defaults = ini.section(Some(DEFAULT_SECTION));

    let active = profile
        .map(str::to_string)
        .or_else(|| env(PROFILE_ENV_VAR))
        .or_else(|| {
            defaults
                .and_then(|d| d.get("active"))
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
        });
    let active = match active {
        Some(active) => active,
        None => ini
            .sections()
            .flatten()
            .find(|name| *name != DEFAULT_SECTION)
            .map(str::to_string)
            .ok_or_else(|| {
                BridgeError::new_config(format!("No profiles defined in {}", path.display()))
            })?,
    };

    let section = ini.section(Some(active.as_str())).ok_or_else(|| {
        BridgeError::new_config(format!(
            "Profile '{active}' not found in {}",
            path.display()
        ))
    })?;

    let get = |key: &str| {
        section
            .get(key)
            .or_else(|| defaults.and_then(|d| d.get(key)))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    tracing::debug!(profile = %active, path = %path.display(), "loading db profile");
    creds_from_profile(&active, get)
}

fn creds_from_profile(profile: &str, get: impl Fn(&str) -> Option<String>) -> Result<DbCreds> {
    let driver = match get("driver") {
        Some(d) => d.parse()?,
        None => Driver::default(),
    };

    if driver == Driver::Sqlite {
        let raw_path = get("database").or_else(|| get("path")).ok_or_else(|| {
            BridgeError::new_config(format!(
                "SQLite profile '{profile}' requires a 'database = /path/to/file.db'"
            ))
        })?;
        return Ok(DbCreds::sqlite(expand_path(&raw_path)));
    }

    let required = |key: &str| {
        get(key).ok_or_else(|| {
            BridgeError::new_config(format!("Profile '{profile}' is missing '{key}'"))
        })
    };

    let database = match get("database").or_else(|| get("name")) {
        Some(database) => database,
        None => required("database")?,
    };
    let mut creds = DbCreds::new(driver, database)
        .with_host(get("host").unwrap_or_else(default_host))
        .with_user(required("user")?)
        .with_password(required("password")?);
    if let Some(port) = get("port") {
        creds.port = Some(parse_port(&port, profile)?);
    }
    Ok(creds)
}

fn parse_port(raw: &str, origin: &str) -> Result<u16> {
    raw.trim()
        .parse()
        .map_err(|_| BridgeError::new_config(format!("Invalid port '{raw}' in {origin}")))
}

fn expand_path(raw: &str) -> String {
    shellexpand::tilde(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_missing_dotenv_is_not_a_problem() {
        let dir = tempfile::tempdir().unwrap();
        let result = dotenvy::from_path(dir.path().join(".env"));
        assert!(dotenv_problem(&result).is_none());
    }

    #[test]
    fn test_malformed_dotenv_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "DB_BRIDGE_UNUSED_KEY=\"unterminated\n").unwrap();
        let result = dotenvy::from_path_iter(&path)
            .and_then(|iter| iter.collect::<dotenvy::Result<Vec<_>>>());
        assert!(dotenv_problem(&result).is_some());
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_driver_parsing() {
        assert_eq!("SQLite".parse::<Driver>().unwrap(), Driver::Sqlite);
        assert_eq!("postgresql".parse::<Driver>().unwrap(), Driver::Postgres);
        assert_eq!("mysql".parse::<Driver>().unwrap(), Driver::MySql);
        assert!(matches!(
            "oracle".parse::<Driver>(),
            Err(BridgeError::UnsupportedDriver(name)) if name == "oracle"
        ));
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(DbCreds::new(Driver::Postgres, "db").port(), 5432);
        assert_eq!(DbCreds::new(Driver::MySql, "db").port(), 3306);
        assert_eq!(DbCreds::new(Driver::MySql, "db").with_port(3307).port(), 3307);
    }

    #[test]
    fn test_creds_from_json_defaults() {
        let creds = DbCreds::from_json(json!({
            "name": "shop",
            "user": "root",
            "passwd": "secret"
        }))
        .unwrap();
        assert_eq!(creds.driver, Driver::MySql);
        assert_eq!(creds.host, "localhost");
        assert_eq!(creds.database, "shop");
        assert_eq!(creds.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = DbCreds::new(Driver::MySql, "shop").with_password("hunter2");
        let printed = format!("{creds:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("***"));
    }

    #[test]
    fn test_env_credentials_take_priority() {
        let env = env_from(&[
            ("DB_NAME", "inventory"),
            ("DB_USER", "app"),
            ("DB_PASS", "pw"),
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "3310"),
        ]);
        let creds = load_config_with(env, None).unwrap();
        assert_eq!(creds.driver, Driver::MySql);
        assert_eq!(creds.host, "db.internal");
        assert_eq!(creds.port(), 3310);
        assert_eq!(creds.database, "inventory");
        assert_eq!(creds.user.as_deref(), Some("app"));
    }

    #[test]
    fn test_incomplete_env_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().to_string_lossy().to_string();
        let env = env_from(&[("DB_NAME", "inventory"), ("HOME", home.as_str())]);
        let err = load_config_with(env, None).unwrap_err();
        assert!(matches!(err, BridgeError::Config(msg) if msg.contains(CONFIG_FILE_NAME)));
    }

    #[test]
    fn test_invalid_env_port() {
        let env = env_from(&[
            ("DB_NAME", "inventory"),
            ("DB_USER", "app"),
            ("DB_PASS", "pw"),
            ("DB_PORT", "not-a-port"),
        ]);
        assert!(matches!(
            load_config_with(env, None),
            Err(BridgeError::Config(_))
        ));
    }
}
