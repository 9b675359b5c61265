//! File-backed client settings.
//!
//! A small `key = value` format (TOML subset: `#` comments, double-quoted
//! strings, integers, booleans):
//!
//! ```text
//! max_total_connections = 200
//! default_max_per_route = 10
//! connect_timeout_secs = 3
//! socket_timeout_secs = 20
//! client_identity_path = "/etc/pooled-http/client.p12"
//! client_identity_store_password = "changeit"
//! client_identity_key_password = "changeit"
//! trust_anchor_path = "/etc/pooled-http/ca.pem"
//! danger_accept_invalid_certs = false
//! ```

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ClientError;
use crate::pool::PoolConfig;
use crate::tls::{ClientCredential, DangerAcceptAnyCertificate, KeyMaterial, TlsConfig};

/// Environment variable naming an explicit settings file.
pub const CONFIG_PATH_ENV: &str = "POOLED_HTTP_CONFIG";

/// Settings loaded from a file. Unset keys keep the library defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSettings {
    /// Cap on requests in flight across every route (1..=10000).
    pub max_total_connections: Option<usize>,
    /// Cap on requests in flight per route (1..=1000, at most the total cap).
    pub default_max_per_route: Option<usize>,
    /// TCP connect timeout in seconds (1..=3600).
    pub connect_timeout_secs: Option<u64>,
    /// Socket read timeout in seconds (1..=3600).
    pub socket_timeout_secs: Option<u64>,
    /// Keystore for mutual TLS: a PEM bundle (certificate chain + private key)
    /// or a PKCS#12 store.
    pub client_identity_path: Option<PathBuf>,
    /// Password opening a PKCS#12 client keystore.
    pub client_identity_store_password: Option<String>,
    /// Password decrypting the client private key.
    pub client_identity_key_password: Option<String>,
    /// PEM bundle of extra root certificates.
    pub trust_anchor_path: Option<PathBuf>,
    /// Trust every server certificate. Development only.
    pub danger_accept_invalid_certs: Option<bool>,
}

impl ClientSettings {
    /// Parses settings from file contents.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] on syntax errors, unknown keys,
    /// or out-of-range values.
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        let mut settings = Self::default();
        for (index, raw_line) in raw.lines().enumerate() {
            let line_no = index + 1;
            let line = strip_inline_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }

            let Some((raw_key, raw_value)) = line.split_once('=') else {
                return Err(ClientError::configuration_msg(format!(
                    "invalid settings syntax on line {line_no}: expected key = value"
                )));
            };
            let key = raw_key.trim();
            let value = raw_value.trim();
            let invalid = |reason: String| {
                ClientError::configuration_msg(format!(
                    "invalid `{key}` value on line {line_no}: {reason}"
                ))
            };

            match key {
                "max_total_connections" => {
                    settings.max_total_connections = Some(parse_usize(value).map_err(invalid)?);
                }
                "default_max_per_route" => {
                    settings.default_max_per_route = Some(parse_usize(value).map_err(invalid)?);
                }
                "connect_timeout_secs" => {
                    settings.connect_timeout_secs = Some(parse_u64(value).map_err(invalid)?);
                }
                "socket_timeout_secs" => {
                    settings.socket_timeout_secs = Some(parse_u64(value).map_err(invalid)?);
                }
                "client_identity_path" => {
                    settings.client_identity_path =
                        Some(PathBuf::from(parse_string_literal(value).map_err(invalid)?));
                }
                "client_identity_store_password" => {
                    settings.client_identity_store_password =
                        Some(parse_string_literal(value).map_err(invalid)?);
                }
                "client_identity_key_password" => {
                    settings.client_identity_key_password =
                        Some(parse_string_literal(value).map_err(invalid)?);
                }
                "trust_anchor_path" => {
                    settings.trust_anchor_path =
                        Some(PathBuf::from(parse_string_literal(value).map_err(invalid)?));
                }
                "danger_accept_invalid_certs" => {
                    settings.danger_accept_invalid_certs = Some(parse_boolean(value).map_err(invalid)?);
                }
                unknown => {
                    return Err(ClientError::configuration_msg(format!(
                        "unknown settings key `{unknown}` on line {line_no}"
                    )));
                }
            }
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Reads and parses a settings file.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            ClientError::configuration(format!("failed to read settings file {}", path.display()), e)
        })?;
        let settings = Self::parse(&raw).map_err(|e| {
            ClientError::configuration(format!("failed to parse settings file {}", path.display()), e)
        })?;
        debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Loads the file at [`resolve_default_config_path`], or `None` when there is none.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the file exists but cannot be read or parsed.
    pub fn load_default() -> Result<Option<Self>, ClientError> {
        match resolve_default_config_path() {
            Some(path) if path.exists() => Self::load(&path).map(Some),
            Some(path) => {
                debug!(path = %path.display(), "no settings file, using defaults");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn validate(&self) -> Result<(), ClientError> {
        validate_range("max_total_connections", self.max_total_connections, 1..=10_000)?;
        validate_range("default_max_per_route", self.default_max_per_route, 1..=1_000)?;
        validate_range("connect_timeout_secs", self.connect_timeout_secs, 1..=3_600)?;
        validate_range("socket_timeout_secs", self.socket_timeout_secs, 1..=3_600)?;

        let total = self.max_total_connections.unwrap_or(crate::constants::DEFAULT_MAX_TOTAL_CONNECTIONS);
        if let Some(per_route) = self.default_max_per_route {
            if per_route > total {
                return Err(ClientError::configuration_msg(format!(
                    "default_max_per_route ({per_route}) exceeds max_total_connections ({total})"
                )));
            }
        }
        Ok(())
    }

    /// Pool configuration with these settings applied over the defaults.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        let defaults = PoolConfig::default();
        PoolConfig {
            max_total_connections: self
                .max_total_connections
                .unwrap_or(defaults.max_total_connections),
            default_max_per_route: self
                .default_max_per_route
                .unwrap_or(defaults.default_max_per_route),
            connect_timeout: self
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            socket_timeout: self
                .socket_timeout_secs
                .map_or(defaults.socket_timeout, Duration::from_secs),
            ..defaults
        }
    }

    /// TLS configuration described by these settings.
    #[must_use]
    pub fn tls_config(&self) -> TlsConfig {
        let mut tls = TlsConfig::new();
        if self.danger_accept_invalid_certs == Some(true) {
            warn!("danger_accept_invalid_certs is set, server certificates will not be validated");
            tls = tls.with_trust_strategy(DangerAcceptAnyCertificate);
        }
        if let Some(path) = &self.trust_anchor_path {
            tls = tls.with_trust_anchor(KeyMaterial::Path(path.clone()));
        }
        if let Some(path) = &self.client_identity_path {
            let mut credential = ClientCredential::from_path(path);
            if let Some(password) = &self.client_identity_store_password {
                credential = credential.with_store_password(password.clone());
            }
            if let Some(password) = &self.client_identity_key_password {
                credential = credential.with_key_password(password.clone());
            }
            tls = tls.with_client_credential(credential);
        }
        tls
    }
}

/// Resolves the default settings path.
///
/// Priority:
/// 1. `$POOLED_HTTP_CONFIG`
/// 2. `$XDG_CONFIG_HOME/pooled-http/config.toml`
/// 3. `$HOME/.config/pooled-http/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    resolve_config_path_with(|name| env::var_os(name))
}

fn resolve_config_path_with(lookup: impl Fn(&str) -> Option<OsString>) -> Option<PathBuf> {
    let non_empty = |name: &str| lookup(name).filter(|value| !value.is_empty());

    if let Some(explicit) = non_empty(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(explicit));
    }
    if let Some(xdg_config_home) = non_empty("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("pooled-http")
                .join("config.toml"),
        );
    }
    let home = non_empty("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("pooled-http")
            .join("config.toml"),
    )
}

fn validate_range<T>(
    field: &str,
    value: Option<T>,
    range: std::ops::RangeInclusive<T>,
) -> Result<(), ClientError>
where
    T: PartialOrd + std::fmt::Display,
{
    let Some(value) = value else {
        return Ok(());
    };
    if !range.contains(&value) {
        return Err(ClientError::configuration_msg(format!(
            "invalid settings value for `{field}`: {value}. Expected range: {}..={}",
            range.start(),
            range.end()
        )));
    }
    Ok(())
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String, String> {
    raw_value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .map(str::to_string)
        .ok_or_else(|| "expected double-quoted string".to_string())
}

fn parse_u64(raw_value: &str) -> Result<u64, String> {
    let token = raw_value.trim();
    if token.is_empty() {
        return Err("expected integer value".to_string());
    }
    if token.starts_with('-') {
        return Err("expected non-negative integer".to_string());
    }
    token.parse::<u64>().map_err(|e| e.to_string())
}

fn parse_usize(raw_value: &str) -> Result<usize, String> {
    let value = parse_u64(raw_value)?;
    usize::try_from(value).map_err(|_| "integer value out of range".to_string())
}

fn parse_boolean(raw_value: &str) -> Result<bool, String> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err("expected 'true' or 'false'".to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_parse_full_settings() {
        let raw = r#"
            # pool
            max_total_connections = 50
            default_max_per_route = 5   # per host
            connect_timeout_secs = 2
            socket_timeout_secs = 30
            client_identity_path = "/etc/pooled-http/client#1.pem"
            trust_anchor_path = "/etc/pooled-http/ca.pem"
            danger_accept_invalid_certs = false
        "#;
        let settings = ClientSettings::parse(raw).unwrap();
        assert_eq!(settings.max_total_connections, Some(50));
        assert_eq!(settings.default_max_per_route, Some(5));
        assert_eq!(
            settings.client_identity_path,
            Some(PathBuf::from("/etc/pooled-http/client#1.pem"))
        );
        assert_eq!(settings.danger_accept_invalid_certs, Some(false));

        let pool = settings.pool_config();
        assert_eq!(pool.max_total_connections, 50);
        assert_eq!(pool.default_max_per_route, 5);
        assert_eq!(pool.connect_timeout, Duration::from_secs(2));
        assert_eq!(pool.socket_timeout, Duration::from_secs(30));

        let tls = settings.tls_config();
        assert_eq!(tls.trust_anchors().len(), 1);
        assert!(tls.client_credential().is_some());
    }

    #[test]
    fn test_identity_passwords_reach_credential() {
        let raw = r#"
            client_identity_path = "/etc/pooled-http/client.p12"
            client_identity_store_password = "store#pw"
            client_identity_key_password = "key pw"
        "#;
        let settings = ClientSettings::parse(raw).unwrap();
        assert_eq!(settings.client_identity_store_password.as_deref(), Some("store#pw"));
        assert_eq!(settings.client_identity_key_password.as_deref(), Some("key pw"));

        let expected = ClientCredential::from_path("/etc/pooled-http/client.p12")
            .with_store_password("store#pw")
            .with_key_password("key pw");
        assert_eq!(settings.tls_config().client_credential(), Some(&expected));
    }

    #[test]
    fn test_empty_settings_keep_defaults() {
        let settings = ClientSettings::parse("\n# nothing here\n").unwrap();
        assert_eq!(settings, ClientSettings::default());
        assert_eq!(settings.pool_config(), PoolConfig::default());
        assert!(settings.tls_config().client_credential().is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let error = ClientSettings::parse("max_connections = 5").unwrap_err();
        assert!(
            error.to_string().contains("unknown settings key `max_connections`"),
            "got: {error}"
        );
    }

    #[test]
    fn test_missing_equals_rejected() {
        let error = ClientSettings::parse("max_total_connections 5").unwrap_err();
        assert!(error.to_string().contains("line 1"), "got: {error}");
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        assert!(ClientSettings::parse("connect_timeout_secs = 0").is_err());
        assert!(ClientSettings::parse("socket_timeout_secs = 3601").is_err());
        assert!(ClientSettings::parse("max_total_connections = -1").is_err());
        assert!(ClientSettings::parse("default_max_per_route = 0").is_err());
    }

    #[test]
    fn test_per_route_cap_cannot_exceed_total() {
        let error = ClientSettings::parse("max_total_connections = 4\ndefault_max_per_route = 8")
            .unwrap_err();
        assert!(error.to_string().contains("exceeds"), "got: {error}");
    }

    #[test]
    fn test_unquoted_path_rejected() {
        let error = ClientSettings::parse("trust_anchor_path = /etc/ca.pem").unwrap_err();
        assert!(error.to_string().contains("double-quoted"), "got: {error}");
    }

    #[test]
    fn test_danger_flag_selects_accept_any() {
        let settings = ClientSettings::parse("danger_accept_invalid_certs = true").unwrap();
        let debug = format!("{:?}", settings.tls_config().trust_strategy());
        assert!(debug.contains("DangerAcceptAnyCertificate"), "got: {debug}");
    }

    #[test]
    fn test_load_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_max_per_route = 3\n").unwrap();
        let settings = ClientSettings::load(&path).unwrap();
        assert_eq!(settings.default_max_per_route, Some(3));
    }

    #[test]
    fn test_load_missing_file_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let error = ClientSettings::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(error, ClientError::Configuration { .. }));
    }

    #[test]
    fn test_config_path_priority() {
        let env = HashMap::from([
            (CONFIG_PATH_ENV, "/explicit.toml"),
            ("XDG_CONFIG_HOME", "/xdg"),
            ("HOME", "/home/u"),
        ]);
        let lookup = |vars: HashMap<&'static str, &'static str>| {
            move |name: &str| vars.get(name).map(OsString::from)
        };

        assert_eq!(
            resolve_config_path_with(lookup(env.clone())),
            Some(PathBuf::from("/explicit.toml"))
        );

        let mut without_explicit = env.clone();
        without_explicit.insert(CONFIG_PATH_ENV, "");
        assert_eq!(
            resolve_config_path_with(lookup(without_explicit)),
            Some(PathBuf::from("/xdg/pooled-http/config.toml"))
        );

        let home_only = HashMap::from([("HOME", "/home/u")]);
        assert_eq!(
            resolve_config_path_with(lookup(home_only)),
            Some(PathBuf::from("/home/u/.config/pooled-http/config.toml"))
        );

        assert_eq!(resolve_config_path_with(lookup(HashMap::new())), None);
    }
}
