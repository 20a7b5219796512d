//! Process configuration from environment variables.

use crate::types::UserId;
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarketConfig {
    /// HTTP listen port (`PORT`).
    pub port: u16,
    /// User id that receives admin-addressed notifications (`ADMIN_USER_ID`).
    pub admin_user_id: UserId,
    /// JSON snapshot file for the record store (`DATA_FILE`); memory only when unset.
    pub data_file: Option<PathBuf>,
    /// Write audit events to stdout (`AUDIT_STDOUT`).
    pub audit_stdout: bool,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            admin_user_id: UserId(1),
            data_file: None,
            audit_stdout: true,
        }
    }
}

impl MarketConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds from an arbitrary variable source; unset or unparsable values use defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: get("PORT").and_then(|s| s.parse().ok()).unwrap_or(defaults.port),
            admin_user_id: get("ADMIN_USER_ID")
                .and_then(|s| s.parse().ok())
                .map(UserId)
                .unwrap_or(defaults.admin_user_id),
            data_file: get("DATA_FILE").filter(|s| !s.trim().is_empty()).map(PathBuf::from),
            audit_stdout: get("AUDIT_STDOUT")
                .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
                .unwrap_or(defaults.audit_stdout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_unset() {
        assert_eq!(MarketConfig::from_lookup(|_| None), MarketConfig::default());
    }

    #[test]
    fn reads_values_and_ignores_garbage() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "9000"),
            ("ADMIN_USER_ID", "abc"),
            ("DATA_FILE", "/tmp/market.json"),
            ("AUDIT_STDOUT", "false"),
        ]
        .into_iter()
        .collect();
        let config = MarketConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.port, 9000);
        assert_eq!(config.admin_user_id, UserId(1));
        assert_eq!(config.data_file, Some(PathBuf::from("/tmp/market.json")));
        assert!(!config.audit_stdout);
    }
}
