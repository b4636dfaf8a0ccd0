//! Connection settings for the CouchDB session store, read from `COUCH_*` variables.

use std::fmt;

use tracing::warn;

use super::error::{CouchDaoError, CouchResult};

const BASE_URL_VAR: &str = "COUCH_BASE_URL";
const DATABASE_VAR: &str = "COUCH_DB";
const USERNAME_VAR: &str = "COUCH_USERNAME";
const PASSWORD_VAR: &str = "COUCH_PASSWORD";
const DEFAULT_DATABASE: &str = "voice_ledger";

/// Where session records live in CouchDB and how to authenticate.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    /// Server URL without a trailing slash.
    pub base_url: String,
    pub database: String,
    pub credentials: Option<CouchCredentials>,
}

/// Basic-auth pair sent with every request.
#[derive(Clone)]
pub struct CouchCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for CouchCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CouchCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl CouchConfig {
    /// Read `COUCH_BASE_URL` (required), `COUCH_DB` and the optional credential pair.
    pub fn from_env() -> CouchResult<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CouchResult<Self> {
        let present = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let base_url = present(BASE_URL_VAR)
            .map(|url| url.trim_end_matches('/').to_owned())
            .ok_or(CouchDaoError::MissingEnvVar { var: BASE_URL_VAR })?;
        let database = present(DATABASE_VAR).unwrap_or_else(|| DEFAULT_DATABASE.to_owned());

        let credentials = match (present(USERNAME_VAR), present(PASSWORD_VAR)) {
            (Some(username), Some(password)) => Some(CouchCredentials { username, password }),
            (None, None) => None,
            _ => {
                warn!("only one of COUCH_USERNAME and COUCH_PASSWORD is set; connecting without credentials");
                None
            }
        };

        Ok(Self {
            base_url,
            database,
            credentials,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> CouchResult<CouchConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        CouchConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn base_url_is_required() {
        assert!(matches!(
            config_from(&[("COUCH_DB", "x")]),
            Err(CouchDaoError::MissingEnvVar {
                var: "COUCH_BASE_URL"
            })
        ));
    }

    #[test]
    fn defaults_apply_and_trailing_slash_is_trimmed() {
        let config = config_from(&[("COUCH_BASE_URL", "http://couch:5984/")]).unwrap();
        assert_eq!(config.base_url, "http://couch:5984");
        assert_eq!(config.database, "voice_ledger");
        assert!(config.credentials.is_none());
    }

    #[test]
    fn credentials_need_both_halves() {
        let partial = config_from(&[
            ("COUCH_BASE_URL", "http://couch:5984"),
            ("COUCH_USERNAME", "ledger"),
        ])
        .unwrap();
        assert!(partial.credentials.is_none());

        let full = config_from(&[
            ("COUCH_BASE_URL", "http://couch:5984"),
            ("COUCH_USERNAME", "ledger"),
            ("COUCH_PASSWORD", "hunter2"),
        ])
        .unwrap();
        let credentials = full.credentials.unwrap();
        assert_eq!(credentials.username, "ledger");
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }
}
