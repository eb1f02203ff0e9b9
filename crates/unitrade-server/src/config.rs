use std::net::SocketAddr;
use std::path::PathBuf;

/// Secrets shipped in sample `.env` files. Starting with one of them is
/// refused.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("UNITRADE_JWT_SECRET is unset or still a placeholder")]
    MissingSecret,
    #[error("{name} is not valid: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub storage_dir: PathBuf,
    pub public_url: String,
    pub admin_emails: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = var("UNITRADE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::MissingSecret);
        }

        let db_path = var("UNITRADE_DB_PATH").unwrap_or_else(|| "unitrade.db".into());
        let host = var("UNITRADE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = var("UNITRADE_PORT").unwrap_or_else(|| "3000".into());
        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::Invalid { name: "UNITRADE_PORT", value: port.clone() })?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .map_err(|_| ConfigError::Invalid { name: "UNITRADE_HOST", value: host.clone() })?;

        let storage_dir = var("UNITRADE_STORAGE_DIR").unwrap_or_else(|| "./listing-images".into());
        let public_url = var("UNITRADE_PUBLIC_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{}", port));
        let admin_emails = var("UNITRADE_ADMIN_EMAILS")
            .map(|raw| {
                raw.split(',')
                    .map(|e| e.trim().to_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(db_path),
            addr,
            storage_dir: PathBuf::from(storage_dir),
            public_url,
            admin_emails,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("UNITRADE_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("unitrade.db"));
        assert_eq!(config.addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.storage_dir, PathBuf::from("./listing-images"));
        assert_eq!(config.public_url, "http://localhost:3000");
        assert!(config.admin_emails.is_empty());
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingSecret)));
        assert!(matches!(
            load(&[("UNITRADE_JWT_SECRET", "dev-secret-change-me")]),
            Err(ConfigError::MissingSecret)
        ));
    }

    #[test]
    fn admin_emails_are_normalised() {
        let config = load(&[
            ("UNITRADE_JWT_SECRET", "s3cret"),
            ("UNITRADE_ADMIN_EMAILS", " Admin@Campus.edu, ,mod@campus.edu"),
            ("UNITRADE_PUBLIC_URL", "https://market.example/"),
        ])
        .unwrap();
        assert_eq!(config.admin_emails, vec!["admin@campus.edu", "mod@campus.edu"]);
        assert_eq!(config.public_url, "https://market.example");
    }

    #[test]
    fn bad_port_is_reported() {
        let err = load(&[("UNITRADE_JWT_SECRET", "s3cret"), ("UNITRADE_PORT", "http")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "UNITRADE_PORT", .. }));
    }
}
