// Server configuration. Centralizes environment variable parsing with
// defaults for local development.

use std::net::SocketAddr;

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Coordination cache (Redis) connection string.
    pub redis_url: String,
    /// Payment provider API base URL.
    pub payment_api_base: String,
    /// Payment provider API key.
    pub payment_api_key: String,
    /// Base URL this server is reachable at, used to build payment
    /// success/cancel callback URLs.
    pub public_base_url: String,
    /// Log filter directive (e.g. `info`, `parkcore_server=debug`).
    pub log_filter: String,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `PARKCORE_HOST` | `0.0.0.0` |
    /// | `PARKCORE_PORT` | `8080` |
    /// | `PARKCORE_DATABASE_URL` | *(required)* |
    /// | `PARKCORE_REDIS_URL` | `redis://127.0.0.1:6379` |
    /// | `PARKCORE_PAYMENT_API_BASE` | `https://api.stripe.com` |
    /// | `PARKCORE_PAYMENT_API_KEY` | dev-only placeholder |
    /// | `PARKCORE_PUBLIC_BASE_URL` | `http://localhost:8080` |
    /// | `PARKCORE_LOG_FILTER` | `info` |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("PARKCORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("PARKCORE_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let database_url = env("PARKCORE_DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("PARKCORE_DATABASE_URL must be set"))?;

        let redis_url = env("PARKCORE_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());

        let payment_api_base =
            env("PARKCORE_PAYMENT_API_BASE").unwrap_or_else(|_| "https://api.stripe.com".into());
        let payment_api_key =
            env("PARKCORE_PAYMENT_API_KEY").unwrap_or_else(|_| "sk_test_local_development_only".into());

        let public_base_url =
            env("PARKCORE_PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into());

        let log_filter = env("PARKCORE_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Ok(Self {
            listen_addr,
            database_url,
            redis_url,
            payment_api_base,
            payment_api_key,
            public_base_url,
            log_filter,
        })
    }

    pub fn is_dev_payment_key(&self) -> bool {
        self.payment_api_key == "sk_test_local_development_only"
    }

    pub fn payment_success_path(&self) -> String {
        format!("{}/payment_success", self.public_base_url)
    }

    pub fn payment_success_direct_path(&self) -> String {
        format!("{}/payment_success_direct", self.public_base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn requires_database_url() {
        let err = ServerConfig::from_env_fn(env_from_map(HashMap::new())).unwrap_err();
        assert!(err.to_string().contains("PARKCORE_DATABASE_URL"));
    }

    #[test]
    fn defaults_with_database_url_set() {
        let mut m = HashMap::new();
        m.insert("PARKCORE_DATABASE_URL", "postgres://u:p@host/db");
        let cfg = ServerConfig::from_env_fn(env_from_map(m)).unwrap();
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.redis_url, "redis://127.0.0.1:6379");
        assert!(cfg.is_dev_payment_key());
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn custom_port_and_host() {
        let mut m = HashMap::new();
        m.insert("PARKCORE_DATABASE_URL", "postgres://u:p@host/db");
        m.insert("PARKCORE_HOST", "127.0.0.1");
        m.insert("PARKCORE_PORT", "9090");
        let cfg = ServerConfig::from_env_fn(env_from_map(m)).unwrap();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:9090");
    }

    #[test]
    fn payment_success_paths_are_derived_from_public_base_url() {
        let mut m = HashMap::new();
        m.insert("PARKCORE_DATABASE_URL", "postgres://u:p@host/db");
        m.insert("PARKCORE_PUBLIC_BASE_URL", "https://parkcore.example.com");
        let cfg = ServerConfig::from_env_fn(env_from_map(m)).unwrap();
        assert_eq!(cfg.payment_success_path(), "https://parkcore.example.com/payment_success");
        assert_eq!(
            cfg.payment_success_direct_path(),
            "https://parkcore.example.com/payment_success_direct"
        );
    }
}
