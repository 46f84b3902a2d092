// Gateway server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The database pool reads its own tuning vars; this
// module covers the core server settings.

use std::net::SocketAddr;

/// Core gateway server configuration.
///
/// Constructed via [`GatewayConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HMAC secret the JWT verifier validates credentials against.
    pub jwt_secret: String,
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    /// Log filter directive (e.g. `info`, `lagoon_gateway=debug`).
    pub log_filter: String,
}

impl GatewayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `LAGOON_GATEWAY_HOST` | `0.0.0.0` |
    /// | `LAGOON_GATEWAY_PORT` | `8080` |
    /// | `LAGOON_GATEWAY_JWT_SECRET` | dev-only placeholder |
    /// | `LAGOON_GATEWAY_DATABASE_URL` | *(none)* |
    /// | `LAGOON_GATEWAY_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("LAGOON_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("LAGOON_GATEWAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("LAGOON_GATEWAY_JWT_SECRET").unwrap_or_else(|_| {
            "lagoon_local_development_jwt_secret_must_be_32_chars".into()
        });

        let database_url = env("LAGOON_GATEWAY_DATABASE_URL").ok();

        let log_filter =
            env("LAGOON_GATEWAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self { listen_addr, jwt_secret, database_url, log_filter }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == "lagoon_local_development_jwt_secret_must_be_32_chars"
    }
}
