use crate::auth::jwt::JwtConfig;

/// Where jobs, balances, and the model catalog live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local store; everything is lost on restart.
    Memory,
}

impl StoreBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(StoreBackend::Postgres),
            "memory" => Some(StoreBackend::Memory),
            _ => None,
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development except the JWT
/// secret.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins; `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight generations (default: `30`).
    pub shutdown_timeout_secs: u64,
    pub jwt: JwtConfig,
    pub store_backend: StoreBackend,
    /// Accepted `POST /generate` calls per user per minute.
    pub generate_rate_limit_per_minute: u32,
    /// How often the stale-job sweep runs after the startup sweep.
    pub recovery_interval_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default    |
    /// |----------------------------------|------------|
    /// | `HOST`                           | `0.0.0.0`  |
    /// | `PORT`                           | `3000`     |
    /// | `CORS_ORIGINS`                   | `*`        |
    /// | `REQUEST_TIMEOUT_SECS`           | `30`       |
    /// | `SHUTDOWN_TIMEOUT_SECS`          | `30`       |
    /// | `STORE_BACKEND`                  | `postgres` |
    /// | `GENERATE_RATE_LIMIT_PER_MINUTE` | `10`       |
    /// | `RECOVERY_INTERVAL_SECS`         | `300`      |
    ///
    /// # Panics
    ///
    /// Panics on unparseable values and on a missing `JWT_SECRET`.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let store_backend = match std::env::var("STORE_BACKEND") {
            Ok(v) => StoreBackend::parse(&v)
                .unwrap_or_else(|| panic!("STORE_BACKEND must be postgres or memory, got '{v}'")),
            Err(_) => StoreBackend::Postgres,
        };

        let generate_rate_limit_per_minute: u32 = std::env::var("GENERATE_RATE_LIMIT_PER_MINUTE")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("GENERATE_RATE_LIMIT_PER_MINUTE must be a valid u32");

        let recovery_interval_secs: u64 = std::env::var("RECOVERY_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("RECOVERY_INTERVAL_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt: JwtConfig::from_env(),
            store_backend,
            generate_rate_limit_per_minute,
            recovery_interval_secs: recovery_interval_secs.max(1),
        }
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }
}
