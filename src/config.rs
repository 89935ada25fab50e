//! Process configuration read from the environment.
//!
//! All knobs are collected once at startup into [`Settings`] and threaded
//! into components explicitly; nothing reads the environment after boot.
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` — store DSN (`sqlite:///path/to.db` or a bare path)
//! - `REDIS_URL` — if set, selects the broker-backed event bus
//! - `JWT_SECRET`, `ACCESS_TOKEN_EXPIRE_MINUTES`, `REFRESH_TOKEN_EXPIRE_DAYS`,
//!   `AUTH_ENABLED` — auth layer
//! - `ENCRYPTION_SECRET` — symmetric key for at-rest secrets
//! - `RATE_LIMIT_API_MAX_REQUESTS`, `RATE_LIMIT_API_WINDOW_SECONDS`,
//!   `RATE_LIMIT_LLM_MAX_REQUESTS`, `RATE_LIMIT_AUTH_MAX_REQUESTS`
//! - `CORS_ORIGINS` (comma-separated), `FRONTEND_URL`
//! - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `DEEPSEEK_API_KEY` — provider
//!   key fallbacks

use std::env;

/// Rate-limiter knobs, grouped so the middleware takes one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitOptions {
    /// Max API requests per window.
    pub api_max_requests: u32,
    /// Window length in seconds.
    pub api_window_seconds: u64,
    /// Max LLM-backed requests per window.
    pub llm_max_requests: u32,
    /// Max auth attempts per window.
    pub auth_max_requests: u32,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            api_max_requests: 120,
            api_window_seconds: 60,
            llm_max_requests: 20,
            auth_max_requests: 10,
        }
    }
}

/// API keys used when no per-user key is registered for a provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub deepseek: Option<String>,
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Store DSN. Defaults to `virtlab.db` in the working directory.
    pub database_url: String,
    /// When set, the event bus runs broker-backed instead of in-process.
    pub redis_url: Option<String>,
    /// Secret for signing access tokens.
    pub jwt_secret: Option<String>,
    pub access_token_expire_minutes: u64,
    pub refresh_token_expire_days: u64,
    pub auth_enabled: bool,
    /// Symmetric key for encrypting stored secrets (API keys, webhook secrets).
    pub encryption_secret: Option<String>,
    pub rate_limits: RateLimitOptions,
    /// Allowed CORS origins; `FRONTEND_URL` is merged in when set.
    pub cors_origins: Vec<String>,
    pub frontend_url: Option<String>,
    pub provider_keys: ProviderKeys,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "virtlab.db".to_string(),
            redis_url: None,
            jwt_secret: None,
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
            auth_enabled: false,
            encryption_secret: None,
            rate_limits: RateLimitOptions::default(),
            cors_origins: Vec::new(),
            frontend_url: None,
            provider_keys: ProviderKeys::default(),
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        let defaults = RateLimitOptions::default();
        let mut cors_origins: Vec<String> = env::var("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let frontend_url = env_opt("FRONTEND_URL");
        // Deploys often set only FRONTEND_URL; make sure it is allowed.
        if let Some(ref url) = frontend_url {
            if !cors_origins.contains(url) {
                cors_origins.push(url.clone());
            }
        }

        Self {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "virtlab.db".to_string()),
            redis_url: env_opt("REDIS_URL"),
            jwt_secret: env_opt("JWT_SECRET"),
            access_token_expire_minutes: env_parse("ACCESS_TOKEN_EXPIRE_MINUTES", 30),
            refresh_token_expire_days: env_parse("REFRESH_TOKEN_EXPIRE_DAYS", 7),
            auth_enabled: env_bool("AUTH_ENABLED", false),
            encryption_secret: env_opt("ENCRYPTION_SECRET"),
            rate_limits: RateLimitOptions {
                api_max_requests: env_parse(
                    "RATE_LIMIT_API_MAX_REQUESTS",
                    defaults.api_max_requests,
                ),
                api_window_seconds: env_parse(
                    "RATE_LIMIT_API_WINDOW_SECONDS",
                    defaults.api_window_seconds,
                ),
                llm_max_requests: env_parse(
                    "RATE_LIMIT_LLM_MAX_REQUESTS",
                    defaults.llm_max_requests,
                ),
                auth_max_requests: env_parse(
                    "RATE_LIMIT_AUTH_MAX_REQUESTS",
                    defaults.auth_max_requests,
                ),
            },
            cors_origins,
            frontend_url,
            provider_keys: ProviderKeys {
                openai: env_opt("OPENAI_API_KEY"),
                anthropic: env_opt("ANTHROPIC_API_KEY"),
                deepseek: env_opt("DEEPSEEK_API_KEY"),
            },
        }
    }

    /// Filesystem path of the SQLite database, stripped of any `sqlite://`
    /// scheme prefix.
    pub fn sqlite_path(&self) -> &str {
        self.database_url
            .strip_prefix("sqlite:///")
            .or_else(|| self.database_url.strip_prefix("sqlite://"))
            .unwrap_or(&self.database_url)
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
