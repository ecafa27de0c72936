use anyhow::Context;
use axum::http::HeaderValue;
use std::env;

#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    pub bind_address: String,
    pub cors_origins: Vec<HeaderValue>,
    /// Bearer token required on /v1 endpoints. None disables auth; loaded
    /// once at startup rather than read from the environment per request.
    pub api_key: Option<String>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let api_key = env::var("CLAWEVOLVE_API_KEY").ok();
        if let Some(ref key) = api_key {
            if key.len() < 32 {
                tracing::warn!("CLAWEVOLVE_API_KEY is shorter than recommended minimum (32 chars)");
            }
        }

        let port_str = env::var("PORT").unwrap_or_else(|_| "8091".to_string());
        let port = port_str.parse::<u16>().map_err(|_| {
            anyhow::anyhow!(
                "Invalid PORT value '{}': must be an integer between 1 and 65535",
                port_str
            )
        })?;
        if port == 0 {
            anyhow::bail!("Invalid PORT value '0': must be between 1 and 65535");
        }

        // Defaults to loopback only. Set 0.0.0.0 explicitly if network
        // access from other hosts is required.
        let bind_address = match env::var("BIND_ADDRESS") {
            Ok(addr) => {
                addr.parse::<std::net::IpAddr>().with_context(|| {
                    format!(
                        "Invalid BIND_ADDRESS '{}': must be a valid IP address (e.g., '127.0.0.1')",
                        addr
                    )
                })?;
                addr
            }
            Err(_) => "127.0.0.1".to_string(),
        };

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_default();
        // Skip invalid CORS origins with a warning instead of failing startup.
        let cors_origins: Vec<HeaderValue> = cors_origins_str
            .split(',')
            .filter_map(|s| {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
                    tracing::warn!(
                        "Skipping CORS origin with invalid scheme '{}': must be http:// or https://",
                        trimmed
                    );
                    return None;
                }
                match trimmed.parse::<HeaderValue>() {
                    Ok(v) => Some(v),
                    Err(e) => {
                        tracing::warn!("Skipping invalid CORS origin '{}': {}", trimmed, e);
                        None
                    }
                }
            })
            .collect();

        Ok(Self {
            port,
            bind_address,
            cors_origins,
            api_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests run serially (prevents parallel test interference)
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // Guard to ensure env var cleanup even on panic
    struct EnvGuard(&'static str);

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            std::env::remove_var(self.0);
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _p = EnvGuard("PORT");
        let _b = EnvGuard("BIND_ADDRESS");
        let _c = EnvGuard("CORS_ORIGINS");

        let config = AppConfig::load().unwrap();
        assert_eq!(config.port, 8091);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn test_invalid_port_rejected() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::set_var("PORT", "not-a-port");
        let _guard = EnvGuard("PORT");

        assert!(AppConfig::load().is_err());
    }

    #[test]
    fn test_cors_origins_skip_invalid_schemes() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::set_var(
            "CORS_ORIGINS",
            "http://localhost:5173, file:///etc/passwd, https://dash.example.com",
        );
        let _guard = EnvGuard("CORS_ORIGINS");

        let config = AppConfig::load().unwrap();
        assert_eq!(config.cors_origins.len(), 2);
    }
}
