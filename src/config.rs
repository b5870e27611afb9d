use std::net::{IpAddr, Ipv4Addr};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MONTH_CONCURRENCY: usize = 6;

/// Runtime configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Upper bound on concurrent month fetches during a full harvest.
    pub month_concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            month_concurrency: DEFAULT_MONTH_CONCURRENCY,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = ServerConfig::default();
        ServerConfig {
            bind_addr: env_parsed("SUBCAL_BIND", defaults.bind_addr),
            port: env_parsed("SUBCAL_PORT", defaults.port),
            month_concurrency: env_parsed("SUBCAL_MONTH_CONCURRENCY", defaults.month_concurrency)
                .max(1),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.month_concurrency, 6);
    }
}
