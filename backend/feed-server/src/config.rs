//! Service configuration from environment variables, with the
//! `--linkhostport host:port` flag overriding the link base.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Port the server binds
    pub port: u16,
    /// host:port used when rendering absolute feed links
    pub link_host_port: String,
    /// Reconnect budget for the initial database connection
    pub max_connect_retries: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let port: u16 = std::env::var("APP_PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()?;

        Ok(Config {
            port,
            link_host_port: std::env::var("LINK_HOST_PORT")
                .unwrap_or_else(|_| format!("localhost:{}", port)),
            max_connect_retries: std::env::var("SERVER_CONNECT_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        })
    }

    /// Apply the `--linkhostport host:port` command-line override.
    pub fn apply_args<I: IntoIterator<Item = String>>(mut self, args: I) -> Self {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if arg == "--linkhostport" {
                if let Some(value) = args.next() {
                    self.link_host_port = value;
                }
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            port: 5000,
            link_host_port: "localhost:5000".to_string(),
            max_connect_retries: 5,
        }
    }

    #[test]
    fn linkhostport_flag_overrides_env() {
        let config = base_config().apply_args(
            ["feed-server", "--linkhostport", "feeds.example.com:80"]
                .map(String::from),
        );
        assert_eq!(config.link_host_port, "feeds.example.com:80");
    }

    #[test]
    fn missing_flag_keeps_default() {
        let config = base_config().apply_args(["feed-server"].map(String::from));
        assert_eq!(config.link_host_port, "localhost:5000");
    }

    #[test]
    fn dangling_flag_is_ignored() {
        let config = base_config().apply_args(["feed-server", "--linkhostport"].map(String::from));
        assert_eq!(config.link_host_port, "localhost:5000");
    }
}
