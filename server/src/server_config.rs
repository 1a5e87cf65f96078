use std::{net::{IpAddr, Ipv4Addr, SocketAddr}, path::{Path, PathBuf}};

use anyhow::Context;

pub const CONFIG_DIR: &str = "config";
pub const SERVER_CONFIG_FILE: &str = "server.conf";
pub const DETECTION_CONFIG_FILE: &str = "detection.conf";

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub http_port: u16,
    pub device_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: 8080,
            device_port: 3169,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, anyhow::Error> {
        let mut config = Self::default();

        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=')
                .with_context(|| format!("Expected key = value, got '{}'", line))?;
            let (key, value) = (key.trim(), value.trim());

            match key {
                "bind" => config.bind = value.parse().with_context(|| format!("Invalid address '{}'", value))?,
                "http_port" => config.http_port = value.parse().with_context(|| format!("Invalid port '{}'", value))?,
                "device_port" => config.device_port = value.parse().with_context(|| format!("Invalid port '{}'", value))?,
                _ => tracing::warn!("Unknown server config key: {}", key),
            }
        }

        Ok(config)
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.http_port)
    }

    pub fn device_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.device_port)
    }
}

/// `config/` under the project root, or under the working directory when no root is found.
pub fn config_dir() -> PathBuf {
    match project_root::get_project_root() {
        Ok(root) => root.join(CONFIG_DIR),
        Err(err) => {
            tracing::warn!("No project root ({}), using ./{}", err, CONFIG_DIR);
            PathBuf::from(CONFIG_DIR)
        }
    }
}
