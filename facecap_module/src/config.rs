use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default UDP port the capture client streams to.
pub const DEFAULT_PORT: u16 = 11111;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub port: u16,
    /// Log every rejected datagram.
    pub verbose: bool,
    /// Longest a single device update waits for data.
    pub poll_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            verbose: false,
            poll_timeout_secs: 1,
        }
    }
}

impl DeviceConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// Reads the config at `path`, writing the defaults there first if the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading config from {:?}", path);
            let file = fs::File::open(path).with_context(|| format!("opening {:?}", path))?;
            let reader = std::io::BufReader::new(file);
            let config = serde_json::from_reader(reader)
                .with_context(|| format!("parsing {:?}", path))?;
            Ok(config)
        } else {
            info!("Config not found. Creating default at {:?}", path);
            let config = Self::default();
            let file = fs::File::create(path).with_context(|| format!("creating {:?}", path))?;
            let writer = std::io::BufWriter::new(file);
            serde_json::to_writer_pretty(writer, &config)?;
            Ok(config)
        }
    }
}
