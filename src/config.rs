// Timeouts, link parameters, robot configuration
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

// Control loop frequency
pub const LOOP_HZ: u64 = 10;

// Per-attempt wait for a confirmation frame before resending
pub const ACK_TIMEOUT: Duration = Duration::from_millis(1000);

// Bounded wait for the startup link check
pub const QUERY_TIMEOUT: Duration = Duration::from_millis(2000);

// Settle time after a software reset before talking to the robot again
pub const RESET_SETTLE: Duration = Duration::from_millis(500);

// Basestation serial link
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUDRATE: u32 = 230_400;

// Robot address on the radio network (matches the firmware default)
pub const DEFAULT_DEST_ADDR: u16 = 0x2052;

// Gains handshake: resend budget and default PID gains, five per motor
pub const DEFAULT_GAIN_RETRIES: u32 = 8;
pub const DEFAULT_MOTOR_GAINS: [i16; 10] = [30000, 100, 0, 0, 10, 30000, 100, 0, 0, 10];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("bad robot address {0:?} (expected 16-bit hex, e.g. \"2052\")")]
    BadAddress(String),

    #[error("motor gains need exactly 10 values, got {0}")]
    BadGains(usize),
}

/// Parse a 16-bit robot address written as hex, with or without `0x`.
pub fn parse_address(text: &str) -> Result<u16, ConfigError> {
    let digits = text.trim().trim_start_matches("0x");
    u16::from_str_radix(digits, 16).map_err(|_| ConfigError::BadAddress(text.to_string()))
}

/// Optional JSON config file; every field falls back to the compiled
/// defaults and is overridden by CLI flags.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<String>,
    pub baudrate: Option<u32>,
    pub address: Option<String>,
    pub gains: Option<Vec<i16>>,
    pub open_loop: Option<bool>,
}

/// Resolved runtime configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: String,
    pub baudrate: u32,
    pub address: u16,
    pub gains: [i16; 10],
    pub gain_retries: u32,
    /// Raw open-loop driving: skip the gains handshake and link check
    pub open_loop: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baudrate: DEFAULT_BAUDRATE,
            address: DEFAULT_DEST_ADDR,
            gains: DEFAULT_MOTOR_GAINS,
            gain_retries: DEFAULT_GAIN_RETRIES,
            open_loop: false,
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<FileConfig, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl Settings {
    /// Overlay values from a config file onto these settings.
    pub fn apply_file(&mut self, file: FileConfig) -> Result<(), ConfigError> {
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(baudrate) = file.baudrate {
            self.baudrate = baudrate;
        }
        if let Some(address) = file.address {
            self.address = parse_address(&address)?;
        }
        if let Some(gains) = file.gains {
            self.gains = gains
                .as_slice()
                .try_into()
                .map_err(|_| ConfigError::BadGains(gains.len()))?;
        }
        if let Some(open_loop) = file.open_loop {
            self.open_loop = open_loop;
        }
        Ok(())
    }
}
