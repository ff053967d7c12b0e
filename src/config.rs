use std::path::Path;
use std::time::Duration;

use derive_more::{Display, Error, From};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_EVICTION_WINDOW, DEFAULT_ID_BITS, DEFAULT_IN_FLIGHT_TIMEOUT_MS, DEFAULT_MAX_PAYLOAD,
    DEFAULT_QUEUE_DEPTH, DEFAULT_SWEEP_INTERVAL_MS, MAX_ID_BITS, MAX_PAYLOAD_LIMIT, MIN_ID_BITS,
};
use crate::protocol::{EvictionPolicy, Fragmenter, FrameIdSpace, Reassembler};

#[derive(Debug, Display, Error, From)]
pub enum ConfigError {
    #[display("cannot read config: {_0}")]
    #[from]
    Io(#[error(source)] std::io::Error),
    #[display("cannot parse config: {_0}")]
    #[from]
    Parse(#[error(source)] toml::de::Error),
    #[display("max_payload must be within 1..={max}, got {value}")]
    MaxPayload { value: usize, max: usize },
    #[display("id_bits must be within {min}..={max}, got {value}")]
    IdBits { value: u8, min: u8, max: u8 },
    #[display("eviction_window must be below {max} for {id_bits}-bit ids, got {value}")]
    EvictionWindow { value: u16, max: u32, id_bits: u8 },
    #[display("sweep_interval_ms must be positive")]
    SweepInterval,
    #[display("queue_depth must be positive")]
    QueueDepth,
}

/// Protocol and loop tuning shared by both ends. Zero disables
/// `eviction_window` and `in_flight_timeout_ms`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    pub max_payload: usize,
    pub id_bits: u8,
    pub eviction_window: u16,
    pub in_flight_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub queue_depth: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            id_bits: DEFAULT_ID_BITS,
            eviction_window: DEFAULT_EVICTION_WINDOW,
            in_flight_timeout_ms: DEFAULT_IN_FLIGHT_TIMEOUT_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl StreamConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_PAYLOAD_LIMIT).contains(&self.max_payload) {
            return Err(ConfigError::MaxPayload {
                value: self.max_payload,
                max: MAX_PAYLOAD_LIMIT,
            });
        }
        let space = self.id_space()?;
        if u32::from(self.eviction_window) >= space.half() {
            return Err(ConfigError::EvictionWindow {
                value: self.eviction_window,
                max: space.half(),
                id_bits: self.id_bits,
            });
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::SweepInterval);
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::QueueDepth);
        }
        Ok(())
    }

    pub fn id_space(&self) -> Result<FrameIdSpace, ConfigError> {
        FrameIdSpace::new(self.id_bits).ok_or(ConfigError::IdBits {
            value: self.id_bits,
            min: MIN_ID_BITS,
            max: MAX_ID_BITS,
        })
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            window: (self.eviction_window > 0).then_some(self.eviction_window),
            timeout: (self.in_flight_timeout_ms > 0)
                .then(|| Duration::from_millis(self.in_flight_timeout_ms)),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn fragmenter(&self) -> Result<Fragmenter, ConfigError> {
        self.validate()?;
        Fragmenter::new(self.max_payload, self.id_space()?).ok_or(ConfigError::MaxPayload {
            value: self.max_payload,
            max: MAX_PAYLOAD_LIMIT,
        })
    }

    pub fn reassembler(&self) -> Result<Reassembler, ConfigError> {
        self.validate()?;
        Ok(Reassembler::new(self.id_space()?, self.eviction_policy()))
    }
}
