use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path as FsPath;

use crate::error::{AvmuError, AvmuResult};
use crate::paths::DEFAULT_PATH_LIMIT;
use crate::types::{HardwareDetails, HopRate, IfGain, MeasurementType, SampleFormat, SyncPulseMode, MAX_RECEIVERS};

/// Ports the unit accepts commands on.
pub const MIN_IP_PORT: u16 = 1025;
pub const MAX_IP_PORT: u16 = 1279;

pub const DEFAULT_TIMEOUT_MS: u64 = 150;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const MAX_ATTENUATION_DB: u8 = 31;
pub const MAX_SERIAL_BUFFER: u16 = 2_048;

/// Everything sent to the unit in the configuration command, plus the
/// client-side transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ip_address: Option<Ipv4Addr>,
    pub ip_port: Option<u16>,
    pub hop_rate: Option<HopRate>,
    pub sync_pulse_mode: SyncPulseMode,
    pub timeout_ms: u64,
    pub tdd: TddSettings,
    pub gain: IfGain,
    pub receiver_12db_pad: bool,
    /// Bit n enables receiver n.
    pub receiver_enable_mask: u8,
    pub attenuator_db: Option<u8>,
    pub measurement_type: MeasurementType,
    pub sample_format: SampleFormat,
    pub send_sweep_timer: bool,
    pub reset_frame_counter_on_start: bool,
    pub shaft_encoder: ShaftEncoderSettings,
    pub serial_port: SerialPortSettings,
    /// Attempts per path before it is recorded as NoData.
    pub max_attempts: u32,
    pub path_limit: usize,
}

/// Time-division-duplex switching. Timings are in microseconds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TddSettings {
    pub active: bool,
    pub enabled: bool,
    pub nulling_enabled: bool,
    pub power_amp_on: bool,
    pub slave: bool,
    pub attenuator_enabled: bool,
    pub lna_enabled: bool,
    pub attenuator_value: u8,
    pub tx: u32,
    pub tx_to_rx1: u32,
    pub rx1: u32,
    pub rx1_to_rx2: u32,
    pub rx2: u32,
    pub rx2_to_tx: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaftEncoderSettings {
    pub enabled: bool,
    pub reset_on_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialPortSettings {
    pub enabled: bool,
    pub buffer_size: u16,
}

impl Default for SerialPortSettings {
    fn default() -> Self {
        SerialPortSettings { enabled: false, buffer_size: 128 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            ip_address: None,
            ip_port: None,
            hop_rate: None,
            sync_pulse_mode: SyncPulseMode::Ignore,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            tdd: TddSettings::default(),
            gain: IfGain::UseDefault,
            receiver_12db_pad: false,
            receiver_enable_mask: 0x01,
            attenuator_db: None,
            measurement_type: MeasurementType::Sync,
            sample_format: SampleFormat::Iq,
            send_sweep_timer: true,
            reset_frame_counter_on_start: false,
            shaft_encoder: ShaftEncoderSettings::default(),
            serial_port: SerialPortSettings::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            path_limit: DEFAULT_PATH_LIMIT,
        }
    }
}

impl SessionConfig {
    pub fn load(path: impl AsRef<FsPath>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: SessionConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn enabled_receivers(&self) -> Vec<u8> {
        (0..MAX_RECEIVERS).filter(|n| self.receiver_enable_mask & (1 << n) != 0).collect()
    }

    /// Checks needed before any connection attempt.
    pub fn validate_connection(&self) -> AvmuResult<(Ipv4Addr, u16)> {
        let ip = self.ip_address.ok_or(AvmuError::MissingIp)?;
        let port = self.ip_port.ok_or(AvmuError::MissingPort)?;
        validate_port(port)?;
        if self.hop_rate.is_none() {
            return Err(AvmuError::MissingHopRate);
        }
        validate_timeout(self.timeout_ms)?;
        if self.max_attempts == 0 {
            return Err(AvmuError::invalid("max_attempts", "must be at least 1"));
        }
        Ok((ip, port))
    }

    /// Full check against the connected hardware. Nothing is sent unless
    /// this passes.
    pub fn validate(&self, hw: &HardwareDetails) -> AvmuResult<()> {
        self.validate_connection()?;

        match self.hop_rate {
            Some(hop) if !hop.is_supported() => {
                return Err(AvmuError::invalid("hop_rate", format!("{:?} is reserved", hop)));
            }
            _ => {}
        }

        if !self.gain.is_valid() {
            return Err(AvmuError::invalid(
                "gain",
                format!("{:?} is not 0..=45 dB in 3 dB steps", self.gain),
            ));
        }

        let all_receivers = (1u8 << MAX_RECEIVERS) - 1;
        if self.receiver_enable_mask == 0 || self.receiver_enable_mask & !all_receivers != 0 {
            return Err(AvmuError::invalid(
                "receiver_enable_mask",
                format!("0x{:02X} must select receivers 0..=3", self.receiver_enable_mask),
            ));
        }
        if self.receiver_enable_mask != 0x01 && !hw.features.has_multiple_receivers {
            return Err(AvmuError::FeatureNotPresent("multiple receivers"));
        }

        if let Some(db) = self.attenuator_db {
            if !hw.features.has_attenuators {
                return Err(AvmuError::FeatureNotPresent("attenuator"));
            }
            if db > MAX_ATTENUATION_DB {
                return Err(AvmuError::invalid("attenuator_db", format!("{} dB above {}", db, MAX_ATTENUATION_DB)));
            }
        }

        if self.tdd.active && !hw.switchboard.is_tdd() {
            return Err(AvmuError::FeatureNotPresent("TDD switchboard"));
        }
        if self.tdd.attenuator_value > MAX_ATTENUATION_DB {
            return Err(AvmuError::invalid("tdd.attenuator_value", "above 31 dB"));
        }

        if self.shaft_encoder.enabled && !hw.features.has_encoders {
            return Err(AvmuError::FeatureNotPresent("shaft encoder"));
        }
        if self.serial_port.enabled {
            if !hw.features.has_serial_port {
                return Err(AvmuError::FeatureNotPresent("serial port"));
            }
            if self.serial_port.buffer_size == 0 || self.serial_port.buffer_size > MAX_SERIAL_BUFFER {
                return Err(AvmuError::invalid(
                    "serial_port.buffer_size",
                    format!("{} not in 1..={}", self.serial_port.buffer_size, MAX_SERIAL_BUFFER),
                ));
            }
        }

        if self.measurement_type == MeasurementType::NoneSet {
            return Err(AvmuError::invalid("measurement_type", "must be Sync or Async"));
        }
        Ok(())
    }
}

pub fn validate_port(port: u16) -> AvmuResult<()> {
    if !(MIN_IP_PORT..=MAX_IP_PORT).contains(&port) {
        return Err(AvmuError::invalid(
            "ip_port",
            format!("{} not in {}..={}", port, MIN_IP_PORT, MAX_IP_PORT),
        ));
    }
    Ok(())
}

pub fn validate_timeout(timeout_ms: u64) -> AvmuResult<()> {
    if timeout_ms == 0 || timeout_ms > u32::MAX as u64 {
        return Err(AvmuError::invalid("timeout_ms", "must be between 1 ms and u32::MAX ms"));
    }
    Ok(())
}
