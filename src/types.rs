use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest port index any switchboard exposes.
pub const MAX_PORT_INDEX: u8 = 7;

/// Number of receiver channels in the unit.
pub const MAX_RECEIVERS: u8 = 4;

/// Sweep timer rate: 32.768 MHz divided by 256.
pub const SWEEP_TICKS_PER_SECOND: f64 = 128_000.0;

// ============================================================================
// Ports and paths
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxPort {
    None,
    Port(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RxPort {
    None,
    Port(u8),
}

impl TxPort {
    pub fn index(&self) -> Option<u8> {
        match self {
            TxPort::None => None,
            TxPort::Port(n) => Some(*n),
        }
    }

    /// Wire byte; 0xFF is "no port".
    pub fn wire(&self) -> u8 {
        self.index().unwrap_or(0xFF)
    }

    pub fn from_wire(b: u8) -> Self {
        if b == 0xFF { TxPort::None } else { TxPort::Port(b) }
    }
}

impl RxPort {
    pub fn index(&self) -> Option<u8> {
        match self {
            RxPort::None => None,
            RxPort::Port(n) => Some(*n),
        }
    }

    pub fn wire(&self) -> u8 {
        self.index().unwrap_or(0xFF)
    }

    pub fn from_wire(b: u8) -> Self {
        if b == 0xFF { RxPort::None } else { RxPort::Port(b) }
    }
}

/// One transmit-port to receive-port route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    pub tx: TxPort,
    pub rx: RxPort,
}

impl Path {
    pub fn new(tx: TxPort, rx: RxPort) -> Self {
        Path { tx, rx }
    }

    pub fn ports(tx: u8, rx: u8) -> Self {
        Path { tx: TxPort::Port(tx), rx: RxPort::Port(rx) }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tx {
            TxPort::None => write!(f, "tx-none")?,
            TxPort::Port(n) => write!(f, "tx{}", n)?,
        }
        match self.rx {
            RxPort::None => write!(f, "->rx-none"),
            RxPort::Port(n) => write!(f, "->rx{}", n),
        }
    }
}

/// Parses `"<tx>:<rx>"`, e.g. `"0:1"`.
impl FromStr for Path {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tx, rx) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <tx>:<rx>, got '{}'", s))?;
        let tx: u8 = tx.trim().parse().map_err(|e| format!("bad tx port '{}': {}", tx, e))?;
        let rx: u8 = rx.trim().parse().map_err(|e| format!("bad rx port '{}': {}", rx, e))?;
        Ok(Path::ports(tx, rx))
    }
}

// ============================================================================
// Acquisition settings
// ============================================================================

/// Frequency hop rate in points per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HopRate {
    Hop90K,
    Hop45K,
    Hop30K,
    Hop15K,
    Hop7K,
    Hop3K,
    Hop2K,
    Hop1K,
    Hop550,
    Hop312,
    Hop156,
    Hop78,
    Hop39,
    Hop20,
}

impl HopRate {
    pub const ALL: [HopRate; 14] = [
        HopRate::Hop90K,
        HopRate::Hop45K,
        HopRate::Hop30K,
        HopRate::Hop15K,
        HopRate::Hop7K,
        HopRate::Hop3K,
        HopRate::Hop2K,
        HopRate::Hop1K,
        HopRate::Hop550,
        HopRate::Hop312,
        HopRate::Hop156,
        HopRate::Hop78,
        HopRate::Hop39,
        HopRate::Hop20,
    ];

    pub fn points_per_second(&self) -> u32 {
        match self {
            HopRate::Hop90K => 90_000,
            HopRate::Hop45K => 45_000,
            HopRate::Hop30K => 30_000,
            HopRate::Hop15K => 15_000,
            HopRate::Hop7K => 7_000,
            HopRate::Hop3K => 3_000,
            HopRate::Hop2K => 2_000,
            HopRate::Hop1K => 1_000,
            HopRate::Hop550 => 550,
            HopRate::Hop312 => 312,
            HopRate::Hop156 => 156,
            HopRate::Hop78 => 78,
            HopRate::Hop39 => 39,
            HopRate::Hop20 => 20,
        }
    }

    /// 90K is reserved in firmware and refused by the unit.
    pub fn is_supported(&self) -> bool {
        !matches!(self, HopRate::Hop90K)
    }

    pub fn code(&self) -> u8 {
        Self::ALL.iter().position(|h| h == self).unwrap_or(0) as u8
    }

}

impl FromStr for HopRate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|h| {
                let pps = h.points_per_second();
                wanted == pps.to_string() || (pps >= 1_000 && wanted == format!("{}k", pps / 1_000))
            })
            .ok_or_else(|| format!("unknown hop rate '{}'", s))
    }
}

/// IF gain stage: firmware default or 0..=45 dB in 3 dB steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IfGain {
    UseDefault,
    Db(u8),
}

impl IfGain {
    pub const MAX_DB: u8 = 45;
    pub const STEP_DB: u8 = 3;

    pub fn is_valid(&self) -> bool {
        match self {
            IfGain::UseDefault => true,
            IfGain::Db(db) => *db <= Self::MAX_DB && db % Self::STEP_DB == 0,
        }
    }

    pub fn wire(&self) -> u8 {
        match self {
            IfGain::UseDefault => 0xFF,
            IfGain::Db(db) => db / Self::STEP_DB,
        }
    }

    pub fn from_wire(b: u8) -> Self {
        if b == 0xFF { IfGain::UseDefault } else { IfGain::Db(b.saturating_mul(Self::STEP_DB)) }
    }
}

impl Default for IfGain {
    fn default() -> Self {
        IfGain::UseDefault
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncPulseMode {
    #[default]
    Ignore,
    Generate,
    Receive,
}

impl SyncPulseMode {
    pub fn wire(&self) -> u8 {
        match self {
            SyncPulseMode::Ignore => 0,
            SyncPulseMode::Generate => 1,
            SyncPulseMode::Receive => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MeasurementType {
    #[default]
    NoneSet,
    Sync,
    Async,
}

impl MeasurementType {
    pub fn wire(&self) -> u8 {
        match self {
            MeasurementType::NoneSet => 0,
            MeasurementType::Sync => 1,
            MeasurementType::Async => 2,
        }
    }
}

/// How sample pairs in a sweep frame are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    #[default]
    Iq,
    MagPhase,
}

impl SampleFormat {
    pub fn wire(&self) -> u8 {
        match self {
            SampleFormat::Iq => 0,
            SampleFormat::MagPhase => 1,
        }
    }

    pub fn from_wire(b: u8) -> Option<Self> {
        match b {
            0 => Some(SampleFormat::Iq),
            1 => Some(SampleFormat::MagPhase),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    Uninitialized,
    Idle,
    TaskRunning,
    TaskStopped,
}

// ============================================================================
// Hardware description
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchboardType {
    Simple4Port,
    Tdd4Port,
    NoSwitchBoard,
    Simple8Port,
    SParameter,
}

impl SwitchboardType {
    pub fn tx_ports(&self) -> &'static [u8] {
        match self {
            SwitchboardType::Simple4Port | SwitchboardType::Tdd4Port => &[0, 1, 2, 3],
            SwitchboardType::NoSwitchBoard => &[0],
            SwitchboardType::Simple8Port => &[0, 1, 2, 3, 4, 5, 6, 7],
            SwitchboardType::SParameter => &[0, 1, 2, 3, 4],
        }
    }

    pub fn rx_ports(&self) -> &'static [u8] {
        match self {
            SwitchboardType::Simple4Port | SwitchboardType::Tdd4Port => &[0, 1, 2, 3],
            SwitchboardType::NoSwitchBoard => &[1],
            SwitchboardType::Simple8Port => &[0, 1, 2, 3, 4, 5, 6, 7],
            SwitchboardType::SParameter => &[0, 1, 2, 3, 4],
        }
    }

    pub fn supports(&self, path: &Path) -> bool {
        match (path.tx, path.rx) {
            (TxPort::Port(tx), RxPort::Port(rx)) => {
                self.tx_ports().contains(&tx) && self.rx_ports().contains(&rx)
            }
            _ => false,
        }
    }

    pub fn is_tdd(&self) -> bool {
        matches!(self, SwitchboardType::Tdd4Port)
    }

    pub fn wire(&self) -> u8 {
        match self {
            SwitchboardType::Simple4Port => 0,
            SwitchboardType::Tdd4Port => 1,
            SwitchboardType::NoSwitchBoard => 2,
            SwitchboardType::Simple8Port => 3,
            SwitchboardType::SParameter => 4,
        }
    }

    pub fn from_wire(b: u8) -> Option<Self> {
        match b {
            0 => Some(SwitchboardType::Simple4Port),
            1 => Some(SwitchboardType::Tdd4Port),
            2 => Some(SwitchboardType::NoSwitchBoard),
            3 => Some(SwitchboardType::Simple8Port),
            4 => Some(SwitchboardType::SParameter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HardwareFeatures {
    pub has_encoders: bool,
    pub has_serial_port: bool,
    pub has_attenuators: bool,
    pub has_multiple_receivers: bool,
    pub has_scan_trigger_in: bool,
    pub has_scan_trigger_out: bool,
}

impl HardwareFeatures {
    pub fn bits(&self) -> u8 {
        (self.has_encoders as u8)
            | (self.has_serial_port as u8) << 1
            | (self.has_attenuators as u8) << 2
            | (self.has_multiple_receivers as u8) << 3
            | (self.has_scan_trigger_in as u8) << 4
            | (self.has_scan_trigger_out as u8) << 5
    }

    pub fn from_bits(b: u8) -> Self {
        HardwareFeatures {
            has_encoders: b & 0x01 != 0,
            has_serial_port: b & 0x02 != 0,
            has_attenuators: b & 0x04 != 0,
            has_multiple_receivers: b & 0x08 != 0,
            has_scan_trigger_in: b & 0x10 != 0,
            has_scan_trigger_out: b & 0x20 != 0,
        }
    }
}

/// Static description of the connected unit, reported at connect time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareDetails {
    pub minimum_frequency_mhz: f64,
    pub maximum_frequency_mhz: f64,
    /// Synthesizer resolution; legal frequencies are integer multiples of it.
    pub frequency_step_hz: u32,
    pub maximum_points: u32,
    pub serial_number: u32,
    pub band_boundaries_mhz: Vec<f64>,
    pub switchboard: SwitchboardType,
    pub features: HardwareFeatures,
}

impl Default for HardwareDetails {
    fn default() -> Self {
        HardwareDetails {
            minimum_frequency_mhz: 50.0,
            maximum_frequency_mhz: 6_000.0,
            frequency_step_hz: 250_000,
            maximum_points: 4_096,
            serial_number: 0,
            band_boundaries_mhz: Vec::new(),
            switchboard: SwitchboardType::Simple4Port,
            features: HardwareFeatures::default(),
        }
    }
}

// ============================================================================
// Sweep data
// ============================================================================

/// Gain configuration in effect when a sweep was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GainSnapshot {
    pub if_gain: IfGain,
    pub pad_12db: bool,
}

/// Encoder and serial peripheral data attached to a sweep.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SerialMetadata {
    pub shaft_encoder_left: Option<u32>,
    pub shaft_encoder_right: Option<u32>,
    pub serial_data_age: Option<u32>,
    pub serial_data: Vec<u8>,
}

/// One decoded sweep for one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRecord {
    pub path: Path,
    pub timestamp_ticks: u32,
    pub timestamp_seconds: f64,
    pub sweep_number: u32,
    pub format: SampleFormat,
    pub frequencies_mhz: Vec<f64>,
    pub samples: Vec<Complex64>,
    /// False where the frequency falls in an exclusion band.
    pub valid: Vec<bool>,
    pub gain: GainSnapshot,
    pub serial: Option<SerialMetadata>,
}

impl SweepRecord {
    pub fn num_points(&self) -> usize {
        self.samples.len()
    }

    /// Samples paired with their frequency, skipping excluded points.
    pub fn valid_samples(&self) -> impl Iterator<Item = (f64, Complex64)> + '_ {
        self.frequencies_mhz
            .iter()
            .zip(self.samples.iter())
            .zip(self.valid.iter())
            .filter(|(_, ok)| **ok)
            .map(|((f, s), _)| (*f, *s))
    }
}
