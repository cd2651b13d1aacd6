//! Error types for the AVMU client.
//!
//! Every failure the client can report is one variant of [`AvmuError`].
//! [`AvmuError::kind`] groups variants into the five families callers
//! usually branch on.

use std::io;
use thiserror::Error;

use crate::types::{ControllerState, Path};

/// Broad classification of an [`AvmuError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing parameter, raised before any wire I/O.
    Configuration,
    /// Operation not legal in the controller's current state.
    State,
    /// Socket level: no response, corrupt reply, refused, lost.
    Transport,
    /// The unit answered with a failure status code.
    Protocol,
    /// Requested data is absent or malformed.
    Data,
}

/// Status codes the unit can return in a reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFault {
    BadAttenuator,
    BadCalibration,
    BadHandle,
    UnsupportedFeature,
    TaskArrayInvalid,
    WrongProgramType,
    IndexOutOfBounds,
    PathAlreadyMeasured,
    NoMeasuredPaths,
    ProgramOverflow,
    BadHop,
    BadPath,
    FrequencyOutOfBounds,
    TooManyPoints,
    WrongState,
    Interrupted,
    BadProm,
    EmptyProm,
    EmptyCalibration,
    InvalidParameter,
    Unknown(u8),
}

impl DeviceFault {
    pub fn from_status(code: u8) -> Self {
        match code {
            0x01 => DeviceFault::BadAttenuator,
            0x02 => DeviceFault::BadCalibration,
            0x03 => DeviceFault::BadHandle,
            0x04 => DeviceFault::UnsupportedFeature,
            0x05 => DeviceFault::TaskArrayInvalid,
            0x06 => DeviceFault::WrongProgramType,
            0x07 => DeviceFault::IndexOutOfBounds,
            0x08 => DeviceFault::PathAlreadyMeasured,
            0x09 => DeviceFault::NoMeasuredPaths,
            0x0A => DeviceFault::ProgramOverflow,
            0x0B => DeviceFault::BadHop,
            0x0C => DeviceFault::BadPath,
            0x0D => DeviceFault::FrequencyOutOfBounds,
            0x0E => DeviceFault::TooManyPoints,
            0x0F => DeviceFault::WrongState,
            0x10 => DeviceFault::Interrupted,
            0x11 => DeviceFault::BadProm,
            0x12 => DeviceFault::EmptyProm,
            0x13 => DeviceFault::EmptyCalibration,
            0x14 => DeviceFault::InvalidParameter,
            other => DeviceFault::Unknown(other),
        }
    }

    pub fn status_code(&self) -> u8 {
        match self {
            DeviceFault::BadAttenuator => 0x01,
            DeviceFault::BadCalibration => 0x02,
            DeviceFault::BadHandle => 0x03,
            DeviceFault::UnsupportedFeature => 0x04,
            DeviceFault::TaskArrayInvalid => 0x05,
            DeviceFault::WrongProgramType => 0x06,
            DeviceFault::IndexOutOfBounds => 0x07,
            DeviceFault::PathAlreadyMeasured => 0x08,
            DeviceFault::NoMeasuredPaths => 0x09,
            DeviceFault::ProgramOverflow => 0x0A,
            DeviceFault::BadHop => 0x0B,
            DeviceFault::BadPath => 0x0C,
            DeviceFault::FrequencyOutOfBounds => 0x0D,
            DeviceFault::TooManyPoints => 0x0E,
            DeviceFault::WrongState => 0x0F,
            DeviceFault::Interrupted => 0x10,
            DeviceFault::BadProm => 0x11,
            DeviceFault::EmptyProm => 0x12,
            DeviceFault::EmptyCalibration => 0x13,
            DeviceFault::InvalidParameter => 0x14,
            DeviceFault::Unknown(code) => *code,
        }
    }
}

impl std::fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceFault::Unknown(code) => write!(f, "unknown status 0x{:02X}", code),
            other => write!(f, "{:?} (status 0x{:02X})", other, other.status_code()),
        }
    }
}

#[derive(Error, Debug)]
pub enum AvmuError {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("No IP address configured")]
    MissingIp,

    #[error("No IP port configured")]
    MissingPort,

    #[error("No hop rate configured")]
    MissingHopRate,

    #[error("No frequency plan configured")]
    MissingFrequencies,

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Invalid frequency range: start {start_mhz} MHz, stop {stop_mhz} MHz, {num_points} points")]
    InvalidRange { start_mhz: f64, stop_mhz: f64, num_points: u32 },

    #[error("Frequency {freq_mhz} MHz outside {min_mhz}..={max_mhz} MHz")]
    FrequencyOutOfBounds { freq_mhz: f64, min_mhz: f64, max_mhz: f64 },

    #[error("Frequency {freq_mhz} MHz is not on the synthesizer grid")]
    OffGridFrequency { freq_mhz: f64 },

    #[error("Too many points: {requested} (max {max})")]
    TooManyPoints { requested: u32, max: u32 },

    #[error("Invalid path {0}")]
    InvalidPath(Path),

    #[error("Path {0} is already registered")]
    DuplicatePath(Path),

    #[error("Path limit of {limit} reached")]
    TooManyPaths { limit: usize },

    #[error("Hardware feature not present: {0}")]
    FeatureNotPresent(&'static str),

    // ========================================================================
    // State
    // ========================================================================
    #[error("Cannot {operation} while {state:?}")]
    WrongState { operation: &'static str, state: ControllerState },

    #[error("Operation requires an {expected} measurement program")]
    WrongProgramType { expected: &'static str },

    #[error("No paths registered for measurement")]
    NoMeasuredPaths,

    #[error("Measurement interrupted")]
    Interrupted,

    // ========================================================================
    // Transport
    // ========================================================================
    #[error("Socket error: {0}")]
    Socket(#[from] io::Error),

    #[error("No response within {timeout_ms} ms")]
    NoResponse { timeout_ms: u64 },

    #[error("Corrupt reply: {0}")]
    CorruptReply(String),

    #[error("Connection to unit lost")]
    ConnectionLost,

    #[error("Transport not connected")]
    NotConnected,

    // ========================================================================
    // Protocol
    // ========================================================================
    #[error("Unit refused opcode 0x{opcode:02X}: {fault}")]
    Device { opcode: u8, fault: DeviceFault },

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    // ========================================================================
    // Data
    // ========================================================================
    #[error("Path {0} has no data")]
    PathHasNoData(Path),

    #[error("Path {0} is not registered")]
    UnknownPath(Path),

    #[error("Path {path} already transitioned out of Requested")]
    PathAlreadyMeasured { path: Path },

    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    #[error("Frame holds {actual} samples, plan has {expected}")]
    SampleCountMismatch { expected: usize, actual: usize },

    #[error("Index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
}

impl AvmuError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AvmuError::MissingIp
            | AvmuError::MissingPort
            | AvmuError::MissingHopRate
            | AvmuError::MissingFrequencies
            | AvmuError::InvalidParameter { .. }
            | AvmuError::InvalidRange { .. }
            | AvmuError::FrequencyOutOfBounds { .. }
            | AvmuError::OffGridFrequency { .. }
            | AvmuError::TooManyPoints { .. }
            | AvmuError::InvalidPath(_)
            | AvmuError::DuplicatePath(_)
            | AvmuError::TooManyPaths { .. }
            | AvmuError::FeatureNotPresent(_) => ErrorKind::Configuration,

            AvmuError::WrongState { .. }
            | AvmuError::WrongProgramType { .. }
            | AvmuError::NoMeasuredPaths
            | AvmuError::Interrupted => ErrorKind::State,

            AvmuError::Socket(_)
            | AvmuError::NoResponse { .. }
            | AvmuError::CorruptReply(_)
            | AvmuError::ConnectionLost
            | AvmuError::NotConnected => ErrorKind::Transport,

            AvmuError::Device { .. } | AvmuError::UnexpectedReply(_) => ErrorKind::Protocol,

            AvmuError::PathHasNoData(_)
            | AvmuError::UnknownPath(_)
            | AvmuError::PathAlreadyMeasured { .. }
            | AvmuError::TruncatedFrame { .. }
            | AvmuError::SampleCountMismatch { .. }
            | AvmuError::IndexOutOfBounds { .. } => ErrorKind::Data,
        }
    }

    /// Only a missing reply is worth sending the same command again.
    /// Corruption and device refusals repeat identically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AvmuError::NoResponse { .. })
    }

    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        AvmuError::InvalidParameter { name, reason: reason.into() }
    }
}

pub type AvmuResult<T> = std::result::Result<T, AvmuError>;
