use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ControllerState;

/// Snapshot of a controller, suitable for display or handing to another
/// process as JSON.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AcquisitionStatus {
    // ========================================================================
    // Session
    // ========================================================================
    pub state: ControllerState,

    /// Serial number of the connected unit, once initialized.
    pub serial_number: Option<u32>,

    /// Async task currently running on the unit.
    pub async_task: Option<Uuid>,

    // ========================================================================
    // Plan
    // ========================================================================
    pub num_frequencies: usize,
    pub num_exclusion_bands: usize,
    pub paths_registered: usize,

    // ========================================================================
    // Last acquisition
    // ========================================================================
    pub paths_measured: usize,
    pub paths_no_data: usize,

    /// Completed measure() cycles since initialize.
    pub cycles: u64,

    /// Session time of the newest sweep, seconds.
    pub last_sweep_seconds: Option<f64>,

    /// Unix timestamp of last status update
    pub updated_ts: u64,
}

impl Default for AcquisitionStatus {
    fn default() -> Self {
        AcquisitionStatus {
            state: ControllerState::Uninitialized,
            serial_number: None,
            async_task: None,
            num_frequencies: 0,
            num_exclusion_bands: 0,
            paths_registered: 0,
            paths_measured: 0,
            paths_no_data: 0,
            cycles: 0,
            last_sweep_seconds: None,
            updated_ts: 0,
        }
    }
}
