//! Frequency list construction and validation.
//!
//! Everything here is pure computation over a [`FrequencyGrid`] describing
//! what the unit's synthesizer can generate. Snapping to the grid is always
//! an explicit call; [`FrequencyPlan::set_frequencies`] rejects off-grid
//! values instead of moving them.

use serde::{Deserialize, Serialize};

use crate::error::{AvmuError, AvmuResult};
use crate::types::HardwareDetails;

/// Tolerance, in grid steps, for treating a float as sitting on a grid point.
const GRID_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencySpec {
    pub start_freq_mhz: f64,
    pub stop_freq_mhz: f64,
    pub num_points: u32,
}

impl FrequencySpec {
    pub fn new(start_freq_mhz: f64, stop_freq_mhz: f64, num_points: u32) -> Self {
        FrequencySpec { start_freq_mhz, stop_freq_mhz, num_points }
    }

    fn invalid_range(&self) -> AvmuError {
        AvmuError::InvalidRange {
            start_mhz: self.start_freq_mhz,
            stop_mhz: self.stop_freq_mhz,
            num_points: self.num_points,
        }
    }
}

/// Inclusive frequency range in which the transmitter stays off.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExclusionBand {
    pub low_mhz: f64,
    pub high_mhz: f64,
}

impl ExclusionBand {
    pub fn new(low_mhz: f64, high_mhz: f64) -> AvmuResult<Self> {
        let band = ExclusionBand { low_mhz, high_mhz };
        band.validate()?;
        Ok(band)
    }

    pub fn validate(&self) -> AvmuResult<()> {
        if !self.low_mhz.is_finite() || !self.high_mhz.is_finite() {
            return Err(AvmuError::invalid("exclusion_band", "edges must be finite"));
        }
        if self.low_mhz <= 0.0 || self.high_mhz <= 0.0 {
            return Err(AvmuError::invalid("exclusion_band", "edges must be positive"));
        }
        if self.low_mhz > self.high_mhz {
            return Err(AvmuError::invalid(
                "exclusion_band",
                format!("low {} MHz above high {} MHz", self.low_mhz, self.high_mhz),
            ));
        }
        Ok(())
    }

    pub fn contains(&self, freq_mhz: f64) -> bool {
        freq_mhz >= self.low_mhz && freq_mhz <= self.high_mhz
    }
}

/// True if `freq_mhz` lies inside any band, edges included.
pub fn is_excluded(freq_mhz: f64, bands: &[ExclusionBand]) -> bool {
    bands.iter().any(|b| b.contains(freq_mhz))
}

/// Exactly `num_points` evenly spaced frequencies from start to stop inclusive.
pub fn generate_linear_sweep(spec: &FrequencySpec) -> AvmuResult<Vec<f64>> {
    let FrequencySpec { start_freq_mhz: start, stop_freq_mhz: stop, num_points } = *spec;
    if num_points < 1 || !start.is_finite() || !stop.is_finite() || start > stop {
        return Err(spec.invalid_range());
    }
    if num_points == 1 {
        return Ok(vec![start]);
    }

    let intervals = (num_points - 1) as f64;
    let spacing = (stop - start) / intervals;
    let mut freqs: Vec<f64> = (0..num_points).map(|i| start + spacing * i as f64).collect();
    // Pin the endpoint so accumulated rounding never moves it.
    if let Some(last) = freqs.last_mut() {
        *last = stop;
    }
    Ok(freqs)
}

/// Round to nearest integer, exact halves going down.
fn round_half_down(x: f64) -> i64 {
    (x - 0.5 - GRID_EPSILON).ceil() as i64
}

// ============================================================================
// Synthesizer grid
// ============================================================================

/// The set of frequencies the unit can synthesize.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyGrid {
    pub min_mhz: f64,
    pub max_mhz: f64,
    pub step_hz: u32,
    pub max_points: u32,
}

impl From<&HardwareDetails> for FrequencyGrid {
    fn from(hw: &HardwareDetails) -> Self {
        FrequencyGrid {
            min_mhz: hw.minimum_frequency_mhz,
            max_mhz: hw.maximum_frequency_mhz,
            step_hz: hw.frequency_step_hz.max(1),
            max_points: hw.maximum_points,
        }
    }
}

impl FrequencyGrid {
    fn to_steps(&self, freq_mhz: f64) -> f64 {
        freq_mhz * 1_000_000.0 / self.step_hz as f64
    }

    fn from_steps(&self, k: i64) -> f64 {
        k as f64 * self.step_hz as f64 / 1_000_000.0
    }

    fn min_step(&self) -> i64 {
        (self.to_steps(self.min_mhz) - GRID_EPSILON).ceil() as i64
    }

    fn max_step(&self) -> i64 {
        (self.to_steps(self.max_mhz) + GRID_EPSILON).floor() as i64
    }

    fn check_bounds(&self, freq_mhz: f64) -> AvmuResult<()> {
        let tolerance = self.step_hz as f64 / 1_000_000.0 * GRID_EPSILON;
        if !freq_mhz.is_finite()
            || freq_mhz < self.min_mhz - tolerance
            || freq_mhz > self.max_mhz + tolerance
        {
            return Err(AvmuError::FrequencyOutOfBounds {
                freq_mhz,
                min_mhz: self.min_mhz,
                max_mhz: self.max_mhz,
            });
        }
        Ok(())
    }

    fn nearest_step(&self, freq_mhz: f64) -> AvmuResult<i64> {
        self.check_bounds(freq_mhz)?;
        let k = round_half_down(self.to_steps(freq_mhz));
        Ok(k.clamp(self.min_step(), self.max_step()))
    }

    /// Closest synthesizable frequency; ties resolve to the lower one.
    pub fn nearest_legal_frequency(&self, freq_mhz: f64) -> AvmuResult<f64> {
        Ok(self.from_steps(self.nearest_step(freq_mhz)?))
    }

    pub fn is_legal(&self, freq_mhz: f64) -> bool {
        if self.check_bounds(freq_mhz).is_err() {
            return false;
        }
        let steps = self.to_steps(freq_mhz);
        (steps - steps.round()).abs() < GRID_EPSILON
    }

    /// Adjust start and stop so every point of an N-point linear sweep lands
    /// on the grid with identical spacing. N is unchanged.
    ///
    /// With N of 0 or 1, or a zero span, each endpoint is snapped on its own.
    pub fn fix_linear_sweep_limits(&self, spec: &FrequencySpec) -> AvmuResult<FrequencySpec> {
        if spec.num_points > self.max_points {
            return Err(AvmuError::TooManyPoints { requested: spec.num_points, max: self.max_points });
        }
        if spec.start_freq_mhz > spec.stop_freq_mhz {
            return Err(spec.invalid_range());
        }

        let start_k = self.nearest_step(spec.start_freq_mhz)?;
        self.check_bounds(spec.stop_freq_mhz)?;

        if spec.num_points <= 1 || spec.start_freq_mhz == spec.stop_freq_mhz {
            let stop_k = self.nearest_step(spec.stop_freq_mhz)?;
            return Ok(FrequencySpec {
                start_freq_mhz: self.from_steps(start_k),
                stop_freq_mhz: self.from_steps(stop_k),
                num_points: spec.num_points,
            });
        }

        let intervals = (spec.num_points - 1) as i64;
        let span_steps = self.to_steps(spec.stop_freq_mhz) - start_k as f64;
        let mut spacing = round_half_down(span_steps / intervals as f64).max(0);
        let max_k = self.max_step();
        while spacing > 0 && start_k + spacing * intervals > max_k {
            spacing -= 1;
        }

        Ok(FrequencySpec {
            start_freq_mhz: self.from_steps(start_k),
            stop_freq_mhz: self.from_steps(start_k + spacing * intervals),
            num_points: spec.num_points,
        })
    }

    /// Strict check of an explicit frequency list.
    pub fn validate_list(&self, freqs: &[f64]) -> AvmuResult<()> {
        if freqs.is_empty() {
            return Err(AvmuError::invalid("frequencies", "list is empty"));
        }
        if freqs.len() > self.max_points as usize {
            return Err(AvmuError::TooManyPoints { requested: freqs.len() as u32, max: self.max_points });
        }
        for &f in freqs {
            self.check_bounds(f)?;
            if !self.is_legal(f) {
                return Err(AvmuError::OffGridFrequency { freq_mhz: f });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Plan held by the controller
// ============================================================================

/// Frequency list plus per-point exclusion mask, as sent to the unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    pub frequencies: Vec<f64>,
    pub excluded: Vec<bool>,
}

impl SweepPlan {
    pub fn new(frequencies: Vec<f64>, bands: &[ExclusionBand]) -> Self {
        let excluded = frequencies.iter().map(|f| is_excluded(*f, bands)).collect();
        SweepPlan { frequencies, excluded }
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    pub fn active_points(&self) -> usize {
        self.excluded.iter().filter(|x| !**x).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrequencyPlan {
    frequencies: Option<Vec<f64>>,
    bands: Vec<ExclusionBand>,
}

impl FrequencyPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_frequencies(&mut self, grid: &FrequencyGrid, freqs: &[f64]) -> AvmuResult<()> {
        grid.validate_list(freqs)?;
        self.frequencies = Some(freqs.to_vec());
        Ok(())
    }

    pub fn frequencies(&self) -> Option<&[f64]> {
        self.frequencies.as_deref()
    }

    pub fn add_exclusion_band(&mut self, band: ExclusionBand) -> AvmuResult<()> {
        band.validate()?;
        self.bands.push(band);
        Ok(())
    }

    pub fn clear_exclusion_bands(&mut self) {
        self.bands.clear();
    }

    pub fn exclusion_band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn exclusion_band(&self, index: usize) -> AvmuResult<ExclusionBand> {
        self.bands
            .get(index)
            .copied()
            .ok_or(AvmuError::IndexOutOfBounds { index, len: self.bands.len() })
    }

    pub fn bands(&self) -> &[ExclusionBand] {
        &self.bands
    }

    pub fn sweep(&self) -> AvmuResult<SweepPlan> {
        let freqs = self.frequencies.as_ref().ok_or(AvmuError::MissingFrequencies)?;
        Ok(SweepPlan::new(freqs.clone(), &self.bands))
    }
}
