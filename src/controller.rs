//! Measurement session state machine.
//!
//! ```text
//! Uninitialized --initialize--> Idle --measure--> TaskRunning --done--> Idle
//!                                 |                                      ^
//!                                 +--begin_async--> TaskRunning          |
//!                                                   |  halt / interrupt  |
//!                                                   v                    |
//!                                                TaskStopped --reset-----+
//! ```
//!
//! All methods take `&self`. Session state sits behind one mutex; the
//! command engine sits behind a second one that is `try_lock`ed, so a
//! command issued while another is in flight fails with `WrongState`
//! instead of queueing. `halt_async`, `interrupt_measurement` and `close`
//! are the exception: they raise the interrupt flag, wait for the in-flight
//! call to give up the engine, then finish the stop themselves.

use log::{debug, info, warn};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use std::time::{Duration, SystemTime};

use crate::config::{validate_port, validate_timeout, SerialPortSettings, SessionConfig, ShaftEncoderSettings, TddSettings};
use crate::engine::{AsyncStatus, CommandEngine, PathOutcome, TaskHandle};
use crate::error::{AvmuError, AvmuResult};
use crate::freq::{generate_linear_sweep, ExclusionBand, FrequencyGrid, FrequencyPlan, FrequencySpec, SweepPlan};
use crate::paths::{PathRegistry, PathStatus};
use crate::protocol::MAX_FRAME_SAMPLES;
use crate::status::AcquisitionStatus;
use crate::traits::Transport;
use crate::types::{
    ControllerState, HardwareDetails, HopRate, IfGain, MeasurementType, Path, SampleFormat,
    SweepRecord, SyncPulseMode,
};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

struct Session {
    state: ControllerState,
    config: SessionConfig,
    /// Config changed since it was last sent to the unit.
    config_dirty: bool,
    hardware: Option<HardwareDetails>,
    plan: FrequencyPlan,
    paths: PathRegistry,
    task: Option<TaskHandle>,
    cycles: u64,
    last_sweep_seconds: Option<f64>,
}

impl Session {
    fn require(&self, operation: &'static str, allowed: &[ControllerState]) -> AvmuResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(AvmuError::WrongState { operation, state: self.state })
        }
    }

    fn grid(&self) -> AvmuResult<FrequencyGrid> {
        let hw = self.hardware.as_ref().ok_or(AvmuError::WrongState {
            operation: "query frequency grid",
            state: self.state,
        })?;
        let mut grid = FrequencyGrid::from(hw);
        grid.max_points = grid.max_points.min(MAX_FRAME_SAMPLES);
        Ok(grid)
    }

    fn record(&mut self, outcomes: Vec<(Path, PathOutcome)>) -> AvmuResult<Vec<(Path, PathStatus)>> {
        let mut result = Vec::with_capacity(outcomes.len());
        for (path, outcome) in outcomes {
            match outcome {
                PathOutcome::Measured(sweep) => {
                    self.last_sweep_seconds = Some(sweep.timestamp_seconds);
                    self.paths.mark_measured(&path, sweep)?;
                    result.push((path, PathStatus::Measured));
                }
                PathOutcome::NoData => {
                    self.paths.mark_no_data(&path)?;
                    result.push((path, PathStatus::NoData));
                }
            }
        }
        self.cycles += 1;
        Ok(result)
    }
}

/// Top-level handle on one unit.
pub struct MeasurementController<T: Transport> {
    session: Mutex<Session>,
    engine: Mutex<CommandEngine<T>>,
    interrupt: Arc<AtomicBool>,
    status_shared: Arc<RwLock<AcquisitionStatus>>,
}

// ============================================================================
// IMPLEMENTATION
// ============================================================================

impl<T: Transport> MeasurementController<T> {
    pub fn new(transport: T, status_shared: Arc<RwLock<AcquisitionStatus>>) -> Self {
        let config = SessionConfig::default();
        let interrupt = Arc::new(AtomicBool::new(false));
        let engine = CommandEngine::new(transport, Duration::from_millis(config.timeout_ms))
            .with_interrupt(interrupt.clone());
        MeasurementController {
            session: Mutex::new(Session {
                state: ControllerState::Uninitialized,
                paths: PathRegistry::default(),
                config,
                config_dirty: false,
                hardware: None,
                plan: FrequencyPlan::new(),
                task: None,
                cycles: 0,
                last_sweep_seconds: None,
            }),
            engine: Mutex::new(engine),
            interrupt,
            status_shared,
        }
    }

    pub fn get_status_shared(&self) -> Arc<RwLock<AcquisitionStatus>> {
        self.status_shared.clone()
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Engine for one command, or `WrongState` if another is in flight.
    fn engine(&self, operation: &'static str) -> AvmuResult<MutexGuard<'_, CommandEngine<T>>> {
        match self.engine.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(p)) => Ok(p.into_inner()),
            Err(TryLockError::WouldBlock) => Err(AvmuError::WrongState { operation, state: self.state() }),
        }
    }

    /// Engine for a stop. If a command is in flight it is asked to abort at
    /// its next command boundary and this waits for it.
    fn engine_for_stop(&self) -> MutexGuard<'_, CommandEngine<T>> {
        let guard = match self.engine.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => {
                info!("Command in flight, requesting interrupt");
                self.interrupt.store(true, Ordering::SeqCst);
                self.engine.lock().unwrap_or_else(|p| p.into_inner())
            }
        };
        // The holder may have finished without reaching a boundary.
        self.interrupt.store(false, Ordering::SeqCst);
        guard
    }

    fn try_engine(&self) -> Option<MutexGuard<'_, CommandEngine<T>>> {
        match self.engine.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(p)) => Some(p.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn apply_link_settings(engine: &mut CommandEngine<T>, cfg: &SessionConfig) {
        engine.set_timeout(Duration::from_millis(cfg.timeout_ms));
        engine.set_max_attempts(cfg.max_attempts);
    }

    fn send_pending_config(engine: &mut CommandEngine<T>, pending: &Option<(SessionConfig, HardwareDetails)>) -> AvmuResult<()> {
        match pending {
            Some((cfg, hw)) => engine.send_config(cfg, hw),
            None => Ok(()),
        }
    }

    fn program_and_measure(
        engine: &mut CommandEngine<T>,
        pending: &Option<(SessionConfig, HardwareDetails)>,
        plan: &SweepPlan,
        bands: &[ExclusionBand],
        paths: &[Path],
    ) -> AvmuResult<Vec<(Path, PathOutcome)>> {
        Self::send_pending_config(engine, pending)?;
        engine.send_program(plan, bands, paths)?;
        engine.send_measure_sync(plan, bands, paths)
    }

    fn publish(&self, s: &Session) {
        if let Ok(mut status) = self.status_shared.write() {
            status.state = s.state;
            status.serial_number = s.hardware.as_ref().map(|hw| hw.serial_number);
            status.async_task = s.task.as_ref().map(|t| t.id);
            status.num_frequencies = s.plan.frequencies().map_or(0, |f| f.len());
            status.num_exclusion_bands = s.plan.exclusion_band_count();
            status.paths_registered = s.paths.len();
            status.paths_measured = s.paths.count(PathStatus::Measured);
            status.paths_no_data = s.paths.count(PathStatus::NoData);
            status.cycles = s.cycles;
            status.last_sweep_seconds = s.last_sweep_seconds;
            status.updated_ts = SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Connect, read the hardware description and send `config`.
    ///
    /// On failure the link is closed again and the controller stays
    /// Uninitialized.
    pub fn initialize(&self, config: SessionConfig) -> AvmuResult<()> {
        let mut engine = self.engine("initialize")?;
        let config = {
            let s = self.session();
            s.require("initialize", &[ControllerState::Uninitialized])?;
            // Fall back to an address set beforehand.
            SessionConfig {
                ip_address: config.ip_address.or(s.config.ip_address),
                ip_port: config.ip_port.or(s.config.ip_port),
                ..config
            }
        };
        let (ip, port) = config.validate_connection()?;

        info!("=== Initializing unit at {}:{} ===", ip, port);
        Self::apply_link_settings(&mut engine, &config);

        let result = engine
            .connect(std::net::SocketAddrV4::new(ip, port))
            .and_then(|_| engine.hello())
            .and_then(|hw| engine.send_config(&config, &hw).map(|_| hw));
        let hw = match result {
            Ok(hw) => hw,
            Err(e) => {
                warn!("Initialization failed: {}", e);
                engine.close();
                return Err(e);
            }
        };

        let mut s = self.session();
        s.paths = PathRegistry::with_limit(hw.switchboard, config.path_limit);
        s.plan = FrequencyPlan::new();
        s.hardware = Some(hw);
        s.config = config;
        s.config_dirty = false;
        s.task = None;
        s.cycles = 0;
        s.state = ControllerState::Idle;
        self.publish(&s);
        info!("=== Ready ===");
        Ok(())
    }

    /// Run one synchronous acquisition over every registered path.
    ///
    /// In async mode, with a task running, pulls the next streamed sweep for
    /// each path instead. Previous results are cleared first either way.
    pub fn measure(&self) -> AvmuResult<Vec<(Path, PathStatus)>> {
        let mut engine = self.engine("measure")?;

        let (plan, bands, paths, task, pending_config) = {
            let mut s = self.session();
            let task = match (s.state, s.config.measurement_type) {
                (ControllerState::Idle, MeasurementType::Sync) => None,
                (ControllerState::TaskRunning, MeasurementType::Async) => match &s.task {
                    Some(task) => Some(task.clone()),
                    None => return Err(AvmuError::WrongState { operation: "measure", state: s.state }),
                },
                (ControllerState::Idle, MeasurementType::Async) | (ControllerState::Idle, MeasurementType::NoneSet) => {
                    return Err(AvmuError::WrongProgramType { expected: "sync" });
                }
                (state, _) => return Err(AvmuError::WrongState { operation: "measure", state }),
            };
            let plan = s.plan.sweep()?;
            if s.paths.is_empty() {
                return Err(AvmuError::NoMeasuredPaths);
            }
            s.paths.clear_results();
            let pending_config = if s.config_dirty {
                Some((s.config.clone(), s.hardware.clone().unwrap_or_default()))
            } else {
                None
            };
            Self::apply_link_settings(&mut engine, &s.config);
            s.state = ControllerState::TaskRunning;
            self.publish(&s);
            (plan, s.plan.bands().to_vec(), s.paths.requested(), task, pending_config)
        };

        let result = match &task {
            None => Self::program_and_measure(&mut engine, &pending_config, &plan, &bands, &paths),
            Some(task) => engine.fetch_async(task, &plan, &bands, &paths),
        };

        let mut s = self.session();
        if pending_config.is_some() && result.is_ok() {
            s.config_dirty = false;
        }
        let outcome = match result {
            Ok(outcomes) => s.record(outcomes),
            Err(e) => Err(e),
        };
        s.state = match (&outcome, &task) {
            (Err(AvmuError::Interrupted), _) | (Err(AvmuError::ConnectionLost), _) => {
                s.task = None;
                ControllerState::TaskStopped
            }
            (_, Some(_)) => ControllerState::TaskRunning,
            (_, None) => ControllerState::Idle,
        };
        self.publish(&s);

        match &outcome {
            Ok(statuses) => {
                let measured = statuses.iter().filter(|(_, st)| *st == PathStatus::Measured).count();
                info!("Cycle {}: {}/{} paths measured", s.cycles, measured, statuses.len());
            }
            Err(e) => warn!("Measurement failed: {}", e),
        }
        outcome
    }

    /// Alias for [`measure`](Self::measure).
    pub fn start(&self) -> AvmuResult<Vec<(Path, PathStatus)>> {
        self.measure()
    }

    /// Program the unit and start a device-side acquisition. Returns as soon
    /// as the unit acknowledges.
    pub fn begin_async(&self) -> AvmuResult<uuid::Uuid> {
        let mut engine = self.engine("begin async task")?;

        let (plan, bands, paths, pending_config) = {
            let mut s = self.session();
            s.require("begin async task", &[ControllerState::Idle])?;
            if s.config.measurement_type != MeasurementType::Async {
                return Err(AvmuError::WrongProgramType { expected: "async" });
            }
            let plan = s.plan.sweep()?;
            if s.paths.is_empty() {
                return Err(AvmuError::NoMeasuredPaths);
            }
            s.paths.clear_results();
            let pending_config = s
                .config_dirty
                .then(|| (s.config.clone(), s.hardware.clone().unwrap_or_default()));
            Self::apply_link_settings(&mut engine, &s.config);
            s.state = ControllerState::TaskRunning;
            (plan, s.plan.bands().to_vec(), s.paths.requested(), pending_config)
        };

        let result = Self::send_pending_config(&mut engine, &pending_config)
            .and_then(|_| engine.send_program(&plan, &bands, &paths))
            .and_then(|_| engine.begin_async());

        let mut s = self.session();
        let outcome = match result {
            Ok(task) => {
                let id = task.id;
                if pending_config.is_some() {
                    s.config_dirty = false;
                }
                s.task = Some(task);
                Ok(id)
            }
            Err(AvmuError::Interrupted) => {
                s.state = ControllerState::TaskStopped;
                Err(AvmuError::Interrupted)
            }
            Err(e) => {
                s.state = ControllerState::Idle;
                Err(e)
            }
        };
        self.publish(&s);
        outcome
    }

    /// Ask the unit whether the async task is still going. Without a task
    /// this is `Finished`. Never blocks on an in-flight command: if one is
    /// running the task is reported as running with no new information.
    pub fn poll_async(&self) -> AvmuResult<AsyncStatus> {
        let mut task = match self.session().task.clone() {
            Some(task) => task,
            None => return Ok(AsyncStatus::Finished),
        };
        let mut engine = match self.try_engine() {
            Some(engine) => engine,
            None => return Ok(AsyncStatus::Running { sweeps_ready: 0 }),
        };
        let result = engine.poll_async(&mut task);

        let mut s = self.session();
        let status = match result {
            Ok(status) => status,
            Err(AvmuError::Interrupted) => {
                s.task = None;
                s.state = ControllerState::TaskStopped;
                self.publish(&s);
                return Err(AvmuError::Interrupted);
            }
            Err(e) => return Err(e),
        };
        if status == AsyncStatus::Finished {
            s.task = None;
            if s.state == ControllerState::TaskRunning {
                s.state = ControllerState::TaskStopped;
            }
        } else {
            s.task = Some(task);
        }
        self.publish(&s);
        Ok(status)
    }

    /// Stop a running task. Succeeds even if nothing is running.
    ///
    /// A call in flight on another thread is interrupted first; the
    /// controller is TaskStopped (or Idle, if nothing was running) on return.
    pub fn halt_async(&self) -> AvmuResult<()> {
        let mut engine = self.engine_for_stop();

        let task = {
            let s = self.session();
            if s.state != ControllerState::TaskRunning {
                debug!("halt requested while {:?}, nothing to do", s.state);
                return Ok(());
            }
            s.task.clone()
        };

        let result = match task {
            Some(mut task) => engine.halt_async(&mut task),
            None => Ok(()),
        };

        let mut s = self.session();
        s.task = None;
        s.state = ControllerState::TaskStopped;
        self.publish(&s);
        result
    }

    /// Alias for [`halt_async`](Self::halt_async).
    pub fn stop(&self) -> AvmuResult<()> {
        self.halt_async()
    }

    /// Abort the in-progress acquisition. A blocking call in another thread
    /// returns `Interrupted` at its next command boundary and this returns
    /// once it has. The socket stays open.
    pub fn interrupt_measurement(&self) -> AvmuResult<()> {
        let mut engine = self.engine_for_stop();

        let mut s = self.session();
        if s.state != ControllerState::TaskRunning {
            return Ok(());
        }
        let result = engine.interrupt();
        s.task = None;
        s.state = ControllerState::TaskStopped;
        self.publish(&s);
        info!("Running task interrupted");
        result
    }

    /// Return from TaskStopped to Idle. Results stay extractable.
    pub fn reset(&self) -> AvmuResult<()> {
        let mut s = self.session();
        s.require("reset", &[ControllerState::TaskStopped, ControllerState::Idle])?;
        s.state = ControllerState::Idle;
        self.publish(&s);
        Ok(())
    }

    /// Close the link. The controller returns to Uninitialized. A call in
    /// flight on another thread is interrupted first.
    pub fn close(&self) {
        let mut engine = self.engine_for_stop();
        engine.close();
        let mut s = self.session();
        s.state = ControllerState::Uninitialized;
        s.hardware = None;
        s.task = None;
        self.publish(&s);
    }

    // ========================================================================
    // ADDRESSING (Uninitialized only)
    // ========================================================================

    pub fn set_ip_address(&self, ip: Ipv4Addr) -> AvmuResult<()> {
        let mut s = self.session();
        s.require("set ip address", &[ControllerState::Uninitialized])?;
        s.config.ip_address = Some(ip);
        Ok(())
    }

    pub fn set_ip_port(&self, port: u16) -> AvmuResult<()> {
        let mut s = self.session();
        s.require("set ip port", &[ControllerState::Uninitialized])?;
        validate_port(port)?;
        s.config.ip_port = Some(port);
        Ok(())
    }

    // ========================================================================
    // CONFIGURATION (Idle only)
    // ========================================================================

    /// Apply `f` to a copy of the config; keep it only if it validates.
    fn update_config<F>(&self, operation: &'static str, f: F) -> AvmuResult<()>
    where
        F: FnOnce(&mut SessionConfig),
    {
        let mut s = self.session();
        s.require(operation, &[ControllerState::Idle])?;
        let mut candidate = s.config.clone();
        f(&mut candidate);
        if let Some(hw) = &s.hardware {
            candidate.validate(hw)?;
        }
        s.config = candidate;
        s.config_dirty = true;
        Ok(())
    }

    pub fn set_frequencies(&self, freqs: &[f64]) -> AvmuResult<()> {
        let mut s = self.session();
        s.require("set frequencies", &[ControllerState::Idle])?;
        let grid = s.grid()?;
        s.plan.set_frequencies(&grid, freqs)?;
        self.publish(&s);
        Ok(())
    }

    /// Fix the limits onto the grid, generate the sweep and install it.
    pub fn generate_linear_sweep(&self, start_mhz: f64, stop_mhz: f64, num_points: u32) -> AvmuResult<Vec<f64>> {
        let mut s = self.session();
        s.require("generate sweep", &[ControllerState::Idle])?;
        let grid = s.grid()?;
        let fixed = grid.fix_linear_sweep_limits(&FrequencySpec::new(start_mhz, stop_mhz, num_points))?;
        let freqs = generate_linear_sweep(&fixed)?;
        s.plan.set_frequencies(&grid, &freqs)?;
        debug!(
            "Sweep {}..{} MHz x{} fixed to {}..{} MHz",
            start_mhz, stop_mhz, num_points, fixed.start_freq_mhz, fixed.stop_freq_mhz
        );
        self.publish(&s);
        Ok(freqs)
    }

    pub fn add_exclusion_band(&self, low_mhz: f64, high_mhz: f64) -> AvmuResult<()> {
        let mut s = self.session();
        s.require("add exclusion band", &[ControllerState::Idle])?;
        s.plan.add_exclusion_band(ExclusionBand::new(low_mhz, high_mhz)?)?;
        self.publish(&s);
        Ok(())
    }

    pub fn clear_exclusion_bands(&self) -> AvmuResult<()> {
        let mut s = self.session();
        s.require("clear exclusion bands", &[ControllerState::Idle])?;
        s.plan.clear_exclusion_bands();
        self.publish(&s);
        Ok(())
    }

    pub fn add_path(&self, path: Path) -> AvmuResult<()> {
        let mut s = self.session();
        s.require("add path", &[ControllerState::Idle])?;
        s.paths.add_path(path)?;
        self.publish(&s);
        Ok(())
    }

    pub fn clear_paths(&self) -> AvmuResult<()> {
        let mut s = self.session();
        s.require("clear paths", &[ControllerState::Idle])?;
        s.paths.clear_paths();
        self.publish(&s);
        Ok(())
    }

    pub fn set_timeout(&self, timeout_ms: u64) -> AvmuResult<()> {
        validate_timeout(timeout_ms)?;
        self.update_config("set timeout", |c| c.timeout_ms = timeout_ms)
    }

    pub fn set_hop_rate(&self, hop: HopRate) -> AvmuResult<()> {
        self.update_config("set hop rate", |c| c.hop_rate = Some(hop))
    }

    pub fn set_gain(&self, gain: IfGain) -> AvmuResult<()> {
        self.update_config("set gain", |c| c.gain = gain)
    }

    pub fn set_receiver_12db_pad(&self, enabled: bool) -> AvmuResult<()> {
        self.update_config("set 12 dB pad", |c| c.receiver_12db_pad = enabled)
    }

    pub fn set_sync_pulse_mode(&self, mode: SyncPulseMode) -> AvmuResult<()> {
        self.update_config("set sync pulse mode", |c| c.sync_pulse_mode = mode)
    }

    /// Bit n enables receiver n.
    pub fn set_enabled_receivers(&self, mask: u8) -> AvmuResult<()> {
        self.update_config("set enabled receivers", |c| c.receiver_enable_mask = mask)
    }

    pub fn set_attenuator(&self, db: Option<u8>) -> AvmuResult<()> {
        self.update_config("set attenuator", |c| c.attenuator_db = db)
    }

    pub fn set_measurement_type(&self, kind: MeasurementType) -> AvmuResult<()> {
        self.update_config("set measurement type", |c| c.measurement_type = kind)
    }

    pub fn set_sample_format(&self, format: SampleFormat) -> AvmuResult<()> {
        self.update_config("set sample format", |c| c.sample_format = format)
    }

    pub fn set_tdd_settings(&self, tdd: TddSettings) -> AvmuResult<()> {
        self.update_config("configure TDD", |c| c.tdd = tdd)
    }

    pub fn set_shaft_encoder_feature(&self, enabled: bool, reset_on_start: bool) -> AvmuResult<()> {
        self.update_config("set shaft encoder", |c| {
            c.shaft_encoder = ShaftEncoderSettings { enabled, reset_on_start }
        })
    }

    pub fn set_serial_port_feature(&self, enabled: bool, buffer_size: u16) -> AvmuResult<()> {
        self.update_config("set serial port", |c| c.serial_port = SerialPortSettings { enabled, buffer_size })
    }

    pub fn set_send_sweep_timer(&self, enabled: bool) -> AvmuResult<()> {
        self.update_config("set sweep timer", |c| c.send_sweep_timer = enabled)
    }

    pub fn set_reset_frame_counter_on_start(&self, enabled: bool) -> AvmuResult<()> {
        self.update_config("set frame counter reset", |c| c.reset_frame_counter_on_start = enabled)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn state(&self) -> ControllerState {
        self.session().state
    }

    pub fn config(&self) -> SessionConfig {
        self.session().config.clone()
    }

    pub fn ip_address(&self) -> Option<Ipv4Addr> {
        self.session().config.ip_address
    }

    pub fn ip_port(&self) -> Option<u16> {
        self.session().config.ip_port
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.session().config.timeout_ms)
    }

    pub fn enabled_receivers(&self) -> Vec<u8> {
        self.session().config.enabled_receivers()
    }

    pub fn frequencies(&self) -> Option<Vec<f64>> {
        self.session().plan.frequencies().map(|f| f.to_vec())
    }

    pub fn exclusion_band_count(&self) -> usize {
        self.session().plan.exclusion_band_count()
    }

    pub fn exclusion_band(&self, index: usize) -> AvmuResult<ExclusionBand> {
        self.session().plan.exclusion_band(index)
    }

    pub fn paths(&self) -> Vec<Path> {
        self.session().paths.paths()
    }

    /// Registered path by insertion index.
    pub fn path_at(&self, index: usize) -> AvmuResult<Path> {
        self.session().paths.path_at(index)
    }

    pub fn path_status(&self, path: &Path) -> Option<PathStatus> {
        self.session().paths.get(path).map(|e| e.status)
    }

    pub fn hardware_details(&self) -> Option<HardwareDetails> {
        self.session().hardware.clone()
    }

    pub fn is_serial_port_present(&self) -> bool {
        self.session().hardware.as_ref().map_or(false, |hw| hw.features.has_serial_port)
    }

    pub fn is_shaft_encoder_present(&self) -> bool {
        self.session().hardware.as_ref().map_or(false, |hw| hw.features.has_encoders)
    }

    pub fn nearest_legal_frequency(&self, freq_mhz: f64) -> AvmuResult<f64> {
        self.session().grid()?.nearest_legal_frequency(freq_mhz)
    }

    pub fn fix_linear_sweep_limits(&self, spec: &FrequencySpec) -> AvmuResult<FrequencySpec> {
        self.session().grid()?.fix_linear_sweep_limits(spec)
    }

    /// Time the unit needs for one pass over every point of every path.
    pub fn precise_time_per_frame(&self) -> AvmuResult<Duration> {
        let s = self.session();
        let hop = s.config.hop_rate.ok_or(AvmuError::MissingHopRate)?;
        let points = s.plan.frequencies().ok_or(AvmuError::MissingFrequencies)?.len();
        let hops = points * s.paths.len().max(1);
        Ok(Duration::from_secs_f64(hops as f64 / hop.points_per_second() as f64))
    }

    pub fn extract_path(&self, path: &Path) -> AvmuResult<SweepRecord> {
        self.session().paths.extract_path(path)
    }

    pub fn extract_all_paths(&self) -> Vec<(Path, SweepRecord)> {
        self.session().paths.extract_all_paths()
    }

    pub fn status(&self) -> AcquisitionStatus {
        self.publish(&self.session());
        self.status_shared.read().map(|s| s.clone()).unwrap_or_default()
    }

    // ========================================================================
    // UTILITIES
    // ========================================================================

    /// Send up to `tries` pings. Not allowed while a task is running.
    pub fn ping(&self, tries: u32) -> AvmuResult<bool> {
        let mut engine = self.engine("ping")?;
        self.session().require("ping", &[ControllerState::Idle, ControllerState::TaskStopped])?;
        Ok(engine.ping(tries))
    }

    /// Power down the RF section until the next acquisition.
    pub fn enter_low_power(&self) -> AvmuResult<()> {
        let mut engine = self.engine("enter low power")?;
        self.session()
            .require("enter low power", &[ControllerState::Idle, ControllerState::TaskStopped])?;
        engine.enter_low_power()
    }
}

impl<T: Transport> Drop for MeasurementController<T> {
    fn drop(&mut self) {
        let engine = self.engine.get_mut().unwrap_or_else(|p| p.into_inner());
        engine.close();
    }
}
