//! Command composition, request/reply matching and retry.
//!
//! The engine owns the transport. Each exchange is one command followed by
//! a blocking wait for the reply with the same opcode and sequence number;
//! anything else that arrives meanwhile is dropped as stale.

use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, info, warn};
use std::io::Cursor;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::{SessionConfig, DEFAULT_MAX_ATTEMPTS};
use crate::error::{AvmuError, AvmuResult, DeviceFault};
use crate::freq::{ExclusionBand, SweepPlan};
use crate::protocol::{self, opcode, Command, Reply, MAX_BODY_LEN, STATUS_OK};
use crate::traits::Transport;
use crate::types::{ControllerState, HardwareDetails, Path, SweepRecord, SWEEP_TICKS_PER_SECOND};

const SMALL_REPLY: usize = 512;

/// Result of measuring one path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathOutcome {
    Measured(SweepRecord),
    /// Every attempt timed out.
    NoData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncStatus {
    Running { sweeps_ready: u32 },
    Finished,
}

/// A device-side acquisition started with [`CommandEngine::begin_async`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: Uuid,
    token: u32,
    finished: bool,
}

/// Extends the unit's 32-bit sweep timer across wraps.
#[derive(Debug, Default)]
struct TickClock {
    last: Option<u32>,
    wraps: u64,
}

impl TickClock {
    fn seconds(&mut self, ticks: u32) -> f64 {
        if let Some(last) = self.last {
            if ticks < last && last - ticks > u32::MAX / 2 {
                self.wraps += 1;
            }
        }
        self.last = Some(ticks);
        let total = (self.wraps << 32) + ticks as u64;
        total as f64 / SWEEP_TICKS_PER_SECOND
    }
}

pub struct CommandEngine<T: Transport> {
    transport: T,
    seq: u16,
    timeout: Duration,
    max_attempts: u32,
    clock: TickClock,
    interrupt: Arc<AtomicBool>,
}

impl<T: Transport> CommandEngine<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        CommandEngine {
            transport,
            seq: 0,
            timeout,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            clock: TickClock::default(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_max_attempts(&mut self, attempts: u32) {
        self.max_attempts = attempts.max(1);
    }

    // ========================================================================
    // Link
    // ========================================================================

    pub fn connect(&mut self, addr: SocketAddrV4) -> AvmuResult<()> {
        self.clock = TickClock::default();
        self.transport.connect(addr, self.timeout)
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    /// True as soon as one of `tries` pings is answered.
    pub fn ping(&mut self, tries: u32) -> bool {
        for attempt in 1..=tries.max(1) {
            if self.transport.ping(self.timeout) {
                return true;
            }
            debug!("Ping {}/{} unanswered", attempt, tries);
        }
        false
    }

    fn next_seq(&mut self) -> u16 {
        // 0xFFFF is kept for transport pings.
        self.seq = if self.seq >= 0xFFFE { 0 } else { self.seq + 1 };
        self.seq
    }

    fn transact_once(&mut self, op: u8, payload: &[u8], max_reply: usize) -> AvmuResult<Vec<u8>> {
        let seq = self.next_seq();
        let body = Command::new(op, seq, payload.to_vec()).encode();
        debug!("-> op 0x{:02X} seq {} ({} byte payload)", op, seq, payload.len());
        self.transport.send_command(&body)?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AvmuError::NoResponse { timeout_ms: self.timeout.as_millis() as u64 });
            }
            let body = self.transport.receive_reply(remaining)?;
            let reply = match Reply::decode(&body) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Dropping malformed reply while waiting for seq {}: {}", seq, e);
                    continue;
                }
            };
            if reply.opcode != op || reply.seq != seq {
                warn!(
                    "Dropping stale reply op 0x{:02X} seq {} (waiting for op 0x{:02X} seq {})",
                    reply.opcode, reply.seq, op, seq
                );
                continue;
            }
            debug!("<- op 0x{:02X} seq {} status {} ({} bytes)", op, seq, reply.status, reply.data.len());
            if reply.status != STATUS_OK {
                return Err(AvmuError::Device { opcode: op, fault: DeviceFault::from_status(reply.status) });
            }
            if reply.data.len() > max_reply {
                return Err(AvmuError::UnexpectedReply(format!(
                    "{} byte reply to op 0x{:02X}, at most {} expected",
                    reply.data.len(),
                    op,
                    max_reply
                )));
            }
            return Ok(reply.data);
        }
    }

    /// Send `op` until it is answered, retrying only on `NoResponse`.
    ///
    /// A pending interrupt wins over whatever the exchange produced.
    fn transact(&mut self, op: u8, payload: &[u8], max_reply: usize) -> AvmuResult<Vec<u8>> {
        let mut attempt = 1;
        loop {
            let result = self.transact_once(op, payload, max_reply);
            self.check_interrupt()?;
            match result {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!("op 0x{:02X} attempt {}/{}: {}", op, attempt, self.max_attempts, e);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Abort if an interrupt was requested, telling the unit to stop too.
    fn check_interrupt(&mut self) -> AvmuResult<()> {
        if self.interrupt.swap(false, Ordering::SeqCst) {
            info!("Interrupt requested, aborting current operation");
            if let Err(e) = self.transact_once(opcode::INTERRUPT, &[], SMALL_REPLY) {
                warn!("Unit did not acknowledge interrupt: {}", e);
            }
            return Err(AvmuError::Interrupted);
        }
        Ok(())
    }

    // ========================================================================
    // Setup
    // ========================================================================

    pub fn hello(&mut self) -> AvmuResult<HardwareDetails> {
        let data = self.transact(opcode::HELLO, &[], SMALL_REPLY)?;
        let hw = protocol::decode_hardware_details(&data)?;
        info!(
            "Unit s/n {} ({:?}), {}..{} MHz, {} points max",
            hw.serial_number, hw.switchboard, hw.minimum_frequency_mhz, hw.maximum_frequency_mhz, hw.maximum_points
        );
        Ok(hw)
    }

    /// Validate everything first; nothing is sent for an invalid config.
    pub fn send_config(&mut self, cfg: &SessionConfig, hw: &HardwareDetails) -> AvmuResult<()> {
        cfg.validate(hw)?;
        let payload = protocol::encode_config(cfg)?;
        self.transact(opcode::CONFIGURE, &payload, SMALL_REPLY)?;
        debug!("Configuration accepted");
        Ok(())
    }

    pub fn send_program(&mut self, plan: &SweepPlan, bands: &[ExclusionBand], paths: &[Path]) -> AvmuResult<()> {
        let payload = protocol::encode_program(plan, bands, paths)?;
        self.transact(opcode::PROGRAM, &payload, SMALL_REPLY)?;
        debug!("Programmed {} points ({} active), {} paths", plan.len(), plan.active_points(), paths.len());
        Ok(())
    }

    pub fn enter_low_power(&mut self) -> AvmuResult<()> {
        self.transact(opcode::LOW_POWER, &[], SMALL_REPLY)?;
        info!("Unit RF supplies powered down");
        Ok(())
    }

    /// Tell the unit to abandon whatever it is doing.
    pub fn interrupt(&mut self) -> AvmuResult<()> {
        self.transact_once(opcode::INTERRUPT, &[], SMALL_REPLY)?;
        Ok(())
    }

    // ========================================================================
    // Acquisition
    // ========================================================================

    /// Decode a sweep frame and put its timestamp on the session timeline.
    pub fn decode_frame(&mut self, bytes: &[u8], plan: &SweepPlan, bands: &[ExclusionBand]) -> AvmuResult<SweepRecord> {
        let mut record = protocol::decode_frame(bytes, &plan.frequencies, bands)?;
        for (valid, excluded) in record.valid.iter_mut().zip(plan.excluded.iter()) {
            *valid &= !excluded;
        }
        record.timestamp_seconds = self.clock.seconds(record.timestamp_ticks);
        Ok(record)
    }

    fn measure_one(&mut self, op: u8, payload: &[u8], path: &Path, plan: &SweepPlan, bands: &[ExclusionBand]) -> AvmuResult<SweepRecord> {
        let data = self.transact(op, payload, MAX_BODY_LEN)?;
        let record = self.decode_frame(&data, plan, bands)?;
        if record.path != *path {
            return Err(AvmuError::UnexpectedReply(format!("asked for {}, got sweep for {}", path, record.path)));
        }
        Ok(record)
    }

    fn run_batch<F>(&mut self, op: u8, paths: &[Path], plan: &SweepPlan, bands: &[ExclusionBand], payload: F) -> AvmuResult<Vec<(Path, PathOutcome)>>
    where
        F: Fn(&Path) -> Vec<u8>,
    {
        let mut outcomes = Vec::with_capacity(paths.len());
        for path in paths {
            self.check_interrupt()?;
            match self.measure_one(op, &payload(path), path, plan, bands) {
                Ok(record) => outcomes.push((*path, PathOutcome::Measured(record))),
                Err(AvmuError::NoResponse { timeout_ms }) => {
                    warn!("{}: no reply after {} attempts of {} ms, marking NoData", path, self.max_attempts, timeout_ms);
                    outcomes.push((*path, PathOutcome::NoData));
                }
                Err(e) => return Err(e),
            }
        }

        let all_silent = !outcomes.is_empty() && outcomes.iter().all(|(_, o)| *o == PathOutcome::NoData);
        if all_silent && !self.ping(1) {
            warn!("No path answered and unit does not respond to ping");
            return Err(AvmuError::ConnectionLost);
        }
        Ok(outcomes)
    }

    /// Measure each path in order. A path whose replies never arrive becomes
    /// `NoData` and the batch carries on.
    pub fn send_measure_sync(&mut self, plan: &SweepPlan, bands: &[ExclusionBand], paths: &[Path]) -> AvmuResult<Vec<(Path, PathOutcome)>> {
        self.run_batch(opcode::MEASURE, paths, plan, bands, protocol::encode_path)
    }

    pub fn begin_async(&mut self) -> AvmuResult<TaskHandle> {
        let data = self.transact(opcode::BEGIN_ASYNC, &[], SMALL_REPLY)?;
        let token = Cursor::new(&data)
            .read_u32::<BigEndian>()
            .map_err(|_| AvmuError::UnexpectedReply("short async begin reply".into()))?;
        let handle = TaskHandle { id: Uuid::new_v4(), token, finished: false };
        info!("Async task {} started (token {})", handle.id, token);
        Ok(handle)
    }

    /// Safe to call repeatedly; a finished task is answered locally.
    pub fn poll_async(&mut self, handle: &mut TaskHandle) -> AvmuResult<AsyncStatus> {
        if handle.finished {
            return Ok(AsyncStatus::Finished);
        }
        let data = self.transact(opcode::POLL_ASYNC, &handle.token.to_be_bytes(), SMALL_REPLY)?;
        let mut cur = Cursor::new(&data);
        let short = |_| AvmuError::UnexpectedReply("short async poll reply".into());
        let state = cur.read_u8().map_err(short)?;
        let sweeps_ready = cur.read_u32::<BigEndian>().map_err(short)?;
        if state != 0 {
            handle.finished = true;
            debug!("Async task {} finished on the unit", handle.id);
            return Ok(AsyncStatus::Finished);
        }
        Ok(AsyncStatus::Running { sweeps_ready })
    }

    /// Halting a task that already finished is a no-op.
    pub fn halt_async(&mut self, handle: &mut TaskHandle) -> AvmuResult<()> {
        if handle.finished {
            debug!("Async task {} already finished, nothing to halt", handle.id);
            return Ok(());
        }
        self.transact(opcode::HALT_ASYNC, &handle.token.to_be_bytes(), SMALL_REPLY)?;
        handle.finished = true;
        info!("Async task {} halted", handle.id);
        Ok(())
    }

    /// Pull the next streamed sweep for each path of a running task.
    pub fn fetch_async(&mut self, handle: &TaskHandle, plan: &SweepPlan, bands: &[ExclusionBand], paths: &[Path]) -> AvmuResult<Vec<(Path, PathOutcome)>> {
        if handle.finished {
            return Err(AvmuError::WrongState { operation: "fetch async sweeps", state: ControllerState::TaskStopped });
        }
        let token = handle.token;
        self.run_batch(opcode::FETCH_ASYNC, paths, plan, bands, |path| {
            let mut payload = Vec::with_capacity(6);
            payload.extend_from_slice(&token.to_be_bytes());
            payload.extend_from_slice(&protocol::encode_path(path));
            payload
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockTransport;
    use crate::types::{GainSnapshot, HopRate, SampleFormat};
    use num_complex::Complex64;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    fn plan() -> SweepPlan {
        SweepPlan::new(vec![100.0, 150.0, 200.0], &[])
    }

    fn sweep(path: Path, ticks: u32) -> SweepRecord {
        SweepRecord {
            path,
            timestamp_ticks: ticks,
            timestamp_seconds: 0.0,
            sweep_number: 1,
            format: SampleFormat::Iq,
            frequencies_mhz: vec![100.0, 150.0, 200.0],
            samples: vec![Complex64::new(0.1, 0.2); 3],
            valid: vec![true; 3],
            gain: GainSnapshot::default(),
            serial: None,
        }
    }

    /// Mock whose replies are computed from the last command sent.
    fn responsive_mock<F>(respond: F) -> MockTransport
    where
        F: Fn(&Command) -> Option<Reply> + Send + 'static,
    {
        let last: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sent = last.clone();
        let mut mock = MockTransport::new();
        mock.expect_send_command().returning(move |body| {
            *sent.lock().unwrap() = body.to_vec();
            Ok(())
        });
        mock.expect_receive_reply().returning(move |timeout| {
            let cmd = Command::decode(&last.lock().unwrap()).unwrap();
            match respond(&cmd) {
                Some(reply) => Ok(reply.encode()),
                None => Err(AvmuError::NoResponse { timeout_ms: timeout.as_millis() as u64 }),
            }
        });
        mock
    }

    fn sweep_reply(cmd: &Command) -> Reply {
        let path = protocol::decode_path(&cmd.payload).unwrap();
        Reply::ok(cmd.opcode, cmd.seq, protocol::encode_frame(&sweep(path, 1_000)).unwrap())
    }

    #[test]
    fn test_partial_failure_marks_no_data() {
        let _ = env_logger::builder().is_test(true).try_init();
        let silent = Path::ports(1, 1);
        let mock = responsive_mock(move |cmd| {
            let path = protocol::decode_path(&cmd.payload).ok()?;
            if path == silent { None } else { Some(sweep_reply(cmd)) }
        });
        let mut engine = CommandEngine::new(mock, Duration::from_millis(20));

        let paths = [Path::ports(0, 0), silent, Path::ports(2, 2)];
        let outcomes = engine.send_measure_sync(&plan(), &[], &paths).unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0].1, PathOutcome::Measured(_)));
        assert_eq!(outcomes[1], (silent, PathOutcome::NoData));
        assert!(matches!(outcomes[2].1, PathOutcome::Measured(_)));
    }

    #[test]
    fn test_retries_exactly_max_attempts() {
        let attempts = Arc::new(Mutex::new(0u32));
        let counter = attempts.clone();
        let mut mock = MockTransport::new();
        mock.expect_send_command().returning(move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });
        mock.expect_receive_reply()
            .returning(|_| Err(AvmuError::NoResponse { timeout_ms: 5 }));
        mock.expect_ping().times(1).returning(|_| true);

        let mut engine = CommandEngine::new(mock, Duration::from_millis(5));
        let outcomes = engine.send_measure_sync(&plan(), &[], &[Path::ports(0, 1)]).unwrap();
        assert_eq!(outcomes[0].1, PathOutcome::NoData);
        assert_eq!(*attempts.lock().unwrap(), 3);
    }

    #[test]
    fn test_all_silent_and_no_ping_is_connection_lost() {
        let mut mock = responsive_mock(|_| None);
        mock.expect_ping().returning(|_| false);
        let mut engine = CommandEngine::new(mock, Duration::from_millis(5));
        let err = engine
            .send_measure_sync(&plan(), &[], &[Path::ports(0, 0), Path::ports(1, 1)])
            .unwrap_err();
        assert!(matches!(err, AvmuError::ConnectionLost));
    }

    #[test]
    fn test_corrupt_reply_is_not_retried() {
        let mut mock = MockTransport::new();
        mock.expect_send_command().times(1).returning(|_| Ok(()));
        mock.expect_receive_reply()
            .times(1)
            .returning(|_| Err(AvmuError::CorruptReply("checksum".into())));
        let mut engine = CommandEngine::new(mock, Duration::from_millis(5));
        let err = engine.send_measure_sync(&plan(), &[], &[Path::ports(0, 0)]).unwrap_err();
        assert!(matches!(err, AvmuError::CorruptReply(_)));
    }

    #[test]
    fn test_device_status_surfaces_verbatim() {
        let mock = responsive_mock(|cmd| {
            Some(Reply { opcode: cmd.opcode, seq: cmd.seq, status: 0x0A, data: vec![] })
        });
        let mut engine = CommandEngine::new(mock, Duration::from_millis(5));
        let err = engine.send_program(&plan(), &[], &[Path::ports(0, 0)]).unwrap_err();
        assert!(matches!(
            err,
            AvmuError::Device { opcode: opcode::PROGRAM, fault: DeviceFault::ProgramOverflow }
        ));
    }

    #[test]
    fn test_stale_replies_are_discarded() {
        let last: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sent = last.clone();
        let stale_sent = Arc::new(AtomicBool::new(false));
        let mut mock = MockTransport::new();
        mock.expect_send_command().returning(move |body| {
            *sent.lock().unwrap() = body.to_vec();
            Ok(())
        });
        mock.expect_receive_reply().returning(move |_| {
            let cmd = Command::decode(&last.lock().unwrap()).unwrap();
            if !stale_sent.swap(true, Ordering::SeqCst) {
                return Ok(Reply::ok(cmd.opcode, cmd.seq.wrapping_sub(1), vec![]).encode());
            }
            Ok(sweep_reply(&cmd).encode())
        });
        let mut engine = CommandEngine::new(mock, Duration::from_millis(200));
        let outcomes = engine.send_measure_sync(&plan(), &[], &[Path::ports(3, 3)]).unwrap();
        assert!(matches!(outcomes[0].1, PathOutcome::Measured(_)));
    }

    #[test]
    fn test_invalid_config_sends_nothing() {
        let mut mock = MockTransport::new();
        mock.expect_send_command().times(0);
        let mut engine = CommandEngine::new(mock, Duration::from_millis(5));
        let cfg = SessionConfig {
            ip_address: Some(Ipv4Addr::LOCALHOST),
            ip_port: Some(1027),
            hop_rate: Some(HopRate::Hop90K),
            ..Default::default()
        };
        let err = engine.send_config(&cfg, &HardwareDetails::default()).unwrap_err();
        assert!(matches!(err, AvmuError::InvalidParameter { name: "hop_rate", .. }));
    }

    #[test]
    fn test_interrupt_between_paths() {
        let flag = Arc::new(AtomicBool::new(true));
        let mock = responsive_mock(|cmd| Some(Reply::ok(cmd.opcode, cmd.seq, vec![])));
        let mut engine = CommandEngine::new(mock, Duration::from_millis(5)).with_interrupt(flag.clone());
        let err = engine.send_measure_sync(&plan(), &[], &[Path::ports(0, 0)]).unwrap_err();
        assert!(matches!(err, AvmuError::Interrupted));
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_interrupt_raised_during_exchange() {
        let flag = Arc::new(AtomicBool::new(false));
        let raise = flag.clone();
        let ops = Arc::new(Mutex::new(Vec::new()));
        let seen = ops.clone();
        let mock = responsive_mock(move |cmd| {
            seen.lock().unwrap().push(cmd.opcode);
            let data = match cmd.opcode {
                opcode::BEGIN_ASYNC => 9u32.to_be_bytes().to_vec(),
                opcode::POLL_ASYNC => {
                    // Stop requested while the poll is on the wire
                    raise.store(true, Ordering::SeqCst);
                    vec![0, 0, 0, 0, 1]
                }
                _ => vec![],
            };
            Some(Reply::ok(cmd.opcode, cmd.seq, data))
        });
        let mut engine = CommandEngine::new(mock, Duration::from_millis(5)).with_interrupt(flag.clone());

        let mut handle = engine.begin_async().unwrap();
        let err = engine.poll_async(&mut handle).unwrap_err();
        assert!(matches!(err, AvmuError::Interrupted));
        assert!(!flag.load(Ordering::SeqCst));
        assert_eq!(*ops.lock().unwrap(), vec![opcode::BEGIN_ASYNC, opcode::POLL_ASYNC, opcode::INTERRUPT]);
    }

    #[test]
    fn test_late_sweep_frame_is_stale_not_corrupt() {
        let last: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sent = last.clone();
        let late_sent = Arc::new(AtomicBool::new(false));
        let mut mock = MockTransport::new();
        mock.expect_send_command().returning(move |body| {
            *sent.lock().unwrap() = body.to_vec();
            Ok(())
        });
        mock.expect_receive_reply().returning(move |_| {
            let cmd = Command::decode(&last.lock().unwrap()).unwrap();
            if !late_sent.swap(true, Ordering::SeqCst) {
                // Sweep from an earlier timed-out measure, far larger than a begin reply
                let frame = protocol::encode_frame(&sweep(Path::ports(0, 0), 5)).unwrap();
                let mut big = frame.clone();
                while big.len() < 4 * SMALL_REPLY {
                    big.extend_from_slice(&frame);
                }
                return Ok(Reply::ok(opcode::MEASURE, cmd.seq.wrapping_sub(1), big).encode());
            }
            Ok(Reply::ok(cmd.opcode, cmd.seq, 3u32.to_be_bytes().to_vec()).encode())
        });
        let mut engine = CommandEngine::new(mock, Duration::from_millis(200));
        assert!(engine.begin_async().is_ok());
    }

    #[test]
    fn test_oversized_matching_reply_is_rejected() {
        let mock = responsive_mock(|cmd| Some(Reply::ok(cmd.opcode, cmd.seq, vec![0; SMALL_REPLY + 1])));
        let mut engine = CommandEngine::new(mock, Duration::from_millis(5));
        assert!(matches!(engine.begin_async(), Err(AvmuError::UnexpectedReply(_))));
    }

    #[test]
    fn test_async_lifecycle() {
        let finished = Arc::new(AtomicBool::new(false));
        let done = finished.clone();
        let polls = Arc::new(Mutex::new(0u32));
        let poll_count = polls.clone();
        let mock = responsive_mock(move |cmd| {
            let data = match cmd.opcode {
                opcode::BEGIN_ASYNC => 77u32.to_be_bytes().to_vec(),
                opcode::POLL_ASYNC => {
                    *poll_count.lock().unwrap() += 1;
                    let mut d = vec![done.load(Ordering::SeqCst) as u8];
                    d.extend_from_slice(&4u32.to_be_bytes());
                    d
                }
                _ => vec![],
            };
            Some(Reply::ok(cmd.opcode, cmd.seq, data))
        });
        let mut engine = CommandEngine::new(mock, Duration::from_millis(5));

        let mut handle = engine.begin_async().unwrap();
        assert_eq!(engine.poll_async(&mut handle).unwrap(), AsyncStatus::Running { sweeps_ready: 4 });
        finished.store(true, Ordering::SeqCst);
        assert_eq!(engine.poll_async(&mut handle).unwrap(), AsyncStatus::Finished);
        // Further polls and halts stay local
        assert_eq!(engine.poll_async(&mut handle).unwrap(), AsyncStatus::Finished);
        engine.halt_async(&mut handle).unwrap();
        assert_eq!(*polls.lock().unwrap(), 2);
    }

    #[test]
    fn test_tick_clock_unwraps() {
        let mut clock = TickClock::default();
        assert_eq!(clock.seconds(128_000), 1.0);
        let before_wrap = clock.seconds(u32::MAX - 127_999);
        let after_wrap = clock.seconds(128_000);
        assert!(after_wrap > before_wrap);
        assert!((after_wrap - (u32::MAX as f64 + 1.0 + 128_000.0) / SWEEP_TICKS_PER_SECOND).abs() < 1e-6);
    }
}
