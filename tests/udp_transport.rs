use num_complex::Complex64;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use avmu::config::{SessionConfig, MAX_IP_PORT, MIN_IP_PORT};
use avmu::engine::CommandEngine;
use avmu::error::AvmuError;
use avmu::net::UdpTransport;
use avmu::paths::PathStatus;
use avmu::protocol::{self, opcode, Command, Reply};
use avmu::status::AcquisitionStatus;
use avmu::traits::Transport;
use avmu::types::{
    ControllerState, GainSnapshot, HardwareDetails, HopRate, Path, SampleFormat, SweepRecord,
};
use avmu::MeasurementController;

const TIMEOUT: Duration = Duration::from_millis(200);

// --- Loopback Device ---

fn bind_loopback(port: u16) -> Option<(UdpSocket, SocketAddrV4)> {
    let sock = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).ok()?;
    match sock.local_addr().ok()? {
        SocketAddr::V4(addr) => Some((sock, addr)),
        SocketAddr::V6(_) => None,
    }
}

/// Serve `respond` on `sock` until it has been idle for two seconds. The
/// closure returns the raw datagrams to send back, in order.
fn serve<F, R>(sock: UdpSocket, mut respond: F)
where
    F: FnMut(Command) -> R + Send + 'static,
    R: IntoIterator<Item = Vec<u8>>,
{
    sock.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    thread::spawn(move || {
        let mut buf = vec![0u8; 70_000];
        while let Ok((n, from)) = sock.recv_from(&mut buf) {
            let Ok(body) = protocol::unframe(&buf[..n]) else { continue };
            let Ok(cmd) = Command::decode(&body) else { continue };
            for datagram in respond(cmd) {
                let _ = sock.send_to(&datagram, from);
            }
        }
    });
}

fn spawn_device<F, R>(respond: F) -> SocketAddrV4
where
    F: FnMut(Command) -> R + Send + 'static,
    R: IntoIterator<Item = Vec<u8>>,
{
    let (sock, addr) = bind_loopback(0).expect("bind failed");
    serve(sock, respond);
    addr
}

fn silent(_: Command) -> Option<Vec<u8>> {
    None
}

fn framed(reply: Reply) -> Vec<u8> {
    protocol::frame(&reply.encode()).unwrap()
}

fn connected(addr: SocketAddrV4) -> UdpTransport {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut transport = UdpTransport::new();
    transport.connect(addr, TIMEOUT).expect("connect failed");
    transport
}

// --- Transport ---

#[test]
fn test_reply_roundtrip() {
    let addr = spawn_device(|cmd| Some(framed(Reply::ok(cmd.opcode, cmd.seq, cmd.payload))));
    let mut transport = connected(addr);
    assert!(transport.is_connected());
    assert_eq!(transport.peer(), Some(addr));

    let cmd = Command::new(opcode::HELLO, 42, vec![1, 2, 3]);
    transport.send_command(&cmd.encode()).unwrap();
    let reply = Reply::decode(&transport.receive_reply(TIMEOUT).unwrap()).unwrap();

    assert_eq!(reply.opcode, opcode::HELLO);
    assert_eq!(reply.seq, 42);
    assert_eq!(reply.data, vec![1, 2, 3]);
}

#[test]
fn test_silence_is_no_response() {
    let addr = spawn_device(silent);
    let mut transport = connected(addr);

    transport.send_command(&Command::new(opcode::PING, 1, Vec::new()).encode()).unwrap();
    let t0 = Instant::now();
    let err = transport.receive_reply(Duration::from_millis(50)).unwrap_err();

    assert!(matches!(err, AvmuError::NoResponse { timeout_ms: 50 }));
    assert!(t0.elapsed() >= Duration::from_millis(40));
    assert!(err.is_retryable());
}

#[test]
fn test_bad_checksum_is_corrupt_reply() {
    let addr = spawn_device(|cmd| {
        let mut datagram = framed(Reply::ok(cmd.opcode, cmd.seq, vec![0xAB; 8]));
        let last = datagram.len() - 1;
        datagram[last] ^= 0xFF;
        Some(datagram)
    });
    let mut transport = connected(addr);

    transport.send_command(&Command::new(opcode::HELLO, 7, Vec::new()).encode()).unwrap();
    let err = transport.receive_reply(TIMEOUT).unwrap_err();
    assert!(matches!(err, AvmuError::CorruptReply(_)));
    assert!(!err.is_retryable());
}

#[test]
fn test_ping() {
    let alive = spawn_device(|cmd| match cmd.opcode {
        opcode::PING => Some(framed(Reply::ok(cmd.opcode, cmd.seq, Vec::new()))),
        _ => None,
    });
    assert!(connected(alive).ping(TIMEOUT));

    let dead = spawn_device(silent);
    assert!(!connected(dead).ping(Duration::from_millis(50)));
}

#[test]
fn test_closed_transport_refuses_to_send() {
    let addr = spawn_device(silent);
    let mut transport = connected(addr);
    transport.close();
    transport.close();

    assert!(!transport.is_connected());
    let err = transport.send_command(&[opcode::PING, 0, 1]).unwrap_err();
    assert!(matches!(err, AvmuError::NotConnected));
}

#[test]
fn test_large_stale_frame_does_not_break_next_reply() {
    // A sweep frame left over from an abandoned measure arrives ahead of the
    // answer to the next command.
    let addr = spawn_device(|cmd| match cmd.opcode {
        opcode::BEGIN_ASYNC => vec![
            framed(Reply::ok(opcode::MEASURE, cmd.seq.wrapping_sub(1), vec![0x5A; 20_000])),
            framed(Reply::ok(cmd.opcode, cmd.seq, 9u32.to_be_bytes().to_vec())),
        ],
        _ => Vec::new(),
    });
    let _ = env_logger::builder().is_test(true).try_init();
    let mut engine = CommandEngine::new(UdpTransport::new(), TIMEOUT);
    engine.connect(addr).unwrap();

    assert!(engine.begin_async().is_ok());
}

// --- Controller over UDP ---

/// Minimal unit: answers setup commands and returns a flat sweep per path.
fn serve_unit(sock: UdpSocket) {
    let mut points = 0usize;
    let mut sweeps = 0u32;
    serve(sock, move |cmd| {
        let data = match cmd.opcode {
            opcode::HELLO => protocol::encode_hardware_details(&HardwareDetails::default()).ok()?,
            opcode::CONFIGURE => Vec::new(),
            opcode::PROGRAM => {
                points = protocol::decode_program(&cmd.payload).ok()?.frequencies.len();
                Vec::new()
            }
            opcode::MEASURE => {
                sweeps += 1;
                let record = SweepRecord {
                    path: protocol::decode_path(&cmd.payload).ok()?,
                    timestamp_ticks: sweeps * 128,
                    timestamp_seconds: 0.0,
                    sweep_number: sweeps,
                    format: SampleFormat::MagPhase,
                    frequencies_mhz: Vec::new(),
                    samples: vec![Complex64::from_polar(0.25, 0.5); points],
                    valid: vec![true; points],
                    gain: GainSnapshot::default(),
                    serial: None,
                };
                protocol::encode_frame(&record).ok()?
            }
            _ => return None,
        };
        Some(framed(Reply::ok(cmd.opcode, cmd.seq, data)))
    });
}

#[test]
fn test_controller_measures_over_loopback() {
    let _ = env_logger::builder().is_test(true).try_init();
    let Some((sock, addr)) = (MIN_IP_PORT..=MAX_IP_PORT).find_map(bind_loopback) else {
        eprintln!("no free port in the unit port range, skipping");
        return;
    };
    serve_unit(sock);

    let status = Arc::new(RwLock::new(AcquisitionStatus::default()));
    let controller = MeasurementController::new(UdpTransport::new(), status.clone());
    let cfg = SessionConfig {
        ip_address: Some(*addr.ip()),
        ip_port: Some(addr.port()),
        hop_rate: Some(HopRate::Hop15K),
        timeout_ms: 500,
        ..SessionConfig::default()
    };
    controller.initialize(cfg).unwrap();
    assert_eq!(controller.ip_port(), Some(addr.port()));

    controller.generate_linear_sweep(900.0, 1000.0, 401).unwrap();
    controller.add_path(Path::ports(0, 1)).unwrap();
    controller.add_path(Path::ports(1, 0)).unwrap();

    let results = controller.measure().unwrap();
    assert!(results.iter().all(|(_, st)| *st == PathStatus::Measured));

    let sweep = controller.extract_path(&Path::ports(1, 0)).unwrap();
    assert_eq!(sweep.num_points(), 401);
    assert_eq!(sweep.format, SampleFormat::MagPhase);
    assert!((sweep.samples[0].norm() - 0.25).abs() < 1e-9);
    assert!((sweep.timestamp_seconds - 256.0 / 128_000.0).abs() < 1e-12);

    {
        let shared = status.read().unwrap();
        assert_eq!(shared.state, ControllerState::Idle);
        assert_eq!(shared.paths_measured, 2);
        assert_eq!(shared.num_frequencies, 401);
    }

    controller.close();
    assert_eq!(controller.state(), ControllerState::Uninitialized);
}
