use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use avmu::config::SessionConfig;
use avmu::engine::AsyncStatus;
use avmu::net::UdpTransport;
use avmu::paths::PathStatus;
use avmu::status::AcquisitionStatus;
use avmu::traits::Transport;
use avmu::types::{HopRate, MeasurementType, Path, SweepRecord};
use avmu::MeasurementController;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Unit IPv4 address
    #[arg(long)]
    ip: Option<Ipv4Addr>,

    /// Unit command port (1025..=1279)
    #[arg(long)]
    port: Option<u16>,

    /// Hop rate, e.g. 45k, 15k, 550
    #[arg(long)]
    hop: Option<HopRate>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    /// JSON session config; command-line values override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Check whether the unit answers
    Ping {
        #[arg(long, default_value_t = 3)]
        tries: u32,
    },
    /// Print the unit's hardware description
    Info,
    /// Acquire sweeps
    Sweep {
        #[arg(long)]
        start: f64,
        #[arg(long)]
        stop: f64,
        #[arg(long, default_value_t = 101)]
        points: u32,
        /// Path as <tx>:<rx>; repeatable
        #[arg(long = "path", required = true)]
        paths: Vec<Path>,
        /// Exclusion band as <low>:<high> MHz; repeatable
        #[arg(long = "exclude")]
        excludes: Vec<String>,
        /// Number of cycles (0 = until Ctrl+C)
        #[arg(long, default_value_t = 1)]
        count: u64,
        /// Stream from a device-side async task
        #[arg(long = "async", default_value_t = false)]
        use_async: bool,
        /// Print each sweep as JSON instead of a summary line
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn session_config(args: &Args) -> Result<SessionConfig> {
    let mut cfg = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if args.ip.is_some() {
        cfg.ip_address = args.ip;
    }
    if args.port.is_some() {
        cfg.ip_port = args.port;
    }
    if args.hop.is_some() {
        cfg.hop_rate = args.hop;
    }
    if let Some(t) = args.timeout_ms {
        cfg.timeout_ms = t;
    }
    if cfg.hop_rate.is_none() {
        cfg.hop_rate = Some(HopRate::Hop15K);
    }
    Ok(cfg)
}

fn parse_band(s: &str) -> Result<(f64, f64)> {
    let (low, high) = s.split_once(':').ok_or_else(|| anyhow!("expected <low>:<high>, got '{}'", s))?;
    Ok((low.trim().parse()?, high.trim().parse()?))
}

fn print_sweep(path: &Path, sweep: &SweepRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(sweep)?);
        return Ok(());
    }
    let (sum, n) = sweep
        .valid_samples()
        .fold((0.0, 0usize), |(sum, n), (_, s)| (sum + s.norm_sqr(), n + 1));
    let mean_db = if n > 0 { 10.0 * (sum / n as f64).log10() } else { f64::NAN };
    println!(
        "{:>12} sweep {:>6} t={:>10.4}s {:>5} pts ({} valid) mean {:>7.2} dB",
        path.to_string(),
        sweep.sweep_number,
        sweep.timestamp_seconds,
        sweep.num_points(),
        n,
        mean_db
    );
    Ok(())
}

fn run_ping(cfg: &SessionConfig, tries: u32) -> Result<()> {
    let ip = cfg.ip_address.ok_or_else(|| anyhow!("--ip is required"))?;
    let port = cfg.ip_port.ok_or_else(|| anyhow!("--port is required"))?;
    let timeout = Duration::from_millis(cfg.timeout_ms);

    let mut transport = UdpTransport::new();
    transport.connect(SocketAddrV4::new(ip, port), timeout)?;
    for attempt in 1..=tries.max(1) {
        let t0 = Instant::now();
        if transport.ping(timeout) {
            info!("{}:{} answered in {:?} (attempt {})", ip, port, t0.elapsed(), attempt);
            transport.close();
            return Ok(());
        }
        warn!("Ping {}/{} unanswered", attempt, tries);
    }
    transport.close();
    Err(anyhow!("{}:{} did not answer {} pings", ip, port, tries))
}

fn main() -> Result<()> {
    env_logger::builder()
        .format_timestamp(None)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let mut cfg = session_config(&args)?;

    if let Cmd::Ping { tries } = &args.command {
        return run_ping(&cfg, *tries);
    }

    let use_async = matches!(&args.command, Cmd::Sweep { use_async: true, .. });
    cfg.measurement_type = if use_async { MeasurementType::Async } else { MeasurementType::Sync };

    let status = Arc::new(RwLock::new(AcquisitionStatus::default()));
    let controller = Arc::new(MeasurementController::new(UdpTransport::new(), status));
    if let Err(e) = controller.initialize(cfg) {
        error!("Could not initialize unit: {}", e);
        return Err(e.into());
    }

    let Cmd::Sweep { start, stop, points, paths, excludes, count, json, .. } = args.command else {
        let hw = controller.hardware_details().ok_or_else(|| anyhow!("no hardware details"))?;
        println!("{}", serde_json::to_string_pretty(&hw)?);
        return Ok(());
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let c = controller.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Stopping...");
        r.store(false, Ordering::SeqCst);
        if let Err(e) = c.interrupt_measurement() {
            warn!("Interrupt failed: {}", e);
        }
    })?;

    let freqs = controller.generate_linear_sweep(start, stop, points)?;
    info!(
        "Sweep {:.3}..{:.3} MHz, {} points",
        freqs.first().copied().unwrap_or_default(),
        freqs.last().copied().unwrap_or_default(),
        freqs.len()
    );
    for band in &excludes {
        let (low, high) = parse_band(band)?;
        controller.add_exclusion_band(low, high)?;
    }
    for path in &paths {
        controller.add_path(*path)?;
    }
    info!("Frame time {:?}", controller.precise_time_per_frame()?);

    if use_async {
        controller.begin_async()?;
    }

    let mut cycle = 0u64;
    while running.load(Ordering::SeqCst) && (count == 0 || cycle < count) {
        if use_async {
            match controller.poll_async() {
                Ok(AsyncStatus::Finished) => {
                    warn!("Async task ended on the unit");
                    break;
                }
                Ok(_) => {}
                Err(avmu::AvmuError::Interrupted) => break,
                Err(e) => return Err(e.into()),
            }
        }
        match controller.measure() {
            Ok(results) => {
                for (path, st) in results {
                    match st {
                        PathStatus::Measured => print_sweep(&path, &controller.extract_path(&path)?, json)?,
                        _ => warn!("{}: no data", path),
                    }
                }
            }
            Err(avmu::AvmuError::Interrupted) => break,
            Err(e) => {
                error!("Measurement failed: {}", e);
                break;
            }
        }
        cycle += 1;
    }

    controller.halt_async()?;
    let status = controller.status();
    info!(
        "{} cycles, last: {} measured / {} no data",
        status.cycles, status.paths_measured, status.paths_no_data
    );
    controller.close();
    Ok(())
}
