//! Wire format spoken with the unit.
//!
//! Every datagram is a transport frame:
//!
//! ```text
//! | len: u16 | body: len bytes | crc: u16 |
//! ```
//!
//! `crc` is CRC-16/CCITT-FALSE over `len` and `body`. A command body is
//! `opcode: u8 | seq: u16 | payload`; a reply body is
//! `opcode: u8 | seq: u16 | status: u8 | data`. All integers and floats are
//! big-endian.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_complex::Complex64;
use std::io::{self, Cursor, Read};

use crate::config::SessionConfig;
use crate::error::{AvmuError, AvmuResult};
use crate::freq::{is_excluded, ExclusionBand, SweepPlan};
use crate::types::{
    GainSnapshot, HardwareDetails, HardwareFeatures, IfGain, Path, RxPort, SampleFormat,
    SerialMetadata, SweepRecord, SwitchboardType, TxPort, SWEEP_TICKS_PER_SECOND,
};

pub mod opcode {
    pub const HELLO: u8 = 0x01;
    pub const PING: u8 = 0x02;
    pub const CONFIGURE: u8 = 0x10;
    pub const PROGRAM: u8 = 0x11;
    pub const MEASURE: u8 = 0x20;
    pub const BEGIN_ASYNC: u8 = 0x30;
    pub const POLL_ASYNC: u8 = 0x31;
    pub const HALT_ASYNC: u8 = 0x32;
    pub const FETCH_ASYNC: u8 = 0x33;
    pub const INTERRUPT: u8 = 0x34;
    pub const LOW_POWER: u8 = 0x40;
}

pub const STATUS_OK: u8 = 0x00;

/// Length prefix plus CRC trailer.
pub const FRAME_OVERHEAD: usize = 4;
pub const MAX_BODY_LEN: usize = u16::MAX as usize;
pub const COMMAND_HEADER_LEN: usize = 3;
pub const REPLY_HEADER_LEN: usize = 4;
/// Fixed part of a sweep frame, before the optional metadata block.
pub const SWEEP_HEADER_LEN: usize = 18;
/// Largest sweep a single reply can carry.
pub const MAX_FRAME_SAMPLES: u32 = 3_840;

const SAMPLE_LEN: usize = 16;

const META_PRESENT: u8 = 0x01;
const META_LEFT: u8 = 0x02;
const META_RIGHT: u8 = 0x04;
const META_AGE: u8 = 0x08;

// ============================================================================
// CRC-16/CCITT-FALSE
// ============================================================================

const CRC16_TABLE: [u16; 256] = build_crc16_table(0x1021);

const fn build_crc16_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ poly } else { crc << 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF, |crc, &b| {
        (crc << 8) ^ CRC16_TABLE[((crc >> 8) as u8 ^ b) as usize]
    })
}

// ============================================================================
// Transport framing
// ============================================================================

pub fn frame(body: &[u8]) -> AvmuResult<Vec<u8>> {
    if body.len() > MAX_BODY_LEN {
        return Err(AvmuError::invalid("frame", format!("body of {} bytes too long", body.len())));
    }
    let mut out = Vec::with_capacity(body.len() + FRAME_OVERHEAD);
    out.write_u16::<BigEndian>(body.len() as u16)?;
    out.extend_from_slice(body);
    let crc = crc16(&out);
    out.write_u16::<BigEndian>(crc)?;
    Ok(out)
}

pub fn unframe(bytes: &[u8]) -> AvmuResult<Vec<u8>> {
    if bytes.len() < FRAME_OVERHEAD {
        return Err(AvmuError::CorruptReply(format!("{} byte datagram", bytes.len())));
    }
    let declared = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    if declared + FRAME_OVERHEAD != bytes.len() {
        return Err(AvmuError::CorruptReply(format!(
            "length prefix {} does not match {} byte datagram",
            declared,
            bytes.len()
        )));
    }
    let (covered, trailer) = bytes.split_at(bytes.len() - 2);
    let expected = u16::from_be_bytes([trailer[0], trailer[1]]);
    let actual = crc16(covered);
    if expected != actual {
        return Err(AvmuError::CorruptReply(format!(
            "checksum 0x{:04X}, computed 0x{:04X}",
            expected, actual
        )));
    }
    Ok(covered[2..].to_vec())
}

// ============================================================================
// Command / reply bodies
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: u8,
    pub seq: u16,
    pub payload: Vec<u8>,
}

impl Command {
    pub fn new(opcode: u8, seq: u16, payload: Vec<u8>) -> Self {
        Command { opcode, seq, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(COMMAND_HEADER_LEN + self.payload.len());
        out.push(self.opcode);
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(body: &[u8]) -> AvmuResult<Self> {
        if body.len() < COMMAND_HEADER_LEN {
            return Err(AvmuError::UnexpectedReply(format!("{} byte command", body.len())));
        }
        Ok(Command {
            opcode: body[0],
            seq: u16::from_be_bytes([body[1], body[2]]),
            payload: body[COMMAND_HEADER_LEN..].to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub opcode: u8,
    pub seq: u16,
    pub status: u8,
    pub data: Vec<u8>,
}

impl Reply {
    pub fn ok(opcode: u8, seq: u16, data: Vec<u8>) -> Self {
        Reply { opcode, seq, status: STATUS_OK, data }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(REPLY_HEADER_LEN + self.data.len());
        out.push(self.opcode);
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.push(self.status);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(body: &[u8]) -> AvmuResult<Self> {
        if body.len() < REPLY_HEADER_LEN {
            return Err(AvmuError::UnexpectedReply(format!("{} byte reply", body.len())));
        }
        Ok(Reply {
            opcode: body[0],
            seq: u16::from_be_bytes([body[1], body[2]]),
            status: body[3],
            data: body[REPLY_HEADER_LEN..].to_vec(),
        })
    }
}

// ============================================================================
// Payload codecs
// ============================================================================

fn corrupt(what: &'static str) -> impl Fn(io::Error) -> AvmuError {
    move |_| AvmuError::UnexpectedReply(format!("short {} payload", what))
}

pub fn encode_config(cfg: &SessionConfig) -> AvmuResult<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&cfg.ip_address.ok_or(AvmuError::MissingIp)?.octets());
    out.write_u16::<BigEndian>(cfg.ip_port.ok_or(AvmuError::MissingPort)?)?;
    out.push(cfg.hop_rate.ok_or(AvmuError::MissingHopRate)?.code());
    out.push(cfg.sync_pulse_mode.wire());
    out.push(cfg.gain.wire());
    out.push(cfg.receiver_12db_pad as u8);
    out.push(cfg.receiver_enable_mask);
    out.push(cfg.attenuator_db.is_some() as u8);
    out.push(cfg.attenuator_db.unwrap_or(0));
    out.push(cfg.measurement_type.wire());
    out.push(cfg.sample_format.wire());
    out.push(cfg.send_sweep_timer as u8);
    out.push(cfg.reset_frame_counter_on_start as u8);
    out.push(cfg.shaft_encoder.enabled as u8);
    out.push(cfg.shaft_encoder.reset_on_start as u8);
    out.push(cfg.serial_port.enabled as u8);
    out.write_u16::<BigEndian>(cfg.serial_port.buffer_size)?;

    let tdd = &cfg.tdd;
    let tdd_flags = (tdd.active as u8)
        | (tdd.enabled as u8) << 1
        | (tdd.nulling_enabled as u8) << 2
        | (tdd.power_amp_on as u8) << 3
        | (tdd.slave as u8) << 4
        | (tdd.attenuator_enabled as u8) << 5
        | (tdd.lna_enabled as u8) << 6;
    out.push(tdd_flags);
    out.push(tdd.attenuator_value);
    for t in [tdd.tx, tdd.tx_to_rx1, tdd.rx1, tdd.rx1_to_rx2, tdd.rx2, tdd.rx2_to_tx] {
        out.write_u32::<BigEndian>(t)?;
    }
    Ok(out)
}

/// Frequency list, exclusion bands and path order for the next run.
pub fn encode_program(plan: &SweepPlan, bands: &[ExclusionBand], paths: &[Path]) -> AvmuResult<Vec<u8>> {
    if plan.len() > u16::MAX as usize {
        return Err(AvmuError::TooManyPoints { requested: plan.len() as u32, max: MAX_FRAME_SAMPLES });
    }
    if bands.len() > u16::MAX as usize {
        return Err(AvmuError::invalid("exclusion bands", format!("{} bands, at most {}", bands.len(), u16::MAX)));
    }
    if paths.len() > u16::MAX as usize {
        return Err(AvmuError::invalid("paths", format!("{} paths, at most {}", paths.len(), u16::MAX)));
    }
    let mut out = Vec::with_capacity(4 + plan.len() * 8 + bands.len() * 16 + paths.len() * 2);
    out.write_u16::<BigEndian>(plan.len() as u16)?;
    for f in &plan.frequencies {
        out.write_f64::<BigEndian>(*f)?;
    }
    out.write_u16::<BigEndian>(bands.len() as u16)?;
    for b in bands {
        out.write_f64::<BigEndian>(b.low_mhz)?;
        out.write_f64::<BigEndian>(b.high_mhz)?;
    }
    out.write_u16::<BigEndian>(paths.len() as u16)?;
    for p in paths {
        out.push(p.tx.wire());
        out.push(p.rx.wire());
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub frequencies: Vec<f64>,
    pub bands: Vec<ExclusionBand>,
    pub paths: Vec<Path>,
}

pub fn decode_program(payload: &[u8]) -> AvmuResult<Program> {
    let mut cur = Cursor::new(payload);
    let n = cur.read_u16::<BigEndian>().map_err(corrupt("program"))? as usize;
    let mut frequencies = Vec::with_capacity(n);
    for _ in 0..n {
        frequencies.push(cur.read_f64::<BigEndian>().map_err(corrupt("program"))?);
    }
    let nb = cur.read_u16::<BigEndian>().map_err(corrupt("program"))?;
    let mut bands = Vec::with_capacity(nb as usize);
    for _ in 0..nb {
        let low_mhz = cur.read_f64::<BigEndian>().map_err(corrupt("program"))?;
        let high_mhz = cur.read_f64::<BigEndian>().map_err(corrupt("program"))?;
        bands.push(ExclusionBand { low_mhz, high_mhz });
    }
    let np = cur.read_u16::<BigEndian>().map_err(corrupt("program"))?;
    let mut paths = Vec::with_capacity(np as usize);
    for _ in 0..np {
        let tx = TxPort::from_wire(cur.read_u8().map_err(corrupt("program"))?);
        let rx = RxPort::from_wire(cur.read_u8().map_err(corrupt("program"))?);
        paths.push(Path::new(tx, rx));
    }
    Ok(Program { frequencies, bands, paths })
}

pub fn encode_path(path: &Path) -> Vec<u8> {
    vec![path.tx.wire(), path.rx.wire()]
}

pub fn decode_path(payload: &[u8]) -> AvmuResult<Path> {
    match payload {
        [tx, rx, ..] => Ok(Path::new(TxPort::from_wire(*tx), RxPort::from_wire(*rx))),
        _ => Err(AvmuError::UnexpectedReply("short path payload".into())),
    }
}

pub fn encode_hardware_details(hw: &HardwareDetails) -> AvmuResult<Vec<u8>> {
    let mut out = Vec::with_capacity(40 + hw.band_boundaries_mhz.len() * 8);
    out.write_f64::<BigEndian>(hw.minimum_frequency_mhz)?;
    out.write_f64::<BigEndian>(hw.maximum_frequency_mhz)?;
    out.write_u32::<BigEndian>(hw.frequency_step_hz)?;
    out.write_u32::<BigEndian>(hw.maximum_points)?;
    out.write_u32::<BigEndian>(hw.serial_number)?;
    out.push(hw.switchboard.wire());
    out.push(hw.features.bits());
    let bands = &hw.band_boundaries_mhz[..hw.band_boundaries_mhz.len().min(8)];
    out.push(bands.len() as u8);
    for b in bands {
        out.write_f64::<BigEndian>(*b)?;
    }
    Ok(out)
}

pub fn decode_hardware_details(data: &[u8]) -> AvmuResult<HardwareDetails> {
    let mut cur = Cursor::new(data);
    let minimum_frequency_mhz = cur.read_f64::<BigEndian>().map_err(corrupt("hardware"))?;
    let maximum_frequency_mhz = cur.read_f64::<BigEndian>().map_err(corrupt("hardware"))?;
    let frequency_step_hz = cur.read_u32::<BigEndian>().map_err(corrupt("hardware"))?;
    let maximum_points = cur.read_u32::<BigEndian>().map_err(corrupt("hardware"))?;
    let serial_number = cur.read_u32::<BigEndian>().map_err(corrupt("hardware"))?;
    let sb = cur.read_u8().map_err(corrupt("hardware"))?;
    let switchboard = SwitchboardType::from_wire(sb)
        .ok_or_else(|| AvmuError::UnexpectedReply(format!("switchboard type {}", sb)))?;
    let features = HardwareFeatures::from_bits(cur.read_u8().map_err(corrupt("hardware"))?);
    let n = cur.read_u8().map_err(corrupt("hardware"))?;
    let mut band_boundaries_mhz = Vec::with_capacity(n as usize);
    for _ in 0..n {
        band_boundaries_mhz.push(cur.read_f64::<BigEndian>().map_err(corrupt("hardware"))?);
    }
    if frequency_step_hz == 0 || minimum_frequency_mhz > maximum_frequency_mhz {
        return Err(AvmuError::UnexpectedReply("nonsensical frequency limits".into()));
    }
    Ok(HardwareDetails {
        minimum_frequency_mhz,
        maximum_frequency_mhz,
        frequency_step_hz,
        maximum_points,
        serial_number,
        band_boundaries_mhz,
        switchboard,
        features,
    })
}

// ============================================================================
// Sweep frames
// ============================================================================

/// Serialize a sweep the way the unit sends it.
pub fn encode_frame(record: &SweepRecord) -> AvmuResult<Vec<u8>> {
    let mut out = Vec::with_capacity(SWEEP_HEADER_LEN + record.samples.len() * SAMPLE_LEN);
    out.write_u32::<BigEndian>(record.timestamp_ticks)?;
    out.write_u32::<BigEndian>(record.sweep_number)?;
    out.push(record.path.tx.wire());
    out.push(record.path.rx.wire());
    out.push(record.gain.if_gain.wire());
    out.push(record.gain.pad_12db as u8);
    out.push(record.format.wire());

    let mut flags = 0u8;
    if let Some(meta) = &record.serial {
        flags |= META_PRESENT;
        if meta.shaft_encoder_left.is_some() {
            flags |= META_LEFT;
        }
        if meta.shaft_encoder_right.is_some() {
            flags |= META_RIGHT;
        }
        if meta.serial_data_age.is_some() {
            flags |= META_AGE;
        }
    }
    out.push(flags);
    out.write_u32::<BigEndian>(record.samples.len() as u32)?;

    if let Some(meta) = &record.serial {
        for v in [meta.shaft_encoder_left, meta.shaft_encoder_right, meta.serial_data_age].into_iter().flatten() {
            out.write_u32::<BigEndian>(v)?;
        }
        out.write_u16::<BigEndian>(meta.serial_data.len() as u16)?;
        out.extend_from_slice(&meta.serial_data);
    }

    for s in &record.samples {
        let (a, b) = match record.format {
            SampleFormat::Iq => (s.re, s.im),
            SampleFormat::MagPhase => s.to_polar(),
        };
        out.write_f64::<BigEndian>(a)?;
        out.write_f64::<BigEndian>(b)?;
    }
    Ok(out)
}

/// Parse one sweep frame against the frequency list it was captured with.
///
/// Samples whose frequency falls in `bands` are kept but marked invalid.
/// `timestamp_seconds` is the raw tick count converted to seconds.
pub fn decode_frame(bytes: &[u8], frequencies: &[f64], bands: &[ExclusionBand]) -> AvmuResult<SweepRecord> {
    let actual = bytes.len();
    let short = |expected: usize| move |_: io::Error| AvmuError::TruncatedFrame { expected, actual };

    let mut cur = Cursor::new(bytes);
    let timestamp_ticks = cur.read_u32::<BigEndian>().map_err(short(SWEEP_HEADER_LEN))?;
    let sweep_number = cur.read_u32::<BigEndian>().map_err(short(SWEEP_HEADER_LEN))?;
    let tx = TxPort::from_wire(cur.read_u8().map_err(short(SWEEP_HEADER_LEN))?);
    let rx = RxPort::from_wire(cur.read_u8().map_err(short(SWEEP_HEADER_LEN))?);
    let if_gain = IfGain::from_wire(cur.read_u8().map_err(short(SWEEP_HEADER_LEN))?);
    let pad_12db = cur.read_u8().map_err(short(SWEEP_HEADER_LEN))? != 0;
    let format_byte = cur.read_u8().map_err(short(SWEEP_HEADER_LEN))?;
    let format = SampleFormat::from_wire(format_byte)
        .ok_or_else(|| AvmuError::UnexpectedReply(format!("sample format {}", format_byte)))?;
    let flags = cur.read_u8().map_err(short(SWEEP_HEADER_LEN))?;
    let count = cur.read_u32::<BigEndian>().map_err(short(SWEEP_HEADER_LEN))? as usize;

    let serial = if flags & META_PRESENT != 0 {
        let fields = [META_LEFT, META_RIGHT, META_AGE].iter().filter(|f| flags & **f != 0).count();
        let fixed = SWEEP_HEADER_LEN + fields * 4 + 2;
        let mut next = |present: bool| -> AvmuResult<Option<u32>> {
            if present {
                Ok(Some(cur.read_u32::<BigEndian>().map_err(short(fixed))?))
            } else {
                Ok(None)
            }
        };
        let shaft_encoder_left = next(flags & META_LEFT != 0)?;
        let shaft_encoder_right = next(flags & META_RIGHT != 0)?;
        let serial_data_age = next(flags & META_AGE != 0)?;
        let len = cur.read_u16::<BigEndian>().map_err(short(fixed))? as usize;
        let mut serial_data = vec![0u8; len];
        cur.read_exact(&mut serial_data).map_err(short(fixed + len))?;
        Some(SerialMetadata { shaft_encoder_left, shaft_encoder_right, serial_data_age, serial_data })
    } else {
        None
    };

    let expected = cur.position() as usize + count * SAMPLE_LEN;
    if actual != expected {
        return Err(AvmuError::TruncatedFrame { expected, actual });
    }
    if count != frequencies.len() {
        return Err(AvmuError::SampleCountMismatch { expected: frequencies.len(), actual: count });
    }

    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        let a = cur.read_f64::<BigEndian>().map_err(short(expected))?;
        let b = cur.read_f64::<BigEndian>().map_err(short(expected))?;
        samples.push(match format {
            SampleFormat::Iq => Complex64::new(a, b),
            SampleFormat::MagPhase => Complex64::from_polar(a, b),
        });
    }

    Ok(SweepRecord {
        path: Path::new(tx, rx),
        timestamp_ticks,
        timestamp_seconds: timestamp_ticks as f64 / SWEEP_TICKS_PER_SECOND,
        sweep_number,
        format,
        frequencies_mhz: frequencies.to_vec(),
        samples,
        valid: frequencies.iter().map(|f| !is_excluded(*f, bands)).collect(),
        gain: GainSnapshot { if_gain, pad_12db },
        serial,
    })
}
