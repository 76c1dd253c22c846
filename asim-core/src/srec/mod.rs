//! Motorola S-record loader.
//!
//! Parses a program image, writes its data records into target memory and
//! resolves the entry point the engine is reset to.

use crate::config::SessionConfig;
use crate::debug::BreakpointManager;
use crate::engine::{AccessMask, Engine, EngineError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// One parsed S-record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// S1/S2/S3: payload bytes to be placed at `address`.
    Data { address: u32, payload: Vec<u8> },
    /// S7/S8/S9: execution start address.
    StartAddress { address: u32 },
}

/// A line that claims to be an S-record but cannot be decoded.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormatError {
    /// A field is not valid hexadecimal.
    #[error("invalid hex field: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    /// The record ends before its address field does.
    #[error("record too short for S{kind} (need {needed} bytes, got {got})")]
    Truncated { kind: u32, needed: usize, got: usize },
    #[error("payload of {0} bytes does not fit in one record")]
    RecordTooLong(usize),
}

/// Failure while loading a program image into the target.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read program image: {0}")]
    Io(#[from] std::io::Error),
    /// `line` is 1-based.
    #[error("malformed S-record on line {line}: {source}")]
    Format { line: usize, source: FormatError },
    #[error("failed to write program into target: {0}")]
    Engine(#[from] EngineError),
}

/// Address execution starts at after a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub address: u32,
    /// Whether the image carried a start record.
    pub explicit: bool,
}

/// Width in bytes of the address field for a record type, if the type is
/// one the loader understands.
const fn address_width(kind: u32) -> Option<usize> {
    match kind {
        1 | 2 | 3 => Some(kind as usize + 1),
        7 | 8 | 9 => Some(11 - kind as usize),
        _ => None,
    }
}

/// Parse one line of an S-record file.
///
/// Lines that are not S-records, and record types the loader ignores (S0
/// headers, S5/S6 counts), yield `Ok(None)`. The checksum byte is consumed but
/// not verified.
pub fn parse_line(line: &str) -> Result<Option<Record>, FormatError> {
    let Some(rest) = line.trim().strip_prefix('S') else {
        return Ok(None);
    };
    let Some(kind) = rest.chars().next().and_then(|c| c.to_digit(10)) else {
        return Ok(None);
    };
    let Some(width) = address_width(kind) else {
        return Ok(None);
    };

    // byte count, address, payload, checksum
    let bytes = hex::decode(&rest[1..])?;
    let needed = 1 + width + 1;
    if bytes.len() < needed {
        return Err(FormatError::Truncated { kind, needed, got: bytes.len() });
    }

    let address = bytes[1..=width]
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));

    Ok(Some(match kind {
        1..=3 => Record::Data { address, payload: bytes[1 + width..bytes.len() - 1].to_vec() },
        _ => Record::StartAddress { address },
    }))
}

fn encode_record(kind: u32, address: u32, payload: &[u8]) -> Result<String, FormatError> {
    let width = address_width(kind).unwrap_or(4);
    let count = width + payload.len() + 1;
    let count = u8::try_from(count).map_err(|_| FormatError::RecordTooLong(payload.len()))?;

    let mut body = Vec::with_capacity(count as usize + 1);
    body.push(count);
    body.extend_from_slice(&address.to_be_bytes()[4 - width..]);
    body.extend_from_slice(payload);
    let sum = body.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    body.push(!sum);

    Ok(format!("S{}{}", kind, hex::encode_upper(body)))
}

/// Encode a data record, picking S1, S2 or S3 by the width `address` needs.
pub fn encode_data_record(address: u32, payload: &[u8]) -> Result<String, FormatError> {
    let kind = match address {
        0..=0xFFFF => 1,
        0x1_0000..=0xFF_FFFF => 2,
        _ => 3,
    };
    encode_record(kind, address, payload)
}

/// Encode a start record (S9, S8 or S7 by address width).
pub fn encode_start_record(address: u32) -> String {
    let kind = match address {
        0..=0xFFFF => 9,
        0x1_0000..=0xFF_FFFF => 8,
        _ => 7,
    };
    // an address-only record never exceeds the count byte
    encode_record(kind, address, &[]).unwrap_or_default()
}

/// Load an S-record image into the engine and reset it to the entry point.
///
/// The whole source is parsed before the first memory write, so a malformed
/// record leaves target memory untouched. If the image names a start address,
/// one supervisor breakpoint is configured there.
pub fn load<R: BufRead>(
    source: R,
    engine: &dyn Engine,
    breakpoints: &mut BreakpointManager,
    config: &SessionConfig,
) -> Result<EntryPoint, LoadError> {
    let mut records = Vec::new();
    for (index, line) in source.lines().enumerate() {
        let line = line?;
        match parse_line(&line) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(source) => return Err(LoadError::Format { line: index + 1, source }),
        }
    }

    let mut entry = EntryPoint { address: config.base_address, explicit: false };
    let mut written = 0usize;
    for record in &records {
        match record {
            Record::Data { address, payload } => {
                engine.write_block(*address, payload)?;
                written += payload.len();
            }
            Record::StartAddress { address } => {
                entry = EntryPoint { address: *address, explicit: true };
            }
        }
    }

    breakpoints.clear_all(engine);
    if entry.explicit {
        breakpoints.set_breakpoint(engine, entry.address, AccessMask::SUPERVISOR)?;
    }

    log::info!(
        "Loaded {} bytes from {} records, starting at 0x{:08X} (stack 0x{:08X})",
        written,
        records.len(),
        entry.address,
        config.stack_address
    );
    engine.reset(entry.address, config.stack_address)?;
    Ok(entry)
}

/// Load an S-record file from disk.
pub fn load_file(
    path: &Path,
    engine: &dyn Engine,
    breakpoints: &mut BreakpointManager,
    config: &SessionConfig,
) -> Result<EntryPoint, LoadError> {
    let file = File::open(path)?;
    load(BufReader::new(file), engine, breakpoints, config)
}
