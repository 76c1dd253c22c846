//! Memory inspection module.
//!
//! Decodes raw target memory into typed, human-readable values and renders
//! the hex dump view around an address.

pub mod watch;

pub use watch::{WatchId, WatchList, WatchedVariable};

use crate::engine::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound on a null-terminated string scan.
pub const MAX_STRING_LEN: usize = 4096;

/// Bytes shown per row of the dump view.
pub const DUMP_ROW_BYTES: usize = 4;

/// How a watched address is decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    /// 8-bit unsigned decimal.
    #[default]
    UnsignedByte,
    /// 8-bit two's complement decimal.
    SignedByte,
    /// 8-bit, two hex digits.
    HexByte,
    /// 16-bit big-endian unsigned decimal.
    UnsignedWord,
    /// 16-bit big-endian two's complement decimal.
    SignedWord,
    /// 16-bit, four hex digits.
    HexWord,
    /// 32-bit big-endian unsigned decimal.
    UnsignedLong,
    /// 32-bit big-endian two's complement decimal.
    SignedLong,
    /// 32-bit, eight hex digits.
    HexLong,
    /// One 7-bit ASCII character.
    AsciiChar,
    /// ASCII bytes up to a NUL, at most [`MAX_STRING_LEN`] long.
    NullTerminatedString,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Radix {
    Unsigned,
    Signed,
    Hex,
}

impl Encoding {
    /// Every encoding, in menu order.
    pub const ALL: [Self; 11] = [
        Self::UnsignedByte,
        Self::SignedByte,
        Self::HexByte,
        Self::UnsignedWord,
        Self::SignedWord,
        Self::HexWord,
        Self::UnsignedLong,
        Self::SignedLong,
        Self::HexLong,
        Self::AsciiChar,
        Self::NullTerminatedString,
    ];

    /// Display name, also accepted by `FromStr`.
    pub const fn label(self) -> &'static str {
        match self {
            Self::UnsignedByte => "Unsigned byte",
            Self::SignedByte => "Signed byte",
            Self::HexByte => "Hex byte",
            Self::UnsignedWord => "Unsigned word",
            Self::SignedWord => "Signed word",
            Self::HexWord => "Hex word",
            Self::UnsignedLong => "Unsigned long",
            Self::SignedLong => "Signed long",
            Self::HexLong => "Hex long",
            Self::AsciiChar => "ASCII char",
            Self::NullTerminatedString => "Null terminated string",
        }
    }

    /// Short form accepted on the command line.
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::UnsignedByte => "u8",
            Self::SignedByte => "i8",
            Self::HexByte => "x8",
            Self::UnsignedWord => "u16",
            Self::SignedWord => "i16",
            Self::HexWord => "x16",
            Self::UnsignedLong => "u32",
            Self::SignedLong => "i32",
            Self::HexLong => "x32",
            Self::AsciiChar => "char",
            Self::NullTerminatedString => "str",
        }
    }

    /// Width in bytes, `None` for strings.
    pub const fn width(self) -> Option<usize> {
        match self {
            Self::UnsignedByte | Self::SignedByte | Self::HexByte | Self::AsciiChar => Some(1),
            Self::UnsignedWord | Self::SignedWord | Self::HexWord => Some(2),
            Self::UnsignedLong | Self::SignedLong | Self::HexLong => Some(4),
            Self::NullTerminatedString => None,
        }
    }

    const fn radix(self) -> Radix {
        match self {
            Self::SignedByte | Self::SignedWord | Self::SignedLong => Radix::Signed,
            Self::HexByte | Self::HexWord | Self::HexLong => Radix::Hex,
            _ => Radix::Unsigned,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Text that names no [`Encoding`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown encoding '{0}'")]
pub struct UnknownEncoding(pub String);

impl FromStr for Encoding {
    type Err = UnknownEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|e| e.label().eq_ignore_ascii_case(wanted) || e.short_name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownEncoding(s.to_string()))
    }
}

/// Failure to decode one value. The display form is what gets shown in place
/// of the value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The value lies (partly) outside target memory.
    #[error("invalid address")]
    InvalidAddress(u32),
    #[error("not an ASCII character (0x{0:02X})")]
    NotAscii(u8),
    #[error("unterminated string")]
    Unterminated,
}

/// One row of the memory dump view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpLine {
    pub address: u32,
    pub bytes: Vec<u8>,
    /// Whether the stack pointer falls inside this row.
    pub contains_sp: bool,
}

impl DumpLine {
    pub fn render(&self) -> String {
        let (addr, hex, ascii) = format_memory_line(self.address, &self.bytes);
        let marker = if self.contains_sp { " <- SP" } else { "" };
        format!("0x{} {} {}{}", addr, hex.trim_end(), ascii, marker)
    }
}

/// Formats a line of memory for the hex view.
/// Returns (address_str, hex_str, ascii_str)
pub fn format_memory_line(address: u32, chunk: &[u8]) -> (String, String, String) {
    let addr_str = format!("{:08X}", address);

    let hex_part: String = chunk.iter().map(|b| format!("{:02X} ", b)).collect();

    let ascii_part: String = chunk
        .iter()
        .map(|b| if b.is_ascii_graphic() || *b == b' ' { *b as char } else { '.' })
        .collect();

    (addr_str, format!("{:width$}", hex_part, width = DUMP_ROW_BYTES * 3), ascii_part)
}

/// Manager for typed memory reads.
pub struct MemoryManager;

impl MemoryManager {
    /// Create a new manager.
    pub fn new() -> Self {
        Self
    }

    /// Decode the value at `address`.
    ///
    /// Multi-byte values are big-endian and fetched with one block read.
    pub fn decode(&self, engine: &dyn Engine, address: u32, encoding: Encoding) -> Result<String, DecodeError> {
        let invalid = |_| DecodeError::InvalidAddress(address);
        match encoding {
            Encoding::AsciiChar => {
                let byte = engine.read_byte(address).map_err(invalid)?;
                if byte.is_ascii() {
                    Ok(char::from(byte).to_string())
                } else {
                    Err(DecodeError::NotAscii(byte))
                }
            }
            Encoding::NullTerminatedString => self.read_string(engine, address),
            numeric => {
                let width = numeric.width().unwrap_or(1);
                let bytes = engine.read_block(address, width).map_err(invalid)?;
                let raw = bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
                Ok(match numeric.radix() {
                    Radix::Hex => format!("{:0digits$X}", raw, digits = width * 2),
                    Radix::Unsigned => raw.to_string(),
                    Radix::Signed => {
                        let shift = 32 - 8 * width as u32;
                        (((raw << shift) as i32) >> shift).to_string()
                    }
                })
            }
        }
    }

    fn read_string(&self, engine: &dyn Engine, address: u32) -> Result<String, DecodeError> {
        let mut text = String::new();
        for offset in 0..MAX_STRING_LEN as u32 {
            let byte = address
                .checked_add(offset)
                .and_then(|addr| engine.read_byte(addr).ok())
                .ok_or(DecodeError::InvalidAddress(address))?;
            match byte {
                0 => return Ok(text),
                b if b.is_ascii() => text.push(char::from(b)),
                b => return Err(DecodeError::NotAscii(b)),
            }
        }
        Err(DecodeError::Unterminated)
    }

    /// Dump `rows` rows of memory centred on `center`. Rows past the end of
    /// target memory are omitted.
    pub fn dump(&self, engine: &dyn Engine, center: u32, rows: usize, sp: u32) -> Vec<DumpLine> {
        let row_bytes = DUMP_ROW_BYTES as u32;
        let span = u32::try_from(rows.saturating_mul(DUMP_ROW_BYTES)).unwrap_or(u32::MAX);
        let start = center.saturating_sub(span / 2);

        // stops at the top of the address space instead of wrapping to zero
        std::iter::successors(Some(start), |address| address.checked_add(row_bytes))
            .take(rows)
            .map_while(|address| {
                let bytes = engine.read_block(address, DUMP_ROW_BYTES).ok()?;
                let contains_sp = (address..address.saturating_add(row_bytes)).contains(&sp);
                Some(DumpLine { address, bytes, contains_sp })
            })
            .collect()
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use proptest::prelude::*;

    fn engine_with(address: u32, bytes: &[u8]) -> MockEngine {
        let engine = MockEngine::with_memory_size(0x10000);
        engine.write_block(address, bytes).unwrap();
        engine
    }

    #[test]
    fn test_numeric_decodes() {
        let mgr = MemoryManager::new();
        let engine = engine_with(0x100, &[0x00, 0x00, 0x00, 0x2A]);
        assert_eq!(mgr.decode(&engine, 0x100, Encoding::HexLong).unwrap(), "0000002A");
        assert_eq!(mgr.decode(&engine, 0x100, Encoding::UnsignedLong).unwrap(), "42");
        assert_eq!(mgr.decode(&engine, 0x102, Encoding::HexWord).unwrap(), "002A");

        let engine = engine_with(0x200, &[0xFF, 0xFE]);
        assert_eq!(mgr.decode(&engine, 0x200, Encoding::SignedByte).unwrap(), "-1");
        assert_eq!(mgr.decode(&engine, 0x200, Encoding::UnsignedByte).unwrap(), "255");
        assert_eq!(mgr.decode(&engine, 0x200, Encoding::HexByte).unwrap(), "FF");
        assert_eq!(mgr.decode(&engine, 0x200, Encoding::SignedWord).unwrap(), "-2");
        assert_eq!(mgr.decode(&engine, 0x200, Encoding::UnsignedWord).unwrap(), "65534");
    }

    #[test]
    fn test_signed_long_extremes() {
        let mgr = MemoryManager::new();
        let engine = engine_with(0x10, &[0x80, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(mgr.decode(&engine, 0x10, Encoding::SignedLong).unwrap(), "-2147483648");
        assert_eq!(mgr.decode(&engine, 0x14, Encoding::SignedLong).unwrap(), "-1");
        assert_eq!(mgr.decode(&engine, 0x14, Encoding::UnsignedLong).unwrap(), "4294967295");
    }

    #[test]
    fn test_char_and_string() {
        let mgr = MemoryManager::new();
        let engine = engine_with(0x300, b"HI\0");
        assert_eq!(mgr.decode(&engine, 0x300, Encoding::NullTerminatedString).unwrap(), "HI");
        assert_eq!(mgr.decode(&engine, 0x301, Encoding::AsciiChar).unwrap(), "I");
        assert_eq!(mgr.decode(&engine, 0x302, Encoding::NullTerminatedString).unwrap(), "");

        let engine = engine_with(0x300, &[0xC8]);
        assert_eq!(mgr.decode(&engine, 0x300, Encoding::AsciiChar), Err(DecodeError::NotAscii(0xC8)));
    }

    #[test]
    fn test_string_scan_is_bounded() {
        let mgr = MemoryManager::new();
        let engine = engine_with(0x1000, &[b'A'; MAX_STRING_LEN + 8]);
        assert_eq!(mgr.decode(&engine, 0x1000, Encoding::NullTerminatedString), Err(DecodeError::Unterminated));

        // running off the end of memory before a terminator
        let engine = engine_with(0xFFFE, b"AB");
        let err = mgr.decode(&engine, 0xFFFE, Encoding::NullTerminatedString).unwrap_err();
        assert_eq!(err.to_string(), "invalid address");
    }

    #[test]
    fn test_out_of_range_is_invalid_address() {
        let mgr = MemoryManager::new();
        let engine = MockEngine::with_memory_size(0x100);
        assert_eq!(mgr.decode(&engine, 0xFE, Encoding::HexLong), Err(DecodeError::InvalidAddress(0xFE)));
        assert_eq!(mgr.decode(&engine, 0x100, Encoding::AsciiChar).unwrap_err().to_string(), "invalid address");
    }

    proptest! {
        #[test]
        fn long_decodes_agree_with_big_endian_value(value in any::<u32>(), address in 0u32..0xFFFC) {
            let mgr = MemoryManager::new();
            let engine = engine_with(address, &value.to_be_bytes());
            prop_assert_eq!(mgr.decode(&engine, address, Encoding::HexLong).unwrap(), format!("{:08X}", value));
            prop_assert_eq!(mgr.decode(&engine, address, Encoding::UnsignedLong).unwrap(), value.to_string());
            prop_assert_eq!(
                mgr.decode(&engine, address, Encoding::SignedLong).unwrap(),
                i32::from_be_bytes(value.to_be_bytes()).to_string()
            );
        }

        #[test]
        fn signed_word_sign_extends(value in any::<i16>()) {
            let mgr = MemoryManager::new();
            let engine = engine_with(0x40, &value.to_be_bytes());
            prop_assert_eq!(mgr.decode(&engine, 0x40, Encoding::SignedWord).unwrap(), value.to_string());
        }
    }

    #[test]
    fn test_encoding_parse() {
        assert_eq!("Hex long".parse::<Encoding>().unwrap(), Encoding::HexLong);
        assert_eq!("null terminated string".parse::<Encoding>().unwrap(), Encoding::NullTerminatedString);
        assert_eq!("i16".parse::<Encoding>().unwrap(), Encoding::SignedWord);
        assert!("float".parse::<Encoding>().is_err());
        for encoding in Encoding::ALL {
            assert_eq!(encoding.label().parse::<Encoding>().unwrap(), encoding);
        }
    }

    #[test]
    fn test_format_memory_line() {
        let data = vec![0xDE, 0xAD, 0x41, 0x20];
        let (addr, hex, ascii) = format_memory_line(0x1000, &data);
        assert_eq!(addr, "00001000");
        assert!(hex.starts_with("DE AD 41 20 "));
        assert_eq!(ascii, "..A ");
    }

    #[test]
    fn test_dump_marks_stack_pointer() {
        let mgr = MemoryManager::new();
        let engine = engine_with(0x9000, &[0x11, 0x22, 0x33, 0x44]);
        let lines = mgr.dump(&engine, 0x9000, 4, 0x9002);

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].address, 0x8FF8);
        assert_eq!(lines[2].address, 0x9000);
        assert_eq!(lines[2].bytes, vec![0x11, 0x22, 0x33, 0x44]);
        assert!(lines[2].contains_sp);
        assert_eq!(lines.iter().filter(|l| l.contains_sp).count(), 1);
        assert_eq!(lines[2].render(), "0x00009000 11 22 33 44 .\"3D <- SP");
    }

    #[test]
    fn test_dump_clamps_at_zero_and_end_of_memory() {
        let mgr = MemoryManager::new();
        let engine = MockEngine::with_memory_size(0x10);
        let lines = mgr.dump(&engine, 0x4, 8, 0);
        assert_eq!(lines[0].address, 0);
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_dump_with_huge_row_count() {
        let mgr = MemoryManager::new();
        let engine = engine_with(0x8, &[0xAB]);

        // the span saturates instead of wrapping, so the window still starts at zero
        let lines = mgr.dump(&engine, 0x8, usize::MAX, 0);
        assert_eq!(lines.first().map(|l| l.address), Some(0));
        assert_eq!(lines.len(), 0x10000 / DUMP_ROW_BYTES);
        assert_eq!(lines[2].bytes[0], 0xAB);

        // 0x4000_0001 rows of 4 bytes would truncate to a 4 byte span
        let lines = mgr.dump(&engine, 0x8000, 0x4000_0001, 0);
        assert_eq!(lines[0].address, 0);
    }

    #[test]
    fn test_dump_stops_at_top_of_address_space() {
        let mgr = MemoryManager::new();
        let engine = MockEngine::with_memory_size(0x10);
        assert!(mgr.dump(&engine, u32::MAX, 4, 0).is_empty());
    }
}
