//! Assembler listing parser.
//!
//! Builds the address → source line map used for current-line highlighting
//! and the symbol table from the "Symbols by name" section of the same file.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const SYMBOLS_HEADER: &str = "Symbols by name";

/// Address → 1-based source line.
pub type LineMap = HashMap<u32, u32>;

/// Symbol name → address.
pub type SymbolTable = BTreeMap<String, u32>;

/// Parsed listing file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub line_map: LineMap,
    pub symbols: SymbolTable,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Lines,
    Symbols,
}

fn parse_hex8(s: &str) -> Option<u32> {
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
        u32::from_str_radix(s, 16).ok()
    } else {
        None
    }
}

/// `SS:AAAAAAAA` section/address field.
fn parse_address_field(token: &str) -> Option<u32> {
    let (section, address) = token.split_once(':')?;
    if section.len() != 2 || !section.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    parse_hex8(address)
}

fn parse_line_number(token: &str) -> Option<u32> {
    token
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .parse()
        .ok()
}

fn is_line_number_token(token: &str) -> bool {
    token
        .strip_suffix(':')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

fn parse_instruction_line(line: &str) -> Option<(u32, u32)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 {
        return None;
    }
    let address = parse_address_field(tokens[0])?;

    // vasm prints the source line number as `<n>:` after the code bytes;
    // otherwise fall back to the last token.
    let row = tokens[1..]
        .iter()
        .find(|t| is_line_number_token(t))
        .or_else(|| tokens.last())
        .and_then(|t| parse_line_number(t))?;
    Some((address, row))
}

fn parse_symbol_line(line: &str) -> Option<(String, u32)> {
    let mut tokens = line.split_whitespace();
    let name = tokens.next()?;
    let address = tokens
        .filter_map(|t| t.strip_prefix("A:"))
        .find_map(parse_hex8)?;
    Some((name.to_string(), address))
}

impl Listing {
    /// Parse a listing. Malformed lines are skipped, never reported.
    pub fn parse<R: BufRead>(reader: R) -> Self {
        let mut listing = Self::default();
        let mut mode = Mode::Lines;

        for line in reader.lines().map_while(Result::ok) {
            match mode {
                Mode::Lines if line.trim_start().starts_with(SYMBOLS_HEADER) => {
                    mode = Mode::Symbols;
                }
                Mode::Lines => {
                    if let Some((address, row)) = parse_instruction_line(&line) {
                        listing.line_map.insert(address, row);
                    }
                }
                Mode::Symbols => {
                    if line.trim().is_empty() {
                        mode = Mode::Lines;
                    } else if let Some((name, address)) = parse_symbol_line(&line) {
                        listing.symbols.insert(name, address);
                    }
                }
            }
        }

        log::debug!(
            "Parsed listing: {} line entries, {} symbols",
            listing.line_map.len(),
            listing.symbols.len()
        );
        listing
    }

    /// Parse a listing file from disk.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let listing = Self::parse(BufReader::new(file));
        log::info!("Loaded listing from {}", path.display());
        Ok(listing)
    }

    /// Source line for an address.
    pub fn line_for(&self, address: u32) -> Option<u32> {
        self.line_map.get(&address).copied()
    }

    /// Lookup a symbol address by name.
    pub fn lookup_symbol(&self, name: &str) -> Option<u32> {
        self.symbols.get(name).copied()
    }
}
