//! Watched variables.

use super::{Encoding, MemoryManager};
use crate::engine::Engine;
use serde::{Deserialize, Serialize};

/// Handle to one watched variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchId(pub u32);

/// An address the user asked to keep an eye on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedVariable {
    pub id: WatchId,
    pub address: u32,
    pub name: String,
    pub encoding: Encoding,
    /// Decoded value, or the error text, as of the last refresh.
    pub last_value: String,
}

/// The set of watched variables, in insertion order.
#[derive(Debug, Default)]
pub struct WatchList {
    vars: Vec<WatchedVariable>,
    next_id: u32,
}

impl WatchList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `address`. Without a name the variable is called `userdef_<n>`.
    pub fn add(&mut self, address: u32, name: Option<String>) -> WatchId {
        self.add_with_encoding(address, name, Encoding::default())
    }

    /// Watch a symbol by name. A variable already carrying `name` is moved
    /// to `address` and keeps its encoding, so importing the symbols of a
    /// rebuilt program does not duplicate watches.
    pub fn watch_symbol(&mut self, name: &str, address: u32) -> WatchId {
        match self.vars.iter_mut().find(|v| v.name == name) {
            Some(var) => {
                if var.address != address {
                    log::debug!("Symbol {} moved 0x{:08X} -> 0x{:08X}", name, var.address, address);
                    var.address = address;
                    var.last_value.clear();
                }
                var.id
            }
            None => self.add(address, Some(name.to_string())),
        }
    }

    pub fn add_with_encoding(&mut self, address: u32, name: Option<String>, encoding: Encoding) -> WatchId {
        let id = WatchId(self.next_id);
        self.next_id += 1;
        let name = name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("userdef_{}", self.vars.len()));
        log::debug!("Watching {} at 0x{:08X}", name, address);
        self.vars.push(WatchedVariable {
            id,
            address,
            name,
            encoding,
            last_value: String::new(),
        });
        id
    }

    /// Stop watching a variable. Returns whether it existed.
    pub fn remove(&mut self, id: WatchId) -> bool {
        let before = self.vars.len();
        self.vars.retain(|v| v.id != id);
        self.vars.len() != before
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }

    pub fn set_encoding(&mut self, id: WatchId, encoding: Encoding) -> bool {
        match self.vars.iter_mut().find(|v| v.id == id) {
            Some(var) => {
                var.encoding = encoding;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: WatchId) -> Option<&WatchedVariable> {
        self.vars.iter().find(|v| v.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchedVariable> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Decode every variable against current memory without touching the
    /// stored values. A failing variable carries its error text as value; the
    /// others are unaffected.
    pub fn evaluate(&self, engine: &dyn Engine, memory: &MemoryManager) -> Vec<WatchedVariable> {
        self.vars
            .iter()
            .map(|var| WatchedVariable {
                last_value: decode_text(engine, memory, var),
                ..var.clone()
            })
            .collect()
    }

    /// Re-decode every variable, store the result as its `last_value` and
    /// return a snapshot of the list.
    pub fn refresh_all(&mut self, engine: &dyn Engine, memory: &MemoryManager) -> Vec<WatchedVariable> {
        for var in &mut self.vars {
            var.last_value = decode_text(engine, memory, var);
        }
        self.vars.clone()
    }
}

fn decode_text(engine: &dyn Engine, memory: &MemoryManager, var: &WatchedVariable) -> String {
    memory
        .decode(engine, var.address, var.encoding)
        .unwrap_or_else(|e| e.to_string())
}
