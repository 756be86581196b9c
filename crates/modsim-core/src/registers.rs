// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-slave register bank.
//!
//! Four Modbus address spaces behind one reader-writer lock:
//!
//! | Space | Element | Writable via FC |
//! |---|---|---|
//! | Coils (0x) | bit | 05, 15 |
//! | Discrete Inputs (1x) | bit | producer-side only |
//! | Input Registers (3x) | 16-bit word | producer-side only |
//! | Holding Registers (4x) | 16-bit word | 06, 16 |
//!
//! Holding-register addressing is dual: user-facing addresses `>= 40001` map
//! to offset `address - 40001`, smaller values are raw 0-based offsets (the
//! protocol engine always passes raw offsets). Defined points additionally
//! carry [`RegisterMeta`] for typed, scaled access; multi-word values occupy
//! two consecutive registers, high word first, and are written in a single
//! critical section so concurrent readers never observe torn values.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{RegisterError, RegisterResult};
use crate::types::{DataType, RegisterDefinition};

// =============================================================================
// Constants
// =============================================================================

/// Default size of every address space.
pub const DEFAULT_SPACE_SIZE: usize = 10_000;

/// First user-facing holding-register address.
pub const HOLDING_BASE_ADDRESS: u16 = 40_001;

const SPACE_COIL: &str = "coil";
const SPACE_DISCRETE: &str = "discrete input";
const SPACE_INPUT: &str = "input register";
const SPACE_HOLDING: &str = "holding register";

// =============================================================================
// RegisterMeta
// =============================================================================

/// Metadata for one defined register point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterMeta {
    /// User-facing Modbus address.
    pub address: u16,

    /// Point name.
    pub name: String,

    /// Value interpretation.
    pub data_type: DataType,

    /// Encoding factor (ignored for `Float32`).
    pub scale: f64,

    /// Engineering unit.
    pub unit: String,

    /// Whether single-write function codes may modify this point.
    pub writable: bool,

    /// Advisory lower bound.
    pub min_value: Option<f64>,

    /// Advisory upper bound.
    pub max_value: Option<f64>,
}

impl From<&RegisterDefinition> for RegisterMeta {
    fn from(def: &RegisterDefinition) -> Self {
        Self {
            address: def.address,
            name: def.name.clone(),
            data_type: def.data_type,
            scale: def.scale,
            unit: def.unit.clone(),
            writable: def.writable,
            min_value: def.min_value,
            max_value: def.max_value,
        }
    }
}

// =============================================================================
// RegisterMap
// =============================================================================

struct Spaces {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    input_registers: Vec<u16>,
    holding_registers: Vec<u16>,
    definitions: HashMap<u16, RegisterMeta>,
}

/// Thread-safe register bank for one slave.
///
/// Many concurrent readers or one writer; the scenario ticker and all
/// protocol-engine tasks share one instance through `Arc`.
pub struct RegisterMap {
    inner: RwLock<Spaces>,
}

impl RegisterMap {
    /// Creates a register map with explicit space sizes.
    pub fn new(coil_size: usize, discrete_size: usize, input_size: usize, holding_size: usize) -> Self {
        Self {
            inner: RwLock::new(Spaces {
                coils: vec![false; coil_size],
                discrete_inputs: vec![false; discrete_size],
                input_registers: vec![0; input_size],
                holding_registers: vec![0; holding_size],
                definitions: HashMap::new(),
            }),
        }
    }

    /// Creates a register map with the canonical EMS point table installed.
    ///
    /// Points: LineVoltage 220.0 V, LineCurrent 15.50 A, Frequency 60.00 Hz,
    /// TotalEnergy 0 kWh, PowerFactor 0.95, ActivePower 3300 W.
    pub fn with_defaults() -> Self {
        let map = Self::new(
            DEFAULT_SPACE_SIZE,
            DEFAULT_SPACE_SIZE,
            DEFAULT_SPACE_SIZE,
            DEFAULT_SPACE_SIZE,
        );
        map.apply_definitions(&default_register_table());
        map
    }

    /// Installs a set of configured definitions and their default values.
    pub fn apply_definitions(&self, definitions: &[RegisterDefinition]) {
        for def in definitions {
            self.define_register(def);
            // Default values are best effort; a definition pointing past the
            // configured space is simply left uninstalled.
            let _ = self.set_scaled_value(def.address, def.default_value);
        }
    }

    /// Installs a metadata entry for one point.
    pub fn define_register(&self, def: &RegisterDefinition) {
        let mut inner = self.inner.write();
        inner.definitions.insert(def.address, RegisterMeta::from(def));
    }

    /// Returns the metadata entry for a user-facing address, if defined.
    pub fn definition(&self, address: u16) -> Option<RegisterMeta> {
        self.inner.read().definitions.get(&address).cloned()
    }

    /// Resolves the definition covering a wire-level holding offset.
    ///
    /// Tries the user-facing key (`offset + 40001`) first, then the raw key,
    /// so both addressing conventions reach their metadata.
    pub fn holding_definition(&self, offset: u16) -> Option<RegisterMeta> {
        let inner = self.inner.read();
        offset
            .checked_add(HOLDING_BASE_ADDRESS)
            .and_then(|addr| inner.definitions.get(&addr))
            .or_else(|| inner.definitions.get(&offset))
            .cloned()
    }

    // =========================================================================
    // Coils (0x)
    // =========================================================================

    /// Reads a single coil.
    pub fn read_coil(&self, address: u16) -> RegisterResult<bool> {
        let inner = self.inner.read();
        inner
            .coils
            .get(address as usize)
            .copied()
            .ok_or_else(|| RegisterError::out_of_range(SPACE_COIL, address))
    }

    /// Reads `quantity` consecutive coils.
    pub fn read_coils(&self, address: u16, quantity: u16) -> RegisterResult<Vec<bool>> {
        let inner = self.inner.read();
        range_of(&inner.coils, address, quantity, SPACE_COIL).map(<[bool]>::to_vec)
    }

    /// Writes a single coil.
    pub fn write_coil(&self, address: u16, value: bool) -> RegisterResult<()> {
        let mut inner = self.inner.write();
        match inner.coils.get_mut(address as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RegisterError::out_of_range(SPACE_COIL, address)),
        }
    }

    /// Writes consecutive coils starting at `address`.
    pub fn write_coils(&self, address: u16, values: &[bool]) -> RegisterResult<()> {
        let mut inner = self.inner.write();
        let dst = range_of_mut(&mut inner.coils, address, values.len(), SPACE_COIL)?;
        dst.copy_from_slice(values);
        Ok(())
    }

    // =========================================================================
    // Discrete Inputs (1x)
    // =========================================================================

    /// Reads a single discrete input.
    pub fn read_discrete_input(&self, address: u16) -> RegisterResult<bool> {
        let inner = self.inner.read();
        inner
            .discrete_inputs
            .get(address as usize)
            .copied()
            .ok_or_else(|| RegisterError::out_of_range(SPACE_DISCRETE, address))
    }

    /// Reads `quantity` consecutive discrete inputs.
    pub fn read_discrete_inputs(&self, address: u16, quantity: u16) -> RegisterResult<Vec<bool>> {
        let inner = self.inner.read();
        range_of(&inner.discrete_inputs, address, quantity, SPACE_DISCRETE).map(<[bool]>::to_vec)
    }

    /// Sets a discrete input (producer side; not reachable from the wire).
    pub fn set_discrete_input(&self, address: u16, value: bool) -> RegisterResult<()> {
        let mut inner = self.inner.write();
        match inner.discrete_inputs.get_mut(address as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RegisterError::out_of_range(SPACE_DISCRETE, address)),
        }
    }

    // =========================================================================
    // Input Registers (3x)
    // =========================================================================

    /// Reads a single input register.
    pub fn read_input_register(&self, address: u16) -> RegisterResult<u16> {
        let inner = self.inner.read();
        inner
            .input_registers
            .get(address as usize)
            .copied()
            .ok_or_else(|| RegisterError::out_of_range(SPACE_INPUT, address))
    }

    /// Reads `quantity` consecutive input registers.
    pub fn read_input_registers(&self, address: u16, quantity: u16) -> RegisterResult<Vec<u16>> {
        let inner = self.inner.read();
        range_of(&inner.input_registers, address, quantity, SPACE_INPUT).map(<[u16]>::to_vec)
    }

    /// Sets an input register (producer side; not reachable from the wire).
    pub fn set_input_register(&self, address: u16, value: u16) -> RegisterResult<()> {
        let mut inner = self.inner.write();
        match inner.input_registers.get_mut(address as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RegisterError::out_of_range(SPACE_INPUT, address)),
        }
    }

    // =========================================================================
    // Holding Registers (4x)
    // =========================================================================

    /// Reads a single holding register.
    pub fn read_holding_register(&self, address: u16) -> RegisterResult<u16> {
        let inner = self.inner.read();
        let idx = holding_index(address);
        inner
            .holding_registers
            .get(idx)
            .copied()
            .ok_or_else(|| RegisterError::out_of_range(SPACE_HOLDING, address))
    }

    /// Reads `quantity` consecutive holding registers.
    pub fn read_holding_registers(&self, address: u16, quantity: u16) -> RegisterResult<Vec<u16>> {
        let inner = self.inner.read();
        let idx = holding_index(address);
        let end = idx + quantity as usize;
        if quantity == 0 || end > inner.holding_registers.len() {
            return Err(RegisterError::out_of_range_bulk(SPACE_HOLDING, address, quantity));
        }
        Ok(inner.holding_registers[idx..end].to_vec())
    }

    /// Writes a single holding register.
    pub fn write_holding_register(&self, address: u16, value: u16) -> RegisterResult<()> {
        let mut inner = self.inner.write();
        let idx = holding_index(address);
        match inner.holding_registers.get_mut(idx) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RegisterError::out_of_range(SPACE_HOLDING, address)),
        }
    }

    /// Writes consecutive holding registers starting at `address`.
    pub fn write_holding_registers(&self, address: u16, values: &[u16]) -> RegisterResult<()> {
        let mut inner = self.inner.write();
        let idx = holding_index(address);
        let end = idx + values.len();
        if values.is_empty() || end > inner.holding_registers.len() {
            return Err(RegisterError::out_of_range_bulk(
                SPACE_HOLDING,
                address,
                values.len() as u16,
            ));
        }
        inner.holding_registers[idx..end].copy_from_slice(values);
        Ok(())
    }

    // =========================================================================
    // Scaled Values
    // =========================================================================

    /// Writes an engineering value through the point's type and scale.
    ///
    /// `raw = round(value * scale)` for the integer types; `Float32` stores
    /// the IEEE 754 bit pattern unscaled. Multi-word types write both
    /// registers inside one critical section. An address with no definition
    /// falls back to a raw `u16` holding-register write.
    pub fn set_scaled_value(&self, address: u16, value: f64) -> RegisterResult<()> {
        let mut inner = self.inner.write();
        let idx = holding_index(address);

        let Some(meta) = inner.definitions.get(&address).cloned() else {
            return match inner.holding_registers.get_mut(idx) {
                Some(slot) => {
                    *slot = value as u16;
                    Ok(())
                }
                None => Err(RegisterError::out_of_range(SPACE_HOLDING, address)),
            };
        };

        let words_needed = meta.data_type.register_count() as usize;
        if idx + words_needed > inner.holding_registers.len() {
            return Err(RegisterError::out_of_range_bulk(
                SPACE_HOLDING,
                address,
                words_needed as u16,
            ));
        }

        let scaled = (value * meta.scale).round();
        let regs = &mut inner.holding_registers;
        match meta.data_type {
            DataType::Uint16 => regs[idx] = scaled as u16,
            DataType::Int16 => regs[idx] = scaled as i16 as u16,
            DataType::Uint32 => {
                let raw = scaled as u32;
                regs[idx] = (raw >> 16) as u16;
                regs[idx + 1] = raw as u16;
            }
            DataType::Int32 => {
                let raw = scaled as i32 as u32;
                regs[idx] = (raw >> 16) as u16;
                regs[idx + 1] = raw as u16;
            }
            DataType::Float32 => {
                let raw = (value as f32).to_bits();
                regs[idx] = (raw >> 16) as u16;
                regs[idx + 1] = raw as u16;
            }
        }

        Ok(())
    }

    /// Reads an engineering value through the point's type and scale.
    pub fn get_scaled_value(&self, address: u16) -> RegisterResult<f64> {
        let inner = self.inner.read();
        let idx = holding_index(address);

        let Some(meta) = inner.definitions.get(&address) else {
            return inner
                .holding_registers
                .get(idx)
                .map(|&raw| f64::from(raw))
                .ok_or_else(|| RegisterError::out_of_range(SPACE_HOLDING, address));
        };

        let words_needed = meta.data_type.register_count() as usize;
        if idx + words_needed > inner.holding_registers.len() {
            return Err(RegisterError::out_of_range_bulk(
                SPACE_HOLDING,
                address,
                words_needed as u16,
            ));
        }

        let regs = &inner.holding_registers;
        let raw = match meta.data_type {
            DataType::Uint16 => f64::from(regs[idx]),
            DataType::Int16 => f64::from(regs[idx] as i16),
            DataType::Uint32 => f64::from((u32::from(regs[idx]) << 16) | u32::from(regs[idx + 1])),
            DataType::Int32 => {
                f64::from(((u32::from(regs[idx]) << 16) | u32::from(regs[idx + 1])) as i32)
            }
            DataType::Float32 => {
                let bits = (u32::from(regs[idx]) << 16) | u32::from(regs[idx + 1]);
                return Ok(f64::from(f32::from_bits(bits)));
            }
        };

        Ok(raw / meta.scale)
    }

    // =========================================================================
    // Raw Bulk Exporters
    // =========================================================================

    /// Returns a deep copy of the coil space.
    pub fn raw_coils(&self) -> Vec<bool> {
        self.inner.read().coils.clone()
    }

    /// Returns a deep copy of the discrete-input space.
    pub fn raw_discrete_inputs(&self) -> Vec<bool> {
        self.inner.read().discrete_inputs.clone()
    }

    /// Returns a deep copy of the input-register space.
    pub fn raw_input_registers(&self) -> Vec<u16> {
        self.inner.read().input_registers.clone()
    }

    /// Returns a deep copy of the holding-register space.
    pub fn raw_holding_registers(&self) -> Vec<u16> {
        self.inner.read().holding_registers.clone()
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for RegisterMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("RegisterMap")
            .field("coils", &inner.coils.len())
            .field("discrete_inputs", &inner.discrete_inputs.len())
            .field("input_registers", &inner.input_registers.len())
            .field("holding_registers", &inner.holding_registers.len())
            .field("definitions", &inner.definitions.len())
            .finish()
    }
}

/// Maps a holding-register address to its array index.
/// User-facing addresses (40001-based) and raw offsets both resolve.
#[inline]
fn holding_index(address: u16) -> usize {
    if address >= HOLDING_BASE_ADDRESS {
        (address - HOLDING_BASE_ADDRESS) as usize
    } else {
        address as usize
    }
}

fn range_of<'a, T>(
    slice: &'a [T],
    address: u16,
    quantity: u16,
    space: &'static str,
) -> RegisterResult<&'a [T]> {
    let start = address as usize;
    let end = start + quantity as usize;
    if quantity == 0 || end > slice.len() {
        return Err(RegisterError::out_of_range_bulk(space, address, quantity));
    }
    Ok(&slice[start..end])
}

fn range_of_mut<'a, T>(
    slice: &'a mut [T],
    address: u16,
    count: usize,
    space: &'static str,
) -> RegisterResult<&'a mut [T]> {
    let start = address as usize;
    let end = start + count;
    if count == 0 || end > slice.len() {
        return Err(RegisterError::out_of_range_bulk(space, address, count as u16));
    }
    Ok(&mut slice[start..end])
}

/// The canonical EMS register table.
pub fn default_register_table() -> Vec<RegisterDefinition> {
    vec![
        RegisterDefinition::new(40001, "LineVoltage", DataType::Uint16)
            .with_scale(10.0)
            .with_default(220.0)
            .with_unit("V"),
        RegisterDefinition::new(40002, "LineCurrent", DataType::Uint16)
            .with_scale(100.0)
            .with_default(15.50)
            .with_unit("A"),
        RegisterDefinition::new(40003, "Frequency", DataType::Uint16)
            .with_scale(100.0)
            .with_default(60.00)
            .with_unit("Hz"),
        RegisterDefinition::new(40004, "TotalEnergy", DataType::Uint32)
            .with_scale(1.0)
            .with_default(0.0)
            .with_unit("kWh"),
        RegisterDefinition::new(40006, "PowerFactor", DataType::Uint16)
            .with_scale(1000.0)
            .with_default(0.95),
        RegisterDefinition::new(40007, "ActivePower", DataType::Uint32)
            .with_scale(10.0)
            .with_default(3300.0)
            .with_unit("W"),
    ]
}

// =============================================================================
// Packing Helpers
// =============================================================================

/// Serializes registers to big-endian bytes (MSB first within each word).
pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(registers.len() * 2);
    for reg in registers {
        bytes.extend_from_slice(&reg.to_be_bytes());
    }
    bytes
}

/// Deserializes big-endian bytes to registers. Ignores a trailing odd byte.
pub fn bytes_to_registers(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Packs coil values into bytes, LSB = first coil within each byte.
pub fn coils_to_bytes(coils: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; coils.len().div_ceil(8)];
    for (i, &coil) in coils.iter().enumerate() {
        if coil {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpacks `count` coil values from packed bytes.
pub fn bytes_to_coils(data: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| data.get(i / 8).is_some_and(|byte| byte & (1 << (i % 8)) != 0))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
