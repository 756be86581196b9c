// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus/TCP frame types and the byte-level codec.
//!
//! An application data unit (ADU) is the 7-byte MBAP header followed by the
//! protocol data unit (PDU = function code + data):
//!
//! | Offset | Field | Size |
//! |---|---|---|
//! | 0 | Transaction ID | 2 |
//! | 2 | Protocol ID | 2 (always 0) |
//! | 4 | Length | 2 (bytes that follow) |
//! | 6 | Unit ID | 1 |
//! | 7 | Function Code | 1 |
//! | 8 | Data | N |
//!
//! Everything on the wire is big-endian. Coil bits pack LSB-first within
//! each byte.

use modsim_core::error::RegisterError;
use modsim_core::registers::{bytes_to_coils, bytes_to_registers, coils_to_bytes, registers_to_bytes};

// =============================================================================
// Constants
// =============================================================================

/// MBAP header length in bytes.
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum ADU length in bytes.
pub const MAX_ADU_LEN: usize = 260;

/// Maximum PDU length in bytes (function code + data).
pub const MAX_PDU_LEN: usize = MAX_ADU_LEN - MBAP_HEADER_LEN;

/// Read Coils.
pub const FC_READ_COILS: u8 = 0x01;
/// Read Discrete Inputs.
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
/// Read Holding Registers.
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
/// Read Input Registers.
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
/// Write Single Coil.
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
/// Write Single Register.
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
/// Write Multiple Coils.
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
/// Write Multiple Registers.
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Maximum coils per read request.
pub const MAX_COILS_PER_READ: u16 = 2000;
/// Maximum registers per read request.
pub const MAX_REGISTERS_PER_READ: u16 = 125;
/// Maximum coils per write request.
pub const MAX_COILS_PER_WRITE: u16 = 1968;
/// Maximum registers per write request.
pub const MAX_REGISTERS_PER_WRITE: u16 = 123;

/// Write Single Coil "on" value.
pub const COIL_ON: u16 = 0xFF00;
/// Write Single Coil "off" value.
pub const COIL_OFF: u16 = 0x0000;

// =============================================================================
// ExceptionCode
// =============================================================================

/// Modbus exception codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExceptionCode {
    /// The function code is not supported.
    IllegalFunction = 0x01,

    /// Address plus quantity falls outside the space, or the point is
    /// read-only.
    IllegalDataAddress = 0x02,

    /// Quantity or value outside the protocol range, malformed byte count.
    IllegalDataValue = 0x03,

    /// The underlying register operation failed for another reason.
    ServerDeviceFailure = 0x04,
}

impl ExceptionCode {
    /// The wire encoding of this exception code.
    #[inline]
    pub const fn code(&self) -> u8 {
        *self as u8
    }

    /// Human name, used in debug logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::ServerDeviceFailure => "server device failure",
        }
    }
}

impl std::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.code())
    }
}

impl From<RegisterError> for ExceptionCode {
    fn from(err: RegisterError) -> Self {
        match err {
            RegisterError::OutOfRange { .. } | RegisterError::NotWritable { .. } => {
                Self::IllegalDataAddress
            }
        }
    }
}

// =============================================================================
// MbapHeader
// =============================================================================

/// The 7-byte MBAP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Echoed unchanged in the response.
    pub transaction_id: u16,

    /// Must be zero for Modbus/TCP.
    pub protocol_id: u16,

    /// Number of bytes that follow the length field (unit id + PDU).
    pub length: u16,

    /// Target slave within the TCP session.
    pub unit_id: u8,
}

impl MbapHeader {
    /// Decodes a header from its 7 wire bytes.
    pub fn decode(bytes: &[u8; MBAP_HEADER_LEN]) -> Self {
        Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        }
    }

    /// Encodes the header to its 7 wire bytes.
    pub fn encode(&self) -> [u8; MBAP_HEADER_LEN] {
        let txn = self.transaction_id.to_be_bytes();
        let proto = self.protocol_id.to_be_bytes();
        let len = self.length.to_be_bytes();
        [txn[0], txn[1], proto[0], proto[1], len[0], len[1], self.unit_id]
    }

    /// The PDU length implied by the header.
    #[inline]
    pub fn pdu_len(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }

    /// Whether the length field is plausible for a Modbus/TCP ADU.
    #[inline]
    pub fn length_valid(&self) -> bool {
        self.length >= 2 && self.pdu_len() <= MAX_PDU_LEN
    }
}

// =============================================================================
// Request
// =============================================================================

/// A decoded Modbus request PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// FC 01.
    ReadCoils {
        /// Starting offset.
        address: u16,
        /// Number of coils, 1 to 2000.
        quantity: u16,
    },

    /// FC 02.
    ReadDiscreteInputs {
        /// Starting offset.
        address: u16,
        /// Number of inputs, 1 to 2000.
        quantity: u16,
    },

    /// FC 03.
    ReadHoldingRegisters {
        /// Starting offset.
        address: u16,
        /// Number of registers, 1 to 125.
        quantity: u16,
    },

    /// FC 04.
    ReadInputRegisters {
        /// Starting offset.
        address: u16,
        /// Number of registers, 1 to 125.
        quantity: u16,
    },

    /// FC 05. `value` is the raw wire value (0xFF00 or 0x0000).
    WriteSingleCoil {
        /// Coil offset.
        address: u16,
        /// Raw on/off encoding.
        value: u16,
    },

    /// FC 06.
    WriteSingleRegister {
        /// Register offset.
        address: u16,
        /// The value to write.
        value: u16,
    },

    /// FC 15.
    WriteMultipleCoils {
        /// Starting offset.
        address: u16,
        /// The coil values.
        values: Vec<bool>,
    },

    /// FC 16.
    WriteMultipleRegisters {
        /// Starting offset.
        address: u16,
        /// The register values.
        values: Vec<u16>,
    },
}

impl Request {
    /// Decodes a request from a PDU (function code + data).
    ///
    /// Returns the exception the request deserves when it is recognizable
    /// but malformed: unknown function code (0x01), quantity or value out of
    /// the protocol range, or inconsistent byte count (0x03). The caller
    /// already knows the function code from the first PDU byte.
    pub fn parse(pdu: &[u8]) -> Result<Request, ExceptionCode> {
        let (&fc, data) = pdu
            .split_first()
            .ok_or(ExceptionCode::IllegalDataValue)?;

        match fc {
            FC_READ_COILS | FC_READ_DISCRETE_INPUTS => {
                let (address, quantity) = parse_addr_qty(data)?;
                if quantity == 0 || quantity > MAX_COILS_PER_READ {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                Ok(if fc == FC_READ_COILS {
                    Request::ReadCoils { address, quantity }
                } else {
                    Request::ReadDiscreteInputs { address, quantity }
                })
            }

            FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
                let (address, quantity) = parse_addr_qty(data)?;
                if quantity == 0 || quantity > MAX_REGISTERS_PER_READ {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                Ok(if fc == FC_READ_HOLDING_REGISTERS {
                    Request::ReadHoldingRegisters { address, quantity }
                } else {
                    Request::ReadInputRegisters { address, quantity }
                })
            }

            FC_WRITE_SINGLE_COIL => {
                let (address, value) = parse_addr_qty(data)?;
                if value != COIL_ON && value != COIL_OFF {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                Ok(Request::WriteSingleCoil { address, value })
            }

            FC_WRITE_SINGLE_REGISTER => {
                let (address, value) = parse_addr_qty(data)?;
                Ok(Request::WriteSingleRegister { address, value })
            }

            FC_WRITE_MULTIPLE_COILS => {
                if data.len() < 5 {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                let address = u16::from_be_bytes([data[0], data[1]]);
                let quantity = u16::from_be_bytes([data[2], data[3]]);
                let byte_count = data[4] as usize;

                if quantity == 0 || quantity > MAX_COILS_PER_WRITE {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                if byte_count != (quantity as usize).div_ceil(8) || data.len() != 5 + byte_count {
                    return Err(ExceptionCode::IllegalDataValue);
                }

                Ok(Request::WriteMultipleCoils {
                    address,
                    values: bytes_to_coils(&data[5..], quantity as usize),
                })
            }

            FC_WRITE_MULTIPLE_REGISTERS => {
                if data.len() < 5 {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                let address = u16::from_be_bytes([data[0], data[1]]);
                let quantity = u16::from_be_bytes([data[2], data[3]]);
                let byte_count = data[4] as usize;

                if quantity == 0 || quantity > MAX_REGISTERS_PER_WRITE {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                if byte_count != quantity as usize * 2 || data.len() != 5 + byte_count {
                    return Err(ExceptionCode::IllegalDataValue);
                }

                Ok(Request::WriteMultipleRegisters {
                    address,
                    values: bytes_to_registers(&data[5..]),
                })
            }

            _ => Err(ExceptionCode::IllegalFunction),
        }
    }

    /// The function code of this request.
    pub const fn function_code(&self) -> u8 {
        match self {
            Request::ReadCoils { .. } => FC_READ_COILS,
            Request::ReadDiscreteInputs { .. } => FC_READ_DISCRETE_INPUTS,
            Request::ReadHoldingRegisters { .. } => FC_READ_HOLDING_REGISTERS,
            Request::ReadInputRegisters { .. } => FC_READ_INPUT_REGISTERS,
            Request::WriteSingleCoil { .. } => FC_WRITE_SINGLE_COIL,
            Request::WriteSingleRegister { .. } => FC_WRITE_SINGLE_REGISTER,
            Request::WriteMultipleCoils { .. } => FC_WRITE_MULTIPLE_COILS,
            Request::WriteMultipleRegisters { .. } => FC_WRITE_MULTIPLE_REGISTERS,
        }
    }
}

fn parse_addr_qty(data: &[u8]) -> Result<(u16, u16), ExceptionCode> {
    if data.len() != 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok((
        u16::from_be_bytes([data[0], data[1]]),
        u16::from_be_bytes([data[2], data[3]]),
    ))
}

// =============================================================================
// Response
// =============================================================================

/// A Modbus response PDU ready for encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// FC 01 response: packed coil bits.
    ReadCoils(Vec<bool>),

    /// FC 02 response: packed input bits.
    ReadDiscreteInputs(Vec<bool>),

    /// FC 03 response: register words.
    ReadHoldingRegisters(Vec<u16>),

    /// FC 04 response: register words.
    ReadInputRegisters(Vec<u16>),

    /// FC 05 response: echo of the request.
    WriteSingleCoil {
        /// Coil offset.
        address: u16,
        /// Raw on/off encoding.
        value: u16,
    },

    /// FC 06 response: echo of the request.
    WriteSingleRegister {
        /// Register offset.
        address: u16,
        /// The written value.
        value: u16,
    },

    /// FC 15 response: start address and quantity written.
    WriteMultipleCoils {
        /// Starting offset.
        address: u16,
        /// Number of coils written.
        quantity: u16,
    },

    /// FC 16 response: start address and quantity written.
    WriteMultipleRegisters {
        /// Starting offset.
        address: u16,
        /// Number of registers written.
        quantity: u16,
    },

    /// Exception response: function code with the high bit set plus one
    /// exception byte.
    Exception {
        /// The offending request's function code (without the high bit).
        function_code: u8,
        /// The exception code.
        code: ExceptionCode,
    },
}

impl Response {
    /// Encodes this response as a PDU (function code + data).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Response::ReadCoils(bits) | Response::ReadDiscreteInputs(bits) => {
                let fc = if matches!(self, Response::ReadCoils(_)) {
                    FC_READ_COILS
                } else {
                    FC_READ_DISCRETE_INPUTS
                };
                let packed = coils_to_bytes(bits);
                let mut pdu = Vec::with_capacity(2 + packed.len());
                pdu.push(fc);
                pdu.push(packed.len() as u8);
                pdu.extend_from_slice(&packed);
                pdu
            }

            Response::ReadHoldingRegisters(regs) | Response::ReadInputRegisters(regs) => {
                let fc = if matches!(self, Response::ReadHoldingRegisters(_)) {
                    FC_READ_HOLDING_REGISTERS
                } else {
                    FC_READ_INPUT_REGISTERS
                };
                let bytes = registers_to_bytes(regs);
                let mut pdu = Vec::with_capacity(2 + bytes.len());
                pdu.push(fc);
                pdu.push(bytes.len() as u8);
                pdu.extend_from_slice(&bytes);
                pdu
            }

            Response::WriteSingleCoil { address, value } => {
                encode_echo(FC_WRITE_SINGLE_COIL, *address, *value)
            }

            Response::WriteSingleRegister { address, value } => {
                encode_echo(FC_WRITE_SINGLE_REGISTER, *address, *value)
            }

            Response::WriteMultipleCoils { address, quantity } => {
                encode_echo(FC_WRITE_MULTIPLE_COILS, *address, *quantity)
            }

            Response::WriteMultipleRegisters { address, quantity } => {
                encode_echo(FC_WRITE_MULTIPLE_REGISTERS, *address, *quantity)
            }

            Response::Exception {
                function_code,
                code,
            } => vec![function_code | 0x80, code.code()],
        }
    }

    /// Returns `true` if this is an exception response.
    #[inline]
    pub const fn is_exception(&self) -> bool {
        matches!(self, Response::Exception { .. })
    }
}

fn encode_echo(fc: u8, address: u16, value: u16) -> Vec<u8> {
    let addr = address.to_be_bytes();
    let val = value.to_be_bytes();
    vec![fc, addr[0], addr[1], val[0], val[1]]
}

/// Assembles a full response ADU: MBAP header plus PDU.
pub fn encode_adu(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let header = MbapHeader {
        transaction_id,
        protocol_id: 0,
        length: pdu.len() as u16 + 1,
        unit_id,
    };
    let mut adu = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    adu.extend_from_slice(&header.encode());
    adu.extend_from_slice(pdu);
    adu
}

// =============================================================================
// Tests
// =============================================================================
