// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(feature = "ascii")]
pub(crate) mod ascii;

#[cfg(feature = "rtu")]
pub(crate) mod rtu;

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

use std::{error, fmt};

use crate::error::ValidationError;

/// A Modbus function code is represented by an unsigned 8 bit integer.
pub type FunctionCode = u8;

/// A Modbus protocol address is represented by 16 bit (from `0` to `65535`).
///
/// This *protocol address* uses 0-based indexing, while the *coil address* or
/// *register address* is often specified as a number with 1-based indexing.
/// Please consult the specification of your devices if 1-based coil/register
/// addresses need to be converted to 0-based protocol addresses by subtracting 1.
pub type Address = u16;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub type Coil = bool;

/// Modbus uses 16 bit for its data items (big-endian representation).
pub type Word = u16;

/// Number of items to process (`0` - `65535`).
pub type Quantity = u16;

/// Maximum number of coils or discrete inputs in a single read (0x01/0x02).
pub const MAX_READ_BITS: Quantity = 0x07D0;

/// Maximum number of registers in a single read (0x03/0x04).
pub const MAX_READ_WORDS: Quantity = 0x007D;

/// Maximum number of coils in a single multiple write (0x0F).
pub const MAX_WRITE_BITS: Quantity = 0x07B0;

/// Maximum number of registers in a single multiple write (0x10).
pub const MAX_WRITE_WORDS: Quantity = 0x007B;

/// Maximum length of a PDU (function code byte included).
pub const MAX_PDU_LEN: usize = 253;

/// A request represents a message from the client (master) to the server (slave).
///
/// Use the constructor functions to validate address ranges and
/// quantity bounds before a request enters the transaction queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils(Address, Quantity),
    ReadDiscreteInputs(Address, Quantity),
    ReadHoldingRegisters(Address, Quantity),
    ReadInputRegisters(Address, Quantity),
    WriteSingleCoil(Address, Coil),
    WriteSingleRegister(Address, Word),
    WriteMultipleCoils(Address, Vec<Coil>),
    WriteMultipleRegisters(Address, Vec<Word>),
}

impl Request {
    /// Read `quantity` coils starting at `address` (function code 0x01).
    pub fn read_coils(address: Address, quantity: Quantity) -> Result<Self, ValidationError> {
        let req = Self::ReadCoils(address, quantity);
        req.validate()?;
        Ok(req)
    }

    /// Read `quantity` discrete inputs starting at `address` (function code 0x02).
    pub fn read_discrete_inputs(
        address: Address,
        quantity: Quantity,
    ) -> Result<Self, ValidationError> {
        let req = Self::ReadDiscreteInputs(address, quantity);
        req.validate()?;
        Ok(req)
    }

    /// Read `quantity` holding registers starting at `address` (function code 0x03).
    pub fn read_holding_registers(
        address: Address,
        quantity: Quantity,
    ) -> Result<Self, ValidationError> {
        let req = Self::ReadHoldingRegisters(address, quantity);
        req.validate()?;
        Ok(req)
    }

    /// Read `quantity` input registers starting at `address` (function code 0x04).
    pub fn read_input_registers(
        address: Address,
        quantity: Quantity,
    ) -> Result<Self, ValidationError> {
        let req = Self::ReadInputRegisters(address, quantity);
        req.validate()?;
        Ok(req)
    }

    /// Switch a single coil on or off (function code 0x05).
    #[must_use]
    pub const fn write_single_coil(address: Address, state: Coil) -> Self {
        Self::WriteSingleCoil(address, state)
    }

    /// Write a single register (function code 0x06).
    #[must_use]
    pub const fn write_single_register(address: Address, word: Word) -> Self {
        Self::WriteSingleRegister(address, word)
    }

    /// Write a run of coils starting at `address` (function code 0x0F).
    pub fn write_multiple_coils(
        address: Address,
        coils: Vec<Coil>,
    ) -> Result<Self, ValidationError> {
        let req = Self::WriteMultipleCoils(address, coils);
        req.validate()?;
        Ok(req)
    }

    /// Write a run of registers starting at `address` (function code 0x10).
    pub fn write_multiple_registers(
        address: Address,
        words: Vec<Word>,
    ) -> Result<Self, ValidationError> {
        let req = Self::WriteMultipleRegisters(address, words);
        req.validate()?;
        Ok(req)
    }

    /// The function code of this request.
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        match self {
            Self::ReadCoils(_, _) => 0x01,
            Self::ReadDiscreteInputs(_, _) => 0x02,
            Self::ReadHoldingRegisters(_, _) => 0x03,
            Self::ReadInputRegisters(_, _) => 0x04,
            Self::WriteSingleCoil(_, _) => 0x05,
            Self::WriteSingleRegister(_, _) => 0x06,
            Self::WriteMultipleCoils(_, _) => 0x0F,
            Self::WriteMultipleRegisters(_, _) => 0x10,
        }
    }

    /// Check address range and quantity bounds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::ReadCoils(address, quantity) | Self::ReadDiscreteInputs(address, quantity) => {
                check_quantity(self.function_code(), *address, *quantity, MAX_READ_BITS)
            }
            Self::ReadHoldingRegisters(address, quantity)
            | Self::ReadInputRegisters(address, quantity) => {
                check_quantity(self.function_code(), *address, *quantity, MAX_READ_WORDS)
            }
            Self::WriteSingleCoil(_, _) | Self::WriteSingleRegister(_, _) => Ok(()),
            Self::WriteMultipleCoils(address, coils) => {
                check_payload(self.function_code(), *address, coils.len(), MAX_WRITE_BITS)
            }
            Self::WriteMultipleRegisters(address, words) => {
                check_payload(self.function_code(), *address, words.len(), MAX_WRITE_WORDS)
            }
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadCoils(address, quantity) => {
                write!(f, "ReadCoils: address = 0x{address:0>4X}, quantity = {quantity}")
            }
            Self::ReadDiscreteInputs(address, quantity) => write!(
                f,
                "ReadDiscreteInputs: address = 0x{address:0>4X}, quantity = {quantity}"
            ),
            Self::ReadHoldingRegisters(address, quantity) => write!(
                f,
                "ReadHoldingRegisters: address = 0x{address:0>4X}, quantity = {quantity}"
            ),
            Self::ReadInputRegisters(address, quantity) => write!(
                f,
                "ReadInputRegisters: address = 0x{address:0>4X}, quantity = {quantity}"
            ),
            Self::WriteSingleCoil(address, state) => write!(
                f,
                "WriteSingleCoil: address = 0x{address:0>4X}, state = {}",
                coil_str(*state)
            ),
            Self::WriteSingleRegister(address, word) => write!(
                f,
                "WriteSingleRegister: address = 0x{address:0>4X}, value = 0x{word:0>4X}"
            ),
            Self::WriteMultipleCoils(address, coils) => write!(
                f,
                "WriteMultipleCoils: address = 0x{address:0>4X}, quantity = {}",
                coils.len()
            ),
            Self::WriteMultipleRegisters(address, words) => write!(
                f,
                "WriteMultipleRegisters: address = 0x{address:0>4X}, quantity = {}",
                words.len()
            ),
        }
    }
}

/// The data of a successful request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<Coil>),
    ReadDiscreteInputs(Vec<Coil>),
    ReadHoldingRegisters(Vec<Word>),
    ReadInputRegisters(Vec<Word>),
    WriteSingleCoil(Address, Coil),
    WriteSingleRegister(Address, Word),
    WriteMultipleCoils(Address, Quantity),
    WriteMultipleRegisters(Address, Quantity),
}

impl Response {
    pub fn read_coils(coils: Vec<Coil>) -> Result<Self, ValidationError> {
        let rsp = Self::ReadCoils(coils);
        rsp.validate()?;
        Ok(rsp)
    }

    pub fn read_discrete_inputs(inputs: Vec<Coil>) -> Result<Self, ValidationError> {
        let rsp = Self::ReadDiscreteInputs(inputs);
        rsp.validate()?;
        Ok(rsp)
    }

    pub fn read_holding_registers(words: Vec<Word>) -> Result<Self, ValidationError> {
        let rsp = Self::ReadHoldingRegisters(words);
        rsp.validate()?;
        Ok(rsp)
    }

    pub fn read_input_registers(words: Vec<Word>) -> Result<Self, ValidationError> {
        let rsp = Self::ReadInputRegisters(words);
        rsp.validate()?;
        Ok(rsp)
    }

    #[must_use]
    pub const fn write_single_coil(address: Address, state: Coil) -> Self {
        Self::WriteSingleCoil(address, state)
    }

    #[must_use]
    pub const fn write_single_register(address: Address, word: Word) -> Self {
        Self::WriteSingleRegister(address, word)
    }

    pub fn write_multiple_coils(
        address: Address,
        quantity: Quantity,
    ) -> Result<Self, ValidationError> {
        let rsp = Self::WriteMultipleCoils(address, quantity);
        rsp.validate()?;
        Ok(rsp)
    }

    pub fn write_multiple_registers(
        address: Address,
        quantity: Quantity,
    ) -> Result<Self, ValidationError> {
        let rsp = Self::WriteMultipleRegisters(address, quantity);
        rsp.validate()?;
        Ok(rsp)
    }

    /// The function code of this response.
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        match self {
            Self::ReadCoils(_) => 0x01,
            Self::ReadDiscreteInputs(_) => 0x02,
            Self::ReadHoldingRegisters(_) => 0x03,
            Self::ReadInputRegisters(_) => 0x04,
            Self::WriteSingleCoil(_, _) => 0x05,
            Self::WriteSingleRegister(_, _) => 0x06,
            Self::WriteMultipleCoils(_, _) => 0x0F,
            Self::WriteMultipleRegisters(_, _) => 0x10,
        }
    }

    /// Check payload length and quantity bounds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::ReadCoils(coils) | Self::ReadDiscreteInputs(coils) => {
                check_payload(self.function_code(), 0, coils.len(), MAX_READ_BITS)
            }
            Self::ReadHoldingRegisters(words) | Self::ReadInputRegisters(words) => {
                check_payload(self.function_code(), 0, words.len(), MAX_READ_WORDS)
            }
            Self::WriteSingleCoil(_, _) | Self::WriteSingleRegister(_, _) => Ok(()),
            Self::WriteMultipleCoils(address, quantity) => {
                check_quantity(self.function_code(), *address, *quantity, MAX_WRITE_BITS)
            }
            Self::WriteMultipleRegisters(address, quantity) => {
                check_quantity(self.function_code(), *address, *quantity, MAX_WRITE_WORDS)
            }
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadCoils(coils) => write!(f, "ReadCoils: {} bit(s)", coils.len()),
            Self::ReadDiscreteInputs(inputs) => {
                write!(f, "ReadDiscreteInputs: {} bit(s)", inputs.len())
            }
            Self::ReadHoldingRegisters(words) => {
                write!(f, "ReadHoldingRegisters: {} register(s)", words.len())
            }
            Self::ReadInputRegisters(words) => {
                write!(f, "ReadInputRegisters: {} register(s)", words.len())
            }
            Self::WriteSingleCoil(address, state) => write!(
                f,
                "WriteSingleCoil: address = 0x{address:0>4X}, state = {}",
                coil_str(*state)
            ),
            Self::WriteSingleRegister(address, word) => write!(
                f,
                "WriteSingleRegister: address = 0x{address:0>4X}, value = 0x{word:0>4X}"
            ),
            Self::WriteMultipleCoils(address, quantity) => write!(
                f,
                "WriteMultipleCoils: address = 0x{address:0>4X}, quantity = {quantity}"
            ),
            Self::WriteMultipleRegisters(address, quantity) => write!(
                f,
                "WriteMultipleRegisters: address = 0x{address:0>4X}, quantity = {quantity}"
            ),
        }
    }
}

const fn coil_str(state: Coil) -> &'static str {
    if state {
        "ON"
    } else {
        "OFF"
    }
}

fn check_quantity(
    function: FunctionCode,
    address: Address,
    quantity: Quantity,
    max: Quantity,
) -> Result<(), ValidationError> {
    if quantity < 1 || quantity > max {
        return Err(ValidationError::QuantityOutOfRange {
            function,
            quantity: quantity.into(),
            max,
        });
    }
    check_address_span(function, address, quantity)
}

fn check_payload(
    function: FunctionCode,
    address: Address,
    len: usize,
    max: Quantity,
) -> Result<(), ValidationError> {
    if len < 1 || len > usize::from(max) {
        return Err(ValidationError::QuantityOutOfRange {
            function,
            quantity: len,
            max,
        });
    }
    check_address_span(function, address, len as Quantity)
}

fn check_address_span(
    function: FunctionCode,
    address: Address,
    quantity: Quantity,
) -> Result<(), ValidationError> {
    if u32::from(address) + u32::from(quantity) - 1 > 0xFFFF {
        return Err(ValidationError::AddressOverflow {
            function,
            address,
            quantity,
        });
    }
    Ok(())
}

/// A server (slave) exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetDevice,
    /// An exception code outside the set defined by the specification.
    Unknown(u8),
}

impl ExceptionCode {
    /// The raw exception code byte.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::ServerDeviceFailure => 0x04,
            Self::Acknowledge => 0x05,
            Self::ServerDeviceBusy => 0x06,
            Self::MemoryParityError => 0x08,
            Self::GatewayPathUnavailable => 0x0A,
            Self::GatewayTargetDevice => 0x0B,
            Self::Unknown(code) => code,
        }
    }
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::ServerDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::ServerDeviceBusy,
            0x08 => Self::MemoryParityError,
            0x0A => Self::GatewayPathUnavailable,
            0x0B => Self::GatewayTargetDevice,
            code => Self::Unknown(code),
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalFunction => write!(f, "Illegal function"),
            Self::IllegalDataAddress => write!(f, "Illegal data address"),
            Self::IllegalDataValue => write!(f, "Illegal data value"),
            Self::ServerDeviceFailure => write!(f, "Server device failure"),
            Self::Acknowledge => write!(f, "Acknowledge"),
            Self::ServerDeviceBusy => write!(f, "Server device busy"),
            Self::MemoryParityError => write!(f, "Memory parity error"),
            Self::GatewayPathUnavailable => write!(f, "Gateway path unavailable"),
            Self::GatewayTargetDevice => write!(f, "Gateway target device failed to respond"),
            Self::Unknown(code) => write!(f, "Unknown exception code 0x{code:0>2X}"),
        }
    }
}

/// A server (slave) exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    /// The function code of the rejected request (high bit cleared).
    pub function: FunctionCode,
    /// The exception reported by the peer.
    pub exception: ExceptionCode,
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}

/// Represents a message from the client (master) to the server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestPdu(pub(crate) Request);

impl From<Request> for RequestPdu {
    fn from(from: Request) -> Self {
        RequestPdu(from)
    }
}

impl From<RequestPdu> for Request {
    fn from(from: RequestPdu) -> Self {
        from.0
    }
}

/// Represents a message from the server (slave) to the client (master).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponsePdu(pub(crate) Result<Response, ExceptionResponse>);

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

impl From<ResponsePdu> for Result<Response, ExceptionResponse> {
    fn from(from: ResponsePdu) -> Self {
        from.0
    }
}

#[cfg(feature = "serde")]
mod options {
    //! Named-field construction of requests and responses.
    //!
    //! The shadow types deserialize the recognized keys for each
    //! function and run the same validators as the typed
    //! constructors, so a malformed map fails exactly like a
    //! malformed constructor call.

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    #[serde(tag = "function", rename_all = "kebab-case")]
    enum RequestOptions {
        ReadCoils {
            #[serde(default)]
            address: Address,
            quantity: Quantity,
        },
        ReadDiscreteInputs {
            #[serde(default)]
            address: Address,
            quantity: Quantity,
        },
        ReadHoldingRegisters {
            #[serde(default)]
            address: Address,
            quantity: Quantity,
        },
        ReadInputRegisters {
            #[serde(default)]
            address: Address,
            quantity: Quantity,
        },
        WriteSingleCoil {
            #[serde(default)]
            address: Address,
            #[serde(default)]
            state: Coil,
        },
        WriteSingleRegister {
            #[serde(default)]
            address: Address,
            #[serde(default)]
            value: Word,
        },
        WriteMultipleCoils {
            #[serde(default)]
            address: Address,
            states: Vec<Coil>,
        },
        WriteMultipleRegisters {
            #[serde(default)]
            address: Address,
            values: Vec<Word>,
        },
    }

    impl TryFrom<RequestOptions> for Request {
        type Error = ValidationError;

        fn try_from(from: RequestOptions) -> Result<Self, Self::Error> {
            match from {
                RequestOptions::ReadCoils { address, quantity } => {
                    Request::read_coils(address, quantity)
                }
                RequestOptions::ReadDiscreteInputs { address, quantity } => {
                    Request::read_discrete_inputs(address, quantity)
                }
                RequestOptions::ReadHoldingRegisters { address, quantity } => {
                    Request::read_holding_registers(address, quantity)
                }
                RequestOptions::ReadInputRegisters { address, quantity } => {
                    Request::read_input_registers(address, quantity)
                }
                RequestOptions::WriteSingleCoil { address, state } => {
                    Ok(Request::write_single_coil(address, state))
                }
                RequestOptions::WriteSingleRegister { address, value } => {
                    Ok(Request::write_single_register(address, value))
                }
                RequestOptions::WriteMultipleCoils { address, states } => {
                    Request::write_multiple_coils(address, states)
                }
                RequestOptions::WriteMultipleRegisters { address, values } => {
                    Request::write_multiple_registers(address, values)
                }
            }
        }
    }

    impl<'de> Deserialize<'de> for Request {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let options = RequestOptions::deserialize(deserializer)?;
            Self::try_from(options).map_err(serde::de::Error::custom)
        }
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "function", rename_all = "kebab-case")]
    enum ResponseOptions {
        ReadCoils {
            states: Vec<Coil>,
        },
        ReadDiscreteInputs {
            states: Vec<Coil>,
        },
        ReadHoldingRegisters {
            values: Vec<Word>,
        },
        ReadInputRegisters {
            values: Vec<Word>,
        },
        WriteSingleCoil {
            #[serde(default)]
            address: Address,
            #[serde(default)]
            state: Coil,
        },
        WriteSingleRegister {
            #[serde(default)]
            address: Address,
            #[serde(default)]
            value: Word,
        },
        WriteMultipleCoils {
            #[serde(default)]
            address: Address,
            quantity: Quantity,
        },
        WriteMultipleRegisters {
            #[serde(default)]
            address: Address,
            quantity: Quantity,
        },
    }

    impl TryFrom<ResponseOptions> for Response {
        type Error = ValidationError;

        fn try_from(from: ResponseOptions) -> Result<Self, Self::Error> {
            match from {
                ResponseOptions::ReadCoils { states } => Response::read_coils(states),
                ResponseOptions::ReadDiscreteInputs { states } => {
                    Response::read_discrete_inputs(states)
                }
                ResponseOptions::ReadHoldingRegisters { values } => {
                    Response::read_holding_registers(values)
                }
                ResponseOptions::ReadInputRegisters { values } => {
                    Response::read_input_registers(values)
                }
                ResponseOptions::WriteSingleCoil { address, state } => {
                    Ok(Response::write_single_coil(address, state))
                }
                ResponseOptions::WriteSingleRegister { address, value } => {
                    Ok(Response::write_single_register(address, value))
                }
                ResponseOptions::WriteMultipleCoils { address, quantity } => {
                    Response::write_multiple_coils(address, quantity)
                }
                ResponseOptions::WriteMultipleRegisters { address, quantity } => {
                    Response::write_multiple_registers(address, quantity)
                }
            }
        }
    }

    impl<'de> Deserialize<'de> for Response {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let options = ResponseOptions::deserialize(deserializer)?;
            Self::try_from(options).map_err(serde::de::Error::custom)
        }
    }
}
