// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types

pub use crate::{
    client::{Client, Reader, Writer},
    connection::{Connection, ConnectionEvent, StreamConnection},
    master::{Config, ExecuteOptions, Framing, Master, MasterEvent},
    slave::{Slave, SlaveId},
    Address, Coil, Error, ExceptionCode, ExceptionResponse, FunctionCode, Quantity, Request,
    Response, Word,
};
