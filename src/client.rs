// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport independent client traits

use async_trait::async_trait;

use crate::{
    error::Error,
    frame::{Address, Coil, Quantity, Request, Response, Word},
    master::{ExecuteOptions, Master},
};

/// A transport independent asynchronous client trait.
#[async_trait]
pub trait Client: Send {
    /// Invoke a Modbus function and wait for its outcome.
    async fn call(&mut self, request: Request) -> Result<Response, Error>;
}

/// An asynchronous Modbus reader.
#[async_trait]
pub trait Reader: Client {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>, Error>;

    async fn read_discrete_inputs(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Coil>, Error>;

    async fn read_holding_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, Error>;

    async fn read_input_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, Error>;
}

/// An asynchronous Modbus writer.
#[async_trait]
pub trait Writer: Client {
    async fn write_single_coil(&mut self, addr: Address, state: Coil) -> Result<(), Error>;

    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<(), Error>;

    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<(), Error>;

    async fn write_multiple_registers(
        &mut self,
        addr: Address,
        words: &[Word],
    ) -> Result<(), Error>;
}

#[async_trait]
impl Client for Master {
    async fn call(&mut self, request: Request) -> Result<Response, Error> {
        self.execute(request, ExecuteOptions::default()).await
    }
}

#[async_trait]
impl Reader for Master {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>, Error> {
        let request = Request::read_coils(addr, cnt)?;
        match self.call(request).await? {
            Response::ReadCoils(coils) => Ok(coils),
            _ => Err(Error::InvalidResponseData("unexpected response")),
        }
    }

    async fn read_discrete_inputs(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Coil>, Error> {
        let request = Request::read_discrete_inputs(addr, cnt)?;
        match self.call(request).await? {
            Response::ReadDiscreteInputs(inputs) => Ok(inputs),
            _ => Err(Error::InvalidResponseData("unexpected response")),
        }
    }

    async fn read_holding_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, Error> {
        let request = Request::read_holding_registers(addr, cnt)?;
        match self.call(request).await? {
            Response::ReadHoldingRegisters(words) => Ok(words),
            _ => Err(Error::InvalidResponseData("unexpected response")),
        }
    }

    async fn read_input_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, Error> {
        let request = Request::read_input_registers(addr, cnt)?;
        match self.call(request).await? {
            Response::ReadInputRegisters(words) => Ok(words),
            _ => Err(Error::InvalidResponseData("unexpected response")),
        }
    }
}

#[async_trait]
impl Writer for Master {
    async fn write_single_coil(&mut self, addr: Address, state: Coil) -> Result<(), Error> {
        let request = Request::write_single_coil(addr, state);
        match self.call(request).await? {
            Response::WriteSingleCoil(_, _) => Ok(()),
            _ => Err(Error::InvalidResponseData("unexpected response")),
        }
    }

    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<(), Error> {
        let request = Request::write_single_register(addr, word);
        match self.call(request).await? {
            Response::WriteSingleRegister(_, _) => Ok(()),
            _ => Err(Error::InvalidResponseData("unexpected response")),
        }
    }

    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<(), Error> {
        let request = Request::write_multiple_coils(addr, coils.to_vec())?;
        match self.call(request).await? {
            Response::WriteMultipleCoils(_, _) => Ok(()),
            _ => Err(Error::InvalidResponseData("unexpected response")),
        }
    }

    async fn write_multiple_registers(
        &mut self,
        addr: Address,
        words: &[Word],
    ) -> Result<(), Error> {
        let request = Request::write_multiple_registers(addr, words.to_vec())?;
        match self.call(request).await? {
            Response::WriteMultipleRegisters(_, _) => Ok(()),
            _ => Err(Error::InvalidResponseData("unexpected response")),
        }
    }
}
