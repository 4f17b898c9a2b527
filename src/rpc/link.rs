//! Device link — joins a [`Transport`] with the inbound/outbound channels.
//!
//! Inbound wire messages are decoded into [`Inbound`] and queued until the
//! control loop polls them.  Commands submitted by the controls are queued
//! and encoded onto the transport by [`DeviceLink::flush_outbound`].
//! Commands are fire-and-forget: nothing waits for an acknowledgement.

use embassy_sync::channel::TrySendError;
use log::{debug, warn};

use crate::app::ports::{CommandSink, InboundSource};
use crate::error::{Error, Result};

use super::channels::{InboundChannel, OutboundChannel};
use super::command::Command;
use super::inbound::Inbound;
use super::transport::Transport;

pub struct DeviceLink<T: Transport> {
    transport: T,
    inbound: InboundChannel,
    outbound: OutboundChannel,
    float_resolution: usize,
    sent: u64,
    rejected: u64,
}

impl<T: Transport> DeviceLink<T> {
    pub fn new(transport: T, float_resolution: usize) -> Self {
        Self {
            transport,
            inbound: InboundChannel::new(),
            outbound: OutboundChannel::new(),
            float_resolution,
            sent: 0,
            rejected: 0,
        }
    }

    /// Move available transport messages into the inbound channel.
    ///
    /// Stops when the transport is drained or the channel is full.
    /// Undecodable messages are logged and dropped.
    pub fn pump_inbound(&mut self) -> Result<usize> {
        let mut queued = 0;
        while !self.inbound.is_full() {
            let Some(msg) = self.transport.recv().map_err(transport_error)? else {
                break;
            };
            match Inbound::decode(&msg) {
                Ok(inbound) => {
                    if self.inbound.try_send(inbound).is_ok() {
                        queued += 1;
                    }
                }
                Err(e) => {
                    self.rejected += 1;
                    warn!("dropping inbound '{}': {}", msg.event, e);
                }
            }
        }
        Ok(queued)
    }

    /// Encode every queued command onto the transport.
    pub fn flush_outbound(&mut self) -> Result<usize> {
        let mut written = 0;
        while let Ok(cmd) = self.outbound.try_receive() {
            let wire = cmd.to_wire(self.float_resolution)?;
            self.transport.send(&wire).map_err(transport_error)?;
            debug!("sent {}", cmd.kind());
            written += 1;
        }
        if written > 0 {
            self.transport.flush().map_err(transport_error)?;
            self.sent += written as u64;
        }
        Ok(written)
    }

    /// Commands written to the transport so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Inbound messages dropped because they could not be decoded.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}

impl<T: Transport> CommandSink for DeviceLink<T> {
    fn submit(&mut self, cmd: Command) -> Result<()> {
        let Err(TrySendError::Full(cmd)) = self.outbound.try_send(cmd) else {
            return Ok(());
        };
        self.flush_outbound()?;
        self.outbound
            .try_send(cmd)
            .map_err(|_| Error::Transport("outbound channel full".into()))
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_outbound().map(|_| ())
    }
}

impl<T: Transport> InboundSource for DeviceLink<T> {
    fn poll(&mut self) -> Result<Option<Inbound>> {
        if self.inbound.is_empty() {
            self.pump_inbound()?;
        }
        Ok(self.inbound.try_receive().ok())
    }
}

fn transport_error(e: impl core::fmt::Display) -> Error {
    Error::Transport(e.to_string())
}
