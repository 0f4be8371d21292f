// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Link to the remote tuning tool.

use crate::error::{IspError, Result};
use kanal::{Receiver, Sender};
use tracing::{trace, warn};

/// Ordered, reliable packet link.
///
/// At most one received command is held at a time. It stays available
/// through [`Transport::pending`] until [`Transport::release`] is called,
/// after which the next command may be received.
pub trait Transport: Send {
    fn pending(&mut self) -> Option<&[u8]>;

    fn release(&mut self);

    fn send(&mut self, packet: &[u8]) -> Result<()>;
}

/// In-process transport backed by channels.
pub struct ChannelTransport {
    commands: Receiver<Vec<u8>>,
    replies: Sender<Vec<u8>>,
    held: Option<Vec<u8>>,
    closed: bool,
}

impl Transport for ChannelTransport {
    fn pending(&mut self) -> Option<&[u8]> {
        if self.held.is_none() {
            match self.commands.try_recv() {
                Ok(Some(packet)) => {
                    trace!("received {} byte command", packet.len());
                    self.held = Some(packet);
                }
                Ok(None) => {}
                Err(err) => {
                    if !self.closed {
                        warn!("tuning tool link: {:?}", err);
                    }
                    self.closed = true;
                }
            }
        }
        self.held.as_deref()
    }

    fn release(&mut self) {
        self.held = None;
    }

    fn send(&mut self, packet: &[u8]) -> Result<()> {
        self.replies
            .send(packet.to_vec())
            .map_err(|_| IspError::Disconnected)
    }
}

/// Tool side of a [`ChannelTransport`].
#[derive(Clone)]
pub struct ToolLink {
    commands: Sender<Vec<u8>>,
    replies: Receiver<Vec<u8>>,
}

impl ToolLink {
    /// Queue a command, waiting while `capacity` commands are in flight.
    pub fn send(&self, packet: Vec<u8>) -> Result<()> {
        self.commands
            .send(packet)
            .map_err(|_| IspError::Disconnected)
    }

    /// Next reply, if one arrived.
    pub fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        self.replies.try_recv().map_err(|_| IspError::Disconnected)
    }

    /// Every reply received so far.
    pub fn drain(&self) -> Result<Vec<Vec<u8>>> {
        let mut packets = Vec::new();
        while let Some(packet) = self.try_recv()? {
            packets.push(packet);
        }
        Ok(packets)
    }
}

/// Connect a [`ChannelTransport`] to a [`ToolLink`]. Commands are bounded
/// by `capacity`; replies never block the ISP side.
pub fn channel(capacity: usize) -> (ChannelTransport, ToolLink) {
    let (command_tx, command_rx) = kanal::bounded(capacity);
    let (reply_tx, reply_rx) = kanal::unbounded();
    (
        ChannelTransport {
            commands: command_rx,
            replies: reply_tx,
            held: None,
            closed: false,
        },
        ToolLink {
            commands: command_tx,
            replies: reply_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_held_command() {
        let (mut transport, tool) = channel(4);
        tool.send(vec![1, 0, 0, 0]).unwrap();
        tool.send(vec![1, 2, 0, 0]).unwrap();

        assert_eq!(transport.pending(), Some(&[1u8, 0, 0, 0][..]));
        // held until released
        assert_eq!(transport.pending(), Some(&[1u8, 0, 0, 0][..]));
        transport.release();
        assert_eq!(transport.pending(), Some(&[1u8, 2, 0, 0][..]));
        transport.release();
        assert_eq!(transport.pending(), None);
    }

    #[test]
    fn test_replies_in_order() {
        let (mut transport, tool) = channel(1);
        transport.send(b"a").unwrap();
        transport.send(b"b").unwrap();
        assert_eq!(tool.drain().unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_closed_link() {
        let (mut transport, tool) = channel(1);
        drop(tool);
        assert!(matches!(transport.send(b"x"), Err(IspError::Disconnected)));
    }
}
