//! Linux SocketCAN transport
//!
//! Sends on one raw socket and opens a fresh socket per subscription, so
//! frames this node sends are also seen on its own receive path through the
//! kernel loopback.

use crate::transport::{FrameSource, Transport};
use crate::types::{CanFrame, CanifError, Result};
use embedded_can::{ExtendedId, Frame as EmbeddedFrame, Id, StandardId};
use socketcan::{CanSocket, Frame, Socket};
use std::io::ErrorKind;
use std::time::Duration;

/// Raw CAN socket bound to one interface
pub struct SocketCanTransport {
    interface: String,
    socket: CanSocket,
}

impl SocketCanTransport {
    /// Open `interface` (e.g. `can0`, `vcan0`)
    pub fn open(interface: &str) -> Result<Self> {
        log::info!("Opening SocketCAN interface {}", interface);
        let socket = CanSocket::open(interface).map_err(|e| {
            CanifError::Transport(format!("Failed to open socket on interface {}: {}", interface, e))
        })?;
        Ok(Self {
            interface: interface.to_string(),
            socket,
        })
    }
}

fn frame_id(can_id: u32, is_extended: bool) -> Result<Id> {
    let id = if is_extended {
        ExtendedId::new(can_id).map(Id::Extended)
    } else {
        u16::try_from(can_id)
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard)
    };
    id.ok_or_else(|| CanifError::Transport(format!("Invalid CAN id 0x{:X}", can_id)))
}

impl Transport for SocketCanTransport {
    fn send(&self, can_id: u32, is_extended: bool, data: &[u8]) -> Result<()> {
        let frame = socketcan::CanFrame::new(frame_id(can_id, is_extended)?, data).ok_or_else(|| {
            CanifError::Transport(format!("Payload of {} bytes does not fit a CAN frame", data.len()))
        })?;
        self.socket
            .write_frame(&frame)
            .map_err(|e| CanifError::Transport(format!("{} send failed: {}", self.interface, e)))
    }

    fn subscribe(&self) -> Result<Box<dyn FrameSource>> {
        let socket = CanSocket::open(&self.interface).map_err(|e| {
            CanifError::Transport(format!("Failed to open socket on interface {}: {}", self.interface, e))
        })?;
        Ok(Box::new(SocketCanSource {
            interface: self.interface.clone(),
            socket,
        }))
    }

    fn describe(&self) -> String {
        format!("socketcan {}", self.interface)
    }
}

struct SocketCanSource {
    interface: String,
    socket: CanSocket,
}

impl FrameSource for SocketCanSource {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<CanFrame>> {
        match self.socket.read_frame_timeout(timeout) {
            Ok(socketcan::CanFrame::Error(err)) => Err(CanifError::Transport(format!(
                "{} error frame: 0x{:X}",
                self.interface,
                err.raw_id()
            ))),
            Ok(frame) => Ok(Some(CanFrame::new(
                frame.raw_id(),
                EmbeddedFrame::is_extended(&frame),
                frame.data(),
            ))),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(CanifError::Transport(format!("{} receive failed: {}", self.interface, e))),
        }
    }
}
