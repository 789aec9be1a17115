use crate::{BusInfo, CanBus, CanFrame, CanId, Result, TransportError};
use ::socketcan::{
    CanFrame as RawFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, StandardId,
};
use std::io::ErrorKind;
use std::time::Duration;

/// Linux SocketCAN interface (bitrate is configured with `ip link`).
pub struct SocketCanBus {
    iface: String,
    socket: CanSocket,
    read_timeout: Option<Duration>,
}

impl SocketCanBus {
    pub fn interface(&self) -> &str {
        &self.iface
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if self.read_timeout == Some(timeout) {
            return Ok(());
        }
        self.socket
            .set_read_timeout(timeout)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.read_timeout = Some(timeout);
        Ok(())
    }
}

fn to_raw(frame: &CanFrame) -> Result<RawFrame> {
    if frame.rtr {
        return Err(TransportError::Unsupported("RTR not implemented"));
    }
    let raw = if frame.id.is_extended() {
        ExtendedId::new(frame.id.raw()).and_then(|id| RawFrame::new(id, frame.payload()))
    } else {
        u16::try_from(frame.id.raw())
            .ok()
            .and_then(StandardId::new)
            .and_then(|id| RawFrame::new(id, frame.payload()))
    };
    raw.ok_or(TransportError::InvalidFrame("id or length"))
}

fn from_raw(raw: &RawFrame) -> Result<CanFrame> {
    let id = if raw.is_extended() {
        CanId::extended(raw.raw_id())
    } else {
        u16::try_from(raw.raw_id()).ok().and_then(CanId::standard)
    }
    .ok_or(TransportError::InvalidFrame("id range"))?;
    let mut frame = CanFrame::new(id, raw.data()).ok_or(TransportError::InvalidFrame("len"))?;
    frame.rtr = raw.is_remote_frame();
    Ok(frame.stamped_now())
}

impl CanBus for SocketCanBus {
    fn open(name: &str) -> Result<Self> {
        let socket = CanSocket::open(name).map_err(|e| match e.kind() {
            ErrorKind::NotFound => TransportError::InterfaceNotFound(name.to_string()),
            _ => TransportError::Io(e.to_string()),
        })?;
        tracing::debug!(iface = name, "socketcan open");
        Ok(Self {
            iface: name.to_string(),
            socket,
            read_timeout: None,
        })
    }

    fn list() -> Result<Vec<BusInfo>> {
        // ARPHRD_CAN
        const CAN_LINK_TYPE: &str = "280";
        let entries =
            std::fs::read_dir("/sys/class/net").map_err(|e| TransportError::Io(e.to_string()))?;
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let link_type = std::fs::read_to_string(entry.path().join("type")).unwrap_or_default();
            if link_type.trim() == CAN_LINK_TYPE {
                out.push(BusInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    driver: "socketcan".to_string(),
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<CanFrame> {
        if let Some(ms) = timeout_ms {
            self.set_timeout(Duration::from_millis(ms))?;
        }
        loop {
            match self.socket.read_frame() {
                Ok(raw) if raw.is_error_frame() => {
                    tracing::warn!(iface = %self.iface, "bus error frame");
                    continue;
                }
                Ok(raw) => return from_raw(&raw),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(TransportError::Timeout)
                }
                Err(e) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        let raw = to_raw(frame)?;
        self.socket
            .write_frame(&raw)
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}
