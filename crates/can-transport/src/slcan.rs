use crate::{BusInfo, CanBus, CanFrame, CanId, Result, TransportError, MAX_PAYLOAD};
use serialport::{SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// SLCAN text protocol over serial (common USB-CAN dongles)
pub struct SlcanBus {
    port_path: String,
    port: Box<dyn SerialPort>,
    pending: Vec<u8>,
}

impl SlcanBus {
    /// Open the port, program the bitrate (500k when `None`) and open the channel.
    pub fn open_with(path: &str, bitrate: Option<SlcanBitrate>) -> Result<Self> {
        let mut port = serialport::new(path, 115_200)
            .timeout(Duration::from_millis(200))
            .open()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let code = bitrate.unwrap_or(SlcanBitrate::B500k).code();
        // Closing an already closed channel is answered with BELL; ignore it.
        let _ = write_cmd(&mut *port, b"C\r");
        write_cmd(&mut *port, &[b'S', code, b'\r'])?;
        write_cmd(&mut *port, b"O\r")?;
        tracing::debug!(path, bitrate = ?bitrate, "slcan channel open");
        Ok(SlcanBus {
            port_path: path.to_string(),
            port,
            pending: Vec::with_capacity(64),
        })
    }

    pub fn path(&self) -> &str {
        &self.port_path
    }
}

fn write_cmd(port: &mut dyn SerialPort, cmd: &[u8]) -> Result<()> {
    port.write_all(cmd)
        .map_err(|e| TransportError::Io(e.to_string()))
}

fn encode_frame(frame: &CanFrame) -> Result<Vec<u8>> {
    if frame.rtr {
        return Err(TransportError::Unsupported("RTR not implemented"));
    }
    if usize::from(frame.len) > MAX_PAYLOAD {
        return Err(TransportError::InvalidFrame("dlc > 8"));
    }
    let mut out = Vec::with_capacity(32);
    if frame.id.is_extended() {
        out.extend_from_slice(format!("T{:08X}", frame.id.raw()).as_bytes());
    } else {
        out.extend_from_slice(format!("t{:03X}", frame.id.raw()).as_bytes());
    }
    out.push(b'0' + frame.len);
    for b in frame.payload() {
        out.extend_from_slice(format!("{b:02X}").as_bytes());
    }
    out.push(b'\r');
    Ok(out)
}

fn hex_field(line: &[u8], what: &'static str) -> Result<u32> {
    let s = std::str::from_utf8(line).map_err(|_| TransportError::InvalidFrame("utf8"))?;
    u32::from_str_radix(s, 16).map_err(|_| TransportError::InvalidFrame(what))
}

fn parse_frame(line: &[u8]) -> Result<CanFrame> {
    let (kind, rest) = line
        .split_first()
        .ok_or(TransportError::InvalidFrame("empty"))?;
    let id_digits = match kind {
        b't' | b'r' => 3,
        b'T' | b'R' => 8,
        _ => return Err(TransportError::InvalidFrame("unknown header")),
    };
    if rest.len() < id_digits + 1 {
        return Err(TransportError::InvalidFrame("short header"));
    }
    let raw = hex_field(&rest[..id_digits], "id")?;
    let id = if id_digits == 8 {
        CanId::extended(raw)
    } else {
        u16::try_from(raw).ok().and_then(CanId::standard)
    }
    .ok_or(TransportError::InvalidFrame("id range"))?;

    let dlc = usize::from(rest[id_digits].wrapping_sub(b'0'));
    if dlc > MAX_PAYLOAD {
        return Err(TransportError::InvalidFrame("dlc > 8"));
    }
    let body = &rest[id_digits + 1..];
    if body.len() < dlc * 2 {
        return Err(TransportError::InvalidFrame("short data"));
    }
    let mut payload = [0u8; MAX_PAYLOAD];
    for (i, pair) in body.chunks_exact(2).take(dlc).enumerate() {
        payload[i] = hex_field(pair, "byte")? as u8;
    }
    let mut frame =
        CanFrame::new(id, &payload[..dlc]).ok_or(TransportError::InvalidFrame("len"))?;
    frame.rtr = matches!(kind, b'r' | b'R');
    Ok(frame.stamped_now())
}

impl CanBus for SlcanBus {
    fn open(path: &str) -> Result<Self>
    where
        Self: Sized,
    {
        Self::open_with(path, Some(SlcanBitrate::B500k))
    }

    fn list() -> Result<Vec<BusInfo>> {
        let ports = serialport::available_ports().map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|p| {
                let driver = match p.port_type {
                    SerialPortType::UsbPort(_) => "slcan-serial",
                    _ => "serial",
                };
                BusInfo {
                    name: p.port_name,
                    driver: driver.to_string(),
                }
            })
            .collect())
    }

    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<CanFrame> {
        if let Some(ms) = timeout_ms {
            self.port
                .set_timeout(Duration::from_millis(ms))
                .map_err(|e| TransportError::Io(e.to_string()))?;
        }
        let mut buf = [0u8; 128];
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\r') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                let line = &line[..line.len() - 1];
                // Bare CR acknowledges a command; it carries no frame.
                if line.is_empty() || line == b"z" || line == b"Z" {
                    continue;
                }
                return parse_frame(line);
            }
            match self.port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => return Err(TransportError::Timeout),
                Err(e) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        let line = encode_frame(frame)?;
        self.port
            .write_all(&line)
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

/// Supported SLCAN bitrates (mapped to Sx codes)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SlcanBitrate {
    B10k,  // S0
    B20k,  // S1
    B50k,  // S2
    B100k, // S3
    B125k, // S4
    B250k, // S5
    B500k, // S6
    B800k, // S7
    B1M,   // S8
}

impl SlcanBitrate {
    pub fn code(self) -> u8 {
        match self {
            SlcanBitrate::B10k => b'0',
            SlcanBitrate::B20k => b'1',
            SlcanBitrate::B50k => b'2',
            SlcanBitrate::B100k => b'3',
            SlcanBitrate::B125k => b'4',
            SlcanBitrate::B250k => b'5',
            SlcanBitrate::B500k => b'6',
            SlcanBitrate::B800k => b'7',
            SlcanBitrate::B1M => b'8',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_line_round_trip() {
        let id = CanId::extended(0x0C46_AA32).unwrap();
        let frame = CanFrame::new(id, &[0x00, 0x00, 0x10, 0x27]).unwrap();
        let line = encode_frame(&frame).unwrap();
        assert_eq!(line, b"T0C46AA32400001027\r".to_vec());
        let parsed = parse_frame(&line[..line.len() - 1]).unwrap();
        assert_eq!(parsed.id, id);
        assert_eq!(parsed.payload(), frame.payload());
    }

    #[test]
    fn test_standard_and_malformed_lines() {
        let parsed = parse_frame(b"t1232ABCD").unwrap();
        assert_eq!(parsed.id, CanId::standard(0x123).unwrap());
        assert_eq!(parsed.payload(), &[0xAB, 0xCD]);

        assert!(parse_frame(b"").is_err());
        assert!(parse_frame(b"x123").is_err());
        assert!(parse_frame(b"t1232AB").is_err());
        assert!(parse_frame(b"t1239").is_err());
    }
}
