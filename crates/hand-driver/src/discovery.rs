//! Bus scan for a hand whose id is unknown.

use crate::{DriverError, HandRegistry, Result};
use can_transport::CanBus;
use hand_protocol::{ChannelConfig, ChannelError, ParamChannel, ParamKind, Side};
use tracing::{debug, info, warn};

/// Number of ids probed, 1..=252.
pub const PROBE_COUNT: u16 = 252;
/// First id probed; the default device id.
pub const FIRST_PROBE: u8 = 50;

/// Candidate ids in scan order: 50, 51, ..., 252, 1, ..., 49.
pub fn probe_order() -> impl Iterator<Item = u8> {
    (0..PROBE_COUNT).map(|i| (1 + (i + u16::from(FIRST_PROBE) - 1) % PROBE_COUNT) as u8)
}

/// Find the first responsive hand matching `side`.
///
/// Each candidate is asked for its side through `probe`, re-addressed to the
/// candidate id; `probe.timeout` bounds every attempt. Ids held in `claimed`
/// are skipped. Silent ids are passed over; so are hands that answer with an
/// error status or a malformed reply. Transport failures abort the scan.
pub fn discover<B: CanBus + ?Sized>(
    bus: &mut B,
    probe: ChannelConfig,
    side: Option<Side>,
    claimed: &HandRegistry,
) -> Result<u8> {
    let mut wrong_side_found = false;
    for id in probe_order() {
        if claimed.is_claimed(id) {
            continue;
        }
        let config = probe.for_device(id)?;
        let found = match ParamChannel::new(&mut *bus, config).read(ParamKind::HandSide) {
            Ok(raw) => Side::from_wire(raw),
            Err(e) if e.is_recoverable() => continue,
            Err(e @ (ChannelError::Status { .. } | ChannelError::Framing(_))) => {
                warn!(id, error = %e, "hand answered discovery probe with an error");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        match side {
            Some(wanted) if wanted != found => {
                debug!(id, %found, %wanted, "skipping hand of the other side");
                wrong_side_found = true;
            }
            _ => {
                info!(id, side = %found, "discovered hand");
                return Ok(id);
            }
        }
    }
    let message = match side {
        Some(wanted) if wrong_side_found => format!("No {wanted} hands found on the CAN bus"),
        _ => "No hand found on the CAN bus".to_string(),
    };
    Err(DriverError::DeviceNotFound {
        message,
        wrong_side_found,
    })
}
