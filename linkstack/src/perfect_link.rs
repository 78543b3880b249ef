//! Perfect Links: reliable, deduplicated point-to-point delivery.
//!
//! [`PerfectLink`] is the per-peer protocol instance; [`perfect_links`] wraps
//! it in a [`Grouped`] layer keyed by process id so that each peer gets its
//! own instance.
//!
//! # Protocol, per peer
//!
//! - **Send.** A downward data packet `s` enters the [`Outbox`] and is
//!   forwarded immediately.  Every tick resends what is past its deadline,
//!   until the acknowledgement `-s` arrives.
//! - **Receive data.** An upward data packet `s` is acknowledged straight
//!   away with `-s`.  It is delivered upward only if `s` is new to the
//!   [`DeliveredSet`]; duplicates are acknowledged again but suppressed.
//! - **Receive ack.** An upward acknowledgement `-s` removes `s` from the
//!   outbox.  Acks are never delivered upward and never acknowledged.

use std::sync::Arc;

use crate::config::{Membership, ProcessId};
use crate::group::{group, Grouped};
use crate::layer::{Effects, Layer, LayerError};
use crate::packet::{Kind, Packet};
use crate::receiver::DeliveredSet;
use crate::sender::Outbox;
use crate::timer::RetransmitPolicy;

/// The grouped Perfect Links layer.
pub type PerfectLinks = Grouped<Packet, ProcessId, PerfectLink>;

/// One peer's link state.
#[derive(Debug)]
pub struct PerfectLink {
    outbox: Outbox,
    delivered: DeliveredSet,
}

impl PerfectLink {
    pub fn new(policy: RetransmitPolicy) -> Self {
        Self {
            outbox: Outbox::new(policy),
            delivered: DeliveredSet::new(),
        }
    }

    /// Number of data packets awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.outbox.in_flight()
    }

    pub fn is_pending(&self, seq: u64) -> bool {
        self.outbox.is_pending(seq)
    }

    /// Transmissions so far of pending packet `seq` (first send included).
    pub fn transmissions(&self, seq: u64) -> Option<u32> {
        self.outbox.get(seq).map(|p| p.tx_count)
    }

    pub fn has_delivered(&self, seq: u64) -> bool {
        self.delivered.contains(seq)
    }
}

impl Layer<Packet> for PerfectLink {
    fn handle_down(&mut self, pkt: Packet, fx: &mut Effects<Packet>) -> Result<(), LayerError> {
        let Kind::Data(seq) = pkt.kind() else {
            log::warn!("[pl] seq={} cannot be sent as data; dropped", pkt.seq());
            return Ok(());
        };
        log::debug!("[pl] → {pkt}");
        if self.outbox.record_sent(seq, pkt.clone(), fx.now()) {
            log::debug!("[pl] seq={seq} resent by application; timer restarted");
        }
        fx.push_down(pkt);
        Ok(())
    }

    fn handle_up(&mut self, pkt: Packet, fx: &mut Effects<Packet>) -> Result<(), LayerError> {
        match pkt.kind() {
            Kind::Data(seq) => {
                fx.push_down(pkt.ack());
                if self.delivered.insert(seq) {
                    log::debug!("[pl] ← {pkt}; → ACK, delivered");
                    fx.push_up(pkt);
                } else {
                    log::debug!("[pl] ← {pkt}; → ACK, duplicate suppressed");
                }
            }
            Kind::Ack(seq) => match self.outbox.ack(seq) {
                Some(entry) => log::debug!(
                    "[pl] ← ACK {} seq={seq} after {} transmission(s)",
                    pkt.peer(),
                    entry.tx_count
                ),
                None => log::trace!("[pl] ← stale ACK {} seq={seq}", pkt.peer()),
            },
            Kind::Invalid => log::warn!("[pl] ← malformed packet from {}; dropped", pkt.peer()),
        }
        Ok(())
    }

    fn on_tick(&mut self, fx: &mut Effects<Packet>) -> Result<(), LayerError> {
        for pkt in self.outbox.due(fx.now()) {
            log::debug!("[pl] timeout, retransmitting {pkt}");
            fx.push_down(pkt);
        }
        Ok(())
    }
}

/// Perfect Links over the processes in `membership`.
///
/// Packets are keyed by the process owning their peer address; packets to or
/// from addresses outside the membership are logged and dropped.
pub fn perfect_links(membership: Arc<Membership>, policy: RetransmitPolicy) -> PerfectLinks {
    group(
        move |pkt: &Packet| membership.id_of(pkt.peer()),
        move |_: &ProcessId| PerfectLink::new(policy),
    )
}
