//! Send-side state of one perfect link: the outbound window.
//!
//! [`Outbox`] holds every data packet sent to one peer that has not been
//! acknowledged yet.  Each entry follows a two-state machine:
//!
//! ```text
//!            retransmit on deadline
//!              ┌──────────┐
//!              ▼          │
//!  send ──▶ Unacked ──────┘
//!              │
//!              │ ack(seq)
//!              ▼
//!            Acked   (entry removed; never revisited)
//! ```
//!
//! Removal on acknowledgement and retransmission both happen through
//! `&mut self`, so once [`Outbox::ack`] has returned no retransmission of that
//! sequence number can ever be produced.
//!
//! This module only manages state; emitting packets is the caller's job.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::packet::Packet;
use crate::timer::RetransmitPolicy;

// ---------------------------------------------------------------------------
// Pending
// ---------------------------------------------------------------------------

/// An unacknowledged data packet.
#[derive(Debug, Clone)]
pub struct Pending {
    /// The packet as handed to the network.
    pub packet: Packet,
    /// Total number of times this packet has been transmitted.
    pub tx_count: u32,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
    /// When the next retransmission becomes due.
    pub deadline: Instant,
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Outbound window for one peer, keyed by data sequence number.
#[derive(Debug)]
pub struct Outbox {
    policy: RetransmitPolicy,
    window: BTreeMap<u64, Pending>,
}

impl Outbox {
    pub fn new(policy: RetransmitPolicy) -> Self {
        Self {
            policy,
            window: BTreeMap::new(),
        }
    }

    /// Record the first transmission of data packet `seq` at `now`.
    ///
    /// A packet already pending under `seq` is replaced and its timer
    /// restarted.  Returns `true` when that happened.
    pub fn record_sent(&mut self, seq: u64, packet: Packet, now: Instant) -> bool {
        let entry = Pending {
            packet,
            tx_count: 1,
            sent_at: now,
            deadline: now + self.policy.timeout(1),
        };
        self.window.insert(seq, entry).is_some()
    }

    /// Apply an acknowledgement for `seq`.
    ///
    /// Returns the removed entry, or `None` for a stale or unknown ack.
    pub fn ack(&mut self, seq: u64) -> Option<Pending> {
        self.window.remove(&seq)
    }

    /// Collect every packet whose deadline has passed at `now`, advancing its
    /// transmission count and re-arming its deadline.
    pub fn due(&mut self, now: Instant) -> Vec<Packet> {
        let policy = self.policy;
        self.window
            .values_mut()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| {
                entry.tx_count += 1;
                entry.sent_at = now;
                entry.deadline = now + policy.timeout(entry.tx_count);
                entry.packet.clone()
            })
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    pub fn is_pending(&self, seq: u64) -> bool {
        self.window.contains_key(&seq)
    }

    pub fn get(&self, seq: u64) -> Option<&Pending> {
        self.window.get(&seq)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    const RTO: Duration = Duration::from_millis(100);

    fn make_pkt(seq: i64) -> Packet {
        Packet::new(SocketAddr::from(([127, 0, 0, 1], 7000)), seq, vec![0u8; 4])
    }

    fn outbox() -> Outbox {
        Outbox::new(RetransmitPolicy::Fixed(RTO))
    }

    #[test]
    fn initial_state() {
        let o = outbox();
        assert_eq!(o.in_flight(), 0);
        assert!(!o.is_pending(1));
    }

    #[test]
    fn record_sent_arms_deadline() {
        let t0 = Instant::now();
        let mut o = outbox();
        assert!(!o.record_sent(1, make_pkt(1), t0));
        assert_eq!(o.in_flight(), 1);
        assert!(o.is_pending(1));
        assert_eq!(o.get(1).unwrap().deadline, t0 + RTO);
        assert_eq!(o.get(1).unwrap().tx_count, 1);
    }

    #[test]
    fn nothing_due_before_deadline() {
        let t0 = Instant::now();
        let mut o = outbox();
        o.record_sent(1, make_pkt(1), t0);
        assert!(o.due(t0 + RTO / 2).is_empty());
    }

    #[test]
    fn due_retransmits_and_rearms() {
        let t0 = Instant::now();
        let mut o = outbox();
        o.record_sent(1, make_pkt(1), t0);

        let resent = o.due(t0 + RTO);
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].seq(), 1);

        let entry = o.get(1).unwrap();
        assert_eq!(entry.tx_count, 2);
        assert_eq!(entry.sent_at, t0 + RTO);
        assert_eq!(entry.deadline, t0 + RTO * 2);

        // Not due again until the new deadline.
        assert!(o.due(t0 + RTO + RTO / 2).is_empty());
    }

    #[test]
    fn ack_removes_and_cancels() {
        let t0 = Instant::now();
        let mut o = outbox();
        o.record_sent(1, make_pkt(1), t0);
        o.record_sent(2, make_pkt(2), t0);

        let acked = o.ack(1).unwrap();
        assert_eq!(acked.packet.seq(), 1);
        assert!(!o.is_pending(1));

        let resent = o.due(t0 + RTO * 10);
        assert_eq!(resent.iter().map(Packet::seq).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn duplicate_ack_is_a_no_op() {
        let t0 = Instant::now();
        let mut o = outbox();
        o.record_sent(5, make_pkt(5), t0);
        assert!(o.ack(5).is_some());
        assert!(o.ack(5).is_none());
        assert!(o.ack(99).is_none());
        assert_eq!(o.in_flight(), 0);
        assert!(o.due(t0 + RTO * 10).is_empty());
    }

    #[test]
    fn resending_a_pending_seq_restarts_its_timer() {
        let t0 = Instant::now();
        let mut o = outbox();
        o.record_sent(3, make_pkt(3), t0);
        o.due(t0 + RTO);
        assert!(o.record_sent(3, make_pkt(3), t0 + RTO * 2));
        let entry = o.get(3).unwrap();
        assert_eq!(entry.tx_count, 1);
        assert_eq!(entry.deadline, t0 + RTO * 3);
    }

    #[test]
    fn backoff_policy_spreads_retransmissions() {
        let t0 = Instant::now();
        let mut o = Outbox::new(RetransmitPolicy::Exponential {
            initial: RTO,
            max: RTO * 8,
        });
        o.record_sent(1, make_pkt(1), t0);
        let t1 = t0 + RTO;
        assert_eq!(o.due(t1).len(), 1);
        assert_eq!(o.get(1).unwrap().deadline, t1 + RTO * 2);
    }
}
