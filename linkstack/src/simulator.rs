//! In-memory network simulator for deterministic testing.
//!
//! Real networks drop and duplicate packets.  To exercise the reliability
//! mechanisms without depending on actual network conditions, a
//! [`Simulator`] hands out packet [`Socket`]s that talk to each other through
//! a configurable fault model:
//!
//! | Fault          | Description                                           |
//! |----------------|-------------------------------------------------------|
//! | Packet loss    | Drop a packet with probability `loss_rate`.           |
//! | Duplication    | Deliver a packet twice with probability `duplicate_rate`. |
//! | Scripted drops | Drop the next `n` data packets (or acks) on one link.  |
//! | Isolation      | Drop everything to and from one endpoint.             |
//!
//! Random faults come from a seeded RNG so failures are reproducible.  Every
//! packet is encoded and decoded on its way through, like on a real wire.
//!
//! Endpoints are registered with [`Simulator::endpoint`], which needs a tokio
//! runtime.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::packet::{Kind, Packet};
use crate::socket::{Socket, Wire};

/// Configuration for the fault-injection model.
///
/// Probabilities are clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given packet is silently dropped.
    pub loss_rate: f64,
    /// Probability that a delivered packet is delivered a second time.
    pub duplicate_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

/// Per-link packet counters, `from → to`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Data packets handed to the link (transmissions and retransmissions).
    pub data_sent: u64,
    /// Data packets that reached the destination (duplicates included).
    pub data_delivered: u64,
    /// Acknowledgements handed to the link.
    pub acks_sent: u64,
    /// Packets of any kind the link dropped.
    pub dropped: u64,
}

struct SimState {
    config: SimulatorConfig,
    rng: StdRng,
    endpoints: HashMap<SocketAddr, mpsc::UnboundedSender<Packet>>,
    /// Remaining scripted drops per `(from, to, is_data)`.
    scripted: HashMap<(SocketAddr, SocketAddr, bool), u64>,
    isolated: HashSet<SocketAddr>,
    stats: HashMap<(SocketAddr, SocketAddr), LinkStats>,
}

/// A fault-injecting network shared by any number of endpoints.
#[derive(Clone)]
pub struct Simulator {
    inner: Arc<Mutex<SimState>>,
}

impl Simulator {
    pub fn new(mut config: SimulatorConfig) -> Self {
        config.loss_rate = config.loss_rate.clamp(0.0, 1.0);
        config.duplicate_rate = config.duplicate_rate.clamp(0.0, 1.0);
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            inner: Arc::new(Mutex::new(SimState {
                config,
                rng,
                endpoints: HashMap::new(),
                scripted: HashMap::new(),
                isolated: HashSet::new(),
                stats: HashMap::new(),
            })),
        }
    }

    /// A loss-free, duplicate-free network.
    pub fn reliable() -> Self {
        Self::new(SimulatorConfig::default())
    }

    /// Attach an endpoint at `addr` and return its packet socket.
    ///
    /// Packets sent on the socket are routed by their peer address; packets
    /// received carry the sender's address.  Re-registering an address
    /// replaces the previous endpoint.
    pub fn endpoint(&self, addr: SocketAddr) -> Socket<Packet> {
        let (socket, Wire { up, mut down }) = Socket::pair();
        self.lock().endpoints.insert(addr, up);

        let sim = self.clone();
        tokio::spawn(async move {
            while let Some(pkt) = down.recv().await {
                sim.route(addr, pkt);
            }
            log::debug!("[sim] endpoint {addr} detached");
        });
        socket
    }

    /// Drop the next `count` data packets sent from `from` to `to`.
    pub fn drop_next(&self, from: SocketAddr, to: SocketAddr, count: u64) {
        *self.lock().scripted.entry((from, to, true)).or_default() += count;
    }

    /// Drop the next `count` acknowledgements sent from `from` to `to`.
    pub fn drop_next_acks(&self, from: SocketAddr, to: SocketAddr, count: u64) {
        *self.lock().scripted.entry((from, to, false)).or_default() += count;
    }

    /// Drop every packet to or from `addr` from now on.
    pub fn isolate(&self, addr: SocketAddr) {
        self.lock().isolated.insert(addr);
    }

    /// Counters for the `from → to` link.
    pub fn stats(&self, from: SocketAddr, to: SocketAddr) -> LinkStats {
        self.lock()
            .stats
            .get(&(from, to))
            .copied()
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not hide the state from the others.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn route(&self, from: SocketAddr, pkt: Packet) {
        let to = pkt.peer();
        let is_data = matches!(pkt.kind(), Kind::Data(_));
        let bytes = pkt.encode();

        let mut state = self.lock();
        let state = &mut *state;
        let stats = state.stats.entry((from, to)).or_default();
        if is_data {
            stats.data_sent += 1;
        } else {
            stats.acks_sent += 1;
        }

        let scripted = match state.scripted.get_mut(&(from, to, is_data)) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };
        let isolated = state.isolated.contains(&from) || state.isolated.contains(&to);
        if scripted || isolated || state.rng.random::<f64>() < state.config.loss_rate {
            stats.dropped += 1;
            log::trace!("[sim] {from} → {pkt} dropped");
            return;
        }

        let Some(dest) = state.endpoints.get(&to) else {
            stats.dropped += 1;
            log::debug!("[sim] no endpoint at {to}; dropped");
            return;
        };
        let copies = if state.rng.random::<f64>() < state.config.duplicate_rate {
            2
        } else {
            1
        };
        for _ in 0..copies {
            // The wire carries bytes; decoding always succeeds for our own encoding.
            let Ok(delivered) = Packet::decode(from, &bytes) else {
                return;
            };
            if dest.send(delivered).is_ok() && is_data {
                stats.data_delivered += 1;
            }
        }
    }
}
