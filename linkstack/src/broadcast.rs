//! Best-Effort Broadcast over grouped Perfect Links.
//!
//! Every downward message is copied once per group member and each copy is
//! addressed to that member; the Perfect Links underneath retry every copy
//! independently.  Upward packets have already been deduplicated per sender by
//! the links and are delivered as they come.
//!
//! No atomicity is offered: if the broadcaster stops halfway through the
//! fan-out, some members get the message and others never do, and a member
//! that never acknowledges simply never receives it.  Nothing in this layer
//! detects either case.
//!
//! A message whose sequence number is not positive is rejected before any
//! copy is made.
//!
//! Whether the broadcaster delivers its own message, and how, is fixed at
//! construction by [`SelfDelivery`].

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{ConfigError, Membership, NodeConfig, ProcessId};
use crate::layer::{Effects, Layer, LayerError};
use crate::packet::Packet;
use crate::perfect_link::perfect_links;
use crate::socket::Socket;

/// What the broadcaster does with the copy addressed to itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelfDelivery {
    /// Send it like any other copy, through the local Perfect Link and the
    /// transport.  `n` downward sends per broadcast.
    #[default]
    Network,
    /// Deliver it upward immediately, with the local address as origin.
    /// `n - 1` downward sends plus one local delivery.
    Direct,
    /// Leave it out.  `n - 1` downward sends, no self delivery.
    Skip,
}

impl FromStr for SelfDelivery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "network" => Ok(Self::Network),
            "direct" => Ok(Self::Direct),
            "skip" => Ok(Self::Skip),
            _ => Err(format!("unknown self-delivery policy: {s}")),
        }
    }
}

impl fmt::Display for SelfDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Direct => "direct",
            Self::Skip => "skip",
        };
        f.write_str(name)
    }
}

/// The broadcast layer for one process.
#[derive(Debug)]
pub struct BestEffortBroadcast {
    local: SocketAddr,
    members: Vec<SocketAddr>,
    self_delivery: SelfDelivery,
}

impl BestEffortBroadcast {
    /// Broadcast from process `local` to every member of `membership`.
    pub fn new(
        membership: &Membership,
        local: ProcessId,
        self_delivery: SelfDelivery,
    ) -> Result<Self, ConfigError> {
        let local = membership.get(local)?.addr;
        Ok(Self {
            local,
            members: membership.iter().map(|p| p.addr).collect(),
            self_delivery,
        })
    }

    /// Number of downward sends one broadcast produces.
    pub fn fan_out(&self) -> usize {
        match self.self_delivery {
            SelfDelivery::Network => self.members.len(),
            SelfDelivery::Direct | SelfDelivery::Skip => self.members.len() - 1,
        }
    }
}

impl Layer<Packet> for BestEffortBroadcast {
    fn handle_down(&mut self, msg: Packet, fx: &mut Effects<Packet>) -> Result<(), LayerError> {
        if msg.seq() <= 0 {
            return Err(LayerError::InvalidSequence(msg.seq()));
        }
        log::debug!("[beb] broadcast seq={} to {} member(s)", msg.seq(), self.members.len());
        for &member in &self.members {
            if member != self.local {
                fx.push_down(msg.with_peer(member));
                continue;
            }
            match self.self_delivery {
                SelfDelivery::Network => fx.push_down(msg.with_peer(member)),
                SelfDelivery::Direct => fx.push_up(msg.with_peer(member)),
                SelfDelivery::Skip => {}
            }
        }
        Ok(())
    }

    fn handle_up(&mut self, pkt: Packet, fx: &mut Effects<Packet>) -> Result<(), LayerError> {
        log::trace!("[beb] deliver seq={} from {}", pkt.seq(), pkt.peer());
        fx.push_up(pkt);
        Ok(())
    }
}

/// Build `transport → Perfect Links → Best-Effort Broadcast` for process
/// `local` and return the application socket.
///
/// Fails before stacking anything when `local` is not in `membership`.
pub fn stack_over(
    transport: Socket<Packet>,
    membership: Arc<Membership>,
    local: ProcessId,
    config: &NodeConfig,
) -> Result<Socket<Packet>, ConfigError> {
    let beb = BestEffortBroadcast::new(&membership, local, config.self_delivery)?;
    let links = perfect_links(membership, config.retransmit);
    Ok(transport
        .stack_with(links, config.tick)
        .stack_with(beb, config.tick))
}
