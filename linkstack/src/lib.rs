//! `linkstack`: distributed-algorithm protocol stacks built from composable
//! layers over an unreliable datagram transport.
//!
//! # Architecture
//!
//! ```text
//!        application  (Socket<Packet>: send / recv)
//!            │   ▲
//!  ┌─────────▼───┴──────────┐
//!  │ Best-Effort Broadcast  │  fan-out: one copy per group member
//!  └─────────┬───▲──────────┘
//!  ┌─────────▼───┴──────────┐
//!  │ Grouped Perfect Links  │  one instance per peer: ack, retransmit, dedup
//!  │  [p1]  [p2]  [p3] ...  │
//!  └─────────┬───▲──────────┘
//!  ┌─────────▼───┴──────────┐
//!  │  Transport (UDP / sim) │  fair-loss: may drop, duplicate, reorder
//!  └────────────────────────┘
//! ```
//!
//! Each box is a [`layer::Layer`] stacked on the socket below it with
//! [`socket::Socket::stack`]; the result is again a socket, so stacks can be
//! arbitrarily deep.
//!
//! Each module has a single responsibility:
//! - [`packet`]: message unit and wire format
//! - [`layer`]: the layer trait and synchronous composition
//! - [`socket`]: sockets and the stacking combinator (one task per layer)
//! - [`group`]: per-key demultiplexing into independent instances
//! - [`sender`]: per-peer outbound window
//! - [`receiver`]: per-peer delivered set
//! - [`timer`]: retransmission timeouts
//! - [`perfect_link`]: Perfect Links
//! - [`broadcast`]: Best-Effort Broadcast and the full-stack builder
//! - [`config`]: process membership and node configuration
//! - [`transport`]: UDP transport
//! - [`simulator`]: fault-injecting in-memory network for testing

pub mod broadcast;
pub mod config;
pub mod group;
pub mod layer;
pub mod packet;
pub mod perfect_link;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod timer;
pub mod transport;

pub use broadcast::{BestEffortBroadcast, SelfDelivery};
pub use config::{ConfigError, Membership, NodeConfig, Process, ProcessId};
pub use group::{group, Grouped};
pub use layer::{Effects, Layer, LayerError, Stacked};
pub use packet::{Packet, PacketError};
pub use perfect_link::{perfect_links, PerfectLink, PerfectLinks};
pub use socket::{stack, Socket, SocketError};
pub use timer::RetransmitPolicy;
pub use transport::{TransportError, UdpTransport};
