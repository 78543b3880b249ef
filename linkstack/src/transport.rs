//! UDP transport: the fair-loss leaf every stack is built on.
//!
//! [`UdpTransport`] is a thin wrapper around `tokio::net::UdpSocket` that
//! speaks [`Packet`] instead of raw bytes.  Once turned into a [`Socket`],
//! two background tasks move datagrams:
//!
//! - **receive**: decode each datagram, stamp it with the sender's address and
//!   push it upward.  Undecodable datagrams are logged and dropped.
//! - **send**: encode each downward packet and `send_to` its peer.  A failed
//!   send is logged and treated like any other loss.
//!
//! No protocol logic lives here.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::packet::Packet;
use crate::socket::{Socket, Wire};

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bound, packet-oriented UDP endpoint.
#[derive(Debug)]
pub struct UdpTransport {
    /// Address this transport is bound to (filled in after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind to `local_addr`.  Port `0` lets the OS choose.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, TransportError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        log::debug!("[udp] bound {local_addr}");
        Ok(Self {
            local_addr,
            inner: Arc::new(inner),
        })
    }

    /// Start moving datagrams and return the packet socket.
    ///
    /// Both background tasks stop once the returned socket is dropped.
    pub fn into_socket(self) -> Socket<Packet> {
        let (socket, Wire { up, down }) = Socket::pair();
        tokio::spawn(recv_loop(self.inner.clone(), up));
        tokio::spawn(send_loop(self.inner, down));
        socket
    }
}

async fn recv_loop(udp: Arc<UdpSocket>, up: mpsc::UnboundedSender<Packet>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = tokio::select! {
            result = udp.recv_from(&mut buf) => match result {
                Ok(v) => v,
                Err(e) => {
                    // ICMP port-unreachable and friends surface here; the
                    // socket itself is still usable.
                    log::warn!("[udp] receive error: {e}");
                    continue;
                }
            },
            _ = up.closed() => break,
        };
        match Packet::decode(from, &buf[..n]) {
            Ok(pkt) => {
                log::trace!("[udp] ← {pkt}");
                if up.send(pkt).is_err() {
                    break;
                }
            }
            Err(e) => log::warn!("[udp] dropping datagram from {from}: {e}"),
        }
    }
    log::debug!("[udp] receive loop stopped");
}

async fn send_loop(udp: Arc<UdpSocket>, mut down: mpsc::UnboundedReceiver<Packet>) {
    while let Some(pkt) = down.recv().await {
        log::trace!("[udp] → {pkt}");
        if let Err(e) = udp.send_to(&pkt.encode(), pkt.peer()).await {
            log::warn!("[udp] send to {} failed: {e}", pkt.peer());
        }
    }
    log::debug!("[udp] send loop stopped");
}
