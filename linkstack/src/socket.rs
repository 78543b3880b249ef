//! Sockets and the stacking combinator.
//!
//! A [`Socket`] is the application-facing end of a bidirectional item
//! stream: [`Socket::recv`] yields items coming **up** from the network,
//! [`Socket::send`] pushes items **down** toward it.  The opposite end is a
//! [`Wire`], held by whatever produces the socket (a transport, the
//! simulator, or the event loop of a stacked layer).
//!
//! [`Socket::stack`] interposes a [`Layer`]:
//!
//! ```text
//!   new Socket  ── send ──▶ ┌────────────────────┐ ── down ──▶ wrapped Socket
//!               ◀─ recv ─── │ event loop (task)  │ ◀── up ────
//!                           │  owns the Layer    │
//!                           │  ticks on interval │
//!                           └────────────────────┘
//! ```
//!
//! Each stacked layer is owned by exactly one tokio task, which is the single
//! serialization point for everything that touches its state: downward
//! items, upward items and timer ticks.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::layer::{Effects, Layer};

/// How often a stacked layer's [`Layer::on_tick`] runs unless overridden.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SocketError {
    /// The stack below this socket has shut down.
    #[error("socket closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Socket / Wire
// ---------------------------------------------------------------------------

/// The user end of a bidirectional item stream.
#[derive(Debug)]
pub struct Socket<T> {
    up: mpsc::UnboundedReceiver<T>,
    down: mpsc::UnboundedSender<T>,
}

/// The producer end of a [`Socket`].
#[derive(Debug)]
pub struct Wire<T> {
    /// Items pushed here come out of [`Socket::recv`].
    pub up: mpsc::UnboundedSender<T>,
    /// Items passed to [`Socket::send`] come out here.
    pub down: mpsc::UnboundedReceiver<T>,
}

impl<T> Socket<T> {
    /// A connected socket / wire pair.
    pub fn pair() -> (Socket<T>, Wire<T>) {
        let (up_tx, up_rx) = mpsc::unbounded_channel();
        let (down_tx, down_rx) = mpsc::unbounded_channel();
        (
            Socket {
                up: up_rx,
                down: down_tx,
            },
            Wire {
                up: up_tx,
                down: down_rx,
            },
        )
    }

    /// Push an item down the stack.
    pub fn send(&self, item: T) -> Result<(), SocketError> {
        self.down.send(item).map_err(|_| SocketError::Closed)
    }

    /// Wait for the next item coming up the stack.
    ///
    /// Returns `None` once the stack below has shut down and every buffered
    /// item was consumed.
    pub async fn recv(&mut self) -> Option<T> {
        self.up.recv().await
    }

    /// Take an already buffered item without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.up.try_recv().ok()
    }
}

impl<T: Send + 'static> Socket<T> {
    /// Stack `layer` on this socket with the [`DEFAULT_TICK`].
    pub fn stack<L>(self, layer: L) -> Socket<T>
    where
        L: Layer<T> + Send + 'static,
    {
        self.stack_with(layer, DEFAULT_TICK)
    }

    /// Stack `layer` on this socket, ticking it every `tick`.
    ///
    /// Spawns the layer's event loop onto the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn stack_with<L>(self, layer: L, tick: Duration) -> Socket<T>
    where
        L: Layer<T> + Send + 'static,
    {
        let (socket, wire) = Socket::pair();
        tokio::spawn(event_loop(layer, self, wire, tick));
        socket
    }
}

/// `stack(socket, layer)`: the free-function spelling of [`Socket::stack`].
pub fn stack<T, L>(socket: Socket<T>, layer: L) -> Socket<T>
where
    T: Send + 'static,
    L: Layer<T> + Send + 'static,
{
    socket.stack(layer)
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

enum Event<T> {
    Down(T),
    Up(T),
    Tick,
}

/// Drive `layer` between `lower` and the wire of the socket stacked on it.
///
/// Ends when the lower socket's upward stream ends, or when the upper socket
/// has been dropped entirely.  Dropping `lower` on exit cascades the shutdown
/// to the layers beneath.
async fn event_loop<T, L>(mut layer: L, mut lower: Socket<T>, upper: Wire<T>, tick: Duration)
where
    L: Layer<T>,
{
    let Wire {
        up: to_upper,
        down: mut from_upper,
    } = upper;
    let mut upper_sending = true;

    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let event = tokio::select! {
            // ── Branch 1: item from the socket above ────────────────────
            maybe = from_upper.recv(), if upper_sending => match maybe {
                Some(item) => Event::Down(item),
                None => {
                    upper_sending = false;
                    log::trace!("[stack] upper send side closed");
                    continue;
                }
            },

            // ── Branch 2: item from the socket below ────────────────────
            maybe = lower.recv() => match maybe {
                Some(item) => Event::Up(item),
                None => {
                    log::debug!("[stack] lower socket closed; stopping");
                    break;
                }
            },

            // ── Branch 3: timer ─────────────────────────────────────────
            _ = ticker.tick() => Event::Tick,
        };

        // Stamp after the wait so the layer sees when the event happened.
        let mut fx = Effects::at(now());
        let result = match event {
            Event::Down(item) => layer.handle_down(item, &mut fx),
            Event::Up(item) => layer.handle_up(item, &mut fx),
            Event::Tick => layer.on_tick(&mut fx),
        };

        if let Err(e) = result {
            log::error!("[stack] layer error, event dropped: {e}");
        }

        for item in fx.take_down() {
            if lower.send(item).is_err() {
                log::debug!("[stack] lower socket gone; stopping");
                return;
            }
        }
        for item in fx.take_up() {
            // A closed upper receiver only means nobody listens any more.
            let _ = to_upper.send(item);
        }

        if !upper_sending && to_upper.is_closed() {
            log::debug!("[stack] upper socket dropped; stopping");
            break;
        }
    }
}

/// Current time on the tokio clock, so paused-clock tests see virtual time.
#[inline]
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
