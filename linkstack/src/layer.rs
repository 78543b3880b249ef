//! Bidirectional protocol layers.
//!
//! A [`Layer`] sits between a lower socket (closer to the network) and an
//! upper one (closer to the application).  It sees every item travelling in
//! either direction and reacts by emitting items upward, downward, or both,
//! into an [`Effects`] buffer:
//!
//! ```text
//!           application
//!     handle_down ▼   ▲ push_up
//!            ┌─────────────┐
//!            │    Layer    │ ◀── on_tick (timers)
//!            └─────────────┘
//!     push_down  ▼   ▲ handle_up
//!             network
//! ```
//!
//! Handlers are synchronous and never block.  Anything time-driven goes
//! through [`Layer::on_tick`], which the owning event loop calls
//! periodically; the current time is always read from [`Effects::now`] so
//! layers can be driven with a synthetic clock in tests.

use std::collections::VecDeque;
use std::time::Instant;

use thiserror::Error;

/// Errors a layer handler may report.
///
/// A handler error never tears down a stack: the grouping layer confines it
/// to one key, and the socket event loop logs and drops it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayerError {
    /// A downward item carried a sequence number that cannot be sent as data.
    #[error("sequence number {0} cannot be sent as data")]
    InvalidSequence(i64),
    #[error("{0}")]
    Other(String),
}

/// Output buffer handed to every layer handler.
#[derive(Debug)]
pub struct Effects<T> {
    now: Instant,
    up: VecDeque<T>,
    down: VecDeque<T>,
}

impl<T> Effects<T> {
    /// An empty buffer for an event occurring at `now`.
    pub fn at(now: Instant) -> Self {
        Self {
            now,
            up: VecDeque::new(),
            down: VecDeque::new(),
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Emit `item` toward the application.
    pub fn push_up(&mut self, item: T) {
        self.up.push_back(item);
    }

    /// Emit `item` toward the network.
    pub fn push_down(&mut self, item: T) {
        self.down.push_back(item);
    }

    pub fn is_empty(&self) -> bool {
        self.up.is_empty() && self.down.is_empty()
    }

    pub fn take_up(&mut self) -> impl Iterator<Item = T> + '_ {
        self.up.drain(..)
    }

    pub fn take_down(&mut self) -> impl Iterator<Item = T> + '_ {
        self.down.drain(..)
    }

    fn pop_up(&mut self) -> Option<T> {
        self.up.pop_front()
    }

    fn pop_down(&mut self) -> Option<T> {
        self.down.pop_front()
    }
}

/// A bidirectional stream transformer.
pub trait Layer<T> {
    /// An item coming from above, on its way to the network.
    fn handle_down(&mut self, item: T, fx: &mut Effects<T>) -> Result<(), LayerError>;

    /// An item coming from below, on its way to the application.
    fn handle_up(&mut self, item: T, fx: &mut Effects<T>) -> Result<(), LayerError>;

    /// Periodic timer hook.  Stateless layers keep the default.
    fn on_tick(&mut self, _fx: &mut Effects<T>) -> Result<(), LayerError> {
        Ok(())
    }
}

impl<T, L: Layer<T> + ?Sized> Layer<T> for Box<L> {
    fn handle_down(&mut self, item: T, fx: &mut Effects<T>) -> Result<(), LayerError> {
        (**self).handle_down(item, fx)
    }

    fn handle_up(&mut self, item: T, fx: &mut Effects<T>) -> Result<(), LayerError> {
        (**self).handle_up(item, fx)
    }

    fn on_tick(&mut self, fx: &mut Effects<T>) -> Result<(), LayerError> {
        (**self).on_tick(fx)
    }
}

// ---------------------------------------------------------------------------
// Stacked: synchronous composition
// ---------------------------------------------------------------------------

/// Two layers composed into one: `upper` runs on top of `lower`.
///
/// Items `upper` sends down are fed to `lower`; items `lower` sends up are fed
/// to `upper`.  Hand-offs are settled FIFO until neither side has anything
/// left for the other, so no item is reordered within a direction.
#[derive(Debug)]
pub struct Stacked<Lower, Upper> {
    lower: Lower,
    upper: Upper,
}

impl<Lower, Upper> Stacked<Lower, Upper> {
    pub fn new(lower: Lower, upper: Upper) -> Self {
        Self { lower, upper }
    }

    pub fn lower(&self) -> &Lower {
        &self.lower
    }
}

impl<Lower, Upper> Stacked<Lower, Upper> {
    /// Run hand-offs between the two layers to quiescence, then move what
    /// leaves the composite into `out`.
    ///
    /// The first handler error is returned after everything else settled.
    fn settle<T>(
        &mut self,
        mut from_upper: Effects<T>,
        mut from_lower: Effects<T>,
        mut first_err: Option<LayerError>,
        out: &mut Effects<T>,
    ) -> Result<(), LayerError>
    where
        Lower: Layer<T>,
        Upper: Layer<T>,
    {
        loop {
            if let Some(item) = from_upper.pop_down() {
                if let Err(e) = self.lower.handle_down(item, &mut from_lower) {
                    first_err.get_or_insert(e);
                }
            } else if let Some(item) = from_lower.pop_up() {
                if let Err(e) = self.upper.handle_up(item, &mut from_upper) {
                    first_err.get_or_insert(e);
                }
            } else {
                break;
            }
        }
        out.up.extend(from_upper.take_up());
        out.down.extend(from_lower.take_down());
        first_err.map_or(Ok(()), Err)
    }
}

impl<T, Lower: Layer<T>, Upper: Layer<T>> Layer<T> for Stacked<Lower, Upper> {
    fn handle_down(&mut self, item: T, fx: &mut Effects<T>) -> Result<(), LayerError> {
        let mut from_upper = Effects::at(fx.now());
        let err = self.upper.handle_down(item, &mut from_upper).err();
        self.settle(from_upper, Effects::at(fx.now()), err, fx)
    }

    fn handle_up(&mut self, item: T, fx: &mut Effects<T>) -> Result<(), LayerError> {
        let mut from_lower = Effects::at(fx.now());
        let err = self.lower.handle_up(item, &mut from_lower).err();
        self.settle(Effects::at(fx.now()), from_lower, err, fx)
    }

    fn on_tick(&mut self, fx: &mut Effects<T>) -> Result<(), LayerError> {
        let mut from_lower = Effects::at(fx.now());
        let mut from_upper = Effects::at(fx.now());
        let err = self.lower.on_tick(&mut from_lower).err();
        let err = err.or(self.upper.on_tick(&mut from_upper).err());
        self.settle(from_upper, from_lower, err, fx)
    }
}

// ---------------------------------------------------------------------------
// Stateless layers from closures
// ---------------------------------------------------------------------------

/// A stateless layer built from two item transforms.  Returning `None`
/// drops the item.
pub struct MapLayer<D, U> {
    down: D,
    up: U,
}

/// Build a [`MapLayer`] from a downward and an upward transform.
pub fn map<T, D, U>(down: D, up: U) -> MapLayer<D, U>
where
    D: FnMut(T) -> Option<T>,
    U: FnMut(T) -> Option<T>,
{
    MapLayer { down, up }
}

impl<T, D, U> Layer<T> for MapLayer<D, U>
where
    D: FnMut(T) -> Option<T>,
    U: FnMut(T) -> Option<T>,
{
    fn handle_down(&mut self, item: T, fx: &mut Effects<T>) -> Result<(), LayerError> {
        if let Some(item) = (self.down)(item) {
            fx.push_down(item);
        }
        Ok(())
    }

    fn handle_up(&mut self, item: T, fx: &mut Effects<T>) -> Result<(), LayerError> {
        if let Some(item) = (self.up)(item) {
            fx.push_up(item);
        }
        Ok(())
    }
}
