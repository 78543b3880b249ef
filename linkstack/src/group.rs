//! Per-key demultiplexing of one stream into independent layer instances.
//!
//! [`Grouped`] runs one instance of an inner layer per key (typically per
//! peer).  Every item is mapped to a key by a key function; the first item
//! seen for a key, in either direction, creates that key's instance, and from
//! then on every item for the key goes through that instance only.  Outputs
//! of all instances are merged into the grouped layer's own output.
//!
//! ```text
//!                 ┌──────────── Grouped ─────────────┐
//!   item ──key──▶ │  key A ──▶ [ inner instance A ]  │ ──▶ merged output
//!                 │  key B ──▶ [ inner instance B ]  │
//!                 │  key C ──▶ [ inner instance C ]  │
//!                 └──────────────────────────────────┘
//! ```
//!
//! Instances live in a map owned by the grouped layer and are never shared.
//! An instance whose handler fails is marked failed: the error is logged once,
//! the instance is discarded, and later traffic for its key is dropped.
//! Other keys are unaffected.

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::layer::{Effects, Layer, LayerError};

enum Slot<L> {
    Live(L),
    Failed(LayerError),
}

/// A layer running one independent `L` per key `K`.
pub struct Grouped<T, K, L> {
    key_of: Box<dyn Fn(&T) -> Option<K> + Send>,
    make: Box<dyn FnMut(&K) -> L + Send>,
    instances: BTreeMap<K, Slot<L>>,
}

/// `group(key_fn, factory)`: build a [`Grouped`] layer.
///
/// `key_fn` returning `None` marks an item as unaddressable; such items are
/// logged and dropped.
pub fn group<T, K, L, KF, MF>(key_fn: KF, factory: MF) -> Grouped<T, K, L>
where
    K: Ord + Clone + Debug,
    L: Layer<T>,
    KF: Fn(&T) -> Option<K> + Send + 'static,
    MF: FnMut(&K) -> L + Send + 'static,
{
    Grouped {
        key_of: Box::new(key_fn),
        make: Box::new(factory),
        instances: BTreeMap::new(),
    }
}

impl<T, K, L> Grouped<T, K, L>
where
    K: Ord + Clone + Debug,
    L: Layer<T>,
{
    /// The live instance for `key`, if one was created and has not failed.
    pub fn instance(&self, key: &K) -> Option<&L> {
        match self.instances.get(key) {
            Some(Slot::Live(inner)) => Some(inner),
            _ => None,
        }
    }

    /// Whether the instance for `key` failed.
    pub fn has_failed(&self, key: &K) -> bool {
        matches!(self.instances.get(key), Some(Slot::Failed(_)))
    }

    /// Every key an instance was created for, failed ones included.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.instances.keys()
    }

    fn dispatch(
        &mut self,
        item: T,
        fx: &mut Effects<T>,
        direction: &str,
        run: impl FnOnce(&mut L, T, &mut Effects<T>) -> Result<(), LayerError>,
    ) -> Result<(), LayerError> {
        let Some(key) = (self.key_of)(&item) else {
            log::warn!("[group] unaddressable item going {direction}; dropped");
            return Ok(());
        };

        let make = &mut self.make;
        let slot = self.instances.entry(key.clone()).or_insert_with_key(|k| {
            log::debug!("[group] new instance for {k:?}");
            Slot::Live(make(k))
        });

        match slot {
            Slot::Live(inner) => {
                if let Err(e) = run(inner, item, fx) {
                    log::error!("[group] instance for {key:?} failed: {e}");
                    *slot = Slot::Failed(e);
                }
            }
            Slot::Failed(e) => {
                log::trace!("[group] dropping item for failed {key:?} ({e})");
            }
        }
        Ok(())
    }
}

impl<T, K, L> Layer<T> for Grouped<T, K, L>
where
    K: Ord + Clone + Debug,
    L: Layer<T>,
{
    fn handle_down(&mut self, item: T, fx: &mut Effects<T>) -> Result<(), LayerError> {
        self.dispatch(item, fx, "down", |inner, item, fx| inner.handle_down(item, fx))
    }

    fn handle_up(&mut self, item: T, fx: &mut Effects<T>) -> Result<(), LayerError> {
        self.dispatch(item, fx, "up", |inner, item, fx| inner.handle_up(item, fx))
    }

    fn on_tick(&mut self, fx: &mut Effects<T>) -> Result<(), LayerError> {
        for (key, slot) in self.instances.iter_mut() {
            if let Slot::Live(inner) = slot {
                if let Err(e) = inner.on_tick(fx) {
                    log::error!("[group] instance for {key:?} failed on tick: {e}");
                    *slot = Slot::Failed(e);
                }
            }
        }
        Ok(())
    }
}
