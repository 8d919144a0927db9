//! Registry of highlightable objects and the "currently rendering" marker.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bevy::prelude::Resource;

/// Something that can be drawn into the isolated highlight buffer.
pub trait Highlightable {
    /// Prepare for the highlight pass of the driver currently marked in `active`.
    ///
    /// Returns whether the object will actually be drawn this frame.
    fn enter_highlight_state(&mut self, active: &ActiveDriver) -> bool;

    /// Return to normal drawing once the highlight pass is over.
    fn exit_highlight_state(&mut self);
}

/// Ordered set of registered highlightables.
///
/// Entries are compared by identity (`PartialEq`) and kept in registration order.
#[derive(Resource, Debug, Clone)]
pub struct HighlightRegistry<H> {
    entries: Vec<H>,
}

impl<H> Default for HighlightRegistry<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H: PartialEq> HighlightRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry`. Registering something that is already present does nothing.
    pub fn register(&mut self, entry: H) {
        if !self.contains(&entry) {
            self.entries.push(entry);
        }
    }

    /// Remove `entry`, returning whether it was present.
    pub fn unregister(&mut self, entry: &H) -> bool {
        match self.entries.iter().position(|e| e == entry) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, entry: &H) -> bool {
        self.entries.iter().any(|e| e == entry)
    }
}

impl<H> HighlightRegistry<H> {
    pub fn iter(&self) -> impl Iterator<Item = &H> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut H> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<H: PartialEq> FromIterator<H> for HighlightRegistry<H> {
    fn from_iter<I: IntoIterator<Item = H>>(iter: I) -> Self {
        let mut registry = Self::new();
        for entry in iter {
            registry.register(entry);
        }
        registry
    }
}

/// Identifier of one highlighting driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DriverId(NonZeroU32);

impl DriverId {
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// Shared marker naming the driver that is drawing highlights right now.
///
/// Clones share the same cell. Drivers that should coordinate are handed clones of one
/// marker when they are built.
#[derive(Clone, Debug, Default)]
pub struct ActiveDriver {
    current: Arc<AtomicU32>,
    next_id: Arc<AtomicU32>,
}

impl ActiveDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a fresh driver id, unique among clones of this marker.
    pub fn allocate(&self) -> DriverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        DriverId(NonZeroU32::new(id).unwrap_or(NonZeroU32::MIN))
    }

    pub fn current(&self) -> Option<DriverId> {
        NonZeroU32::new(self.current.load(Ordering::Acquire)).map(DriverId)
    }

    /// Mark `id` as rendering, returning the driver it displaced, if any.
    pub(crate) fn claim(&self, id: DriverId) -> Option<DriverId> {
        NonZeroU32::new(self.current.swap(id.get(), Ordering::AcqRel)).map(DriverId)
    }

    pub(crate) fn release(&self, id: DriverId) {
        let _ = self
            .current
            .compare_exchange(id.get(), 0, Ordering::AcqRel, Ordering::Acquire);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_registration_order() {
        let mut registry = HighlightRegistry::new();
        registry.register(3);
        registry.register(1);
        registry.register(2);
        assert_eq!(registry.iter().copied().collect::<Vec<_>>(), vec![3, 1, 2]);
    }

    #[test]
    fn register_twice_keeps_one_entry() {
        let mut registry = HighlightRegistry::new();
        registry.register("a");
        registry.register("a");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_absent_is_a_no_op() {
        let mut registry = HighlightRegistry::new();
        registry.register(1);
        assert!(!registry.unregister(&7));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(&1));
        assert!(!registry.unregister(&1));
        assert!(registry.is_empty());
    }

    #[test]
    fn replay_matches_live_set() {
        // (id, register?) pairs
        let ops = [
            (1, true),
            (2, true),
            (3, true),
            (2, false),
            (4, true),
            (2, true),
            (9, false),
            (1, false),
            (3, false),
            (3, true),
        ];

        let mut registry = HighlightRegistry::new();
        let mut expected: Vec<i32> = Vec::new();
        for (id, register) in ops {
            if register {
                registry.register(id);
                if !expected.contains(&id) {
                    expected.push(id);
                }
            } else {
                registry.unregister(&id);
                expected.retain(|e| *e != id);
            }
        }

        assert_eq!(registry.iter().copied().collect::<Vec<_>>(), expected);
        assert_eq!(expected, vec![4, 2, 3]);
    }

    #[test]
    fn active_marker_is_shared_between_clones() {
        let marker = ActiveDriver::new();
        let other = marker.clone();
        let a = marker.allocate();
        let b = other.allocate();
        assert_ne!(a, b);

        assert_eq!(marker.claim(a), None);
        assert_eq!(other.current(), Some(a));
        assert_ne!(other.current(), Some(b));

        // Releasing with the wrong id leaves the marker alone.
        other.release(b);
        assert_eq!(marker.current(), Some(a));

        marker.release(a);
        assert_eq!(other.current(), None);
    }
}
