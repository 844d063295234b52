//! Generation-tagged identifiers for live module instances
//!
//! The module hands back an untyped address; the host side never trusts it on
//! its own. Every live address gets a slot in a per-module-type slab, and the
//! adapter holds a `HandleId` (slot index + generation). Releasing a slot bumps
//! its generation, so a second release of the same id is reported as stale
//! instead of reaching the module's free entry point.

use crate::module::{ModuleError, ModuleResult};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl HandleId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    address: Option<usize>,
}

/// Slab of live instance addresses for one module type
#[derive(Debug, Default)]
pub struct HandleSlab {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    live: usize,
}

impl HandleSlab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly allocated address
    ///
    /// A module returning an address that is still live is a module bug and is
    /// refused, since two adapters would otherwise share one instance.
    pub fn acquire(&mut self, address: usize) -> ModuleResult<HandleId> {
        if self.slots.iter().any(|slot| slot.address == Some(address)) {
            return Err(ModuleError::DuplicateHandle(address));
        }

        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.address = Some(address);
        self.live += 1;

        Ok(HandleId {
            index,
            generation: slot.generation,
        })
    }

    /// Address behind a live id
    pub fn resolve(&self, id: HandleId) -> ModuleResult<usize> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.address)
            .ok_or(ModuleError::StaleHandle(id))
    }

    /// Retire an id, returning the address to hand to the module's free
    pub fn release(&mut self, id: HandleId) -> ModuleResult<usize> {
        let address = self.resolve(id)?;
        let slot = &mut self.slots[id.index as usize];
        slot.address = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(id.index);
        self.live -= 1;
        Ok(address)
    }

    pub fn is_live(&self, id: HandleId) -> bool {
        self.resolve(id).is_ok()
    }

    /// Number of instances currently allocated
    pub fn live_count(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let mut slab = HandleSlab::new();
        let id = slab.acquire(0x1000).unwrap();

        assert_eq!(slab.resolve(id).unwrap(), 0x1000);
        assert_eq!(slab.live_count(), 1);

        assert_eq!(slab.release(id).unwrap(), 0x1000);
        assert_eq!(slab.live_count(), 0);
    }

    #[test]
    fn test_double_release_is_stale() {
        let mut slab = HandleSlab::new();
        let id = slab.acquire(0x1000).unwrap();
        slab.release(id).unwrap();

        assert!(matches!(slab.release(id), Err(ModuleError::StaleHandle(_))));
    }

    #[test]
    fn test_reused_slot_gets_new_generation() {
        let mut slab = HandleSlab::new();
        let first = slab.acquire(0x1000).unwrap();
        slab.release(first).unwrap();

        // Same slot, and the allocator may well hand back the same address
        let second = slab.acquire(0x1000).unwrap();
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());

        assert!(!slab.is_live(first));
        assert!(slab.is_live(second));
    }

    #[test]
    fn test_duplicate_live_address_refused() {
        let mut slab = HandleSlab::new();
        slab.acquire(0x2000).unwrap();
        assert!(matches!(
            slab.acquire(0x2000),
            Err(ModuleError::DuplicateHandle(0x2000))
        ));
        assert_eq!(slab.live_count(), 1);
    }
}
