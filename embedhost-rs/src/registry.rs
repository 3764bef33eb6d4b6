//! Live native-module bookkeeping.
//!
//! [`ModuleRegistry`] tracks every module currently exposed to scripts,
//! keyed by a [`ModuleId`] handed out at registration.  Membership is by
//! identity, order is not preserved: removal moves the last entry into the
//! freed slot.  Storage grows by exactly one slot per registration and is
//! shrunk again on removal; this is setup/teardown work, never a hot path.

use std::fmt;

/// Identity of a registered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl ModuleId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The set of live modules.
#[derive(Debug)]
pub struct ModuleRegistry<M> {
    entries: Vec<(ModuleId, M)>,
    next_id: u64,
}

impl<M> Default for ModuleRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> ModuleRegistry<M> {
    pub fn new() -> Self {
        Self { entries: Vec::new(), next_id: 1 }
    }

    /// Add `module` to the live set and return its handle.
    pub fn register(&mut self, module: M) -> ModuleId {
        let id = ModuleId(self.next_id);
        self.next_id += 1;
        self.entries.reserve_exact(1);
        self.entries.push((id, module));
        id
    }

    /// Remove `id` from the live set.
    ///
    /// Unknown (or already removed) handles are ignored.
    pub fn unregister(&mut self, id: ModuleId) -> Option<M> {
        let pos = self.entries.iter().position(|(e, _)| *e == id)?;
        let (_, module) = self.entries.swap_remove(pos);
        self.entries.shrink_to_fit();
        Some(module)
    }

    /// Remove every module, handing each to `free` in turn.
    ///
    /// The live set is moved onto a worklist first, so `free` never observes
    /// a half-drained registry.  Calling this on an empty registry is a
    /// no-op.
    pub fn drain_with(&mut self, mut free: impl FnMut(ModuleId, M)) {
        let mut worklist = std::mem::take(&mut self.entries);
        while let Some((id, module)) = worklist.pop() {
            free(id, module);
        }
    }

    pub fn get(&self, id: ModuleId) -> Option<&M> {
        self.entries.iter().find(|(e, _)| *e == id).map(|(_, m)| m)
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        self.get(id).is_some()
    }

    /// Iterate over live modules (unspecified order).
    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &M)> {
        self.entries.iter().map(|(id, m)| (*id, m))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Allocated slots (tracks `len` after every removal).
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn names(reg: &ModuleRegistry<&'static str>) -> Vec<&'static str> {
        let mut v: Vec<_> = reg.iter().map(|(_, m)| *m).collect();
        v.sort_unstable();
        v
    }

    #[test]
    fn unregister_middle_keeps_others() {
        let mut reg = ModuleRegistry::new();
        let a = reg.register("A");
        let b = reg.register("B");
        let c = reg.register("C");
        assert_eq!(reg.unregister(b), Some("B"));
        assert_eq!(names(&reg), ["A", "C"]);
        assert!(reg.contains(a));
        assert!(reg.contains(c));
        assert!(!reg.contains(b));
    }

    #[test]
    fn double_unregister_is_noop() {
        let mut reg = ModuleRegistry::new();
        let a = reg.register("A");
        let b = reg.register("B");
        assert!(reg.unregister(a).is_some());
        assert!(reg.unregister(a).is_none());
        assert_eq!(names(&reg), ["B"]);
        assert_eq!(reg.get(b), Some(&"B"));
    }

    #[test]
    fn ids_are_never_reused() {
        let mut reg = ModuleRegistry::new();
        let a = reg.register("A");
        reg.unregister(a);
        let b = reg.register("B");
        assert_ne!(a, b);
        assert!(!reg.contains(a));
    }

    #[test]
    fn drain_empties_and_is_repeatable() {
        let mut reg = ModuleRegistry::new();
        reg.register("A");
        reg.register("B");
        let mut freed = Vec::new();
        reg.drain_with(|_, m| freed.push(m));
        freed.sort_unstable();
        assert_eq!(freed, ["A", "B"]);
        assert!(reg.is_empty());

        reg.drain_with(|_, _| panic!("nothing left to free"));
        assert!(reg.is_empty());
    }

    #[test]
    fn storage_shrinks_on_removal() {
        let mut reg = ModuleRegistry::new();
        let ids: Vec<_> = (0..4).map(|_| reg.register("m")).collect();
        for id in ids {
            reg.unregister(id);
        }
        assert_eq!(reg.len(), 0);
        assert_eq!(reg.capacity(), 0);
    }

    #[test]
    fn module_id_display() {
        let mut reg = ModuleRegistry::new();
        let id = reg.register(());
        assert_eq!(id.to_string(), "#1");
        assert_eq!(id.get(), 1);
    }
}
