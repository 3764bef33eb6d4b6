//! Execution namespaces.
//!
//! A [`Namespace`] is the mapping a script runs in, used as both its global
//! and local scope.  It is always seeded with the runtime's builtins under
//! `__builtins__` and with `__name__ = "__main__"`; each execution also
//! stamps `__file__`.
//!
//! Dropping (or [`Namespace::release`]-ing) a namespace clears every entry
//! before the mapping itself goes away, which breaks reference cycles a
//! script may have built through its globals.

use crate::error::HostResult;
use crate::runtime::{GuestNamespace, HostValue, Runtime};

/// Key holding the runtime's builtins.
pub const BUILTINS_KEY: &str = "__builtins__";
/// Key holding the module name; always `"__main__"` for host-run scripts.
pub const NAME_KEY: &str = "__name__";
/// Key holding the running script's file name (`""` for buffers).
pub const FILE_KEY: &str = "__file__";

/// An owned execution namespace.
pub struct Namespace<N: GuestNamespace> {
    inner: N,
}

impl<N: GuestNamespace> Namespace<N> {
    /// A fresh namespace from `rt`, seeded with builtins and `__name__`.
    pub fn create<R>(rt: &R) -> HostResult<Self>
    where
        R: Runtime<Namespace = N>,
    {
        let inner = rt.new_namespace()?;
        inner.set(NAME_KEY, HostValue::Str("__main__".into()))?;
        Ok(Self { inner })
    }

    /// Overwrite `__file__` with `name`.
    pub fn set_file_marker(&self, name: &str) -> HostResult<()> {
        self.inner.set(FILE_KEY, HostValue::Str(name.to_owned()))
    }

    pub fn set(&self, key: &str, value: impl Into<HostValue>) -> HostResult<()> {
        self.inner.set(key, value.into())
    }

    pub fn get(&self, key: &str) -> Option<N::Object> {
        self.inner.get(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The backend mapping.
    pub fn raw(&self) -> &N {
        &self.inner
    }

    /// Clear and drop the namespace now.
    pub fn release(self) {}
}

impl<N: GuestNamespace> Drop for Namespace<N> {
    fn drop(&mut self) {
        self.inner.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(all(test, feature = "lua"))]
mod tests {
    use super::*;
    use crate::lua::LuaRuntime;
    use crate::runtime::GuestObject;

    #[test]
    fn create_seeds_builtins_and_name() {
        let rt = LuaRuntime::boot("ns-test").unwrap();
        let ns = Namespace::create(&rt).unwrap();
        assert!(ns.get(BUILTINS_KEY).is_some());
        assert_eq!(ns.get(NAME_KEY).and_then(|v| v.as_text()).as_deref(), Some("__main__"));
        assert!(ns.get(FILE_KEY).is_none());
    }

    #[test]
    fn file_marker_overwrites() {
        let rt = LuaRuntime::boot("ns-test").unwrap();
        let ns = Namespace::create(&rt).unwrap();
        ns.set_file_marker("a.lua").unwrap();
        ns.set_file_marker("b.lua").unwrap();
        assert_eq!(ns.get(FILE_KEY).and_then(|v| v.as_text()).as_deref(), Some("b.lua"));
    }

    #[test]
    fn release_clears_entries() {
        let rt = LuaRuntime::boot("ns-test").unwrap();
        let ns = Namespace::create(&rt).unwrap();
        ns.set("x", 5i64).unwrap();
        let raw = ns.raw().clone();
        assert!(raw.len() >= 3);
        ns.release();
        assert_eq!(raw.len(), 0);
    }
}
