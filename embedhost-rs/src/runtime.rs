//! The guest-runtime seam.
//!
//! Everything the host needs from an embedded interpreter is expressed by
//! the traits in this module.  The host-side bookkeeping (session, module
//! registry, script cache, output capture, attribute bridge) is written once
//! against them; the backends live in [`crate::lua`] and [`crate::python`].
//!
//! | Trait              | Role                                            |
//! |--------------------|-------------------------------------------------|
//! | [`Runtime`]        | one interpreter: boot, compile, eval, streams   |
//! | [`GuestObject`]    | an opaque script-side value handle              |
//! | [`GuestNamespace`] | the key→value scope handed to the evaluator     |
//! | [`HostCalls`]      | services a native function may call back into   |

use std::fmt;

use crate::error::HostResult;
use crate::module::ModuleDef;

// ── HostValue ─────────────────────────────────────────────────────────────────

/// A plain value crossing the host/guest boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for HostValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

// ── Stream ────────────────────────────────────────────────────────────────────

/// One of the guest's two standard output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    /// Both streams, stdout first.
    pub const ALL: [Stream; 2] = [Stream::Stdout, Stream::Stderr];

    /// Name of the slot the guest keeps the stream in (`stdout` / `stderr`).
    pub fn slot(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slot())
    }
}

// ── Traits ────────────────────────────────────────────────────────────────────

/// An opaque handle to a script-side object.
///
/// Handles are owned: dropping one releases the host's reference.  Every
/// operation reports failure as `None`/`Err` and never panics on a type
/// mismatch.
pub trait GuestObject: Clone + 'static {
    /// Look up attribute (or field) `name`.
    fn get_attr(&self, name: &str) -> Option<Self>;

    /// Set attribute `name`; `false` when the object refuses it.
    fn set_attr(&self, name: &str, value: HostValue) -> bool;

    fn has_attr(&self, name: &str) -> bool {
        self.get_attr(name).is_some()
    }

    /// Invoke method `name` with `args`; `Ok(None)` when it returns nothing.
    fn call_method(&self, name: &str, args: &[HostValue]) -> HostResult<Option<Self>>;

    /// The value as an integer, only if it *is* an integer.
    fn as_long(&self) -> Option<i64>;

    /// The value as a float, only if it *is* a float.
    fn as_double(&self) -> Option<f64>;

    /// The value as text, only if it *is* a string.
    fn as_text(&self) -> Option<String>;

    fn is_none(&self) -> bool;

    /// Guest-side type name, for diagnostics.
    fn type_name(&self) -> String;
}

/// The key→value mapping used as both global and local scope.
pub trait GuestNamespace {
    type Object: GuestObject;

    /// Insert `value` under `key`, overwriting any previous entry.
    fn set(&self, key: &str, value: HostValue) -> HostResult<()>;

    fn get(&self, key: &str) -> Option<Self::Object>;

    /// Drop every entry (including the seeded ones).
    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Services available to a native function while it runs.
pub trait HostCalls {
    /// Write `text` to the guest's currently installed `stream` object.
    fn write(&self, stream: Stream, text: &str) -> HostResult<()>;

    /// Append `dir` to the guest's module search path.
    ///
    /// Returns `false` when `dir` was already present.
    fn append_search_path(&self, dir: &str) -> HostResult<bool>;
}

/// One embedded interpreter.
///
/// Compile and eval failures are printed on the runtime's *currently
/// installed* stderr stream before the error is returned, so diagnostics
/// land in the capture buffer like any other script output.
pub trait Runtime: HostCalls + Sized {
    type Object: GuestObject;
    type Namespace: GuestNamespace<Object = Self::Object>;
    type Code;
    type Module;

    /// Short backend name (`lua`, `python`).
    const NAME: &'static str;

    /// Bring the interpreter up under `program_name`.
    fn boot(program_name: &str) -> HostResult<Self>;

    /// Interpreter version string, e.g. `Lua 5.4`.
    fn version(&self) -> String;

    /// Expose the process argument vector to scripts.
    fn set_argv(&self, argv: &[String]) -> HostResult<()>;

    /// Enable the guest's own thread support.  `false` if it has none.
    fn enable_threads(&self) -> bool;

    /// Check the optional site-configuration component.
    fn probe_site(&self) -> bool;

    /// Check the core system component.
    fn probe_sys(&self) -> bool;

    /// A fresh namespace seeded with `__builtins__` and `__name__`.
    fn new_namespace(&self) -> HostResult<Self::Namespace>;

    /// Compile `source`; `origin` labels diagnostics (may be empty).
    fn compile(&self, source: &str, origin: &str) -> HostResult<Self::Code>;

    /// Evaluate `code` with `namespace` as global and local scope.
    fn eval(&self, code: &Self::Code, namespace: &Self::Namespace)
        -> HostResult<Option<Self::Object>>;

    /// Discard any stale pending-error state.
    fn clear_error(&self) {}

    /// Make `def` resolvable by name from scripts.
    fn create_module(&self, def: &ModuleDef<Self::Object>) -> HostResult<Self::Module>;

    /// Make a module unresolvable again and drop the runtime's handle.
    fn release_module(&self, name: &str, module: Self::Module);

    /// A fresh in-memory text sink (write / truncate / getvalue).
    fn new_sink(&self) -> HostResult<Self::Object>;

    /// The object currently installed in `stream`'s slot.
    fn stream(&self, stream: Stream) -> Option<Self::Object>;

    /// Install `object` in `stream`'s slot.
    fn install_stream(&self, stream: Stream, object: &Self::Object) -> HostResult<()>;

    /// Shut the interpreter down.  Memory is reclaimed when the runtime is
    /// dropped; no other call is made after this.
    fn finalize(&mut self);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
