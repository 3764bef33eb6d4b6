//! Native module declarations.
//!
//! A native module is a named, documented table of host-implemented
//! callables plus integer constants.  Build one with [`ModuleDef`] and hand
//! it to [`crate::Session`] (at init, or later via `Session::new_module`):
//!
//! ```rust,ignore
//! let def = ModuleDef::<LuaObject>::new("Test", "My first test module")
//!     .method("greet", CallFlags::O, "Say hello", |call| {
//!         let who = call.arg(0).and_then(|o| o.as_text()).unwrap_or_default();
//!         Ok(HostValue::Str(format!("hello, {who}")))
//!     })
//!     .constant("DEBUG", 1);
//! ```

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::HostResult;
use crate::runtime::{GuestObject, HostCalls, HostValue, Stream};

// ── Calling convention ────────────────────────────────────────────────────────

bitflags! {
    /// How a native function expects to be called.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CallFlags: u32 {
        /// Any number of positional arguments.
        const VARARGS  = 0b0001;
        /// Keyword arguments are forwarded in [`Call::kwargs`].
        const KEYWORDS = 0b0010;
        /// No arguments at all.
        const NOARGS   = 0b0100;
        /// Exactly one positional argument.
        const O        = 0b1000;
    }
}

/// Check a call's shape against `flags` before dispatching.
pub fn check_arity(flags: CallFlags, nargs: usize, nkwargs: usize) -> Result<(), NativeError> {
    if nkwargs > 0 && !flags.contains(CallFlags::KEYWORDS) {
        return Err(NativeError::type_error("takes no keyword arguments"));
    }
    if flags.contains(CallFlags::NOARGS) && nargs != 0 {
        return Err(NativeError::type_error(format!(
            "takes no arguments ({nargs} given)"
        )));
    }
    if flags.contains(CallFlags::O) && nargs != 1 {
        return Err(NativeError::type_error(format!(
            "takes exactly one argument ({nargs} given)"
        )));
    }
    Ok(())
}

// ── NativeError ───────────────────────────────────────────────────────────────

/// Guest-side exception class a native failure is raised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TypeError,
    ValueError,
    RuntimeError,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::RuntimeError => "RuntimeError",
        }
    }
}

/// A typed failure returned by a native function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl NativeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeError, message)
    }

    /// Prefix the message with the callable's qualified name.
    pub fn in_function(mut self, qualname: &str) -> Self {
        self.message = format!("{qualname}() {}", self.message);
        self
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

impl std::error::Error for NativeError {}

impl From<crate::error::HostError> for NativeError {
    fn from(e: crate::error::HostError) -> Self {
        Self::runtime_error(e.to_string())
    }
}

// ── Call ──────────────────────────────────────────────────────────────────────

/// The arguments and host services of one native call.
pub struct Call<'a, O> {
    pub args: Vec<O>,
    pub kwargs: Vec<(String, O)>,
    host: &'a dyn HostCalls,
}

impl<'a, O: GuestObject> Call<'a, O> {
    pub fn new(args: Vec<O>, kwargs: Vec<(String, O)>, host: &'a dyn HostCalls) -> Self {
        Self { args, kwargs, host }
    }

    /// Positional argument `i`, if given.
    pub fn arg(&self, i: usize) -> Option<&O> {
        self.args.get(i)
    }

    /// Keyword argument `name`, if given.
    pub fn kwarg(&self, name: &str) -> Option<&O> {
        self.kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Write `text` to the guest's current `stream` object.
    pub fn write(&self, stream: Stream, text: &str) -> HostResult<()> {
        self.host.write(stream, text)
    }

    pub fn append_search_path(&self, dir: &str) -> HostResult<bool> {
        self.host.append_search_path(dir)
    }
}

// ── Definitions ───────────────────────────────────────────────────────────────

/// A host-implemented callable.
pub type NativeFn<O> =
    Arc<dyn Fn(&Call<'_, O>) -> Result<HostValue, NativeError> + Send + Sync>;

/// One entry of a module's callable table.
pub struct MethodDef<O> {
    pub name: String,
    pub flags: CallFlags,
    pub doc: String,
    pub func: NativeFn<O>,
}

impl<O> Clone for MethodDef<O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            flags: self.flags,
            doc: self.doc.clone(),
            func: Arc::clone(&self.func),
        }
    }
}

impl<O> fmt::Debug for MethodDef<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDef")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("doc", &self.doc)
            .finish_non_exhaustive()
    }
}

impl<O: GuestObject> MethodDef<O> {
    /// Check arity and run the function.
    pub fn invoke(&self, module: &str, call: &Call<'_, O>) -> Result<HostValue, NativeError> {
        let qualname = format!("{module}.{}", self.name);
        check_arity(self.flags, call.args.len(), call.kwargs.len())
            .map_err(|e| e.in_function(&qualname))?;
        (self.func)(call)
    }
}

/// A module declaration: name, description, callables, constants.
pub struct ModuleDef<O> {
    name: String,
    doc: String,
    methods: Vec<MethodDef<O>>,
    constants: Vec<(String, i64)>,
}

impl<O> Clone for ModuleDef<O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            doc: self.doc.clone(),
            methods: self.methods.clone(),
            constants: self.constants.clone(),
        }
    }
}

impl<O> fmt::Debug for ModuleDef<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDef")
            .field("name", &self.name)
            .field("doc", &self.doc)
            .field("methods", &self.methods)
            .field("constants", &self.constants)
            .finish()
    }
}

impl<O: GuestObject> ModuleDef<O> {
    pub fn new(name: impl Into<String>, doc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: doc.into(),
            methods: Vec::new(),
            constants: Vec::new(),
        }
    }

    /// Append a callable to the table.  Table order is preserved.
    pub fn method<F>(
        mut self,
        name: impl Into<String>,
        flags: CallFlags,
        doc: impl Into<String>,
        func: F,
    ) -> Self
    where
        F: Fn(&Call<'_, O>) -> Result<HostValue, NativeError> + Send + Sync + 'static,
    {
        self.methods.push(MethodDef {
            name: name.into(),
            flags,
            doc: doc.into(),
            func: Arc::new(func),
        });
        self
    }

    /// Add an integer constant.
    pub fn constant(mut self, name: impl Into<String>, value: i64) -> Self {
        self.constants.push((name.into(), value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> &str {
        &self.doc
    }

    pub fn methods(&self) -> &[MethodDef<O>] {
        &self.methods
    }

    pub fn constants(&self) -> &[(String, i64)] {
        &self.constants
    }

    pub fn find_method(&self, name: &str) -> Option<&MethodDef<O>> {
        self.methods.iter().find(|m| m.name == name)
    }
}

// ── CoreBuiltins ──────────────────────────────────────────────────────────────

/// Name of the module every session registers first.
pub const CORE_BUILTINS: &str = "CoreBuiltins";

/// `CoreBuiltins`: `syspathAppend(dir)` plus `TRUE` / `FALSE`.
pub fn core_builtins<O: GuestObject>() -> ModuleDef<O> {
    ModuleDef::<O>::new(CORE_BUILTINS, "Module with different core built-ins")
        .method(
            "syspathAppend",
            CallFlags::VARARGS,
            "Append specified directory to system paths",
            |call| {
                let dir = match call.args.as_slice() {
                    [one] => one.as_text(),
                    _ => None,
                };
                let Some(dir) = dir else {
                    return Err(NativeError::value_error("Method expects one string argument"));
                };
                call.append_search_path(&dir)?;
                Ok(HostValue::Nil)
            },
        )
        .constant("TRUE", 1)
        .constant("FALSE", 0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
