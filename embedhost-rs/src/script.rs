//! Script units: source text plus its lazily compiled form.
//!
//! ```text
//!   Uncompiled ──compile ok──▶ Compiled ──invalidate──▶ Uncompiled
//!        ▲                                                   │
//!        └──────────────── compile error ◀───────────────────┘
//! ```
//!
//! Once compiled, a unit keeps executing its cached code even if the source
//! text is replaced; only [`ScriptUnit::invalidate`] makes the next run pick
//! up the new text.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{HostError, HostResult};
use crate::namespace::Namespace;
use crate::runtime::Runtime;

/// One piece of guest source, from a file or an in-memory buffer.
pub struct ScriptUnit<R: Runtime> {
    source: String,
    file_name: Option<PathBuf>,
    compiled: Option<R::Code>,
    compiles: u32,
}

impl<R: Runtime> ScriptUnit<R> {
    /// Wrap a copy of `text`.  No I/O.
    pub fn from_buffer(text: impl Into<String>) -> Self {
        Self {
            source: text.into(),
            file_name: None,
            compiled: None,
            compiles: 0,
        }
    }

    /// Read the whole of `path` as a script.
    ///
    /// The file is stat'ed first and exactly the reported length is read.
    /// Fails if the file is missing, unreadable, or not UTF-8 text.
    pub fn from_file(path: impl AsRef<Path>) -> HostResult<Self> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path).map_err(|e| HostError::io(path, e))?;
        let file = File::open(path).map_err(|e| HostError::io(path, e))?;

        let len = meta.len();
        let mut bytes = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
        file.take(len)
            .read_to_end(&mut bytes)
            .map_err(|e| HostError::io(path, e))?;

        let text = String::from_utf8(bytes)
            .map_err(|_| HostError::Decode { path: path.to_path_buf() })?;

        let mut unit = Self::from_buffer(text);
        unit.file_name = Some(path.to_path_buf());
        Ok(unit)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Replace the source text.  Does *not* invalidate the compiled form.
    pub fn set_source(&mut self, text: impl Into<String>) {
        self.source = text.into();
    }

    pub fn file_name(&self) -> Option<&Path> {
        self.file_name.as_deref()
    }

    /// Diagnostic origin and `__file__` value: the file name, or `""`.
    pub fn origin(&self) -> String {
        self.file_name
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// How many times this unit has actually been compiled.
    pub fn compile_count(&self) -> u32 {
        self.compiles
    }

    /// Return the compiled form, compiling the source first if needed.
    ///
    /// On a compile error the runtime has already printed the diagnostic on
    /// its stderr stream; the cache stays empty so a later call retries.
    pub fn compile(&mut self, rt: &R) -> HostResult<&R::Code> {
        if self.compiled.is_none() {
            let origin = self.origin();
            debug!(origin = %origin, "compiling script");
            self.compiles += 1;
            let code = rt.compile(&self.source, &origin)?;
            self.compiled = Some(code);
        }
        self.compiled
            .as_ref()
            .ok_or_else(|| HostError::Runtime("compiled form missing".into()))
    }

    /// Run the unit in `namespace`.
    ///
    /// Sets `__file__`, clears stale guest error state, and evaluates with
    /// `namespace` as both globals and locals.  `Ok(None)` is a normal
    /// outcome (no trailing value).  On failure the namespace keeps
    /// whatever the script did before failing.
    pub fn execute(
        &mut self,
        rt: &R,
        namespace: &Namespace<R::Namespace>,
    ) -> HostResult<Option<R::Object>> {
        let origin = self.origin();
        let code = self.compile(rt)?;
        namespace.set_file_marker(&origin)?;
        rt.clear_error();
        rt.eval(code, namespace.raw())
            .map_err(|e| e.with_origin(&origin))
    }

    /// Drop the compiled form; the next run recompiles.
    pub fn invalidate(&mut self) {
        self.compiled = None;
    }

    /// Release the unit: compiled form first, then the text.
    pub fn free(mut self) {
        self.invalidate();
    }
}

impl<R: Runtime> std::fmt::Debug for ScriptUnit<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptUnit")
            .field("file_name", &self.file_name)
            .field("len", &self.source.len())
            .field("compiled", &self.compiled.is_some())
            .field("compiles", &self.compiles)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
