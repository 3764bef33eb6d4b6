//! Host error types.

use std::path::PathBuf;

/// Errors reported by the embedding host.
///
/// Script-level failures (compile and evaluation errors) are also printed
/// on the guest's stderr stream at the point of detection; the variant here
/// carries the same text for callers that want it structurally.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// A session is already live in this process.
    #[error("an interpreter session is already active")]
    AlreadyActive,

    /// A script file could not be stat'ed, opened or read.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A script file is not valid UTF-8 text.
    #[error("{}: not valid UTF-8 text", path.display())]
    Decode { path: PathBuf },

    /// The guest runtime rejected the source text.
    #[error("compile error in {origin:?}: {message}")]
    Compile { origin: String, message: String },

    /// The guest runtime reported a failure while evaluating.
    #[error("evaluation error in {origin:?}: {message}")]
    Eval { origin: String, message: String },

    /// The output capture streams could not be installed.
    #[error("output capture init failed: {0}")]
    CaptureInit(String),

    /// Any other guest-runtime failure.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl HostError {
    /// Build an [`HostError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Fill in the origin of an evaluation error the runtime left blank.
    pub fn with_origin(self, origin: &str) -> Self {
        match self {
            Self::Eval { origin: o, message } if o.is_empty() => Self::Eval {
                origin: origin.to_owned(),
                message,
            },
            other => other,
        }
    }

    /// Whether this error came from the script itself rather than the host.
    pub fn is_script_error(&self) -> bool {
        matches!(self, Self::Compile { .. } | Self::Eval { .. })
    }
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_path() {
        let e = HostError::io(
            "/no/such/file.lua",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(e.to_string().starts_with("/no/such/file.lua: "));
        assert!(!e.is_script_error());
    }

    #[test]
    fn script_errors_are_classified() {
        let c = HostError::Compile { origin: "x".into(), message: "bad".into() };
        let r = HostError::Eval { origin: String::new(), message: "boom".into() };
        assert!(c.is_script_error());
        assert!(r.is_script_error());
        assert!(!HostError::AlreadyActive.is_script_error());
    }

    #[test]
    fn with_origin_only_fills_blank_eval() {
        let e = HostError::Eval { origin: String::new(), message: "m".into() }.with_origin("a.lua");
        assert!(matches!(e, HostError::Eval { ref origin, .. } if origin == "a.lua"));
        let e = HostError::Eval { origin: "x".into(), message: "m".into() }.with_origin("a.lua");
        assert!(matches!(e, HostError::Eval { ref origin, .. } if origin == "x"));
    }
}
