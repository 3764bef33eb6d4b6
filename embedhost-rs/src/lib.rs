//! Embedding host for a scripting interpreter.
//!
//! A host program starts one [`Session`], exposes native modules to
//! scripts, runs script units (cached compiled form, optional shared
//! namespace), and reads back everything the scripts printed.
//!
//! | Module        | Contents                                              |
//! |---------------|-------------------------------------------------------|
//! | [`session`]   | singleton session, start-up/teardown, `run_*` surface |
//! | [`module`]    | native module declarations, `CoreBuiltins`            |
//! | [`registry`]  | live-module bookkeeping                               |
//! | [`script`]    | script units and their compile cache                  |
//! | [`namespace`] | execution namespaces                                  |
//! | [`tracer`]    | stdout/stderr capture                                 |
//! | [`bridge`]    | typed attribute access on script objects              |
//! | [`runtime`]   | the backend seam                                      |
//! | [`lua`]       | Lua 5.4 backend (`lua` feature, default)              |
//! | [`python`]    | CPython backend (`python` feature)                    |

pub mod bridge;
pub mod cli;
pub mod error;
pub mod lua;
pub mod module;
pub mod namespace;
pub mod python;
pub mod registry;
pub mod runtime;
pub mod script;
pub mod session;
pub mod tracer;

pub use error::{HostError, HostResult};
pub use module::{CallFlags, ModuleDef, NativeError};
pub use namespace::Namespace;
pub use registry::ModuleId;
pub use runtime::{GuestObject, HostValue, Runtime, Stream};
pub use script::ScriptUnit;
pub use session::{RunResult, Session, SessionConfig};
