//! The interpreter session: boot, module table, run surface, shutdown.
//!
//! At most one [`Session`] is live per process.  A session owns the guest
//! runtime, the registry of native modules it created, and the output
//! [`Tracer`].  Every `run_*` call truncates both capture buffers, executes,
//! and returns what the script printed alongside its result.
//!
//! # Start-up sequence
//!
//! | Step | Action                                         | On failure        |
//! |------|------------------------------------------------|-------------------|
//! | 1    | boot the runtime under the program name        | fatal             |
//! | 2    | log the interpreter version                    | n/a               |
//! | 3    | create `CoreBuiltins`, then configured modules | fatal             |
//! | 4    | expose argv                                    | warning           |
//! | 5    | enable guest threads                           | ignored           |
//! | 6    | search path, site probe, sys probe             | warning           |
//! | 7    | start output capture                           | fatal             |
//!
//! Teardown runs in reverse: capture off, modules released, runtime
//! finalized, then the process-wide slot is freed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::error::{HostError, HostResult};
use crate::module::{core_builtins, ModuleDef};
use crate::namespace::Namespace;
use crate::registry::{ModuleId, ModuleRegistry};
use crate::runtime::{Runtime, Stream};
use crate::script::ScriptUnit;
use crate::tracer::Tracer;

/// Program name used when the caller supplies none.
pub const DEFAULT_PROGRAM_NAME: &str = "embedhost";

static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Directory of the running program, derived from argument zero.
///
/// Everything up to the last `/` or `\` is kept.  A lone `.` component left
/// at the end (as in `./prog`) is dropped.  `None` when there is no
/// separator, or the only one is the leading character.
pub fn exec_dir(argv0: &str) -> Option<String> {
    let cut = argv0.rfind(|c| c == '/' || c == '\\')?;
    if cut == 0 {
        return None;
    }
    let dir = &argv0[..cut];
    let dir = match dir.strip_suffix('.') {
        Some(rest) if rest.is_empty() || rest.ends_with('/') || rest.ends_with('\\') => rest,
        _ => dir,
    };
    Some(dir.to_owned())
}

// ── Singleton token ───────────────────────────────────────────────────────────

/// Holds the process-wide session slot; freed on drop.
struct ActiveToken(());

impl ActiveToken {
    fn acquire() -> HostResult<Self> {
        if SESSION_ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(HostError::AlreadyActive);
        }
        Ok(Self(()))
    }
}

impl Drop for ActiveToken {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// Whether a session is currently live in this process.
pub fn is_active() -> bool {
    SESSION_ACTIVE.load(Ordering::SeqCst)
}

// ── SessionConfig ─────────────────────────────────────────────────────────────

/// Start-up parameters for [`Session::init`].
pub struct SessionConfig<O> {
    program_name: String,
    argv: Vec<String>,
    modules: Vec<ModuleDef<O>>,
    search_paths: Vec<PathBuf>,
}

impl<O> Default for SessionConfig<O> {
    fn default() -> Self {
        Self {
            program_name: DEFAULT_PROGRAM_NAME.to_owned(),
            argv: Vec::new(),
            modules: Vec::new(),
            search_paths: Vec::new(),
        }
    }
}

impl<O> SessionConfig<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Program identity handed to the runtime.  An empty name keeps the
    /// default.
    pub fn program_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.program_name = name;
        }
        self
    }

    /// Argument vector exposed to scripts; element zero locates the
    /// program directory.
    pub fn argv<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv = argv.into_iter().map(Into::into).collect();
        self
    }

    /// Register `def` at start-up, after `CoreBuiltins`.
    pub fn module(mut self, def: ModuleDef<O>) -> Self {
        self.modules.push(def);
        self
    }

    /// Extra directory appended to the search path after the program's own.
    pub fn search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_paths.push(dir.into());
        self
    }

    pub fn get_program_name(&self) -> &str {
        &self.program_name
    }

    pub fn get_argv(&self) -> &[String] {
        &self.argv
    }
}

// ── NativeModule / RunResult ──────────────────────────────────────────────────

/// A module the session created, with the definition it was built from.
pub struct NativeModule<R: Runtime> {
    def: ModuleDef<R::Object>,
    handle: R::Module,
}

impl<R: Runtime> NativeModule<R> {
    pub fn name(&self) -> &str {
        self.def.name()
    }

    pub fn doc(&self) -> &str {
        self.def.doc()
    }

    pub fn def(&self) -> &ModuleDef<R::Object> {
        &self.def
    }

    /// The runtime's own handle for the module.
    pub fn handle(&self) -> &R::Module {
        &self.handle
    }
}

/// Outcome of one `run_*` call.
///
/// `stdout` / `stderr` hold everything written during the run, including
/// diagnostics for a failed run.  `value` is the script's trailing value,
/// if it produced one.
#[derive(Debug)]
pub struct RunResult<O> {
    pub value: Option<O>,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<HostError>,
}

impl<O> RunResult<O> {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Give up the result object.
    pub fn release(self) {}
}

// ── Session ───────────────────────────────────────────────────────────────────

/// The live interpreter session.
pub struct Session<R: Runtime> {
    tracer: Tracer<R::Object>,
    modules: ModuleRegistry<NativeModule<R>>,
    program_name: String,
    argv: Vec<String>,
    search_paths: Vec<PathBuf>,
    search_dir: Option<String>,
    finalized: bool,
    // Declared last: dropped after every guest handle above.
    rt: R,
    _token: ActiveToken,
}

impl<R: Runtime> Session<R> {
    /// Cold start.  Fails with [`HostError::AlreadyActive`] while another
    /// session is live.
    pub fn init(config: SessionConfig<R::Object>) -> HostResult<Self> {
        let token = ActiveToken::acquire()?;
        let SessionConfig { program_name, argv, modules, search_paths } = config;

        let rt = R::boot(&program_name)?;
        info!(runtime = R::NAME, "compiled with {}", rt.version());

        let mut session = Self {
            tracer: Tracer::new(),
            modules: ModuleRegistry::new(),
            program_name,
            argv,
            search_paths,
            search_dir: None,
            finalized: false,
            rt,
            _token: token,
        };

        session.new_module(core_builtins())?;
        for def in modules {
            session.new_module(def)?;
        }

        session.apply_argv();
        if session.rt.enable_threads() {
            debug!(runtime = R::NAME, "guest threads enabled");
        }
        session.check_environment(true);

        session.tracer.start(&session.rt)?;
        debug!(program = %session.program_name, "session ready");
        Ok(session)
    }

    /// Warm re-initialisation: re-apply argv and re-run the environment
    /// checks.  Modules, namespaces and capture state are untouched.
    pub fn reinit(&mut self) {
        debug!(program = %self.program_name, "warm re-init");
        self.apply_argv();
        self.check_environment(false);
    }

    fn apply_argv(&self) {
        if let Err(e) = self.rt.set_argv(&self.argv) {
            warn!(error = %e, "could not set script argv");
        }
    }

    fn check_environment(&mut self, first_time: bool) {
        match self.argv.first().map(String::as_str).and_then(exec_dir) {
            Some(dir) => {
                match self.rt.append_search_path(&dir) {
                    Ok(true) => debug!(dir = %dir, "added program directory to search path"),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "could not import or build search path"),
                }
                self.search_dir = Some(dir);
            }
            None => warn!("could not determine argv[0] path"),
        }

        for dir in &self.search_paths {
            let dir = dir.display().to_string();
            if let Err(e) = self.rt.append_search_path(&dir) {
                warn!(dir = %dir, error = %e, "could not extend search path");
            }
        }

        if self.rt.probe_site() {
            info!("checking for installed site component... got it");
        } else if first_time {
            warn!(
                "no installed site component found; only built-in modules are \
                 available and some scripts may not run"
            );
        }

        if !self.rt.probe_sys() {
            warn!("core system component is unavailable");
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn runtime(&self) -> &R {
        &self.rt
    }

    pub fn tracer(&self) -> &Tracer<R::Object> {
        &self.tracer
    }

    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Program directory appended to the search path, if one was derived.
    pub fn search_dir(&self) -> Option<&str> {
        self.search_dir.as_deref()
    }

    // ── Modules ───────────────────────────────────────────────────────────

    /// Create `def` in the runtime and track it until freed or shutdown.
    pub fn new_module(&mut self, def: ModuleDef<R::Object>) -> HostResult<ModuleId> {
        let handle = self.rt.create_module(&def)?;
        let name = def.name().to_owned();
        let id = self.modules.register(NativeModule { def, handle });
        debug!(module = %name, %id, "module registered");
        Ok(id)
    }

    /// Release one module.  An unknown id is a no-op returning `false`.
    pub fn free_module(&mut self, id: ModuleId) -> bool {
        match self.modules.unregister(id) {
            Some(m) => {
                debug!(module = %m.name(), %id, "module released");
                self.rt.release_module(m.def.name(), m.handle);
                true
            }
            None => false,
        }
    }

    pub fn module(&self, id: ModuleId) -> Option<&NativeModule<R>> {
        self.modules.get(id)
    }

    /// The most recently registered module called `name`.
    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        self.modules
            .iter()
            .filter(|(_, m)| m.name() == name)
            .map(|(id, _)| id)
            .max()
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &NativeModule<R>)> {
        self.modules.iter()
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    // ── Namespaces and scripts ────────────────────────────────────────────

    /// A fresh global scope: `__builtins__` and `__name__ = "__main__"`.
    pub fn new_namespace(&self) -> HostResult<Namespace<R::Namespace>> {
        Namespace::create(&self.rt)
    }

    /// Read `path` into a script unit.  Nothing is compiled yet.
    pub fn load_file(&self, path: impl AsRef<Path>) -> HostResult<ScriptUnit<R>> {
        ScriptUnit::from_file(path)
    }

    /// Run `unit` in a namespace created for this run only.
    pub fn run_script(&self, unit: &mut ScriptUnit<R>) -> RunResult<R::Object> {
        match self.new_namespace() {
            Ok(ns) => self.run_script_in(unit, &ns),
            Err(e) => self.failed_run(e),
        }
    }

    /// Run `unit` in `namespace`; bindings it creates persist there.
    pub fn run_script_in(
        &self,
        unit: &mut ScriptUnit<R>,
        namespace: &Namespace<R::Namespace>,
    ) -> RunResult<R::Object> {
        for stream in Stream::ALL {
            self.tracer.truncate(&self.rt, stream);
        }
        let outcome = unit.execute(&self.rt, namespace);
        let stdout = self.buffer(Stream::Stdout);
        let stderr = self.buffer(Stream::Stderr);
        match outcome {
            Ok(value) => RunResult { value, stdout, stderr, error: None },
            Err(e) => {
                debug!(origin = %unit.origin(), error = %e, "script run failed");
                RunResult { value: None, stdout, stderr, error: Some(e) }
            }
        }
    }

    /// One-shot: wrap `text`, run it in a fresh namespace, drop the unit.
    pub fn run_buffer(&self, text: &str) -> RunResult<R::Object> {
        self.run_script(&mut ScriptUnit::from_buffer(text))
    }

    pub fn run_buffer_in(
        &self,
        text: &str,
        namespace: &Namespace<R::Namespace>,
    ) -> RunResult<R::Object> {
        self.run_script_in(&mut ScriptUnit::from_buffer(text), namespace)
    }

    /// One-shot: load `path`, run it in a fresh namespace, drop the unit.
    ///
    /// A file that cannot be read is an error; nothing is run.
    pub fn run_file(&self, path: impl AsRef<Path>) -> HostResult<RunResult<R::Object>> {
        let mut unit = self.load_file(path)?;
        Ok(self.run_script(&mut unit))
    }

    pub fn run_file_in(
        &self,
        path: impl AsRef<Path>,
        namespace: &Namespace<R::Namespace>,
    ) -> HostResult<RunResult<R::Object>> {
        let mut unit = self.load_file(path)?;
        Ok(self.run_script_in(&mut unit, namespace))
    }

    /// A run that never reached the guest.  Both buffers are cleared first
    /// so nothing from an earlier run leaks into the result.
    fn failed_run(&self, error: HostError) -> RunResult<R::Object> {
        self.truncate(Stream::Stdout);
        self.truncate(Stream::Stderr);
        if let Err(e) = self.write(Stream::Stderr, &format!("{error}\n")) {
            warn!(error = %e, "could not report failed run");
        }
        RunResult {
            value: None,
            stdout: self.buffer(Stream::Stdout),
            stderr: self.buffer(Stream::Stderr),
            error: Some(error),
        }
    }

    // ── Output ────────────────────────────────────────────────────────────

    /// Write `text` on the guest's current `stream` object.
    pub fn write(&self, stream: Stream, text: &str) -> HostResult<()> {
        self.rt.write(stream, text)
    }

    /// Accumulated text on `stream`; empty when it cannot be read.
    pub fn buffer(&self, stream: Stream) -> String {
        self.tracer.buffer(&self.rt, stream).unwrap_or_default()
    }

    pub fn truncate(&self, stream: Stream) {
        self.tracer.truncate(&self.rt, stream);
    }

    // ── Shutdown ──────────────────────────────────────────────────────────

    /// Tear the session down.  Dropping the session does the same.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.tracer.stop(&self.rt);
        let rt = &self.rt;
        self.modules.drain_with(|id, m| {
            debug!(module = %m.name(), %id, "module released");
            rt.release_module(m.def.name(), m.handle);
        });
        self.rt.finalize();
        info!(program = %self.program_name, "session closed");
    }
}

impl<R: Runtime> Drop for Session<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────


#[cfg(all(test, feature = "lua"))]
mod lua_tests {
    use std::sync::Mutex;

    use super::*;
    use crate::lua::LuaRuntime;
    use crate::module::{CallFlags, CORE_BUILTINS};
    use crate::runtime::{GuestObject, HostValue};

    // Sessions are process-wide; run these one at a time.
    static TEST_MX: Mutex<()> = Mutex::new(());

    fn session() -> Session<LuaRuntime> {
        Session::init(SessionConfig::new().argv(["./bin/unit-test"])).unwrap()
    }

    #[test]
    fn second_session_is_refused() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let s = session();
        assert!(is_active());
        let again = Session::<LuaRuntime>::init(SessionConfig::new());
        assert!(matches!(again, Err(HostError::AlreadyActive)));
        s.shutdown();
        assert!(!is_active());
        let s = session();
        drop(s);
        assert!(!is_active());
    }

    #[test]
    fn core_builtins_registered_first() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let s = session();
        let (first, m) = s.modules().next().unwrap();
        assert_eq!(m.name(), CORE_BUILTINS);
        assert_eq!(s.find_module(CORE_BUILTINS), Some(first));
        let r = s.run_buffer("local cb = require('CoreBuiltins'); return cb.TRUE + cb.FALSE");
        assert!(r.is_ok(), "{:?}", r.error);
        assert_eq!(r.value.unwrap().as_long(), Some(1));
    }

    #[test]
    fn search_dir_from_argv() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let s = session();
        assert_eq!(s.search_dir(), Some("./bin"));
        let r = s.run_buffer("return package.path");
        assert!(r.value.unwrap().as_text().unwrap().contains("./bin/?.lua"));
    }

    #[test]
    fn run_captures_each_run_separately() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let s = session();
        let r = s.run_buffer("print('one')");
        assert_eq!(r.stdout, "one\n");
        let r = s.run_buffer("print('two')");
        assert_eq!(r.stdout, "two\n");
        assert_eq!(r.stderr, "");
    }

    #[test]
    fn failed_run_reports_on_stderr() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let s = session();
        let r = s.run_buffer("print('before'); error('boom')");
        assert!(!r.is_ok());
        assert!(r.value.is_none());
        assert_eq!(r.stdout, "before\n");
        assert!(r.stderr.contains("boom"));
    }

    #[test]
    fn failed_run_drops_earlier_output() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let s = session();
        let r = s.run_buffer("print('stale'); io.stderr:write('old')");
        assert_eq!(r.stdout, "stale\n");

        let r = s.failed_run(HostError::Runtime("no namespace".into()));
        assert_eq!(r.stdout, "");
        assert_eq!(r.stderr, "runtime error: no namespace\n");
        assert!(matches!(r.error, Some(HostError::Runtime(_))));
    }

    #[test]
    fn modules_added_and_freed_at_runtime() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let mut s = session();
        let def = ModuleDef::new("Late", "added after start-up").method(
            "answer",
            CallFlags::NOARGS,
            "",
            |_| Ok(HostValue::Int(42)),
        );
        let id = s.new_module(def).unwrap();
        assert_eq!(s.module_count(), 2);
        let r = s.run_buffer("return require('Late').answer()");
        assert_eq!(r.value.unwrap().as_long(), Some(42));

        assert!(s.free_module(id));
        assert!(!s.free_module(id));
        assert_eq!(s.module_count(), 1);
        let r = s.run_buffer("return pcall(require, 'Late')");
        assert_eq!(r.value.unwrap().value(), &mlua::Value::Boolean(false));
    }

    #[test]
    fn reinit_keeps_modules() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let mut s = session();
        s.reinit();
        s.reinit();
        assert_eq!(s.module_count(), 1);
        let r = s.run_buffer("return package.path");
        let path = r.value.unwrap().as_text().unwrap();
        assert_eq!(path.matches("./bin/?.lua;").count(), 1);
    }
}
