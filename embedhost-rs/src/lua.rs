//! Lua 5.4 guest runtime via the `mlua` crate.
//!
//! Enabled with the `lua` Cargo feature (on by default):
//! ```text
//! cargo build --features lua
//! cargo test  --features lua
//! ```
//!
//! # Mapping onto the host model
//!
//! | Host concept        | Lua realisation                                   |
//! |---------------------|---------------------------------------------------|
//! | stdout / stderr     | `io.stdout` / `io.stderr` (`print`, `io.write` go through `io.stdout`) |
//! | capture sink        | `StringIO` table: `write`, `getvalue`, `truncate`, `seek`, `flush` |
//! | namespace           | table with `__builtins__` = globals, `__index` → globals |
//! | compiled form       | a loaded chunk taking its `_ENV` as first argument; the body sees no varargs |
//! | native module       | table in `package.loaded`, reached with `require` |
//! | search path         | `package.path` (`dir/?.lua;dir/?/init.lua`)        |
//! | argv                | global `arg` table, `arg[0]` = argument zero       |

#[cfg(feature = "lua")]
pub use lua_impl::{LuaNamespace, LuaObject, LuaRuntime};

#[cfg(feature = "lua")]
mod lua_impl {
    use std::sync::atomic::{AtomicU64, Ordering};

    use mlua::prelude::*;
    use mlua::IntoLua;
    use tracing::{debug, warn};

    use crate::error::{HostError, HostResult};
    use crate::module::{Call, ModuleDef};
    use crate::runtime::{GuestNamespace, GuestObject, HostCalls, HostValue, Runtime, Stream};

    // Registry keys for values captured at boot, out of scripts' reach.
    const STRING_IO_KEY: &str = "embedhost.StringIO";
    const WRITE_KEY: &str = "embedhost.write";
    const APPEND_PATH_KEY: &str = "embedhost.append_path";
    const SETMETATABLE_KEY: &str = "embedhost.setmetatable";
    const IO_KEY: &str = "embedhost.io";
    // Lua keeps `package.loaded` in the registry under this name.
    const LOADED_KEY: &str = "_LOADED";

    /// Every chunk receives its namespace as first argument and runs the
    /// script body in an inner function called with no arguments, so `...`
    /// is empty inside the script.  Kept on the first line so reported line
    /// numbers match the script.
    const ENV_PROLOGUE: &str = "local _ENV = ...; return (function(...) ";
    /// Closes the inner function.  The newline ends a trailing `--` comment.
    const ENV_EPILOGUE: &str = "\nend)()";

    /// Run once per state: the in-memory sink class, stream-routed `print`
    /// and `io.write`, and the helpers the host calls into.
    const PRELUDE_SRC: &str = r#"
local io, select, tostring, type = io, select, tostring, type
local setmetatable, concat, sub = setmetatable, table.concat, string.sub

local StringIO = {}
StringIO.__index = StringIO
StringIO.__name = "StringIO"

function StringIO.new()
  return setmetatable({ _chunks = {} }, StringIO)
end

function StringIO:write(...)
  local chunks = self._chunks
  for i = 1, select('#', ...) do
    local v = select(i, ...)
    local t = type(v)
    if t ~= 'string' and t ~= 'number' then
      error("bad argument #" .. i .. " to 'write' (string expected, got " .. t .. ")", 2)
    end
    chunks[#chunks + 1] = tostring(v)
  end
  return self
end

function StringIO:getvalue()
  return concat(self._chunks)
end

function StringIO:truncate(size)
  local value = concat(self._chunks)
  size = size or #value
  self._chunks = { sub(value, 1, size) }
  return size
end

function StringIO:seek()
  return 0
end

function StringIO:flush()
end

print = function(...)
  local parts = {}
  for i = 1, select('#', ...) do
    parts[i] = tostring((select(i, ...)))
  end
  io.stdout:write(concat(parts, '\t'), '\n')
end

io.write = function(...)
  return io.stdout:write(...)
end

local function write_stream(slot, text)
  io[slot]:write(text)
end

local function append_path(dir)
  if type(package) ~= 'table' then
    return nil
  end
  if dir == '' then
    dir = '.'
  end
  local entry = dir .. '/?.lua;' .. dir .. '/?/init.lua'
  if (';' .. package.path .. ';'):find(';' .. entry .. ';', 1, true) then
    return false
  end
  package.path = package.path .. ';' .. entry
  return true
end

return StringIO, write_stream, append_path, setmetatable, io
"#;

    impl From<LuaError> for HostError {
        fn from(e: LuaError) -> Self {
            HostError::Runtime(e.to_string())
        }
    }

    impl IntoLua for HostValue {
        fn into_lua(self, lua: &Lua) -> LuaResult<LuaValue> {
            Ok(match self {
                HostValue::Nil => LuaValue::Nil,
                HostValue::Bool(b) => LuaValue::Boolean(b),
                HostValue::Int(n) => LuaValue::Integer(n),
                HostValue::Float(f) => LuaValue::Number(f),
                HostValue::Str(s) => LuaValue::String(lua.create_string(&s)?),
            })
        }
    }

    // ── LuaObject ─────────────────────────────────────────────────────────

    /// A Lua value held by the host.
    #[derive(Debug, Clone, PartialEq)]
    pub struct LuaObject(LuaValue);

    impl LuaObject {
        pub fn value(&self) -> &LuaValue {
            &self.0
        }

        pub fn into_value(self) -> LuaValue {
            self.0
        }

        fn non_nil(v: LuaValue) -> Option<Self> {
            if v.is_nil() { None } else { Some(Self(v)) }
        }
    }

    impl GuestObject for LuaObject {
        fn get_attr(&self, name: &str) -> Option<Self> {
            match &self.0 {
                LuaValue::Table(t) => t.get::<LuaValue>(name).ok().and_then(Self::non_nil),
                _ => None,
            }
        }

        fn set_attr(&self, name: &str, value: HostValue) -> bool {
            match &self.0 {
                LuaValue::Table(t) => t.set(name, value).is_ok(),
                _ => false,
            }
        }

        fn call_method(&self, name: &str, args: &[HostValue]) -> HostResult<Option<Self>> {
            let LuaValue::Table(t) = &self.0 else {
                return Err(HostError::Runtime(format!(
                    "{} value has no method '{name}'",
                    self.0.type_name()
                )));
            };
            let method: LuaFunction = t
                .get(name)
                .map_err(|_| HostError::Runtime(format!("no method '{name}'")))?;
            let ret = method.call::<LuaMultiValue>((t.clone(), LuaVariadic::from(args.to_vec())))?;
            Ok(ret.into_iter().next().and_then(Self::non_nil))
        }

        fn as_long(&self) -> Option<i64> {
            match self.0 {
                LuaValue::Integer(n) => Some(n),
                _ => None,
            }
        }

        fn as_double(&self) -> Option<f64> {
            match self.0 {
                LuaValue::Number(f) => Some(f),
                _ => None,
            }
        }

        fn as_text(&self) -> Option<String> {
            match &self.0 {
                LuaValue::String(s) => s.to_str().ok().map(|s| (*s).to_owned()),
                _ => None,
            }
        }

        fn is_none(&self) -> bool {
            self.0.is_nil()
        }

        fn type_name(&self) -> String {
            self.0.type_name().to_owned()
        }
    }

    // ── LuaNamespace ──────────────────────────────────────────────────────

    /// A namespace table.  Holds its own handle on the state, so the table
    /// stays valid after the session that made it has shut down.
    #[derive(Clone)]
    pub struct LuaNamespace {
        table: LuaTable,
        lua: Lua,
        state: u64,
    }

    impl std::fmt::Debug for LuaNamespace {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("LuaNamespace")
                .field("table", &self.table)
                .field("state", &self.state)
                .finish()
        }
    }

    impl LuaNamespace {
        pub fn table(&self) -> &LuaTable {
            &self.table
        }

        /// The state this namespace lives in.
        pub fn lua(&self) -> &Lua {
            &self.lua
        }

        fn keys(&self) -> Vec<LuaValue> {
            self.table
                .clone()
                .pairs::<LuaValue, LuaValue>()
                .filter_map(|pair| pair.ok().map(|(k, _)| k))
                .collect()
        }
    }

    impl GuestNamespace for LuaNamespace {
        type Object = LuaObject;

        fn set(&self, key: &str, value: HostValue) -> HostResult<()> {
            Ok(self.table.raw_set(key, value)?)
        }

        fn get(&self, key: &str) -> Option<LuaObject> {
            self.table.raw_get::<LuaValue>(key).ok().and_then(LuaObject::non_nil)
        }

        fn clear(&self) {
            for key in self.keys() {
                let _ = self.table.raw_set(key, LuaValue::Nil);
            }
        }

        fn len(&self) -> usize {
            self.keys().len()
        }
    }

    // ── Host services ─────────────────────────────────────────────────────

    fn write_stream(lua: &Lua, stream: Stream, text: &str) -> HostResult<()> {
        let write: LuaFunction = lua.named_registry_value(WRITE_KEY)?;
        write.call::<()>((stream.slot(), text))?;
        Ok(())
    }

    fn append_path(lua: &Lua, dir: &str) -> HostResult<bool> {
        let append: LuaFunction = lua.named_registry_value(APPEND_PATH_KEY)?;
        append
            .call::<Option<bool>>(dir)?
            .ok_or_else(|| HostError::Runtime("package library is not loaded".into()))
    }

    /// Host services seen from inside a native call.
    struct LuaHost<'a>(&'a Lua);

    impl HostCalls for LuaHost<'_> {
        fn write(&self, stream: Stream, text: &str) -> HostResult<()> {
            write_stream(self.0, stream, text)
        }

        fn append_search_path(&self, dir: &str) -> HostResult<bool> {
            append_path(self.0, dir)
        }
    }

    // ── LuaRuntime ────────────────────────────────────────────────────────

    /// A Lua 5.4 state with the host prelude installed.
    pub struct LuaRuntime {
        lua: Lua,
        program_name: String,
        state: u64,
    }

    static NEXT_STATE: AtomicU64 = AtomicU64::new(1);

    impl LuaRuntime {
        /// The underlying state, for embedders that need raw access.
        pub fn lua(&self) -> &Lua {
            &self.lua
        }

        pub fn program_name(&self) -> &str {
            &self.program_name
        }

        /// Surface `err` on the currently installed stderr object.
        fn report(&self, err: &LuaError) {
            if let Err(e) = write_stream(&self.lua, Stream::Stderr, &format!("{err}\n")) {
                warn!(error = %e, "could not print script error: {err}");
            }
        }
    }

    impl HostCalls for LuaRuntime {
        fn write(&self, stream: Stream, text: &str) -> HostResult<()> {
            write_stream(&self.lua, stream, text)
        }

        fn append_search_path(&self, dir: &str) -> HostResult<bool> {
            append_path(&self.lua, dir)
        }
    }

    impl Runtime for LuaRuntime {
        type Object = LuaObject;
        type Namespace = LuaNamespace;
        type Code = LuaFunction;
        type Module = LuaTable;

        const NAME: &'static str = "lua";

        fn boot(program_name: &str) -> HostResult<Self> {
            let lua = Lua::new();
            let (string_io, write, append, setmetatable, io): (
                LuaTable,
                LuaFunction,
                LuaFunction,
                LuaFunction,
                LuaTable,
            ) = lua.load(PRELUDE_SRC).set_name("=prelude").eval()?;
            lua.set_named_registry_value(STRING_IO_KEY, string_io)?;
            lua.set_named_registry_value(WRITE_KEY, write)?;
            lua.set_named_registry_value(APPEND_PATH_KEY, append)?;
            lua.set_named_registry_value(SETMETATABLE_KEY, setmetatable)?;
            lua.set_named_registry_value(IO_KEY, io)?;
            debug!(program = program_name, "lua state ready");
            let state = NEXT_STATE.fetch_add(1, Ordering::Relaxed);
            Ok(Self { lua, program_name: program_name.to_owned(), state })
        }

        fn version(&self) -> String {
            self.lua
                .globals()
                .get::<String>("_VERSION")
                .unwrap_or_else(|_| "Lua".to_owned())
        }

        fn set_argv(&self, argv: &[String]) -> HostResult<()> {
            let arg = self.lua.create_table()?;
            for (i, a) in argv.iter().enumerate() {
                arg.raw_set(i as i64, a.as_str())?;
            }
            self.lua.globals().set("arg", arg)?;
            Ok(())
        }

        fn enable_threads(&self) -> bool {
            // Coroutines are always available; a state is never shared
            // between OS threads.
            false
        }

        fn probe_site(&self) -> bool {
            matches!(self.lua.globals().get::<LuaValue>("package"), Ok(LuaValue::Table(_)))
        }

        fn probe_sys(&self) -> bool {
            self.lua.named_registry_value::<LuaTable>(IO_KEY).is_ok()
        }

        fn new_namespace(&self) -> HostResult<LuaNamespace> {
            let globals = self.lua.globals();
            let ns = self.lua.create_table()?;
            ns.raw_set(crate::namespace::BUILTINS_KEY, globals.clone())?;
            let meta = self.lua.create_table()?;
            meta.raw_set("__index", globals)?;
            let setmetatable: LuaFunction = self.lua.named_registry_value(SETMETATABLE_KEY)?;
            setmetatable.call::<()>((ns.clone(), meta))?;
            Ok(LuaNamespace { table: ns, lua: self.lua.clone(), state: self.state })
        }

        fn compile(&self, source: &str, origin: &str) -> HostResult<LuaFunction> {
            let chunk_name = if origin.is_empty() {
                "=".to_owned()
            } else {
                format!("@{origin}")
            };
            let wrapped = format!("{ENV_PROLOGUE}{source}{ENV_EPILOGUE}");
            self.lua
                .load(wrapped)
                .set_name(chunk_name)
                .into_function()
                .map_err(|e| {
                    self.report(&e);
                    HostError::Compile { origin: origin.to_owned(), message: e.to_string() }
                })
        }

        fn eval(&self, code: &LuaFunction, namespace: &LuaNamespace) -> HostResult<Option<LuaObject>> {
            if namespace.state != self.state {
                return Err(HostError::Runtime(
                    "namespace belongs to a different session".into(),
                ));
            }
            match code.call::<LuaMultiValue>(namespace.table.clone()) {
                Ok(values) => Ok(values.into_iter().next().and_then(LuaObject::non_nil)),
                Err(e) => {
                    self.report(&e);
                    Err(HostError::Eval { origin: String::new(), message: e.to_string() })
                }
            }
        }

        fn create_module(&self, def: &ModuleDef<LuaObject>) -> HostResult<LuaTable> {
            let module = self.lua.create_table()?;
            for method in def.methods() {
                let m = method.clone();
                let module_name = def.name().to_owned();
                let func = self.lua.create_function(move |lua, args: LuaMultiValue| {
                    let args = args.into_iter().map(LuaObject).collect();
                    let host = LuaHost(lua);
                    let call = Call::new(args, Vec::new(), &host);
                    m.invoke(&module_name, &call)
                        .map_err(|e| LuaError::RuntimeError(e.to_string()))
                })?;
                module.raw_set(method.name.as_str(), func)?;
            }
            for (name, value) in def.constants() {
                module.raw_set(name.as_str(), *value)?;
            }
            module.raw_set("__name__", def.name())?;
            module.raw_set("__doc__", def.doc())?;

            let loaded: LuaTable = self.lua.named_registry_value(LOADED_KEY)?;
            loaded.raw_set(def.name(), module.clone())?;
            Ok(module)
        }

        fn release_module(&self, name: &str, module: LuaTable) {
            let Ok(loaded) = self.lua.named_registry_value::<LuaTable>(LOADED_KEY) else {
                return;
            };
            if let Ok(LuaValue::Table(current)) = loaded.raw_get::<LuaValue>(name) {
                if current == module {
                    let _ = loaded.raw_set(name, LuaValue::Nil);
                }
            }
        }

        fn new_sink(&self) -> HostResult<LuaObject> {
            let class: LuaTable = self.lua.named_registry_value(STRING_IO_KEY)?;
            let new: LuaFunction = class.get("new")?;
            let sink: LuaTable = new.call(())?;
            Ok(LuaObject(LuaValue::Table(sink)))
        }

        fn stream(&self, stream: Stream) -> Option<LuaObject> {
            let io: LuaTable = self.lua.named_registry_value(IO_KEY).ok()?;
            io.raw_get::<LuaValue>(stream.slot()).ok().and_then(LuaObject::non_nil)
        }

        fn install_stream(&self, stream: Stream, object: &LuaObject) -> HostResult<()> {
            let io: LuaTable = self.lua.named_registry_value(IO_KEY)?;
            io.raw_set(stream.slot(), object.0.clone())?;
            Ok(())
        }

        fn finalize(&mut self) {
            debug!(program = %self.program_name, "closing lua state");
            if let Err(e) = self.lua.gc_collect() {
                warn!(error = %e, "final collection failed");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
