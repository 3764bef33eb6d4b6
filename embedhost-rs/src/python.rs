//! CPython guest runtime via the `pyo3` crate.
//!
//! Enabled with the `python` Cargo feature:
//! ```text
//! cargo build --features python
//! cargo test  --features python
//! ```
//!
//! # Mapping onto the host model
//!
//! | Host concept        | Python realisation                               |
//! |---------------------|--------------------------------------------------|
//! | stdout / stderr     | `sys.stdout` / `sys.stderr`                      |
//! | capture sink        | `io.StringIO()`                                  |
//! | namespace           | a `dict` with `__builtins__` = `builtins` module |
//! | compiled form       | code object from `compile(src, origin, "exec")`  |
//! | native module       | module object in `sys.modules`, reached with `import` |
//! | search path         | `sys.path`                                       |
//! | argv                | `sys.argv`                                       |
//!
//! The interpreter is initialised at most once per process and never
//! finalised; a later boot re-attaches to it.

#[cfg(feature = "python")]
pub use python_impl::{PyNamespace, PyObj, PyRuntime};

#[cfg(feature = "python")]
mod python_impl {
    use std::fmt;
    use std::sync::OnceLock;

    use pyo3::exceptions::{PyRuntimeError, PyTypeError, PyValueError};
    use pyo3::prelude::*;
    use pyo3::types::{PyDict, PyFloat, PyList, PyLong, PyModule, PyString, PyTuple};
    use tracing::{debug, warn};

    use crate::error::{HostError, HostResult};
    use crate::module::{Call, ErrorKind, MethodDef, ModuleDef, NativeError};
    use crate::runtime::{GuestNamespace, GuestObject, HostCalls, HostValue, Runtime, Stream};

    static PYTHON_INIT: OnceLock<()> = OnceLock::new();

    impl From<PyErr> for HostError {
        fn from(e: PyErr) -> Self {
            HostError::Runtime(e.to_string())
        }
    }

    fn to_py(py: Python<'_>, value: &HostValue) -> PyObject {
        match value {
            HostValue::Nil => py.None(),
            HostValue::Bool(b) => (*b).into_py(py),
            HostValue::Int(n) => (*n).into_py(py),
            HostValue::Float(f) => (*f).into_py(py),
            HostValue::Str(s) => s.as_str().into_py(py),
        }
    }

    fn to_py_err(e: NativeError) -> PyErr {
        match e.kind {
            ErrorKind::TypeError => PyTypeError::new_err(e.message),
            ErrorKind::ValueError => PyValueError::new_err(e.message),
            ErrorKind::RuntimeError => PyRuntimeError::new_err(e.message),
        }
    }

    // ── PyObj ─────────────────────────────────────────────────────────────

    /// A strong reference to a Python object.
    pub struct PyObj(PyObject);

    impl PyObj {
        pub fn object(&self) -> &PyObject {
            &self.0
        }

        pub fn into_object(self) -> PyObject {
            self.0
        }
    }

    impl Clone for PyObj {
        fn clone(&self) -> Self {
            Python::with_gil(|py| Self(self.0.clone_ref(py)))
        }
    }

    impl fmt::Debug for PyObj {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let repr = Python::with_gil(|py| {
                self.0
                    .bind(py)
                    .repr()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|_| "<unrepresentable>".to_owned())
            });
            write!(f, "PyObj({repr})")
        }
    }

    impl GuestObject for PyObj {
        fn get_attr(&self, name: &str) -> Option<Self> {
            Python::with_gil(|py| {
                self.0.bind(py).getattr(name).ok().map(|v| Self(v.unbind()))
            })
        }

        fn set_attr(&self, name: &str, value: HostValue) -> bool {
            Python::with_gil(|py| self.0.bind(py).setattr(name, to_py(py, &value)).is_ok())
        }

        fn has_attr(&self, name: &str) -> bool {
            Python::with_gil(|py| self.0.bind(py).hasattr(name).unwrap_or(false))
        }

        fn call_method(&self, name: &str, args: &[HostValue]) -> HostResult<Option<Self>> {
            Python::with_gil(|py| {
                let args = PyTuple::new_bound(py, args.iter().map(|a| to_py(py, a)));
                let ret = self.0.bind(py).getattr(name)?.call1(args)?;
                Ok(if ret.is_none() { None } else { Some(Self(ret.unbind())) })
            })
        }

        fn as_long(&self) -> Option<i64> {
            Python::with_gil(|py| {
                let obj = self.0.bind(py);
                if obj.is_instance_of::<PyLong>() {
                    obj.extract::<i64>().ok()
                } else {
                    None
                }
            })
        }

        fn as_double(&self) -> Option<f64> {
            Python::with_gil(|py| {
                let obj = self.0.bind(py);
                if obj.is_instance_of::<PyFloat>() {
                    obj.extract::<f64>().ok()
                } else {
                    None
                }
            })
        }

        fn as_text(&self) -> Option<String> {
            Python::with_gil(|py| {
                let obj = self.0.bind(py);
                if obj.is_instance_of::<PyString>() {
                    obj.extract::<String>().ok()
                } else {
                    None
                }
            })
        }

        fn is_none(&self) -> bool {
            Python::with_gil(|py| self.0.is_none(py))
        }

        fn type_name(&self) -> String {
            Python::with_gil(|py| {
                self.0
                    .bind(py)
                    .get_type()
                    .getattr("__name__")
                    .and_then(|n| n.extract::<String>())
                    .unwrap_or_else(|_| "object".to_owned())
            })
        }
    }

    // ── PyNamespace ───────────────────────────────────────────────────────

    /// A globals dictionary.
    pub struct PyNamespace(Py<PyDict>);

    impl PyNamespace {
        pub fn dict(&self) -> &Py<PyDict> {
            &self.0
        }
    }

    impl GuestNamespace for PyNamespace {
        type Object = PyObj;

        fn set(&self, key: &str, value: HostValue) -> HostResult<()> {
            Python::with_gil(|py| Ok(self.0.bind(py).set_item(key, to_py(py, &value))?))
        }

        fn get(&self, key: &str) -> Option<PyObj> {
            Python::with_gil(|py| {
                self.0.bind(py).get_item(key).ok().flatten().map(|v| PyObj(v.unbind()))
            })
        }

        fn clear(&self) {
            Python::with_gil(|py| self.0.bind(py).clear());
        }

        fn len(&self) -> usize {
            Python::with_gil(|py| self.0.bind(py).len())
        }
    }

    // ── Host services ─────────────────────────────────────────────────────

    fn write_stream(py: Python<'_>, stream: Stream, text: &str) -> HostResult<()> {
        let target = py.import_bound("sys")?.getattr(stream.slot())?;
        if target.is_none() {
            return Err(HostError::Runtime(format!("sys.{stream} is not set")));
        }
        target.call_method1("write", (text,))?;
        Ok(())
    }

    fn append_path(py: Python<'_>, dir: &str) -> HostResult<bool> {
        let path = py.import_bound("sys")?.getattr("path")?;
        let path = path
            .downcast::<PyList>()
            .map_err(|_| HostError::Runtime("sys.path is not a list".into()))?;
        if path.contains(dir)? {
            return Ok(false);
        }
        path.append(dir)?;
        Ok(true)
    }

    struct PyHost;

    impl HostCalls for PyHost {
        fn write(&self, stream: Stream, text: &str) -> HostResult<()> {
            Python::with_gil(|py| write_stream(py, stream, text))
        }

        fn append_search_path(&self, dir: &str) -> HostResult<bool> {
            Python::with_gil(|py| append_path(py, dir))
        }
    }

    // ── Native callables ──────────────────────────────────────────────────

    /// A module function backed by a host [`MethodDef`].
    #[pyclass(name = "native_function", module = "embedhost")]
    struct NativeCallable {
        module: String,
        method: MethodDef<PyObj>,
    }

    #[pymethods]
    impl NativeCallable {
        #[pyo3(signature = (*args, **kwargs))]
        fn __call__(
            &self,
            py: Python<'_>,
            args: &Bound<'_, PyTuple>,
            kwargs: Option<&Bound<'_, PyDict>>,
        ) -> PyResult<PyObject> {
            let args = args.iter().map(|a| PyObj(a.unbind())).collect();
            let kwargs = kwargs
                .map(|kw| {
                    kw.iter()
                        .filter_map(|(k, v)| Some((k.extract::<String>().ok()?, PyObj(v.unbind()))))
                        .collect()
                })
                .unwrap_or_default();
            let call = Call::new(args, kwargs, &PyHost);
            self.method
                .invoke(&self.module, &call)
                .map(|v| to_py(py, &v))
                .map_err(to_py_err)
        }

        fn __repr__(&self) -> String {
            format!("<native function {}.{}>", self.module, self.method.name)
        }
    }

    // ── PyRuntime ─────────────────────────────────────────────────────────

    /// A handle on the process's Python interpreter.
    pub struct PyRuntime {
        program_name: String,
    }

    impl PyRuntime {
        pub fn program_name(&self) -> &str {
            &self.program_name
        }
    }

    impl HostCalls for PyRuntime {
        fn write(&self, stream: Stream, text: &str) -> HostResult<()> {
            Python::with_gil(|py| write_stream(py, stream, text))
        }

        fn append_search_path(&self, dir: &str) -> HostResult<bool> {
            Python::with_gil(|py| append_path(py, dir))
        }
    }

    impl Runtime for PyRuntime {
        type Object = PyObj;
        type Namespace = PyNamespace;
        type Code = PyObj;
        type Module = Py<PyModule>;

        const NAME: &'static str = "python";

        fn boot(program_name: &str) -> HostResult<Self> {
            // CPython can only be initialised once per process.
            PYTHON_INIT.get_or_init(pyo3::prepare_freethreaded_python);
            Python::with_gil(|py| py.import_bound("sys").map(|_| ()))?;
            debug!(program = program_name, "python interpreter attached");
            Ok(Self { program_name: program_name.to_owned() })
        }

        fn version(&self) -> String {
            Python::with_gil(|py| {
                let v = py.version();
                format!("Python {}", v.split_whitespace().next().unwrap_or(v))
            })
        }

        fn set_argv(&self, argv: &[String]) -> HostResult<()> {
            Python::with_gil(|py| {
                let list = PyList::new_bound(py, argv);
                py.import_bound("sys")?.setattr("argv", list)?;
                Ok(())
            })
        }

        fn enable_threads(&self) -> bool {
            // The GIL is set up by `prepare_freethreaded_python`.
            true
        }

        fn probe_site(&self) -> bool {
            Python::with_gil(|py| py.import_bound("site").is_ok())
        }

        fn probe_sys(&self) -> bool {
            Python::with_gil(|py| py.import_bound("sys").is_ok())
        }

        fn new_namespace(&self) -> HostResult<PyNamespace> {
            Python::with_gil(|py| {
                let dict = PyDict::new_bound(py);
                dict.set_item(crate::namespace::BUILTINS_KEY, py.import_bound("builtins")?)?;
                Ok(PyNamespace(dict.unbind()))
            })
        }

        fn compile(&self, source: &str, origin: &str) -> HostResult<PyObj> {
            Python::with_gil(|py| {
                let builtins = py.import_bound("builtins")?;
                match builtins.getattr("compile")?.call1((source, origin, "exec")) {
                    Ok(code) => Ok(PyObj(code.unbind())),
                    Err(e) => {
                        let message = e.to_string();
                        e.print(py);
                        Err(HostError::Compile { origin: origin.to_owned(), message })
                    }
                }
            })
        }

        fn eval(&self, code: &PyObj, namespace: &PyNamespace) -> HostResult<Option<PyObj>> {
            Python::with_gil(|py| {
                let globals = namespace.0.bind(py).clone();
                let exec = py.import_bound("builtins")?.getattr("exec")?;
                match exec.call1((code.0.bind(py).clone(), globals.clone(), globals)) {
                    Ok(v) if v.is_none() => Ok(None),
                    Ok(v) => Ok(Some(PyObj(v.unbind()))),
                    Err(e) => {
                        let message = e.to_string();
                        e.print(py);
                        Err(HostError::Eval { origin: String::new(), message })
                    }
                }
            })
        }

        fn clear_error(&self) {
            Python::with_gil(|py| {
                let _ = PyErr::take(py);
            });
        }

        fn create_module(&self, def: &ModuleDef<PyObj>) -> HostResult<Py<PyModule>> {
            Python::with_gil(|py| {
                let m = PyModule::new_bound(py, def.name())?;
                m.setattr("__doc__", def.doc())?;
                for method in def.methods() {
                    let callable = Py::new(
                        py,
                        NativeCallable { module: def.name().to_owned(), method: method.clone() },
                    )?;
                    m.setattr(method.name.as_str(), callable)?;
                }
                for (name, value) in def.constants() {
                    m.add(name.as_str(), *value)?;
                }
                // Register as sys.modules[name] so `import name` works.
                py.import_bound("sys")?
                    .getattr("modules")?
                    .set_item(def.name(), &m)?;
                Ok(m.unbind())
            })
        }

        fn release_module(&self, name: &str, module: Py<PyModule>) {
            Python::with_gil(|py| {
                let Ok(modules) = py.import_bound("sys").and_then(|s| s.getattr("modules")) else {
                    return;
                };
                if let Ok(current) = modules.get_item(name) {
                    if current.is(module.bind(py)) {
                        if let Err(e) = modules.del_item(name) {
                            warn!(module = name, error = %e, "could not unregister module");
                        }
                    }
                }
            });
        }

        fn new_sink(&self) -> HostResult<PyObj> {
            Python::with_gil(|py| {
                let sink = py.import_bound("io")?.getattr("StringIO")?.call0()?;
                Ok(PyObj(sink.unbind()))
            })
        }

        fn stream(&self, stream: Stream) -> Option<PyObj> {
            Python::with_gil(|py| {
                let obj = py.import_bound("sys").ok()?.getattr(stream.slot()).ok()?;
                if obj.is_none() { None } else { Some(PyObj(obj.unbind())) }
            })
        }

        fn install_stream(&self, stream: Stream, object: &PyObj) -> HostResult<()> {
            Python::with_gil(|py| {
                py.import_bound("sys")?.setattr(stream.slot(), object.0.bind(py))?;
                Ok(())
            })
        }

        fn finalize(&mut self) {
            // Never finalised: CPython cannot be re-initialised afterwards.
            debug!(program = %self.program_name, "detaching from python interpreter");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(all(test, feature = "python"))]
mod tests {
    use super::python_impl::*;
    use crate::bridge::{get_double_attr, get_long_attr, get_string_attr};
    use crate::error::HostError;
    use crate::module::{core_builtins, CallFlags, ModuleDef, NativeError};
    use crate::namespace::Namespace;
    use crate::runtime::{GuestObject, HostCalls, HostValue, Runtime, Stream};
    use crate::script::ScriptUnit;
    use crate::tracer::Tracer;
    use std::sync::Mutex;

    // Every test touches the one interpreter's sys module.  Acquire this
    // mutex at the top of every test.
    static TEST_MX: Mutex<()> = Mutex::new(());

    fn boot() -> (PyRuntime, Tracer<PyObj>) {
        let rt = PyRuntime::boot("python-test").unwrap();
        let mut tracer = Tracer::new();
        tracer.start(&rt).unwrap();
        (rt, tracer)
    }

    fn run(rt: &PyRuntime, ns: &Namespace<PyNamespace>, src: &str) -> Result<Option<PyObj>, HostError> {
        ScriptUnit::from_buffer(src).execute(rt, ns)
    }

    #[test]
    fn exec_assigns_into_namespace() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let (rt, mut tracer) = boot();
        let ns = Namespace::create(&rt).unwrap();
        run(&rt, &ns, "x = 40 + 2").unwrap();
        assert_eq!(ns.get("x").unwrap().as_long(), Some(42));
        assert_eq!(ns.get("__name__").unwrap().as_text().as_deref(), Some("__main__"));
        tracer.stop(&rt);
    }

    #[test]
    fn print_lands_in_capture() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let (rt, mut tracer) = boot();
        let ns = Namespace::create(&rt).unwrap();
        run(&rt, &ns, "import sys\nprint('hi')\nsys.stderr.write('warn')").unwrap();
        assert_eq!(tracer.buffer(&rt, Stream::Stdout).as_deref(), Some("hi\n"));
        assert_eq!(tracer.buffer(&rt, Stream::Stderr).as_deref(), Some("warn"));
        tracer.stop(&rt);
    }

    #[test]
    fn errors_are_printed_on_stderr() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let (rt, mut tracer) = boot();
        let ns = Namespace::create(&rt).unwrap();
        let err = run(&rt, &ns, "raise ValueError('boom')").unwrap_err();
        assert!(matches!(err, HostError::Eval { .. }));
        let stderr = tracer.buffer(&rt, Stream::Stderr).unwrap();
        assert!(stderr.contains("ValueError: boom"));

        tracer.truncate(&rt, Stream::Stderr);
        let err = run(&rt, &ns, "def (:").unwrap_err();
        assert!(matches!(err, HostError::Compile { .. }));
        assert!(tracer.buffer(&rt, Stream::Stderr).unwrap().contains("SyntaxError"));
        tracer.stop(&rt);
    }

    #[test]
    fn native_module_is_importable() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let (rt, mut tracer) = boot();
        let def = ModuleDef::<PyObj>::new("PyTestMod", "test module")
            .method("double", CallFlags::O, "", |call| {
                let n = call.args[0]
                    .as_long()
                    .ok_or_else(|| NativeError::type_error("expected int"))?;
                Ok(HostValue::Int(n * 2))
            })
            .constant("ANSWER", 42);
        let m = rt.create_module(&def).unwrap();
        let ns = Namespace::create(&rt).unwrap();
        run(&rt, &ns, "import PyTestMod\nr = PyTestMod.double(21) + PyTestMod.ANSWER").unwrap();
        assert_eq!(ns.get("r").unwrap().as_long(), Some(84));

        run(&rt, &ns, "try:\n    PyTestMod.double('x')\nexcept TypeError as e:\n    msg = str(e)").unwrap();
        assert_eq!(ns.get("msg").unwrap().as_text().as_deref(), Some("expected int"));

        run(&rt, &ns, "try:\n    PyTestMod.double(1, k=2)\nexcept TypeError as e:\n    kw = str(e)").unwrap();
        assert!(ns.get("kw").unwrap().as_text().unwrap().contains("keyword"));

        rt.release_module("PyTestMod", m);
        let err = run(&rt, &ns, "import sys\nsys.modules['PyTestMod']");
        assert!(err.is_err());
        tracer.stop(&rt);
    }

    #[test]
    fn syspath_append_through_core_builtins() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let (rt, mut tracer) = boot();
        let m = rt.create_module(&core_builtins()).unwrap();
        let ns = Namespace::create(&rt).unwrap();
        run(&rt, &ns, "import CoreBuiltins, sys\nCoreBuiltins.syspathAppend('/tmp/embedhost-py')\nok = '/tmp/embedhost-py' in sys.path").unwrap();
        assert_eq!(ns.get("ok").unwrap().as_long(), Some(1));
        assert!(!rt.append_search_path("/tmp/embedhost-py").unwrap());

        run(&rt, &ns, "try:\n    CoreBuiltins.syspathAppend(3)\nexcept ValueError as e:\n    msg = str(e)").unwrap();
        assert_eq!(
            ns.get("msg").unwrap().as_text().as_deref(),
            Some("Method expects one string argument")
        );
        rt.release_module("CoreBuiltins", m);
        tracer.stop(&rt);
    }

    #[test]
    fn bridge_reads_instance_fields() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let (rt, mut tracer) = boot();
        let ns = Namespace::create(&rt).unwrap();
        run(
            &rt,
            &ns,
            "class R:\n    longField = 42\n    floatField = 2.5\n    stringField = 'h\u{e9}llo'\nobj = R()",
        )
        .unwrap();
        let obj = ns.get("obj").unwrap();
        assert_eq!(get_long_attr(Some(&obj), "longField", 0), 42);
        assert_eq!(get_double_attr(Some(&obj), "floatField", 0.0), 2.5);
        assert_eq!(get_string_attr(Some(&obj), "stringField").as_deref(), Some("h\u{e9}llo"));
        assert_eq!(get_long_attr(Some(&obj), "floatField", -1), -1);
        tracer.stop(&rt);
    }

    #[test]
    fn stop_restores_original_streams() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let rt = PyRuntime::boot("python-test").unwrap();
        let before = rt.stream(Stream::Stdout).unwrap();
        let mut tracer = Tracer::new();
        tracer.start(&rt).unwrap();
        assert_eq!(rt.stream(Stream::Stdout).unwrap().type_name(), "StringIO");
        tracer.stop(&rt);
        let after = rt.stream(Stream::Stdout).unwrap();
        assert_eq!(after.type_name(), before.type_name());
    }

    #[test]
    fn buffer_units_have_empty_origin() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let (rt, mut tracer) = boot();
        let ns = Namespace::create(&rt).unwrap();
        run(&rt, &ns, "import sys\nname = sys._getframe().f_code.co_filename").unwrap();
        assert_eq!(ns.get("name").unwrap().as_text().as_deref(), Some(""));
        tracer.stop(&rt);
    }

    #[test]
    fn version_and_probes() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let rt = PyRuntime::boot("python-test").unwrap();
        assert!(rt.version().starts_with("Python 3"));
        assert!(rt.probe_sys());
        rt.set_argv(&["prog".to_owned(), "a".to_owned()]).unwrap();
        let ns = Namespace::create(&rt).unwrap();
        run(&rt, &ns, "import sys\nn = len(sys.argv)").unwrap();
        assert_eq!(ns.get("n").unwrap().as_long(), Some(2));
    }
}
