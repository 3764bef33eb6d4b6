use embedhost::bridge::{get_double_attr, get_long_attr, get_string_attr};
use embedhost::cli;
use embedhost::{CallFlags, GuestObject, HostValue, ModuleDef, NativeError, RunResult};
use embedhost::{Session, SessionConfig, Stream};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "lua")]
type Backend = embedhost::lua::LuaRuntime;

#[cfg(all(feature = "python", not(feature = "lua")))]
type Backend = embedhost::python::PyRuntime;

#[cfg(not(any(feature = "lua", feature = "python")))]
compile_error!("enable the `lua` or `python` feature to build the embedhost binary");

const USAGE: &str = "Usage: embedhost [-qd] [-c<code>] [-L<dir>] [--] [<file>...]";

/// The `Test` module: `my_method(obj)` prints three typed fields of `obj`.
fn test_module<O: GuestObject>() -> ModuleDef<O> {
    ModuleDef::<O>::new("Test", "My first test module")
        .method("my_method", CallFlags::VARARGS, "Some documentation", |call| {
            let [obj] = call.args.as_slice() else {
                return Err(NativeError::type_error("Method expects one object argument"));
            };
            let text = get_string_attr(Some(obj), "stringField").unwrap_or_default();
            call.write(
                Stream::Stdout,
                &format!("longField: {}\n", get_long_attr(Some(obj), "longField", 0)),
            )?;
            call.write(
                Stream::Stdout,
                &format!("floatField: {:.6}\n", get_double_attr(Some(obj), "floatField", 0.0)),
            )?;
            call.write(Stream::Stdout, &format!("stringField: {text}\n"))?;
            Ok(HostValue::Nil)
        })
        .constant("DEBUG", 1)
}

fn report<O>(result: &RunResult<O>, quiet: bool) {
    if quiet {
        print!("{}", result.stdout);
    } else {
        print!("Buffer from stdout:\n{}", result.stdout);
        print!("\nBuffer from stderr:\n{}", result.stderr);
    }
}

fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("embedhost: {e}");
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,embedhost=info"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let argv: Vec<String> = std::env::args().collect();
    let mut config = SessionConfig::new()
        .program_name(argv.first().cloned().unwrap_or_default())
        .argv(argv)
        .module(test_module());
    for dir in &args.search_paths {
        config = config.search_path(dir);
    }

    let session = match Session::<Backend>::init(config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "interpreter init failed");
            std::process::exit(1);
        }
    };

    let mut failed = false;

    if let Some(code) = &args.code {
        let result = session.run_buffer(code);
        failed |= !result.is_ok();
        report(&result, args.quiet);
    }

    for path in &args.files {
        match session.run_file(path) {
            Ok(result) => {
                failed |= !result.is_ok();
                report(&result, args.quiet);
            }
            Err(e) => {
                eprintln!("embedhost: {e}");
                failed = true;
            }
        }
    }

    session.shutdown();
    std::process::exit(if failed { 2 } else { 0 });
}
