//! # Bootstrap Payload
//!
//! Everything an isolate needs to serve calls: the callable's module, the
//! dependencies to link ahead of it, and the name of the function to call.
//!
//! Building a payload is pure; nothing is compiled or read from disk until an
//! isolate runs it with [`BootstrapPayload::serve`]. Serving follows a fixed
//! order:
//!
//! 1. Load each dependency in order, registering its exports under its name so
//!    the callable's module can import them. Any failure is reported once as an
//!    init failure of kind `DependencyLoadFailure`.
//! 2. Compile and instantiate the callable's module and resolve the entry
//!    function. Any failure is reported once as an init failure of kind
//!    `FunctionInitializationFailure`.
//! 3. Answer every well-formed request with exactly one response. Malformed
//!    requests are dropped with a diagnostic.
//!
//! After an init failure the isolate still reads its port until it closes,
//! dropping whatever arrives, so requests sent before the caller has seen the
//! failure are settled by the broadcast rather than refused.

use std::any::Any;
use std::fmt;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;

use serde_json::Value;
use wasmtime::Config;
use wasmtime::Engine;
use wasmtime::ExternType;
use wasmtime::Func;
use wasmtime::Linker;
use wasmtime::Module;
use wasmtime::Store;
use wasmtime::Trap;
use wasmtime::Val;
use wasmtime::ValType;
use wasmtime::WasmBacktrace;

use isowire::ErrorDescriptor;
use isowire::Response;
use isowire::descriptor::DEFAULT_KIND;
use isowire::descriptor::DEPENDENCY_LOAD_FAILURE;
use isowire::descriptor::FUNCTION_INITIALIZATION_FAILURE;

/// Outcome of isolate-side work, already normalized for the wire.
pub type Outcome<T> = std::result::Result<T, ErrorDescriptor>;

/// The callable's module, as text or as compiled bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    /// WebAssembly text format.
    Text(String),
    /// A binary WebAssembly module.
    Binary(Vec<u8>),
}

impl Source {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Source::Text(text) => text.as_bytes(),
            Source::Binary(bytes) => bytes,
        }
    }
}

/// A parsed dependency locator: `path`, `file://path`, or `name=path`.
///
/// Without an explicit name, the file stem is used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub path: PathBuf,
}

impl Dependency {
    pub fn parse(locator: &str) -> std::result::Result<Self, String> {
        let (name, path) = match locator.split_once('=') {
            Some((name, path)) => (Some(name.trim()), path.trim()),
            None => (None, locator.trim()),
        };
        let path = path.strip_prefix("file://").unwrap_or(path);
        if path.is_empty() {
            return Err(format!("dependency locator `{}` names no file", locator));
        }

        let path = PathBuf::from(path);
        let name = match name {
            Some(name) => name.to_string(),
            None => path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
                .to_string(),
        };
        if name.is_empty() {
            return Err(format!("dependency locator `{}` has no module name", locator));
        }

        Ok(Self { name, path })
    }
}

/// A self-contained program for one isolate.
#[derive(Clone, Debug)]
pub struct BootstrapPayload {
    source: Source,
    dependencies: Vec<String>,
    entry: Option<String>,
}

/// Builds the payload for a callable and its dependency locators.
///
/// Locators are kept verbatim; they are only interpreted inside the isolate.
pub fn build(source: Source, dependencies: Vec<String>) -> BootstrapPayload {
    BootstrapPayload {
        source,
        dependencies,
        entry: None,
    }
}

impl BootstrapPayload {
    /// Names the exported function to call. Without one, the module must
    /// export exactly one function.
    pub fn with_entry(mut self, entry: Option<String>) -> Self {
        self.entry = entry;
        self
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    /// Runs the payload against a port until the port closes.
    pub fn serve(&self, engine: &Engine, port: &mut dyn Port) {
        let mut guest = match Guest::load(engine, self) {
            Ok(guest) => guest,
            Err(descriptor) => {
                tracing::error!(kind = %descriptor.kind, "isolate failed to initialize: {}", descriptor.message);
                post(port, &Response::init_failure(descriptor));
                // keep the queue open so late calls wait for the broadcast
                let mut dropped = 0usize;
                while port.recv().is_some() {
                    dropped += 1;
                }
                tracing::debug!(dropped, "isolate port closed after init failure");
                return;
            }
        };

        while let Some(bytes) = port.recv() {
            let request = match isowire::decode_request(&bytes) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(error = %e, "isolate received malformed message");
                    continue;
                }
            };

            let response = match guest.invoke(&request.args) {
                Ok(result) => Response::ok(request.id, result),
                Err(error) => Response::err(request.id, error),
            };
            post(port, &response);
        }
    }
}

impl fmt::Display for BootstrapPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::Text(text) => writeln!(f, "{}", text)?,
            Source::Binary(bytes) => writeln!(f, "<binary module, {} bytes>", bytes.len())?,
        }
        write!(
            f,
            "entry: {}, dependencies: {:?}",
            self.entry.as_deref().unwrap_or("<sole export>"),
            self.dependencies
        )
    }
}

/// The isolate's end of a channel.
pub trait Port {
    /// Blocks until the next inbound message, or `None` once the channel closes.
    fn recv(&mut self) -> Option<Vec<u8>>;

    fn post(&mut self, message: Vec<u8>);
}

fn post(port: &mut dyn Port, response: &Response) {
    match isowire::encode_response(response) {
        Ok(bytes) => port.post(bytes),
        Err(e) => tracing::warn!(id = %response.id, error = %e, "isolate could not encode response"),
    }
}

/// Creates an engine for running payloads.
///
/// An interruptible engine traps running code once its epoch is bumped.
pub fn engine(interruptible: bool) -> wasmtime::Result<Engine> {
    let mut config = Config::new();
    config.epoch_interruption(interruptible);
    Engine::new(&config)
}

/// An instantiated callable, ready to be invoked.
pub struct Guest {
    store: Store<()>,
    func: Func,
    params: Vec<ValType>,
    results: Vec<ValType>,
}

impl Guest {
    /// Loads dependencies, instantiates the callable's module and resolves its entry.
    pub fn load(engine: &Engine, payload: &BootstrapPayload) -> Outcome<Self> {
        let mut store = Store::new(engine, ());
        store.set_epoch_deadline(1);
        let mut linker = Linker::new(engine);

        for locator in &payload.dependencies {
            link_dependency(engine, &mut store, &mut linker, locator).map_err(|e| {
                ErrorDescriptor::new(DEPENDENCY_LOAD_FAILURE, format!("Failed to load dependencies: {}", e))
            })?;
        }

        let module = Module::new(engine, payload.source.as_bytes())
            .map_err(|e| init_failure(format!("{:#}", e)))?;
        let entry = resolve_entry(&module, payload.entry.as_deref()).map_err(init_failure)?;
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| init_failure(format!("{:#}", e)))?;
        let func = instance
            .get_func(&mut store, &entry)
            .ok_or_else(|| init_failure(format!("export `{}` is not a function", entry)))?;

        let ty = func.ty(&store);
        let params: Vec<ValType> = ty.params().collect();
        let results: Vec<ValType> = ty.results().collect();
        if let Some(unsupported) = params.iter().chain(&results).find(|ty| type_name(ty).is_none()) {
            return Err(init_failure(format!(
                "entry `{}` uses a type that cannot cross the channel: {:?}",
                entry, unsupported
            )));
        }

        Ok(Self {
            store,
            func,
            params,
            results,
        })
    }

    /// Calls the entry function with JSON arguments.
    ///
    /// Whatever goes wrong, trap, engine error or panic, comes back as a descriptor.
    pub fn invoke(&mut self, args: &[Value]) -> Outcome<Value> {
        let params = to_params(args, &self.params)?;
        let mut results = vec![Val::I32(0); self.results.len()];

        let called = panic::catch_unwind(AssertUnwindSafe(|| {
            self.func.call(&mut self.store, &params, &mut results)
        }));

        match called {
            Ok(Ok(())) => Ok(from_results(&results)),
            Ok(Err(e)) => Err(describe_error(&e)),
            Err(payload) => Err(describe_panic(payload.as_ref())),
        }
    }
}

fn link_dependency(
    engine: &Engine,
    store: &mut Store<()>,
    linker: &mut Linker<()>,
    locator: &str,
) -> std::result::Result<(), String> {
    let dependency = Dependency::parse(locator)?;
    let module = Module::from_file(engine, &dependency.path)
        .map_err(|e| format!("{}: {:#}", locator, e))?;
    let instance = linker
        .instantiate(&mut *store, &module)
        .map_err(|e| format!("{}: {:#}", locator, e))?;
    linker
        .instance(&mut *store, &dependency.name, instance)
        .map_err(|e| format!("{}: {:#}", locator, e))?;

    tracing::debug!(name = %dependency.name, path = %dependency.path.display(), "linked dependency");
    Ok(())
}

fn resolve_entry(module: &Module, entry: Option<&str>) -> std::result::Result<String, String> {
    let funcs: Vec<&str> = module
        .exports()
        .filter(|export| matches!(export.ty(), ExternType::Func(_)))
        .map(|export| export.name())
        .collect();

    match (entry, funcs.as_slice()) {
        (Some(name), funcs) if funcs.contains(&name) => Ok(name.to_string()),
        (Some(name), _) => Err(format!("module does not export a function named `{}`", name)),
        (None, [only]) => Ok(only.to_string()),
        (None, []) => Err("module exports no function".into()),
        (None, many) => Err(format!(
            "module exports {} functions ({}); name the one to call as the entry",
            many.len(),
            many.join(", ")
        )),
    }
}

fn init_failure(cause: String) -> ErrorDescriptor {
    ErrorDescriptor::new(
        FUNCTION_INITIALIZATION_FAILURE,
        format!(
            "Failed to initialize the function in the isolate. The source must be a \
             WebAssembly module exporting the function to call. Original error: {}",
            cause
        ),
    )
}

fn type_error(message: String) -> ErrorDescriptor {
    ErrorDescriptor::new("TypeError", message)
}

fn type_name(ty: &ValType) -> Option<&'static str> {
    match ty {
        ValType::I32 => Some("i32"),
        ValType::I64 => Some("i64"),
        ValType::F32 => Some("f32"),
        ValType::F64 => Some("f64"),
        _ => None,
    }
}

fn to_params(args: &[Value], types: &[ValType]) -> Outcome<Vec<Val>> {
    if args.len() != types.len() {
        return Err(type_error(format!(
            "expected {} argument(s), got {}",
            types.len(),
            args.len()
        )));
    }

    args.iter()
        .zip(types)
        .enumerate()
        .map(|(index, (arg, ty))| {
            to_val(arg, ty).ok_or_else(|| {
                type_error(format!(
                    "argument {} ({}) is not a valid {}",
                    index,
                    arg,
                    type_name(ty).unwrap_or("value")
                ))
            })
        })
        .collect()
}

fn to_val(arg: &Value, ty: &ValType) -> Option<Val> {
    match ty {
        ValType::I32 => integer(arg).and_then(|n| i32::try_from(n).ok()).map(Val::I32),
        ValType::I64 => integer(arg).map(Val::I64),
        ValType::F32 => number(arg).and_then(narrow).map(|n| Val::F32(n.to_bits())),
        ValType::F64 => number(arg).map(|n| Val::F64(n.to_bits())),
        _ => None,
    }
}

fn integer(arg: &Value) -> Option<i64> {
    match arg {
        Value::Bool(flag) => Some(i64::from(*flag)),
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        _ => None,
    }
}

fn number(arg: &Value) -> Option<f64> {
    match arg {
        Value::Bool(flag) => Some(f64::from(u8::from(*flag))),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// `f64` to `f32`, refusing finite values that would overflow to infinity.
fn narrow(n: f64) -> Option<f32> {
    let narrowed = n as f32;
    (narrowed.is_finite() || !n.is_finite()).then_some(narrowed)
}

fn from_results(results: &[Val]) -> Value {
    match results {
        [] => Value::Null,
        [only] => from_val(only),
        many => Value::Array(many.iter().map(from_val).collect()),
    }
}

fn from_val(val: &Val) -> Value {
    match val {
        Val::I32(n) => Value::from(*n),
        Val::I64(n) => Value::from(*n),
        Val::F32(bits) => float(f64::from(f32::from_bits(*bits))),
        Val::F64(bits) => float(f64::from_bits(*bits)),
        _ => Value::Null,
    }
}

// JSON has no NaN or infinity
fn float(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Normalizes an engine error raised by a call.
pub(crate) fn describe_error(error: &wasmtime::Error) -> ErrorDescriptor {
    let Some(trap) = error.downcast_ref::<Trap>() else {
        return ErrorDescriptor::new(DEFAULT_KIND, format!("{:#}", error));
    };

    let descriptor = ErrorDescriptor::new("RuntimeError", trap.to_string());
    match error.downcast_ref::<WasmBacktrace>() {
        Some(backtrace) => descriptor.with_trace(backtrace.to_string()),
        None => descriptor,
    }
}

/// Normalizes a panic payload.
pub(crate) fn describe_panic(payload: &(dyn Any + Send)) -> ErrorDescriptor {
    if let Some(message) = payload.downcast_ref::<&str>() {
        ErrorDescriptor::new(DEFAULT_KIND, *message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        ErrorDescriptor::new(DEFAULT_KIND, message.clone())
    } else {
        ErrorDescriptor::unknown()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use serde_json::json;

    use super::*;

    const ADD: &str = r#"
        (module
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))
    "#;

    const TWO_EXPORTS: &str = r#"
        (module
            (func (export "one") (result i32) i32.const 1)
            (func (export "two") (result i32) i32.const 2))
    "#;

    const TRAPS: &str = r#"
        (module
            (func (export "boom") unreachable))
    "#;

    const MIXED: &str = r#"
        (module
            (func (export "mix") (param i64 f64) (result f64 i64)
                local.get 1
                local.get 0))
    "#;

    struct VecPort {
        inbound: VecDeque<Vec<u8>>,
        outbound: Vec<Response>,
    }

    impl VecPort {
        fn new(inbound: &[&str]) -> Self {
            Self {
                inbound: inbound.iter().map(|message| message.as_bytes().to_vec()).collect(),
                outbound: Vec::new(),
            }
        }
    }

    impl Port for VecPort {
        fn recv(&mut self) -> Option<Vec<u8>> {
            self.inbound.pop_front()
        }

        fn post(&mut self, message: Vec<u8>) {
            self.outbound.push(isowire::decode_response(&message).unwrap());
        }
    }

    fn load(source: &str, entry: Option<&str>) -> Outcome<Guest> {
        let engine = engine(false).unwrap();
        let payload = build(Source::Text(source.into()), Vec::new()).with_entry(entry.map(str::to_string));
        Guest::load(&engine, &payload)
    }

    #[test]
    fn test_dependency_locators() {
        let dep = Dependency::parse("deps/math.wat").unwrap();
        assert_eq!(dep.name, "math");
        assert_eq!(dep.path, PathBuf::from("deps/math.wat"));

        let dep = Dependency::parse("file:///opt/lib/strings.wasm").unwrap();
        assert_eq!(dep.name, "strings");
        assert_eq!(dep.path, PathBuf::from("/opt/lib/strings.wasm"));

        let dep = Dependency::parse("env = ./a/b.wat").unwrap();
        assert_eq!(dep.name, "env");
        assert_eq!(dep.path, PathBuf::from("./a/b.wat"));

        assert!(Dependency::parse("").is_err());
        assert!(Dependency::parse("=x.wat").is_err());
        assert!(Dependency::parse("name=").is_err());
    }

    #[test]
    fn test_build_keeps_locators_verbatim() {
        let deps = vec!["file://a.wat".to_string(), "b=c.wasm".to_string()];
        let payload = build(Source::Text(ADD.into()), deps.clone());
        assert_eq!(payload.dependencies(), deps.as_slice());
        assert_eq!(payload.entry(), None);
        assert!(payload.to_string().contains("<sole export>"));
    }

    #[test]
    fn test_guest_invokes_sole_export() {
        let mut guest = load(ADD, None).unwrap();
        assert_eq!(guest.invoke(&[json!(5), json!(7)]).unwrap(), json!(12));
        assert_eq!(guest.invoke(&[json!(-3), json!(true)]).unwrap(), json!(-2));
        assert_eq!(guest.invoke(&[json!(2.0), json!(2)]).unwrap(), json!(4));
    }

    #[test]
    fn test_guest_entry_selection() {
        let err = load(TWO_EXPORTS, None).err().unwrap();
        assert_eq!(err.kind, FUNCTION_INITIALIZATION_FAILURE);
        assert!(err.message.contains("one, two"));

        let mut guest = load(TWO_EXPORTS, Some("two")).unwrap();
        assert_eq!(guest.invoke(&[]).unwrap(), json!(2));

        let err = load(TWO_EXPORTS, Some("three")).err().unwrap();
        assert!(err.message.contains("`three`"));
    }

    #[test]
    fn test_guest_rejects_bad_source() {
        let err = load("(module (func", None).err().unwrap();
        assert_eq!(err.kind, FUNCTION_INITIALIZATION_FAILURE);
        assert!(err.message.starts_with("Failed to initialize the function"));
    }

    #[test]
    fn test_guest_rejects_missing_dependency() {
        let engine = engine(false).unwrap();
        let payload = build(Source::Text(ADD.into()), vec!["/nonexistent/dep.wat".into()]);
        let err = Guest::load(&engine, &payload).err().unwrap();
        assert_eq!(err.kind, DEPENDENCY_LOAD_FAILURE);
        assert!(err.message.starts_with("Failed to load dependencies: /nonexistent/dep.wat"));
    }

    #[test]
    fn test_guest_argument_errors() {
        let mut guest = load(ADD, None).unwrap();

        let err = guest.invoke(&[json!(1)]).unwrap_err();
        assert_eq!(err.kind, "TypeError");
        assert!(err.message.contains("expected 2 argument(s), got 1"));

        let err = guest.invoke(&[json!("1"), json!(2)]).unwrap_err();
        assert!(err.message.contains("argument 0"));

        let err = guest.invoke(&[json!(1.5), json!(2)]).unwrap_err();
        assert_eq!(err.kind, "TypeError");

        let err = guest.invoke(&[json!(i64::MAX), json!(2)]).unwrap_err();
        assert_eq!(err.kind, "TypeError");
    }

    #[test]
    fn test_guest_multi_value_results() {
        let mut guest = load(MIXED, None).unwrap();
        assert_eq!(guest.invoke(&[json!(9), json!(0.5)]).unwrap(), json!([0.5, 9]));
    }

    #[test]
    fn test_guest_trap_is_runtime_error() {
        let mut guest = load(TRAPS, None).unwrap();
        let err = guest.invoke(&[]).unwrap_err();
        assert_eq!(err.kind, "RuntimeError");
        assert!(err.message.contains("unreachable"));

        // the guest keeps serving after a trap
        assert_eq!(guest.invoke(&[]).unwrap_err().kind, "RuntimeError");
    }

    #[test]
    fn test_describe_panic_shapes() {
        let desc = describe_panic(&"static message");
        assert_eq!(desc, ErrorDescriptor::new("Error", "static message"));

        let desc = describe_panic(&String::from("owned message"));
        assert_eq!(desc.message, "owned message");

        let desc = describe_panic(&42_u32);
        assert_eq!(desc, ErrorDescriptor::unknown());
    }

    #[test]
    fn test_describe_error_non_trap() {
        let desc = describe_error(&wasmtime::Error::msg("host said no"));
        assert_eq!(desc.kind, "Error");
        assert_eq!(desc.message, "host said no");
    }

    #[test]
    fn test_serve_answers_each_request_once() {
        let engine = engine(false).unwrap();
        let payload = build(Source::Text(ADD.into()), Vec::new());
        let mut port = VecPort::new(&[
            r#"{"id": "call-1", "args": [1, 2]}"#,
            r#"{"args": [1, 2]}"#,
            r#"{"id": "call-2", "args": "nope"}"#,
            r#"{"id": "call-3", "args": [1]}"#,
        ]);

        payload.serve(&engine, &mut port);

        assert_eq!(port.outbound.len(), 2);
        assert_eq!(port.outbound[0], Response::ok("call-1", json!(3)));
        assert_eq!(port.outbound[1].id, "call-3");
        assert_eq!(port.outbound[1].error.as_ref().unwrap().kind, "TypeError");
    }

    #[test]
    fn test_serve_reports_init_failure_once() {
        let engine = engine(false).unwrap();
        let payload = build(Source::Text("not a module".into()), Vec::new());
        let mut port = VecPort::new(&[r#"{"id": "call-1", "args": []}"#]);

        payload.serve(&engine, &mut port);

        assert_eq!(port.outbound.len(), 1);
        assert!(port.outbound[0].is_init_failure());
        assert_eq!(
            port.outbound[0].error.as_ref().unwrap().kind,
            FUNCTION_INITIALIZATION_FAILURE
        );
    }

    #[test]
    fn test_serve_reads_until_closed_after_init_failure() {
        let engine = engine(false).unwrap();
        let payload = build(Source::Text(ADD.into()), vec!["/nonexistent/dep.wat".into()]);
        let mut port = VecPort::new(&[
            r#"{"id": "call-1", "args": [1, 2]}"#,
            r#"{"id": "call-2", "args": [3, 4]}"#,
        ]);

        payload.serve(&engine, &mut port);

        assert!(port.inbound.is_empty());
        assert_eq!(port.outbound.len(), 1);
        assert_eq!(port.outbound[0].error.as_ref().unwrap().kind, DEPENDENCY_LOAD_FAILURE);
    }

    #[test]
    fn test_out_of_range_numbers_are_type_errors() {
        const WIDE: &str = r#"
            (module
                (func (export "wide") (param i64 f32) (result i64)
                    local.get 0))
        "#;
        let mut guest = load(WIDE, None).unwrap();

        // 2^63 does not fit an i64
        let err = guest.invoke(&[json!(9223372036854775808.0_f64), json!(1.0)]).unwrap_err();
        assert_eq!(err.kind, "TypeError");
        assert!(err.message.contains("argument 0"));

        let err = guest.invoke(&[json!(1), json!(1.0e300)]).unwrap_err();
        assert_eq!(err.kind, "TypeError");
        assert!(err.message.contains("argument 1"));

        assert_eq!(guest.invoke(&[json!(-5), json!(1.5)]).unwrap(), json!(-5));
        assert_eq!(guest.invoke(&[json!(i64::MIN), json!(0)]).unwrap(), json!(i64::MIN));
    }
}
