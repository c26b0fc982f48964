//! In-process interpreter sandbox for script languages
//!
//! Submissions run inside an embedded QuickJS runtime with a hard memory
//! ceiling and a wall-clock deadline enforced by the runtime's interrupt
//! handler, so a busy loop is forcibly aborted rather than cooperatively
//! cancelled. There is no host filesystem or network surface: the runtime has
//! none built in, `require` is stubbed to an explicit allow-list, stdout and
//! stderr are captured into in-memory buffers, and `readLine()` feeds the
//! request input line by line.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Context, Ctx, FromJs, Function, Object, Runtime};

use super::{ExecStatus, ExecutionRequest, ExecutionResult};

/// Modules resolvable from the sandboxed `require`; everything else throws.
/// Kept empty until a vetted, side-effect-free utility module is needed.
const ALLOWED_MODULES: &[&str] = &[];

/// Installed before user code; closes off module loading
const SANDBOX_PRELUDE: &str = r#"
(function () {
    const allowed = globalThis.__allowedModules || [];
    delete globalThis.__allowedModules;
    globalThis.require = function (name) {
        if (allowed.indexOf(String(name)) === -1) {
            throw new Error("module '" + name + "' is not available in the sandbox");
        }
        throw new Error("module '" + name + "' has no sandbox implementation");
    };
})();
"#;

pub(super) async fn execute(request: &ExecutionRequest) -> ExecutionResult {
    let request = request.clone();
    let started = Instant::now();
    match tokio::task::spawn_blocking(move || run_sandboxed(&request)).await {
        Ok(result) => result,
        Err(e) => ExecutionResult::system_error(
            format!("Interpreter sandbox task failed: {e}"),
            started.elapsed().as_millis() as u64,
        ),
    }
}

/// Blocking execution of one request inside a fresh runtime
pub fn run_sandboxed(request: &ExecutionRequest) -> ExecutionResult {
    let runtime = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            return ExecutionResult::system_error(format!("Failed to create sandbox runtime: {e}"), 0);
        }
    };

    runtime.set_memory_limit(request.memory_limit_mb as usize * 1024 * 1024);

    // The interrupt handler is polled by the engine mid-execution, which is
    // what makes the timeout non-cooperative.
    let deadline = Instant::now() + Duration::from_millis(request.time_limit_ms);
    runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));

    let context = match Context::full(&runtime) {
        Ok(ctx) => ctx,
        Err(e) => {
            return ExecutionResult::system_error(format!("Failed to create sandbox context: {e}"), 0);
        }
    };

    let stdout = Rc::new(RefCell::new(String::new()));
    let stderr = Rc::new(RefCell::new(String::new()));
    let input_lines: VecDeque<String> = request.input.lines().map(str::to_string).collect();
    let input_lines = Rc::new(RefCell::new(input_lines));

    // Timing is measured around the eval call itself, independent of the
    // sandbox deadline, so near-timeout runs still report a real duration.
    let started = Instant::now();
    let run: Result<Result<(), String>, rquickjs::Error> = context.with(|ctx| {
        install_globals(&ctx, stdout.clone(), stderr.clone(), input_lines.clone())?;
        ctx.eval::<(), _>(SANDBOX_PRELUDE)?;
        Ok(match ctx.eval::<(), _>(request.source_code.as_bytes()) {
            Ok(()) => Ok(()),
            Err(rquickjs::Error::Exception) => Err(caught_message(&ctx)),
            Err(e) => Err(e.to_string()),
        })
    });
    let execution_time_ms = started.elapsed().as_millis() as u64;

    if Instant::now() >= deadline {
        return ExecutionResult {
            output: stdout.borrow().clone(),
            error: Some(format!("Time limit exceeded after {}ms", request.time_limit_ms)),
            execution_time_ms,
            memory_used_kb: None,
            status: ExecStatus::Timeout,
        };
    }

    match run {
        Ok(Ok(())) => ExecutionResult {
            output: stdout.borrow().clone(),
            error: None,
            execution_time_ms,
            memory_used_kb: None,
            status: ExecStatus::Completed,
        },
        Ok(Err(message)) => {
            let mut error = message;
            let captured = stderr.borrow();
            if !captured.is_empty() {
                error.push('\n');
                error.push_str(captured.trim_end());
            }
            ExecutionResult {
                output: stdout.borrow().clone(),
                error: Some(error),
                execution_time_ms,
                memory_used_kb: None,
                status: ExecStatus::RuntimeError,
            }
        }
        Err(e) => ExecutionResult::system_error(
            format!("Sandbox setup failed: {e}"),
            execution_time_ms,
        ),
    }
}

fn install_globals(
    ctx: &Ctx<'_>,
    stdout: Rc<RefCell<String>>,
    stderr: Rc<RefCell<String>>,
    input_lines: Rc<RefCell<VecDeque<String>>>,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let out = stdout.clone();
    let log = Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
        append_line(&out, &args);
    })?;

    let err = stderr.clone();
    let error = Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
        append_line(&err, &args);
    })?;

    let console = Object::new(ctx.clone())?;
    console.set("log", log.clone())?;
    console.set("info", log.clone())?;
    console.set("warn", error.clone())?;
    console.set("error", error)?;
    globals.set("console", console)?;
    globals.set("print", log)?;

    let read_line = Function::new(ctx.clone(), move || -> Option<String> {
        input_lines.borrow_mut().pop_front()
    })?;
    globals.set("readLine", read_line.clone())?;
    globals.set("readline", read_line)?;

    globals.set("__allowedModules", ALLOWED_MODULES.to_vec())?;

    Ok(())
}

fn append_line(buffer: &Rc<RefCell<String>>, args: &[Coerced<String>]) {
    let mut buf = buffer.borrow_mut();
    let line = args
        .iter()
        .map(|a| a.0.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    buf.push_str(&line);
    buf.push('\n');
}

/// Formats the pending exception left behind by a failed eval
fn caught_message(ctx: &Ctx<'_>) -> String {
    let caught = ctx.catch();
    Coerced::<String>::from_js(ctx, caught)
        .map(|c| c.0)
        .unwrap_or_else(|_| "uncaught exception".to_string())
}
