//! Per-invocation QuickJS execution.

use std::{
    path::{Path, PathBuf},
    rc::Rc,
    time::{Duration, Instant},
};

use {
    rquickjs::{
        CatchResultExt, CaughtError, Context, Ctx, Runtime, convert::Coerced, prelude::Func,
    },
    serde_json::{Map, Value},
    tokio::runtime::Handle,
    tracing::{debug, warn},
};

use crate::{
    bridge::Bridge, capabilities::Capabilities, error::ExecutionError,
    transport::TransportContext,
};

/// Global holding the parameter bag inside the guest.
pub const PARAMS_GLOBAL: &str = "nyanAllParams";

const NATIVE_HOOK: &str = "__nyanHost";
const PRELUDE: &str = include_str!("prelude.js");

/// Extra time granted to the blocking task beyond the guest deadline before
/// the caller gives up on it.
const DEADLINE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    /// Heap limit in bytes; `0` leaves QuickJS unbounded.
    pub memory_limit: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            memory_limit: 64 * 1024 * 1024,
        }
    }
}

/// One script invocation.
pub struct ScriptRequest<'a> {
    /// Operation name, used for log context.
    pub operation: &'a str,
    /// Target script, relative to the deployment root.
    pub script: &'a Path,
    /// Per-operation includes, evaluated after the shared ones.
    pub includes: &'a [PathBuf],
    pub params: &'a Map<String, Value>,
    pub transport: TransportContext,
}

/// Runs scripts from a deployment root. Holds no per-call state: every
/// [`execute`](Self::execute) builds a fresh runtime and context.
pub struct ExecutionHost {
    root: PathBuf,
    includes: Vec<PathBuf>,
    capabilities: Capabilities,
    limits: ExecutionLimits,
}

impl ExecutionHost {
    pub fn new(
        root: impl Into<PathBuf>,
        includes: Vec<PathBuf>,
        capabilities: Capabilities,
        limits: ExecutionLimits,
    ) -> Self {
        Self {
            root: root.into(),
            includes,
            capabilities,
            limits,
        }
    }

    /// Read a file relative to the deployment root.
    pub async fn read_source(&self, relative: &Path) -> Result<String, ExecutionError> {
        let path = self.root.join(relative);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ExecutionError::ScriptUnreadable { path, source })
    }

    /// Shared includes, then per-operation includes, then the script.
    async fn assemble(&self, script: &Path, includes: &[PathBuf]) -> Result<String, ExecutionError> {
        let mut source = String::new();
        for include in self.includes.iter().chain(includes) {
            source.push_str(&self.read_source(include).await?);
            source.push('\n');
        }
        source.push_str(&self.read_source(script).await?);
        Ok(source)
    }

    /// Run a script and return the string value of its final expression.
    pub async fn execute(&self, request: ScriptRequest<'_>) -> Result<String, ExecutionError> {
        let started = Instant::now();
        let source = self.assemble(request.script, request.includes).await?;
        let params = serde_json::to_string(request.params)
            .map_err(|e| ExecutionError::Engine(format!("parameter encoding: {e}")))?;
        let bridge = Bridge::new(
            Handle::current(),
            self.capabilities.clone(),
            request.transport,
            request.operation,
        );
        let limits = self.limits;

        let task =
            tokio::task::spawn_blocking(move || run_isolated(&source, &params, bridge, limits));
        let result = match tokio::time::timeout(limits.timeout + DEADLINE_GRACE, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(ExecutionError::Engine(join.to_string())),
            Err(_) => Err(ExecutionError::Timeout(limits.timeout)),
        };

        match &result {
            Ok(raw) => debug!(
                operation = request.operation,
                elapsed_ms = started.elapsed().as_millis() as u64,
                output_len = raw.len(),
                "script finished"
            ),
            Err(e) => warn!(
                operation = request.operation,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "script failed"
            ),
        }
        result
    }
}

fn run_isolated(
    source: &str,
    params_json: &str,
    bridge: Bridge,
    limits: ExecutionLimits,
) -> Result<String, ExecutionError> {
    let engine = |e: rquickjs::Error| ExecutionError::Engine(e.to_string());

    let runtime = Runtime::new().map_err(engine)?;
    if limits.memory_limit > 0 {
        runtime.set_memory_limit(limits.memory_limit);
    }
    let deadline = Instant::now() + limits.timeout;
    runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));
    let context = Context::full(&runtime).map_err(engine)?;

    let bridge = Rc::new(bridge);
    context.with(|ctx| {
        install(&ctx, bridge, params_json)
            .catch(&ctx)
            .map_err(|e| ExecutionError::Engine(describe(e)))?;

        match ctx.eval::<Coerced<String>, _>(source).catch(&ctx) {
            Ok(Coerced(out)) => Ok(out),
            Err(_) if Instant::now() >= deadline => Err(ExecutionError::Timeout(limits.timeout)),
            Err(caught) => Err(ExecutionError::Guest(describe(caught))),
        }
    })
}

fn install<'js>(ctx: &Ctx<'js>, bridge: Rc<Bridge>, params_json: &str) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    globals.set(
        NATIVE_HOOK,
        Func::from(move |op: String, args: String| -> String { bridge.call(&op, &args) }),
    )?;
    ctx.eval::<(), _>(PRELUDE)?;
    let params = ctx.json_parse(params_json)?;
    globals.set(PARAMS_GLOBAL, params)?;
    Ok(())
}

fn describe(caught: CaughtError<'_>) -> String {
    match caught {
        CaughtError::Exception(ex) => ex
            .message()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "uncaught exception".into()),
        CaughtError::Value(v) => v
            .get::<Coerced<String>>()
            .map(|c| c.0)
            .unwrap_or_else(|_| "uncaught exception".into()),
        CaughtError::Error(e) => e.to_string(),
    }
}
