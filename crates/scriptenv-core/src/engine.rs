//! Engine abstraction
//!
//! The processor is generic over [`ScriptEngine`], keeping the caching,
//! scope and import machinery independent of the embedded runtime. An
//! engine only needs to compile source into an opaque handle and execute
//! that handle against a scope.

use std::any::Any;
use std::sync::Arc;

use crate::error::ScriptResult;
use crate::scope::Scope;
use crate::value::ScriptValue;

#[derive(Clone, Copy, Debug)]
pub struct CompileOptions {
    /// Engine-specific optimization level; negative selects interpreted mode
    pub optimization_level: i32,
    /// Emit debug information for an attached debugger
    pub debug_instrumentation: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimization_level: 0,
            debug_instrumentation: false,
        }
    }
}

/// A compiled script handle.
///
/// The payload is engine-specific; the path is kept alongside it for
/// logging and error reporting.
#[derive(Clone)]
pub struct CompiledScript {
    path: String,
    payload: Arc<dyn Any + Send + Sync>,
}

impl CompiledScript {
    pub fn new(path: impl Into<String>, payload: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            path: path.into(),
            payload,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn payload<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

pub trait ScriptEngine: Send + Sync {
    /// Compile `source`, attributing errors and debug info to `debug_path`
    fn compile(
        &self,
        source: &str,
        debug_path: &str,
        options: CompileOptions,
    ) -> ScriptResult<CompiledScript>;

    /// Execute a previously compiled script against `scope`
    fn execute(&self, script: &CompiledScript, scope: &Arc<Scope>) -> ScriptResult<ScriptValue>;
}
