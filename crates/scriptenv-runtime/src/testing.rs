//! Deterministic in-process engine for tests
//!
//! [`TestEngine`] interprets a tiny line-based command language instead of
//! real script source, which keeps processor, import and batch tests
//! hermetic and fully deterministic:
//!
//! - `set NAME VALUE` binds a parsed literal in the scope
//! - `get NAME` makes a binding the pending result
//! - `call NAME ARG...` invokes a callable binding; `$name` arguments are
//!   looked up in the scope, everything else is a parsed literal
//! - `return NAME` ends execution with a binding's value
//! - `fail MESSAGE` raises an execution error
//!
//! Sources containing `syntax_error` fail to compile; sources containing
//! `opt_fail` only compile at a negative optimization level, exercising the
//! processor's compile recovery.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use scriptenv_core::{
    CompileOptions, CompiledScript, Scope, ScriptEngine, ScriptError, ScriptResult, ScriptValue,
};

pub struct TestEngine {
    compiles: AtomicUsize,
}

impl TestEngine {
    pub fn new() -> Self {
        Self {
            compiles: AtomicUsize::new(0),
        }
    }

    /// Number of compile calls that reached the engine, for cache tests
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::Acquire)
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_literal(token: &str) -> ScriptValue {
    match token {
        "true" => ScriptValue::Bool(true),
        "false" => ScriptValue::Bool(false),
        "null" => ScriptValue::Null,
        other => match other.parse::<f64>() {
            Ok(n) => ScriptValue::Number(n),
            Err(_) => ScriptValue::string(other),
        },
    }
}

impl ScriptEngine for TestEngine {
    fn compile(
        &self,
        source: &str,
        debug_path: &str,
        options: CompileOptions,
    ) -> ScriptResult<CompiledScript> {
        if source.contains("syntax_error") {
            return Err(ScriptError::compile(debug_path, "syntax error"));
        }
        if source.contains("opt_fail") && options.optimization_level > -1 {
            return Err(ScriptError::compile(
                debug_path,
                "source cannot be compiled at this optimization level",
            ));
        }
        self.compiles.fetch_add(1, Ordering::AcqRel);
        Ok(CompiledScript::new(debug_path, Arc::new(source.to_string())))
    }

    fn execute(&self, script: &CompiledScript, scope: &Arc<Scope>) -> ScriptResult<ScriptValue> {
        let source = script
            .payload::<String>()
            .ok_or_else(|| ScriptError::internal("foreign compiled payload"))?;

        let mut last = ScriptValue::Undefined;
        for line in source.lines() {
            let mut tokens = line.split_whitespace();
            let Some(command) = tokens.next() else {
                continue;
            };
            match command {
                "#" | "opt_fail" => {}
                "set" => {
                    let name = tokens
                        .next()
                        .ok_or_else(|| ScriptError::execution(script.path(), "set needs a name"))?;
                    let value = tokens.next().map(parse_literal).unwrap_or(ScriptValue::Null);
                    scope.put(name, value)?;
                }
                "get" => {
                    let name = tokens
                        .next()
                        .ok_or_else(|| ScriptError::execution(script.path(), "get needs a name"))?;
                    last = scope.get(name).unwrap_or(ScriptValue::Undefined);
                }
                "call" => {
                    let name = tokens
                        .next()
                        .ok_or_else(|| ScriptError::execution(script.path(), "call needs a name"))?;
                    let callee = scope.get(name).ok_or_else(|| {
                        ScriptError::execution(script.path(), format!("{} is not defined", name))
                    })?;
                    let ScriptValue::Object(function) = callee else {
                        return Err(ScriptError::execution(
                            script.path(),
                            format!("{} is not callable", name),
                        ));
                    };
                    let args: Vec<ScriptValue> = tokens
                        .map(|token| match token.strip_prefix('$') {
                            Some(name) => scope.get(name).unwrap_or(ScriptValue::Undefined),
                            None => parse_literal(token),
                        })
                        .collect();
                    last = function.call(None, &args)?;
                }
                "return" => {
                    let name = tokens.next().ok_or_else(|| {
                        ScriptError::execution(script.path(), "return needs a name")
                    })?;
                    return Ok(scope.get(name).unwrap_or(ScriptValue::Undefined));
                }
                "fail" => {
                    let message = line.trim_start_matches("fail").trim().to_string();
                    return Err(ScriptError::execution(script.path(), message));
                }
                other => {
                    return Err(ScriptError::execution(
                        script.path(),
                        format!("unknown command: {}", other),
                    ));
                }
            }
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_and_return() {
        let engine = TestEngine::new();
        let compiled = engine
            .compile("set a 1.5\nreturn a", "/t.js", CompileOptions::default())
            .unwrap();
        let scope = Scope::new_root();
        assert_eq!(
            engine.execute(&compiled, &scope).unwrap(),
            ScriptValue::Number(1.5)
        );
        assert_eq!(scope.get("a"), Some(ScriptValue::Number(1.5)));
    }

    #[test]
    fn test_fail_raises_execution_error() {
        let engine = TestEngine::new();
        let compiled = engine
            .compile("fail boom", "/t.js", CompileOptions::default())
            .unwrap();
        let err = engine.execute(&compiled, &Scope::new_root()).unwrap_err();
        assert!(matches!(err, ScriptError::Execution { .. }));
    }

    #[test]
    fn test_call_invokes_host_function() {
        let engine = TestEngine::new();
        let compiled = engine
            .compile("call add 2 3", "/t.js", CompileOptions::default())
            .unwrap();
        let scope = Scope::new_root();
        let add = scriptenv_core::HostFunction::new("add", |_this, args| {
            let sum = args
                .iter()
                .filter_map(ScriptValue::as_number)
                .sum::<f64>();
            Ok(ScriptValue::Number(sum))
        });
        scope.put("add", ScriptValue::Object(add)).unwrap();
        assert_eq!(
            engine.execute(&compiled, &scope).unwrap(),
            ScriptValue::Number(5.0)
        );
    }
}
