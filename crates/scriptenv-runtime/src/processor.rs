//! Script processor
//!
//! Ties the engine, scopes, conversion and call-chain tracking together.
//! The processor is generic over [`ScriptEngine`], so the same caching and
//! scope lifecycle applies to every embedded runtime.
//!
//! Compiled scripts are cached under a normalized path key in a bounded,
//! insertion-order-evicting cache behind a read/write lock. Dynamic
//! string-sourced scripts live in a separate cache keyed by their
//! content-derived name. Both caches are bypassed whenever a debugger is
//! attached, since debug-instrumented compilation must never be reused.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use scriptenv_core::{
    CompileOptions, CompiledScript, Direction, DynamicScript, ReferencePathType, ReferenceScript,
    Scope, ScriptEngine, ScriptError, ScriptResult, ScriptValue, ValueConverter,
    first_reference_path, normalize_cache_key,
};

use crate::chain::{CallChainTracker, ContextPool};
use crate::contributor::{ScopeContributor, ScopeContributorSet};
use crate::rewrite::rewrite_import_directives;

/// Priority order in which a script's addressing schemes are consulted for
/// its canonical path
pub const REFERENCE_PATH_SUCCESSION: [ReferencePathType; 4] = [
    ReferencePathType::CLASSPATH,
    ReferencePathType::FILE,
    ReferencePathType::NODE_REF,
    ReferencePathType::FILE_FOLDER_PATH,
];

#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    /// Maximum number of compiled scripts kept in the cache
    pub max_cached_scripts: usize,
    pub compile: CompileOptions,
    /// Binding names stripped from the restricted seed scope
    pub privileged_names: Vec<String>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_cached_scripts: 200,
            compile: CompileOptions::default(),
            privileged_names: Vec::new(),
        }
    }
}

struct CompiledCache {
    entries: HashMap<String, CompiledScript>,
    order: VecDeque<String>,
    capacity: usize,
}

impl CompiledCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, key: &str) -> Option<CompiledScript> {
        self.entries.get(key).cloned()
    }

    /// Insert and evict oldest-inserted entries once over capacity
    fn insert(&mut self, key: String, compiled: CompiledScript) {
        if self.entries.insert(key.clone(), compiled).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    debug!(key = oldest, "evicting oldest compiled script");
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct SeedScopes {
    restricted: Arc<Scope>,
    unrestricted: Arc<Scope>,
}

pub struct ScriptProcessor<E: ScriptEngine> {
    engine: E,
    config: ProcessorConfig,
    debugger_active: AtomicBool,
    converter: ValueConverter,
    contributors: ScopeContributorSet,
    tracker: Arc<CallChainTracker>,
    contexts: Arc<ContextPool>,
    cache: RwLock<CompiledCache>,
    dynamic_cache: RwLock<CompiledCache>,
    seeds: RwLock<Option<Arc<SeedScopes>>>,
}

impl<E: ScriptEngine> ScriptProcessor<E> {
    pub fn new(engine: E, config: ProcessorConfig) -> Self {
        let cache = CompiledCache::new(config.max_cached_scripts);
        let dynamic_cache = CompiledCache::new(config.max_cached_scripts);
        Self {
            engine,
            config,
            debugger_active: AtomicBool::new(false),
            converter: ValueConverter::with_defaults(),
            contributors: ScopeContributorSet::new(),
            tracker: CallChainTracker::new(),
            contexts: ContextPool::new(),
            cache: RwLock::new(cache),
            dynamic_cache: RwLock::new(dynamic_cache),
            seeds: RwLock::new(None),
        }
    }

    pub fn tracker(&self) -> &Arc<CallChainTracker> {
        &self.tracker
    }

    pub fn context_pool(&self) -> &Arc<ContextPool> {
        &self.contexts
    }

    pub fn converter(&self) -> &ValueConverter {
        &self.converter
    }

    /// Register a scope contributor. Seed scopes are rebuilt on next use so
    /// the new bindings appear in them.
    pub fn register_contributor(&self, contributor: Arc<dyn ScopeContributor>) {
        self.contributors.register(contributor);
        *self.seeds.write() = None;
    }

    /// Debug-instrumented compilation is never cached; toggling this on
    /// routes every compile around the cache
    pub fn set_debugger_active(&self, active: bool) {
        info!(active, "debugger attachment changed");
        self.debugger_active.store(active, Ordering::Release);
    }

    pub fn cached_script_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Execute `script` in a fresh scope seeded for its security level,
    /// with `model` entries injected as converted bindings
    pub fn execute(
        &self,
        script: &Arc<dyn ReferenceScript>,
        model: &BTreeMap<String, ScriptValue>,
    ) -> ScriptResult<ScriptValue> {
        let scope = self.execution_scope(script.is_secure())?;
        self.inject_model(&scope, model)?;
        self.execute_in_scope(script, &scope)
    }

    /// Execute inline source as a dynamic untrusted script. Identical
    /// source shares a compiled unit through the dynamic-script cache.
    pub fn execute_string(
        &self,
        source: &str,
        model: &BTreeMap<String, ScriptValue>,
    ) -> ScriptResult<ScriptValue> {
        let script: Arc<dyn ReferenceScript> = Arc::new(DynamicScript::new(source));
        self.execute(&script, model)
    }

    /// Execute `script` against a caller-supplied scope
    pub fn execute_in_scope(
        &self,
        script: &Arc<dyn ReferenceScript>,
        scope: &Arc<Scope>,
    ) -> ScriptResult<ScriptValue> {
        let compiled = self.compiled(script)?;
        let pooled = self.contexts.checkout();
        pooled.context().set_scope(scope.clone());
        let _frame = self.tracker.enter(pooled.context(), script.clone(), false);
        let result = self.engine.execute(&compiled, scope).map_err(|e| match e {
            err @ (ScriptError::Execution { .. } | ScriptError::Compile { .. }) => err,
            other => ScriptError::execution_with_cause(compiled.path(), other),
        })?;
        self.converter.convert(&result, Direction::ToHost)
    }

    /// Execute `script` against a plain binding map: entries are adapted
    /// into a fresh scope before the run, and the scope's resulting
    /// bindings are copied back into the map afterwards, converted to host
    /// values
    pub fn execute_with_map(
        &self,
        script: &Arc<dyn ReferenceScript>,
        model: &mut BTreeMap<String, ScriptValue>,
    ) -> ScriptResult<ScriptValue> {
        let scope = self.execution_scope(script.is_secure())?;
        self.inject_model(&scope, model)?;
        let result = self.execute_in_scope(script, &scope)?;
        for (name, value) in scope.own_bindings() {
            model.insert(name, self.converter.convert(&value, Direction::ToHost)?);
        }
        Ok(result)
    }

    /// A fresh scope prototype-linked to the seed scope matching the
    /// script's security level
    pub fn execution_scope(&self, secure: bool) -> ScriptResult<Arc<Scope>> {
        let seeds = self.seed_scopes()?;
        let seed = if secure {
            &seeds.unrestricted
        } else {
            &seeds.restricted
        };
        Ok(Scope::child_of(seed))
    }

    fn inject_model(
        &self,
        scope: &Arc<Scope>,
        model: &BTreeMap<String, ScriptValue>,
    ) -> ScriptResult<()> {
        for (name, value) in model {
            scope.put(name, self.converter.convert(value, Direction::ToScript)?)?;
        }
        Ok(())
    }

    fn seed_scopes(&self) -> ScriptResult<Arc<SeedScopes>> {
        if let Some(seeds) = self.seeds.read().as_ref() {
            return Ok(seeds.clone());
        }
        let mut slot = self.seeds.write();
        if let Some(seeds) = slot.as_ref() {
            return Ok(seeds.clone());
        }

        let unrestricted = Scope::new_root();
        self.contributors.contribute_all(&unrestricted, true, false)?;
        unrestricted.seal();

        let restricted = Scope::new_root();
        self.contributors.contribute_all(&restricted, false, false)?;
        for name in &self.config.privileged_names {
            if restricted.remove_binding(name) {
                debug!(name, "removed privileged binding from restricted seed");
            }
        }
        restricted.seal();

        info!("initialized seed scopes");
        let seeds = Arc::new(SeedScopes {
            restricted,
            unrestricted,
        });
        *slot = Some(seeds.clone());
        Ok(seeds)
    }

    fn compiled(&self, script: &Arc<dyn ReferenceScript>) -> ScriptResult<CompiledScript> {
        let debug_attached = self.debugger_active.load(Ordering::Acquire);
        let path = first_reference_path(script.as_ref(), &REFERENCE_PATH_SUCCESSION)
            .unwrap_or_else(|| script.full_name().to_string());
        let cachable = script.is_cachable() && !debug_attached;
        // dynamic scripts are cached apart from located scripts, keyed by
        // their content-derived name
        let dynamic = script.is_dynamic() && !debug_attached;
        let key = normalize_cache_key(&path);

        if cachable {
            if let Some(hit) = self.cache.read().get(&key) {
                debug!(key, "compiled script cache hit");
                return Ok(hit);
            }
        } else if dynamic {
            if let Some(hit) = self.dynamic_cache.read().get(&key) {
                debug!(key, "dynamic script cache hit");
                return Ok(hit);
            }
        }

        let raw = script.content()?;
        let source = rewrite_import_directives(&raw);
        let mut options = self.config.compile;
        options.debug_instrumentation = debug_attached;
        let compiled = self.compile_with_recovery(&source, &path, options)?;

        if cachable {
            self.cache.write().insert(key, compiled.clone());
        } else if dynamic {
            self.dynamic_cache.write().insert(key, compiled.clone());
        }
        Ok(compiled)
    }

    /// Compile, falling back through decreasing optimization levels down to
    /// interpreted mode before giving up
    fn compile_with_recovery(
        &self,
        source: &str,
        path: &str,
        mut options: CompileOptions,
    ) -> ScriptResult<CompiledScript> {
        loop {
            match self.engine.compile(source, path, options) {
                Ok(compiled) => return Ok(compiled),
                Err(cause) if options.optimization_level > -1 => {
                    options.optimization_level -= 1;
                    warn!(
                        path,
                        error = %cause,
                        optimization_level = options.optimization_level,
                        "compilation failed, retrying at lower optimization level"
                    );
                }
                Err(cause) => {
                    return Err(match cause {
                        err @ ScriptError::Compile { .. } => err,
                        other => ScriptError::compile_with_cause(path, other),
                    });
                }
            }
        }
    }
}
