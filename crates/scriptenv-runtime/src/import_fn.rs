//! The `importScript` scope contributor
//!
//! Binds `importScript(locatorName, location, failOnMissing[, params])`
//! into every scope. The resolved script executes in the importing
//! script's own scope, so bindings it creates are visible to the caller.
//! Resolution misses return `false` when `failOnMissing` is `false` and
//! raise a resolution error otherwise; the flag defaults to failing so
//! missing scripts never pass silently.

use std::sync::Arc;

use tracing::debug;

use scriptenv_core::{
    HostFunction, ScriptEngine, ScriptError, ScriptResult, ScriptValue, Scope,
};

use crate::contributor::ScopeContributor;
use crate::locator::{ResolutionParams, ScriptLocatorRegistry};
use crate::processor::ScriptProcessor;

pub const IMPORT_FUNC_NAME: &str = "importScript";

pub struct ImportFunction<E: ScriptEngine + 'static> {
    processor: Arc<ScriptProcessor<E>>,
    registry: Arc<ScriptLocatorRegistry>,
}

impl<E: ScriptEngine + 'static> ImportFunction<E> {
    pub fn new(processor: Arc<ScriptProcessor<E>>, registry: Arc<ScriptLocatorRegistry>) -> Self {
        Self {
            processor,
            registry,
        }
    }

    fn import(
        processor: &Arc<ScriptProcessor<E>>,
        registry: &ScriptLocatorRegistry,
        args: &[ScriptValue],
    ) -> ScriptResult<ScriptValue> {
        let locator_name = args
            .first()
            .and_then(ScriptValue::as_str)
            .ok_or_else(|| ScriptError::internal("importScript needs a locator name"))?;
        let location = args
            .get(1)
            .and_then(ScriptValue::as_str)
            .ok_or_else(|| ScriptError::internal("importScript needs a location"))?;
        let fail_on_missing = args.get(2).and_then(ScriptValue::as_bool).unwrap_or(true);
        let params: Option<ResolutionParams> = match args.get(3) {
            Some(ScriptValue::Map(entries)) => Some(entries.clone()),
            _ => None,
        };

        let tracker = processor.tracker();
        let reference = tracker.current_script();
        let resolved =
            registry.resolve(reference.as_ref(), locator_name, location, params.as_ref())?;

        match resolved {
            Some(script) => {
                debug!(
                    locator = locator_name,
                    location,
                    script = script.full_name(),
                    "importing script"
                );
                // run in the importing script's scope so its bindings land
                // where the caller can see them
                let scope = tracker
                    .current_scope()
                    .unwrap_or_else(Scope::new_root);
                processor.execute_in_scope(&script, &scope)?;
                Ok(ScriptValue::Bool(true))
            }
            None if fail_on_missing => Err(ScriptError::Resolution {
                locator: locator_name.to_string(),
                location: location.to_string(),
            }),
            None => {
                debug!(locator = locator_name, location, "import target not found, skipping");
                Ok(ScriptValue::Bool(false))
            }
        }
    }
}

impl<E: ScriptEngine + 'static> ScopeContributor for ImportFunction<E> {
    fn contribute(
        &self,
        scope: &Arc<Scope>,
        _trustworthy: bool,
        _mutable_scope: bool,
    ) -> ScriptResult<()> {
        let processor = self.processor.clone();
        let registry = self.registry.clone();
        let function = HostFunction::new(IMPORT_FUNC_NAME, move |_this, args| {
            Self::import(&processor, &registry, args)
        });
        scope.put_const(IMPORT_FUNC_NAME, ScriptValue::Object(function))
    }
}
