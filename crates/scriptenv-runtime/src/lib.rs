//! scriptenv runtime.
//!
//! This crate provides script location, call-chain tracking and the
//! engine-generic script processor for the scriptenv environment.
//!
//! # Features
//!
//! - **Locators**: pluggable resolvers per addressing scheme, composed
//!   through a name-keyed registry, with relative-path resolution against
//!   the importing script
//! - **Call chains**: per-context stacks of nested script executions with
//!   root-context mapping and cross-thread inheritance
//! - **Processor**: bounded compiled-script caching, seed-scope lifecycle,
//!   legacy import-directive rewriting and compile recovery
//! - **Imports**: the `importScript` scope contributor wiring locators and
//!   processor together
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use scriptenv_runtime::{
//!     ImportFunction, ProcessorConfig, ScriptLocatorRegistry, ScriptProcessor,
//!     testing::TestEngine,
//! };
//!
//! let processor = Arc::new(ScriptProcessor::new(TestEngine::new(), ProcessorConfig::default()));
//! let registry = Arc::new(ScriptLocatorRegistry::new());
//! processor.register_contributor(Arc::new(ImportFunction::new(
//!     processor.clone(),
//!     registry.clone(),
//! )));
//!
//! let result = processor.execute_string("set x 2\nreturn x", &BTreeMap::new())?;
//! # assert_eq!(result, scriptenv_core::ScriptValue::Number(2.0));
//! # Ok::<(), scriptenv_core::ScriptError>(())
//! ```

pub mod chain;
pub mod contributor;
pub mod import_fn;
pub mod locator;
pub mod locators;
pub mod processor;
pub mod rewrite;
pub mod testing;

pub use chain::{
    CallChainTracker, ContextActivation, ContextPool, ExecutionContext, FrameGuard, PooledContext,
};
pub use contributor::{ScopeContributor, ScopeContributorSet};
pub use import_fn::{IMPORT_FUNC_NAME, ImportFunction};
pub use locator::{ResolutionParams, ScriptLocator, ScriptLocatorRegistry};
pub use locators::{
    ClasspathScriptLocator, NamePathScriptLocator, RegisteredScriptLocator,
    SearchPathScriptLocator, ScriptSearchProvider, resolve_relative_location,
};
pub use processor::{ProcessorConfig, REFERENCE_PATH_SUCCESSION, ScriptProcessor};
pub use rewrite::rewrite_import_directives;
