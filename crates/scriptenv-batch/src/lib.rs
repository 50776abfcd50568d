//! scriptenv batch execution and thread-safety facades.
//!
//! This crate adds multi-threaded batch processing on top of the
//! scriptenv runtime, plus the object facade layer that makes scope
//! objects safe to share between batch worker threads.
//!
//! # Features
//!
//! - **Facades**: per-thread and per-scope cached wrappers around script
//!   objects, either pass-through for thread-safe objects or guarded by a
//!   read-write lock with a read-only call heuristic
//! - **Work conversion**: pluggable converters turning collection-shaped
//!   script values into flat work item lists
//! - **Batch executor**: worker threads with pooled execution contexts,
//!   inherited call chains and per-worker before/after hooks, surfaced to
//!   scripts as `executeBatch`
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use scriptenv_core::{HostFunction, ScriptValue, Scope};
//! use scriptenv_runtime::{ProcessorConfig, ScriptProcessor, testing::TestEngine};
//! use scriptenv_batch::{BatchCallbacks, BatchConfig, BatchExecutor, FacadeFactory, WorkSource};
//!
//! let processor = Arc::new(ScriptProcessor::new(TestEngine::new(), ProcessorConfig::default()));
//! let executor = BatchExecutor::new(processor, FacadeFactory::new());
//!
//! let processed = Arc::new(AtomicUsize::new(0));
//! let counter = processed.clone();
//! let process = HostFunction::new("process", move |_this, _args| {
//!     counter.fetch_add(1, Ordering::AcqRel);
//!     Ok(ScriptValue::Undefined)
//! });
//!
//! let work = ScriptValue::List((0..8).map(|i| ScriptValue::Number(i as f64)).collect());
//! let count = executor.execute(
//!     &Scope::new_root(),
//!     WorkSource::Fixed(work),
//!     &BatchCallbacks { process, before_process: None, after_process: None },
//!     BatchConfig { threads: 2, batch_size: 3 },
//! )?;
//! assert_eq!(count, 8);
//! assert_eq!(processed.load(Ordering::Acquire), 8);
//! # Ok::<(), scriptenv_core::ScriptError>(())
//! ```

pub mod executor;
pub mod facade;
pub mod work;

pub use executor::{
    BatchCallbacks, BatchConfig, BatchExecutor, EXECUTE_BATCH_FUNC_NAME, ExecuteBatchFunction,
    WorkSource,
};
pub use facade::{DelegatingFacade, FacadeFactory, FacadeKind, ObjectClassifier, StateLockingFacade};
pub use work::{
    ListWorkConverter, MapValuesWorkConverter, WorkItemConverter, WorkItemConverterChain,
};
