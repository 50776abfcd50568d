//! Batch execution
//!
//! Fans work items out across OS worker threads. Each worker runs in its
//! own pooled execution context with the dispatcher's call chain
//! inherited, processes its batches in a scope prototype-linked to the
//! dispatching scope, and sees shared objects only through facades. The
//! per-worker lifecycle is `beforeProcess` exactly once, then the items,
//! then `afterProcess` exactly once. The after hook runs even when item
//! processing fails.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use scopeguard::defer;
use tracing::{debug, info, warn};

use scriptenv_core::{
    HostFunction, ScriptEngine, ScriptError, ScriptObject, ScriptResult, ScriptValue, Scope,
};
use scriptenv_runtime::chain::ExecutionContext;
use scriptenv_runtime::{ScopeContributor, ScriptProcessor};

use crate::facade::FacadeFactory;
use crate::work::WorkItemConverterChain;

pub const EXECUTE_BATCH_FUNC_NAME: &str = "executeBatch";

/// Where the work items come from
pub enum WorkSource {
    /// A fixed collection-shaped value, converted up front
    Fixed(ScriptValue),
    /// A callable pulled once per batch until it returns an empty
    /// collection
    Provider(Arc<dyn ScriptObject>),
}

#[derive(Clone, Copy, Debug)]
pub struct BatchConfig {
    pub threads: usize,
    pub batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            batch_size: 10,
        }
    }
}

#[derive(Clone)]
pub struct BatchCallbacks {
    pub process: Arc<dyn ScriptObject>,
    pub before_process: Option<Arc<dyn ScriptObject>>,
    pub after_process: Option<Arc<dyn ScriptObject>>,
}

pub struct BatchExecutor<E: ScriptEngine + 'static> {
    processor: Arc<ScriptProcessor<E>>,
    factory: Arc<FacadeFactory>,
    converters: WorkItemConverterChain,
}

impl<E: ScriptEngine + 'static> BatchExecutor<E> {
    pub fn new(processor: Arc<ScriptProcessor<E>>, factory: Arc<FacadeFactory>) -> Self {
        Self {
            processor,
            factory,
            converters: WorkItemConverterChain::with_defaults(),
        }
    }

    pub fn with_converters(mut self, converters: WorkItemConverterChain) -> Self {
        self.converters = converters;
        self
    }

    /// Run a batch job against `parent_scope`, returning the number of
    /// successfully processed items
    pub fn execute(
        &self,
        parent_scope: &Arc<Scope>,
        work: WorkSource,
        callbacks: &BatchCallbacks,
        config: BatchConfig,
    ) -> ScriptResult<usize> {
        let threads = config.threads.max(1);
        let batch_size = config.batch_size.max(1);

        // facades stand in for everything crossing a thread boundary
        let callbacks = BatchCallbacks {
            process: self
                .factory
                .facade_object(&callbacks.process, parent_scope, None),
            before_process: callbacks
                .before_process
                .as_ref()
                .map(|cb| self.factory.facade_object(cb, parent_scope, None)),
            after_process: callbacks
                .after_process
                .as_ref()
                .map(|cb| self.factory.facade_object(cb, parent_scope, None)),
        };

        let parent_context = self.processor.tracker().current_context();
        let processed = AtomicUsize::new(0);
        let errors: Mutex<Vec<ScriptError>> = Mutex::new(Vec::new());

        let factory = self.factory.clone();
        defer! {
            factory.clear_reference_scope(parent_scope);
        }

        let (tx, rx) = crossbeam_channel::unbounded::<Vec<ScriptValue>>();
        std::thread::scope(|s| {
            for _ in 0..threads {
                let rx = rx.clone();
                let callbacks = &callbacks;
                let parent_context = parent_context.as_ref();
                let processed = &processed;
                let errors = &errors;
                s.spawn(move || {
                    self.worker(rx, parent_scope, parent_context, callbacks, processed, errors);
                });
            }
            drop(rx);

            if let Err(err) = self.dispatch(tx, work, parent_scope, batch_size) {
                errors.lock().push(err);
            }
        });

        let mut errors = errors.into_inner();
        let processed = processed.into_inner();
        if errors.is_empty() {
            info!(processed, threads, "batch complete");
            Ok(processed)
        } else {
            warn!(
                processed,
                failures = errors.len(),
                "batch finished with failures"
            );
            Err(errors.remove(0))
        }
    }

    /// Feed item batches into the channel; closes it by dropping `tx`
    fn dispatch(
        &self,
        tx: Sender<Vec<ScriptValue>>,
        work: WorkSource,
        parent_scope: &Arc<Scope>,
        batch_size: usize,
    ) -> ScriptResult<()> {
        match work {
            WorkSource::Fixed(value) => {
                let items = self.converters.convert(&value)?;
                debug!(items = items.len(), "dispatching fixed work collection");
                for batch in items.chunks(batch_size) {
                    let batch = batch
                        .iter()
                        .map(|item| self.factory.facade_value(item, parent_scope))
                        .collect();
                    if tx.send(batch).is_err() {
                        break;
                    }
                }
            }
            WorkSource::Provider(provider) => {
                let provider = self.factory.facade_object(&provider, parent_scope, None);
                loop {
                    let pulled = provider.call(None, &[])?;
                    if matches!(pulled, ScriptValue::Null | ScriptValue::Undefined) {
                        break;
                    }
                    let items = self.converters.convert(&pulled)?;
                    if items.is_empty() {
                        break;
                    }
                    debug!(items = items.len(), "dispatching pulled work batch");
                    for batch in items.chunks(batch_size) {
                        let batch = batch
                            .iter()
                            .map(|item| self.factory.facade_value(item, parent_scope))
                            .collect();
                        if tx.send(batch).is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn worker(
        &self,
        rx: Receiver<Vec<ScriptValue>>,
        parent_scope: &Arc<Scope>,
        parent_context: Option<&Arc<ExecutionContext>>,
        callbacks: &BatchCallbacks,
        processed: &AtomicUsize,
        errors: &Mutex<Vec<ScriptError>>,
    ) {
        let tracker = self.processor.tracker();
        let pooled = self.processor.context_pool().checkout();

        // present the dispatcher's chain as this worker's own history
        if let Some(parent) = parent_context {
            match tracker.inherit_call_chain(pooled.context(), parent) {
                Ok(()) | Err(ScriptError::NoParentCallChain) => {}
                Err(err) => {
                    errors.lock().push(err);
                    return;
                }
            }
        }

        let worker_scope = Scope::child_of(parent_scope);
        pooled.context().set_scope(worker_scope.clone());
        let _active = tracker.activate(pooled.context());

        let factory = self.factory.clone();
        defer! {
            // cleanup is unconditional: the after hook and cache clearing
            // run no matter how item processing ended
            if let Some(after) = &callbacks.after_process {
                if let Err(err) = after.call(None, &[]) {
                    errors.lock().push(err);
                }
            }
            factory.clear_thread();
        }

        if let Some(before) = &callbacks.before_process {
            if let Err(err) = before.call(None, &[]) {
                errors.lock().push(err);
                return;
            }
        }

        for batch in rx.iter() {
            for item in batch {
                match callbacks.process.call(None, std::slice::from_ref(&item)) {
                    Ok(_) => {
                        processed.fetch_add(1, Ordering::AcqRel);
                    }
                    Err(err) => {
                        warn!(error = %err, "work item processing failed");
                        errors.lock().push(err);
                        return;
                    }
                }
            }
        }
    }
}

/// Contributes `executeBatch(work, processFn, threadCount, batchSize[,
/// beforeProcess, afterProcess])` to scopes
pub struct ExecuteBatchFunction<E: ScriptEngine + 'static> {
    executor: Arc<BatchExecutor<E>>,
}

impl<E: ScriptEngine + 'static> ExecuteBatchFunction<E> {
    pub fn new(executor: Arc<BatchExecutor<E>>) -> Self {
        Self { executor }
    }
}

fn callback_arg(args: &[ScriptValue], index: usize) -> Option<Arc<dyn ScriptObject>> {
    match args.get(index) {
        Some(ScriptValue::Object(obj)) if obj.is_function() => Some(obj.clone()),
        _ => None,
    }
}

impl<E: ScriptEngine + 'static> ScopeContributor for ExecuteBatchFunction<E> {
    fn contribute(
        &self,
        scope: &Arc<Scope>,
        _trustworthy: bool,
        _mutable_scope: bool,
    ) -> ScriptResult<()> {
        let executor = self.executor.clone();
        let function = HostFunction::new(EXECUTE_BATCH_FUNC_NAME, move |_this, args| {
            let work = match args.first() {
                Some(ScriptValue::Object(obj)) if obj.is_function() => {
                    WorkSource::Provider(obj.clone())
                }
                Some(value) => WorkSource::Fixed(value.clone()),
                None => {
                    return Err(ScriptError::internal("executeBatch needs a work argument"));
                }
            };
            let process = callback_arg(args, 1)
                .ok_or_else(|| ScriptError::internal("executeBatch needs a process callback"))?;

            let defaults = BatchConfig::default();
            let threads = args
                .get(2)
                .and_then(ScriptValue::as_number)
                .filter(|n| *n >= 1.0)
                .map_or(defaults.threads, |n| n as usize);
            let batch_size = args
                .get(3)
                .and_then(ScriptValue::as_number)
                .filter(|n| *n >= 1.0)
                .map_or(defaults.batch_size, |n| n as usize);

            let callbacks = BatchCallbacks {
                process,
                before_process: callback_arg(args, 4),
                after_process: callback_arg(args, 5),
            };

            let parent_scope = executor
                .processor
                .tracker()
                .current_scope()
                .unwrap_or_else(Scope::new_root);

            let processed = executor.execute(
                &parent_scope,
                work,
                &callbacks,
                BatchConfig {
                    threads,
                    batch_size,
                },
            )?;
            Ok(ScriptValue::Number(processed as f64))
        });
        scope.put_const(EXECUTE_BATCH_FUNC_NAME, ScriptValue::Object(function))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use scriptenv_core::PlainScriptObject;
    use scriptenv_runtime::testing::TestEngine;
    use scriptenv_runtime::ProcessorConfig;

    fn executor() -> BatchExecutor<TestEngine> {
        let processor = Arc::new(ScriptProcessor::new(
            TestEngine::new(),
            ProcessorConfig::default(),
        ));
        BatchExecutor::new(processor, FacadeFactory::new())
    }

    fn number_items(n: usize) -> ScriptValue {
        ScriptValue::List((0..n).map(|i| ScriptValue::Number(i as f64)).collect())
    }

    #[test]
    fn test_all_items_processed_once() {
        let executor = executor();
        let scope = Scope::new_root();
        let seen = Arc::new(Mutex::new(Vec::<f64>::new()));

        let seen2 = seen.clone();
        let process = HostFunction::new("process", move |_this, args| {
            let n = args.first().and_then(ScriptValue::as_number).unwrap();
            seen2.lock().push(n);
            Ok(ScriptValue::Undefined)
        });

        let callbacks = BatchCallbacks {
            process,
            before_process: None,
            after_process: None,
        };
        let count = executor
            .execute(
                &scope,
                WorkSource::Fixed(number_items(25)),
                &callbacks,
                BatchConfig {
                    threads: 4,
                    batch_size: 3,
                },
            )
            .unwrap();

        assert_eq!(count, 25);
        let seen = seen.lock();
        let unique: HashSet<u64> = seen.iter().map(|n| *n as u64).collect();
        assert_eq!(unique.len(), 25);
    }

    #[test]
    fn test_before_and_after_run_once_per_worker() {
        let executor = executor();
        let scope = Scope::new_root();
        let before_calls = Arc::new(AtomicUsize::new(0));
        let after_calls = Arc::new(AtomicUsize::new(0));

        let b = before_calls.clone();
        let before = HostFunction::new("beforeProcess", move |_this, _args| {
            b.fetch_add(1, Ordering::AcqRel);
            Ok(ScriptValue::Undefined)
        });
        let a = after_calls.clone();
        let after = HostFunction::new("afterProcess", move |_this, _args| {
            a.fetch_add(1, Ordering::AcqRel);
            Ok(ScriptValue::Undefined)
        });
        let process = HostFunction::new("process", |_this, _args| Ok(ScriptValue::Undefined));

        let threads = 3;
        executor
            .execute(
                &scope,
                WorkSource::Fixed(number_items(9)),
                &BatchCallbacks {
                    process,
                    before_process: Some(before),
                    after_process: Some(after),
                },
                BatchConfig {
                    threads,
                    batch_size: 1,
                },
            )
            .unwrap();

        assert_eq!(before_calls.load(Ordering::Acquire), threads);
        assert_eq!(after_calls.load(Ordering::Acquire), threads);
    }

    #[test]
    fn test_after_process_runs_despite_item_failure() {
        let executor = executor();
        let scope = Scope::new_root();
        let after_calls = Arc::new(AtomicUsize::new(0));

        let a = after_calls.clone();
        let after = HostFunction::new("afterProcess", move |_this, _args| {
            a.fetch_add(1, Ordering::AcqRel);
            Ok(ScriptValue::Undefined)
        });
        let process = HostFunction::new("process", |_this, _args| {
            Err(ScriptError::execution("/batch.js", "item exploded"))
        });

        let result = executor.execute(
            &scope,
            WorkSource::Fixed(number_items(4)),
            &BatchCallbacks {
                process,
                before_process: None,
                after_process: Some(after),
            },
            BatchConfig {
                threads: 1,
                batch_size: 2,
            },
        );

        assert!(result.is_err());
        assert_eq!(after_calls.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_pull_provider_feeds_until_empty() {
        let executor = executor();
        let scope = Scope::new_root();
        let pulls = Arc::new(AtomicUsize::new(0));

        let p = pulls.clone();
        let provider = HostFunction::new("workProvider", move |_this, _args| {
            let pull = p.fetch_add(1, Ordering::AcqRel);
            if pull < 3 {
                Ok(number_items(5))
            } else {
                Ok(ScriptValue::List(Vec::new()))
            }
        });
        let processed = Arc::new(AtomicUsize::new(0));
        let c = processed.clone();
        let process = HostFunction::new("process", move |_this, _args| {
            c.fetch_add(1, Ordering::AcqRel);
            Ok(ScriptValue::Undefined)
        });

        let count = executor
            .execute(
                &scope,
                WorkSource::Provider(provider),
                &BatchCallbacks {
                    process,
                    before_process: None,
                    after_process: None,
                },
                BatchConfig {
                    threads: 2,
                    batch_size: 4,
                },
            )
            .unwrap();

        assert_eq!(count, 15);
        assert_eq!(pulls.load(Ordering::Acquire), 4);
    }

    #[test]
    fn test_shared_objects_are_facaded_for_workers() {
        let executor = executor();
        let scope = Scope::new_root();

        let shared = PlainScriptObject::new();
        shared.put("count", None, ScriptValue::Number(0.0)).unwrap();
        let shared_dyn: Arc<dyn ScriptObject> = shared.clone();

        let items: Vec<ScriptValue> = (0..20)
            .map(|_| ScriptValue::Object(shared_dyn.clone()))
            .collect();

        let process = HostFunction::new("process", move |_this, args| {
            let ScriptValue::Object(item) = &args[0] else {
                panic!("expected object item");
            };
            // workers only ever see the state-locking facade
            assert!(item.as_any().is::<crate::facade::StateLockingFacade>());
            let current = item
                .get("count")
                .and_then(|v| v.as_number())
                .unwrap_or_default();
            item.put("count", None, ScriptValue::Number(current + 1.0))?;
            Ok(ScriptValue::Undefined)
        });

        executor
            .execute(
                &scope,
                WorkSource::Fixed(ScriptValue::List(items)),
                &BatchCallbacks {
                    process,
                    before_process: None,
                    after_process: None,
                },
                BatchConfig {
                    threads: 4,
                    batch_size: 2,
                },
            )
            .unwrap();

        // updates raced through the same facade; each one at least landed
        let count = shared_dyn.get("count").and_then(|v| v.as_number()).unwrap();
        assert!(count >= 1.0);
    }

    #[test]
    fn test_worker_inherits_dispatchers_call_chain() {
        let processor = Arc::new(ScriptProcessor::new(
            TestEngine::new(),
            ProcessorConfig::default(),
        ));
        let executor = Arc::new(BatchExecutor::new(processor.clone(), FacadeFactory::new()));
        processor.register_contributor(Arc::new(ExecuteBatchFunction::new(executor)));

        let depths = Arc::new(Mutex::new(Vec::<usize>::new()));
        let d = depths.clone();
        let p = processor.clone();
        let probe = HostFunction::new("probeChain", move |_this, _args| {
            d.lock().push(p.tracker().call_chain().len());
            Ok(ScriptValue::Undefined)
        });

        let scope = processor.execution_scope(true).unwrap();
        scope.put("probeChain", ScriptValue::Object(probe)).unwrap();
        scope
            .put(
                "work",
                ScriptValue::List(vec![ScriptValue::Number(1.0), ScriptValue::Number(2.0)]),
            )
            .unwrap();

        let batch_script: Arc<dyn scriptenv_core::ReferenceScript> =
            Arc::new(scriptenv_core::DynamicScript::new(
                "call executeBatch $work $probeChain 2 1",
            ));
        processor.execute_in_scope(&batch_script, &scope).unwrap();

        let depths = depths.lock();
        assert_eq!(depths.len(), 2);
        // the dispatching script's frame is visible from inside the workers
        assert!(depths.iter().all(|d| *d == 1));
    }
}
