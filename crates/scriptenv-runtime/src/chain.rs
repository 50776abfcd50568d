//! Call-chain tracking
//!
//! Every script execution runs inside an [`ExecutionContext`]. The
//! [`CallChainTracker`] records, per logical root context, the stack of
//! scripts that led to the currently executing one, so relative import
//! locators can resolve against the caller regardless of which thread the
//! context runs on.
//!
//! Contexts are mapped to a *root* context: a nested execution entered on a
//! distinct (possibly pooled) context continues the chain of the context
//! that was current when it started, unless the frame explicitly requests a
//! new root. The current context is tracked per thread; every frame saves
//! and restores the previously current context, so push/pop stays balanced
//! on all exit paths.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use scriptenv_core::{ReferenceScript, Scope, ScriptError, ScriptResult};

thread_local! {
    static CURRENT_CONTEXT: Cell<Option<u64>> = const { Cell::new(None) };
}

/// An isolated execution context with its own bindings
pub struct ExecutionContext {
    id: u64,
    scope: RwLock<Arc<Scope>>,
}

impl ExecutionContext {
    fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            scope: RwLock::new(Scope::new_root()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn scope(&self) -> Arc<Scope> {
        self.scope.read().clone()
    }

    pub fn set_scope(&self, scope: Arc<Scope>) {
        *self.scope.write() = scope;
    }

    /// Drop all bindings accumulated by the previous use of this context
    fn reset(&self) {
        *self.scope.write() = Scope::new_root();
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .finish()
    }
}

pub struct CallChainTracker {
    /// context id -> root context id
    roots: DashMap<u64, u64>,
    /// root context id -> outermost-first chain
    chains: DashMap<u64, Vec<Arc<dyn ReferenceScript>>>,
    /// context id -> live context handle, for current-scope lookups
    contexts: DashMap<u64, Weak<ExecutionContext>>,
}

impl CallChainTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            roots: DashMap::new(),
            chains: DashMap::new(),
            contexts: DashMap::new(),
        })
    }

    /// The context the current thread is executing in, if any
    pub fn current_context_id(&self) -> Option<u64> {
        CURRENT_CONTEXT.with(|c| c.get())
    }

    /// Enter a script frame in `context` on the current thread.
    ///
    /// A context seen for the first time inherits the root (and thus the
    /// chain) of the previously current context; `new_root` forces the
    /// context to become its own root instead. The returned guard pops the
    /// frame and restores the previously current context when dropped,
    /// including on unwind.
    pub fn enter(
        self: &Arc<Self>,
        context: &Arc<ExecutionContext>,
        script: Arc<dyn ReferenceScript>,
        new_root: bool,
    ) -> FrameGuard {
        let previous = CURRENT_CONTEXT.with(|c| c.replace(Some(context.id)));
        let root = if new_root && previous != Some(context.id) {
            self.roots.insert(context.id, context.id);
            context.id
        } else if let Some(root) = self.roots.get(&context.id) {
            *root
        } else {
            let root = previous
                .and_then(|p| self.roots.get(&p).map(|r| *r))
                .unwrap_or(context.id);
            self.roots.insert(context.id, root);
            root
        };
        trace!(
            context = context.id,
            root,
            script = script.full_name(),
            "entering script frame"
        );
        self.chains.entry(root).or_default().push(script);
        self.contexts.insert(context.id, Arc::downgrade(context));
        FrameGuard {
            tracker: self.clone(),
            context_id: context.id,
            root,
            previous,
        }
    }

    /// The script currently executing in the current thread's context
    pub fn current_script(&self) -> Option<Arc<dyn ReferenceScript>> {
        let root = self.current_root()?;
        self.chains.get(&root)?.last().cloned()
    }

    /// A copy of the full outermost-first chain of the current thread's
    /// context
    pub fn call_chain(&self) -> Vec<Arc<dyn ReferenceScript>> {
        self.current_root()
            .and_then(|root| self.chains.get(&root).map(|c| c.clone()))
            .unwrap_or_default()
    }

    pub fn chain_depth(&self, context: &ExecutionContext) -> usize {
        self.roots
            .get(&context.id)
            .map(|r| *r)
            .and_then(|root| self.chains.get(&root).map(|c| c.len()))
            .unwrap_or(0)
    }

    fn current_root(&self) -> Option<u64> {
        let id = self.current_context_id()?;
        self.roots.get(&id).map(|r| *r)
    }

    /// The live context the current thread is executing in
    pub fn current_context(&self) -> Option<Arc<ExecutionContext>> {
        let id = self.current_context_id()?;
        self.contexts.get(&id)?.upgrade()
    }

    /// The scope of the currently executing script, if any
    pub fn current_scope(&self) -> Option<Arc<Scope>> {
        self.current_context().map(|c| c.scope())
    }

    /// Copy the chain of `parent` into `context`, which must not have begun
    /// tracking a chain of its own.
    ///
    /// Worker threads call this before their first frame so scripts they
    /// run see their spawner's chain as their own call history.
    pub fn inherit_call_chain(
        &self,
        context: &ExecutionContext,
        parent: &ExecutionContext,
    ) -> ScriptResult<()> {
        if self.roots.contains_key(&context.id) {
            return Err(ScriptError::CallChainInitialized);
        }
        let inherited = match self.roots.get(&parent.id).map(|r| *r) {
            Some(root) => match self.chains.get(&root) {
                Some(chain) if !chain.is_empty() => chain.clone(),
                _ => return Err(ScriptError::NoParentCallChain),
            },
            None => return Err(ScriptError::NoParentCallChain),
        };
        debug!(
            context = context.id,
            parent = parent.id,
            depth = inherited.len(),
            "inheriting call chain"
        );
        self.roots.insert(context.id, context.id);
        self.chains.insert(context.id, inherited);
        Ok(())
    }

    /// Make `context` the current thread's context without entering a
    /// script frame.
    ///
    /// Batch workers use this after [`inherit_call_chain`] so script code
    /// they invoke observes the inherited chain. The guard restores the
    /// previous context and tears down the context's chain bookkeeping on
    /// drop.
    ///
    /// [`inherit_call_chain`]: CallChainTracker::inherit_call_chain
    pub fn activate(self: &Arc<Self>, context: &Arc<ExecutionContext>) -> ContextActivation {
        let previous = CURRENT_CONTEXT.with(|c| c.replace(Some(context.id)));
        self.contexts.insert(context.id, Arc::downgrade(context));
        ContextActivation {
            tracker: self.clone(),
            context_id: context.id,
            previous,
        }
    }

    fn leave(&self, context_id: u64, root: u64, previous: Option<u64>) {
        if let Some(mut chain) = self.chains.get_mut(&root) {
            chain.pop();
        }
        // a frame that was not nested on its own context established the
        // context's root mapping; tear it down with the frame
        if previous != Some(context_id) {
            self.roots.remove(&context_id);
            self.chains.remove(&context_id);
            self.contexts.remove(&context_id);
        }
        CURRENT_CONTEXT.with(|c| c.set(previous));
    }
}

/// Pops its frame and restores the prior current context on drop
pub struct FrameGuard {
    tracker: Arc<CallChainTracker>,
    context_id: u64,
    root: u64,
    previous: Option<u64>,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.tracker.leave(self.context_id, self.root, self.previous);
    }
}

/// Restores the prior current context and discards the activated
/// context's chain bookkeeping on drop
pub struct ContextActivation {
    tracker: Arc<CallChainTracker>,
    context_id: u64,
    previous: Option<u64>,
}

impl Drop for ContextActivation {
    fn drop(&mut self) {
        if self.previous != Some(self.context_id) {
            self.tracker.roots.remove(&self.context_id);
            self.tracker.chains.remove(&self.context_id);
            self.tracker.contexts.remove(&self.context_id);
        }
        CURRENT_CONTEXT.with(|c| c.set(self.previous));
    }
}

/// Reusable pool of execution contexts for worker threads.
///
/// Checked-out contexts come back with empty bindings; stale state never
/// leaks between users.
pub struct ContextPool {
    free: Mutex<Vec<Arc<ExecutionContext>>>,
    next_id: AtomicU64,
}

impl ContextPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn checkout(self: &Arc<Self>) -> PooledContext {
        let context = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| ExecutionContext::new(self.next_id.fetch_add(1, Ordering::Relaxed)));
        context.reset();
        PooledContext {
            pool: self.clone(),
            context: Some(context),
        }
    }
}

pub struct PooledContext {
    pool: Arc<ContextPool>,
    context: Option<Arc<ExecutionContext>>,
}

impl PooledContext {
    pub fn context(&self) -> &Arc<ExecutionContext> {
        self.context.as_ref().expect("context present until drop")
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.pool.free.lock().push(context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptenv_core::DynamicScript;

    fn script(source: &str) -> Arc<dyn ReferenceScript> {
        Arc::new(DynamicScript::new(source))
    }

    #[test]
    fn test_frames_nest_and_unwind() {
        let tracker = CallChainTracker::new();
        let pool = ContextPool::new();
        let ctx = pool.checkout();

        assert!(tracker.current_script().is_none());
        {
            let _outer = tracker.enter(ctx.context(), script("outer()"), true);
            assert_eq!(tracker.call_chain().len(), 1);
            {
                let _inner = tracker.enter(ctx.context(), script("inner()"), false);
                assert_eq!(tracker.call_chain().len(), 2);
            }
            assert_eq!(tracker.call_chain().len(), 1);
        }
        assert!(tracker.current_script().is_none());
        assert_eq!(tracker.chain_depth(ctx.context()), 0);
    }

    #[test]
    fn test_nested_context_continues_callers_chain() {
        let tracker = CallChainTracker::new();
        let pool = ContextPool::new();
        let outer = pool.checkout();
        let inner = pool.checkout();

        let _outer_frame = tracker.enter(outer.context(), script("outer()"), true);
        {
            // a fresh context started mid-execution joins the caller's root
            let _inner_frame = tracker.enter(inner.context(), script("inner()"), false);
            assert_eq!(tracker.call_chain().len(), 2);
            assert_eq!(
                tracker.current_script().unwrap().name(),
                script("inner()").name()
            );
        }
        assert_eq!(tracker.call_chain().len(), 1);
        assert_eq!(tracker.chain_depth(inner.context()), 0);
    }

    #[test]
    fn test_new_root_isolates_chain() {
        let tracker = CallChainTracker::new();
        let pool = ContextPool::new();
        let outer = pool.checkout();
        let inner = pool.checkout();

        let _outer_frame = tracker.enter(outer.context(), script("outer()"), true);
        {
            let _inner_frame = tracker.enter(inner.context(), script("inner()"), true);
            assert_eq!(tracker.call_chain().len(), 1);
        }
        assert_eq!(tracker.call_chain().len(), 1);
    }

    #[test]
    fn test_inherit_requires_parent_chain() {
        let tracker = CallChainTracker::new();
        let pool = ContextPool::new();
        let parent = pool.checkout();
        let worker = pool.checkout();

        assert!(matches!(
            tracker.inherit_call_chain(worker.context(), parent.context()),
            Err(ScriptError::NoParentCallChain)
        ));

        let _frame = tracker.enter(parent.context(), script("spawner()"), true);
        tracker
            .inherit_call_chain(worker.context(), parent.context())
            .unwrap();
        assert_eq!(tracker.chain_depth(worker.context()), 1);
    }

    #[test]
    fn test_inherit_rejects_initialized_chain() {
        let tracker = CallChainTracker::new();
        let pool = ContextPool::new();
        let parent = pool.checkout();
        let worker = pool.checkout();

        let _parent_frame = tracker.enter(parent.context(), script("spawner()"), true);
        tracker
            .inherit_call_chain(worker.context(), parent.context())
            .unwrap();
        assert!(matches!(
            tracker.inherit_call_chain(worker.context(), parent.context()),
            Err(ScriptError::CallChainInitialized)
        ));
    }

    #[test]
    fn test_current_context_restored_across_frames() {
        let tracker = CallChainTracker::new();
        let pool = ContextPool::new();
        let a = pool.checkout();
        let b = pool.checkout();

        let _fa = tracker.enter(a.context(), script("a()"), true);
        assert_eq!(tracker.current_context_id(), Some(a.context().id()));
        {
            let _fb = tracker.enter(b.context(), script("b()"), true);
            assert_eq!(tracker.current_context_id(), Some(b.context().id()));
        }
        assert_eq!(tracker.current_context_id(), Some(a.context().id()));
    }

    #[test]
    fn test_pool_clears_bindings_on_checkout() {
        let pool = ContextPool::new();
        let id = {
            let ctx = pool.checkout();
            ctx.context()
                .scope()
                .put("leftover", scriptenv_core::ScriptValue::Bool(true))
                .unwrap();
            ctx.context().id()
        };
        let reused = pool.checkout();
        assert_eq!(reused.context().id(), id);
        assert!(reused.context().scope().get("leftover").is_none());
    }

    #[test]
    fn test_chain_visible_from_other_thread_via_context() {
        let tracker = CallChainTracker::new();
        let pool = ContextPool::new();
        let parent = pool.checkout();
        let _frame = tracker.enter(parent.context(), script("spawner()"), true);

        let tracker2 = tracker.clone();
        let parent_ctx = parent.context().clone();
        let pool2 = pool.clone();
        std::thread::spawn(move || {
            let worker = pool2.checkout();
            tracker2
                .inherit_call_chain(worker.context(), &parent_ctx)
                .unwrap();
            let _f = tracker2.enter(worker.context(), script("work()"), false);
            assert_eq!(tracker2.call_chain().len(), 2);
        })
        .join()
        .unwrap();
    }
}
