//! Object facades for cross-thread script object sharing
//!
//! Script objects are written assuming single-threaded access. When batch
//! workers share objects with the orchestrating script, every shared object
//! is wrapped in a facade: objects that are thread-safe by contract get a
//! plain delegating facade, everything else gets a state-locking facade
//! that serializes access through a read/write lock.
//!
//! At most one facade exists per (object, reference scope) pair. Lookups
//! go through a thread-local cache first (no contention on repeated
//! same-thread access), then through a per-scope global cache under that
//! scope's own lock, with the double-checked pattern on construction.
//! Wrapping an existing facade returns it unchanged.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use scriptenv_core::{ScriptObject, ScriptResult, ScriptValue, Scope, object_id};

/// Facade choice for one wrapped object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FacadeKind {
    /// Thread-safe by contract; delegate without locking
    ThreadSafe,
    /// Presumed single-threaded; serialize through a state lock
    StateLocking,
}

/// Inspects a real object and picks its facade kind
pub type ObjectClassifier = Box<dyn Fn(&Arc<dyn ScriptObject>) -> FacadeKind + Send + Sync>;

thread_local! {
    /// (factory id, scope id, object id) -> facade
    static LOCAL_FACADES: RefCell<HashMap<(u64, usize, usize), Arc<dyn ScriptObject>>> =
        RefCell::new(HashMap::new());
}

static FACTORY_IDS: AtomicU64 = AtomicU64::new(1);

struct ScopeCache {
    entries: Mutex<HashMap<usize, Weak<dyn ScriptObject>>>,
}

pub struct FacadeFactory {
    id: u64,
    classifier: ObjectClassifier,
    caches: Mutex<HashMap<usize, Arc<ScopeCache>>>,
}

impl FacadeFactory {
    /// Factory with the default classification: objects claiming thread
    /// safety delegate plainly, everything else state-locks
    pub fn new() -> Arc<Self> {
        Self::with_classifier(Box::new(|obj| {
            if obj.thread_safe() {
                FacadeKind::ThreadSafe
            } else {
                FacadeKind::StateLocking
            }
        }))
    }

    pub fn with_classifier(classifier: ObjectClassifier) -> Arc<Self> {
        Arc::new(Self {
            id: FACTORY_IDS.fetch_add(1, Ordering::Relaxed),
            classifier,
            caches: Mutex::new(HashMap::new()),
        })
    }

    fn scope_key(scope: &Arc<Scope>) -> usize {
        Arc::as_ptr(scope) as usize
    }

    /// Wrap `value` for sharing across threads under `reference_scope`
    pub fn facade_value(
        self: &Arc<Self>,
        value: &ScriptValue,
        reference_scope: &Arc<Scope>,
    ) -> ScriptValue {
        match value {
            ScriptValue::Object(obj) => {
                ScriptValue::Object(self.facade_object(obj, reference_scope, None))
            }
            other => other.clone(),
        }
    }

    /// Wrap `obj` for sharing across threads under `reference_scope`.
    ///
    /// `access_name` is the property name the object was fetched under,
    /// used by the state-locking facade's read-only call heuristic.
    pub fn facade_object(
        self: &Arc<Self>,
        obj: &Arc<dyn ScriptObject>,
        reference_scope: &Arc<Scope>,
        access_name: Option<&str>,
    ) -> Arc<dyn ScriptObject> {
        // never double-wrap
        if is_facade(obj.as_ref()) {
            record_access_name(obj, access_name);
            return obj.clone();
        }

        let scope_key = Self::scope_key(reference_scope);
        let local_key = (self.id, scope_key, object_id(obj));

        if let Some(hit) =
            LOCAL_FACADES.with(|local| local.borrow().get(&local_key).cloned())
        {
            record_access_name(&hit, access_name);
            return hit;
        }

        let cache = {
            let mut caches = self.caches.lock();
            caches
                .entry(scope_key)
                .or_insert_with(|| {
                    Arc::new(ScopeCache {
                        entries: Mutex::new(HashMap::new()),
                    })
                })
                .clone()
        };

        // per-scope lock; unrelated scopes never contend here
        let mut entries = cache.entries.lock();
        let facade = match entries.get(&object_id(obj)).and_then(Weak::upgrade) {
            Some(existing) => existing,
            None => {
                let created = self.construct_facade(obj, reference_scope);
                entries.insert(object_id(obj), Arc::downgrade(&created));
                created
            }
        };
        drop(entries);

        LOCAL_FACADES.with(|local| {
            local.borrow_mut().insert(local_key, facade.clone());
        });
        record_access_name(&facade, access_name);
        facade
    }

    fn construct_facade(
        self: &Arc<Self>,
        obj: &Arc<dyn ScriptObject>,
        reference_scope: &Arc<Scope>,
    ) -> Arc<dyn ScriptObject> {
        let kind = (self.classifier)(obj);
        trace!(object = object_id(obj), ?kind, "constructing facade");
        match kind {
            FacadeKind::ThreadSafe => Arc::new(DelegatingFacade {
                delegate: obj.clone(),
                factory: Arc::downgrade(self),
                scope: Arc::downgrade(reference_scope),
            }),
            FacadeKind::StateLocking => Arc::new(StateLockingFacade {
                delegate: obj.clone(),
                lock: RwLock::new(()),
                access_name: Mutex::new(None),
                factory: Arc::downgrade(self),
                scope: Arc::downgrade(reference_scope),
            }),
        }
    }

    /// Drop the current thread's cached facades for this factory. Workers
    /// call this when their share of a batch is done.
    pub fn clear_thread(&self) {
        LOCAL_FACADES.with(|local| {
            local
                .borrow_mut()
                .retain(|(factory, _, _), _| *factory != self.id)
        });
    }

    /// Tear down all facades created under `reference_scope`
    pub fn clear_reference_scope(&self, reference_scope: &Arc<Scope>) {
        let scope_key = Self::scope_key(reference_scope);
        self.caches.lock().remove(&scope_key);
        LOCAL_FACADES.with(|local| {
            local
                .borrow_mut()
                .retain(|(factory, scope, _), _| *factory != self.id || *scope != scope_key)
        });
    }
}

fn is_facade(obj: &dyn ScriptObject) -> bool {
    let any = obj.as_any();
    any.is::<StateLockingFacade>() || any.is::<DelegatingFacade>()
}

fn record_access_name(facade: &Arc<dyn ScriptObject>, access_name: Option<&str>) {
    if let Some(name) = access_name {
        if let Some(locking) = facade.as_any().downcast_ref::<StateLockingFacade>() {
            *locking.access_name.lock() = Some(name.to_string());
        }
    }
}

fn facade_nested(
    factory: &Weak<FacadeFactory>,
    scope: &Weak<Scope>,
    value: ScriptValue,
    access_name: Option<&str>,
) -> ScriptValue {
    match (&value, factory.upgrade(), scope.upgrade()) {
        (ScriptValue::Object(obj), Some(factory), Some(scope)) => {
            ScriptValue::Object(factory.facade_object(obj, &scope, access_name))
        }
        _ => value,
    }
}

/// Pass-through facade for objects that are thread-safe by contract.
///
/// Still routes returned objects through the factory so nothing unwrapped
/// leaks out of the facaded graph.
pub struct DelegatingFacade {
    delegate: Arc<dyn ScriptObject>,
    factory: Weak<FacadeFactory>,
    scope: Weak<Scope>,
}

impl ScriptObject for DelegatingFacade {
    fn get(&self, name: &str) -> Option<ScriptValue> {
        self.delegate
            .get(name)
            .map(|v| facade_nested(&self.factory, &self.scope, v, Some(name)))
    }

    fn put(
        &self,
        name: &str,
        start: Option<&Arc<dyn ScriptObject>>,
        value: ScriptValue,
    ) -> ScriptResult<()> {
        self.delegate.put(name, start, value)
    }

    fn delete(&self, name: &str) -> ScriptResult<()> {
        self.delegate.delete(name)
    }

    fn has(&self, name: &str) -> bool {
        self.delegate.has(name)
    }

    fn ids(&self) -> Vec<String> {
        self.delegate.ids()
    }

    fn prototype(&self) -> Option<Arc<dyn ScriptObject>> {
        let proto = self.delegate.prototype()?;
        match (self.factory.upgrade(), self.scope.upgrade()) {
            (Some(factory), Some(scope)) => Some(factory.facade_object(&proto, &scope, None)),
            _ => Some(proto),
        }
    }

    fn call(
        &self,
        this: Option<Arc<dyn ScriptObject>>,
        args: &[ScriptValue],
    ) -> ScriptResult<ScriptValue> {
        let result = self.delegate.call(this, args)?;
        Ok(facade_nested(&self.factory, &self.scope, result, None))
    }

    fn construct(&self, args: &[ScriptValue]) -> ScriptResult<Arc<dyn ScriptObject>> {
        let constructed = self.delegate.construct(args)?;
        match (self.factory.upgrade(), self.scope.upgrade()) {
            (Some(factory), Some(scope)) => Ok(factory.facade_object(&constructed, &scope, None)),
            _ => Ok(constructed),
        }
    }

    fn is_function(&self) -> bool {
        self.delegate.is_function()
    }

    fn thread_safe(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Names (and name prefixes, when followed by an uppercase letter) of
/// functions presumed not to mutate their owner
const READ_ONLY_FUNCTION_NAMES: [&str; 7] =
    ["get", "is", "has", "find", "toString", "search", "query"];
const READ_ONLY_FUNCTION_PREFIXES: [&str; 6] = ["get", "is", "has", "find", "search", "query"];

fn presumed_read_only(access_name: &str) -> bool {
    if READ_ONLY_FUNCTION_NAMES.contains(&access_name) {
        return true;
    }
    READ_ONLY_FUNCTION_PREFIXES.iter().any(|prefix| {
        access_name.len() > prefix.len()
            && access_name.starts_with(prefix)
            && access_name[prefix.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_uppercase())
    })
}

/// Serializes access to a presumed single-threaded object.
///
/// Reads (get, has, ids, prototype) take the read lock; writes (put,
/// delete) take the write lock. When a write lands on this object acting
/// as the prototype of another state-locking facade, the descendant is
/// co-locked after `self` so prototype-chain writes stay atomic across
/// both, with a consistent acquisition order. Calls lock the function and
/// its `this` object, read-shaped when the access name says the function
/// is presumed read-only.
pub struct StateLockingFacade {
    delegate: Arc<dyn ScriptObject>,
    lock: RwLock<()>,
    /// Name the object was most recently fetched under, shared by every
    /// holder of this facade; it lives and dies with the facade
    access_name: Mutex<Option<String>>,
    factory: Weak<FacadeFactory>,
    scope: Weak<Scope>,
}

impl StateLockingFacade {
    pub fn delegate(&self) -> &Arc<dyn ScriptObject> {
        &self.delegate
    }

    fn self_addr(&self) -> usize {
        self as *const Self as *const () as usize
    }

    fn access_name(&self) -> Option<String> {
        self.access_name.lock().clone()
    }
}

impl ScriptObject for StateLockingFacade {
    fn get(&self, name: &str) -> Option<ScriptValue> {
        let value = {
            let _read = self.lock.read_recursive();
            self.delegate.get(name)?
        };
        Some(facade_nested(&self.factory, &self.scope, value, Some(name)))
    }

    fn put(
        &self,
        name: &str,
        start: Option<&Arc<dyn ScriptObject>>,
        value: ScriptValue,
    ) -> ScriptResult<()> {
        let _write = self.lock.write();
        // self is locked before the foreign descendant, always in that
        // order, so two prototype-chain writers cannot deadlock
        match start.and_then(|s| s.as_any().downcast_ref::<StateLockingFacade>()) {
            Some(descendant) if descendant.self_addr() != self.self_addr() => {
                let _descendant_write = descendant.lock.write();
                self.delegate.put(name, start, value)
            }
            _ => self.delegate.put(name, start, value),
        }
    }

    fn delete(&self, name: &str) -> ScriptResult<()> {
        let _write = self.lock.write();
        self.delegate.delete(name)
    }

    fn has(&self, name: &str) -> bool {
        let _read = self.lock.read_recursive();
        self.delegate.has(name)
    }

    fn ids(&self) -> Vec<String> {
        let _read = self.lock.read_recursive();
        self.delegate.ids()
    }

    fn prototype(&self) -> Option<Arc<dyn ScriptObject>> {
        let proto = {
            let _read = self.lock.read_recursive();
            self.delegate.prototype()?
        };
        match (self.factory.upgrade(), self.scope.upgrade()) {
            (Some(factory), Some(scope)) => Some(factory.facade_object(&proto, &scope, None)),
            _ => Some(proto),
        }
    }

    fn call(
        &self,
        this: Option<Arc<dyn ScriptObject>>,
        args: &[ScriptValue],
    ) -> ScriptResult<ScriptValue> {
        let read_only = self
            .access_name()
            .is_some_and(|name| presumed_read_only(&name));

        // invocation may mutate both the function object and its this
        let (_self_read, _self_write);
        if read_only {
            _self_read = Some(self.lock.read_recursive());
            _self_write = None;
        } else {
            _self_read = None;
            _self_write = Some(self.lock.write());
        }

        let this_facade = this
            .as_ref()
            .and_then(|t| t.as_any().downcast_ref::<StateLockingFacade>());
        let (_this_read, _this_write);
        match this_facade {
            Some(owner) if owner.self_addr() != self.self_addr() => {
                if read_only {
                    _this_read = Some(owner.lock.read_recursive());
                    _this_write = None;
                } else {
                    _this_read = None;
                    _this_write = Some(owner.lock.write());
                }
            }
            _ => {
                _this_read = None;
                _this_write = None;
            }
        }

        // the underlying function sees the real this, not the facade
        let unwrapped_this = match (this_facade, &this) {
            (Some(owner), _) => Some(owner.delegate.clone()),
            (None, other) => other.clone(),
        };
        let result = self.delegate.call(unwrapped_this, args)?;
        Ok(facade_nested(&self.factory, &self.scope, result, None))
    }

    fn construct(&self, args: &[ScriptValue]) -> ScriptResult<Arc<dyn ScriptObject>> {
        let constructed = {
            let _read = self.lock.read_recursive();
            self.delegate.construct(args)?
        };
        match (self.factory.upgrade(), self.scope.upgrade()) {
            (Some(factory), Some(scope)) => Ok(factory.facade_object(&constructed, &scope, None)),
            _ => Ok(constructed),
        }
    }

    fn is_function(&self) -> bool {
        self.delegate.is_function()
    }

    fn thread_safe(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
