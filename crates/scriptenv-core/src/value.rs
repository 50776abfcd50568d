//! Engine-neutral value model
//!
//! [`ScriptValue`] is the interchange representation passed between the host
//! and the embedded engines. Engine-native objects stay behind the
//! [`ScriptObject`] trait so that facades, scopes and converters can treat
//! every engine uniformly.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::error::{ScriptError, ScriptResult};

/// A value crossing the host/engine boundary
#[derive(Clone)]
pub enum ScriptValue {
    Null,
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    Date(SystemTime),
    List(Vec<ScriptValue>),
    Map(BTreeMap<String, ScriptValue>),
    /// An engine-native object handle
    Object(Arc<dyn ScriptObject>),
}

impl ScriptValue {
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    pub fn object(obj: Arc<dyn ScriptObject>) -> Self {
        Self::Object(obj)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Object(obj) if obj.is_function())
    }

    pub fn as_object(&self) -> Option<&Arc<dyn ScriptObject>> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Truthiness following the usual script-language convention
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null | Self::Undefined => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            _ => true,
        }
    }
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) | (Self::Undefined, Self::Undefined) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            // object equality is identity
            (Self::Object(a), Self::Object(b)) => object_id(a) == object_id(b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for ScriptValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Undefined => f.write_str("Undefined"),
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::Number(n) => write!(f, "Number({})", n),
            Self::String(s) => write!(f, "String({:?})", s),
            Self::Date(d) => write!(f, "Date({:?})", d),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            Self::Object(obj) => write!(f, "Object(0x{:x})", object_id(obj)),
        }
    }
}

impl From<serde_json::Value> for ScriptValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, ScriptValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// The engine-native object surface.
///
/// `get`/`put`/`delete` operate on the object's own slots; prototype-chain
/// traversal is the caller's responsibility (see [`get_property`]). The
/// `start` argument of `put` identifies the object the property access
/// originated on when `self` is acting as a prototype.
pub trait ScriptObject: Send + Sync {
    fn get(&self, name: &str) -> Option<ScriptValue>;

    fn put(
        &self,
        name: &str,
        start: Option<&Arc<dyn ScriptObject>>,
        value: ScriptValue,
    ) -> ScriptResult<()>;

    fn delete(&self, name: &str) -> ScriptResult<()>;

    fn has(&self, name: &str) -> bool;

    fn ids(&self) -> Vec<String>;

    fn prototype(&self) -> Option<Arc<dyn ScriptObject>>;

    fn call(
        &self,
        _this: Option<Arc<dyn ScriptObject>>,
        _args: &[ScriptValue],
    ) -> ScriptResult<ScriptValue> {
        Err(ScriptError::internal("object is not callable"))
    }

    fn construct(&self, _args: &[ScriptValue]) -> ScriptResult<Arc<dyn ScriptObject>> {
        Err(ScriptError::internal("object is not constructable"))
    }

    fn is_function(&self) -> bool {
        false
    }

    /// Whether the object is thread-safe by contract and needs no state
    /// locking when shared across worker threads
    fn thread_safe(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
}

/// Stable identity of an object handle, used for facade cache keys
pub fn object_id(obj: &Arc<dyn ScriptObject>) -> usize {
    Arc::as_ptr(obj) as *const () as usize
}

/// Looks `name` up on `obj`, falling through the prototype chain on miss
pub fn get_property(obj: &Arc<dyn ScriptObject>, name: &str) -> Option<ScriptValue> {
    let mut current = obj.clone();
    loop {
        if let Some(value) = current.get(name) {
            return Some(value);
        }
        match current.prototype() {
            Some(proto) => current = proto,
            None => return None,
        }
    }
}

/// Default table-backed object implementation
pub struct PlainScriptObject {
    slots: RwLock<BTreeMap<String, ScriptValue>>,
    prototype: RwLock<Option<Arc<dyn ScriptObject>>>,
    sealed: AtomicBool,
    thread_safe: bool,
}

impl PlainScriptObject {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: RwLock::new(BTreeMap::new()),
            prototype: RwLock::new(None),
            sealed: AtomicBool::new(false),
            thread_safe: false,
        })
    }

    /// Create an object marked thread-safe by contract, e.g. a processor
    /// extension implemented with internal synchronization
    pub fn new_thread_safe() -> Arc<Self> {
        Arc::new(Self {
            slots: RwLock::new(BTreeMap::new()),
            prototype: RwLock::new(None),
            sealed: AtomicBool::new(false),
            thread_safe: true,
        })
    }

    pub fn set_prototype(&self, prototype: Option<Arc<dyn ScriptObject>>) {
        *self.prototype.write() = prototype;
    }

    /// Seal the object against any further direct mutation
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }
}

impl ScriptObject for PlainScriptObject {
    fn get(&self, name: &str) -> Option<ScriptValue> {
        self.slots.read().get(name).cloned()
    }

    fn put(
        &self,
        name: &str,
        _start: Option<&Arc<dyn ScriptObject>>,
        value: ScriptValue,
    ) -> ScriptResult<()> {
        if self.is_sealed() {
            return Err(ScriptError::SealedScope(name.to_string()));
        }
        self.slots.write().insert(name.to_string(), value);
        Ok(())
    }

    fn delete(&self, name: &str) -> ScriptResult<()> {
        if self.is_sealed() {
            return Err(ScriptError::SealedScope(name.to_string()));
        }
        self.slots.write().remove(name);
        Ok(())
    }

    fn has(&self, name: &str) -> bool {
        self.slots.read().contains_key(name)
    }

    fn ids(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    fn prototype(&self) -> Option<Arc<dyn ScriptObject>> {
        self.prototype.read().clone()
    }

    fn thread_safe(&self) -> bool {
        self.thread_safe
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

type HostFn =
    dyn Fn(Option<Arc<dyn ScriptObject>>, &[ScriptValue]) -> ScriptResult<ScriptValue>
        + Send
        + Sync;

/// A host-implemented function exposed to scripts
pub struct HostFunction {
    name: String,
    body: Box<HostFn>,
}

impl HostFunction {
    pub fn new<F>(name: &str, body: F) -> Arc<Self>
    where
        F: Fn(Option<Arc<dyn ScriptObject>>, &[ScriptValue]) -> ScriptResult<ScriptValue>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            body: Box::new(body),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ScriptObject for HostFunction {
    fn get(&self, name: &str) -> Option<ScriptValue> {
        match name {
            "name" => Some(ScriptValue::string(&self.name)),
            _ => None,
        }
    }

    fn put(
        &self,
        name: &str,
        _start: Option<&Arc<dyn ScriptObject>>,
        _value: ScriptValue,
    ) -> ScriptResult<()> {
        Err(ScriptError::ReadOnlyBinding(name.to_string()))
    }

    fn delete(&self, name: &str) -> ScriptResult<()> {
        Err(ScriptError::ReadOnlyBinding(name.to_string()))
    }

    fn has(&self, name: &str) -> bool {
        name == "name"
    }

    fn ids(&self) -> Vec<String> {
        vec!["name".to_string()]
    }

    fn prototype(&self) -> Option<Arc<dyn ScriptObject>> {
        None
    }

    fn call(
        &self,
        this: Option<Arc<dyn ScriptObject>>,
        args: &[ScriptValue],
    ) -> ScriptResult<ScriptValue> {
        (self.body)(this, args)
    }

    fn is_function(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
