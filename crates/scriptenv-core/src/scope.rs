//! Execution scopes
//!
//! A [`Scope`] is a chain of binding tables. Lookups fall through to the
//! parent on miss; mutation always targets the scope it is invoked on.
//! Sealing a scope freezes its own table while leaving children free, which
//! is how shared seed scopes are protected from script-level tampering.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{ScriptError, ScriptResult};
use crate::value::{ScriptObject, ScriptValue};

#[derive(Clone, Debug)]
struct Binding {
    value: ScriptValue,
    read_only: bool,
    permanent: bool,
}

pub struct Scope {
    bindings: RwLock<BTreeMap<String, Binding>>,
    parent: Option<Arc<Scope>>,
    sealed: AtomicBool,
}

impl Scope {
    pub fn new_root() -> Arc<Self> {
        Arc::new(Self {
            bindings: RwLock::new(BTreeMap::new()),
            parent: None,
            sealed: AtomicBool::new(false),
        })
    }

    /// A child scope whose lookups fall through to `parent`
    pub fn child_of(parent: &Arc<Scope>) -> Arc<Self> {
        Arc::new(Self {
            bindings: RwLock::new(BTreeMap::new()),
            parent: Some(parent.clone()),
            sealed: AtomicBool::new(false),
        })
    }

    pub fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }

    pub fn put(&self, name: &str, value: ScriptValue) -> ScriptResult<()> {
        self.insert(name, value, false, false)
    }

    /// Bind a value that scripts may read but never reassign or delete
    pub fn put_const(&self, name: &str, value: ScriptValue) -> ScriptResult<()> {
        self.insert(name, value, true, true)
    }

    fn insert(
        &self,
        name: &str,
        value: ScriptValue,
        read_only: bool,
        permanent: bool,
    ) -> ScriptResult<()> {
        if self.is_sealed() {
            return Err(ScriptError::SealedScope(name.to_string()));
        }
        // read-only bindings are protected against shadowing from child
        // scopes as well, so contributed functions stay available to
        // nested imports sharing the chain
        if self.is_read_only(name) {
            return Err(ScriptError::ReadOnlyBinding(name.to_string()));
        }
        let mut bindings = self.bindings.write();
        bindings.insert(
            name.to_string(),
            Binding {
                value,
                read_only,
                permanent,
            },
        );
        Ok(())
    }

    fn is_read_only(&self, name: &str) -> bool {
        if let Some(binding) = self.bindings.read().get(name) {
            return binding.read_only;
        }
        self.parent.as_ref().is_some_and(|p| p.is_read_only(name))
    }

    /// Look `name` up, falling through the parent chain on miss
    pub fn get(&self, name: &str) -> Option<ScriptValue> {
        if let Some(binding) = self.bindings.read().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    pub fn has(&self, name: &str) -> bool {
        self.has_own(name) || self.parent.as_ref().is_some_and(|p| p.has(name))
    }

    /// Whether the binding exists on this scope itself, ignoring parents
    pub fn has_own(&self, name: &str) -> bool {
        self.bindings.read().contains_key(name)
    }

    pub fn delete(&self, name: &str) -> ScriptResult<()> {
        if self.is_sealed() {
            return Err(ScriptError::SealedScope(name.to_string()));
        }
        let mut bindings = self.bindings.write();
        if let Some(binding) = bindings.get(name) {
            if binding.permanent {
                return Err(ScriptError::ReadOnlyBinding(name.to_string()));
            }
            bindings.remove(name);
        }
        Ok(())
    }

    /// Drop a binding outright, ignoring the read-only and permanent
    /// flags. Owner-level operation for staging a scope before it is
    /// sealed and shared; sealed scopes still refuse.
    pub fn remove_binding(&self, name: &str) -> bool {
        if self.is_sealed() {
            return false;
        }
        self.bindings.write().remove(name).is_some()
    }

    /// Names bound on this scope itself, ignoring parents
    pub fn own_ids(&self) -> Vec<String> {
        self.bindings.read().keys().cloned().collect()
    }

    /// Snapshot of the scope's own bindings
    pub fn own_bindings(&self) -> BTreeMap<String, ScriptValue> {
        self.bindings
            .read()
            .iter()
            .map(|(k, b)| (k.clone(), b.value.clone()))
            .collect()
    }

    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("bindings", &self.own_ids())
            .field("sealed", &self.is_sealed())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Exposes a [`Scope`] through the [`ScriptObject`] surface so it can be
/// handed to scripts and wrapped by facades like any other object
pub struct ScopeObject {
    scope: Arc<Scope>,
}

impl ScopeObject {
    pub fn wrap(scope: Arc<Scope>) -> Arc<Self> {
        Arc::new(Self { scope })
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }
}

impl ScriptObject for ScopeObject {
    fn get(&self, name: &str) -> Option<ScriptValue> {
        // own slots only; fall-through is modeled as the prototype link
        if self.scope.has_own(name) {
            self.scope.get(name)
        } else {
            None
        }
    }

    fn put(
        &self,
        name: &str,
        _start: Option<&Arc<dyn ScriptObject>>,
        value: ScriptValue,
    ) -> ScriptResult<()> {
        self.scope.put(name, value)
    }

    fn delete(&self, name: &str) -> ScriptResult<()> {
        self.scope.delete(name)
    }

    fn has(&self, name: &str) -> bool {
        self.scope.has_own(name)
    }

    fn ids(&self) -> Vec<String> {
        self.scope.own_ids()
    }

    fn prototype(&self) -> Option<Arc<dyn ScriptObject>> {
        self.scope
            .parent()
            .map(|p| ScopeObject::wrap(p.clone()) as Arc<dyn ScriptObject>)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_falls_through_to_parent() {
        let root = Scope::new_root();
        root.put("shared", ScriptValue::string("root")).unwrap();
        let child = Scope::child_of(&root);

        assert_eq!(child.get("shared"), Some(ScriptValue::string("root")));
        assert!(!child.has_own("shared"));
        assert!(child.has("shared"));
    }

    #[test]
    fn test_child_shadowing_leaves_parent_untouched() {
        let root = Scope::new_root();
        root.put("name", ScriptValue::string("root")).unwrap();
        let child = Scope::child_of(&root);
        child.put("name", ScriptValue::string("child")).unwrap();

        assert_eq!(child.get("name"), Some(ScriptValue::string("child")));
        assert_eq!(root.get("name"), Some(ScriptValue::string("root")));
    }

    #[test]
    fn test_sealed_scope_rejects_mutation_but_allows_children() {
        let root = Scope::new_root();
        root.put("fixed", ScriptValue::Bool(true)).unwrap();
        root.seal();

        assert!(matches!(
            root.put("other", ScriptValue::Null),
            Err(ScriptError::SealedScope(_))
        ));
        assert!(root.delete("fixed").is_err());

        // a child over a sealed scope is still freely writable
        let child = Scope::child_of(&root);
        child.put("other", ScriptValue::Null).unwrap();
        assert_eq!(child.get("fixed"), Some(ScriptValue::Bool(true)));
    }

    #[test]
    fn test_const_binding_cannot_be_reassigned_or_deleted() {
        let scope = Scope::new_root();
        scope.put_const("logger", ScriptValue::string("ref")).unwrap();
        assert!(matches!(
            scope.put("logger", ScriptValue::Null),
            Err(ScriptError::ReadOnlyBinding(_))
        ));
        assert!(scope.delete("logger").is_err());
        assert_eq!(scope.get("logger"), Some(ScriptValue::string("ref")));
    }

    #[test]
    fn test_const_binding_cannot_be_shadowed_by_children() {
        let root = Scope::new_root();
        root.put_const("importScript", ScriptValue::string("fn")).unwrap();
        let child = Scope::child_of(&root);
        assert!(matches!(
            child.put("importScript", ScriptValue::Null),
            Err(ScriptError::ReadOnlyBinding(_))
        ));
    }

    #[test]
    fn test_remove_binding_overrides_const_until_sealed() {
        let scope = Scope::new_root();
        scope.put_const("native", ScriptValue::string("fn")).unwrap();
        assert!(scope.remove_binding("native"));
        assert_eq!(scope.get("native"), None);

        scope.put_const("kept", ScriptValue::Bool(true)).unwrap();
        scope.seal();
        assert!(!scope.remove_binding("kept"));
        assert_eq!(scope.get("kept"), Some(ScriptValue::Bool(true)));
    }

    #[test]
    fn test_scope_object_prototype_mirrors_parent() {
        let root = Scope::new_root();
        root.put("base", ScriptValue::Number(1.0)).unwrap();
        let child = Scope::child_of(&root);
        let obj = ScopeObject::wrap(child);

        assert!(!obj.has("base"));
        let proto = obj.prototype().expect("parent link");
        assert!(proto.has("base"));
    }
}
