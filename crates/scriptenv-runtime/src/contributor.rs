//! Scope contributors
//!
//! Contributors inject named bindings into scopes at construction time.
//! Contributed bindings are read-only and permanent so nested imports
//! sharing the scope chain can rely on their availability.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use scriptenv_core::{Scope, ScriptResult};

pub trait ScopeContributor: Send + Sync {
    /// Populate `scope` with this contributor's bindings.
    ///
    /// `trustworthy` gates privileged helpers; `mutable_scope` is false for
    /// long-lived seed scopes, which are sealed after contribution.
    fn contribute(
        &self,
        scope: &Arc<Scope>,
        trustworthy: bool,
        mutable_scope: bool,
    ) -> ScriptResult<()>;
}

/// Registration-order collection of contributors; re-registering the same
/// contributor instance is a no-op
pub struct ScopeContributorSet {
    contributors: RwLock<Vec<Arc<dyn ScopeContributor>>>,
}

impl ScopeContributorSet {
    pub fn new() -> Self {
        Self {
            contributors: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, contributor: Arc<dyn ScopeContributor>) {
        let mut contributors = self.contributors.write();
        let already_registered = contributors
            .iter()
            .any(|existing| Arc::ptr_eq(existing, &contributor));
        if !already_registered {
            contributors.push(contributor);
        }
    }

    pub fn len(&self) -> usize {
        self.contributors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contributors.read().is_empty()
    }

    /// Invoke every contributor on `scope` in registration order
    pub fn contribute_all(
        &self,
        scope: &Arc<Scope>,
        trustworthy: bool,
        mutable_scope: bool,
    ) -> ScriptResult<()> {
        let contributors = self.contributors.read().clone();
        debug!(
            count = contributors.len(),
            trustworthy, mutable_scope, "contributing to scope"
        );
        for contributor in &contributors {
            contributor.contribute(scope, trustworthy, mutable_scope)?;
        }
        Ok(())
    }
}

impl Default for ScopeContributorSet {
    fn default() -> Self {
        Self::new()
    }
}
