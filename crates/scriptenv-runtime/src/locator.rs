//! Script locator protocol and registry
//!
//! A locator turns a logical import request into a concrete
//! [`ReferenceScript`]. Each locator covers one addressing scheme and is
//! registered under a name; imports pick the locator by that name. A
//! locator returning `Ok(None)` means "not found here", which is not an
//! error; the import function decides whether a miss is fatal.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use scriptenv_core::{ReferenceScript, ScriptResult, ScriptValue};

/// Optional per-resolution parameters, e.g. version filters
pub type ResolutionParams = BTreeMap<String, ScriptValue>;

pub trait ScriptLocator: Send + Sync {
    /// Resolve `location` against the script that requested the import.
    ///
    /// `reference` is `None` for top-level executions with no calling
    /// script, in which case only absolute locations can resolve.
    fn resolve_location(
        &self,
        reference: Option<&Arc<dyn ReferenceScript>>,
        location: &str,
        params: Option<&ResolutionParams>,
    ) -> ScriptResult<Option<Arc<dyn ReferenceScript>>>;
}

/// Name-keyed locator registry; last registration under a name wins
pub struct ScriptLocatorRegistry {
    locators: RwLock<HashMap<String, Arc<dyn ScriptLocator>>>,
}

impl ScriptLocatorRegistry {
    pub fn new() -> Self {
        Self {
            locators: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: &str, locator: Arc<dyn ScriptLocator>) {
        let mut locators = self.locators.write();
        if locators.insert(name.to_string(), locator).is_some() {
            warn!(name, "replacing previously registered script locator");
        }
    }

    pub fn locator_names(&self) -> Vec<String> {
        self.locators.read().keys().cloned().collect()
    }

    /// Resolve through the locator registered under `locator_name`.
    ///
    /// An unknown locator name resolves to nothing, with a warning; the
    /// caller's missing-script policy applies as for any other miss.
    pub fn resolve(
        &self,
        reference: Option<&Arc<dyn ReferenceScript>>,
        locator_name: &str,
        location: &str,
        params: Option<&ResolutionParams>,
    ) -> ScriptResult<Option<Arc<dyn ReferenceScript>>> {
        let locator = self.locators.read().get(locator_name).cloned();
        match locator {
            Some(locator) => {
                let resolved = locator.resolve_location(reference, location, params)?;
                debug!(
                    locator = locator_name,
                    location,
                    resolved = resolved.is_some(),
                    "script resolution"
                );
                Ok(resolved)
            }
            None => {
                warn!(
                    locator = locator_name,
                    location, "no script locator registered under this name"
                );
                Ok(None)
            }
        }
    }
}

impl Default for ScriptLocatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
