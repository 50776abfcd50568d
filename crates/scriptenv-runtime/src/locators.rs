//! Concrete script locators
//!
//! One locator per addressing scheme: classpath-style resource paths with
//! relative resolution, legacy hierarchical name paths, search-query
//! resolution through a pluggable provider, and an adapter over scripts the
//! host registers directly.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use scriptenv_core::{
    ClasspathScriptContent, ContentReferenceScript, ContentResolver, ReferencePathType,
    ReferenceScript, ScriptContent, ScriptError, ScriptResult,
};

use crate::locator::{ResolutionParams, ScriptLocator};

/// Resolves `location` relative to the path of the referencing script.
///
/// `..` ascends one segment, `.` begins descent without moving, any other
/// segment descends. Ascending past the root or after descent has begun is
/// an error. An absolute location (leading `/`) bypasses relative
/// resolution entirely. A scheme prefix on the reference path (`scheme:`)
/// is stripped before resolution.
pub fn resolve_relative_location(reference_path: &str, location: &str) -> ScriptResult<String> {
    if location.starts_with('/') {
        return Ok(location.to_string());
    }

    let path = match reference_path.find(':') {
        Some(idx) => &reference_path[idx + 1..],
        None => reference_path,
    };
    // base = reference path minus its file segment
    let mut base: Vec<&str> = match path.rfind('/') {
        Some(idx) => path[..idx].split('/').filter(|s| !s.is_empty()).collect(),
        None => Vec::new(),
    };

    let ascension_beyond_root = || ScriptError::AscensionBeyondRoot {
        reference: reference_path.to_string(),
        location: location.to_string(),
    };

    let segments: Vec<&str> = location.split('/').collect();
    let (dirs, file) = segments.split_at(segments.len() - 1);
    let mut descending = false;
    for fragment in dirs {
        match *fragment {
            "" => {}
            ".." => {
                if descending {
                    warn!(reference_path, location, "ascension after descent");
                    return Err(ScriptError::AscensionAfterDescent {
                        reference: reference_path.to_string(),
                        location: location.to_string(),
                    });
                }
                base.pop().ok_or_else(ascension_beyond_root)?;
            }
            "." => descending = true,
            other => {
                descending = true;
                base.push(other);
            }
        }
    }

    let mut resolved = String::new();
    for segment in &base {
        resolved.push('/');
        resolved.push_str(segment);
    }
    resolved.push('/');
    resolved.push_str(file[0]);
    Ok(resolved)
}

fn reference_path_of(reference: &Arc<dyn ReferenceScript>) -> Option<String> {
    reference.reference_path(&ReferencePathType::CLASSPATH)
}

/// Resolve `location`, relative to `reference` where one exists and carries
/// a usable path. References without a supported path type are logged and
/// the location is treated as absolute.
fn effective_path(
    reference: Option<&Arc<dyn ReferenceScript>>,
    location: &str,
) -> ScriptResult<String> {
    match reference {
        Some(reference) if !location.starts_with('/') => match reference_path_of(reference) {
            Some(reference_path) => resolve_relative_location(&reference_path, location),
            None => {
                info!(
                    location,
                    reference = reference.full_name(),
                    "reference location type does not support relative resolution, treating as absolute"
                );
                Ok(location.to_string())
            }
        },
        _ => Ok(location.to_string()),
    }
}

/// Locates scripts as classpath-style resources under a set of roots
pub struct ClasspathScriptLocator {
    resource_roots: Vec<PathBuf>,
    secure: bool,
}

impl ClasspathScriptLocator {
    pub fn new(resource_roots: Vec<PathBuf>) -> Self {
        Self {
            resource_roots,
            secure: true,
        }
    }

    /// Whether located scripts execute with the trustworthy-script flag
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

impl ScriptLocator for ClasspathScriptLocator {
    fn resolve_location(
        &self,
        reference: Option<&Arc<dyn ReferenceScript>>,
        location: &str,
        params: Option<&ResolutionParams>,
    ) -> ScriptResult<Option<Arc<dyn ReferenceScript>>> {
        if params.is_some() {
            info!(location, "classpath locator ignores resolution parameters");
        }
        let absolute = effective_path(reference, location)?;
        debug!(location, absolute, "resolving classpath script");
        let content =
            ClasspathScriptContent::resolve_with_security(&absolute, &self.resource_roots, self.secure);
        Ok(content.map(|c| {
            Arc::new(ContentReferenceScript::new(Arc::new(c) as Arc<dyn ScriptContent>))
                as Arc<dyn ReferenceScript>
        }))
    }
}

/// Locates scripts by legacy hierarchical name path, e.g.
/// `org/example/tools/cleanup.js`, through a content resolver. Names
/// without an extension get `.js` appended before lookup.
pub struct NamePathScriptLocator {
    resolver: Arc<dyn ContentResolver>,
}

impl NamePathScriptLocator {
    pub fn new(resolver: Arc<dyn ContentResolver>) -> Self {
        Self { resolver }
    }
}

impl ScriptLocator for NamePathScriptLocator {
    fn resolve_location(
        &self,
        reference: Option<&Arc<dyn ReferenceScript>>,
        location: &str,
        _params: Option<&ResolutionParams>,
    ) -> ScriptResult<Option<Arc<dyn ReferenceScript>>> {
        let absolute = effective_path(reference, location)?;
        let name_path = if absolute.rsplit('/').next().is_some_and(|f| f.contains('.')) {
            absolute
        } else {
            format!("{}.js", absolute)
        };
        debug!(location, name_path, "resolving name path script");
        let content = self
            .resolver
            .resolve(&name_path)
            .or_else(|| self.resolver.resolve(name_path.trim_start_matches('/')));
        Ok(content.map(|c| {
            Arc::new(ContentReferenceScript::new(Arc::from(c))) as Arc<dyn ReferenceScript>
        }))
    }
}

/// Supplies search-query resolution for [`SearchPathScriptLocator`]
pub trait ScriptSearchProvider: Send + Sync {
    /// All content items matching `query`, in provider-defined order
    fn search(&self, query: &str) -> ScriptResult<Vec<Arc<dyn ScriptContent>>>;
}

/// Locates scripts by handing the location to a search provider and taking
/// the first hit
pub struct SearchPathScriptLocator {
    provider: Arc<dyn ScriptSearchProvider>,
}

impl SearchPathScriptLocator {
    pub fn new(provider: Arc<dyn ScriptSearchProvider>) -> Self {
        Self { provider }
    }
}

impl ScriptLocator for SearchPathScriptLocator {
    fn resolve_location(
        &self,
        _reference: Option<&Arc<dyn ReferenceScript>>,
        location: &str,
        _params: Option<&ResolutionParams>,
    ) -> ScriptResult<Option<Arc<dyn ReferenceScript>>> {
        let mut hits = self.provider.search(location)?;
        if hits.len() > 1 {
            warn!(
                location,
                hits = hits.len(),
                "search resolved multiple scripts, using first"
            );
        }
        if hits.is_empty() {
            return Ok(None);
        }
        let content = hits.remove(0);
        Ok(Some(Arc::new(ContentReferenceScript::new(content))))
    }
}

/// Adapter over scripts the host registers directly under stable names
pub struct RegisteredScriptLocator {
    scripts: DashMap<String, Arc<dyn ReferenceScript>>,
}

impl RegisteredScriptLocator {
    pub fn new() -> Self {
        Self {
            scripts: DashMap::new(),
        }
    }

    pub fn register(&self, name: &str, script: Arc<dyn ReferenceScript>) {
        if self.scripts.insert(name.to_string(), script).is_some() {
            warn!(name, "replacing previously registered script");
        }
    }
}

impl Default for RegisteredScriptLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptLocator for RegisteredScriptLocator {
    fn resolve_location(
        &self,
        _reference: Option<&Arc<dyn ReferenceScript>>,
        location: &str,
        _params: Option<&ResolutionParams>,
    ) -> ScriptResult<Option<Arc<dyn ReferenceScript>>> {
        Ok(self.scripts.get(location).map(|s| s.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_relative_ascends_one_segment() {
        assert_eq!(
            resolve_relative_location("/a/b/c.js", "../d.js").unwrap(),
            "/a/d.js"
        );
    }

    #[test]
    fn test_relative_same_directory() {
        assert_eq!(
            resolve_relative_location("/a/b/c.js", "./d.js").unwrap(),
            "/a/b/d.js"
        );
        assert_eq!(
            resolve_relative_location("/a/b/c.js", "d.js").unwrap(),
            "/a/b/d.js"
        );
    }

    #[test]
    fn test_relative_descends_into_subdirectory() {
        assert_eq!(
            resolve_relative_location("/a/b/c.js", "lib/d.js").unwrap(),
            "/a/b/lib/d.js"
        );
        assert_eq!(
            resolve_relative_location("/a/b/c.js", "../lib/d.js").unwrap(),
            "/a/lib/d.js"
        );
    }

    #[test]
    fn test_ascension_beyond_root_fails() {
        assert!(matches!(
            resolve_relative_location("/a.js", "../../x.js"),
            Err(ScriptError::AscensionBeyondRoot { .. })
        ));
    }

    #[test]
    fn test_ascension_after_descent_fails() {
        assert!(matches!(
            resolve_relative_location("/a/b/c.js", "lib/../d.js"),
            Err(ScriptError::AscensionAfterDescent { .. })
        ));
        assert!(matches!(
            resolve_relative_location("/a/b/c.js", "./../d.js"),
            Err(ScriptError::AscensionAfterDescent { .. })
        ));
    }

    #[test]
    fn test_absolute_location_bypasses_reference() {
        assert_eq!(
            resolve_relative_location("/a/b/c.js", "/x/y.js").unwrap(),
            "/x/y.js"
        );
    }

    #[test]
    fn test_scheme_prefix_is_stripped() {
        assert_eq!(
            resolve_relative_location("classpath:/a/b/c.js", "../d.js").unwrap(),
            "/a/d.js"
        );
    }

    #[test]
    fn test_classpath_locator_resolves_relative_to_reference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("scripts/lib")).unwrap();
        let mut base = std::fs::File::create(dir.path().join("scripts/main.js")).unwrap();
        base.write_all(b"main();").unwrap();
        let mut lib = std::fs::File::create(dir.path().join("scripts/lib/util.js")).unwrap();
        lib.write_all(b"util();").unwrap();

        let roots = vec![dir.path().to_path_buf()];
        let locator = ClasspathScriptLocator::new(roots.clone());

        let main = locator
            .resolve_location(None, "/scripts/main.js", None)
            .unwrap()
            .expect("main resolves");
        assert_eq!(
            main.reference_path(&ReferencePathType::CLASSPATH).as_deref(),
            Some("/scripts/main.js")
        );

        let util = locator
            .resolve_location(Some(&main), "lib/util.js", None)
            .unwrap()
            .expect("relative resolves");
        assert_eq!(util.content().unwrap(), "util();");
    }

    #[test]
    fn test_classpath_locator_miss_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let locator = ClasspathScriptLocator::new(vec![dir.path().to_path_buf()]);
        assert!(
            locator
                .resolve_location(None, "/absent.js", None)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_registered_locator_round_trip() {
        let locator = RegisteredScriptLocator::new();
        let script: Arc<dyn ReferenceScript> =
            Arc::new(scriptenv_core::DynamicScript::new("registered();"));
        locator.register("cleanup", script.clone());

        let resolved = locator
            .resolve_location(None, "cleanup", None)
            .unwrap()
            .expect("registered script resolves");
        assert_eq!(resolved.name(), script.name());
        assert!(
            locator
                .resolve_location(None, "other", None)
                .unwrap()
                .is_none()
        );
    }
}
