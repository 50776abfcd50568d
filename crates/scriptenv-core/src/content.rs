//! Script content sources
//!
//! A [`ScriptContent`] is the "resolve path to byte stream" contract the
//! environment consumes from the host. Loading is reduced to UTF-8 text
//! since every supported engine compiles from text.

use std::path::{Path, PathBuf};

use crate::error::{ScriptError, ScriptResult};
use crate::script::ReferencePathType;

/// One loadable script source.
pub trait ScriptContent: Send + Sync {
    /// The path of this content in its native addressing scheme
    fn path(&self) -> &str;

    /// Read the full source text
    fn open(&self) -> ScriptResult<String>;

    /// Whether the compiled form may be cached. Content that can change
    /// underneath the environment (e.g. repository nodes) returns false.
    fn is_cachable(&self) -> bool;

    /// Whether the content is system-managed and may access privileged globals
    fn is_secure(&self) -> bool;

    /// The reference path of this content in the given addressing scheme
    fn reference_path(&self, path_type: &ReferencePathType) -> Option<String>;

    /// The addressing schemes this content attempts to express
    fn path_types(&self) -> &[ReferencePathType];
}

/// Script content addressed through classpath-style resource roots.
///
/// A classpath path is resolved against a configured list of resource root
/// directories; the first root containing the resource wins, matching
/// classloader lookup order.
pub struct ClasspathScriptContent {
    classpath: String,
    file: PathBuf,
    secure: bool,
    path_types: [ReferencePathType; 2],
}

impl ClasspathScriptContent {
    /// Locate `classpath` under the given resource roots.
    ///
    /// Returns `None` when no root contains the resource. A leading slash is
    /// tolerated: if the path as given cannot be found, lookup is retried
    /// without it, mirroring classloader convention.
    pub fn resolve(classpath: &str, resource_roots: &[PathBuf]) -> Option<Self> {
        Self::resolve_with_security(classpath, resource_roots, true)
    }

    pub fn resolve_with_security(
        classpath: &str,
        resource_roots: &[PathBuf],
        secure: bool,
    ) -> Option<Self> {
        let file = lookup_resource(classpath, resource_roots).or_else(|| {
            classpath
                .strip_prefix('/')
                .and_then(|trimmed| lookup_resource(trimmed, resource_roots))
        })?;

        Some(Self {
            classpath: classpath.to_string(),
            file,
            secure,
            path_types: [ReferencePathType::CLASSPATH, ReferencePathType::FILE],
        })
    }
}

fn lookup_resource(classpath: &str, resource_roots: &[PathBuf]) -> Option<PathBuf> {
    let relative = classpath.trim_start_matches('/');
    resource_roots
        .iter()
        .map(|root| root.join(relative))
        .find(|candidate| candidate.is_file())
}

impl ScriptContent for ClasspathScriptContent {
    fn path(&self) -> &str {
        &self.classpath
    }

    fn open(&self) -> ScriptResult<String> {
        std::fs::read_to_string(&self.file)
            .map_err(|e| ScriptError::content(&self.classpath, e.to_string()))
    }

    fn is_cachable(&self) -> bool {
        true
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn reference_path(&self, path_type: &ReferencePathType) -> Option<String> {
        if *path_type == ReferencePathType::CLASSPATH {
            Some(self.classpath.clone())
        } else if *path_type == ReferencePathType::FILE {
            Some(self.file.display().to_string())
        } else {
            None
        }
    }

    fn path_types(&self) -> &[ReferencePathType] {
        &self.path_types
    }
}

/// In-memory script content with an explicit path, used for repository-node
/// and search-resolved sources where the host hands over the bytes directly.
pub struct StringScriptContent {
    path: String,
    source: String,
    secure: bool,
    cachable: bool,
    path_type: Vec<ReferencePathType>,
    reference_path: Option<(ReferencePathType, String)>,
}

impl StringScriptContent {
    pub fn new(path: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            secure: false,
            cachable: false,
            path_type: Vec::new(),
            reference_path: None,
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn cachable(mut self, cachable: bool) -> Self {
        self.cachable = cachable;
        self
    }

    pub fn with_reference_path(mut self, path_type: ReferencePathType, path: String) -> Self {
        self.path_type = vec![path_type.clone()];
        self.reference_path = Some((path_type, path));
        self
    }
}

impl ScriptContent for StringScriptContent {
    fn path(&self) -> &str {
        &self.path
    }

    fn open(&self) -> ScriptResult<String> {
        Ok(self.source.clone())
    }

    fn is_cachable(&self) -> bool {
        self.cachable
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn reference_path(&self, path_type: &ReferencePathType) -> Option<String> {
        match &self.reference_path {
            Some((stored_type, path)) if stored_type == path_type => Some(path.clone()),
            _ => None,
        }
    }

    fn path_types(&self) -> &[ReferencePathType] {
        &self.path_type
    }
}

/// Resolves a logical content path to loadable content.
///
/// This is the only contract the environment has with the host's storage
/// and search layers; node, name-path and search locators are all built on
/// top of an implementation supplied by the host.
pub trait ContentResolver: Send + Sync {
    fn resolve(&self, path: &str) -> Option<Box<dyn ScriptContent>>;
}

/// Normalizes a path-like string for cache keying: strips a scheme prefix
/// like `classpath:` or `classpath*:` and collapses duplicate slashes.
pub fn normalize_cache_key(path: &str) -> String {
    let without_scheme = match path.find(':') {
        Some(idx) if path[..idx].chars().all(|c| c.is_ascii_alphanumeric() || c == '*') => {
            &path[idx + 1..]
        }
        _ => path,
    };

    let mut key = String::with_capacity(without_scheme.len());
    let mut prev_slash = false;
    for c in without_scheme.chars() {
        if c == '/' {
            if !prev_slash {
                key.push(c);
            }
            prev_slash = true;
        } else {
            key.push(c);
            prev_slash = false;
        }
    }
    key
}

/// Directory-backed content resolver for hosts whose "repository" is a
/// filesystem tree (also the backbone of the test fixtures).
pub struct DirectoryContentResolver {
    root: PathBuf,
    secure: bool,
}

impl DirectoryContentResolver {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            secure: false,
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

impl ContentResolver for DirectoryContentResolver {
    fn resolve(&self, path: &str) -> Option<Box<dyn ScriptContent>> {
        let candidate = self.root.join(path.trim_start_matches('/'));
        if !candidate.is_file() {
            return None;
        }
        let source = std::fs::read_to_string(&candidate).ok()?;
        Some(Box::new(
            StringScriptContent::new(path, source)
                .secure(self.secure)
                .cachable(true),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_classpath_resolution_leading_slash_tolerance() {
        let dir = tempdir().unwrap();
        let scripts = dir.path().join("scripts");
        std::fs::create_dir_all(&scripts).unwrap();
        std::fs::write(scripts.join("util.js"), "function util() {}").unwrap();

        let roots = vec![dir.path().to_path_buf()];
        let with_slash = ClasspathScriptContent::resolve("/scripts/util.js", &roots);
        assert!(with_slash.is_some());
        let without_slash = ClasspathScriptContent::resolve("scripts/util.js", &roots);
        assert!(without_slash.is_some());

        let content = with_slash.unwrap();
        assert_eq!(content.open().unwrap(), "function util() {}");
        assert!(content.is_cachable());
    }

    #[test]
    fn test_classpath_resolution_missing_resource() {
        let dir = tempdir().unwrap();
        let roots = vec![dir.path().to_path_buf()];
        assert!(ClasspathScriptContent::resolve("/nope/missing.js", &roots).is_none());
    }

    #[test]
    fn test_classpath_resolution_first_root_wins() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        std::fs::write(first.path().join("a.js"), "first").unwrap();
        std::fs::write(second.path().join("a.js"), "second").unwrap();

        let roots = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let content = ClasspathScriptContent::resolve("a.js", &roots).unwrap();
        assert_eq!(content.open().unwrap(), "first");
    }

    #[test]
    fn test_normalize_cache_key_strips_scheme() {
        assert_eq!(normalize_cache_key("classpath:/a/b.js"), "/a/b.js");
        assert_eq!(normalize_cache_key("classpath*:/a//b.js"), "/a/b.js");
        assert_eq!(normalize_cache_key("/a/b.js"), "/a/b.js");
        assert_eq!(normalize_cache_key("store://node/abc"), "/node/abc");
    }

    #[test]
    fn test_directory_resolver() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("include.js"), "var included = true;").unwrap();

        let resolver = DirectoryContentResolver::new(dir.path());
        let content = resolver.resolve("/include.js").unwrap();
        assert_eq!(content.open().unwrap(), "var included = true;");
        assert!(resolver.resolve("/absent.js").is_none());
    }
}
