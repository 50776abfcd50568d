//! Reference-script model
//!
//! A [`ReferenceScript`] is the identity and metadata of one script,
//! independent of where its source lives. Locators and the processor pass
//! these around instead of raw paths so that imports, caching and call-chain
//! diagnostics all operate on one stable identity.

use std::fmt;
use std::sync::Arc;

use crate::content::ScriptContent;
use crate::error::ScriptResult;

/// A tag identifying one addressing scheme by which a script's location may
/// be expressed.
///
/// The value set is open: hosts may introduce their own schemes beyond the
/// common constants below.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferencePathType(&'static str);

impl ReferencePathType {
    pub const CLASSPATH: ReferencePathType = ReferencePathType("classpath");
    pub const FILE: ReferencePathType = ReferencePathType("file");
    pub const NODE_REF: ReferencePathType = ReferencePathType("node-ref");
    pub const CONTENT_PROPERTY: ReferencePathType = ReferencePathType("content-property");
    pub const FILE_FOLDER_PATH: ReferencePathType = ReferencePathType("file-folder-path");
    pub const STORE: ReferencePathType = ReferencePathType("store");

    pub const fn custom(tag: &'static str) -> Self {
        Self(tag)
    }

    pub fn tag(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ReferencePathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Identity for one script instance.
///
/// Implementations are immutable after construction. `name` is always
/// non-empty and unique enough to serve as a cache and log key.
pub trait ReferenceScript: Send + Sync {
    /// The simple display name of the script
    fn name(&self) -> &str;

    /// The full name of the script (defaults to the simple name)
    fn full_name(&self) -> &str {
        self.name()
    }

    /// Whether the script content is system-managed rather than user-mutable.
    /// Secure scripts may be granted access to privileged globals.
    fn is_secure(&self) -> bool;

    /// Whether the compiled form of this script may be cached
    fn is_cachable(&self) -> bool;

    /// Whether this script is a transient string-sourced script. Dynamic
    /// scripts never enter the persistent compiled cache but may be cached
    /// separately under their content-derived name.
    fn is_dynamic(&self) -> bool {
        false
    }

    /// The reference path of this script in the given addressing scheme, if
    /// the implementation can express one
    fn reference_path(&self, path_type: &ReferencePathType) -> Option<String>;

    /// The addressing schemes this implementation attempts to resolve.
    /// Presence of a type gives no guarantee that resolution succeeds.
    fn supported_path_types(&self) -> &[ReferencePathType];

    /// The script source text
    fn content(&self) -> ScriptResult<String>;
}

impl fmt::Debug for dyn ReferenceScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceScript")
            .field("name", &self.name())
            .field("secure", &self.is_secure())
            .finish()
    }
}

/// A script whose source is supplied as a literal string.
///
/// The name is derived from an md5 digest of the source bytes, so identical
/// source text always yields the same name - an idempotent caching key.
pub struct DynamicScript {
    name: String,
    source: String,
}

impl DynamicScript {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let digest = md5::compute(source.as_bytes());
        Self {
            name: format!("string://DynamicJS-{:x}", digest),
            source,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl ReferenceScript for DynamicScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_secure(&self) -> bool {
        false
    }

    fn is_cachable(&self) -> bool {
        false
    }

    fn is_dynamic(&self) -> bool {
        true
    }

    fn reference_path(&self, _path_type: &ReferencePathType) -> Option<String> {
        None
    }

    fn supported_path_types(&self) -> &[ReferencePathType] {
        &[]
    }

    fn content(&self) -> ScriptResult<String> {
        Ok(self.source.clone())
    }
}

/// Adapter exposing a [`ScriptContent`] source as a [`ReferenceScript`].
pub struct ContentReferenceScript {
    name: String,
    content: Arc<dyn ScriptContent>,
    path_types: Vec<ReferencePathType>,
}

impl ContentReferenceScript {
    pub fn new(content: Arc<dyn ScriptContent>) -> Self {
        let path = content.path();
        let name = match path.rsplit('/').next() {
            Some(simple) if !simple.is_empty() => simple.to_string(),
            _ => path.to_string(),
        };
        let path_types = content.path_types().to_vec();
        Self {
            name,
            content,
            path_types,
        }
    }

    pub fn content_source(&self) -> &Arc<dyn ScriptContent> {
        &self.content
    }
}

impl ReferenceScript for ContentReferenceScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn full_name(&self) -> &str {
        self.content.path()
    }

    fn is_secure(&self) -> bool {
        self.content.is_secure()
    }

    fn is_cachable(&self) -> bool {
        self.content.is_cachable()
    }

    fn reference_path(&self, path_type: &ReferencePathType) -> Option<String> {
        self.content.reference_path(path_type)
    }

    fn supported_path_types(&self) -> &[ReferencePathType] {
        &self.path_types
    }

    fn content(&self) -> ScriptResult<String> {
        self.content.open()
    }
}

/// Consults reference path types in a fixed priority order and returns the
/// first path the script can express.
///
/// This yields a deterministic "most portable" identifier for logging and
/// for compiled-script cache keys when a script is addressable through more
/// than one scheme.
pub fn first_reference_path(
    script: &dyn ReferenceScript,
    succession: &[ReferencePathType],
) -> Option<String> {
    succession
        .iter()
        .find_map(|path_type| script.reference_path(path_type))
}
