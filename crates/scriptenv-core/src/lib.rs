//! scriptenv core model.
//!
//! This crate defines the engine-neutral building blocks of the script
//! environment: script references and their content sources, the value and
//! object model crossing the host/engine boundary, execution scopes, value
//! conversion, and the engine abstraction the processor is generic over.
//!
//! # Features
//!
//! - **Script references**: stable, location-independent script identities
//!   with per-runtime reference paths
//! - **Content sources**: classpath-style and string-backed script content
//! - **Value model**: [`ScriptValue`] interchange values and the
//!   [`ScriptObject`] trait for engine-native objects
//! - **Scopes**: parent-chained binding tables with sealing and const
//!   bindings
//! - **Conversion**: confidence-ordered converter registry with recursive
//!   container handling
//!
//! # Example
//!
//! ```
//! use scriptenv_core::{Scope, ScriptValue};
//!
//! let root = Scope::new_root();
//! root.put_const("appName", ScriptValue::string("demo"))?;
//! root.seal();
//!
//! let request = Scope::child_of(&root);
//! request.put("model", ScriptValue::Number(1.0))?;
//! assert_eq!(request.get("appName"), Some(ScriptValue::string("demo")));
//! # Ok::<(), scriptenv_core::ScriptError>(())
//! ```

pub mod content;
pub mod convert;
pub mod engine;
pub mod error;
pub mod scope;
pub mod script;
pub mod value;

pub use content::{
    ClasspathScriptContent, ContentResolver, DirectoryContentResolver, ScriptContent,
    StringScriptContent, normalize_cache_key,
};
pub use convert::{Direction, ValueConverter, ValueInstanceConverter};
pub use engine::{CompileOptions, CompiledScript, ScriptEngine};
pub use error::{ScriptError, ScriptResult};
pub use scope::{Scope, ScopeObject};
pub use script::{
    ContentReferenceScript, DynamicScript, ReferencePathType, ReferenceScript,
    first_reference_path,
};
pub use value::{
    HostFunction, PlainScriptObject, ScriptObject, ScriptValue, get_property, object_id,
};
