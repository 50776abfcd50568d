//! Error types for scriptenv
//!
//! One uniform error enum is shared by all layers; callers always receive
//! the original failure as a preserved `source`.

use thiserror::Error;

/// Errors that can occur while resolving, compiling or executing scripts
#[derive(Error, Debug)]
pub enum ScriptError {
    /// A script import could not be resolved to a loadable source
    #[error("Unable to resolve script location [{location}] via locator [{locator}]")]
    Resolution { locator: String, location: String },

    /// A relative import tried to ascend past the resolution root
    #[error("Unable to ascend out of classpath - context location: [{reference}], script location: [{location}]")]
    AscensionBeyondRoot { reference: String, location: String },

    /// A relative import tried to ascend after already descending
    #[error("Unable to ascend after already descending - context location: [{reference}], script location: [{location}]")]
    AscensionAfterDescent { reference: String, location: String },

    /// Source failed to parse or compile
    #[error("Failed to compile script '{path}': {message}")]
    Compile {
        path: String,
        message: String,
        #[source]
        source: Option<Box<ScriptError>>,
    },

    /// A runtime fault during script execution, including script-thrown errors
    #[error("Failed to execute script '{path}': {message}")]
    Execution {
        path: String,
        message: String,
        #[source]
        source: Option<Box<ScriptError>>,
    },

    /// A call chain was inherited into a context that already has one
    #[error("Context call chain has already been initialized")]
    CallChainInitialized,

    /// A call chain was inherited from a context that has none
    #[error("Parent context has no call chain associated with it")]
    NoParentCallChain,

    /// Direct mutation of a sealed scope
    #[error("Scope is sealed and cannot be modified: {0}")]
    SealedScope(String),

    /// A contributed binding is read-only or permanent
    #[error("Binding '{0}' is read-only")]
    ReadOnlyBinding(String),

    /// Script content could not be read
    #[error("Failed to read script content '{path}': {message}")]
    Content { path: String, message: String },

    /// A value could not be converted between host and engine representations
    #[error("Cannot convert value: {0}")]
    Conversion(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScriptError {
    /// Create a compile error without a propagated cause
    pub fn compile(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Compile {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a failure from compilation, preserving it as the cause
    pub fn compile_with_cause(path: impl Into<String>, cause: ScriptError) -> Self {
        Self::Compile {
            path: path.into(),
            message: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }

    /// Create an execution error without a propagated cause
    pub fn execution(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a failure from execution, preserving it as the cause
    pub fn execution_with_cause(path: impl Into<String>, cause: ScriptError) -> Self {
        Self::Execution {
            path: path.into(),
            message: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a content read error
    pub fn content(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Content {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ScriptError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for ScriptError {
    fn from(e: serde_json::Error) -> Self {
        Self::Conversion(e.to_string())
    }
}

/// Result type alias for scriptenv operations
pub type ScriptResult<T> = Result<T, ScriptError>;
