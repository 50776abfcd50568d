//! Batch work-item conversion
//!
//! A fixed work value handed to `executeBatch` can come in several shapes.
//! Converters are consulted in registration order and the first one that
//! recognizes the shape produces the item collection.

use std::sync::Arc;

use scriptenv_core::{ScriptError, ScriptObject, ScriptResult, ScriptValue};

pub trait WorkItemConverter: Send + Sync {
    /// The item collection, or `None` when this converter does not
    /// recognize the value's shape
    fn convert(&self, value: &ScriptValue) -> Option<Vec<ScriptValue>>;
}

/// Lists and array-like objects (own ids exactly `0..n`) become their
/// elements in order
pub struct ListWorkConverter;

fn array_like_items(obj: &Arc<dyn ScriptObject>) -> Option<Vec<ScriptValue>> {
    let ids = obj.ids();
    if ids.is_empty() {
        return None;
    }
    let mut indices = Vec::with_capacity(ids.len());
    for id in &ids {
        indices.push(id.parse::<usize>().ok()?);
    }
    indices.sort_unstable();
    if !indices.iter().copied().eq(0..ids.len()) {
        return None;
    }
    Some(
        (0..ids.len())
            .map(|i| obj.get(&i.to_string()).unwrap_or(ScriptValue::Undefined))
            .collect(),
    )
}

impl WorkItemConverter for ListWorkConverter {
    fn convert(&self, value: &ScriptValue) -> Option<Vec<ScriptValue>> {
        match value {
            ScriptValue::List(items) => Some(items.clone()),
            ScriptValue::Object(obj) if !obj.is_function() => array_like_items(obj),
            _ => None,
        }
    }
}

/// Maps contribute their values as items, in key order
pub struct MapValuesWorkConverter;

impl WorkItemConverter for MapValuesWorkConverter {
    fn convert(&self, value: &ScriptValue) -> Option<Vec<ScriptValue>> {
        match value {
            ScriptValue::Map(entries) => Some(entries.values().cloned().collect()),
            _ => None,
        }
    }
}

/// First-match-wins converter chain
pub struct WorkItemConverterChain {
    converters: Vec<Box<dyn WorkItemConverter>>,
}

impl WorkItemConverterChain {
    /// Chain preloaded with the list and map-values converters
    pub fn with_defaults() -> Self {
        Self {
            converters: vec![Box::new(ListWorkConverter), Box::new(MapValuesWorkConverter)],
        }
    }

    pub fn register(&mut self, converter: Box<dyn WorkItemConverter>) {
        self.converters.push(converter);
    }

    pub fn convert(&self, value: &ScriptValue) -> ScriptResult<Vec<ScriptValue>> {
        self.converters
            .iter()
            .find_map(|converter| converter.convert(value))
            .ok_or_else(|| {
                ScriptError::Conversion("work value is not a supported collection shape".to_string())
            })
    }
}

impl Default for WorkItemConverterChain {
    fn default() -> Self {
        Self::with_defaults()
    }
}
