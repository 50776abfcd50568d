//! Value conversion between host and script representations
//!
//! Conversion is driven by a registry of [`ValueInstanceConverter`]s,
//! consulted in descending confidence order. Registered converters handle
//! whole-value cases; container recursion and the identity fallback live in
//! [`ValueConverter`] itself so every converter can stay focused on a single
//! shape. Conversion is idempotent: feeding a converted value back through
//! the same direction yields an equal value.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::error::ScriptResult;
use crate::value::{ScriptObject, ScriptValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Host value being injected into a script scope
    ToScript,
    /// Script result being handed back to the host
    ToHost,
}

pub trait ValueInstanceConverter: Send + Sync {
    /// Whether this converter wants to handle `value` in `direction`
    fn can_convert(&self, value: &ScriptValue, direction: Direction) -> bool;

    fn convert(
        &self,
        value: &ScriptValue,
        direction: Direction,
        registry: &ValueConverter,
    ) -> ScriptResult<ScriptValue>;

    /// Higher-confidence converters are consulted first
    fn confidence(&self) -> i32 {
        0
    }
}

pub struct ValueConverter {
    converters: RwLock<Vec<Arc<dyn ValueInstanceConverter>>>,
}

impl ValueConverter {
    pub fn new() -> Self {
        Self {
            converters: RwLock::new(Vec::new()),
        }
    }

    /// A converter preloaded with the object-graph converter, which maps
    /// engine-native objects to plain lists and maps on the way back to the
    /// host
    pub fn with_defaults() -> Self {
        let converter = Self::new();
        converter.register(Arc::new(ObjectGraphConverter));
        converter
    }

    pub fn register(&self, converter: Arc<dyn ValueInstanceConverter>) {
        let mut converters = self.converters.write();
        converters.push(converter);
        converters.sort_by_key(|c| std::cmp::Reverse(c.confidence()));
    }

    pub fn convert(&self, value: &ScriptValue, direction: Direction) -> ScriptResult<ScriptValue> {
        for converter in self.converters.read().iter() {
            if converter.can_convert(value, direction) {
                return converter.convert(value, direction, self);
            }
        }
        // containers recurse, everything else passes through unchanged
        match value {
            ScriptValue::List(items) => {
                let converted = items
                    .iter()
                    .map(|item| self.convert(item, direction))
                    .collect::<ScriptResult<Vec<_>>>()?;
                Ok(ScriptValue::List(converted))
            }
            ScriptValue::Map(entries) => {
                let converted = entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.convert(v, direction)?)))
                    .collect::<ScriptResult<BTreeMap<_, _>>>()?;
                Ok(ScriptValue::Map(converted))
            }
            other => Ok(other.clone()),
        }
    }
}

impl Default for ValueConverter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// True when the object's own ids are exactly `"0" .. "n-1"`
fn is_array_like(obj: &Arc<dyn ScriptObject>) -> bool {
    let ids = obj.ids();
    if ids.is_empty() {
        return false;
    }
    let mut indices = Vec::with_capacity(ids.len());
    for id in &ids {
        match id.parse::<usize>() {
            Ok(n) => indices.push(n),
            Err(_) => return false,
        }
    }
    indices.sort_unstable();
    indices.iter().copied().eq(0..ids.len())
}

/// Flattens engine-native objects into lists and maps on the way to the
/// host. Functions and non-enumerable handles pass through untouched so
/// callers can still invoke them.
struct ObjectGraphConverter;

impl ValueInstanceConverter for ObjectGraphConverter {
    fn can_convert(&self, value: &ScriptValue, direction: Direction) -> bool {
        direction == Direction::ToHost
            && matches!(value, ScriptValue::Object(obj) if !obj.is_function())
    }

    fn convert(
        &self,
        value: &ScriptValue,
        direction: Direction,
        registry: &ValueConverter,
    ) -> ScriptResult<ScriptValue> {
        let ScriptValue::Object(obj) = value else {
            return Ok(value.clone());
        };
        if is_array_like(obj) {
            let len = obj.ids().len();
            let mut items = Vec::with_capacity(len);
            for index in 0..len {
                let slot = obj
                    .get(&index.to_string())
                    .unwrap_or(ScriptValue::Undefined);
                items.push(registry.convert(&slot, direction)?);
            }
            trace!(len, "converted array-like object to list");
            Ok(ScriptValue::List(items))
        } else {
            let mut entries = BTreeMap::new();
            for id in obj.ids() {
                let slot = obj.get(&id).unwrap_or(ScriptValue::Undefined);
                entries.insert(id, registry.convert(&slot, direction)?);
            }
            Ok(ScriptValue::Map(entries))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PlainScriptObject;

    #[test]
    fn test_scalars_pass_through() {
        let converter = ValueConverter::with_defaults();
        for value in [
            ScriptValue::Null,
            ScriptValue::Bool(true),
            ScriptValue::Number(1.5),
            ScriptValue::string("abc"),
        ] {
            assert_eq!(converter.convert(&value, Direction::ToHost).unwrap(), value);
            assert_eq!(
                converter.convert(&value, Direction::ToScript).unwrap(),
                value
            );
        }
    }

    #[test]
    fn test_array_like_object_becomes_list() {
        let obj = PlainScriptObject::new();
        obj.put("0", None, ScriptValue::string("a")).unwrap();
        obj.put("1", None, ScriptValue::string("b")).unwrap();

        let converter = ValueConverter::with_defaults();
        let result = converter
            .convert(&ScriptValue::object(obj), Direction::ToHost)
            .unwrap();
        assert_eq!(
            result,
            ScriptValue::List(vec![ScriptValue::string("a"), ScriptValue::string("b")])
        );
    }

    #[test]
    fn test_keyed_object_becomes_map_recursively() {
        let inner = PlainScriptObject::new();
        inner.put("0", None, ScriptValue::Number(1.0)).unwrap();
        inner.put("1", None, ScriptValue::Number(2.0)).unwrap();

        let outer = PlainScriptObject::new();
        outer
            .put("items", None, ScriptValue::object(inner))
            .unwrap();
        outer.put("label", None, ScriptValue::string("x")).unwrap();

        let converter = ValueConverter::with_defaults();
        let result = converter
            .convert(&ScriptValue::object(outer), Direction::ToHost)
            .unwrap();
        let ScriptValue::Map(map) = result else {
            panic!("expected map");
        };
        assert_eq!(map.get("label"), Some(&ScriptValue::string("x")));
        assert_eq!(
            map.get("items"),
            Some(&ScriptValue::List(vec![
                ScriptValue::Number(1.0),
                ScriptValue::Number(2.0)
            ]))
        );
    }

    #[test]
    fn test_conversion_is_idempotent() {
        let obj = PlainScriptObject::new();
        obj.put("key", None, ScriptValue::string("value")).unwrap();

        let converter = ValueConverter::with_defaults();
        let once = converter
            .convert(&ScriptValue::object(obj), Direction::ToHost)
            .unwrap();
        let twice = converter.convert(&once, Direction::ToHost).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_registered_converter_wins_by_confidence() {
        struct NumberDoubler;
        impl ValueInstanceConverter for NumberDoubler {
            fn can_convert(&self, value: &ScriptValue, _direction: Direction) -> bool {
                matches!(value, ScriptValue::Number(_))
            }
            fn convert(
                &self,
                value: &ScriptValue,
                _direction: Direction,
                _registry: &ValueConverter,
            ) -> ScriptResult<ScriptValue> {
                let n = value.as_number().unwrap_or_default();
                Ok(ScriptValue::Number(n * 2.0))
            }
            fn confidence(&self) -> i32 {
                10
            }
        }

        let converter = ValueConverter::with_defaults();
        converter.register(Arc::new(NumberDoubler));
        assert_eq!(
            converter
                .convert(&ScriptValue::Number(4.0), Direction::ToScript)
                .unwrap(),
            ScriptValue::Number(8.0)
        );
    }

    #[test]
    fn test_functions_are_not_flattened() {
        let fun = crate::value::HostFunction::new("noop", |_, _| Ok(ScriptValue::Undefined));
        let value = ScriptValue::Object(fun);
        let converter = ValueConverter::with_defaults();
        let result = converter.convert(&value, Direction::ToHost).unwrap();
        assert!(result.is_callable());
    }
}
