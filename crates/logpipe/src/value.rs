// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Classification of captured diagnostic arguments.
//!
//! Arguments handed to the interceptor are arbitrary host values. They arrive
//! here as a [`Value`], a closed union that can describe anything the host
//! wants to log, including reference nodes that point back at their own
//! ancestors. [`classify`] turns a `Value` into a [`LoggedValue`]: a type tag
//! from a finite set plus a JSON rendering that is always representable.
//!
//! Classification never fails. Values JSON cannot carry (NaN, infinities,
//! big integers, symbols) become textual markers, cycles become
//! [`CIRCULAR_MARKER`] and nesting beyond the depth limit becomes
//! [`MAX_DEPTH_MARKER`].

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Serialize, Serializer};
use serde_json::{Map, Number};

/// Placeholder emitted where a reference points back at one of its ancestors.
pub const CIRCULAR_MARKER: &str = "[Circular]";

/// Placeholder emitted where nesting exceeds the configured depth.
pub const MAX_DEPTH_MARKER: &str = "[MaxDepth]";

/// Default nesting limit used by [`classify`].
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Largest integer magnitude an f64 represents exactly (2^53).
const MAX_SAFE_INTEGER: i128 = 9_007_199_254_740_992;

/// A host value captured as a diagnostic argument.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i128),
    String(String),
    Symbol(String),
    Array(Vec<Value>),
    /// A callable. Only its name is ever captured.
    Function(String),
    Object {
        type_name: String,
        fields: Vec<(String, Value)>,
    },
    /// A shared, mutable reference node. These can form cycles.
    Shared(SharedValue),
}

/// Reference-counted node that lets a [`Value`] graph contain cycles.
#[derive(Clone, Default)]
pub struct SharedValue(Arc<Mutex<Value>>);

impl SharedValue {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    /// Replaces the referenced value.
    pub fn set(&self, value: Value) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Runs `f` against the referenced value.
    pub fn with<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for SharedValue {
    // Printing the contents could recurse forever on a cycle.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedValue({:#x})", self.address())
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Undefined
    }
}

impl Value {
    #[must_use]
    pub fn function(name: impl Into<String>) -> Self {
        Value::Function(name.into())
    }

    #[must_use]
    pub fn symbol(description: impl Into<String>) -> Self {
        Value::Symbol(description.into())
    }

    #[must_use]
    pub fn object<K, I>(type_name: impl Into<String>, fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object {
            type_name: type_name.into(),
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    #[must_use]
    pub fn shared(value: Value) -> (Self, SharedValue) {
        let node = SharedValue::new(value);
        (Value::Shared(node.clone()), node)
    }

    /// Builds a value from anything serde can serialize.
    ///
    /// Maps become an `Object` named after `T`. A value serde rejects becomes
    /// a marker string rather than an error.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(serde_json::Value::Object(map)) => Value::Object {
                type_name: short_type_name::<T>(),
                fields: map
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            },
            Ok(other) => Value::from(other),
            Err(e) => Value::String(format!("[Unserializable {}: {e}]", short_type_name::<T>())),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn from_integer(n: i128) -> Self {
        if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&n) {
            Value::Number(n as f64)
        } else {
            Value::BigInt(n)
        }
    }
}

/// Last path segment of `T`'s type name, without generic arguments.
fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::from_integer(i128::from(i))
                } else if let Some(u) = n.as_u64() {
                    Value::from_integer(i128::from(u))
                } else {
                    Value::Number(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object {
                type_name: "Object".to_string(),
                fields: map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            },
        }
    }
}

macro_rules! impl_from_integer {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                #[allow(clippy::cast_lossless, clippy::cast_possible_wrap)]
                fn from(n: $t) -> Self {
                    Value::from_integer(n as i128)
                }
            }
        )*
    };
}

impl_from_integer!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, usize);

impl From<u128> for Value {
    fn from(n: u128) -> Self {
        match i128::try_from(n) {
            Ok(n) => Value::from_integer(n),
            // Past i128 the exact digits only survive as text.
            Err(_) => Value::String(format!("{n}n")),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::String(c.to_string())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Undefined
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(items: &[T]) -> Self {
        Value::Array(items.iter().cloned().map(Into::into).collect())
    }
}

impl From<SharedValue> for Value {
    fn from(node: SharedValue) -> Self {
        Value::Shared(node)
    }
}

/// Closed set of type tags a captured argument can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    Undefined,
    Null,
    NaN,
    Infinite,
    Number,
    BigInt,
    String,
    Boolean,
    Symbol,
    Array,
    Function,
    /// A structured value, tagged with its type name.
    Object(String),
}

impl TypeTag {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            TypeTag::Undefined => "<undefined>",
            TypeTag::Null => "<null>",
            TypeTag::NaN => "<NaN>",
            TypeTag::Infinite => "<Infinite>",
            TypeTag::Number => "<number>",
            TypeTag::BigInt => "<bigint>",
            TypeTag::String => "<string>",
            TypeTag::Boolean => "<boolean>",
            TypeTag::Symbol => "<symbol>",
            TypeTag::Array => "<array>",
            TypeTag::Function => "<function>",
            TypeTag::Object(name) => name,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TypeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A classified argument as it appears inside a serialized log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedValue {
    #[serde(rename = "type")]
    pub tag: TypeTag,
    #[serde(rename = "logValue")]
    pub value: serde_json::Value,
}

/// Classifies `value` with the default depth limit.
#[must_use]
pub fn classify(value: &Value) -> LoggedValue {
    classify_with_depth(value, DEFAULT_MAX_DEPTH)
}

/// Classifies `value`, rendering anything nested deeper than `max_depth` as a
/// placeholder.
#[must_use]
pub fn classify_with_depth(value: &Value, max_depth: usize) -> LoggedValue {
    let mut visiting = HashSet::new();
    let tag = tag_of(value, &mut visiting);
    visiting.clear();
    let value = render(value, 0, max_depth, &mut visiting);
    LoggedValue { tag, value }
}

fn tag_of(value: &Value, visiting: &mut HashSet<usize>) -> TypeTag {
    match value {
        Value::Undefined => TypeTag::Undefined,
        Value::Null => TypeTag::Null,
        Value::Bool(_) => TypeTag::Boolean,
        Value::Number(n) if n.is_nan() => TypeTag::NaN,
        Value::Number(n) if n.is_infinite() => TypeTag::Infinite,
        Value::Number(_) => TypeTag::Number,
        Value::BigInt(_) => TypeTag::BigInt,
        Value::String(_) => TypeTag::String,
        Value::Symbol(_) => TypeTag::Symbol,
        Value::Array(_) => TypeTag::Array,
        Value::Function(_) => TypeTag::Function,
        Value::Object { type_name, .. } => TypeTag::Object(type_name.clone()),
        Value::Shared(node) => {
            // A node whose contents are itself.
            if !visiting.insert(node.address()) {
                return TypeTag::Object("Object".to_string());
            }
            node.with(|inner| tag_of(inner, visiting))
        }
    }
}

fn render(
    value: &Value,
    depth: usize,
    max_depth: usize,
    visiting: &mut HashSet<usize>,
) -> serde_json::Value {
    match value {
        Value::Undefined | Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => render_number(*n),
        Value::BigInt(n) => serde_json::Value::String(format!("{n}n")),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Symbol(desc) => serde_json::Value::String(format!("Symbol({desc})")),
        Value::Function(name) => function_json(name),
        Value::Array(items) => {
            if depth >= max_depth {
                return serde_json::Value::String(MAX_DEPTH_MARKER.to_string());
            }
            serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| render(item, depth + 1, max_depth, visiting))
                    .collect(),
            )
        }
        Value::Object { fields, .. } => {
            if depth >= max_depth {
                return serde_json::Value::String(MAX_DEPTH_MARKER.to_string());
            }
            let mut map = Map::new();
            for (key, field) in fields {
                map.insert(key.clone(), render(field, depth + 1, max_depth, visiting));
            }
            serde_json::Value::Object(map)
        }
        Value::Shared(node) => {
            let address = node.address();
            // Checked before locking: re-locking an ancestor would deadlock.
            if !visiting.insert(address) {
                return serde_json::Value::String(CIRCULAR_MARKER.to_string());
            }
            let rendered = node.with(|inner| render(inner, depth, max_depth, visiting));
            visiting.remove(&address);
            rendered
        }
    }
}

fn render_number(n: f64) -> serde_json::Value {
    if n.is_nan() {
        serde_json::Value::String("NaN".to_string())
    } else if n.is_infinite() {
        let marker = if n.is_sign_positive() {
            "Infinity"
        } else {
            "-Infinity"
        };
        serde_json::Value::String(marker.to_string())
    } else if let Some(i) = integral(n) {
        serde_json::Value::Number(Number::from(i))
    } else {
        Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

/// `n` as an integer when it has no fractional part and is exactly representable.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral(n: f64) -> Option<i64> {
    (n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER as f64).then(|| n as i64)
}

fn function_json(name: &str) -> serde_json::Value {
    let mut map = Map::new();
    map.insert("name".to_string(), serde_json::Value::String(name.to_string()));
    serde_json::Value::Object(map)
}

impl fmt::Display for Value {
    /// Console-style rendering used for raw passthrough output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Undefined => f.write_str("undefined"),
            Value::Function(name) => write!(f, "[Function: {name}]"),
            Value::Number(n) => match integral(*n) {
                Some(i) => write!(f, "{i}"),
                None => write!(f, "{n}"),
            },
            other => {
                let LoggedValue { tag, value } = classify(other);
                match tag {
                    TypeTag::Object(name) if name != "Object" => write!(f, "{name} {value}"),
                    _ => match value {
                        serde_json::Value::String(s) => f.write_str(&s),
                        rendered => write!(f, "{rendered}"),
                    },
                }
            }
        }
    }
}
