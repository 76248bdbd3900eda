//! Decoding of merged values into a schema.
//!
//! Scalars convert into whatever the target field asks for: strings parse
//! into numbers and booleans, numbers and booleans render as strings, and a
//! string fills a sequence by splitting on commas. This lets environment
//! variables and loosely typed file scalars fill any field without knowing
//! its type up front.

use std::fmt;

use serde::de::value::StringDeserializer;
use serde::de::{self, DeserializeOwned, DeserializeSeed, Deserializer, IntoDeserializer, Visitor};
use toml::value::Datetime;
use toml::{Table, Value};

// Names `toml::value::Datetime` deserializes through.
const DATETIME_STRUCT: &str = "$__toml_private_Datetime";
const DATETIME_FIELD: &str = "$__toml_private_datetime";

/// A decode failure at `key` (dotted, with `[i]` for sequence elements).
#[derive(Debug)]
pub(crate) struct FieldError {
    pub(crate) key: String,
    pub(crate) message: String,
}

impl FieldError {
    /// Records `key` unless a deeper key was already recorded.
    fn at(mut self, key: &str) -> Self {
        if self.key.is_empty() {
            self.key = key.to_string();
        }
        self
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.key, self.message)
        }
    }
}

impl std::error::Error for FieldError {}

impl de::Error for FieldError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        FieldError {
            key: String::new(),
            message: msg.to_string(),
        }
    }
}

pub(crate) fn from_table<T: DeserializeOwned>(table: Table) -> Result<T, FieldError> {
    T::deserialize(ValueDeserializer {
        value: Value::Table(table),
        path: String::new(),
    })
}

fn parse_bool(s: &str) -> Option<bool> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("true") || s == "1" {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") || s == "0" {
        Some(false)
    } else {
        None
    }
}

fn invalid(path: &str, found: &str, expected: &str) -> FieldError {
    FieldError {
        key: path.to_string(),
        message: format!("expected {expected}, found `{found}`"),
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

// `{:?}` keeps the fractional part of whole floats, so `1.0` stays "1.0".
fn float_to_string(f: f64) -> String {
    format!("{f:?}")
}

struct ValueDeserializer {
    value: Value,
    path: String,
}

impl ValueDeserializer {
    fn deserialize_integer<'de, V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        let ValueDeserializer { value, path } = self;
        match value {
            Value::Integer(i) => visitor.visit_i64(i),
            Value::Boolean(b) => visitor.visit_i64(i64::from(b)),
            Value::Float(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                visitor.visit_i64(f as i64)
            }
            Value::String(s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    visitor.visit_i64(i)
                } else if let Ok(u) = trimmed.parse::<u64>() {
                    visitor.visit_u64(u)
                } else {
                    Err(invalid(&path, &s, "an integer"))
                }
            }
            other => ValueDeserializer { value: other, path }.deserialize_any(visitor),
        }
    }

    fn deserialize_float<'de, V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        let ValueDeserializer { value, path } = self;
        match value {
            Value::Float(f) => visitor.visit_f64(f),
            Value::Integer(i) => visitor.visit_f64(i as f64),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) => visitor.visit_f64(f),
                Err(_) => Err(invalid(&path, &s, "a float")),
            },
            other => ValueDeserializer { value: other, path }.deserialize_any(visitor),
        }
    }
}

macro_rules! integer {
    ($de:lifetime: $($method:ident)*) => {
        $(
            fn $method<V: Visitor<$de>>(self, visitor: V) -> Result<V::Value, FieldError> {
                self.deserialize_integer(visitor)
            }
        )*
    };
}

impl<'de> Deserializer<'de> for ValueDeserializer {
    type Error = FieldError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        match self.value {
            Value::String(s) => visitor.visit_string(s),
            Value::Integer(i) => visitor.visit_i64(i),
            Value::Float(f) => visitor.visit_f64(f),
            Value::Boolean(b) => visitor.visit_bool(b),
            Value::Datetime(dt) => visitor.visit_string(dt.to_string()),
            Value::Array(items) => visitor.visit_seq(SeqDeserializer {
                iter: items.into_iter(),
                path: self.path,
                index: 0,
            }),
            Value::Table(table) => visitor.visit_map(MapDeserializer {
                iter: table.into_iter(),
                pending: None,
                path: self.path,
            }),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        let ValueDeserializer { value, path } = self;
        match value {
            Value::Boolean(b) => visitor.visit_bool(b),
            Value::Integer(i) => visitor.visit_bool(i != 0),
            Value::String(s) => match parse_bool(&s) {
                Some(b) => visitor.visit_bool(b),
                None => Err(invalid(&path, &s, "a boolean")),
            },
            other => ValueDeserializer { value: other, path }.deserialize_any(visitor),
        }
    }

    integer! {
        'de: deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64 deserialize_i128
        deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64 deserialize_u128
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        self.deserialize_float(visitor)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        self.deserialize_float(visitor)
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        let ValueDeserializer { value, path } = self;
        match value {
            Value::String(s) => visitor.visit_string(s),
            Value::Integer(i) => visitor.visit_string(i.to_string()),
            Value::Float(f) => visitor.visit_string(float_to_string(f)),
            Value::Boolean(b) => visitor.visit_string(b.to_string()),
            Value::Datetime(dt) => visitor.visit_string(dt.to_string()),
            other => ValueDeserializer { value: other, path }.deserialize_any(visitor),
        }
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        self.deserialize_any(visitor)
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        self.deserialize_any(visitor)
    }

    // Absent keys never reach here; a present value is always `Some`.
    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        visitor.visit_some(self)
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, FieldError> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, FieldError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        let ValueDeserializer { value, path } = self;
        let items = match value {
            Value::Array(items) => items,
            Value::String(s) if s.trim().is_empty() => Vec::new(),
            Value::String(s) => s
                .split(',')
                .map(|item| Value::String(item.trim().to_string()))
                .collect(),
            other => return ValueDeserializer { value: other, path }.deserialize_any(visitor),
        };
        visitor.visit_seq(SeqDeserializer {
            iter: items.into_iter(),
            path,
            index: 0,
        })
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, FieldError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, FieldError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        self.deserialize_any(visitor)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, FieldError> {
        let ValueDeserializer { value, path } = self;
        if name != DATETIME_STRUCT {
            return ValueDeserializer { value, path }.deserialize_any(visitor);
        }
        let datetime = match value {
            Value::Datetime(dt) => dt,
            Value::String(s) => match s.trim().parse::<Datetime>() {
                Ok(dt) => dt,
                Err(_) => return Err(invalid(&path, &s, "a datetime")),
            },
            other => return Err(invalid(&path, other.type_str(), "a datetime")),
        };
        // The single-entry map toml's `Datetime` expects
        let mut table = Table::new();
        table.insert(DATETIME_FIELD.to_string(), Value::String(datetime.to_string()));
        visitor.visit_map(MapDeserializer {
            iter: table.into_iter(),
            pending: None,
            path,
        })
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, FieldError> {
        let ValueDeserializer { value, path } = self;
        match value {
            Value::String(s) => {
                let variant: StringDeserializer<FieldError> = s.into_deserializer();
                visitor.visit_enum(variant)
            }
            Value::Table(table) if table.len() == 1 => {
                let Some((variant, value)) = table.into_iter().next() else {
                    return Err(invalid(&path, "an empty table", "an enum"));
                };
                visitor.visit_enum(EnumDeserializer {
                    variant,
                    value,
                    path,
                })
            }
            other => Err(invalid(&path, other.type_str(), "an enum")),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        self.deserialize_string(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, FieldError> {
        visitor.visit_unit()
    }
}

struct SeqDeserializer {
    iter: std::vec::IntoIter<Value>,
    path: String,
    index: usize,
}

impl<'de> de::SeqAccess<'de> for SeqDeserializer {
    type Error = FieldError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, FieldError> {
        let Some(value) = self.iter.next() else {
            return Ok(None);
        };
        let path = format!("{}[{}]", self.path, self.index);
        self.index += 1;
        seed.deserialize(ValueDeserializer {
            value,
            path: path.clone(),
        })
        .map(Some)
        .map_err(|e| e.at(&path))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapDeserializer {
    iter: toml::map::IntoIter,
    pending: Option<(String, Value)>,
    path: String,
}

impl<'de> de::MapAccess<'de> for MapDeserializer {
    type Error = FieldError;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>, FieldError> {
        let Some((key, value)) = self.iter.next() else {
            return Ok(None);
        };
        let name: StringDeserializer<FieldError> = key.clone().into_deserializer();
        let decoded = seed.deserialize(name)?;
        self.pending = Some((key, value));
        Ok(Some(decoded))
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, FieldError> {
        let Some((key, value)) = self.pending.take() else {
            return Err(de::Error::custom("map value requested before its key"));
        };
        let path = join(&self.path, &key);
        seed.deserialize(ValueDeserializer {
            value,
            path: path.clone(),
        })
        .map_err(|e| e.at(&path))
    }
}

struct EnumDeserializer {
    variant: String,
    value: Value,
    path: String,
}

impl<'de> de::EnumAccess<'de> for EnumDeserializer {
    type Error = FieldError;
    type Variant = ValueDeserializer;

    fn variant_seed<V: DeserializeSeed<'de>>(self, seed: V) -> Result<(V::Value, ValueDeserializer), FieldError> {
        let name: StringDeserializer<FieldError> = self.variant.into_deserializer();
        let tag = seed.deserialize(name)?;
        Ok((
            tag,
            ValueDeserializer {
                value: self.value,
                path: self.path,
            },
        ))
    }
}

impl<'de> de::VariantAccess<'de> for ValueDeserializer {
    type Error = FieldError;

    fn unit_variant(self) -> Result<(), FieldError> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value, FieldError> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, FieldError> {
        self.deserialize_seq(visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, FieldError> {
        self.deserialize_map(visitor)
    }
}
