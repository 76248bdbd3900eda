//! Key path derivation from a schema's shape.
//!
//! The schema is walked through its `Serialize` impl. Structs are descended
//! into; everything else (scalars, `None`, sequences, maps, enums) is a leaf
//! at the path of the field that holds it. Leaf values are never inspected,
//! so the key set depends only on the shape of the schema.

use std::collections::BTreeSet;
use std::fmt;

use serde::ser::{self, Impossible, Serialize};

use super::ConfigError;

/// Returns every leaf key path of `schema`, joined with `.`.
///
/// Fails with [`ConfigError::InvalidTarget`] if the root does not serialize
/// as a struct, and with [`ConfigError::SchemaDecode`] if a field's
/// `Serialize` impl reports an error.
pub fn flatten_keys<T: Serialize + ?Sized>(schema: &T) -> Result<BTreeSet<String>, ConfigError> {
    let mut keys = BTreeSet::new();
    match schema.serialize(RootSerializer { keys: &mut keys }) {
        Ok(()) => Ok(keys),
        Err(FlattenError::NotAStruct(kind)) => Err(ConfigError::InvalidTarget(format!(
            "require a struct to load into, got {kind}"
        ))),
        Err(FlattenError::Custom(msg)) => Err(ConfigError::SchemaDecode(msg)),
    }
}

#[derive(Debug)]
enum FlattenError {
    NotAStruct(&'static str),
    Custom(String),
}

impl fmt::Display for FlattenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlattenError::NotAStruct(kind) => write!(f, "expected a struct, got {kind}"),
            FlattenError::Custom(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for FlattenError {}

impl ser::Error for FlattenError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        FlattenError::Custom(msg.to_string())
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Accepts only a struct (possibly behind newtype wrappers).
struct RootSerializer<'a> {
    keys: &'a mut BTreeSet<String>,
}

macro_rules! reject {
    ($($method:ident($($arg:ty),*) => $kind:literal;)*) => {
        $(
            fn $method(self, $(_: $arg),*) -> Result<Self::Ok, Self::Error> {
                Err(FlattenError::NotAStruct($kind))
            }
        )*
    };
}

impl<'a> ser::Serializer for RootSerializer<'a> {
    type Ok = ();
    type Error = FlattenError;
    type SerializeSeq = Impossible<(), FlattenError>;
    type SerializeTuple = Impossible<(), FlattenError>;
    type SerializeTupleStruct = Impossible<(), FlattenError>;
    type SerializeTupleVariant = Impossible<(), FlattenError>;
    type SerializeMap = Impossible<(), FlattenError>;
    type SerializeStruct = StructKeys<'a>;
    type SerializeStructVariant = Impossible<(), FlattenError>;

    reject! {
        serialize_bool(bool) => "bool";
        serialize_i8(i8) => "integer";
        serialize_i16(i16) => "integer";
        serialize_i32(i32) => "integer";
        serialize_i64(i64) => "integer";
        serialize_u8(u8) => "integer";
        serialize_u16(u16) => "integer";
        serialize_u32(u32) => "integer";
        serialize_u64(u64) => "integer";
        serialize_f32(f32) => "float";
        serialize_f64(f64) => "float";
        serialize_char(char) => "char";
        serialize_str(&str) => "string";
        serialize_bytes(&[u8]) => "bytes";
        serialize_none() => "option";
        serialize_unit() => "unit";
        serialize_unit_struct(&'static str) => "unit struct";
        serialize_unit_variant(&'static str, u32, &'static str) => "enum";
    }

    fn serialize_some<T: ?Sized + Serialize>(self, _: &T) -> Result<(), FlattenError> {
        Err(FlattenError::NotAStruct("option"))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), FlattenError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<(), FlattenError> {
        Err(FlattenError::NotAStruct("enum"))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, FlattenError> {
        Err(FlattenError::NotAStruct("sequence"))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, FlattenError> {
        Err(FlattenError::NotAStruct("tuple"))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, FlattenError> {
        Err(FlattenError::NotAStruct("tuple struct"))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, FlattenError> {
        Err(FlattenError::NotAStruct("enum"))
    }

    // `#[serde(flatten)]` structs also arrive here; they are not supported.
    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, FlattenError> {
        Err(FlattenError::NotAStruct("map"))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, FlattenError> {
        Ok(StructKeys {
            prefix: String::new(),
            keys: self.keys,
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, FlattenError> {
        Err(FlattenError::NotAStruct("enum"))
    }
}

struct StructKeys<'a> {
    prefix: String,
    keys: &'a mut BTreeSet<String>,
}

impl ser::SerializeStruct for StructKeys<'_> {
    type Ok = ();
    type Error = FlattenError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), FlattenError> {
        value.serialize(FieldSerializer {
            path: join(&self.prefix, key),
            keys: &mut *self.keys,
        })
    }

    fn end(self) -> Result<(), FlattenError> {
        Ok(())
    }
}

/// Serializes one field: structs recurse, anything else records a leaf.
struct FieldSerializer<'a> {
    path: String,
    keys: &'a mut BTreeSet<String>,
}

impl FieldSerializer<'_> {
    fn leaf(self) -> Result<(), FlattenError> {
        self.keys.insert(self.path);
        Ok(())
    }
}

macro_rules! leaf {
    ($($method:ident($($arg:ty),*);)*) => {
        $(
            fn $method(self, $(_: $arg),*) -> Result<Self::Ok, Self::Error> {
                self.leaf()
            }
        )*
    };
}

impl<'a> ser::Serializer for FieldSerializer<'a> {
    type Ok = ();
    type Error = FlattenError;
    type SerializeSeq = Opaque;
    type SerializeTuple = Opaque;
    type SerializeTupleStruct = Opaque;
    type SerializeTupleVariant = Opaque;
    type SerializeMap = Opaque;
    type SerializeStruct = StructKeys<'a>;
    type SerializeStructVariant = Opaque;

    leaf! {
        serialize_bool(bool);
        serialize_i8(i8);
        serialize_i16(i16);
        serialize_i32(i32);
        serialize_i64(i64);
        serialize_i128(i128);
        serialize_u8(u8);
        serialize_u16(u16);
        serialize_u32(u32);
        serialize_u64(u64);
        serialize_u128(u128);
        serialize_f32(f32);
        serialize_f64(f64);
        serialize_char(char);
        serialize_str(&str);
        serialize_bytes(&[u8]);
        serialize_none();
        serialize_unit();
        serialize_unit_struct(&'static str);
        serialize_unit_variant(&'static str, u32, &'static str);
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), FlattenError> {
        value.serialize(self)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), FlattenError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<(), FlattenError> {
        self.leaf()
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Opaque, FlattenError> {
        self.leaf().map(|()| Opaque)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Opaque, FlattenError> {
        self.leaf().map(|()| Opaque)
    }

    fn serialize_tuple_struct(self, _name: &'static str, _len: usize) -> Result<Opaque, FlattenError> {
        self.leaf().map(|()| Opaque)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Opaque, FlattenError> {
        self.leaf().map(|()| Opaque)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Opaque, FlattenError> {
        self.leaf().map(|()| Opaque)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<StructKeys<'a>, FlattenError> {
        Ok(StructKeys {
            prefix: self.path,
            keys: self.keys,
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Opaque, FlattenError> {
        self.leaf().map(|()| Opaque)
    }
}

/// Contents of a leaf compound value; elements are not visited.
struct Opaque;

impl ser::SerializeSeq for Opaque {
    type Ok = ();
    type Error = FlattenError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, _value: &T) -> Result<(), FlattenError> {
        Ok(())
    }

    fn end(self) -> Result<(), FlattenError> {
        Ok(())
    }
}

impl ser::SerializeTuple for Opaque {
    type Ok = ();
    type Error = FlattenError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, _value: &T) -> Result<(), FlattenError> {
        Ok(())
    }

    fn end(self) -> Result<(), FlattenError> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for Opaque {
    type Ok = ();
    type Error = FlattenError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _value: &T) -> Result<(), FlattenError> {
        Ok(())
    }

    fn end(self) -> Result<(), FlattenError> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for Opaque {
    type Ok = ();
    type Error = FlattenError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _value: &T) -> Result<(), FlattenError> {
        Ok(())
    }

    fn end(self) -> Result<(), FlattenError> {
        Ok(())
    }
}

impl ser::SerializeMap for Opaque {
    type Ok = ();
    type Error = FlattenError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, _key: &T) -> Result<(), FlattenError> {
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, _value: &T) -> Result<(), FlattenError> {
        Ok(())
    }

    fn end(self) -> Result<(), FlattenError> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for Opaque {
    type Ok = ();
    type Error = FlattenError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        _value: &T,
    ) -> Result<(), FlattenError> {
        Ok(())
    }

    fn end(self) -> Result<(), FlattenError> {
        Ok(())
    }
}
