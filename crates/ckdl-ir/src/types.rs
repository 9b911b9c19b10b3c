//! The CKDL type system: kinds, subtypes, fields, and the closed set of
//! core types they are built from.

use crate::constraints;
use prost::Message;

/// Identifies a group-version. Structural equality; used as a lookup key
/// throughout the compiler.
#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct GroupVersionRef {
    #[prost(string, tag = "1")]
    pub group: String,
    #[prost(string, tag = "2")]
    pub version: String,
}

/// A reference to a named type in some group-version.
///
/// `name` is always fully qualified (`Outer::Inner`) by the time a reference
/// reaches the wire.
#[derive(Clone, PartialEq, Message)]
pub struct Reference {
    #[prost(message, optional, tag = "1")]
    pub group_version: Option<GroupVersionRef>,
    #[prost(string, tag = "2")]
    pub name: String,
    /// Extra constraints applied at the reference site (e.g. a newtype
    /// tightening validation over an aliased type).
    #[prost(message, optional, tag = "3")]
    pub constraints: Option<constraints::Any>,
}

/// A primitive type, possibly constrained.
#[derive(Clone, PartialEq, Message)]
pub struct Primitive {
    #[prost(enumeration = "primitive::Type", tag = "1")]
    pub r#type: i32,
    #[prost(oneof = "primitive::SpecificConstraints", tags = "2, 3")]
    pub specific_constraints: Option<primitive::SpecificConstraints>,
}

pub mod primitive {
    /// The closed set of KDL primitives.
    ///
    /// `LEGACYINT32` and `LEGACYFLOAT64` are named to discourage use: new
    /// APIs should prefer `INT64` and avoid floats entirely.
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum Type {
        String = 0,
        Legacyint32 = 1,
        Int64 = 2,
        Bool = 3,
        Time = 4,
        Duration = 5,
        Quantity = 6,
        Bytes = 7,
        Legacyfloat64 = 8,
        Intorstring = 9,
    }

    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum SpecificConstraints {
        #[prost(message, tag = "2")]
        NumericConstraints(super::constraints::Numeric),
        #[prost(message, tag = "3")]
        StringConstraints(super::constraints::String),
    }
}

/// An ordered list.
#[derive(Clone, PartialEq, Message)]
pub struct List {
    #[prost(oneof = "list::Items", tags = "1, 2")]
    pub items: Option<list::Items>,
    #[prost(message, optional, tag = "3")]
    pub list_constraints: Option<constraints::List>,
}

pub mod list {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Items {
        #[prost(message, tag = "1")]
        Primitive(super::Primitive),
        #[prost(message, tag = "2")]
        Reference(super::Reference),
    }
}

/// An unordered collection of unique items.
#[derive(Clone, PartialEq, Message)]
pub struct Set {
    #[prost(oneof = "set::Items", tags = "1, 2")]
    pub items: Option<set::Items>,
    #[prost(message, optional, tag = "3")]
    pub list_constraints: Option<constraints::List>,
}

pub mod set {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Items {
        #[prost(message, tag = "1")]
        Primitive(super::Primitive),
        #[prost(message, tag = "2")]
        Reference(super::Reference),
    }
}

/// An ordered sequence serialized as a list but keyed by one or more fields
/// of its item type.
#[derive(Clone, PartialEq, Message)]
pub struct ListMap {
    #[prost(message, optional, tag = "1")]
    pub items: Option<Reference>,
    #[prost(string, repeated, tag = "2")]
    pub key_field: Vec<String>,
    #[prost(message, optional, tag = "3")]
    pub list_constraints: Option<constraints::List>,
}

/// An unordered primitive-to-primitive map serialized as a JSON object.
#[derive(Clone, PartialEq, Message)]
pub struct PrimitiveMap {
    #[prost(oneof = "primitive_map::Key", tags = "1, 2")]
    pub key: Option<primitive_map::Key>,
    #[prost(oneof = "primitive_map::Value", tags = "3, 4, 5")]
    pub value: Option<primitive_map::Value>,
    #[prost(message, optional, tag = "6")]
    pub object_constraints: Option<constraints::Object>,
}

pub mod primitive_map {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Key {
        #[prost(message, tag = "1")]
        PrimitiveKey(super::Primitive),
        /// A reference that must chase to a string-ish primitive.
        #[prost(message, tag = "2")]
        ReferenceKey(super::Reference),
    }

    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Value {
        #[prost(message, tag = "3")]
        PrimitiveValue(super::Primitive),
        #[prost(message, tag = "4")]
        ReferenceValue(super::Reference),
        /// A list whose items are primitive.
        #[prost(message, tag = "5")]
        SimpleListValue(super::List),
    }
}

/// Structured documentation, split by section title in the source docs.
#[derive(Clone, PartialEq, Message)]
pub struct Documentation {
    #[prost(string, tag = "1")]
    pub description: String,
    #[prost(string, tag = "2")]
    pub example: String,
    #[prost(string, tag = "3")]
    pub external_ref: String,
}

/// A named field of a kind, struct, or union.
#[derive(Clone, PartialEq, Message)]
pub struct Field {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bool, tag = "2")]
    pub optional: bool,
    #[prost(bool, tag = "3")]
    pub zero_means_absent: bool,
    /// Inline (`_inline`) fields have an empty name and this set.
    #[prost(bool, tag = "4")]
    pub embedded: bool,
    /// 1-based declaration-order tag, for back ends that emit protos.
    #[prost(uint32, tag = "5")]
    pub proto_tag: u32,
    #[prost(oneof = "field::Type", tags = "6, 7, 8, 9, 10, 11")]
    pub r#type: Option<field::Type>,
    #[prost(message, optional, tag = "12")]
    pub default: Option<prost_types::Value>,
    #[prost(message, optional, tag = "13")]
    pub docs: Option<Documentation>,
    #[prost(message, repeated, tag = "14")]
    pub attributes: Vec<prost_types::Any>,
}

pub mod field {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Type {
        #[prost(message, tag = "6")]
        Primitive(super::Primitive),
        #[prost(message, tag = "7")]
        NamedType(super::Reference),
        #[prost(message, tag = "8")]
        Set(super::Set),
        #[prost(message, tag = "9")]
        List(super::List),
        #[prost(message, tag = "10")]
        PrimitiveMap(super::PrimitiveMap),
        #[prost(message, tag = "11")]
        ListMap(super::ListMap),
    }
}

/// A set of named fields.
#[derive(Clone, PartialEq, Message)]
pub struct Struct {
    #[prost(message, repeated, tag = "1")]
    pub fields: Vec<Field>,
}

/// A tagged (or untagged) union: exactly one variant set at a time.
#[derive(Clone, PartialEq, Message)]
pub struct Union {
    #[prost(message, repeated, tag = "1")]
    pub variants: Vec<Field>,
    /// Discriminator field name; empty when `untagged`.
    #[prost(string, tag = "2")]
    pub tag: String,
    #[prost(bool, tag = "3")]
    pub untagged: bool,
}

/// A closed set of string-serialized variants.
#[derive(Clone, PartialEq, Message)]
pub struct Enum {
    #[prost(message, repeated, tag = "1")]
    pub variants: Vec<enumeration::Variant>,
}

pub mod enumeration {
    use super::Documentation;
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct Variant {
        /// Serialized literally as this string.
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(message, optional, tag = "2")]
        pub docs: Option<Documentation>,
        #[prost(message, repeated, tag = "3")]
        pub attributes: Vec<prost_types::Any>,
    }
}

/// A group-version-rooted API type with implicit TypeMeta (and, for
/// persisted kinds, ObjectMeta).
#[derive(Clone, PartialEq, Message)]
pub struct Kind {
    #[prost(string, tag = "1")]
    pub name: String,
    /// Whether this kind is a persisted object (carries ObjectMeta).
    #[prost(bool, tag = "2")]
    pub object: bool,
    #[prost(message, repeated, tag = "3")]
    pub fields: Vec<Field>,
    #[prost(message, optional, tag = "4")]
    pub docs: Option<Documentation>,
    #[prost(message, repeated, tag = "5")]
    pub attributes: Vec<prost_types::Any>,
}

/// Any non-kind named type: a struct, union, enum, or newtype (wrapper).
#[derive(Clone, PartialEq, Message)]
pub struct Subtype {
    /// Fully qualified within the group-version (`Pod::Spec`).
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub docs: Option<Documentation>,
    #[prost(message, repeated, tag = "3")]
    pub attributes: Vec<prost_types::Any>,
    #[prost(oneof = "subtype::Type", tags = "4, 5, 6, 7, 8, 9, 10, 11, 12")]
    pub r#type: Option<subtype::Type>,
}

pub mod subtype {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Type {
        /// A newtype aliasing another named type.
        #[prost(message, tag = "4")]
        ReferenceAlias(super::Reference),
        /// A newtype aliasing a primitive.
        #[prost(message, tag = "5")]
        PrimitiveAlias(super::Primitive),
        #[prost(message, tag = "6")]
        Union(super::Union),
        #[prost(message, tag = "7")]
        Struct(super::Struct),
        #[prost(message, tag = "8")]
        Set(super::Set),
        #[prost(message, tag = "9")]
        List(super::List),
        #[prost(message, tag = "10")]
        PrimitiveMap(super::PrimitiveMap),
        #[prost(message, tag = "11")]
        ListMap(super::ListMap),
        #[prost(message, tag = "12")]
        Enum(super::Enum),
    }
}
