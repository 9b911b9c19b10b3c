//! User-defined marker schemas.
//!
//! Markers are a secondary, closed type system: their fields may be
//! primitives, lists of primitives, or string-keyed maps to primitives, but
//! never references to domain types — marker payloads are transport-only.

use crate::constraints;
use crate::types::{Documentation, Primitive};
use prost::Message;

/// A single marker definition inside a marker set.
#[derive(Clone, PartialEq, Message)]
pub struct MarkerDef {
    /// Kebab-case invocation name (`@alias::<name>`).
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub fields: Vec<MarkerField>,
    #[prost(message, optional, tag = "3")]
    pub docs: Option<Documentation>,
    #[prost(message, repeated, tag = "4")]
    pub attributes: Vec<prost_types::Any>,
}

/// A field of a marker definition.
#[derive(Clone, PartialEq, Message)]
pub struct MarkerField {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bool, tag = "2")]
    pub optional: bool,
    #[prost(message, optional, tag = "3")]
    pub r#type: Option<Type>,
    #[prost(message, optional, tag = "4")]
    pub default: Option<prost_types::Value>,
    #[prost(message, optional, tag = "5")]
    pub docs: Option<Documentation>,
    /// Field number in the compiled marker descriptor.
    #[prost(uint32, tag = "6")]
    pub proto_tag: u32,
}

/// The restricted type language for marker fields.
#[derive(Clone, PartialEq, Message)]
pub struct Type {
    #[prost(oneof = "type_kind::Kind", tags = "1, 2, 3")]
    pub r#type: Option<type_kind::Kind>,
}

pub mod type_kind {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        Primitive(super::Primitive),
        #[prost(message, tag = "2")]
        List(Box<super::List>),
        #[prost(message, tag = "3")]
        Map(Box<super::Map>),
    }
}

/// A repeated marker field.
#[derive(Clone, PartialEq, Message)]
pub struct List {
    #[prost(message, optional, boxed, tag = "1")]
    pub items: Option<Box<Type>>,
    #[prost(message, optional, tag = "2")]
    pub list_constraints: Option<constraints::List>,
}

/// A string-keyed map marker field.
#[derive(Clone, PartialEq, Message)]
pub struct Map {
    #[prost(message, optional, boxed, tag = "1")]
    pub values: Option<Box<Type>>,
}
