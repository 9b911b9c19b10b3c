//! Validation constraint payloads.
//!
//! Constraints come in four families; which family may appear on a value is
//! decided by the class of the underlying type (numeric, string-ish,
//! list-ish, object-ish), checked by the compiler before emission.

use prost::Message;

/// Constraints on numeric values.
#[derive(Clone, PartialEq, Message)]
pub struct Numeric {
    #[prost(int64, tag = "1")]
    pub maximum: i64,
    #[prost(int64, tag = "2")]
    pub minimum: i64,
    #[prost(bool, tag = "3")]
    pub exclusive_maximum: bool,
    #[prost(bool, tag = "4")]
    pub exclusive_minimum: bool,
    #[prost(int64, tag = "5")]
    pub multiple_of: i64,
}

/// Constraints on string-ish values (string, bytes).
#[derive(Clone, PartialEq, Message)]
pub struct String {
    #[prost(uint64, tag = "1")]
    pub max_length: u64,
    #[prost(uint64, tag = "2")]
    pub min_length: u64,
    /// An ECMA-262 regular expression the value must match.
    #[prost(string, tag = "3")]
    pub pattern: ::std::string::String,
}

/// Constraints on list-ish values (list, set, list-map).
#[derive(Clone, PartialEq, Message)]
pub struct List {
    #[prost(uint64, tag = "1")]
    pub max_items: u64,
    #[prost(uint64, tag = "2")]
    pub min_items: u64,
    #[prost(bool, tag = "3")]
    pub unique_items: bool,
}

/// Constraints on object-ish values (struct, union, simple-map).
#[derive(Clone, PartialEq, Message)]
pub struct Object {
    #[prost(uint64, tag = "1")]
    pub max_properties: u64,
    #[prost(uint64, tag = "2")]
    pub min_properties: u64,
}

/// Exactly one family of constraints, for sites (references) where the
/// family cannot be determined without chasing the type graph.
#[derive(Clone, PartialEq, Message)]
pub struct Any {
    #[prost(oneof = "any::Type", tags = "1, 2, 3, 4")]
    pub r#type: Option<any::Type>,
}

pub mod any {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Type {
        #[prost(message, tag = "1")]
        Num(super::Numeric),
        #[prost(message, tag = "2")]
        Str(super::String),
        #[prost(message, tag = "3")]
        List(super::List),
        #[prost(message, tag = "4")]
        Obj(super::Object),
    }
}
