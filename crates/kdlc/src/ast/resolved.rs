//! Post-pass attachments to the AST.
//!
//! Modifier lowering collapses the open-ended modifier list of a field or
//! newtype into [`ResolvedTypeInfo`]: exactly one core type plus the
//! behavior side-channel (optional/default/create-only/validates). The
//! core-type payloads reuse the CKDL IR messages directly so lowering to
//! the wire is a move, not a translation.

use super::{GroupVersionRef, Value};
use crate::foundation::Span;
use ckdl_ir::{constraints, types};

/// The closed set of core types a modifier list can produce.
#[derive(Debug, Clone)]
pub enum ResolvedType {
    Primitive(types::primitive::Type),
    Reference(types::Reference),
    List(types::List),
    Set(types::Set),
    ListMap(types::ListMap),
    PrimitiveMap(types::PrimitiveMap),
}

/// Which family of validation a type admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFamily {
    /// No validation at all (bool, int-or-string, enums).
    None,
    Numeric,
    String,
    List,
    Objectish,
}

/// The `validates(...)` bag, partitioned by target family.
///
/// Kept as four separate options so later passes can both match them to
/// the underlying type's family and point at the offenders.
#[derive(Debug, Clone, Default)]
pub struct ValidatesInfo {
    pub number: Option<constraints::Numeric>,
    pub string: Option<constraints::String>,
    pub list: Option<constraints::List>,
    pub objectish: Option<constraints::Object>,
}

impl ValidatesInfo {
    pub fn is_empty(&self) -> bool {
        self.number.is_none()
            && self.string.is_none()
            && self.list.is_none()
            && self.objectish.is_none()
    }
}

/// Everything a field's modifier list resolved to.
#[derive(Debug, Clone, Default)]
pub struct ResolvedTypeInfo {
    pub optional: bool,
    pub default: Option<Value>,
    /// Span of the `optional` modifier, for duplicate diagnostics.
    pub optional_span: Option<Span>,

    pub create_only: bool,
    pub create_only_span: Option<Span>,

    /// Exactly one core type; `None` only when the list was in error.
    pub r#type: Option<ResolvedType>,
    pub type_span: Option<Span>,
    /// Span of a list-map's `keys:` parameter, for key-discipline
    /// diagnostics that fire after lowering.
    pub keys_span: Option<Span>,

    pub validates: Option<ValidatesInfo>,
    pub validates_span: Option<Span>,
}

/// The fully qualified identity of a declaration after scope resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedName {
    pub group_version: GroupVersionRef,
    /// `::`-joined path from the group-version root (`Pod::Spec`).
    pub full_name: String,
}

/// A marker invocation's type-checked payload: the descriptor's type URL
/// plus the encoded message bytes, carried into the IR as an `Any`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMarker {
    pub type_url: String,
    pub payload: Vec<u8>,
}
