//! The parsed form of a KDL file.
//!
//! Nodes own their data and carry a [`Span`]; the `resolved_*` fields are
//! populated by later passes (scope resolution, modifier lowering, marker
//! resolution) and are `None` straight out of the parser.

mod resolved;

pub use resolved::{
    ResolvedMarker, ResolvedName, ResolvedType, ResolvedTypeInfo, ValidatesInfo, ValidationFamily,
};

use crate::foundation::Span;
use indexmap::IndexMap;

/// A whole source file: optional imports, group-versions, and marker
/// declaration sets.
#[derive(Debug, Clone, Default)]
pub struct File {
    pub imports: Option<Imports>,
    pub group_versions: Vec<GroupVersion>,
    pub marker_decls: Vec<MarkerDeclSet>,
}

/// Identifies a group-version. Structural equality; used as a key across
/// the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersionRef {
    pub group: String,
    pub version: String,
}

impl GroupVersionRef {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for GroupVersionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.group, self.version)
    }
}

impl From<&GroupVersionRef> for ckdl_ir::types::GroupVersionRef {
    fn from(gv: &GroupVersionRef) -> Self {
        Self {
            group: gv.group.clone(),
            version: gv.version.clone(),
        }
    }
}

/// The `import (...)` block.
#[derive(Debug, Clone, Default)]
pub struct Imports {
    pub types: Option<TypeImports>,
    pub markers: Option<MarkerImports>,
    pub span: Span,
}

/// `types ( {gv, ...} from "path"; ... )`.
#[derive(Debug, Clone, Default)]
pub struct TypeImports {
    /// Later clauses importing the same group-version replace earlier ones.
    pub imports: IndexMap<GroupVersionRef, TypeImport>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TypeImport {
    pub group_version: GroupVersionRef,
    pub src: String,
    pub span: Span,
}

/// `markers ( alias from "path"; ... )`.
#[derive(Debug, Clone, Default)]
pub struct MarkerImports {
    pub imports: IndexMap<String, MarkerImport>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct MarkerImport {
    pub alias: String,
    pub src: String,
    pub span: Span,
}

/// Documentation split into titled sections. The untitled leading section
/// is the description.
#[derive(Debug, Clone, Default)]
pub struct Docs {
    pub sections: Vec<DocSection>,
    pub span: Span,
}

impl Docs {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocSection {
    pub title: String,
    pub lines: Vec<String>,
    pub span: Span,
}

/// One `group-version(group: "...", version: "...") { ... }` block.
#[derive(Debug, Clone)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
    pub docs: Docs,
    pub markers: Vec<AbstractMarker>,
    pub decls: Vec<Decl>,
    pub span: Span,
}

impl GroupVersion {
    pub fn gv_ref(&self) -> GroupVersionRef {
        GroupVersionRef::new(self.group.clone(), self.version.clone())
    }
}

/// A top-level or nested declaration.
#[derive(Debug, Clone)]
pub enum Decl {
    Kind(KindDecl),
    Subtype(SubtypeDecl),
}

/// `kind Name { ... }` — a root API type.
#[derive(Debug, Clone)]
pub struct KindDecl {
    pub docs: Docs,
    pub markers: Vec<AbstractMarker>,
    pub name: Ident,
    pub fields: Vec<Field>,
    pub subtypes: Vec<SubtypeDecl>,
    pub resolved_name: Option<ResolvedName>,
    pub span: Span,
}

/// `struct` / `union` / `enum` / `newtype` declaration.
#[derive(Debug, Clone)]
pub struct SubtypeDecl {
    pub docs: Docs,
    pub markers: Vec<AbstractMarker>,
    pub name: Ident,
    pub body: SubtypeBody,
    pub resolved_name: Option<ResolvedName>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum SubtypeBody {
    Struct(StructBody),
    Union(UnionBody),
    Enum(EnumBody),
    Newtype(NewtypeBody),
}

impl SubtypeBody {
    pub fn span(&self) -> Span {
        match self {
            SubtypeBody::Struct(b) => b.span,
            SubtypeBody::Union(b) => b.span,
            SubtypeBody::Enum(b) => b.span,
            SubtypeBody::Newtype(b) => b.span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StructBody {
    pub fields: Vec<Field>,
    pub subtypes: Vec<SubtypeDecl>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct UnionBody {
    pub variants: Vec<Field>,
    pub subtypes: Vec<SubtypeDecl>,
    /// Discriminator field name; defaults to `type`.
    pub tag: String,
    pub untagged: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct EnumBody {
    pub variants: Vec<EnumVariant>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct EnumVariant {
    pub docs: Docs,
    pub markers: Vec<AbstractMarker>,
    pub name: Ident,
    pub span: Span,
}

/// `newtype Name: <modifiers>;`
#[derive(Debug, Clone)]
pub struct NewtypeBody {
    pub modifiers: ModifierList,
    pub resolved_type: Option<ResolvedTypeInfo>,
    pub span: Span,
}

/// A field (or union variant): `name: <modifiers>,`.
#[derive(Debug, Clone)]
pub struct Field {
    pub docs: Docs,
    pub markers: Vec<AbstractMarker>,
    /// Empty for `_inline` fields.
    pub name: Ident,
    pub modifiers: ModifierList,
    pub resolved_type: Option<ResolvedTypeInfo>,
    pub embedded: bool,
    pub span: Span,
}

/// A name with its source span.
#[derive(Debug, Clone, Default)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }
}

pub type ModifierList = Vec<Modifier>;

/// One entry of a field's modifier list: a key (with optional parameters)
/// or a type reference.
#[derive(Debug, Clone)]
pub enum Modifier {
    Keyish(KeyishModifier),
    Ref(RefModifier),
}

impl Modifier {
    pub fn span(&self) -> Span {
        match self {
            Modifier::Keyish(m) => m.span,
            Modifier::Ref(m) => m.span,
        }
    }
}

/// `key` or `key(params...)`.
#[derive(Debug, Clone)]
pub struct KeyishModifier {
    pub name: Ident,
    pub parameters: Option<ParameterList>,
    pub span: Span,
}

/// A reference to a named type, optionally group-qualified.
#[derive(Debug, Clone)]
pub struct RefModifier {
    /// `None` until scope resolution fills in the enclosing group-version.
    pub group_version: Option<GroupVersionRef>,
    pub name: Ident,
    pub span: Span,
}

/// `( key: value, ... )`.
#[derive(Debug, Clone, Default)]
pub struct ParameterList {
    pub params: Vec<KeyValue>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct KeyValue {
    pub key: Ident,
    /// `None` when the value failed to parse; the error is already
    /// recorded.
    pub value: Option<Value>,
    pub span: Span,
}

/// A literal or type-ish value in parameter position.
#[derive(Debug, Clone)]
pub enum Value {
    Str(String, Span),
    Num(i64, Span),
    Bool(bool, Span),
    List(Vec<Value>, Span),
    Struct(Vec<KeyValue>, Span),
    /// `.fieldName` — a schema-side field reference.
    FieldPath(Ident),
    /// A type reference (`Pod`, `Pod::Spec`, `core/v1::Pod`).
    RefType(RefModifier),
    /// A bare lowercase name in value position (`string`, `int32`).
    PrimitiveType(Ident),
    /// A compound type in value position (`list(value: int32)`).
    CompoundType(KeyishModifier),
}

impl Value {
    pub fn span(&self) -> Span {
        match self {
            Value::Str(_, span)
            | Value::Num(_, span)
            | Value::Bool(_, span)
            | Value::List(_, span)
            | Value::Struct(_, span) => *span,
            Value::FieldPath(ident) | Value::PrimitiveType(ident) => ident.span,
            Value::RefType(m) => m.span,
            Value::CompoundType(m) => m.span,
        }
    }
}

/// `@name` or `@alias::name`, with optional keyword arguments.
#[derive(Debug, Clone)]
pub struct AbstractMarker {
    pub name: Ident,
    pub parameters: Option<ParameterList>,
    /// Attached by the marker resolver.
    pub resolved: Option<ResolvedMarker>,
    pub span: Span,
}

/// `markers(package: "...") { marker <name> { ... } ... }`.
#[derive(Debug, Clone)]
pub struct MarkerDeclSet {
    pub package: String,
    pub docs: Docs,
    pub decls: Vec<MarkerDecl>,
    pub span: Span,
}

/// `marker <name> { field-list }` inside a marker declaration set.
#[derive(Debug, Clone)]
pub struct MarkerDecl {
    pub docs: Docs,
    pub markers: Vec<AbstractMarker>,
    pub name: Ident,
    pub fields: Vec<Field>,
    pub span: Span,
}
