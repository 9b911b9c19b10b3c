//! CKDL intermediate-representation messages.
//!
//! CKDL is the serialized form of a compiled KDL file. There are no
//! `.proto` sources to generate from: the field numbers ARE the format,
//! so the messages are hand-written prost structs with every tag spelled
//! out at the definition site, where renumbering would be visible in
//! review. Consumers address nodes inside a [`Partial`] by proto field
//! number (see [`Location`]), which is why each message's tags are also
//! exported as constants in [`tags`].
//!
//! Module layout follows the format itself:
//! - crate root — file-level framing ([`Bundle`], [`Partial`], [`Location`])
//! - [`types`] — the type system (kinds, subtypes, fields, primitives)
//! - [`constraints`] — validation constraint payloads
//! - [`groupver`] — group-version descriptions
//! - [`markers`] — user-defined marker schemas
//! - [`backend`] — the length-delimited back-end response protocol

pub mod backend;
pub mod constraints;
pub mod groupver;
pub mod markers;
pub mod types;

use prost::Message;

/// A set of compiled partials addressed by virtual path.
#[derive(Clone, PartialEq, Message)]
pub struct Bundle {
    #[prost(message, repeated, tag = "1")]
    pub virtual_files: Vec<VirtualFile>,
}

/// A single named entry in a [`Bundle`].
#[derive(Clone, PartialEq, Message)]
pub struct VirtualFile {
    /// Virtual path the partial was compiled from.
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub contents: Option<Partial>,
}

/// The compiled form of one KDL source file.
#[derive(Clone, PartialEq, Message)]
pub struct Partial {
    #[prost(message, repeated, tag = "1")]
    pub group_versions: Vec<GroupVersion>,
    #[prost(message, repeated, tag = "2")]
    pub dependencies: Vec<Dependency>,
    /// Source map: one entry per interesting IR node.
    #[prost(message, repeated, tag = "3")]
    pub source_map: Vec<Location>,
    #[prost(message, repeated, tag = "4")]
    pub marker_sets: Vec<MarkerSet>,
}

/// A dependency edge recorded from the file's type imports.
#[derive(Clone, PartialEq, Message)]
pub struct Dependency {
    #[prost(message, optional, tag = "1")]
    pub group_version: Option<types::GroupVersionRef>,
    /// Virtual path the group-version is imported from.
    #[prost(string, tag = "2")]
    pub from: String,
}

/// A source-map entry.
///
/// `path` addresses a node in the enclosing [`Partial`]: alternating proto
/// field numbers and (for repeated fields) element indices, starting at the
/// `Partial` itself. `span` is `[start_offset, end_offset]` in the bytes of
/// the source file the partial was compiled from.
#[derive(Clone, PartialEq, Message)]
pub struct Location {
    #[prost(int32, repeated, tag = "1")]
    pub path: Vec<i32>,
    #[prost(int32, repeated, tag = "2")]
    pub span: Vec<i32>,
}

/// One group-version's compiled declarations.
#[derive(Clone, PartialEq, Message)]
pub struct GroupVersion {
    #[prost(message, optional, tag = "1")]
    pub description: Option<groupver::GroupVersion>,
    #[prost(message, repeated, tag = "2")]
    pub kinds: Vec<types::Kind>,
    /// All non-kind named types, flattened; nested declarations appear here
    /// under their fully qualified (`::`-joined) names.
    #[prost(message, repeated, tag = "3")]
    pub types: Vec<types::Subtype>,
}

/// A set of marker definitions sharing a proto package.
#[derive(Clone, PartialEq, Message)]
pub struct MarkerSet {
    #[prost(string, tag = "1")]
    pub package: String,
    #[prost(message, repeated, tag = "2")]
    pub markers: Vec<markers::MarkerDef>,
}

/// Proto field numbers, re-exported for source-map path construction.
///
/// Kept adjacent to the message definitions they mirror; a mismatch here is
/// a wire-format bug.
pub mod tags {
    pub mod partial {
        pub const GROUP_VERSIONS: i32 = 1;
        pub const DEPENDENCIES: i32 = 2;
        pub const SOURCE_MAP: i32 = 3;
        pub const MARKER_SETS: i32 = 4;
    }
    pub mod group_version {
        pub const DESCRIPTION: i32 = 1;
        pub const KINDS: i32 = 2;
        pub const TYPES: i32 = 3;
    }
    pub mod group_version_desc {
        pub const DOCS: i32 = 3;
        pub const ATTRIBUTES: i32 = 4;
    }
    pub mod kind {
        pub const FIELDS: i32 = 3;
        pub const DOCS: i32 = 4;
        pub const ATTRIBUTES: i32 = 5;
    }
    pub mod subtype {
        pub const DOCS: i32 = 2;
        pub const ATTRIBUTES: i32 = 3;
        pub const REFERENCE_ALIAS: i32 = 4;
        pub const PRIMITIVE_ALIAS: i32 = 5;
        pub const UNION: i32 = 6;
        pub const STRUCT: i32 = 7;
        pub const SET: i32 = 8;
        pub const LIST: i32 = 9;
        pub const PRIMITIVE_MAP: i32 = 10;
        pub const LIST_MAP: i32 = 11;
        pub const ENUM: i32 = 12;
    }
    pub mod field {
        pub const PRIMITIVE: i32 = 6;
        pub const NAMED_TYPE: i32 = 7;
        pub const SET: i32 = 8;
        pub const LIST: i32 = 9;
        pub const PRIMITIVE_MAP: i32 = 10;
        pub const LIST_MAP: i32 = 11;
        pub const DEFAULT: i32 = 12;
        pub const DOCS: i32 = 13;
        pub const ATTRIBUTES: i32 = 14;
    }
    pub mod list_map {
        pub const ITEMS: i32 = 1;
        pub const KEY_FIELD: i32 = 2;
    }
    pub mod documentation {
        pub const DESCRIPTION: i32 = 1;
        pub const EXAMPLE: i32 = 2;
        pub const EXTERNAL_REF: i32 = 3;
    }
    pub mod structure {
        pub const FIELDS: i32 = 1;
    }
    pub mod union {
        pub const VARIANTS: i32 = 1;
    }
    pub mod enumeration {
        pub const VARIANTS: i32 = 1;
    }
    pub mod enum_variant {
        pub const DOCS: i32 = 2;
        pub const ATTRIBUTES: i32 = 3;
    }
    pub mod marker_set {
        pub const MARKERS: i32 = 2;
    }
    pub mod marker_def {
        pub const FIELDS: i32 = 2;
        pub const DOCS: i32 = 3;
        pub const ATTRIBUTES: i32 = 4;
    }
    pub mod marker_field {
        pub const TYPE: i32 = 3;
        pub const DEFAULT: i32 = 4;
        pub const DOCS: i32 = 5;
    }
    pub mod marker_type {
        pub const PRIMITIVE: i32 = 1;
        pub const LIST: i32 = 2;
        pub const MAP: i32 = 3;
    }
}
