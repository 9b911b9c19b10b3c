//! Marker resolution.
//!
//! Markers come in two halves:
//!
//! 1. **Declarations** (`markers(package: "…") { marker name { … } }`) form
//!    a closed secondary type system: fields may be primitives, lists of
//!    primitives, or string-keyed maps of primitives — never references to
//!    domain types. [`prep_marker_decls`] lowers and shape-checks them.
//! 2. **Invocations** (`@alias::name(key: value)`) resolve the alias
//!    through the file's marker imports, load the referenced file via the
//!    loader, compile the declarations into message descriptors, and
//!    type-check the arguments field by field. The encoded payload rides
//!    the AST into the IR as an `Any`.
//!
//! Unprefixed markers are built-ins; `nonpersisted` is the only one.

use super::mods;
use crate::ast::{self, ResolvedMarker, ResolvedType, ResolvedTypeInfo};
use crate::compile::PartialSource;
use crate::trace::Context;
use ckdl_ir::markers as irm;
use ckdl_ir::types::{self, primitive};
use prost::encoding as enc;
use std::collections::{BTreeMap, HashMap};

/// Lower and shape-check the marker declarations of a file.
pub fn prep_marker_decls(ctx: &Context, file: &mut ast::File) {
    for set in &mut file.marker_decls {
        let set_ctx = ctx
            .describe("marker declaration set")
            .note("package", set.package.clone())
            .in_span(set.span);
        for decl in &mut set.decls {
            let decl_ctx = set_ctx
                .describe("marker declaration")
                .note("name", decl.name.name.clone())
                .in_span(decl.span);
            for field in &mut decl.fields {
                let field_ctx = decl_ctx
                    .describe("field")
                    .note("name", field.name.name.clone())
                    .in_span(field.span);
                field.resolved_type = Some(resolve_marker_modifiers(&field_ctx, &field.modifiers));
            }
        }
    }
}

const MARKER_SHAPE_ERROR: &str =
    "only primitives, lists of primitives, and string-keyed maps of primitives are supported in marker definitions";

/// Lower a marker field's modifier list, rejecting shapes the marker type
/// system does not admit.
fn resolve_marker_modifiers(ctx: &Context, modifiers: &ast::ModifierList) -> ResolvedTypeInfo {
    let info = mods::modifiers_to_known(ctx, modifiers);
    let ctx = match info.type_span {
        Some(span) => ctx.describe("type modifier").in_span(span),
        None => ctx.describe("type modifier"),
    };

    match &info.r#type {
        Some(ResolvedType::Reference(_)) => ctx.error_at(MARKER_SHAPE_ERROR),
        Some(ResolvedType::List(list)) => {
            if matches!(list.items, Some(types::list::Items::Reference(_))) {
                ctx.error_at(MARKER_SHAPE_ERROR);
            }
        }
        Some(ResolvedType::Set(_)) | Some(ResolvedType::ListMap(_)) => {
            ctx.error_at(MARKER_SHAPE_ERROR);
        }
        Some(ResolvedType::PrimitiveMap(map)) => {
            match &map.key {
                Some(types::primitive_map::Key::PrimitiveKey(prim))
                    if prim.r#type == primitive::Type::String as i32 => {}
                _ => ctx.error_at("marker map keys must be plain strings"),
            }
            if !matches!(
                map.value,
                Some(types::primitive_map::Value::PrimitiveValue(_))
            ) {
                ctx.error_at(MARKER_SHAPE_ERROR);
            }
        }
        // primitives are always fine; a missing type already errored
        Some(ResolvedType::Primitive(_)) | None => {}
    }

    info
}

/// Resolve every marker invocation in the file against its marker imports.
pub fn resolve_markers(ctx: &Context, file: &mut ast::File, source: &mut dyn PartialSource) {
    let mut prefixes = HashMap::new();
    if let Some(imports) = &file.imports {
        if let Some(markers) = &imports.markers {
            for (alias, import) in &markers.imports {
                prefixes.insert(alias.clone(), import.src.clone());
            }
        }
    }

    let mut resolver = MarkerResolver {
        source,
        prefixes,
        loaded: HashMap::new(),
        descriptors: HashMap::new(),
    };

    for gv in &mut file.group_versions {
        let gv_ctx = ctx
            .describe("group-version")
            .note("group", gv.group.clone())
            .note("version", gv.version.clone());
        resolver.visit_markers(&gv_ctx, &mut gv.markers);
        for decl in &mut gv.decls {
            resolver.visit_decl(&gv_ctx, decl);
        }
    }

    // marker declarations can themselves carry markers
    for set in &mut file.marker_decls {
        let set_ctx = ctx
            .describe("marker declaration set")
            .note("package", set.package.clone());
        for decl in &mut set.decls {
            let decl_ctx = set_ctx
                .describe("marker declaration")
                .note("name", decl.name.name.clone())
                .in_span(decl.span);
            resolver.visit_markers(&decl_ctx, &mut decl.markers);
            resolver.visit_fields(&decl_ctx, &mut decl.fields);
        }
    }
}

/// Pattern for a compiled marker message: enough descriptor to type-check
/// and encode an invocation without protobuf reflection.
struct CompiledMarker {
    /// Proto package of the owning marker set.
    package: String,
    /// Title-cased message name (`name` -> `Name`).
    message_name: String,
    fields: Vec<CompiledField>,
}

struct CompiledField {
    /// Parameter name as written in KDL (kebab-case).
    kdl_name: String,
    tag: u32,
    optional: bool,
    ty: irm::Type,
}

#[derive(PartialEq, Eq, Hash, Clone)]
struct MarkerIdent {
    prefix: String,
    name: String,
}

struct MarkerResolver<'s> {
    source: &'s mut dyn PartialSource,
    /// alias -> virtual path, from the file's marker imports.
    prefixes: HashMap<String, String>,
    /// Tracks load attempts so a bad prefix errors once, not per use.
    loaded: HashMap<String, bool>,
    descriptors: HashMap<MarkerIdent, CompiledMarker>,
}

impl<'s> MarkerResolver<'s> {
    fn visit_decl(&mut self, ctx: &Context, decl: &mut ast::Decl) {
        match decl {
            ast::Decl::Kind(kind) => {
                let ctx = ctx
                    .describe("kind")
                    .note("name", kind.name.name.clone())
                    .in_span(kind.span);
                self.visit_markers(&ctx, &mut kind.markers);
                self.visit_fields(&ctx, &mut kind.fields);
                for subtype in &mut kind.subtypes {
                    self.visit_subtype(&ctx, subtype);
                }
            }
            ast::Decl::Subtype(subtype) => self.visit_subtype(ctx, subtype),
        }
    }

    fn visit_subtype(&mut self, ctx: &Context, subtype: &mut ast::SubtypeDecl) {
        let ctx = ctx
            .describe("subtype")
            .note("name", subtype.name.name.clone())
            .in_span(subtype.span);
        self.visit_markers(&ctx, &mut subtype.markers);
        match &mut subtype.body {
            ast::SubtypeBody::Struct(body) => {
                self.visit_fields(&ctx, &mut body.fields);
                for nested in &mut body.subtypes {
                    self.visit_subtype(&ctx, nested);
                }
            }
            ast::SubtypeBody::Union(body) => {
                self.visit_fields(&ctx, &mut body.variants);
                for nested in &mut body.subtypes {
                    self.visit_subtype(&ctx, nested);
                }
            }
            ast::SubtypeBody::Enum(body) => {
                for variant in &mut body.variants {
                    let ctx = ctx
                        .describe("enum variant")
                        .note("name", variant.name.name.clone())
                        .in_span(variant.span);
                    self.visit_markers(&ctx, &mut variant.markers);
                }
            }
            ast::SubtypeBody::Newtype(_) => {}
        }
    }

    fn visit_fields(&mut self, ctx: &Context, fields: &mut [ast::Field]) {
        for field in fields {
            let ctx = ctx
                .describe("field")
                .note("name", field.name.name.clone())
                .in_span(field.span);
            self.visit_markers(&ctx, &mut field.markers);
        }
    }

    fn visit_markers(&mut self, ctx: &Context, markers: &mut [ast::AbstractMarker]) {
        for marker in markers {
            let ctx = ctx
                .describe("marker")
                .note("marker name", marker.name.name.clone())
                .in_span(marker.span);
            marker.resolved = self.marker_to_message(&ctx, marker);
        }
    }

    fn marker_to_message(
        &mut self,
        ctx: &Context,
        marker: &ast::AbstractMarker,
    ) -> Option<ResolvedMarker> {
        let (prefix, name) = match marker.name.name.split_once("::") {
            Some((prefix, name)) => (prefix.to_string(), name.to_string()),
            None => return resolve_builtin(ctx, marker),
        };

        self.ensure_loaded(ctx, &prefix);
        let ident = MarkerIdent {
            prefix,
            name,
        };
        let Some(descriptor) = self.descriptors.get(&ident) else {
            if *self.loaded.get(&ident.prefix).unwrap_or(&false) {
                ctx.error_at("unknown marker");
            }
            return None;
        };
        encode_invocation(ctx, descriptor, marker)
    }

    fn ensure_loaded(&mut self, ctx: &Context, prefix: &str) {
        if self.loaded.contains_key(prefix) {
            return;
        }
        let Some(src) = self.prefixes.get(prefix).cloned() else {
            ctx.error_at("unknown marker prefix (you might not've imported it)");
            // mark as attempted either way to avoid spamming errors
            self.loaded.insert(prefix.to_string(), false);
            return;
        };

        tracing::debug!(prefix, src = %src, "loading marker definitions");
        let partial = self.source.load(ctx, &src);
        for set in &partial.marker_sets {
            self.compile_set(ctx, prefix, set);
        }
        self.loaded.insert(prefix.to_string(), true);
    }

    fn compile_set(&mut self, ctx: &Context, prefix: &str, set: &ckdl_ir::MarkerSet) {
        for def in &set.markers {
            let ctx = ctx
                .describe("marker definition")
                .note("name", def.name.clone());
            let mut fields = Vec::with_capacity(def.fields.len());
            for field in &def.fields {
                let Some(ty) = field.r#type.clone() else {
                    ctx.note("field", field.name.clone())
                        .error_at("marker field has no usable type");
                    continue;
                };
                fields.push(CompiledField {
                    kdl_name: field.name.clone(),
                    tag: field.proto_tag,
                    optional: field.optional,
                    ty,
                });
            }
            self.descriptors.insert(
                MarkerIdent {
                    prefix: prefix.to_string(),
                    name: def.name.clone(),
                },
                CompiledMarker {
                    package: set.package.clone(),
                    message_name: title_case(&def.name),
                    fields,
                },
            );
        }
    }
}

/// Built-in (unprefixed) markers. `nonpersisted` flags a kind as not
/// stored (no ObjectMeta); it carries no payload.
fn resolve_builtin(ctx: &Context, marker: &ast::AbstractMarker) -> Option<ResolvedMarker> {
    match marker.name.name.as_str() {
        "nonpersisted" => {
            if marker
                .parameters
                .as_ref()
                .is_some_and(|params| !params.params.is_empty())
            {
                ctx.error_at("nonpersisted takes no parameters");
            }
            Some(ResolvedMarker {
                type_url: "type.googleapis.com/kdl.Nonpersisted".to_string(),
                payload: Vec::new(),
            })
        }
        _ => {
            ctx.error_at("unknown built-in marker");
            None
        }
    }
}

/// Kebab-case to TitleCase (`deprecated-field` -> `DeprecatedField`).
fn title_case(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// A coerced argument value, ready to encode.
enum DynValue {
    Str(String),
    I32(i32),
    I64(i64),
    Bool(bool),
    Repeated(Vec<DynValue>),
    Map(BTreeMap<String, DynValue>),
}

fn is_prim(ty: &irm::Type, prim: primitive::Type) -> bool {
    matches!(
        &ty.r#type,
        Some(irm::type_kind::Kind::Primitive(p)) if p.r#type == prim as i32
    )
}

/// Coerce one argument value against the declared field type.
fn value_to_dyn(ctx: &Context, value: &ast::Value, ty: &irm::Type) -> Option<DynValue> {
    match value {
        ast::Value::Str(s, span) => {
            if !is_prim(ty, primitive::Type::String) {
                ctx.error_at_span(*span, "mismatched marker parameter value, got a string");
                return None;
            }
            Some(DynValue::Str(s.clone()))
        }
        ast::Value::Num(n, span) => {
            if is_prim(ty, primitive::Type::Legacyint32) {
                match i32::try_from(*n) {
                    Ok(v) => Some(DynValue::I32(v)),
                    Err(_) => {
                        ctx.error_at_span(*span, "number out of range for int32");
                        None
                    }
                }
            } else if is_prim(ty, primitive::Type::Int64) {
                Some(DynValue::I64(*n))
            } else {
                ctx.error_at_span(*span, "mismatched marker parameter value, got a number");
                None
            }
        }
        ast::Value::Bool(b, span) => {
            if !is_prim(ty, primitive::Type::Bool) {
                ctx.error_at_span(*span, "mismatched marker parameter value, got a bool");
                return None;
            }
            Some(DynValue::Bool(*b))
        }
        ast::Value::List(items, span) => {
            let Some(irm::type_kind::Kind::List(list)) = &ty.r#type else {
                ctx.error_at_span(*span, "mismatched marker parameter value, got a list");
                return None;
            };
            let Some(item_ty) = list.items.as_deref() else {
                return None;
            };
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(coerced) = value_to_dyn(ctx, item, item_ty) {
                    out.push(coerced);
                }
            }
            Some(DynValue::Repeated(out))
        }
        ast::Value::Struct(kvs, span) => {
            let Some(irm::type_kind::Kind::Map(map)) = &ty.r#type else {
                ctx.error_at_span(*span, "mismatched marker parameter value, got a struct");
                return None;
            };
            let Some(value_ty) = map.values.as_deref() else {
                return None;
            };
            let mut out = BTreeMap::new();
            for kv in kvs {
                let Some(value) = &kv.value else { continue };
                if let Some(coerced) = value_to_dyn(ctx, value, value_ty) {
                    out.insert(kv.key.name.clone(), coerced);
                }
            }
            Some(DynValue::Map(out))
        }
        ast::Value::FieldPath(ident) => {
            ctx.error_at_span(ident.span, "field paths are not supported in marker parameters");
            None
        }
        ast::Value::RefType(_) | ast::Value::PrimitiveType(_) | ast::Value::CompoundType(_) => {
            ctx.error_at_span(value.span(), "type values are not supported in marker parameters");
            None
        }
    }
}

/// Encode one field value at `tag` into `buf` as proto wire bytes.
fn encode_dyn(buf: &mut Vec<u8>, tag: u32, ty: &irm::Type, value: &DynValue) {
    match value {
        DynValue::Str(s) => enc::string::encode(tag, s, buf),
        DynValue::I32(v) => enc::int32::encode(tag, v, buf),
        DynValue::I64(v) => enc::int64::encode(tag, v, buf),
        DynValue::Bool(b) => enc::bool::encode(tag, b, buf),
        DynValue::Repeated(items) => {
            let Some(irm::type_kind::Kind::List(list)) = &ty.r#type else {
                return;
            };
            let Some(item_ty) = list.items.as_deref() else {
                return;
            };
            for item in items {
                encode_dyn(buf, tag, item_ty, item);
            }
        }
        DynValue::Map(map) => {
            let Some(irm::type_kind::Kind::Map(map_ty)) = &ty.r#type else {
                return;
            };
            let Some(value_ty) = map_ty.values.as_deref() else {
                return;
            };
            // map entries are messages: key at 1, value at 2; BTreeMap
            // iteration keeps the encoding deterministic
            for (key, value) in map {
                let mut entry = Vec::new();
                enc::string::encode(1, key, &mut entry);
                encode_dyn(&mut entry, 2, value_ty, value);
                enc::encode_key(tag, enc::WireType::LengthDelimited, buf);
                enc::encode_varint(entry.len() as u64, buf);
                buf.extend_from_slice(&entry);
            }
        }
    }
}

/// Type-check an invocation's arguments against the descriptor and encode
/// the payload.
fn encode_invocation(
    ctx: &Context,
    descriptor: &CompiledMarker,
    marker: &ast::AbstractMarker,
) -> Option<ResolvedMarker> {
    let mut values: BTreeMap<u32, DynValue> = BTreeMap::new();
    let mut seen: Vec<&str> = Vec::new();

    if let Some(params) = &marker.parameters {
        for param in &params.params {
            let param_ctx = ctx
                .describe("marker parameter")
                .note("name", param.key.name.clone())
                .in_span(param.span);

            let Some(field) = descriptor
                .fields
                .iter()
                .find(|field| field.kdl_name == param.key.name)
            else {
                param_ctx.error_at("unknown parameter in marker");
                continue;
            };
            let Some(value) = &param.value else { continue };
            seen.push(&field.kdl_name);
            if let Some(coerced) = value_to_dyn(&param_ctx, value, &field.ty) {
                values.insert(field.tag, coerced);
            }
        }
    }

    for field in &descriptor.fields {
        if !field.optional && !seen.contains(&field.kdl_name.as_str()) {
            ctx.note("parameter", field.kdl_name.clone())
                .error_at("missing required marker parameter");
        }
    }

    let mut payload = Vec::new();
    for field in &descriptor.fields {
        if let Some(value) = values.get(&field.tag) {
            encode_dyn(&mut payload, field.tag, &field.ty, value);
        }
    }

    Some(ResolvedMarker {
        type_url: format!(
            "type.googleapis.com/{}.{}",
            descriptor.package, descriptor.message_name
        ),
        payload,
    })
}
