//! Lowering from the resolved AST to the CKDL IR, with source-map
//! recording.
//!
//! The [`Mapper`] threads a proto path (field numbers and repeated-element
//! indices) through the descent. It is a value type: `field`/`item` clone
//! the path, so sibling descents never share mutable state and the emitted
//! map order is deterministic. `record` appends one `(path, span)` entry to
//! the shared sink.
//!
//! Constraint placement happens here too: by the time a `validates` bag is
//! attached to a concrete lowered type, its family either matches or is
//! reported and dropped.

use crate::ast::{self, ValidationFamily};
use crate::foundation::Span;
use crate::trace::Context;
use ckdl_ir::tags;
use ckdl_ir::types::{self, primitive};
use ckdl_ir::{constraints, markers as irm};
use std::cell::RefCell;
use std::rc::Rc;

/// Source-map recorder positioned at one node of the output [`Partial`].
#[derive(Clone)]
pub struct Mapper {
    sink: Rc<RefCell<Vec<ckdl_ir::Location>>>,
    path: Vec<i32>,
}

impl Mapper {
    fn root() -> Mapper {
        Mapper {
            sink: Rc::new(RefCell::new(Vec::new())),
            path: Vec::new(),
        }
    }

    /// Descend into a message field by proto field number.
    pub fn field(&self, tag: i32) -> Mapper {
        let mut path = self.path.clone();
        path.push(tag);
        Mapper {
            sink: self.sink.clone(),
            path,
        }
    }

    /// Descend into a repeated element by index.
    pub fn item(&self, index: usize) -> Mapper {
        let mut path = self.path.clone();
        path.push(index as i32);
        Mapper {
            sink: self.sink.clone(),
            path,
        }
    }

    /// Record the current path as covering `span` in the source bytes.
    pub fn record(&self, span: Span) -> &Mapper {
        self.sink.borrow_mut().push(ckdl_ir::Location {
            path: self.path.clone(),
            span: vec![span.start as i32, span.end as i32],
        });
        self
    }

    fn take_map(&self) -> Vec<ckdl_ir::Location> {
        std::mem::take(&mut self.sink.borrow_mut())
    }
}

/// Lower a fully resolved file into a partial.
pub fn file_to_ir(ctx: &Context, file: &ast::File) -> ckdl_ir::Partial {
    let m = Mapper::root();
    let dependencies = imports_to_ir(&m.field(tags::partial::DEPENDENCIES), file.imports.as_ref());
    let group_versions = file
        .group_versions
        .iter()
        .enumerate()
        .map(|(i, gv)| {
            group_version_to_ir(ctx, &m.field(tags::partial::GROUP_VERSIONS).item(i), gv)
        })
        .collect();
    let marker_sets = file
        .marker_decls
        .iter()
        .enumerate()
        .map(|(i, set)| marker_set_to_ir(ctx, &m.field(tags::partial::MARKER_SETS).item(i), set))
        .collect();

    ckdl_ir::Partial {
        group_versions,
        dependencies,
        marker_sets,
        source_map: m.take_map(),
    }
}

fn imports_to_ir(m: &Mapper, imports: Option<&ast::Imports>) -> Vec<ckdl_ir::Dependency> {
    let Some(types) = imports.and_then(|imports| imports.types.as_ref()) else {
        return Vec::new();
    };
    m.record(types.span);

    types
        .imports
        .values()
        .enumerate()
        .map(|(i, import)| {
            m.item(i).record(import.span);
            ckdl_ir::Dependency {
                group_version: Some((&import.group_version).into()),
                from: import.src.clone(),
            }
        })
        .collect()
}

fn docs_to_ir(ctx: &Context, m: &Mapper, docs: &ast::Docs) -> Option<types::Documentation> {
    if docs.is_empty() {
        return None;
    }
    m.record(docs.span);

    let ctx = ctx.describe("documentation").in_span(docs.span);
    let mut res = types::Documentation::default();
    for section in &docs.sections {
        let section_ctx = ctx
            .describe("doc section")
            .note("name", section.title.clone())
            .in_span(section.span);
        match section.title.to_lowercase().as_str() {
            "" | "description" => {
                m.field(tags::documentation::DESCRIPTION).record(section.span);
                res.description = section.lines.join("\n");
            }
            "example" => {
                m.field(tags::documentation::EXAMPLE).record(section.span);
                res.example = section.lines.join("\n");
            }
            "external ref" => {
                m.field(tags::documentation::EXTERNAL_REF).record(section.span);
                res.external_ref = section.lines.join("\n");
            }
            _ => {
                section_ctx
                    .error_at("unknown documentation section, expected `example` or `external ref`");
            }
        }
    }
    Some(res)
}

fn markers_to_ir(
    ctx: &Context,
    m: &Mapper,
    markers: &[ast::AbstractMarker],
) -> Vec<prost_types::Any> {
    let mut res = Vec::with_capacity(markers.len());
    for (i, marker) in markers.iter().enumerate() {
        m.item(i).record(marker.span);
        match &marker.resolved {
            Some(resolved) => res.push(prost_types::Any {
                type_url: resolved.type_url.clone(),
                value: resolved.payload.clone(),
            }),
            None => {
                ctx.describe("marker")
                    .note("marker name", marker.name.name.clone())
                    .error_at_span(marker.span, "unable to store unresolved marker");
            }
        }
    }
    res
}

fn group_version_to_ir(ctx: &Context, m: &Mapper, gv: &ast::GroupVersion) -> ckdl_ir::GroupVersion {
    m.record(gv.span);
    let ctx = ctx
        .describe("group-version")
        .note("group", gv.group.clone())
        .note("version", gv.version.clone())
        .in_span(gv.span);

    let desc_m = m.field(tags::group_version::DESCRIPTION);
    let mut res = ckdl_ir::GroupVersion {
        description: Some(ckdl_ir::groupver::GroupVersion {
            group: gv.group.clone(),
            version: gv.version.clone(),
            docs: docs_to_ir(&ctx, &desc_m.field(tags::group_version_desc::DOCS), &gv.docs),
            attributes: markers_to_ir(
                &ctx,
                &desc_m.field(tags::group_version_desc::ATTRIBUTES),
                &gv.markers,
            ),
        }),
        kinds: Vec::new(),
        types: Vec::new(),
    };

    let kinds_m = m.field(tags::group_version::KINDS);
    let types_m = m.field(tags::group_version::TYPES);
    for decl in &gv.decls {
        match decl {
            ast::Decl::Kind(kind) => {
                let kind_ir =
                    kind_to_ir(&ctx, &kinds_m.item(res.kinds.len()), &types_m, &mut res, kind);
                res.kinds.push(kind_ir);
            }
            ast::Decl::Subtype(subtype) => {
                // subtypes append themselves so nested declarations land
                // at the right repeated index
                subtype_to_ir(&ctx, &types_m, &mut res, subtype);
            }
        }
    }

    res
}

fn kind_to_ir(
    ctx: &Context,
    m: &Mapper,
    types_m: &Mapper,
    gv: &mut ckdl_ir::GroupVersion,
    kind: &ast::KindDecl,
) -> types::Kind {
    let ctx = ctx
        .describe("kind")
        .note("name", kind.name.name.clone())
        .in_span(kind.span);
    m.record(kind.span);

    let nonpersisted = kind
        .markers
        .iter()
        .any(|marker| marker.name.name == "nonpersisted");

    let mut res = types::Kind {
        name: kind.name.name.clone(),
        object: !nonpersisted,
        fields: Vec::new(),
        docs: docs_to_ir(&ctx, &m.field(tags::kind::DOCS), &kind.docs),
        attributes: markers_to_ir(&ctx, &m.field(tags::kind::ATTRIBUTES), &kind.markers),
    };

    let fields_m = m.field(tags::kind::FIELDS);
    for (i, field) in kind.fields.iter().enumerate() {
        res.fields
            .push(field_to_ir(&ctx, &fields_m.item(i), field, (i + 1) as u32));
    }
    for subtype in &kind.subtypes {
        subtype_to_ir(&ctx, types_m, gv, subtype);
    }
    res
}

fn subtype_to_ir(
    ctx: &Context,
    types_m: &Mapper,
    gv: &mut ckdl_ir::GroupVersion,
    subtype: &ast::SubtypeDecl,
) {
    let full_name = subtype
        .resolved_name
        .as_ref()
        .map(|resolved| resolved.full_name.clone())
        .unwrap_or_else(|| subtype.name.name.clone());
    let ctx = ctx
        .describe("subtype")
        .note("name", full_name.clone())
        .in_span(subtype.span);

    let index = gv.types.len();
    let m = types_m.item(index);
    m.record(subtype.span);

    // reserve our slot before descending: nested subtypes append after us
    gv.types.push(types::Subtype {
        name: full_name,
        docs: docs_to_ir(&ctx, &m.field(tags::subtype::DOCS), &subtype.docs),
        attributes: markers_to_ir(&ctx, &m.field(tags::subtype::ATTRIBUTES), &subtype.markers),
        r#type: None,
    });

    let body = match &subtype.body {
        ast::SubtypeBody::Struct(body) => {
            let struct_m = m.field(tags::subtype::STRUCT);
            struct_m.record(body.span);
            let mut fields = Vec::with_capacity(body.fields.len());
            let fields_m = struct_m.field(tags::structure::FIELDS);
            for (i, field) in body.fields.iter().enumerate() {
                fields.push(field_to_ir(&ctx, &fields_m.item(i), field, (i + 1) as u32));
            }
            for nested in &body.subtypes {
                subtype_to_ir(&ctx, types_m, gv, nested);
            }
            types::subtype::Type::Struct(types::Struct { fields })
        }
        ast::SubtypeBody::Union(body) => {
            let union_m = m.field(tags::subtype::UNION);
            union_m.record(body.span);
            let mut variants = Vec::with_capacity(body.variants.len());
            let variants_m = union_m.field(tags::union::VARIANTS);
            for (i, variant) in body.variants.iter().enumerate() {
                variants.push(field_to_ir(&ctx, &variants_m.item(i), variant, (i + 1) as u32));
            }
            for nested in &body.subtypes {
                subtype_to_ir(&ctx, types_m, gv, nested);
            }
            types::subtype::Type::Union(types::Union {
                variants,
                tag: if body.untagged {
                    String::new()
                } else {
                    body.tag.clone()
                },
                untagged: body.untagged,
            })
        }
        ast::SubtypeBody::Enum(body) => {
            let enum_m = m.field(tags::subtype::ENUM);
            enum_m.record(body.span);
            let variants_m = enum_m.field(tags::enumeration::VARIANTS);
            let variants = body
                .variants
                .iter()
                .enumerate()
                .map(|(i, variant)| {
                    let ctx = ctx
                        .describe("enum variant")
                        .note("name", variant.name.name.clone())
                        .in_span(variant.span);
                    let var_m = variants_m.item(i);
                    var_m.record(variant.span);
                    types::enumeration::Variant {
                        name: variant.name.name.clone(),
                        docs: docs_to_ir(&ctx, &var_m.field(tags::enum_variant::DOCS), &variant.docs),
                        attributes: markers_to_ir(
                            &ctx,
                            &var_m.field(tags::enum_variant::ATTRIBUTES),
                            &variant.markers,
                        ),
                    }
                })
                .collect();
            types::subtype::Type::Enum(types::Enum { variants })
        }
        ast::SubtypeBody::Newtype(body) => newtype_to_ir(&ctx, &m, body),
    };

    gv.types[index].r#type = Some(body);
}

fn newtype_to_ir(ctx: &Context, m: &Mapper, body: &ast::NewtypeBody) -> types::subtype::Type {
    let Some(info) = &body.resolved_type else {
        ctx.error_at_span(body.span, "internal: newtype was never resolved");
        return types::subtype::Type::PrimitiveAlias(types::Primitive::default());
    };
    let validates_ctx = match info.validates_span {
        Some(span) => ctx.in_span(span),
        None => ctx.clone(),
    };

    match &info.r#type {
        Some(ast::ResolvedType::Primitive(prim_ty)) => {
            m.field(tags::subtype::PRIMITIVE_ALIAS).record(body.span);
            let mut prim = types::Primitive {
                r#type: *prim_ty as i32,
                specific_constraints: None,
            };
            prim_constraints(&validates_ctx, &mut prim, info.validates.as_ref());
            types::subtype::Type::PrimitiveAlias(prim)
        }
        Some(ast::ResolvedType::Reference(reference)) => {
            m.field(tags::subtype::REFERENCE_ALIAS).record(body.span);
            let mut reference = reference.clone();
            ref_constraints(&validates_ctx, &mut reference, info.validates.as_ref());
            types::subtype::Type::ReferenceAlias(reference)
        }
        Some(ast::ResolvedType::List(list)) => {
            m.field(tags::subtype::LIST).record(body.span);
            let mut list = list.clone();
            only_constrain(&validates_ctx, info.validates.as_ref(), ValidationFamily::List);
            list.list_constraints = info.validates.as_ref().and_then(|v| v.list.clone());
            types::subtype::Type::List(list)
        }
        Some(ast::ResolvedType::Set(set)) => {
            m.field(tags::subtype::SET).record(body.span);
            let mut set = set.clone();
            only_constrain(&validates_ctx, info.validates.as_ref(), ValidationFamily::List);
            set.list_constraints = info.validates.as_ref().and_then(|v| v.list.clone());
            types::subtype::Type::Set(set)
        }
        Some(ast::ResolvedType::ListMap(list_map)) => {
            let lm_m = m.field(tags::subtype::LIST_MAP);
            lm_m.record(body.span);
            if let Some(keys_span) = info.keys_span {
                lm_m.field(tags::list_map::KEY_FIELD).record(keys_span);
            }
            let mut list_map = list_map.clone();
            only_constrain(&validates_ctx, info.validates.as_ref(), ValidationFamily::List);
            list_map.list_constraints = info.validates.as_ref().and_then(|v| v.list.clone());
            types::subtype::Type::ListMap(list_map)
        }
        Some(ast::ResolvedType::PrimitiveMap(map)) => {
            m.field(tags::subtype::PRIMITIVE_MAP).record(body.span);
            let mut map = map.clone();
            only_constrain(
                &validates_ctx,
                info.validates.as_ref(),
                ValidationFamily::Objectish,
            );
            map.object_constraints = info.validates.as_ref().and_then(|v| v.objectish.clone());
            types::subtype::Type::PrimitiveMap(map)
        }
        None => {
            // the modifier list was in error; emit a harmless placeholder
            types::subtype::Type::PrimitiveAlias(types::Primitive::default())
        }
    }
}

fn field_to_ir(ctx: &Context, m: &Mapper, field: &ast::Field, proto_tag: u32) -> types::Field {
    let ctx = ctx
        .describe("field")
        .note("name", field.name.name.clone())
        .in_span(field.span);
    m.record(field.span);

    let mut res = types::Field {
        name: field.name.name.clone(),
        embedded: field.embedded,
        proto_tag,
        docs: docs_to_ir(&ctx, &m.field(tags::field::DOCS), &field.docs),
        attributes: markers_to_ir(&ctx, &m.field(tags::field::ATTRIBUTES), &field.markers),
        ..Default::default()
    };

    let Some(info) = &field.resolved_type else {
        ctx.error_at("internal: field type was never resolved");
        return res;
    };
    res.optional = info.optional;

    if let Some(default) = &info.default {
        res.default = value_to_ir(&ctx, default);
    }

    let type_span = info.type_span.unwrap_or(field.span);
    let validates_ctx = match info.validates_span {
        Some(span) => ctx.in_span(span),
        None => ctx.clone(),
    };

    match &info.r#type {
        Some(ast::ResolvedType::Primitive(prim_ty)) => {
            m.field(tags::field::PRIMITIVE).record(type_span);
            let mut prim = types::Primitive {
                r#type: *prim_ty as i32,
                specific_constraints: None,
            };
            prim_constraints(&validates_ctx, &mut prim, info.validates.as_ref());
            res.r#type = Some(types::field::Type::Primitive(prim));
        }
        Some(ast::ResolvedType::Reference(reference)) => {
            m.field(tags::field::NAMED_TYPE).record(type_span);
            let mut reference = reference.clone();
            ref_constraints(&validates_ctx, &mut reference, info.validates.as_ref());
            res.r#type = Some(types::field::Type::NamedType(reference));
        }
        Some(ast::ResolvedType::List(list)) => {
            m.field(tags::field::LIST).record(type_span);
            let mut list = list.clone();
            only_constrain(&validates_ctx, info.validates.as_ref(), ValidationFamily::List);
            list.list_constraints = info.validates.as_ref().and_then(|v| v.list.clone());
            res.r#type = Some(types::field::Type::List(list));
        }
        Some(ast::ResolvedType::Set(set)) => {
            m.field(tags::field::SET).record(type_span);
            let mut set = set.clone();
            only_constrain(&validates_ctx, info.validates.as_ref(), ValidationFamily::List);
            set.list_constraints = info.validates.as_ref().and_then(|v| v.list.clone());
            res.r#type = Some(types::field::Type::Set(set));
        }
        Some(ast::ResolvedType::ListMap(list_map)) => {
            let lm_m = m.field(tags::field::LIST_MAP);
            lm_m.record(type_span);
            if let Some(keys_span) = info.keys_span {
                lm_m.field(tags::list_map::KEY_FIELD).record(keys_span);
            }
            let mut list_map = list_map.clone();
            only_constrain(&validates_ctx, info.validates.as_ref(), ValidationFamily::List);
            list_map.list_constraints = info.validates.as_ref().and_then(|v| v.list.clone());
            res.r#type = Some(types::field::Type::ListMap(list_map));
        }
        Some(ast::ResolvedType::PrimitiveMap(map)) => {
            m.field(tags::field::PRIMITIVE_MAP).record(type_span);
            let mut map = map.clone();
            only_constrain(
                &validates_ctx,
                info.validates.as_ref(),
                ValidationFamily::Objectish,
            );
            map.object_constraints = info.validates.as_ref().and_then(|v| v.objectish.clone());
            res.r#type = Some(types::field::Type::PrimitiveMap(map));
        }
        None => {
            // the modifier list was in error and it is already reported;
            // emit the field without a type so later stages can continue
        }
    }

    res
}

/// Report validation families that do not fit the lowered type and leave
/// only the allowed one to be attached by the caller.
fn only_constrain(ctx: &Context, validates: Option<&ast::ValidatesInfo>, allowed: ValidationFamily) {
    let Some(validates) = validates else { return };

    let complaint = match allowed {
        ValidationFamily::Numeric => "can only have numeric validation for this type",
        ValidationFamily::String => "can only have string validation for this type",
        ValidationFamily::List => "can only have list validation for this type",
        ValidationFamily::Objectish => "can only have object-ish validation for this type",
        ValidationFamily::None => "cannot have any validation for this type",
    };

    if allowed != ValidationFamily::Numeric && validates.number.is_some() {
        ctx.note("validation", "numeric").error_at(complaint);
    }
    if allowed != ValidationFamily::String && validates.string.is_some() {
        ctx.note("validation", "string").error_at(complaint);
    }
    if allowed != ValidationFamily::List && validates.list.is_some() {
        ctx.note("validation", "list").error_at(complaint);
    }
    if allowed != ValidationFamily::Objectish && validates.objectish.is_some() {
        ctx.note("validation", "object-ish").error_at(complaint);
    }
}

fn prim_constraints(
    ctx: &Context,
    prim: &mut types::Primitive,
    validates: Option<&ast::ValidatesInfo>,
) {
    let Some(info) = validates else { return };
    let ty = primitive::Type::try_from(prim.r#type).unwrap_or(primitive::Type::String);

    match ty {
        primitive::Type::Legacyint32 | primitive::Type::Int64 | primitive::Type::Legacyfloat64 => {
            only_constrain(ctx, validates, ValidationFamily::Numeric);
            prim.specific_constraints = info
                .number
                .clone()
                .map(types::primitive::SpecificConstraints::NumericConstraints);
        }
        primitive::Type::String | primitive::Type::Bytes => {
            only_constrain(ctx, validates, ValidationFamily::String);
            prim.specific_constraints = info
                .string
                .clone()
                .map(types::primitive::SpecificConstraints::StringConstraints);
        }
        // these serialize as strings, so string constraints are the ones
        // that make sense until upstream grows numeric validation for them
        primitive::Type::Time | primitive::Type::Duration | primitive::Type::Quantity => {
            only_constrain(ctx, validates, ValidationFamily::String);
            prim.specific_constraints = info
                .string
                .clone()
                .map(types::primitive::SpecificConstraints::StringConstraints);
        }
        primitive::Type::Bool | primitive::Type::Intorstring => {
            only_constrain(ctx, validates, ValidationFamily::None);
        }
    }
}

fn ref_constraints(
    ctx: &Context,
    reference: &mut types::Reference,
    validates: Option<&ast::ValidatesInfo>,
) {
    let Some(info) = validates else { return };

    let families = [
        info.number.is_some(),
        info.string.is_some(),
        info.list.is_some(),
        info.objectish.is_some(),
    ];
    if families.iter().filter(|present| **present).count() > 1 {
        ctx.error_at(
            "only one \"type\" of validation may be specified at once. For instance, if you use numeric validation, you may not also use string validation.",
        );
    }

    if let Some(number) = &info.number {
        reference.constraints = Some(constraints::Any {
            r#type: Some(constraints::any::Type::Num(number.clone())),
        });
    }
    if let Some(string) = &info.string {
        reference.constraints = Some(constraints::Any {
            r#type: Some(constraints::any::Type::Str(string.clone())),
        });
    }
    if let Some(list) = &info.list {
        reference.constraints = Some(constraints::Any {
            r#type: Some(constraints::any::Type::List(list.clone())),
        });
    }
    if let Some(objectish) = &info.objectish {
        reference.constraints = Some(constraints::Any {
            r#type: Some(constraints::any::Type::Obj(objectish.clone())),
        });
    }
}

fn value_to_ir(ctx: &Context, value: &ast::Value) -> Option<prost_types::Value> {
    use prost_types::value::Kind;

    let kind = match value {
        ast::Value::Str(s, _) => Kind::StringValue(s.clone()),
        ast::Value::Num(n, _) => Kind::NumberValue(*n as f64),
        ast::Value::Bool(b, _) => Kind::BoolValue(*b),
        ast::Value::List(items, _) => Kind::ListValue(prost_types::ListValue {
            values: items
                .iter()
                .filter_map(|item| value_to_ir(ctx, item))
                .collect(),
        }),
        ast::Value::Struct(kvs, _) => {
            let mut fields = std::collections::BTreeMap::new();
            for kv in kvs {
                let Some(value) = &kv.value else { continue };
                if let Some(lowered) = value_to_ir(ctx, value) {
                    fields.insert(kv.key.name.clone(), lowered);
                }
            }
            Kind::StructValue(prost_types::Struct { fields })
        }
        // serialized as its field name
        ast::Value::FieldPath(ident) => Kind::StringValue(ident.name.clone()),
        ast::Value::RefType(ref_mod) => {
            if ref_mod.group_version.is_none() {
                // probably an enum variant; type-checked against the
                // terminal later
                Kind::StringValue(ref_mod.name.name.clone())
            } else {
                ctx.error_at_span(ref_mod.span, "cannot serialize type values");
                return None;
            }
        }
        ast::Value::PrimitiveType(ident) => {
            ctx.error_at_span(ident.span, "cannot serialize type values");
            return None;
        }
        ast::Value::CompoundType(compound) => {
            ctx.error_at_span(compound.span, "cannot serialize type values");
            return None;
        }
    };
    Some(prost_types::Value { kind: Some(kind) })
}

// === marker declaration sets ===

fn marker_set_to_ir(ctx: &Context, m: &Mapper, set: &ast::MarkerDeclSet) -> ckdl_ir::MarkerSet {
    m.record(set.span);
    let ctx = ctx
        .describe("marker declaration set")
        .note("package", set.package.clone())
        .in_span(set.span);

    let decls_m = m.field(tags::marker_set::MARKERS);
    ckdl_ir::MarkerSet {
        package: set.package.clone(),
        markers: set
            .decls
            .iter()
            .enumerate()
            .map(|(i, decl)| marker_def_to_ir(&ctx, &decls_m.item(i), decl))
            .collect(),
    }
}

fn marker_def_to_ir(ctx: &Context, m: &Mapper, decl: &ast::MarkerDecl) -> irm::MarkerDef {
    m.record(decl.span);
    let ctx = ctx
        .describe("marker declaration")
        .note("name", decl.name.name.clone())
        .in_span(decl.span);

    let fields_m = m.field(tags::marker_def::FIELDS);
    irm::MarkerDef {
        name: decl.name.name.clone(),
        fields: decl
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| marker_field_to_ir(&ctx, &fields_m.item(i), field, (i + 1) as u32))
            .collect(),
        docs: docs_to_ir(&ctx, &m.field(tags::marker_def::DOCS), &decl.docs),
        attributes: markers_to_ir(&ctx, &m.field(tags::marker_def::ATTRIBUTES), &decl.markers),
    }
}

fn marker_field_to_ir(
    ctx: &Context,
    m: &Mapper,
    field: &ast::Field,
    proto_tag: u32,
) -> irm::MarkerField {
    let ctx = ctx
        .describe("field")
        .note("name", field.name.name.clone())
        .in_span(field.span);
    m.record(field.span);

    let mut res = irm::MarkerField {
        name: field.name.name.clone(),
        proto_tag,
        docs: docs_to_ir(&ctx, &m.field(tags::marker_field::DOCS), &field.docs),
        ..Default::default()
    };

    let Some(info) = &field.resolved_type else {
        ctx.error_at("internal: marker field type was never resolved");
        return res;
    };
    res.optional = info.optional;
    if let Some(default) = &info.default {
        res.default = value_to_ir(&ctx, default);
    }

    let type_m = m.field(tags::marker_field::TYPE);
    let type_span = info.type_span.unwrap_or(field.span);
    let validates_ctx = match info.validates_span {
        Some(span) => ctx.in_span(span),
        None => ctx.clone(),
    };

    res.r#type = match &info.r#type {
        Some(ast::ResolvedType::Primitive(prim_ty)) => {
            type_m.field(tags::marker_type::PRIMITIVE).record(type_span);
            let mut prim = types::Primitive {
                r#type: *prim_ty as i32,
                specific_constraints: None,
            };
            prim_constraints(&validates_ctx, &mut prim, info.validates.as_ref());
            Some(irm::Type {
                r#type: Some(irm::type_kind::Kind::Primitive(prim)),
            })
        }
        Some(ast::ResolvedType::List(list)) => {
            type_m.field(tags::marker_type::LIST).record(type_span);
            only_constrain(&validates_ctx, info.validates.as_ref(), ValidationFamily::List);
            let items = match &list.items {
                Some(types::list::Items::Primitive(prim)) => Some(Box::new(irm::Type {
                    r#type: Some(irm::type_kind::Kind::Primitive(prim.clone())),
                })),
                // the shape check rejected everything else already
                _ => None,
            };
            Some(irm::Type {
                r#type: Some(irm::type_kind::Kind::List(Box::new(irm::List {
                    items,
                    list_constraints: info.validates.as_ref().and_then(|v| v.list.clone()),
                }))),
            })
        }
        Some(ast::ResolvedType::PrimitiveMap(map)) => {
            type_m.field(tags::marker_type::MAP).record(type_span);
            only_constrain(
                &validates_ctx,
                info.validates.as_ref(),
                ValidationFamily::Objectish,
            );
            let values = match &map.value {
                Some(types::primitive_map::Value::PrimitiveValue(prim)) => {
                    Some(Box::new(irm::Type {
                        r#type: Some(irm::type_kind::Kind::Primitive(prim.clone())),
                    }))
                }
                _ => None,
            };
            Some(irm::Type {
                r#type: Some(irm::type_kind::Kind::Map(Box::new(irm::Map { values }))),
            })
        }
        // the marker shape check already rejected these; nothing usable
        // remains to lower
        _ => None,
    };

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;
    use crate::parser;
    use crate::resolve;
    use crate::trace::Diagnostics;

    fn lower_file(source: &str) -> (ckdl_ir::Partial, Diagnostics) {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        let tokens = lexer::lex(&ctx, 0, source);
        let mut file = parser::parse_file(&ctx, 0, &tokens);
        resolve::resolve_nested(&ctx, &mut file);
        resolve::prep_marker_decls(&ctx, &mut file);
        let partial = file_to_ir(&ctx, &file);
        (partial, sink)
    }

    const NESTED_POD: &str = r#"
        group-version(group: "core", version: "v1") {
            kind Pod {
                spec: Spec,
                struct Spec {
                    nodeName: optional string,
                }
            }
        }
    "#;

    #[test]
    fn test_nested_types_auto_qualify_in_ir() {
        let (partial, sink) = lower_file(NESTED_POD);
        assert!(!sink.had_error());

        let gv = &partial.group_versions[0];
        assert_eq!(gv.kinds.len(), 1);
        let kind = &gv.kinds[0];
        assert_eq!(kind.name, "Pod");
        assert!(kind.object);

        let spec_field = &kind.fields[0];
        assert_eq!(spec_field.name, "spec");
        assert_eq!(spec_field.proto_tag, 1);
        let Some(types::field::Type::NamedType(reference)) = &spec_field.r#type else {
            panic!("expected a named type");
        };
        assert_eq!(reference.name, "Pod::Spec");
        assert_eq!(reference.group_version.as_ref().unwrap().group, "core");
        assert_eq!(reference.group_version.as_ref().unwrap().version, "v1");

        assert_eq!(gv.types.len(), 1);
        let subtype = &gv.types[0];
        assert_eq!(subtype.name, "Pod::Spec");
        let Some(types::subtype::Type::Struct(body)) = &subtype.r#type else {
            panic!("expected a struct subtype");
        };
        assert_eq!(body.fields[0].name, "nodeName");
        assert!(body.fields[0].optional);
        assert!(matches!(
            &body.fields[0].r#type,
            Some(types::field::Type::Primitive(p))
                if p.r#type == primitive::Type::String as i32
        ));
    }

    #[test]
    fn test_source_map_covers_nodes() {
        let (partial, _) = lower_file(NESTED_POD);
        assert!(!partial.source_map.is_empty());
        let source_len = NESTED_POD.len() as i32;
        for location in &partial.source_map {
            assert_eq!(location.span.len(), 2);
            assert!(location.span[0] <= location.span[1]);
            assert!(location.span[1] <= source_len);
        }
        // at least the kind, its field, the subtype, and its field
        assert!(partial.source_map.len() >= 4);
    }

    #[test]
    fn test_ir_is_deterministic() {
        use prost::Message;
        let (a, _) = lower_file(NESTED_POD);
        let (b, _) = lower_file(NESTED_POD);
        assert_eq!(a.encode_to_vec(), b.encode_to_vec());
    }

    #[test]
    fn test_validator_mismatch_reports_and_drops() {
        let (partial, sink) = lower_file(
            r#"
            group-version(group: "core", version: "v1") {
                struct S {
                    value: int32 validates(min-length: 2),
                }
            }
            "#,
        );
        assert!(sink.had_error());
        let diags = sink.snapshot();
        let matching: Vec<_> = diags
            .iter()
            .filter(|d| d.message.contains("only have numeric validation"))
            .collect();
        assert_eq!(matching.len(), 1);

        // the primitive and field still appear, minus the bad constraint
        let Some(types::subtype::Type::Struct(body)) = &partial.group_versions[0].types[0].r#type
        else {
            panic!("expected struct");
        };
        let Some(types::field::Type::Primitive(prim)) = &body.fields[0].r#type else {
            panic!("expected primitive");
        };
        assert_eq!(prim.r#type, primitive::Type::Legacyint32 as i32);
        assert!(prim.specific_constraints.is_none());
    }

    #[test]
    fn test_docs_sections_lower_separately() {
        let (partial, sink) = lower_file(
            r#"
            group-version(group: "core", version: "v1") {
                /// A pod.
                /// # Example
                /// some example
                /// # External Ref
                /// https://example.com/pod
                kind Pod { spec: string, }
            }
            "#,
        );
        assert!(!sink.had_error());
        let docs = partial.group_versions[0].kinds[0].docs.as_ref().unwrap();
        assert_eq!(docs.description, "A pod.");
        assert_eq!(docs.example, "some example");
        assert_eq!(docs.external_ref, "https://example.com/pod");
    }

    #[test]
    fn test_unknown_doc_section_errors() {
        let (_, sink) = lower_file(
            r#"
            group-version(group: "core", version: "v1") {
                /// # Wild Section
                /// body
                kind Pod { spec: string, }
            }
            "#,
        );
        assert!(sink.had_error());
    }

    #[test]
    fn test_dependencies_from_imports() {
        let (partial, _) = lower_file(
            r#"
            import types ( {other/v1} from "other.kdl"; )
            group-version(group: "core", version: "v1") {
                kind Pod { spec: other/v1::Spec, }
            }
            "#,
        );
        assert_eq!(partial.dependencies.len(), 1);
        let dep = &partial.dependencies[0];
        assert_eq!(dep.from, "other.kdl");
        assert_eq!(dep.group_version.as_ref().unwrap().group, "other");
    }

    #[test]
    fn test_union_lowering() {
        let (partial, sink) = lower_file(
            r#"
            group-version(group: "core", version: "v1") {
                union(tag: "type") Source {
                    hostPath: HostPath,
                    struct HostPath { path: string, }
                }
            }
            "#,
        );
        assert!(!sink.had_error());
        let Some(types::subtype::Type::Union(union)) = &partial.group_versions[0].types[0].r#type
        else {
            panic!("expected union");
        };
        assert_eq!(union.tag, "type");
        assert!(!union.untagged);
        assert_eq!(union.variants[0].name, "hostPath");
        // the nested struct landed as its own subtype
        assert_eq!(partial.group_versions[0].types[1].name, "Source::HostPath");
    }

    #[test]
    fn test_untagged_union_has_no_tag() {
        let (partial, sink) = lower_file(
            r#"
            group-version(group: "core", version: "v1") {
                union(untagged: true) RawValue {
                    asInt: int64,
                    asString: string,
                }
            }
            "#,
        );
        assert!(!sink.had_error());
        let Some(types::subtype::Type::Union(union)) = &partial.group_versions[0].types[0].r#type
        else {
            panic!("expected union");
        };
        assert!(union.untagged);
        assert_eq!(union.tag, "");
    }

    #[test]
    fn test_newtype_with_constraints() {
        let (partial, sink) = lower_file(
            r#"
            group-version(group: "core", version: "v1") {
                newtype Port: int32 validates(min: 1, max: 65535);
            }
            "#,
        );
        assert!(!sink.had_error());
        let Some(types::subtype::Type::PrimitiveAlias(prim)) =
            &partial.group_versions[0].types[0].r#type
        else {
            panic!("expected primitive alias");
        };
        let Some(types::primitive::SpecificConstraints::NumericConstraints(numeric)) =
            &prim.specific_constraints
        else {
            panic!("expected numeric constraints");
        };
        assert_eq!(numeric.minimum, 1);
        assert_eq!(numeric.maximum, 65535);
    }

    #[test]
    fn test_marker_set_lowering() {
        let (partial, sink) = lower_file(
            r#"
            markers(package: "kgo") {
                marker name {
                    as: string,
                    aliases: optional list(value: string),
                }
            }
            "#,
        );
        assert!(!sink.had_error());
        let set = &partial.marker_sets[0];
        assert_eq!(set.package, "kgo");
        let def = &set.markers[0];
        assert_eq!(def.name, "name");
        assert_eq!(def.fields[0].name, "as");
        assert_eq!(def.fields[0].proto_tag, 1);
        assert!(!def.fields[0].optional);
        assert!(def.fields[1].optional);
        assert_eq!(def.fields[1].proto_tag, 2);
        assert!(matches!(
            def.fields[1].r#type.as_ref().unwrap().r#type,
            Some(irm::type_kind::Kind::List(_))
        ));
    }

    #[test]
    fn test_enum_default_matches_variant_shape() {
        let (partial, sink) = lower_file(
            r#"
            group-version(group: "core", version: "v1") {
                enum Protocol { TCP, UDP, }
                struct S {
                    protocol: optional(default: TCP) Protocol,
                }
            }
            "#,
        );
        assert!(!sink.had_error());
        let Some(types::subtype::Type::Struct(body)) = &partial.group_versions[0].types[1].r#type
        else {
            panic!("expected struct");
        };
        let default = body.fields[0].default.as_ref().unwrap();
        assert!(matches!(
            &default.kind,
            Some(prost_types::value::Kind::StringValue(s)) if s == "TCP"
        ));
    }
}
