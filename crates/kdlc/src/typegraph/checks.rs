//! The closed set of cross-file checks.
//!
//! All of these run over the *IR* rather than the AST, so pre-compiled
//! partials supplied by the loader get exactly the same scrutiny as
//! freshly compiled source. Spans come from each partial's source map
//! (when the partial was compiled this run); a check walks its IR path and
//! looks up the nearest recorded location.

use super::{name_from_ref, Graph, Node, Terminal};
use crate::ast::ValidationFamily;
use crate::trace::Context;
use ckdl_ir::types::{self, primitive};
use ckdl_ir::{constraints, tags};

/// Run every check against every node in the graph.
pub fn check_all(ctx: &Context, graph: &Graph) {
    for node in graph.nodes() {
        let file_ctx = ctx.describe("file").note("path", node.path.clone());
        for (gv_index, ir_gv) in node.partial.group_versions.iter().enumerate() {
            let gv_path = [tags::partial::GROUP_VERSIONS, gv_index as i32];
            let gv_ctx = match &ir_gv.description {
                Some(desc) => file_ctx
                    .describe("group-version")
                    .note("group", desc.group.clone())
                    .note("version", desc.version.clone()),
                None => file_ctx.describe("group-version"),
            };

            for (kind_index, kind) in ir_gv.kinds.iter().enumerate() {
                let kind_path = path(&gv_path, &[tags::group_version::KINDS, kind_index as i32]);
                let kind_ctx = gv_ctx.describe("kind").note("name", kind.name.clone());
                for (field_index, field) in kind.fields.iter().enumerate() {
                    let field_path = path(&kind_path, &[tags::kind::FIELDS, field_index as i32]);
                    check_field(&kind_ctx, graph, node, field, &field_path);
                }
            }

            for (type_index, subtype) in ir_gv.types.iter().enumerate() {
                let subtype_path =
                    path(&gv_path, &[tags::group_version::TYPES, type_index as i32]);
                check_subtype(&gv_ctx, graph, node, subtype, &subtype_path);
            }
        }
    }
}

fn path(prefix: &[i32], rest: &[i32]) -> Vec<i32> {
    let mut out = Vec::with_capacity(prefix.len() + rest.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(rest);
    out
}

fn at(ctx: &Context, node: &Node, ir_path: &[i32]) -> Context {
    match node.nearest_span(ir_path) {
        Some(span) => ctx.in_span(span),
        None => ctx.clone(),
    }
}

fn check_subtype(
    ctx: &Context,
    graph: &Graph,
    node: &Node,
    subtype: &types::Subtype,
    subtype_path: &[i32],
) {
    let ctx = ctx.describe("subtype").note("name", subtype.name.clone());
    let ctx = at(&ctx, node, subtype_path);

    match &subtype.r#type {
        Some(types::subtype::Type::Struct(body)) => {
            for (field_index, field) in body.fields.iter().enumerate() {
                let field_path = path(
                    subtype_path,
                    &[tags::subtype::STRUCT, tags::structure::FIELDS, field_index as i32],
                );
                check_field(&ctx, graph, node, field, &field_path);
            }
        }
        Some(types::subtype::Type::Union(body)) => {
            check_union(&ctx, body);
            for (variant_index, variant) in body.variants.iter().enumerate() {
                let variant_path = path(
                    subtype_path,
                    &[tags::subtype::UNION, tags::union::VARIANTS, variant_index as i32],
                );
                check_field(&ctx, graph, node, variant, &variant_path);
            }
        }
        Some(types::subtype::Type::ReferenceAlias(reference)) => {
            let ctx = at(&ctx, node, &path(subtype_path, &[tags::subtype::REFERENCE_ALIAS]));
            if let Some(terminal) = graph.terminal_for(&ctx, &name_from_ref(reference)) {
                check_constraint_family(&ctx, &terminal, reference.constraints.as_ref());
            }
        }
        Some(types::subtype::Type::Set(set)) => {
            if let Some(types::set::Items::Reference(reference)) = &set.items {
                let ctx = at(&ctx, node, &path(subtype_path, &[tags::subtype::SET]));
                graph.terminal_for(&ctx, &name_from_ref(reference));
            }
        }
        Some(types::subtype::Type::List(list)) => {
            if let Some(types::list::Items::Reference(reference)) = &list.items {
                let ctx = at(&ctx, node, &path(subtype_path, &[tags::subtype::LIST]));
                graph.terminal_for(&ctx, &name_from_ref(reference));
            }
        }
        Some(types::subtype::Type::PrimitiveMap(map)) => {
            let ctx = at(&ctx, node, &path(subtype_path, &[tags::subtype::PRIMITIVE_MAP]));
            check_simple_map(&ctx, graph, map);
        }
        Some(types::subtype::Type::ListMap(list_map)) => {
            let lm_path = path(subtype_path, &[tags::subtype::LIST_MAP]);
            check_list_map(&ctx, graph, node, list_map, &lm_path);
        }
        Some(types::subtype::Type::PrimitiveAlias(_))
        | Some(types::subtype::Type::Enum(_))
        | None => {}
    }
}

fn check_field(ctx: &Context, graph: &Graph, node: &Node, field: &types::Field, field_path: &[i32]) {
    let ctx = ctx.describe("field").note("name", field.name.clone());
    let ctx = at(&ctx, node, field_path);

    match &field.r#type {
        Some(types::field::Type::NamedType(reference)) => {
            let ctx = at(&ctx, node, &path(field_path, &[tags::field::NAMED_TYPE]));
            if let Some(terminal) = graph.terminal_for(&ctx, &name_from_ref(reference)) {
                check_constraint_family(&ctx, &terminal, reference.constraints.as_ref());
                check_default(&ctx, &terminal, field);
            }
        }
        Some(types::field::Type::Primitive(prim)) => {
            check_primitive_default(&ctx, prim, field);
        }
        Some(types::field::Type::Set(set)) => {
            if let Some(types::set::Items::Reference(reference)) = &set.items {
                let ctx = at(&ctx, node, &path(field_path, &[tags::field::SET]));
                graph.terminal_for(&ctx, &name_from_ref(reference));
            }
        }
        Some(types::field::Type::List(list)) => {
            if let Some(types::list::Items::Reference(reference)) = &list.items {
                let ctx = at(&ctx, node, &path(field_path, &[tags::field::LIST]));
                graph.terminal_for(&ctx, &name_from_ref(reference));
            }
        }
        Some(types::field::Type::PrimitiveMap(map)) => {
            let ctx = at(&ctx, node, &path(field_path, &[tags::field::PRIMITIVE_MAP]));
            check_simple_map(&ctx, graph, map);
        }
        Some(types::field::Type::ListMap(list_map)) => {
            let lm_path = path(field_path, &[tags::field::LIST_MAP]);
            check_list_map(&ctx, graph, node, list_map, &lm_path);
        }
        None => {}
    }
}

/// List-map discipline: the item type must be a struct carrying every key
/// field, or a tagged union keyed exactly by its tag.
fn check_list_map(
    ctx: &Context,
    graph: &Graph,
    node: &Node,
    list_map: &types::ListMap,
    lm_path: &[i32],
) {
    let ctx = at(ctx, node, lm_path);
    let Some(items) = &list_map.items else { return };
    let Some(terminal) = graph.terminal_for(&ctx, &name_from_ref(items)) else {
        return;
    };

    let keys_ctx = at(&ctx, node, &path(lm_path, &[tags::list_map::KEY_FIELD]));
    match terminal {
        Terminal::Union(union) => {
            if union.untagged
                || list_map.key_field.len() != 1
                || list_map.key_field[0] != union.tag
            {
                keys_ctx.error_at(
                    "for unions to be used as list-map items, the key must be the union's tag",
                );
            }
        }
        Terminal::Struct(body) => {
            for key in &list_map.key_field {
                let key_ctx = keys_ctx.describe("key").note("name", key.clone());
                if !body.fields.iter().any(|field| &field.name == key) {
                    key_ctx.error_at("key of list-map not present in item");
                }
            }
        }
        Terminal::Kind(_) => {
            ctx.error_at("kinds may not be list-map items");
        }
        Terminal::Wrapper(_) => {
            ctx.error_at(
                "wrapper types may not be list-map items, unless they wrap a struct or union",
            );
        }
        Terminal::Enum(_) => {
            ctx.error_at("enum types may not be list-map items (try a set instead)");
        }
    }
}

/// Simple-map discipline: string-ish keys, primitive-ish values.
fn check_simple_map(ctx: &Context, graph: &Graph, map: &types::PrimitiveMap) {
    match &map.key {
        Some(types::primitive_map::Key::PrimitiveKey(prim)) => {
            if prim.r#type != primitive::Type::String as i32 {
                ctx.describe("key")
                    .error_at("simple-map keys must be strings or string-equivalent primitives");
            }
        }
        Some(types::primitive_map::Key::ReferenceKey(reference)) => {
            let key_ctx = ctx.describe("key");
            if let Some(terminal) = graph.terminal_for(&key_ctx, &name_from_ref(reference)) {
                if !is_stringish_wrapper(&terminal) {
                    key_ctx.error_at(
                        "simple-map keys must be strings or string-equivalent primitives",
                    );
                }
            }
        }
        None => {}
    }

    match &map.value {
        Some(types::primitive_map::Value::PrimitiveValue(_)) => {}
        Some(types::primitive_map::Value::ReferenceValue(reference)) => {
            let value_ctx = ctx.describe("value");
            if let Some(Terminal::Kind(_)) =
                graph.terminal_for(&value_ctx, &name_from_ref(reference))
            {
                value_ctx.error_at("kinds may not be simple-map values");
            }
        }
        Some(types::primitive_map::Value::SimpleListValue(list)) => {
            if matches!(list.items, Some(types::list::Items::Reference(_))) {
                ctx.describe("value")
                    .error_at("simple-map list values must have primitive items");
            }
        }
        None => {}
    }
}

fn is_stringish_wrapper(terminal: &Terminal) -> bool {
    match terminal {
        Terminal::Wrapper(subtype) => matches!(
            &subtype.r#type,
            Some(types::subtype::Type::PrimitiveAlias(prim))
                if prim.r#type == primitive::Type::String as i32
        ),
        _ => false,
    }
}

/// Union discipline: no optional or inline variants, and the tag may not
/// collide with a variant name.
fn check_union(ctx: &Context, union: &types::Union) {
    for variant in &union.variants {
        let variant_ctx = ctx.describe("variant").note("name", variant.name.clone());
        if variant.optional {
            variant_ctx.error_at("union variants may not be optional");
        }
        if variant.embedded {
            variant_ctx.error_at("union variants may not be inline");
        }
    }

    if union.untagged {
        if !union.tag.is_empty() {
            ctx.error_at("untagged unions may not declare a tag");
        }
    } else if union.variants.iter().any(|variant| variant.name == union.tag) {
        ctx.note("tag", union.tag.clone())
            .error_at("union tag collides with a variant name");
    }
}

fn family_for_primitive(prim: i32) -> ValidationFamily {
    match primitive::Type::try_from(prim) {
        Ok(primitive::Type::Legacyint32)
        | Ok(primitive::Type::Int64)
        | Ok(primitive::Type::Legacyfloat64) => ValidationFamily::Numeric,
        Ok(primitive::Type::String) | Ok(primitive::Type::Bytes) => ValidationFamily::String,
        // these serialize as strings, so string constraints apply
        Ok(primitive::Type::Time)
        | Ok(primitive::Type::Duration)
        | Ok(primitive::Type::Quantity) => ValidationFamily::String,
        _ => ValidationFamily::None,
    }
}

fn family_for_terminal(terminal: &Terminal) -> ValidationFamily {
    match terminal {
        Terminal::Wrapper(subtype) => match &subtype.r#type {
            Some(types::subtype::Type::PrimitiveAlias(prim)) => family_for_primitive(prim.r#type),
            Some(types::subtype::Type::List(_))
            | Some(types::subtype::Type::Set(_))
            | Some(types::subtype::Type::ListMap(_)) => ValidationFamily::List,
            Some(types::subtype::Type::PrimitiveMap(_)) => ValidationFamily::Objectish,
            // anything else would not have been classified as a wrapper
            _ => ValidationFamily::None,
        },
        Terminal::Struct(_) | Terminal::Union(_) | Terminal::Kind(_) => ValidationFamily::Objectish,
        Terminal::Enum(_) => ValidationFamily::None,
    }
}

/// Reference-site constraints must match the family of the terminal the
/// reference chases to.
fn check_constraint_family(
    ctx: &Context,
    terminal: &Terminal,
    any: Option<&constraints::Any>,
) {
    let Some(any) = any else { return };
    let Some(actual) = &any.r#type else { return };

    let actual_family = match actual {
        constraints::any::Type::Num(_) => ValidationFamily::Numeric,
        constraints::any::Type::Str(_) => ValidationFamily::String,
        constraints::any::Type::List(_) => ValidationFamily::List,
        constraints::any::Type::Obj(_) => ValidationFamily::Objectish,
    };
    let allowed = family_for_terminal(terminal);
    if actual_family == allowed {
        return;
    }

    let ctx = ctx.note("terminal kind", terminal.kind_name().to_string());
    match allowed {
        ValidationFamily::Numeric => ctx.error_at("can only have numeric validation for this type"),
        ValidationFamily::String => ctx.error_at("can only have string validation for this type"),
        ValidationFamily::List => ctx.error_at("can only have list validation for this type"),
        ValidationFamily::Objectish => {
            ctx.error_at("can only have object-ish validation for this type")
        }
        ValidationFamily::None => ctx.error_at("cannot have any validation for this type"),
    }
}

/// A default on a primitive field must have the matching literal shape.
fn check_primitive_default(ctx: &Context, prim: &types::Primitive, field: &types::Field) {
    let Some(default) = &field.default else { return };
    let Some(kind) = &default.kind else { return };
    use prost_types::value::Kind;

    let ok = match primitive::Type::try_from(prim.r#type) {
        Ok(primitive::Type::String)
        | Ok(primitive::Type::Bytes)
        | Ok(primitive::Type::Time)
        | Ok(primitive::Type::Duration)
        | Ok(primitive::Type::Quantity) => matches!(kind, Kind::StringValue(_)),
        Ok(primitive::Type::Legacyint32)
        | Ok(primitive::Type::Int64)
        | Ok(primitive::Type::Legacyfloat64) => matches!(kind, Kind::NumberValue(_)),
        Ok(primitive::Type::Bool) => matches!(kind, Kind::BoolValue(_)),
        Ok(primitive::Type::Intorstring) => {
            matches!(kind, Kind::StringValue(_) | Kind::NumberValue(_))
        }
        Err(_) => true,
    };
    if !ok {
        ctx.describe("default")
            .error_at("default value does not match the field's type");
    }
}

/// A default through a reference must match the terminal: an enum default
/// must name one of its variants, a wrapped primitive behaves like the
/// primitive.
fn check_default(ctx: &Context, terminal: &Terminal, field: &types::Field) {
    let Some(default) = &field.default else { return };
    use prost_types::value::Kind;

    match terminal {
        Terminal::Enum(body) => {
            let matches_variant = match &default.kind {
                Some(Kind::StringValue(value)) => {
                    body.variants.iter().any(|variant| &variant.name == value)
                }
                _ => false,
            };
            if !matches_variant {
                ctx.describe("default")
                    .error_at("default does not match any variant of the enum");
            }
        }
        Terminal::Wrapper(subtype) => {
            if let Some(types::subtype::Type::PrimitiveAlias(prim)) = &subtype.r#type {
                check_primitive_default(ctx, prim, field);
            }
        }
        // struct-ish defaults are not checked field-by-field (yet)
        Terminal::Struct(_) | Terminal::Union(_) | Terminal::Kind(_) => {}
    }
}
