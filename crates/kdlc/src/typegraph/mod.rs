//! The cross-file type graph.
//!
//! One [`Node`] per loaded partial, one [`MergedNode`] per group-version
//! (a group-version may be spread across several partials; merged names
//! must be unique). Dependencies are pulled in through the
//! [`PartialSource`] seam with an explicit work list — import depth never
//! grows the call stack — and cycle detection works by parking a
//! placeholder entry before a file's dependencies are processed:
//! re-encountering a placeholder is an import cycle.
//!
//! [`Graph::terminal_for`] chases reference-alias chains down to a
//! [`Terminal`]; the checks in [`checks`] are all phrased over terminals.

pub mod checks;

use crate::ast::GroupVersionRef;
use crate::compile::PartialSource;
use crate::foundation::Span;
use crate::trace::{Context, NoteValue};
use ckdl_ir::types;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::rc::Rc;

/// A fully qualified type name within a group-version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeName {
    pub group_version: GroupVersionRef,
    pub full_name: String,
}

impl std::fmt::Display for TypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.group_version, self.full_name)
    }
}

pub fn gv_from_ref(gv: &types::GroupVersionRef) -> GroupVersionRef {
    GroupVersionRef::new(gv.group.clone(), gv.version.clone())
}

pub fn name_from_ref(reference: &types::Reference) -> TypeName {
    TypeName {
        group_version: reference
            .group_version
            .as_ref()
            .map(gv_from_ref)
            .unwrap_or_else(|| GroupVersionRef::new("", "")),
        full_name: reference.name.clone(),
    }
}

/// A non-alias node of the type graph: something a reference chain can
/// bottom out at.
///
/// Wrapper covers newtypes over primitives and containers; a newtype over
/// another named type is a reference edge, not a terminal.
#[derive(Clone)]
pub enum Terminal {
    Wrapper(Rc<types::Subtype>),
    Struct(Rc<types::Struct>),
    Union(Rc<types::Union>),
    Enum(Rc<types::Enum>),
    Kind(Rc<types::Kind>),
}

impl Terminal {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Terminal::Wrapper(_) => "wrapper",
            Terminal::Struct(_) => "struct",
            Terminal::Union(_) => "union",
            Terminal::Enum(_) => "enum",
            Terminal::Kind(_) => "kind",
        }
    }
}

/// Per-partial graph information.
pub struct Node {
    pub partial: ckdl_ir::Partial,
    pub path: String,
    /// File id in the compilation's `SourceMap`, when this partial was
    /// compiled from source this run (pre-compiled partials have none).
    pub file_id: Option<u16>,
    references: Rc<IndexMap<TypeName, TypeName>>,
    terminals: Rc<IndexMap<TypeName, Terminal>>,
    /// Source-map paths -> byte spans, for check-time diagnostics.
    locations: HashMap<Vec<i32>, (u32, u32)>,
}

impl Node {
    /// The span recorded for an IR path, trying progressively shorter
    /// prefixes so a check can always point somewhere useful.
    pub fn nearest_span(&self, path: &[i32]) -> Option<Span> {
        let file_id = self.file_id?;
        let mut end = path.len();
        loop {
            if let Some(&(start, stop)) = self.locations.get(&path[..end]) {
                return Some(Span::new(file_id, start, stop));
            }
            if end == 0 {
                return None;
            }
            end -= 1;
        }
    }
}

/// The merged view of one group-version across partials.
pub struct MergedNode {
    pub sources: Vec<String>,
    references: Rc<IndexMap<TypeName, TypeName>>,
    terminals: Rc<IndexMap<TypeName, Terminal>>,
}

pub struct Graph {
    /// `None` marks a file whose dependencies are still being processed
    /// (the cycle-detection placeholder).
    path_to_node: IndexMap<String, Option<Node>>,
    gv_to_node: IndexMap<GroupVersionRef, MergedNode>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            path_to_node: IndexMap::new(),
            gv_to_node: IndexMap::new(),
        }
    }

    fn has_placeholder(&self, path: &str) -> bool {
        matches!(self.path_to_node.get(path), Some(None))
    }

    /// Whether `path` has been (or is being) processed. Hitting an
    /// in-progress placeholder reports an import cycle.
    pub fn contains(&self, ctx: &Context, path: &str) -> bool {
        if self.has_placeholder(path) {
            ctx.error_at("import cycle detected");
            return true;
        }
        self.path_to_node.contains_key(path)
    }

    /// Absorb a partial and, transitively, everything it imports.
    ///
    /// Dependencies are resolved through `source` (which prefers
    /// pre-compiled partials and falls back to compiling KDL source).
    pub fn add_file(
        &mut self,
        ctx: &Context,
        source: &mut dyn PartialSource,
        path: &str,
        partial: ckdl_ir::Partial,
    ) {
        struct Pending {
            path: String,
            partial: ckdl_ir::Partial,
            next_dep: usize,
        }

        let ctx = ctx.describe("file").note("path", path.to_string());
        self.path_to_node.insert(path.to_string(), None);
        let mut stack = vec![Pending {
            path: path.to_string(),
            partial,
            next_dep: 0,
        }];

        while let Some(top) = stack.last_mut() {
            if top.next_dep < top.partial.dependencies.len() {
                let dep = top.partial.dependencies[top.next_dep].clone();
                top.next_dep += 1;

                let dep_ctx = ctx
                    .describe("dependency")
                    .note("path", dep.from.clone())
                    .note(
                        "group-version",
                        NoteValue::Raw(
                            dep.group_version
                                .as_ref()
                                .map(|gv| format!("{}/{}", gv.group, gv.version))
                                .unwrap_or_default(),
                        ),
                    );

                if self.has_placeholder(&dep.from) {
                    dep_ctx.error_at("import cycle detected");
                    continue;
                }
                if self.path_to_node.contains_key(&dep.from) {
                    // already processed
                    continue;
                }

                tracing::debug!(from = %dep.from, "loading dependency");
                self.path_to_node.insert(dep.from.clone(), None);
                let dep_partial = source.load(&dep_ctx, &dep.from);
                stack.push(Pending {
                    path: dep.from,
                    partial: dep_partial,
                    next_dep: 0,
                });
            } else {
                let done = stack.pop().expect("non-empty stack");
                let node_ctx = ctx.describe("file").note("path", done.path.clone());
                let node = self.build_node(
                    &node_ctx,
                    &done.path,
                    done.partial,
                    source.file_id(&done.path),
                );
                self.path_to_node.insert(done.path, Some(node));
            }
        }
    }

    fn build_node(
        &self,
        ctx: &Context,
        path: &str,
        partial: ckdl_ir::Partial,
        file_id: Option<u16>,
    ) -> Node {
        let mut references = IndexMap::new();
        let mut terminals = IndexMap::new();

        for ir_gv in &partial.group_versions {
            let Some(desc) = &ir_gv.description else {
                continue;
            };
            let gv = GroupVersionRef::new(desc.group.clone(), desc.version.clone());

            // kind terminals first
            for kind in &ir_gv.kinds {
                add_terminal(
                    ctx,
                    &mut references,
                    &mut terminals,
                    TypeName {
                        group_version: gv.clone(),
                        full_name: kind.name.clone(),
                    },
                    Terminal::Kind(Rc::new(kind.clone())),
                );
            }

            // then subtype terminals and alias edges
            for subtype in &ir_gv.types {
                let name = TypeName {
                    group_version: gv.clone(),
                    full_name: subtype.name.clone(),
                };
                match &subtype.r#type {
                    Some(types::subtype::Type::ReferenceAlias(reference)) => {
                        add_reference(
                            ctx,
                            &mut references,
                            &mut terminals,
                            name,
                            name_from_ref(reference),
                        );
                    }
                    Some(types::subtype::Type::Struct(body)) => add_terminal(
                        ctx,
                        &mut references,
                        &mut terminals,
                        name,
                        Terminal::Struct(Rc::new(body.clone())),
                    ),
                    Some(types::subtype::Type::Union(body)) => add_terminal(
                        ctx,
                        &mut references,
                        &mut terminals,
                        name,
                        Terminal::Union(Rc::new(body.clone())),
                    ),
                    Some(types::subtype::Type::Enum(body)) => add_terminal(
                        ctx,
                        &mut references,
                        &mut terminals,
                        name,
                        Terminal::Enum(Rc::new(body.clone())),
                    ),
                    Some(types::subtype::Type::PrimitiveAlias(_))
                    | Some(types::subtype::Type::Set(_))
                    | Some(types::subtype::Type::List(_))
                    | Some(types::subtype::Type::PrimitiveMap(_))
                    | Some(types::subtype::Type::ListMap(_)) => add_terminal(
                        ctx,
                        &mut references,
                        &mut terminals,
                        name,
                        Terminal::Wrapper(Rc::new(subtype.clone())),
                    ),
                    None => {
                        ctx.note("name", subtype.name.clone())
                            .error_at("subtype has no body");
                    }
                }
            }
        }

        let locations = partial
            .source_map
            .iter()
            .filter(|location| location.span.len() == 2)
            .map(|location| {
                (
                    location.path.clone(),
                    (location.span[0] as u32, location.span[1] as u32),
                )
            })
            .collect();

        Node {
            partial,
            path: path.to_string(),
            file_id,
            references: Rc::new(references),
            terminals: Rc::new(terminals),
            locations,
        }
    }

    /// Map every node into its group-versions, merging group-versions
    /// spread across multiple partials and reporting duplicate names.
    pub fn merge_nodes(&mut self, ctx: &Context) {
        let mut merged: IndexMap<GroupVersionRef, MergedNode> = IndexMap::new();

        for node in self.path_to_node.values().flatten() {
            let ctx = ctx.describe("file").note("path", node.path.clone());
            for ir_gv in &node.partial.group_versions {
                let Some(desc) = &ir_gv.description else {
                    continue;
                };
                let gv = GroupVersionRef::new(desc.group.clone(), desc.version.clone());

                match merged.get_mut(&gv) {
                    None => {
                        // common case: share the node's maps until a second
                        // source for this group-version shows up
                        merged.insert(
                            gv,
                            MergedNode {
                                sources: vec![node.path.clone()],
                                references: node.references.clone(),
                                terminals: node.terminals.clone(),
                            },
                        );
                    }
                    Some(existing) => {
                        let references = Rc::make_mut(&mut existing.references);
                        let terminals = Rc::make_mut(&mut existing.terminals);
                        for (from, to) in node.references.iter() {
                            if from.group_version != gv {
                                continue;
                            }
                            add_reference(&ctx, references, terminals, from.clone(), to.clone());
                        }
                        for (from, terminal) in node.terminals.iter() {
                            if from.group_version != gv {
                                continue;
                            }
                            add_terminal(
                                &ctx,
                                references,
                                terminals,
                                from.clone(),
                                terminal.clone(),
                            );
                        }
                        existing.sources.push(node.path.clone());
                    }
                }
            }
        }

        self.gv_to_node = merged;
    }

    /// Chase a reference through alias edges until a terminal (or report
    /// why that is impossible).
    pub fn terminal_for(&self, ctx: &Context, name: &TypeName) -> Option<Terminal> {
        let ctx = ctx
            .describe("finding terminal for reference")
            .note("original", name.to_string());

        let mut seen: Vec<&TypeName> = Vec::new();
        let mut current = name;
        loop {
            // aliases may cross group-versions, so the merged node is
            // looked up fresh at every hop
            let Some(node) = self.gv_to_node.get(&current.group_version) else {
                ctx.note("at", current.to_string())
                    .error_at("reference to unknown group-version");
                return None;
            };
            match node.references.get(current) {
                Some(next) => {
                    if seen.contains(&next) {
                        ctx.note("via", next.to_string())
                            .error_at("reference-alias cycle");
                        return None;
                    }
                    seen.push(next);
                    current = next;
                }
                None => {
                    return match node.terminals.get(current) {
                        Some(terminal) => Some(terminal.clone()),
                        None => {
                            ctx.note("terminal", current.to_string())
                                .error_at("reference to unknown type");
                            None
                        }
                    };
                }
            }
        }
    }

    pub fn partial_for(&self, ctx: &Context, path: &str) -> Option<&ckdl_ir::Partial> {
        match self.path_to_node.get(path) {
            Some(Some(node)) => Some(&node.partial),
            _ => {
                ctx.note("path", path.to_string()).error_at("no IR for path");
                None
            }
        }
    }

    /// Assemble a bundle containing the requested paths and their
    /// transitive dependency closure, sorted by virtual path.
    pub fn bundle_for(&self, ctx: &Context, paths: &[&str]) -> ckdl_ir::Bundle {
        let mut wanted: Vec<String> = Vec::new();
        let mut work: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        while let Some(path) = work.pop() {
            if wanted.contains(&path) {
                continue;
            }
            let Some(Some(node)) = self.path_to_node.get(&path) else {
                ctx.note("path", path.clone())
                    .error_at("no IR for path");
                continue;
            };
            wanted.push(path);
            for dep in &node.partial.dependencies {
                work.push(dep.from.clone());
            }
        }
        wanted.sort();

        ckdl_ir::Bundle {
            virtual_files: wanted
                .into_iter()
                .map(|path| {
                    let node = self.path_to_node[&path].as_ref().expect("collected above");
                    ckdl_ir::VirtualFile {
                        name: path,
                        contents: Some(node.partial.clone()),
                    }
                })
                .collect(),
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.path_to_node.values().flatten()
    }

    /// Run the merge and the full check set. Assumes a clean run so far;
    /// callers gate on the diagnostic sink.
    pub fn check_all(&mut self, ctx: &Context) {
        self.merge_nodes(ctx);
        if ctx.diagnostics().had_error() {
            // cannot check against a partially merged graph
            return;
        }
        checks::check_all(ctx, self);
    }
}

fn add_terminal(
    ctx: &Context,
    references: &mut IndexMap<TypeName, TypeName>,
    terminals: &mut IndexMap<TypeName, Terminal>,
    from: TypeName,
    terminal: Terminal,
) {
    if references.contains_key(&from) || terminals.contains_key(&from) {
        ctx.note("name", from.to_string())
            .error_at("type with this name already exists");
        return;
    }
    terminals.insert(from, terminal);
}

fn add_reference(
    ctx: &Context,
    references: &mut IndexMap<TypeName, TypeName>,
    terminals: &mut IndexMap<TypeName, Terminal>,
    from: TypeName,
    to: TypeName,
) {
    if references.contains_key(&from) || terminals.contains_key(&from) {
        ctx.note("name", from.to_string())
            .error_at("type with this name already exists");
        return;
    }
    references.insert(from, to);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Diagnostics;
    use ckdl_ir::types::{subtype, Struct, Subtype};
    use std::collections::HashMap as StdHashMap;

    /// A stub source serving fixed partials.
    struct MapSource(StdHashMap<String, ckdl_ir::Partial>);

    impl PartialSource for MapSource {
        fn load(&mut self, ctx: &Context, path: &str) -> ckdl_ir::Partial {
            match self.0.get(path) {
                Some(partial) => partial.clone(),
                None => {
                    ctx.error_at("no such file");
                    ckdl_ir::Partial::default()
                }
            }
        }
    }

    fn struct_subtype(name: &str) -> Subtype {
        Subtype {
            name: name.to_string(),
            docs: None,
            attributes: vec![],
            r#type: Some(subtype::Type::Struct(Struct { fields: vec![] })),
        }
    }

    fn alias_subtype(name: &str, to_gv: (&str, &str), to: &str) -> Subtype {
        Subtype {
            name: name.to_string(),
            docs: None,
            attributes: vec![],
            r#type: Some(subtype::Type::ReferenceAlias(types::Reference {
                group_version: Some(types::GroupVersionRef {
                    group: to_gv.0.to_string(),
                    version: to_gv.1.to_string(),
                }),
                name: to.to_string(),
                constraints: None,
            })),
        }
    }

    fn partial(gv: (&str, &str), subtypes: Vec<Subtype>, deps: Vec<&str>) -> ckdl_ir::Partial {
        ckdl_ir::Partial {
            group_versions: vec![ckdl_ir::GroupVersion {
                description: Some(ckdl_ir::groupver::GroupVersion {
                    group: gv.0.to_string(),
                    version: gv.1.to_string(),
                    docs: None,
                    attributes: vec![],
                }),
                kinds: vec![],
                types: subtypes,
            }],
            dependencies: deps
                .into_iter()
                .map(|from| ckdl_ir::Dependency {
                    group_version: None,
                    from: from.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn name(gv: (&str, &str), full_name: &str) -> TypeName {
        TypeName {
            group_version: GroupVersionRef::new(gv.0, gv.1),
            full_name: full_name.to_string(),
        }
    }

    #[test]
    fn test_alias_chain_resolves_to_terminal() {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        let mut source = MapSource(StdHashMap::new());

        let mut graph = Graph::new();
        graph.add_file(
            &ctx,
            &mut source,
            "a.kdl",
            partial(
                ("core", "v1"),
                vec![
                    struct_subtype("Real"),
                    alias_subtype("Alias", ("core", "v1"), "Real"),
                    alias_subtype("AliasAlias", ("core", "v1"), "Alias"),
                ],
                vec![],
            ),
        );
        graph.merge_nodes(&ctx);
        assert!(!sink.had_error());

        let terminal = graph
            .terminal_for(&ctx, &name(("core", "v1"), "AliasAlias"))
            .expect("terminal resolves");
        assert!(matches!(terminal, Terminal::Struct(_)));
    }

    #[test]
    fn test_alias_cycle_is_reported() {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        let mut source = MapSource(StdHashMap::new());

        let mut graph = Graph::new();
        graph.add_file(
            &ctx,
            &mut source,
            "a.kdl",
            partial(
                ("core", "v1"),
                vec![
                    alias_subtype("A", ("core", "v1"), "B"),
                    alias_subtype("B", ("core", "v1"), "A"),
                ],
                vec![],
            ),
        );
        graph.merge_nodes(&ctx);

        assert!(graph.terminal_for(&ctx, &name(("core", "v1"), "A")).is_none());
        assert!(sink.had_error());
    }

    #[test]
    fn test_import_cycle_detected_once() {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);

        let mut files = StdHashMap::new();
        files.insert(
            "b.kdl".to_string(),
            partial(("b", "v1"), vec![struct_subtype("B")], vec!["a.kdl"]),
        );
        let mut source = MapSource(files);

        let mut graph = Graph::new();
        graph.add_file(
            &ctx,
            &mut source,
            "a.kdl",
            partial(("a", "v1"), vec![struct_subtype("A")], vec!["b.kdl"]),
        );

        let cycles = sink
            .snapshot()
            .iter()
            .filter(|diag| diag.message == "import cycle detected")
            .count();
        assert_eq!(cycles, 1);
        // both nodes still exist
        assert!(graph.partial_for(&ctx, "a.kdl").is_some());
        assert!(graph.partial_for(&ctx, "b.kdl").is_some());
    }

    #[test]
    fn test_merge_reports_duplicates() {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        let mut source = MapSource(StdHashMap::new());

        let mut graph = Graph::new();
        graph.add_file(
            &ctx,
            &mut source,
            "a.kdl",
            partial(("core", "v1"), vec![struct_subtype("Thing")], vec![]),
        );
        graph.add_file(
            &ctx,
            &mut source,
            "b.kdl",
            partial(("core", "v1"), vec![struct_subtype("Thing")], vec![]),
        );
        graph.merge_nodes(&ctx);

        assert!(sink.had_error());
        assert!(sink
            .snapshot()
            .iter()
            .any(|diag| diag.message == "type with this name already exists"));
    }

    #[test]
    fn test_merge_distinct_names_is_clean() {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        let mut source = MapSource(StdHashMap::new());

        let mut graph = Graph::new();
        graph.add_file(
            &ctx,
            &mut source,
            "a.kdl",
            partial(("core", "v1"), vec![struct_subtype("A")], vec![]),
        );
        graph.add_file(
            &ctx,
            &mut source,
            "b.kdl",
            partial(("core", "v1"), vec![struct_subtype("B")], vec![]),
        );
        graph.merge_nodes(&ctx);
        assert!(!sink.had_error());

        assert!(graph.terminal_for(&ctx, &name(("core", "v1"), "A")).is_some());
        assert!(graph.terminal_for(&ctx, &name(("core", "v1"), "B")).is_some());
    }

    #[test]
    fn test_bundle_sorted_by_name() {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        let mut source = MapSource(StdHashMap::new());

        let mut graph = Graph::new();
        graph.add_file(&ctx, &mut source, "zz.kdl", partial(("z", "v1"), vec![], vec![]));
        graph.add_file(&ctx, &mut source, "aa.kdl", partial(("a", "v1"), vec![], vec![]));

        let bundle = graph.bundle_for(&ctx, &["zz.kdl", "aa.kdl"]);
        let names: Vec<&str> = bundle
            .virtual_files
            .iter()
            .map(|file| file.name.as_str())
            .collect();
        assert_eq!(names, vec!["aa.kdl", "zz.kdl"]);
    }

    #[test]
    fn test_unknown_reference_reports() {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        let mut source = MapSource(StdHashMap::new());

        let mut graph = Graph::new();
        graph.add_file(
            &ctx,
            &mut source,
            "a.kdl",
            partial(("core", "v1"), vec![struct_subtype("A")], vec![]),
        );
        graph.merge_nodes(&ctx);

        assert!(graph
            .terminal_for(&ctx, &name(("core", "v1"), "Missing"))
            .is_none());
        assert!(sink
            .snapshot()
            .iter()
            .any(|diag| diag.message == "reference to unknown type"));
    }
}
