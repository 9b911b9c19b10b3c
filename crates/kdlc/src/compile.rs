//! The compile driver and the loader boundary.
//!
//! All I/O happens behind [`Loader`]: the core asks for a pre-compiled
//! partial first (`load_compiled`) and falls back to raw KDL source
//! (`load_source`). A source load runs the front half of the pipeline —
//! lex, parse, resolve nesting, prep marker declarations, resolve markers,
//! lower — with had-error gating between stages, then feeds the type
//! graph, which pulls dependencies in through the same seam.
//!
//! [`compile`] drives one or more roots to an [`Outcome`] that exposes
//! `partial_for` / `bundle_for` and the run's diagnostics.

use crate::foundation::SourceMap;
use crate::trace::{Context, DiagnosticFormatter, Diagnostics};
use crate::typegraph::Graph;
use crate::{lexer, parser, resolve, toir};
use prost::Message;
use std::collections::HashMap;
use std::path::PathBuf;

/// The external loading boundary.
///
/// Implementations report their own failures through the context and
/// return `None` for "not found / not available"; the driver treats `None`
/// from both methods as a missing file.
pub trait Loader {
    /// A pre-compiled partial for `path`, if the loader prefers to serve
    /// one (bundles, explicit mappings, caches).
    fn load_compiled(&mut self, ctx: &Context, path: &str) -> Option<ckdl_ir::Partial>;

    /// The raw KDL text for `path`.
    fn load_source(&mut self, ctx: &Context, path: &str) -> Option<Vec<u8>>;
}

/// Internal seam between the graph/marker passes and compilation: resolve
/// a virtual path to a partial, compiling on demand.
pub trait PartialSource {
    fn load(&mut self, ctx: &Context, path: &str) -> ckdl_ir::Partial;

    /// The source-map file id for `path`, when it was compiled from source
    /// this run.
    fn file_id(&self, path: &str) -> Option<u16> {
        let _ = path;
        None
    }
}

/// The result of a compilation run.
pub struct Outcome {
    pub graph: Graph,
    pub sources: SourceMap,
    diagnostics: Diagnostics,
}

impl Outcome {
    pub fn had_errors(&self) -> bool {
        self.diagnostics.had_error()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Render every diagnostic with source snippets.
    pub fn render_diagnostics(&self) -> String {
        DiagnosticFormatter::new(&self.sources).format_all(&self.diagnostics.snapshot())
    }

    pub fn partial_for(&self, path: &str) -> Option<&ckdl_ir::Partial> {
        let ctx = Context::new(&self.diagnostics);
        self.graph.partial_for(&ctx, path)
    }

    pub fn bundle_for(&self, paths: &[&str]) -> ckdl_ir::Bundle {
        let ctx = Context::new(&self.diagnostics);
        self.graph.bundle_for(&ctx, paths)
    }
}

/// Compile the given roots (and, transitively, everything they import).
pub fn compile(roots: &[&str], loader: &mut dyn Loader) -> Outcome {
    let sink = Diagnostics::new();
    let ctx = Context::new(&sink);

    let mut compiler = Compiler {
        loader,
        sources: SourceMap::new(),
        file_ids: HashMap::new(),
    };
    let mut graph = Graph::new();

    for root in roots {
        if graph.contains(&ctx, root) {
            // already pulled in as a dependency of an earlier root
            continue;
        }
        // a root that failed some stage still committed what it could
        // (often an empty partial), so diagnostics keep flowing and
        // `partial_for` answers for every requested path
        let partial = compiler.load(&ctx, root);
        graph.add_file(&ctx, &mut compiler, root, partial);
    }

    if !sink.had_error() {
        graph.check_all(&ctx);
    }

    Outcome {
        graph,
        sources: compiler.sources,
        diagnostics: sink,
    }
}

struct Compiler<'l> {
    loader: &'l mut dyn Loader,
    sources: SourceMap,
    file_ids: HashMap<String, u16>,
}

impl Compiler<'_> {
    /// Run the per-file pipeline. Each stage only runs if the previous
    /// stages of *this file* were clean; a failed stage yields an empty
    /// partial so the rest of the run can continue surfacing diagnostics.
    fn compile_source(&mut self, ctx: &Context, path: &str, text: String) -> ckdl_ir::Partial {
        let file_ctx = ctx.file_scope();
        let file_id = self.sources.add_file(path, text);
        self.file_ids.insert(path.to_string(), file_id);

        let tokens = lexer::lex(&file_ctx, file_id, self.sources.source_of(file_id));
        let mut file = parser::parse_file(&file_ctx, file_id, &tokens);
        if file_ctx.had_error() {
            return ckdl_ir::Partial::default();
        }

        resolve::resolve_nested(&file_ctx, &mut file);
        if file_ctx.had_error() {
            return ckdl_ir::Partial::default();
        }

        resolve::prep_marker_decls(&file_ctx, &mut file);
        if file_ctx.had_error() {
            return ckdl_ir::Partial::default();
        }

        resolve::resolve_markers(&file_ctx, &mut file, self);
        if file_ctx.had_error() {
            return ckdl_ir::Partial::default();
        }

        toir::file_to_ir(&file_ctx, &file)
    }
}

impl PartialSource for Compiler<'_> {
    fn load(&mut self, ctx: &Context, path: &str) -> ckdl_ir::Partial {
        let ctx = ctx.describe("import file").note("path", path.to_string());
        tracing::debug!(path, "loading file");

        // prefer a pre-compiled partial when the loader wants to serve one
        if let Some(partial) = self.loader.load_compiled(&ctx, path) {
            return partial;
        }

        let Some(bytes) = self.loader.load_source(&ctx, path) else {
            // the loader already reported why
            return ckdl_ir::Partial::default();
        };
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => {
                ctx.note("error", err.to_string())
                    .error_at("source file is not valid UTF-8");
                return ckdl_ir::Partial::default();
            }
        };

        self.compile_source(&ctx, path, text)
    }

    fn file_id(&self, path: &str) -> Option<u16> {
        self.file_ids.get(path).copied()
    }
}

/// Errors from the on-disk loaders, reported through the trace context.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to decode CKDL in {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: prost::DecodeError,
    },
    #[error("virtual file {path} already loaded from {existing}")]
    Duplicate { path: String, existing: String },
}

/// An in-memory loader, for embedding and tests.
#[derive(Default)]
pub struct MemoryLoader {
    sources: HashMap<String, String>,
    compiled: HashMap<String, ckdl_ir::Partial>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, path: impl Into<String>, text: impl Into<String>) -> &mut Self {
        self.sources.insert(path.into(), text.into());
        self
    }

    pub fn add_compiled(&mut self, path: impl Into<String>, partial: ckdl_ir::Partial) -> &mut Self {
        self.compiled.insert(path.into(), partial);
        self
    }
}

impl Loader for MemoryLoader {
    fn load_compiled(&mut self, _ctx: &Context, path: &str) -> Option<ckdl_ir::Partial> {
        self.compiled.get(path).cloned()
    }

    fn load_source(&mut self, ctx: &Context, path: &str) -> Option<Vec<u8>> {
        match self.sources.get(path) {
            Some(text) => Some(text.clone().into_bytes()),
            None => {
                ctx.error_at("no such KDL file found");
                None
            }
        }
    }
}

/// Loads KDL source by joining virtual paths to one or more root
/// directories.
pub struct SourceLoader {
    pub roots: Vec<PathBuf>,
}

impl SourceLoader {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

impl Loader for SourceLoader {
    fn load_compiled(&mut self, _ctx: &Context, _path: &str) -> Option<ckdl_ir::Partial> {
        None
    }

    fn load_source(&mut self, ctx: &Context, path: &str) -> Option<Vec<u8>> {
        for root in &self.roots {
            let full = root.join(path);
            match std::fs::read(&full) {
                Ok(bytes) => return Some(bytes),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    let io_err = LoaderError::Io {
                        path: full.display().to_string(),
                        source: err,
                    };
                    ctx.note("error", io_err.to_string())
                        .error_at("unable to read file");
                    return None;
                }
            }
        }
        ctx.error_at("no such KDL file found");
        None
    }
}

/// Serves pre-compiled partials from bundles, explicit `path=file.ckdl`
/// mappings, and (optionally) `.ckdl` siblings under import roots.
#[derive(Default)]
pub struct CompiledLoader {
    /// CKDL bundles to open eagerly on first use.
    pub bundle_paths: Vec<PathBuf>,
    /// virtual path -> on-disk partial file.
    pub partial_paths: HashMap<String, PathBuf>,
    /// Roots checked for a `.ckdl` next to the imported `.kdl` path.
    pub import_roots: Vec<PathBuf>,
    /// Use import-root `.ckdl` files unconditionally. Without this, import
    /// roots are skipped and the source is recompiled instead (there is no
    /// content-hash cache validation yet).
    pub always_use: bool,

    pub loaded: Option<HashMap<String, ckdl_ir::Partial>>,
    /// Which bundle each virtual file came from, for duplicate reports.
    pub loaded_from: HashMap<String, String>,
}

impl CompiledLoader {
    fn ensure_init(&mut self) -> Result<(), LoaderError> {
        if self.loaded.is_some() {
            return Ok(());
        }
        let mut loaded = HashMap::new();

        // bundles are virtual file systems, so they load eagerly
        for bundle_path in &self.bundle_paths {
            let display = bundle_path.display().to_string();
            let bytes = std::fs::read(bundle_path).map_err(|err| LoaderError::Io {
                path: display.clone(),
                source: err,
            })?;
            let bundle =
                ckdl_ir::Bundle::decode(bytes.as_slice()).map_err(|err| LoaderError::Decode {
                    path: display.clone(),
                    source: err,
                })?;
            for file in bundle.virtual_files {
                if let Some(existing) = self.loaded_from.get(&file.name) {
                    return Err(LoaderError::Duplicate {
                        path: file.name,
                        existing: existing.clone(),
                    });
                }
                loaded.insert(file.name.clone(), file.contents.unwrap_or_default());
                self.loaded_from.insert(file.name, display.clone());
            }
        }

        self.loaded = Some(loaded);
        Ok(())
    }

    fn load_partial_file(
        &mut self,
        disk_path: &PathBuf,
        as_path: &str,
    ) -> Result<ckdl_ir::Partial, LoaderError> {
        let display = disk_path.display().to_string();
        let bytes = std::fs::read(disk_path).map_err(|err| LoaderError::Io {
            path: display.clone(),
            source: err,
        })?;
        let partial =
            ckdl_ir::Partial::decode(bytes.as_slice()).map_err(|err| LoaderError::Decode {
                path: display,
                source: err,
            })?;
        self.loaded
            .get_or_insert_with(HashMap::new)
            .insert(as_path.to_string(), partial.clone());
        Ok(partial)
    }
}

impl Loader for CompiledLoader {
    fn load_compiled(&mut self, ctx: &Context, path: &str) -> Option<ckdl_ir::Partial> {
        let ctx = ctx.describe("load from cKDL");
        if let Err(err) = self.ensure_init() {
            ctx.note("error", err.to_string()).error_at("unable to load CKDL");
            return Some(ckdl_ir::Partial::default());
        }

        if let Some(partial) = self.loaded.as_ref().and_then(|loaded| loaded.get(path)) {
            return Some(partial.clone());
        }

        if let Some(disk_path) = self.partial_paths.get(path).cloned() {
            return match self.load_partial_file(&disk_path, path) {
                Ok(partial) => Some(partial),
                Err(err) => {
                    ctx.note("error", err.to_string()).error_at("unable to load CKDL");
                    Some(ckdl_ir::Partial::default())
                }
            };
        }

        if self.always_use {
            let compiled_path = match path.strip_suffix(".kdl") {
                Some(stem) => format!("{}.ckdl", stem),
                None => path.to_string(),
            };
            for root in &self.import_roots.clone() {
                let full = root.join(&compiled_path);
                if full.exists() {
                    return match self.load_partial_file(&full, path) {
                        Ok(partial) => Some(partial),
                        Err(err) => {
                            ctx.note("error", err.to_string())
                                .error_at("unable to load CKDL");
                            Some(ckdl_ir::Partial::default())
                        }
                    };
                }
            }
        }

        None
    }

    fn load_source(&mut self, ctx: &Context, _path: &str) -> Option<Vec<u8>> {
        ctx.error_at("no such KDL file found");
        None
    }
}

/// Compiled-first, source-fallback loader: the usual CLI configuration.
pub struct HybridLoader {
    pub source: SourceLoader,
    pub compiled: Option<CompiledLoader>,
}

impl Loader for HybridLoader {
    fn load_compiled(&mut self, ctx: &Context, path: &str) -> Option<ckdl_ir::Partial> {
        self.compiled
            .as_mut()
            .and_then(|compiled| compiled.load_compiled(ctx, path))
    }

    fn load_source(&mut self, ctx: &Context, path: &str) -> Option<Vec<u8>> {
        self.source.load_source(ctx, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_single_file() {
        let mut loader = MemoryLoader::new();
        loader.add_source(
            "pod.kdl",
            r#"
            group-version(group: "core", version: "v1") {
                kind Pod {
                    spec: Spec,
                    struct Spec { nodeName: optional string, }
                }
            }
            "#,
        );
        let outcome = compile(&["pod.kdl"], &mut loader);
        assert!(!outcome.had_errors(), "{}", outcome.render_diagnostics());

        let partial = outcome.partial_for("pod.kdl").unwrap();
        assert_eq!(partial.group_versions.len(), 1);
        assert_eq!(partial.group_versions[0].kinds[0].name, "Pod");
    }

    #[test]
    fn test_missing_root_reports() {
        let mut loader = MemoryLoader::new();
        let outcome = compile(&["missing.kdl"], &mut loader);
        assert!(outcome.had_errors());
    }

    #[test]
    fn test_compiled_partial_is_preferred() {
        let mut loader = MemoryLoader::new();
        // the source would fail to parse; the compiled partial wins
        loader.add_source("dep.kdl", "this is not KDL at all");
        loader.add_compiled(
            "dep.kdl",
            ckdl_ir::Partial {
                group_versions: vec![ckdl_ir::GroupVersion {
                    description: Some(ckdl_ir::groupver::GroupVersion {
                        group: "dep".into(),
                        version: "v1".into(),
                        docs: None,
                        attributes: vec![],
                    }),
                    kinds: vec![],
                    types: vec![ckdl_ir::types::Subtype {
                        name: "Thing".into(),
                        docs: None,
                        attributes: vec![],
                        r#type: Some(ckdl_ir::types::subtype::Type::Struct(
                            ckdl_ir::types::Struct { fields: vec![] },
                        )),
                    }],
                }],
                ..Default::default()
            },
        );
        loader.add_source(
            "main.kdl",
            r#"
            import types ( {dep/v1} from "dep.kdl"; )
            group-version(group: "main", version: "v1") {
                kind Widget { thing: dep/v1::Thing, }
            }
            "#,
        );

        let outcome = compile(&["main.kdl"], &mut loader);
        assert!(!outcome.had_errors(), "{}", outcome.render_diagnostics());
    }

    #[test]
    fn test_bundle_for_sorts_and_closes_over_deps() {
        let mut loader = MemoryLoader::new();
        loader.add_source(
            "z.kdl",
            r#"group-version(group: "z", version: "v1") { struct Z { x: string, } }"#,
        );
        loader.add_source(
            "a.kdl",
            r#"
            import types ( {z/v1} from "z.kdl"; )
            group-version(group: "a", version: "v1") { kind A { z: z/v1::Z, } }
            "#,
        );
        let outcome = compile(&["a.kdl"], &mut loader);
        assert!(!outcome.had_errors(), "{}", outcome.render_diagnostics());

        let bundle = outcome.bundle_for(&["a.kdl"]);
        let names: Vec<&str> = bundle
            .virtual_files
            .iter()
            .map(|file| file.name.as_str())
            .collect();
        assert_eq!(names, vec!["a.kdl", "z.kdl"]);
    }
}
