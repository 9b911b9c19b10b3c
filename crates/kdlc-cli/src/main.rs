//! `kdlc` — compile KDL files to a CKDL bundle on stdout.
//!
//! ```text
//! kdlc -I ./apis core/pod.kdl > pod.ckdl-bundle
//! ```
//!
//! Diagnostics go to stderr; the exit code is 1 when the compile recorded
//! any error.

use clap::Parser;
use kdlc::compile::{compile, CompiledLoader, HybridLoader, SourceLoader};
use prost::Message;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "kdlc", version = kdlc::VERSION, about = "KDL to CKDL compiler")]
struct Args {
    /// Root KDL files (virtual paths, resolved against import roots).
    #[arg(required = true, value_name = "FILE.kdl")]
    roots: Vec<String>,

    /// Directories to resolve imports (and roots) against.
    #[arg(short = 'I', long = "import-dir", value_name = "DIR")]
    import_dirs: Vec<PathBuf>,

    /// Pre-compiled CKDL bundles to import from.
    #[arg(short = 'B', long = "import-bundle", value_name = "BUNDLE")]
    import_bundles: Vec<PathBuf>,

    /// Map a virtual path to a pre-compiled partial (`path=file.ckdl`).
    #[arg(long = "partial", value_name = "PATH=CKDL")]
    partials: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut partial_paths = HashMap::new();
    for mapping in &args.partials {
        match mapping.split_once('=') {
            Some((virtual_path, disk_path)) => {
                partial_paths.insert(virtual_path.to_string(), PathBuf::from(disk_path));
            }
            None => {
                eprintln!("Error: --partial mappings must look like path=file.ckdl, got {:?}", mapping);
                return ExitCode::FAILURE;
            }
        }
    }

    let mut import_dirs = args.import_dirs.clone();
    if import_dirs.is_empty() {
        import_dirs.push(PathBuf::from("."));
    }

    let compiled = if args.import_bundles.is_empty() && partial_paths.is_empty() {
        None
    } else {
        Some(CompiledLoader {
            bundle_paths: args.import_bundles.clone(),
            partial_paths,
            import_roots: import_dirs.clone(),
            always_use: false,
            ..Default::default()
        })
    };
    let mut loader = HybridLoader {
        source: SourceLoader::new(import_dirs),
        compiled,
    };

    let root_refs: Vec<&str> = args.roots.iter().map(String::as_str).collect();
    let outcome = compile(&root_refs, &mut loader);

    eprint!("{}", outcome.render_diagnostics());
    if outcome.had_errors() {
        return ExitCode::FAILURE;
    }

    let bundle = outcome.bundle_for(&root_refs);
    let bytes = bundle.encode_to_vec();
    if let Err(err) = std::io::stdout().write_all(&bytes) {
        eprintln!("Error: unable to write bundle: {}", err);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
