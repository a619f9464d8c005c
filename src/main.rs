use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use ooxml_patcher::part::{DirectoryPackage, MemoryPackage, PartManager};
use ooxml_patcher::patch::{
    self, ApplyOptions, EngineError, OperationKind, OperationResult, PatchFile, PatchSession,
};
use ooxml_patcher::registry::{self, Registry};
use ooxml_patcher::token::TokenSet;
use ooxml_patcher::tree::{read_from_path, to_xml_string, write_to_path};
use similar::{ChangeTag, TextDiff};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ooxml-patcher")]
#[command(about = "Registry-driven patching for Office Open XML parts", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patch files to one XML part
    Apply {
        /// Registry layers, base first
        #[arg(short, long, required = true, num_args = 1..)]
        registry: Vec<PathBuf>,

        /// Patch file, or a directory of .toml patch files
        #[arg(short, long)]
        patches: PathBuf,

        /// XML part to patch
        #[arg(long)]
        part: PathBuf,

        /// Token file (.toml or .json)
        #[arg(short, long)]
        tokens: Option<PathBuf>,

        /// Write the patched part here instead of in place
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Extracted package root that receives new parts
        #[arg(long)]
        parts_dir: Option<PathBuf>,

        /// Treat every operation as optional
        #[arg(long)]
        optional: bool,

        /// Dry run - show what would be changed without writing files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Validate a registry and, optionally, patch files against it
    Check {
        /// Registry layers, base first
        #[arg(short, long, required = true, num_args = 1..)]
        registry: Vec<PathBuf>,

        /// Patch file, or a directory of .toml patch files
        #[arg(short, long)]
        patches: Option<PathBuf>,
    },

    /// List the paths, fragments and parts a registry defines
    List {
        /// Registry layers, base first
        #[arg(short, long, required = true, num_args = 1..)]
        registry: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Apply {
            registry,
            patches,
            part,
            tokens,
            output,
            parts_dir,
            optional,
            dry_run,
            diff,
        } => cmd_apply(ApplyArgs {
            registry,
            patches,
            part,
            tokens,
            output,
            parts_dir,
            optional,
            dry_run,
            diff,
        }),

        Commands::Check { registry, patches } => cmd_check(&registry, patches.as_deref()),

        Commands::List { registry } => cmd_list(&registry),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_registry(layers: &[PathBuf]) -> Result<Registry> {
    let registry = registry::load_layers(layers)?;
    let meta = registry.meta();
    println!(
        "Registry: {} {}",
        if meta.name.is_empty() { "(unnamed)" } else { meta.name.as_str() },
        meta.version.as_deref().unwrap_or("(unversioned)")
    );
    Ok(registry)
}

fn load_patches(path: &Path, registry: &Registry) -> Result<Vec<(PathBuf, PatchFile)>> {
    let files = patch::discover(path)?;
    if files.is_empty() {
        anyhow::bail!("No .toml patch files found in {}", path.display());
    }
    files
        .into_iter()
        .map(|file| {
            let patch = patch::load_for_registry(&file, registry)?;
            Ok::<_, anyhow::Error>((file, patch))
        })
        .collect()
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

struct ApplyArgs {
    registry: Vec<PathBuf>,
    patches: PathBuf,
    part: PathBuf,
    tokens: Option<PathBuf>,
    output: Option<PathBuf>,
    parts_dir: Option<PathBuf>,
    optional: bool,
    dry_run: bool,
    diff: bool,
}

fn cmd_apply(args: ApplyArgs) -> Result<()> {
    let registry = load_registry(&args.registry)?;
    let tokens = match &args.tokens {
        Some(path) => TokenSet::load(path)?,
        None => TokenSet::new(),
    };
    let patch_files = load_patches(&args.patches, &registry)?;
    if args.parts_dir.is_none() {
        if let Some((file, _)) = patch_files.iter().find(|(_, patch)| creates_parts(patch)) {
            anyhow::bail!(
                "{} uses ensurePart; pass --parts-dir with the extracted package root so new parts are written",
                file.display()
            );
        }
    }

    let mut tree = read_from_path(&args.part)
        .with_context(|| format!("failed to read part {}", args.part.display()))?;
    let before = to_xml_string(&tree);

    // Without --parts-dir no operation creates parts, so the package stays empty.
    let mut parts: Box<dyn PartManager> = match &args.parts_dir {
        Some(dir) => Box::new(DirectoryPackage::new(dir).dry_run(args.dry_run)),
        None => Box::new(MemoryPackage::new()),
    };

    println!("Part: {}", args.part.display());
    if args.dry_run {
        println!("{}", "[DRY RUN - nothing will be written]".cyan());
    }
    println!();

    let mut session = PatchSession::new(&registry, &tokens).with_options(ApplyOptions {
        optional_by_default: args.optional,
    });

    let mut total_applied = 0;
    let mut total_already_applied = 0;
    let mut total_skipped = 0;
    let mut total_failed = 0;

    for (file, patch) in &patch_files {
        println!("Applying {}...", file.display());

        let report = match session.apply(&mut tree, parts.as_mut(), patch) {
            Ok(report) => report,
            Err(err) => {
                eprintln!(
                    "{} #{} {} [{}]: Failed - {}",
                    "✗".red(),
                    err.index,
                    err.kind,
                    err.keys.join(", "),
                    err.source
                );
                match &err.source {
                    EngineError::TargetNotFound { key } => {
                        eprintln!("  {}", "CONFLICT: Path matched no nodes".red());
                        eprintln!("  Path: {}", path_source(&registry, key));
                        eprintln!("  Mark the operation optional if the part may lack it");
                    }
                    EngineError::AmbiguousTarget { key, count } => {
                        eprintln!(
                            "  {}",
                            format!("CONFLICT: Path matched {} nodes (expected 1)", count).red()
                        );
                        eprintln!("  Path: {}", path_source(&registry, key));
                        eprintln!("  Action: Add a predicate to the registry path");
                    }
                    EngineError::EnsureFailed { fragment, .. } => {
                        eprintln!("  Fragment '{}' does not satisfy its target path", fragment);
                    }
                    _ => {}
                }
                total_failed += 1;
                break;
            }
        };

        for outcome in &report.outcomes {
            let label = format!("#{} {} [{}]", outcome.index, outcome.kind, outcome.keys.join(", "));
            match &outcome.result {
                OperationResult::Applied => {
                    let verb = if args.dry_run { "Would apply" } else { "Applied" };
                    println!("{} {}: {}", "✓".green(), label, verb);
                    total_applied += 1;
                }
                OperationResult::AlreadyApplied => {
                    println!("{} {}: Already applied", "⊙".yellow(), label);
                    total_already_applied += 1;
                }
                OperationResult::Skipped { reason } | OperationResult::SkippedVersion { reason } => {
                    println!("{} {}: Skipped ({})", "⊘".cyan(), label, reason);
                    total_skipped += 1;
                }
            }
        }
        println!();
    }

    let after = to_xml_string(&tree);
    if args.diff && before != after {
        display_diff(&args.part, &before, &after);
        println!();
    }

    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", total_applied).green());
    println!(
        "  {} already applied",
        format!("{}", total_already_applied).yellow()
    );
    println!("  {} skipped", format!("{}", total_skipped).cyan());
    println!("  {} failed", format!("{}", total_failed).red());

    if total_failed > 0 {
        eprintln!("{}", "Part left unchanged on disk".yellow());
        std::process::exit(1);
    }

    if !args.dry_run && (before != after || args.output.is_some()) {
        let target = args.output.as_deref().unwrap_or(&args.part);
        write_to_path(&tree, target)
            .with_context(|| format!("failed to write {}", target.display()))?;
        println!("Wrote {}", target.display());
    }

    Ok(())
}

fn creates_parts(patch: &PatchFile) -> bool {
    patch
        .operations
        .iter()
        .any(|record| record.op.kind() == OperationKind::EnsurePart)
}

fn path_source<'a>(registry: &'a Registry, key: &str) -> &'a str {
    registry.path(key).map(|path| path.source()).unwrap_or("(unknown)")
}

fn cmd_check(layers: &[PathBuf], patches: Option<&Path>) -> Result<()> {
    println!("{}", "Checking registry...".bold());
    let registry = load_registry(layers)?;
    println!(
        "{} {} paths, {} fragments, {} parts",
        "✓".green(),
        registry.paths().count(),
        registry.fragments().count(),
        registry.parts().count()
    );

    let Some(patches) = patches else {
        return Ok(());
    };

    println!();
    let mut verified = 0;
    let mut invalid = 0;
    for file in patch::discover(patches)? {
        match patch::load_for_registry(&file, &registry) {
            Ok(patch) => {
                println!(
                    "{} {}: {} operations",
                    "✓".green(),
                    file.display(),
                    patch.operations.len()
                );
                verified += 1;
            }
            Err(err) => {
                eprintln!("{} {}", "✗".red(), err);
                invalid += 1;
            }
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} valid", format!("{}", verified).green());
    println!("  {} invalid", format!("{}", invalid).red());

    if invalid > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_list(layers: &[PathBuf]) -> Result<()> {
    let registry = load_registry(layers)?;
    println!("Fingerprint: {:016x}", registry.fingerprint());
    println!();

    println!("{}", "Paths:".bold());
    for path in registry.paths() {
        println!("  {} = {}", path.name().green(), path.source().dimmed());
    }

    println!("{}", "Fragments:".bold());
    for fragment in registry.fragments() {
        println!("  {}", fragment.name().green());
    }

    println!("{}", "Parts:".bold());
    for part in registry.parts() {
        println!(
            "  {} -> {} ({})",
            part.key.green(),
            part.part_name,
            part.content_type.dimmed()
        );
    }

    Ok(())
}
