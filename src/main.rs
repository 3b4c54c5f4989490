use anyhow::Result;
use apk_patcher::artifact::Artifact;
use apk_patcher::builtin;
use apk_patcher::config::{load_from_path, PatchSet};
use apk_patcher::coordinator::{apply_patch_set, ApplyMode, BuildReport, UnitOutcome};
use clap::{Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "apk-patcher")]
#[command(about = "Structural fingerprint patching for decompiled Android applications", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patch sets to a decompiled artifact directory
    Apply {
        /// Path to the decompiled artifact (apktool output directory)
        artifact: PathBuf,

        /// Specific patch set file to apply (otherwise builtin + ./patches)
        #[arg(short, long)]
        patches: Option<PathBuf>,

        /// Dry run - report what would change without modifying the artifact
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show a unified diff of manifest changes
        #[arg(short, long)]
        diff: bool,

        /// Write the JSON build report to a file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Check patch status against an artifact without modifying it
    Status {
        /// Path to the decompiled artifact
        artifact: PathBuf,

        /// Specific patch set file to check (otherwise builtin + ./patches)
        #[arg(short, long)]
        patches: Option<PathBuf>,
    },

    /// List known patch sets and their units
    List {
        /// Specific patch set file to list (otherwise builtin + ./patches)
        #[arg(short, long)]
        patches: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            artifact,
            patches,
            dry_run,
            diff,
            report,
        } => cmd_apply(&artifact, patches, dry_run, diff, report),
        Commands::Status { artifact, patches } => cmd_status(&artifact, patches),
        Commands::List { patches } => cmd_list(patches),
    }
}

/// Builtin set first, then any .toml sets from ./patches (sorted), unless an
/// explicit file was given.
fn collect_sets(patches: Option<PathBuf>) -> Result<Vec<(String, PatchSet)>> {
    if let Some(path) = patches {
        let set = load_from_path(&path)?;
        return Ok(vec![(path.display().to_string(), set)]);
    }

    let mut sets = vec![("builtin".to_string(), builtin::accept_user_certs())];

    let patches_dir = env::current_dir()?.join("patches");
    if patches_dir.exists() {
        let mut files = Vec::new();
        for entry in WalkDir::new(&patches_dir).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
            {
                files.push(entry.path().to_path_buf());
            }
        }
        files.sort();
        for file in files {
            let set = load_from_path(&file)?;
            sets.push((file.display().to_string(), set));
        }
    }

    Ok(sets)
}

fn open_artifact(path: &Path) -> Result<Artifact> {
    if !path.join("AndroidManifest.xml").exists() {
        anyhow::bail!(
            "{} does not look like a decompiled artifact (no AndroidManifest.xml).\n\
             Decompile the APK first: apktool d app.apk -o {}",
            path.display(),
            path.display()
        );
    }
    Ok(Artifact::open(path)?)
}

fn cmd_apply(
    artifact_path: &Path,
    patches: Option<PathBuf>,
    dry_run: bool,
    show_diff: bool,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let sets = collect_sets(patches)?;
    let mut artifact = open_artifact(artifact_path)?;

    let target = artifact.target_info()?;
    println!("Artifact: {}", artifact_path.display());
    println!(
        "Target: {} {}",
        target.package,
        target.version_name.as_deref().unwrap_or("(no version)")
    );
    println!();

    let mode = if dry_run {
        println!("{}", "[DRY RUN - nothing will be written]".cyan());
        ApplyMode::DryRun
    } else {
        ApplyMode::Commit
    };

    let mut reports = Vec::new();
    let mut any_failed = false;

    for (label, set) in &sets {
        println!("Applying '{}' ({})...", set.meta.name, label);
        let manifest_before = artifact.manifest().content().to_string();

        let report = apply_patch_set(set, &mut artifact, mode)?;

        for unit in &report.units {
            render_unit(&unit.unit, &unit.outcome, dry_run);
            for line in &unit.detail {
                println!("    {}", line.dimmed());
            }
        }
        if report.classes_rewritten > 0 {
            println!(
                "  {} class file(s) {}",
                report.classes_rewritten,
                if dry_run { "would be rewritten" } else { "rewritten" }
            );
        }

        if show_diff {
            let manifest_after = artifact.manifest().content();
            if manifest_before != manifest_after {
                display_diff("AndroidManifest.xml", &manifest_before, manifest_after);
            }
        }

        any_failed |= report.has_failures();
        reports.push(report);
        println!();
    }

    summarize(&reports);

    if let Some(path) = report_path {
        fs::write(&path, serde_json::to_string_pretty(&reports)?)?;
        println!("Report written to {}", path.display());
    }

    if any_failed {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_status(artifact_path: &Path, patches: Option<PathBuf>) -> Result<()> {
    let sets = collect_sets(patches)?;
    let mut artifact = open_artifact(artifact_path)?;

    let target = artifact.target_info()?;
    println!("{}", "Patch Status Report".bold());
    println!("Artifact: {}", artifact_path.display());
    println!(
        "Target: {} {}",
        target.package,
        target.version_name.as_deref().unwrap_or("(no version)")
    );
    println!();

    let mut applied = Vec::new();
    let mut pending = Vec::new();
    let mut skipped = Vec::new();
    let mut failed = Vec::new();

    for (_, set) in &sets {
        let report = apply_patch_set(set, &mut artifact, ApplyMode::DryRun)?;
        for unit in report.units {
            let id = format!("{}/{}", set.meta.name, unit.unit);
            match unit.outcome {
                UnitOutcome::AlreadyApplied => applied.push(id),
                UnitOutcome::Applied => pending.push(id),
                UnitOutcome::Skipped { reason } => skipped.push((id, reason)),
                UnitOutcome::Failed { reason } => failed.push((id, reason)),
            }
        }
    }

    if !applied.is_empty() {
        println!("{} {} ({})", "✓".green(), "APPLIED".green().bold(), applied.len());
        for id in &applied {
            println!("  - {id}");
        }
        println!();
    }
    if !pending.is_empty() {
        println!(
            "{} {} ({})",
            "⊙".yellow(),
            "NOT APPLIED".yellow().bold(),
            pending.len()
        );
        for id in &pending {
            println!("  - {id}");
        }
        println!();
    }
    if !skipped.is_empty() {
        println!("{} {} ({})", "⊘".cyan(), "SKIPPED".cyan().bold(), skipped.len());
        for (id, reason) in &skipped {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
    }
    if !failed.is_empty() {
        println!("{} {} ({})", "✗".red(), "FAILED".red().bold(), failed.len());
        for (id, reason) in &failed {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
    }

    Ok(())
}

fn cmd_list(patches: Option<PathBuf>) -> Result<()> {
    let sets = collect_sets(patches)?;

    for (label, set) in &sets {
        println!("{} ({})", set.meta.name.bold(), label);
        if let Some(description) = &set.meta.description {
            println!("  {}", description.dimmed());
        }
        for unit in &set.units {
            let kind = if unit.is_bytecode() {
                "bytecode"
            } else if unit.resource.is_some() {
                "resource"
            } else {
                "manifest"
            };
            print!("  - {} [{}]", unit.name, kind);
            if !unit.depends_on.is_empty() {
                print!(" (depends on {})", unit.depends_on.join(", "));
            }
            println!();
            if !unit.description.is_empty() {
                println!("      {}", unit.description.dimmed());
            }
        }
        println!();
    }

    Ok(())
}

fn render_unit(name: &str, outcome: &UnitOutcome, dry_run: bool) {
    match outcome {
        UnitOutcome::Applied => {
            let verb = if dry_run { "Would apply" } else { "Applied" };
            println!("{} {}: {}", "✓".green(), name, verb);
        }
        UnitOutcome::AlreadyApplied => {
            println!("{} {}: Already applied", "⊙".yellow(), name);
        }
        UnitOutcome::Skipped { reason } => {
            println!("{} {}: Skipped ({})", "⊘".cyan(), name, reason);
        }
        UnitOutcome::Failed { reason } => {
            eprintln!("{} {}: Failed - {}", "✗".red(), name, reason);
        }
    }
}

fn summarize(reports: &[BuildReport]) {
    let applied: usize = reports
        .iter()
        .map(|r| r.count(|o| matches!(o, UnitOutcome::Applied)))
        .sum();
    let already: usize = reports
        .iter()
        .map(|r| r.count(|o| matches!(o, UnitOutcome::AlreadyApplied)))
        .sum();
    let skipped: usize = reports
        .iter()
        .map(|r| r.count(|o| matches!(o, UnitOutcome::Skipped { .. })))
        .sum();
    let failed: usize = reports
        .iter()
        .map(|r| r.count(|o| matches!(o, UnitOutcome::Failed { .. })))
        .sum();

    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{applied}").green());
    println!("  {} already applied", format!("{already}").yellow());
    println!("  {} skipped", format!("{skipped}").cyan());
    println!("  {} failed", format!("{failed}").red());
}

/// Unified diff of a document before and after patching.
fn display_diff(name: &str, original: &str, modified: &str) {
    println!("\n{}", format!("--- {name} (original)").dimmed());
    println!("{}", format!("+++ {name} (patched)").dimmed());

    let diff = TextDiff::from_lines(original, modified);
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{change}").red(),
            ChangeTag::Insert => format!("+{change}").green(),
            ChangeTag::Equal => format!(" {change}").normal(),
        };
        print!("{sign}");
    }
    println!();
}
