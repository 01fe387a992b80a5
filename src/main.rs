use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use locsync::config::Settings;
use locsync::package::{latest_release_version, package_localization};
use locsync::reconcile::Reconciler;
use locsync::repo::{MergeOutcome, RECONCILE_COMMIT_MESSAGE, RepositoryManager};

#[derive(Parser)]
#[command(
    name = "locsync",
    about = "Synchronizes community localization data with the game and its Git repository",
    version,
    author,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the settings file (defaults to locsync.json in the working directory)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose output (use -vv for debug output)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge new game files into the localization repository
    Pull {
        /// Merge into the working tree without committing the result
        #[arg(long)]
        no_commit: bool,
    },

    /// Synchronize the repository with its remote (fetch, merge, commit, push)
    Sync,

    /// Show the repository branch, divergence, and pending changes
    Status,

    /// Package the localization folder into a versioned release archive
    Package {
        /// Version to stamp on the archive (defaults to the newest version tag)
        #[arg(short = 'V', long)]
        version: Option<String>,

        /// Package the working tree as-is without synchronizing first
        #[arg(long)]
        skip_sync: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let settings = Settings::load(cli.config.as_deref().map(Path::new))?;

    match cli.command {
        Commands::Pull { no_commit } => pull_command(&settings, no_commit)?,
        Commands::Sync => sync_command(&settings)?,
        Commands::Status => status_command(&settings)?,
        Commands::Package { version, skip_sync } => package_command(&settings, version, skip_sync)?,
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbose {
        0 => EnvFilter::new("locsync=warn"),
        1 => EnvFilter::new("locsync=info"),
        _ => EnvFilter::new("locsync=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn open_manager(settings: &Settings) -> Result<RepositoryManager> {
    let root = settings.repository_root()?;
    RepositoryManager::open(&root, settings.token()).context("failed to open the repository")
}

fn pull_command(settings: &Settings, no_commit: bool) -> Result<()> {
    let reference_root = settings.reference_root()?;
    let manager = open_manager(settings)?;
    let destination = manager.localization_dir();

    println!(
        "Merging game files from {} into {}",
        reference_root.display(),
        destination.display()
    );

    let mut anomalies = 0usize;
    let mut reconciler = Reconciler::new()
        .with_language_prefix(settings.language_prefix.clone())
        .on_progress(|progress| println!("  {}", progress.message))
        .on_anomaly(|anomaly| {
            anomalies += 1;
            eprintln!(
                "{} {}: {}",
                "warning:".yellow().bold(),
                anomaly.path.display(),
                anomaly.reason
            );
        });
    let report = reconciler.run(&reference_root, &destination)?;
    drop(reconciler);

    println!(
        "{} added {}, merged {}, examined {}",
        "Done:".green().bold(),
        report.created,
        report.merged,
        report.examined
    );
    if anomalies > 0 {
        println!(
            "{} {anomalies} file(s) were skipped; see warnings above",
            "Note:".yellow().bold()
        );
    }

    if no_commit {
        return Ok(());
    }
    match manager.commit_changes(RECONCILE_COMMIT_MESSAGE)? {
        Some(oid) => println!("Committed as {oid}"),
        None => println!("Nothing new to commit"),
    }
    Ok(())
}

fn sync_command(settings: &Settings) -> Result<()> {
    let manager = open_manager(settings)?;
    if let Some(name) = manager.display_name() {
        println!("Synchronizing {name}...");
    }

    let summary = manager.synchronize()?;
    match summary.merge {
        MergeOutcome::UpToDate => println!("Remote had nothing new"),
        MergeOutcome::FastForwarded(oid) => println!("Fast-forwarded to {oid}"),
        MergeOutcome::MergedCommit(oid) => println!("Merged remote changes as {oid}"),
    }
    match summary.committed {
        Some(oid) => println!("Committed local changes as {oid}"),
        None => println!("No local changes to commit"),
    }
    if summary.pushed {
        println!("{}", "Pushed to origin".green().bold());
    } else {
        println!("Nothing to push");
    }
    Ok(())
}

fn status_command(settings: &Settings) -> Result<()> {
    let manager = open_manager(settings)?;

    if let Some(name) = manager.display_name() {
        println!("Repository: {name}");
    }
    println!("Root:       {}", manager.root().display());
    println!("Branch:     {}", manager.current_branch()?);

    let (ahead, behind) = manager.divergence()?;
    println!("Divergence: {ahead} ahead, {behind} behind");

    let changed = manager.changed_paths()?;
    if changed.is_empty() {
        println!("Working tree is clean");
    } else {
        println!("Changed files:");
        for path in changed {
            println!("  {path}");
        }
    }
    Ok(())
}

fn package_command(settings: &Settings, version: Option<String>, skip_sync: bool) -> Result<()> {
    let manager = open_manager(settings)?;

    if !skip_sync {
        println!("Synchronizing before packaging...");
        manager.synchronize()?;
    }

    let version = match version {
        Some(version) => version,
        None => latest_release_version(&manager)?,
    };
    let archive = package_localization(&manager, &version)?;
    println!("{} {}", "Packaged:".green().bold(), archive.display());
    Ok(())
}
