//! # Rewind CLI - continuous version history for your files
//!
//! Command-line interface for the rewind daemon and its per-project
//! history stores.
//!
//! ## Usage
//! ```bash
//! # Initialize the current directory and start tracking it
//! rewind init
//!
//! # Run the daemon (usually via `rewind service install`)
//! rewind watch
//!
//! # Inspect and roll back history
//! rewind rollback src/main.rs
//! rewind rollback src/main.rs --version 3
//!
//! # Compare the working file against its previous version
//! rewind diff src/main.rs
//!
//! # Reclaim space, keeping the last 10 versions per file
//! rewind purge --keep-last 10
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rewind::control;
use rewind::engine;
use rewind::error::{Result, RewindError};
use rewind::retention::{self, PurgeStrategy};
use rewind::types::{DaemonStatus, FileVersion};
use rewind::{utils, Catalog, ContentStore, Daemon, Project, Registry};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Rewind - automatic version history for project directories
#[derive(Parser)]
#[command(name = "rewind")]
#[command(version)]
#[command(about = "Automatic, continuous file version history")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a rewind project and notify the daemon
    Init {
        /// Directory to initialize (defaults to current)
        path: Option<PathBuf>,
    },

    /// Stop tracking a project and delete its history store
    Remove {
        /// Directory to remove (defaults to current)
        path: Option<PathBuf>,

        /// Don't ask for confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Run the watcher daemon in the foreground
    Watch {
        /// Stop a running daemon instead
        #[arg(short, long)]
        stop: bool,
    },

    /// Show daemon status
    Status {
        /// Print the raw JSON payload
        #[arg(long)]
        json: bool,
    },

    /// List versions of a file, or roll it back
    Rollback {
        /// File to inspect or roll back
        file: PathBuf,

        /// Version number to roll back to
        #[arg(short = 'V', long)]
        version: Option<u32>,

        /// Resolve the target version by tag
        #[arg(short, long)]
        tag: Option<String>,

        /// Roll back to the newest version at least this old (e.g. 2h, 3d)
        #[arg(long)]
        time_ago: Option<String>,

        /// Ask before overwriting the working file
        #[arg(short, long)]
        confirm: bool,

        /// List versions as CSV
        #[arg(long, conflicts_with = "json")]
        csv: bool,

        /// List versions as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diff the working file against a stored version
    Diff {
        /// File to compare
        file: PathBuf,

        /// Version to compare against (defaults to the previous one)
        #[arg(short = 'V', long)]
        version: Option<u32>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Restore deleted files from their last snapshot
    Restore {
        /// Deleted file to restore (lists all when omitted)
        file: Option<PathBuf>,

        /// Ask before restoring
        #[arg(short, long)]
        confirm: bool,
    },

    /// Tag a version so retention never removes it
    Tag {
        /// File whose version to tag
        file: PathBuf,

        /// Tag name
        name: String,

        /// Version number to tag (defaults to latest)
        #[arg(short = 'V', long)]
        version: Option<u32>,
    },

    /// Remove old versions to free up space
    Purge {
        /// Keep the newest N versions per file
        #[arg(short, long)]
        keep_last: Option<u32>,

        /// Remove versions older than a duration (e.g. 7d, 2w, 1h)
        #[arg(short = 't', long)]
        older_than: Option<String>,

        /// Keep total size under a limit (e.g. 1GB, 500MB)
        #[arg(short = 's', long)]
        max_size: Option<String>,

        /// Show what would be removed without deleting
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Manage the background service
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
}

#[derive(Subcommand)]
enum ServiceAction {
    /// Install the user service running `rewind watch`
    Install,
    /// Uninstall the user service
    Uninstall,
    /// Start the service
    Start,
    /// Stop the service
    Stop,
    /// Show service status
    Status,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { path } => cmd_init(path),
        Commands::Remove { path, force } => cmd_remove(path, force),
        Commands::Watch { stop } => cmd_watch(stop),
        Commands::Status { json } => cmd_status(json),
        Commands::Rollback {
            file,
            version,
            tag,
            time_ago,
            confirm,
            csv,
            json,
        } => cmd_rollback(file, version, tag, time_ago, confirm, csv, json),
        Commands::Diff {
            file,
            version,
            no_color,
        } => cmd_diff(file, version, no_color),
        Commands::Restore { file, confirm } => cmd_restore(file, confirm),
        Commands::Tag {
            file,
            name,
            version,
        } => cmd_tag(file, name, version),
        Commands::Purge {
            keep_last,
            older_than,
            max_size,
            dry_run,
            force,
        } => cmd_purge(keep_last, older_than, max_size, dry_run, force),
        Commands::Service { action } => cmd_service(action),
    }
}

// ---------------------------------------------------------------------------
// init / remove / watch / status

fn cmd_init(path: Option<PathBuf>) -> Result<()> {
    let target = resolve_target_dir(path)?;

    rewind::project::init_store(&target)?;
    println!("Initialized rewind project at {}", target.display());

    // Capture the starting state of every file before the daemon
    // takes over.
    let project = Project::prepare(&target)?;
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {pos} files scanned {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    let stats = engine::scan_project_with(&project, |path, _outcome| {
        bar.inc(1);
        if let Some(name) = path.file_name() {
            bar.set_message(name.to_string_lossy().into_owned());
        }
    });
    bar.finish_and_clear();
    println!(
        "Scanned {} files ({} captured)",
        stats.total_files, stats.new_files
    );

    // The daemon has to know about the project; a scaffold nobody
    // watches would silently record nothing.
    let request = control::request("add", &target.display().to_string());
    match control::send_request(&request) {
        Ok(response) if response.success => {
            println!("{} {}", "✓".green(), response.message);
            Ok(())
        }
        Ok(response) => {
            rewind::project::delete_store(&target)?;
            Err(RewindError::ipc(format!(
                "daemon rejected the project (store rolled back): {}",
                response.message
            )))
        }
        Err(e) => {
            rewind::project::delete_store(&target)?;
            Err(RewindError::ipc(format!(
                "could not notify the rewind daemon (store rolled back): {}. Is `rewind watch` running?",
                e
            )))
        }
    }
}

fn cmd_remove(path: Option<PathBuf>, force: bool) -> Result<()> {
    let target = resolve_target_dir(path)?;

    if !force {
        let prompt = format!(
            "Are you sure you want to remove {} from rewind? (y/N): ",
            target.display()
        );
        if !prompt_yes_no(&prompt)? {
            println!("Operation cancelled.");
            return Ok(());
        }
    }

    // Best-effort: the daemon may not be running.
    let request = control::request("remove", &target.display().to_string());
    if let Err(e) = control::send_request(&request) {
        tracing::debug!(error = %e, "daemon not notified of removal");
    }

    rewind::project::delete_store(&target)?;
    println!("Removed rewind history for {}", target.display());
    Ok(())
}

fn cmd_watch(stop: bool) -> Result<()> {
    if stop {
        let response = control::send_request(&control::request("stop", ""))?;
        if response.success {
            println!("{} {}", "✓".green(), response.message);
            Ok(())
        } else {
            Err(RewindError::ipc(response.message))
        }
    } else {
        let registry = Registry::load()?;
        let daemon = Daemon::new(registry, Path::new(control::SOCKET_PATH))?;
        println!("Watch manager started. Press Ctrl+C to stop.");
        daemon.run()
    }
}

fn cmd_status(json: bool) -> Result<()> {
    let response = control::send_request(&control::request("status", ""))?;
    if !response.success {
        return Err(RewindError::ipc(response.message));
    }

    if json {
        println!("{}", response.message);
        return Ok(());
    }

    let status: DaemonStatus = serde_json::from_str(&response.message)?;
    let state = if status.is_running {
        "running".green().bold()
    } else {
        "stopped".red().bold()
    };
    println!("Daemon:   {}", state);
    if !status.uptime_duration.is_empty() {
        println!("Uptime:   {}", status.uptime_duration);
    }
    println!("Workers:  {}", status.active_workers);
    println!(
        "Events:   {}/{} queued",
        status.event_channel_size, status.event_channel_capacity
    );
    println!(
        "Watches:  {} project(s), {} directories",
        status.total_watches, status.total_watched_dirs
    );

    let cwd = std::env::current_dir()?;
    for detail in &status.watch_details {
        let marker = if cwd.starts_with(&detail.path) {
            "*".yellow().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "  {} {}  ({} dirs, {} ignore patterns)",
            marker, detail.path, detail.dir_count, detail.ignore_count
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// rollback

#[allow(clippy::too_many_arguments)]
fn cmd_rollback(
    file: PathBuf,
    version: Option<u32>,
    tag: Option<String>,
    time_ago: Option<String>,
    confirm: bool,
    csv: bool,
    json: bool,
) -> Result<()> {
    let abs = absolutize(&file)?;
    let root = require_project_root(&abs)?;
    let rel = utils::rel_slash(&abs, &root)?;
    let catalog = Catalog::open(&root)?;

    let target = if let Some(n) = version {
        Some(n)
    } else if let Some(tag_name) = tag {
        Some(catalog.version_by_tag(&rel, &tag_name)?.version_number)
    } else if let Some(age) = time_ago {
        Some(resolve_time_ago(&catalog, &rel, &age)?)
    } else {
        None
    };

    let target = match target {
        Some(target) => target,
        None => {
            // No selector: just show the history.
            return list_versions(&catalog, &rel, csv, json);
        }
    };

    if confirm {
        let latest = catalog
            .latest(&rel)?
            .ok_or_else(|| RewindError::not_found(format!("no versions for {}", rel)))?;
        let target_row = catalog.version(&rel, target)?.ok_or_else(|| {
            RewindError::not_found(format!("version {} of {}", target, rel))
        })?;
        println!(
            "Rolling back {} from version {} to version {}",
            rel, latest.version_number, target_row.version_number
        );
        println!(
            "  Current: {} ({})",
            utils::format_bytes(latest.file_size),
            latest.local_timestamp().format(rewind::types::TIMESTAMP_FORMAT)
        );
        println!(
            "  Target:  {} ({})",
            utils::format_bytes(target_row.file_size),
            target_row.local_timestamp().format(rewind::types::TIMESTAMP_FORMAT)
        );
        if !prompt_yes_no("\nContinue? [y/N]: ")? {
            println!("Rollback cancelled.");
            return Ok(());
        }
    }
    drop(catalog);

    let outcome = engine::rollback(&root, &abs, target)?;
    if let Some(saved) = outcome.saved_current_as {
        println!("{} Current state saved as version {}", "✓".green(), saved);
    }
    println!(
        "{} File restored to version {}",
        "✓".green(),
        outcome.restored_version
    );
    Ok(())
}

/// Newest version at least `age` old
fn resolve_time_ago(catalog: &Catalog, rel: &str, age: &str) -> Result<u32> {
    let age = utils::parse_duration(age)?;
    let cutoff = chrono::Utc::now()
        - chrono::Duration::from_std(age)
            .map_err(|_| RewindError::bad_state("time-ago duration out of range"))?;

    catalog
        .versions(rel)?
        .into_iter()
        .find(|row| !row.deleted && row.timestamp <= cutoff)
        .map(|row| row.version_number)
        .ok_or_else(|| {
            RewindError::not_found(format!("no version of {} older than the given age", rel))
        })
}

fn list_versions(catalog: &Catalog, rel: &str, csv: bool, json: bool) -> Result<()> {
    let rows = catalog.versions(rel)?;
    if rows.is_empty() {
        return Err(RewindError::not_found(format!("no versions for {}", rel)));
    }

    // Size delta against the previous (older) version.
    let delta = |idx: usize| -> i64 {
        if idx + 1 < rows.len() {
            rows[idx].file_size as i64 - rows[idx + 1].file_size as i64
        } else {
            0
        }
    };

    if json {
        #[derive(serde::Serialize)]
        struct VersionJson<'a> {
            version: u32,
            timestamp: String,
            timestamp_unix: i64,
            size: String,
            size_bytes: u64,
            size_diff_bytes: i64,
            hash: &'a str,
            deleted: bool,
        }
        let payload: Vec<VersionJson> = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| VersionJson {
                version: row.version_number,
                timestamp: row
                    .local_timestamp()
                    .format(rewind::types::TIMESTAMP_FORMAT)
                    .to_string(),
                timestamp_unix: row.timestamp.timestamp(),
                size: utils::format_bytes(row.file_size),
                size_bytes: row.file_size,
                size_diff_bytes: delta(idx),
                hash: &row.file_hash,
                deleted: row.deleted,
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "file_path": rel,
                "count": payload.len(),
                "versions": payload,
            }))?
        );
        return Ok(());
    }

    if csv {
        println!("version,timestamp,size_bytes,size_diff_bytes,hash,deleted");
        for (idx, row) in rows.iter().enumerate() {
            println!(
                "{},{},{},{},{},{}",
                row.version_number,
                row.local_timestamp().format(rewind::types::TIMESTAMP_FORMAT),
                row.file_size,
                delta(idx),
                row.file_hash,
                row.deleted
            );
        }
        return Ok(());
    }

    println!("Versions of {}:", rel.bold());
    println!(
        "{:<9} {:<20} {:>10} {:>10}  {}",
        "VERSION", "TIMESTAMP", "SIZE", "DELTA", "TAGS"
    );
    for (idx, row) in rows.iter().enumerate() {
        let tags = catalog
            .tags_for(rel, row.version_number)?
            .iter()
            .map(|t| t.tag_name.clone())
            .collect::<Vec<_>>()
            .join(", ");
        let d = delta(idx);
        let delta_str = if d == 0 {
            "-".to_string()
        } else if d > 0 {
            format!("+{}", utils::format_bytes(d as u64))
        } else {
            format!("-{}", utils::format_bytes(d.unsigned_abs()))
        };
        let marker = if row.deleted { " (deleted)".red().to_string() } else { String::new() };
        println!(
            "v{:<8} {:<20} {:>10} {:>10}  {}{}",
            row.version_number,
            row.local_timestamp().format(rewind::types::TIMESTAMP_FORMAT),
            utils::format_bytes(row.file_size),
            delta_str,
            tags,
            marker
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// diff / restore / tag / purge

fn cmd_diff(file: PathBuf, version: Option<u32>, no_color: bool) -> Result<()> {
    let abs = absolutize(&file)?;
    if !abs.is_file() {
        return Err(RewindError::invalid_path(&abs, "file does not exist"));
    }
    let root = require_project_root(&abs)?;
    let rel = utils::rel_slash(&abs, &root)?;
    let catalog = Catalog::open(&root)?;

    let compare = match version {
        Some(n) => catalog
            .version(&rel, n)?
            .ok_or_else(|| RewindError::not_found(format!("version {} of {}", n, rel)))?,
        None => previous_version(&catalog, &rel)?,
    };
    if compare.deleted {
        return Err(RewindError::bad_state(format!(
            "cannot diff against deleted version {}",
            compare.version_number
        )));
    }

    let store = ContentStore::new(&root);
    let old_content = std::fs::read(store.snapshot_path(&compare.storage_path))?;
    let new_content = std::fs::read(&abs)?;

    let old_label = format!("{} (v{})", rel, compare.version_number);
    let new_label = format!("{} (working)", rel);
    match rewind::diff::unified_diff(&old_content, &new_content, &old_label, &new_label, !no_color)
    {
        Some(diff) => print!("{}", diff),
        None => println!(
            "No differences between {} and version {}",
            rel, compare.version_number
        ),
    }
    Ok(())
}

/// The version just before the latest (what `diff` compares against
/// by default)
fn previous_version(catalog: &Catalog, rel: &str) -> Result<FileVersion> {
    let mut rows = catalog.versions(rel)?;
    if rows.is_empty() {
        return Err(RewindError::not_found(format!("no versions for {}", rel)));
    }
    if rows.len() < 2 {
        return Err(RewindError::bad_state(format!(
            "{} has no previous version to diff against",
            rel
        )));
    }
    Ok(rows.remove(1))
}

fn cmd_restore(file: Option<PathBuf>, confirm: bool) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let root = require_project_root(&cwd)?;

    if let Some(file) = file {
        let abs = absolutize(&file)?;
        if confirm && !prompt_yes_no(&format!("Restore {}? [y/N]: ", file.display()))? {
            println!("Restore cancelled.");
            return Ok(());
        }
        let restored = engine::restore_deleted(&root, &abs)?;
        println!(
            "Successfully restored: {} (version {})",
            file.display(),
            restored.version_number
        );
        return Ok(());
    }

    // Interactive: list deleted files and pick one.
    let deleted = {
        let catalog = Catalog::open(&root)?;
        catalog.all_deleted()?
    };
    if deleted.is_empty() {
        println!("No deleted files found.");
        return Ok(());
    }

    println!(
        "{:<4} {:<40} {:<9} {:<20} {:>10}",
        "ID", "FILE PATH", "VERSION", "DELETED", "SIZE"
    );
    for (idx, row) in deleted.iter().enumerate() {
        println!(
            "{:<4} {:<40} v{:<8} {:<20} {:>10}",
            idx + 1,
            row.file_path,
            row.version_number,
            row.local_timestamp().format(rewind::types::TIMESTAMP_FORMAT),
            utils::format_bytes(row.file_size)
        );
    }

    print!(
        "\nEnter the ID of the file to restore (1-{}), or 'q' to quit: ",
        deleted.len()
    );
    std::io::stdout().flush()?;
    let input = read_line()?;
    if input.eq_ignore_ascii_case("q") {
        println!("Restore cancelled.");
        return Ok(());
    }
    let selection: usize = input
        .parse()
        .ok()
        .filter(|n| (1..=deleted.len()).contains(n))
        .ok_or_else(|| RewindError::bad_state(format!("invalid selection: {}", input)))?;
    let chosen = &deleted[selection - 1];

    if confirm {
        let prompt = format!(
            "Restore {} (version {})? [y/N]: ",
            chosen.file_path, chosen.version_number
        );
        if !prompt_yes_no(&prompt)? {
            println!("Restore cancelled.");
            return Ok(());
        }
    }

    let abs = root.join(Path::new(&chosen.file_path));
    let restored = engine::restore_deleted(&root, &abs)?;
    println!(
        "Successfully restored: {} (version {})",
        chosen.file_path, restored.version_number
    );
    Ok(())
}

fn cmd_tag(file: PathBuf, name: String, version: Option<u32>) -> Result<()> {
    validate_tag_name(&name)?;

    let abs = absolutize(&file)?;
    let root = require_project_root(&abs)?;
    let rel = utils::rel_slash(&abs, &root)?;
    let catalog = Catalog::open(&root)?;

    let target = match version {
        Some(n) => n,
        None => {
            catalog
                .latest(&rel)?
                .ok_or_else(|| RewindError::not_found(format!("no versions for {}", rel)))?
                .version_number
        }
    };

    catalog.add_tag(&rel, target, &name)?;
    println!(
        "{} Tagged version {} of {} as '{}'",
        "✓".green(),
        target,
        rel,
        name
    );
    Ok(())
}

fn validate_tag_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(RewindError::bad_state("tag name cannot be empty"));
    }
    if name.len() > 100 {
        return Err(RewindError::bad_state("tag name too long (max 100 characters)"));
    }
    if name.contains('\n') || name.contains('\r') {
        return Err(RewindError::bad_state("tag name cannot contain newlines"));
    }
    Ok(())
}

fn cmd_purge(
    keep_last: Option<u32>,
    older_than: Option<String>,
    max_size: Option<String>,
    dry_run: bool,
    force: bool,
) -> Result<()> {
    let strategies = [keep_last.is_some(), older_than.is_some(), max_size.is_some()]
        .iter()
        .filter(|set| **set)
        .count();
    if strategies == 0 {
        return Err(RewindError::bad_state(
            "must specify one of --keep-last, --older-than, or --max-size",
        ));
    }
    if strategies > 1 {
        return Err(RewindError::bad_state(
            "can only specify one of --keep-last, --older-than, or --max-size",
        ));
    }

    let (strategy, description) = if let Some(n) = keep_last {
        (PurgeStrategy::KeepLast(n), format!("keeping last {} per file", n))
    } else if let Some(age) = older_than {
        (
            PurgeStrategy::OlderThan(utils::parse_duration(&age)?),
            format!("older than {}", age),
        )
    } else if let Some(size) = max_size {
        (
            PurgeStrategy::MaxSize(utils::parse_size(&size)?),
            format!("keeping total size under {}", size),
        )
    } else {
        unreachable!("strategy count checked above");
    };

    let cwd = std::env::current_dir()?;
    let root = require_project_root(&cwd)?;
    let catalog = Catalog::open(&root)?;

    let plan = retention::plan(&catalog, strategy)?;
    if plan.is_empty() {
        println!("No versions to purge.");
        return Ok(());
    }

    println!(
        "Found {} versions to purge, {} ({}, preserving tagged versions)",
        plan.len(),
        utils::format_bytes(plan.total_size()),
        description
    );

    if dry_run {
        for victim in &plan.victims {
            println!(
                "  would remove {} v{} ({})",
                victim.file_path,
                victim.version_number,
                utils::format_bytes(victim.file_size)
            );
        }
        println!("Dry run - no files were deleted");
        return Ok(());
    }

    if !force && !prompt_yes_no("Continue with purge? (y/N): ")? {
        println!("Purge cancelled");
        return Ok(());
    }

    let store = ContentStore::new(&root);
    let removed = retention::apply(&catalog, &store, &plan, None)?;
    println!("Successfully purged {} versions", removed);
    Ok(())
}

// ---------------------------------------------------------------------------
// service

fn cmd_service(action: ServiceAction) -> Result<()> {
    match action {
        ServiceAction::Install => service_install(),
        ServiceAction::Uninstall => service_uninstall(),
        ServiceAction::Start => service_ctl("start"),
        ServiceAction::Stop => service_ctl("stop"),
        ServiceAction::Status => service_ctl("status"),
    }
}

#[cfg(target_os = "linux")]
const SERVICE_UNIT: &str = "rewind.service";

#[cfg(target_os = "linux")]
fn service_unit_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RewindError::bad_state("could not determine the home directory"))?;
    Ok(home.join(".config/systemd/user").join(SERVICE_UNIT))
}

#[cfg(target_os = "linux")]
fn service_install() -> Result<()> {
    let exec = std::env::current_exe()?;
    let unit_path = service_unit_path()?;
    if let Some(parent) = unit_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let unit = format!(
        "[Unit]\n\
         Description=Rewind file version history daemon\n\
         After=default.target\n\n\
         [Service]\n\
         ExecStart={} watch\n\
         Restart=on-failure\n\
         RestartSec=5\n\n\
         [Install]\n\
         WantedBy=default.target\n",
        exec.display()
    );
    std::fs::write(&unit_path, unit)?;

    run_ctl(&["daemon-reload"])?;
    run_ctl(&["enable", SERVICE_UNIT])?;
    println!("{} Installed {}", "✓".green(), unit_path.display());
    println!("Start it with: rewind service start");
    Ok(())
}

#[cfg(target_os = "linux")]
fn service_uninstall() -> Result<()> {
    run_ctl(&["stop", SERVICE_UNIT]).ok();
    run_ctl(&["disable", SERVICE_UNIT]).ok();
    let unit_path = service_unit_path()?;
    if unit_path.exists() {
        std::fs::remove_file(&unit_path)?;
    }
    run_ctl(&["daemon-reload"]).ok();
    println!("{} Uninstalled {}", "✓".green(), SERVICE_UNIT);
    Ok(())
}

#[cfg(target_os = "linux")]
fn service_ctl(verb: &str) -> Result<()> {
    run_ctl(&[verb, SERVICE_UNIT])
}

#[cfg(target_os = "linux")]
fn run_ctl(args: &[&str]) -> Result<()> {
    let status = std::process::Command::new("systemctl")
        .arg("--user")
        .args(args)
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(RewindError::bad_state(format!(
            "systemctl --user {} failed",
            args.join(" ")
        )))
    }
}

#[cfg(target_os = "macos")]
const LAUNCHD_LABEL: &str = "xyz.davenicholson.rewind";

#[cfg(target_os = "macos")]
fn launchd_plist_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RewindError::bad_state("could not determine the home directory"))?;
    Ok(home
        .join("Library/LaunchAgents")
        .join(format!("{}.plist", LAUNCHD_LABEL)))
}

#[cfg(target_os = "macos")]
fn service_install() -> Result<()> {
    let exec = std::env::current_exe()?;
    let plist_path = launchd_plist_path()?;
    if let Some(parent) = plist_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let plist = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{}</string>
        <string>watch</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
</dict>
</plist>
"#,
        LAUNCHD_LABEL,
        exec.display()
    );
    std::fs::write(&plist_path, plist)?;
    println!("{} Installed {}", "✓".green(), plist_path.display());
    println!("Start it with: rewind service start");
    Ok(())
}

#[cfg(target_os = "macos")]
fn service_uninstall() -> Result<()> {
    let plist_path = launchd_plist_path()?;
    std::process::Command::new("launchctl")
        .args(["unload", &plist_path.display().to_string()])
        .status()
        .ok();
    if plist_path.exists() {
        std::fs::remove_file(&plist_path)?;
    }
    println!("{} Uninstalled {}", "✓".green(), LAUNCHD_LABEL);
    Ok(())
}

#[cfg(target_os = "macos")]
fn service_ctl(verb: &str) -> Result<()> {
    let plist_path = launchd_plist_path()?;
    let args: Vec<String> = match verb {
        "start" => vec!["load".into(), plist_path.display().to_string()],
        "stop" => vec!["unload".into(), plist_path.display().to_string()],
        _ => vec!["list".into(), LAUNCHD_LABEL.into()],
    };
    let status = std::process::Command::new("launchctl").args(&args).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(RewindError::bad_state(format!("launchctl {} failed", verb)))
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn service_install() -> Result<()> {
    Err(RewindError::bad_state(
        "service management is only supported on Linux and macOS",
    ))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn service_uninstall() -> Result<()> {
    service_install()
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn service_ctl(_verb: &str) -> Result<()> {
    service_install()
}

// ---------------------------------------------------------------------------
// helpers

/// Resolve an optional directory argument to an absolute path
fn resolve_target_dir(path: Option<PathBuf>) -> Result<PathBuf> {
    let target = match path {
        Some(path) if path != Path::new(".") => path,
        _ => std::env::current_dir()?,
    };
    if !target.is_dir() {
        return Err(RewindError::invalid_path(
            &target,
            "target directory does not exist",
        ));
    }
    Ok(target.canonicalize()?)
}

/// Absolute form of a CLI file argument
fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Nearest ancestor project root, or a `not-a-project-tree` error
fn require_project_root(path: &Path) -> Result<PathBuf> {
    rewind::project::find_project_root(path)
        .ok_or_else(|| RewindError::NotAProjectTree(path.to_path_buf()))
}

fn prompt_yes_no(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let input = read_line()?;
    let input = input.to_lowercase();
    Ok(input == "y" || input == "yes")
}

fn read_line() -> Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
