use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use takeout_mtime_core::{CancellationToken, RestoreControl, RestoreOptions, RestoreSummary};

#[derive(Parser)]
#[command(name = "takeout-mtime", version, about = "Restore capture timestamps on Google Photos Takeout exports")]
struct Cli {
    /// Directory containing the Takeout zip files
    source_dir: PathBuf,

    /// Work directory for the extracted tree and completion markers
    /// (default: <source_dir>/.takeout-mtime)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Media root folder name, replacing "Google Photos" / "Google Fotos"
    #[arg(long)]
    root_name: Option<String>,

    /// Delete the extracted tree and all markers, then extract again
    #[arg(long)]
    reset: bool,

    /// Passed through to the transfer stage; timestamps are still restored
    #[arg(long)]
    dry_run: bool,

    /// Diagnostics output (default: <work_dir>/diagnostics.jsonl)
    #[arg(long)]
    diagnostics: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
    let t_total = std::time::Instant::now();

    let token = CancellationToken::new();
    {
        let token = token.clone();
        ctrlc::set_handler(move || {
            log::warn!("Interrupt received, stopping at the next phase boundary");
            token.cancel();
        })?;
    }

    let options = RestoreOptions {
        source_dir: cli.source_dir,
        work_dir: cli.work_dir,
        root_name: cli.root_name,
        reset: cli.reset,
        dry_run: cli.dry_run,
        diagnostics: cli.diagnostics,
    };

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {prefix:>16} [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")?
            .progress_chars("=> "),
    );
    let current_stage = Mutex::new(String::new());

    let control = RestoreControl::new().with_cancel_token(token);
    let result = takeout_mtime_core::restore_with_control(&options, &control, &|stage, done, total, message| {
        if let Ok(mut current) = current_stage.lock() {
            if *current != stage {
                *current = stage.to_string();
                bar.set_prefix(stage.to_string());
            }
        }
        bar.set_length(total.max(done));
        bar.set_position(done);
        bar.set_message(message.to_string());
    });
    bar.finish_and_clear();
    let summary = result?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    eprintln!("Done in {:.2}s", t_total.elapsed().as_secs_f64());
    Ok(())
}

fn print_summary(s: &RestoreSummary) {
    println!(
        "Archives: {} found, {} extracted, {} already extracted",
        s.archives.discovered, s.archives.extracted, s.archives.skipped
    );
    println!(
        "Scanned:  {} media, {} sidecars, {} folder markers, {} root(s)",
        s.counts.media, s.counts.sidecars, s.counts.folder_markers, s.counts.roots
    );
    println!(
        "Media:    {} matched, {} updated, {} already correct, {} no sidecar, {} malformed, {} no timestamp, {} failed",
        s.media.matched,
        s.media.applied,
        s.media.unchanged,
        s.media.unmatched,
        s.media.malformed,
        s.media.no_timestamp,
        s.media.failed
    );
    for (rule, count) in &s.media.by_rule {
        println!("          {:>6} via {}", count, rule);
    }
    println!(
        "Folders:  {} updated, {} already correct, {} malformed, {} no timestamp, {} failed",
        s.folders.applied, s.folders.unchanged, s.folders.malformed, s.folders.no_timestamp, s.folders.failed
    );
    if s.media.orphan_sidecars > 0 {
        println!("Sidecars without media: {}", s.media.orphan_sidecars);
    }
    let anomalies: u64 = s.diagnostics.values().sum();
    if anomalies > 0 {
        println!("{} diagnostic line(s) in {}", anomalies, s.diagnostics_path.display());
    }
    if s.dry_run {
        println!("DRY RUN: transfer sources not handed off");
    }
    println!("Sync sources:");
    for source in &s.sync_sources {
        println!("  {}", source.display());
    }
}
