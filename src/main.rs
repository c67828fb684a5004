use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

mod analysis;
mod bookmarks;
mod cli;
mod config;
mod fetch;
mod links;
mod processor;
mod storage;
#[cfg(test)]
mod tests;

use bookmarks::{BackendJson, Bookmark, BookmarkCollection};
use config::Config;
use fetch::PageFetcher;
use processor::{Processor, ProgressEvent};
use storage::{BackendLocal, StorageManager};

fn base_dir(override_dir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir);
    }
    let home = homedir::my_home()
        .context("failed to resolve home directory")?
        .context("no home directory for this user")?;
    Ok(home.join(".marktopic"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();
    let base_dir = base_dir(args.base_dir)?;
    tracing::debug!("data directory: {}", base_dir.display());

    let config = Config::load_with(&base_dir)?;
    let store: Arc<dyn StorageManager> = Arc::new(BackendLocal::new(&base_dir)?);
    let collection = Arc::new(BackendJson::load(store.clone())?);

    match args.command {
        cli::Command::Add { url, title } => {
            collection.insert(Bookmark::new(url, title));
            collection.save()?;
            println!("{} bookmarks", collection.len());
        }

        cli::Command::Analyze { force, analyzer } => {
            let name = analyzer.as_deref().unwrap_or(&config.analyzer);
            let analyzer =
                analysis::build_analyzer(name, &config.analysis, &base_dir, store.clone())?;
            let fetcher = PageFetcher::new(config.fetch.clone());
            let processor = Processor::new(
                collection.clone(),
                store,
                analyzer,
                fetcher,
                config.processor.clone(),
            );

            run_analysis(processor, force)?;
        }

        cli::Command::Validate {} => {
            let summary = links::validate_links(collection.as_ref(), &config.links)?;
            println!("{} links checked, {} dead", summary.checked, summary.dead);
        }

        cli::Command::Export { output } => match output {
            Some(path) => {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                collection.export_csv(file)?;
                println!("exported {} bookmarks to {}", collection.len(), path.display());
            }
            None => collection.export_csv(std::io::stdout().lock())?,
        },

        cli::Command::List { invalid } => {
            for bmark in collection.all() {
                if invalid && bmark.is_valid {
                    continue;
                }
                let topics = bmark
                    .topics
                    .iter()
                    .map(|t| t.representation.join(" "))
                    .collect::<Vec<_>>()
                    .join("; ");
                println!(
                    "{}\t{}\t[{}]\t[{}]",
                    bmark.url,
                    bmark.title,
                    bmark.keywords.join(","),
                    topics
                );
            }
        }
    }

    Ok(())
}

/// Drives a background analysis run with a progress bar. Ctrl-C requests a
/// clean stop at the next bookmark boundary; partial results are saved.
fn run_analysis(processor: Processor, force: bool) -> anyhow::Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("stopping after the current bookmark...");
            cancel.store(true, Ordering::SeqCst);
        })?;
    }

    let (sender, receiver) = mpsc::channel::<ProgressEvent>();
    let handle = processor::spawn_analysis(processor, force, cancel, sender);

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos:>3}% {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut outcome: anyhow::Result<()> = Ok(());
    for event in receiver {
        match event {
            ProgressEvent::Progress { percent, label } => {
                bar.set_position(percent as u64);
                bar.set_message(label);
            }
            ProgressEvent::Finished(summary) => {
                bar.finish_and_clear();
                if summary.cancelled {
                    println!("cancelled: partial results saved");
                }
                println!(
                    "{} updated, {} skipped, {} failed",
                    summary.processed, summary.skipped, summary.failed
                );
            }
            ProgressEvent::Failed(message) => {
                bar.finish_and_clear();
                outcome = Err(anyhow::anyhow!(message));
            }
        }
    }

    if handle.join().is_err() {
        anyhow::bail!("analysis thread panicked");
    }
    outcome
}
