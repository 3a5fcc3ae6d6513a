use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod catalog;
mod cli;
mod config;
mod export;
mod scrape;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;

use config::Config;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();

    let args = cli::Args::parse();

    let base_path = app::resolve_base_path(args.base_dir)?;
    let config = Config::load_with(&base_path)?;

    // Ctrl-C stops embedding at the next batch boundary; the cache is only
    // written after a complete run.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            if cancel.swap(true, Ordering::SeqCst) {
                std::process::exit(130);
            }
            log::warn!("interrupt received, stopping after the current batch");
        })?;
    }

    let app = app::App::new(config, cancel)?;

    let result = match args.command {
        cli::Command::Index {
            catalog_args,
            rescrape,
            reembed,
            invalidate,
        } => app.index(&catalog_args, rescrape, app::Invalidate::new(reembed, invalidate)),

        cli::Command::Search {
            catalog_args,
            query_args,
            export,
        } => app.search(&catalog_args, &query_args, export.as_deref()),

        cli::Command::Review {
            catalog_args,
            query_args,
        } => app.review(&catalog_args, &query_args),
    };

    if let Err(err) = &result {
        if app::is_cancelled(err) {
            log::warn!("cancelled, cached embeddings left as they were");
            std::process::exit(130);
        }
    }
    result
}
