use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Find comparable M&A transactions for a company profile", long_about = None)]
pub struct Args {
    /// Directory for config, caches and the feedback log.
    /// Defaults to $DEALMATCH_BASE_PATH or ~/.local/share/dealmatch
    #[clap(long, global = true)]
    pub base_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CatalogArgs {
    /// CSV export of the transaction database
    #[clap(short, long)]
    pub catalog: PathBuf,

    /// Don't fetch website text for records that have none stored
    #[clap(long, default_value = "false")]
    pub no_scrape: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct QueryArgs {
    /// Company profile to match. Prompted for if omitted
    pub query: Option<String>,

    /// Read the company profile from a file
    #[clap(long, conflicts_with = "query")]
    pub query_file: Option<PathBuf>,

    /// Number of matches (defaults to matching.top_n from config)
    #[clap(short = 'n', long)]
    pub top: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scrape websites and embed every catalog record
    Index {
        #[command(flatten)]
        catalog_args: CatalogArgs,

        /// Fetch website text again, even where some is stored
        #[clap(long, default_value = "false")]
        rescrape: bool,

        /// Drop every cached embedding and embed the whole catalog again
        #[clap(long, default_value = "false")]
        reembed: bool,

        /// Drop the cached embedding of this transaction id (repeatable)
        #[clap(long, value_name = "ID", conflicts_with = "reembed")]
        invalidate: Vec<String>,
    },

    /// Print the best matching transactions for a company profile
    Search {
        #[command(flatten)]
        catalog_args: CatalogArgs,

        #[command(flatten)]
        query_args: QueryArgs,

        /// Write matches to this CSV file instead of printing JSON
        #[clap(short, long)]
        export: Option<PathBuf>,
    },

    /// Review matches one at a time, accepting or rejecting each
    Review {
        #[command(flatten)]
        catalog_args: CatalogArgs,

        #[command(flatten)]
        query_args: QueryArgs,
    },
}
