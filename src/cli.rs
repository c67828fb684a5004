use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Data directory (bookmarks, cache, models).
    /// Defaults to ~/.marktopic
    #[clap(long, global = true)]
    pub base_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add a bookmark to the collection
    Add {
        /// a url
        url: String,

        /// Bookmark title
        #[clap(short, long, default_value = "")]
        title: String,
    },

    /// Derive topics and keywords for bookmarks
    Analyze {
        /// Reprocess bookmarks that already carry results
        #[clap(short, long, default_value = "false")]
        force: bool,

        /// Analyzer variant (overrides the configured one)
        #[clap(long)]
        analyzer: Option<String>,
    },

    /// Probe every bookmark url and flag dead links
    Validate {},

    /// Export the collection as CSV
    Export {
        /// Output file; stdout when omitted
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Print bookmarks with their derived topics
    List {
        /// Only show bookmarks whose links failed validation
        #[clap(long, default_value = "false")]
        invalid: bool,
    },
}
