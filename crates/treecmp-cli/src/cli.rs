use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(
    name = "treecmp",
    about = "Compare two directory trees and classify every path",
    version
)]
pub struct Cli {
    /// Left-hand root directory
    pub left: PathBuf,

    /// Right-hand root directory
    pub right: PathBuf,

    /// Worker count for walking and comparing (default: available CPUs)
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Entry types to report: file,dir,symlink,device,special,all
    #[arg(long)]
    pub types: Option<String>,

    /// Follow symbolic links
    #[arg(short = 'L', long)]
    pub follow: bool,

    /// Treat equal size and mtime as identical without reading contents
    #[arg(long)]
    pub trust_mtime: bool,

    /// TOML file with comparison options; flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Expected paths per category, e.g. `lf=a.txt,b.txt` or `funny`
    #[arg(long, num_args = 1.., value_name = "KEY=PATHS")]
    pub expect: Vec<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}
