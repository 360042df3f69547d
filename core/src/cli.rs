use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const USAGE: &str = "usage: fastcompile /path/to/xcodebuild.log";

#[derive(Parser, Debug)]
#[command(name = "fastcompile")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(value_name = "LOG", help = "xcodebuild log to ingest")]
    pub log: Option<PathBuf>,

    #[arg(
        long,
        value_name = "CMD",
        conflicts_with_all = ["log", "stdin"],
        help = "Shell command whose stdout is the build log"
    )]
    pub script: Option<String>,

    #[arg(long, conflicts_with = "log", help = "Read the build log from standard input")]
    pub stdin: bool,

    #[arg(
        short = 'C',
        long = "directory",
        value_name = "DIR",
        help = "Project root"
    )]
    pub source_dir: Option<PathBuf>,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Show debug output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Rebuild changed files from the recorded commands")]
    Replay {
        #[arg(long, num_args = 1.., value_name = "FILE", help = "Files to rebuild instead of git status")]
        files: Vec<PathBuf>,

        #[arg(long, help = "Print bound scripts without running them")]
        dry_run: bool,

        #[arg(long, help = "Skip merge, link and sign for targets with a failed step")]
        stop_on_failure: bool,

        #[arg(long, help = "Judge steps by exit status only, ignoring stderr output")]
        allow_stderr: bool,
    },

    #[command(about = "List recorded commands")]
    Show {
        #[arg(short, long, help = "Only this target")]
        target: Option<String>,
    },

    #[command(about = "Initialize a new fastcompile.toml configuration")]
    Init,
}

impl Cli {
    pub fn source_directory(&self) -> PathBuf {
        self.source_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Whether any build log source was named on the command line.
    pub fn has_log_source(&self) -> bool {
        self.log.is_some() || self.script.is_some() || self.stdin
    }
}
