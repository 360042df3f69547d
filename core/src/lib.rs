pub mod cli;
pub mod command;
pub mod config;
pub mod database;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod logger;
pub mod replay;
pub mod scanner;
pub mod source;
pub mod step;
pub mod target;
pub mod template;
pub mod vcs;

pub use cli::{Cli, Commands};
pub use command::{classify, extract, CommandRecord, Step};
pub use config::{Config, Workspace};
pub use database::{load_database, save_database, CompilationDatabase, InsertOutcome};
pub use error::{ClassifyError, DatabaseError};
pub use executor::{CommandExecuting, ExecutionResult, ShellExecutor};
pub use ingest::{ingest, IngestReport};
pub use logger::Logger;
pub use replay::{ReplayEngine, ReplayOptions, ReplayPlan, ReplayReport, StepOutcome};
pub use scanner::{LogScanner, RecordGroup};
pub use source::LineSource;
pub use step::{Placeholder, StepKind};
pub use target::TargetFilter;
pub use vcs::ChangedFile;
