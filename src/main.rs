use anyhow::{Context, Result};
use clap::Parser;
use fastcompile_core::cli::{Commands, USAGE};
use fastcompile_core::vcs::{self, ChangedFile};
use fastcompile_core::{
    ingest, load_database, save_database, Cli, Config, LineSource, Logger, ReplayEngine,
    ReplayOptions, ShellExecutor, TargetFilter, Workspace,
};
use std::path::PathBuf;
use std::time::Duration;

async fn open_source(cli: &Cli, workspace: &Workspace) -> Result<LineSource> {
    let ingest = &workspace.config().ingest;

    if let Some(script) = &cli.script {
        return LineSource::spawn_script(
            &ingest.shell,
            script,
            workspace.project_root(),
            ingest.chunk_size,
        );
    }
    if cli.stdin {
        return Ok(LineSource::stdin(ingest.chunk_size));
    }

    let log = cli.log.as_deref().context("No build log given")?;
    LineSource::open_file(log, ingest.chunk_size).await
}

async fn run_ingest(cli: &Cli, workspace: &Workspace, logger: &Logger) -> Result<()> {
    let filter = TargetFilter::resolve(workspace, logger);
    let mut source = open_source(cli, workspace).await?;

    let (db, report) = ingest(&mut source, workspace, &filter, logger).await?;
    source.finish(logger).await?;

    logger.info(&report.summary());

    if db.is_empty() {
        logger.warn("No commands recorded; keeping the existing database");
        return Ok(());
    }

    let path = workspace.database_path();
    save_database(&path, &db)
        .with_context(|| format!("Failed to save compilation database: {}", path.display()))?;

    logger.info(&format!(
        "Saved {} commands for {} targets to {}",
        db.len(),
        db.targets().count(),
        path.display()
    ));

    Ok(())
}

fn changed_files(workspace: &Workspace, files: &[PathBuf], logger: &Logger) -> Result<Vec<ChangedFile>> {
    if files.is_empty() {
        return vcs::modified_files(workspace.project_root());
    }

    let mut changed = Vec::new();
    for file in files {
        let path = workspace.absolute(file);
        match ChangedFile::new(path) {
            Some(file) => changed.push(file),
            None => logger.warn(&format!("Ignoring unsupported file: {}", file.display())),
        }
    }
    Ok(changed)
}

async fn run_replay(
    workspace: &Workspace,
    files: &[PathBuf],
    options: ReplayOptions,
    logger: &Logger,
) -> Result<()> {
    let path = workspace.database_path();
    let db = load_database(&path)?;
    if db.is_empty() {
        anyhow::bail!(
            "No recorded commands at {}. Ingest a build log first.",
            path.display()
        );
    }

    let changed = changed_files(workspace, files, logger)?;
    if changed.is_empty() {
        logger.info("Nothing to rebuild.");
        return Ok(());
    }

    let replay = &workspace.config().replay;
    let executor = ShellExecutor::new(replay.shell.clone(), workspace.project_root().to_path_buf())
        .with_timeout(replay.step_timeout_secs.map(Duration::from_secs));

    let engine = ReplayEngine::new(&db, workspace, &executor, options);
    let plan = engine.plan(&changed);
    let report = engine.run(plan, logger).await;

    if report.is_success() {
        logger.info(&format!("Replay finished: {}", report));
    } else {
        logger.error(&format!("Replay finished: {}", report));
        std::process::exit(1);
    }

    Ok(())
}

fn show_database(workspace: &Workspace, target: Option<&str>, logger: &Logger) -> Result<()> {
    let db = load_database(&workspace.database_path())?;

    if db.is_empty() {
        logger.info("No recorded commands found.");
        return Ok(());
    }

    for name in db.targets().filter(|name| target.map_or(true, |t| t == *name)) {
        println!("{}:", name);
        for record in db.records(name) {
            println!("  {}", record.summary());
        }
    }

    Ok(())
}

fn init_config(cli: &Cli) -> Result<()> {
    let config_path = cli.source_directory().join(fastcompile_core::config::CONFIG_FILE_NAME);

    if config_path.exists() {
        anyhow::bail!(
            "{} already exists. Remove it first if you want to reinitialize.",
            config_path.display()
        );
    }

    Config::default()
        .save_to_file(&config_path)
        .context("Failed to save fastcompile.toml")?;

    println!("Created fastcompile.toml at {}", config_path.display());

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Init) = &cli.command {
        return init_config(&cli);
    }

    if cli.command.is_none() && !cli.has_log_source() {
        println!("{}", USAGE);
        return Ok(());
    }

    let project_root = cli.source_directory();
    let config = Config::load_layered(&project_root, cli.config.as_deref())?;
    let logger = Logger::new().with_verbose(cli.verbose || config.logging.verbose);
    let workspace = Workspace::new(project_root, config);

    match &cli.command {
        Some(Commands::Replay {
            files,
            dry_run,
            stop_on_failure,
            allow_stderr,
        }) => {
            let replay = &workspace.config().replay;
            let options = ReplayOptions {
                link_after_failure: replay.link_after_failure && !stop_on_failure,
                fail_on_stderr: replay.fail_on_stderr && !allow_stderr,
                dry_run: *dry_run,
            };
            run_replay(&workspace, files, options, &logger).await
        }
        Some(Commands::Show { target }) => show_database(&workspace, target.as_deref(), &logger),
        Some(Commands::Init) => Ok(()),
        None => run_ingest(&cli, &workspace, &logger).await,
    }
}
