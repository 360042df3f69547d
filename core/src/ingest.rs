use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::command::extract;
use crate::config::Workspace;
use crate::database::{CompilationDatabase, InsertOutcome};
use crate::logger::Logger;
use crate::scanner::{LogScanner, RecordGroup};
use crate::source::LineSource;
use crate::step::Placeholder;
use crate::target::TargetFilter;
use crate::template::CapturedValue;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub lines: usize,
    pub groups: usize,
    pub records: usize,
    pub unsupported: usize,
    pub malformed: usize,
    pub rejected_target: usize,
    pub duplicates: usize,
    pub snapshots: Vec<PathBuf>,
}

impl IngestReport {
    pub fn summary(&self) -> String {
        format!(
            "{} records from {} steps ({} unsupported, {} malformed, {} other targets, {} duplicates)",
            self.records,
            self.groups,
            self.unsupported,
            self.malformed,
            self.rejected_target,
            self.duplicates
        )
    }
}

struct Ingestor<'a> {
    workspace: &'a Workspace,
    filter: &'a TargetFilter,
    logger: &'a Logger,
    db: CompilationDatabase,
    report: IngestReport,
    snapshotted: BTreeSet<(String, Placeholder)>,
}

impl<'a> Ingestor<'a> {
    fn accept(&mut self, group: RecordGroup) -> anyhow::Result<()> {
        self.report.groups += 1;

        let (record, captured) = match extract(&group, &self.workspace.config().ingest) {
            Ok(extracted) => extracted,
            Err(err) if err.is_malformed() => {
                self.report.malformed += 1;
                self.logger
                    .warn(&format!("Skipping malformed step: {} ({})", err, group.header));
                return Ok(());
            }
            Err(err) => {
                self.report.unsupported += 1;
                self.logger.debug(&err.to_string());
                return Ok(());
            }
        };

        let target = record.target.clone();
        let summary = record.summary();
        match self.db.insert(record, self.filter) {
            InsertOutcome::Inserted => {
                self.report.records += 1;
                self.logger.debug(&format!("[{}] {}", target, summary));
                self.snapshot(&target, &captured)?;
            }
            InsertOutcome::RejectedTarget => self.report.rejected_target += 1,
            InsertOutcome::Duplicate => self.report.duplicates += 1,
        }

        Ok(())
    }

    /// Copy the file lists a template stopped referencing, once per target.
    fn snapshot(&mut self, target: &str, captured: &[CapturedValue]) -> anyhow::Result<()> {
        for value in captured {
            let Some(destination) = self.workspace.file_list_path(target, value.placeholder) else {
                continue;
            };
            if !self
                .snapshotted
                .insert((target.to_string(), value.placeholder))
            {
                continue;
            }

            let source = self.workspace.absolute(Path::new(&value.original));
            if !source.is_file() {
                self.logger.warn(&format!(
                    "[{}] {} list {} is gone; replay will need a fresh build log",
                    target,
                    value.placeholder,
                    source.display()
                ));
                continue;
            }

            self.workspace.ensure_cache_dir()?;
            std::fs::copy(&source, &destination).with_context(|| {
                format!(
                    "Failed to snapshot {} to {}",
                    source.display(),
                    destination.display()
                )
            })?;
            self.logger.debug(&format!(
                "[{}] Saved {} as {}",
                target,
                source.display(),
                destination.display()
            ));
            self.report.snapshots.push(destination);
        }
        Ok(())
    }
}

/// Stream a build log into a fresh compilation database.
pub async fn ingest(
    source: &mut LineSource,
    workspace: &Workspace,
    filter: &TargetFilter,
    logger: &Logger,
) -> anyhow::Result<(CompilationDatabase, IngestReport)> {
    logger.info(&format!("Reading build log from {}", source.origin()));
    logger.debug(&format!("Keeping targets: {}", filter));

    let mut scanner = LogScanner::new();
    let mut ingestor = Ingestor {
        workspace,
        filter,
        logger,
        db: CompilationDatabase::new(),
        report: IngestReport::default(),
        snapshotted: BTreeSet::new(),
    };

    while let Some(line) = source.next_line().await? {
        if let Some(group) = scanner.feed(&line) {
            ingestor.accept(group)?;
        }
    }
    if let Some(group) = scanner.finish() {
        ingestor.accept(group)?;
    }

    let stats = scanner.stats();
    ingestor.report.lines = stats.lines;
    if stats.empty_groups > 0 {
        logger.debug(&format!("{} step headers had no command body", stats.empty_groups));
    }

    Ok((ingestor.db, ingestor.report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::step::StepKind;

    fn workspace(root: &Path) -> Workspace {
        Workspace::new(root.to_path_buf(), Config::default())
    }

    async fn run(log: String, workspace: &Workspace, filter: &TargetFilter) -> (CompilationDatabase, IngestReport) {
        let mut source = LineSource::from_reader(std::io::Cursor::new(log.into_bytes()), 64);
        ingest(&mut source, workspace, filter, &Logger::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_consecutive_headers_produce_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = [
            "CompileC /out/a.o /src/a.m normal arm64 objective-c com.x.clang (in target: App)",
            "CompileC /out/b.o /src/b.m normal arm64 objective-c com.x.clang (in target: App)",
            "",
        ]
        .join("\n");

        let (db, report) = run(log, &workspace(dir.path()), &TargetFilter::Any).await;
        assert!(db.is_empty());
        assert_eq!(report.groups, 0);
        assert_eq!(report.lines, 2);
    }

    #[tokio::test]
    async fn test_counts_and_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let log = [
            "CompileC /out/a.o /src/a.m normal arm64 objective-c com.x.clang (in target: App)",
            "    cd /src",
            "    /clang -c /src/a.m -o /out/a.o",
            "CompileC /out/a.o /src/a.m normal arm64 objective-c com.x.clang (in target: App)",
            "    /clang -c /src/a.m -o /out/a.o",
            "PhaseScriptExecution Run\\ Script /tmp/x.sh (in target: App)",
            "    /bin/sh -c /tmp/x.sh",
            "Ld /out/Pods normal (in target: Pods)",
            "    /clang -o /out/Pods",
            "CompileC /out/p.o /src/p.m normal arm64 objective-c com.x.clang (in target: Pods)",
            "    /clang -c /src/p.m -o /out/p.o",
        ]
        .join("\n");

        let filter = TargetFilter::only(["App"]);
        let (db, report) = run(log, &workspace(dir.path()), &filter).await;

        assert_eq!(db.len(), 1);
        assert_eq!(report.groups, 5);
        assert_eq!(report.records, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.unsupported, 1);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.rejected_target, 1);

        let record = &db.records("App")[0];
        assert_eq!(record.kind(), StepKind::CompileC);
        assert_eq!(record.last_line(), Some("    /clang -c $FILEPATH -o /out/a.o"));
    }

    #[tokio::test]
    async fn test_file_lists_are_snapshotted_once() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("App.LinkFileList");
        std::fs::write(&list, "/out/a.o\n/out/b.o\n").unwrap();

        let log = [
            "Ld /out/App.app/App normal arm64 (in target: App)".to_string(),
            format!("    /clang -arch arm64 -filelist {} -o /out/App.app/App", list.display()),
            "Ld /out/App.app/App normal x86_64 (in target: App)".to_string(),
            "    /clang -arch x86_64 -filelist /missing/list -o /out/App.app/App".to_string(),
        ]
        .join("\n");

        let ws = workspace(dir.path());
        let (db, report) = run(log, &ws, &TargetFilter::Any).await;

        assert_eq!(db.len(), 2);
        let snapshot = ws.file_list_path("App", Placeholder::ObjFileList).unwrap();
        assert_eq!(report.snapshots, vec![snapshot.clone()]);
        assert_eq!(
            std::fs::read_to_string(snapshot).unwrap(),
            "/out/a.o\n/out/b.o\n"
        );
    }
}
