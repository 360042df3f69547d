use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::command::{CommandRecord, Step};
use crate::config::Workspace;
use crate::database::CompilationDatabase;
use crate::executor::CommandExecuting;
use crate::logger::Logger;
use crate::step::{Placeholder, StepKind};
use crate::template::{file_stem, option_value};
use crate::vcs::ChangedFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Run merge/link/sign for a target even after one of its compiles failed.
    pub link_after_failure: bool,
    /// Treat any stderr output from a step as a failure.
    pub fail_on_stderr: bool,
    pub dry_run: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            link_after_failure: true,
            fail_on_stderr: true,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Compile,
    Merge,
    Link,
    Sign,
}

impl Phase {
    fn kind(&self) -> Option<StepKind> {
        match self {
            Phase::Compile => None,
            Phase::Merge => Some(StepKind::MergeSwiftModule),
            Phase::Link => Some(StepKind::Ld),
            Phase::Sign => Some(StepKind::CodeSign),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanIssue {
    #[error("{}: no recorded {kind} step to rebuild it", path.display())]
    Unresolved { path: PathBuf, kind: StepKind },

    #[error("[{target}] {kind}: cannot bind ${placeholder}")]
    Unbound {
        target: String,
        kind: StepKind,
        placeholder: Placeholder,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStep {
    pub target: String,
    pub kind: StepKind,
    pub phase: Phase,
    pub file: Option<PathBuf>,
    /// Bound shell script, or the binding that could not be resolved.
    pub script: Result<String, PlanIssue>,
}

impl ReplayStep {
    pub fn label(&self) -> String {
        match &self.file {
            Some(file) => format!(
                "[{}] {} {}",
                self.target,
                self.kind,
                file.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.display().to_string())
            ),
            None => format!("[{}] {}", self.target, self.kind),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayPlan {
    pub steps: Vec<ReplayStep>,
    pub unresolved: Vec<PlanIssue>,
}

impl ReplayPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded { duration: f64 },
    Failed { reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub label: String,
    pub target: String,
    pub phase: Phase,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    pub steps: Vec<StepReport>,
    pub unresolved: Vec<PlanIssue>,
}

impl ReplayReport {
    fn count(&self, pred: impl Fn(&StepOutcome) -> bool) -> usize {
        self.steps.iter().filter(|step| pred(&step.outcome)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|outcome| matches!(outcome, StepOutcome::Succeeded { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, StepOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, StepOutcome::Skipped { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped, {} unresolved",
            self.succeeded(),
            self.failed(),
            self.skipped(),
            self.unresolved.len()
        )
    }
}

/// Quote `value` for a POSIX shell assignment.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Assignments for every placeholder the template mentions, then the template.
fn bind_script(
    record: &CommandRecord,
    content: &[String],
    bindings: &BTreeMap<Placeholder, String>,
) -> Result<String, PlanIssue> {
    let body = content.join("\n");
    let mut lines = Vec::new();

    for placeholder in referenced_placeholders(&body) {
        let value = bindings.get(&placeholder).ok_or_else(|| PlanIssue::Unbound {
            target: record.target.clone(),
            kind: record.kind(),
            placeholder,
        })?;
        lines.push(format!("{}={}", placeholder.name(), shell_quote(value)));
    }

    lines.push(body);
    Ok(lines.join("\n"))
}

const ALL_PLACEHOLDERS: [Placeholder; 8] = [
    Placeholder::FilePath,
    Placeholder::FileName,
    Placeholder::SourceFileList,
    Placeholder::ObjectsPath,
    Placeholder::Input,
    Placeholder::Output,
    Placeholder::ModuleList,
    Placeholder::ObjFileList,
];

fn referenced_placeholders(body: &str) -> Vec<Placeholder> {
    ALL_PLACEHOLDERS
        .into_iter()
        .filter(|placeholder| {
            let reference = placeholder.reference();
            body.match_indices(&reference).any(|(at, _)| {
                !body[at + reference.len()..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
            })
        })
        .collect()
}

/// Point a CompileC template borrowed from another source file at this
/// file's own object: the recorded output becomes `$OUTPUT`, bound next to it.
fn retarget_object(record: &CommandRecord, file: &Path) -> Option<(Vec<String>, String)> {
    let Step::CompileC { output_path, .. } = &record.step else {
        return None;
    };
    let recorded_in_content = record
        .content
        .iter()
        .any(|line| line.contains(output_path.as_str()));
    if output_path.is_empty() || !recorded_in_content {
        return None;
    }
    let stem = file.file_name().and_then(|name| name.to_str()).and_then(file_stem)?;

    let recorded = Path::new(output_path);
    let object = match recorded.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    };
    let object = recorded.parent()?.join(object).to_string_lossy().into_owned();

    let reference = Placeholder::Output.reference();
    let content = record
        .content
        .iter()
        .map(|line| line.replace(output_path.as_str(), &reference))
        .collect();
    Some((content, object))
}

fn objc_lang(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()? {
        "c" => Some("c"),
        "m" => Some("objective-c"),
        "mm" => Some("objective-c++"),
        _ => None,
    }
}

/// Replays recorded steps for changed files, then re-merges, relinks and
/// re-signs every target they touched.
pub struct ReplayEngine<'a, E> {
    db: &'a CompilationDatabase,
    workspace: &'a Workspace,
    executor: &'a E,
    options: ReplayOptions,
}

impl<'a, E: CommandExecuting> ReplayEngine<'a, E> {
    pub fn new(
        db: &'a CompilationDatabase,
        workspace: &'a Workspace,
        executor: &'a E,
        options: ReplayOptions,
    ) -> Self {
        Self {
            db,
            workspace,
            executor,
            options,
        }
    }

    /// Owning record for a changed file, and whether it was recorded for
    /// that very file.
    fn resolve(&self, file: &ChangedFile) -> Option<(&'a CommandRecord, bool)> {
        let relative = file.path.strip_prefix(self.workspace.project_root()).ok();
        if let Some(record) = self.db.find_by_input(file.kind, &file.path, relative) {
            return Some((record, true));
        }

        let configured = self.workspace.config().replay.default_target.as_deref();
        let owner = match configured {
            Some(target) => target,
            None => match self.db.targets_with_kind(file.kind).as_slice() {
                [only] => *only,
                _ => return None,
            },
        };

        let candidates: Vec<&CommandRecord> = self.db.records_of_kind(owner, file.kind).collect();
        let lang = objc_lang(&file.path);
        candidates
            .iter()
            .find(|record| lang.is_some() && record.step.lang() == lang)
            .or_else(|| candidates.first())
            .map(|record| (*record, false))
    }

    /// Directory the target's Swift objects land in, from its module merge.
    fn objects_dir(&self, target: &str) -> Option<String> {
        self.db
            .records_of_kind(target, StepKind::MergeSwiftModule)
            .filter_map(CommandRecord::last_line)
            .find_map(|line| {
                let module = option_value(line, "-o").or_else(|| option_value(line, "-emit-module-path"))?;
                let parent = Path::new(module).parent()?;
                Some(parent.to_string_lossy().into_owned())
            })
    }

    /// Snapshot path for a file list; `None` until ingestion has saved one.
    fn file_list(&self, target: &str, placeholder: Placeholder) -> Option<String> {
        self.workspace
            .file_list_path(target, placeholder)
            .filter(|path| path.is_file())
            .map(|path| path.to_string_lossy().into_owned())
    }

    fn compile_bindings(&self, record: &CommandRecord, file: &Path) -> BTreeMap<Placeholder, String> {
        let mut bindings = BTreeMap::new();
        let path = file.to_string_lossy().into_owned();
        let name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Some(stem) = file_stem(&name) {
            bindings.insert(Placeholder::FileName, stem.to_string());
        }

        match &record.step {
            Step::CompileSwift { .. } => {
                bindings.extend(
                    self.file_list(&record.target, Placeholder::SourceFileList)
                        .map(|list| (Placeholder::SourceFileList, list)),
                );
                bindings.extend(
                    self.objects_dir(&record.target)
                        .map(|dir| (Placeholder::ObjectsPath, dir)),
                );
            }
            Step::CopyPngFile { output_path, .. } => {
                bindings.insert(Placeholder::Input, path.clone());
                if let Some(dir) = Path::new(output_path).parent() {
                    bindings.insert(
                        Placeholder::Output,
                        dir.join(&name).to_string_lossy().into_owned(),
                    );
                }
            }
            _ => {}
        }

        bindings.insert(Placeholder::FilePath, path);
        bindings
    }

    fn phase_bindings(&self, record: &CommandRecord) -> BTreeMap<Placeholder, String> {
        let placeholder = match record.kind() {
            StepKind::MergeSwiftModule => Placeholder::ModuleList,
            StepKind::Ld => Placeholder::ObjFileList,
            _ => return BTreeMap::new(),
        };
        self.file_list(&record.target, placeholder)
            .map(|list| (placeholder, list))
            .into_iter()
            .collect()
    }

    /// Order the work for a set of changed files without running anything.
    pub fn plan(&self, changed: &[ChangedFile]) -> ReplayPlan {
        let mut plan = ReplayPlan::default();
        let mut touched: Vec<&str> = Vec::new();

        for file in changed {
            let unresolved = || PlanIssue::Unresolved {
                path: file.path.clone(),
                kind: file.kind,
            };
            let Some((record, exact)) = self.resolve(file) else {
                plan.unresolved.push(unresolved());
                continue;
            };

            let mut bindings = self.compile_bindings(record, &file.path);
            let mut content = record.content.clone();
            if !exact && record.kind() == StepKind::CompileC {
                let Some((retargeted, object)) = retarget_object(record, &file.path) else {
                    plan.unresolved.push(unresolved());
                    continue;
                };
                content = retargeted;
                bindings.insert(Placeholder::Output, object);
            }

            if !touched.contains(&record.target.as_str()) {
                touched.push(&record.target);
            }

            plan.steps.push(ReplayStep {
                target: record.target.clone(),
                kind: record.kind(),
                phase: Phase::Compile,
                file: Some(file.path.clone()),
                script: bind_script(record, &content, &bindings),
            });
        }

        for target in touched {
            for phase in [Phase::Merge, Phase::Link, Phase::Sign] {
                let Some(kind) = phase.kind() else { continue };
                for record in self.db.records_of_kind(target, kind) {
                    plan.steps.push(ReplayStep {
                        target: target.to_string(),
                        kind,
                        phase,
                        file: None,
                        script: bind_script(record, &record.content, &self.phase_bindings(record)),
                    });
                }
            }
        }

        plan
    }

    pub async fn run(&self, plan: ReplayPlan, logger: &Logger) -> ReplayReport {
        let mut report = ReplayReport {
            steps: Vec::with_capacity(plan.steps.len()),
            unresolved: plan.unresolved,
        };
        for issue in &report.unresolved {
            logger.warn(&issue.to_string());
        }

        let mut failed_targets: BTreeSet<String> = BTreeSet::new();

        for step in plan.steps {
            let label = step.label();
            let outcome = self.run_step(&step, &label, &failed_targets, logger).await;
            if matches!(outcome, StepOutcome::Failed { .. }) {
                failed_targets.insert(step.target.clone());
            }
            report.steps.push(StepReport {
                label,
                target: step.target,
                phase: step.phase,
                outcome,
            });
        }

        report
    }

    async fn run_step(
        &self,
        step: &ReplayStep,
        label: &str,
        failed_targets: &BTreeSet<String>,
        logger: &Logger,
    ) -> StepOutcome {
        if step.phase != Phase::Compile
            && !self.options.link_after_failure
            && failed_targets.contains(&step.target)
        {
            logger.warn(&format!("{} skipped after an earlier failure", label));
            return StepOutcome::Skipped {
                reason: "earlier step for this target failed".to_string(),
            };
        }

        let script = match &step.script {
            Ok(script) => script,
            Err(issue) => {
                logger.error(&issue.to_string());
                return StepOutcome::Failed {
                    reason: issue.to_string(),
                };
            }
        };

        if self.options.dry_run {
            logger.info(label);
            println!("{}\n", script);
            return StepOutcome::Skipped {
                reason: "dry run".to_string(),
            };
        }

        logger.info(label);
        match self.executor.execute(script).await {
            Ok(result) => {
                for line in &result.stderr {
                    logger.warn(line);
                }
                let stderr_failure = result
                    .stderr
                    .first()
                    .filter(|_| self.options.fail_on_stderr);
                if let (true, Some(first)) = (result.success, stderr_failure) {
                    let reason = format!("stderr: {}", first);
                    logger.error(&format!("{} failed: {}", label, reason));
                    StepOutcome::Failed { reason }
                } else if result.success {
                    logger.debug(&format!("{} finished in {:.2}s", label, result.duration));
                    StepOutcome::Succeeded {
                        duration: result.duration,
                    }
                } else {
                    let reason = result
                        .failure_reason
                        .unwrap_or_else(|| "Unknown failure".to_string());
                    logger.error(&format!("{} failed: {}", label, reason));
                    StepOutcome::Failed { reason }
                }
            }
            Err(err) => {
                logger.error(&format!("{} could not run: {:#}", label, err));
                StepOutcome::Failed {
                    reason: format!("{:#}", err),
                }
            }
        }
    }
}
