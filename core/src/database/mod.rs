pub mod storage;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::command::CommandRecord;
use crate::step::StepKind;
use crate::target::TargetFilter;

pub use storage::{load_database, save_database};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    RejectedTarget,
    Duplicate,
}

/// Deduplicated command records, bucketed by target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompilationDatabase {
    targets: BTreeMap<String, Vec<CommandRecord>>,
}

impl CompilationDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: CommandRecord, filter: &TargetFilter) -> InsertOutcome {
        if !filter.allows(&record.target) {
            return InsertOutcome::RejectedTarget;
        }

        let bucket = self.targets.entry(record.target.clone()).or_default();
        if bucket.iter().any(|existing| existing.is_duplicate_of(&record)) {
            return InsertOutcome::Duplicate;
        }

        bucket.push(record);
        InsertOutcome::Inserted
    }

    pub fn records(&self, target: &str) -> &[CommandRecord] {
        self.targets.get(target).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn records_of_kind<'a>(
        &'a self,
        target: &str,
        kind: StepKind,
    ) -> impl Iterator<Item = &'a CommandRecord> + 'a {
        self.records(target)
            .iter()
            .filter(move |record| record.kind() == kind)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// Targets owning at least one record of `kind`.
    pub fn targets_with_kind(&self, kind: StepKind) -> Vec<&str> {
        self.targets
            .iter()
            .filter(|(_, records)| records.iter().any(|record| record.kind() == kind))
            .map(|(target, _)| target.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.targets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record of `kind` whose input is `path`, or ends with `relative`
    /// when the log recorded paths from another checkout.
    pub fn find_by_input(
        &self,
        kind: StepKind,
        path: &Path,
        relative: Option<&Path>,
    ) -> Option<&CommandRecord> {
        let records = || {
            self.targets
                .values()
                .flatten()
                .filter(move |record| record.kind() == kind)
        };

        records()
            .find(|record| {
                record
                    .step
                    .input_path()
                    .is_some_and(|input| Path::new(input) == path)
            })
            .or_else(|| {
                let relative = relative.filter(|rel| !rel.as_os_str().is_empty())?;
                records().find(|record| {
                    record
                        .step
                        .input_path()
                        .is_some_and(|input| Path::new(input).ends_with(relative))
                })
            })
    }
}
