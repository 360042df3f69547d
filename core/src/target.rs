use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::config::Workspace;
use crate::logger::Logger;

/// Allow-list applied to records during ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetFilter {
    Any,
    Only(BTreeSet<String>),
}

impl TargetFilter {
    pub fn only<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TargetFilter::Only(targets.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, target: &str) -> bool {
        match self {
            TargetFilter::Any => true,
            TargetFilter::Only(targets) => targets.contains(target),
        }
    }

    /// Configured targets win; otherwise ask the Xcode project.
    pub fn resolve(workspace: &Workspace, logger: &Logger) -> Self {
        let ingest = &workspace.config().ingest;
        if !ingest.targets.is_empty() {
            return TargetFilter::only(ingest.targets.iter().cloned());
        }

        let reason = match discover_targets(workspace.project_root()) {
            Ok(targets) if !targets.is_empty() => {
                logger.debug(&format!("Project targets: {}", targets.join(", ")));
                return TargetFilter::only(targets);
            }
            Ok(_) => "no Xcode project targets found".to_string(),
            Err(err) => format!("could not list project targets ({:#})", err),
        };

        Self::undiscovered(ingest.strict_targets, &reason, logger)
    }

    /// Filter used when no allow-list could be established.
    fn undiscovered(strict: bool, reason: &str, logger: &Logger) -> Self {
        if strict {
            logger.warn(&format!(
                "Target allow-list is empty: {}; every record will be rejected",
                reason
            ));
            TargetFilter::Only(BTreeSet::new())
        } else {
            logger.warn(&format!(
                "Target allow-list disabled: {}; keeping records for every target \
                 (set ingest.targets or ingest.strict_targets to change this)",
                reason
            ));
            TargetFilter::Any
        }
    }
}

impl fmt::Display for TargetFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetFilter::Any => write!(f, "any target"),
            TargetFilter::Only(targets) => {
                let names: Vec<&str> = targets.iter().map(String::as_str).collect();
                write!(f, "{}", names.join(", "))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProjectListing {
    project: ProjectInfo,
}

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    #[serde(default)]
    targets: Vec<String>,
}

/// Target names from `xcodebuild -list -json` output.
pub fn parse_target_list(json: &str) -> anyhow::Result<Vec<String>> {
    let listing: ProjectListing =
        serde_json::from_str(json).context("Failed to parse xcodebuild project listing")?;
    Ok(listing.project.targets)
}

pub fn find_project_file(root_dir: &Path) -> Option<PathBuf> {
    fn search_recursive(dir: &Path) -> Option<PathBuf> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
            .ok()?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        entries.sort();

        if let Some(project) = entries
            .iter()
            .find(|path| path.extension().is_some_and(|ext| ext == "xcodeproj"))
        {
            return Some(project.clone());
        }

        entries
            .iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| !name.starts_with('.') && name != "Pods")
            })
            .find_map(|path| search_recursive(path))
    }

    search_recursive(root_dir)
}

pub fn discover_targets(root_dir: &Path) -> anyhow::Result<Vec<String>> {
    let Some(project) = find_project_file(root_dir) else {
        return Ok(Vec::new());
    };

    let output = std::process::Command::new("xcodebuild")
        .args(["-list", "-json", "-project"])
        .arg(&project)
        .output()
        .with_context(|| format!("Failed to run xcodebuild for {}", project.display()))?;

    if !output.status.success() {
        anyhow::bail!(
            "xcodebuild -list failed for {}: {}",
            project.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    parse_target_list(&String::from_utf8_lossy(&output.stdout))
}
