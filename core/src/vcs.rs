use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::step::StepKind;

/// Status columns plus the separating space in `git status -s` output.
pub const STATUS_PREFIX_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: PathBuf,
    pub kind: StepKind,
}

impl ChangedFile {
    /// `None` when no recorded step rebuilds this kind of file.
    pub fn new(path: PathBuf) -> Option<Self> {
        let kind = StepKind::for_path(&path)?;
        Some(Self { path, kind })
    }
}

fn is_deleted(status: &str) -> bool {
    status.contains('D')
}

fn status_path(rest: &str) -> &str {
    let path = rest.rsplit(" -> ").next().unwrap_or(rest);
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
}

/// Changed, supported, non-deleted files from short-status text, made
/// absolute against `root`.
pub fn parse_status(output: &str, root: &Path) -> Vec<ChangedFile> {
    output
        .lines()
        .filter(|line| line.len() > STATUS_PREFIX_LEN)
        .filter_map(|line| {
            let status = line.get(..STATUS_PREFIX_LEN)?;
            if is_deleted(status) {
                return None;
            }
            let path = status_path(line.get(STATUS_PREFIX_LEN..)?);
            ChangedFile::new(root.join(path))
        })
        .collect()
}

pub fn modified_files(root: &Path) -> anyhow::Result<Vec<ChangedFile>> {
    let output = std::process::Command::new("git")
        .args(["status", "-s"])
        .current_dir(root)
        .output()
        .context("Failed to run git status")?;

    if !output.status.success() {
        anyhow::bail!(
            "git status failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(parse_status(&String::from_utf8_lossy(&output.stdout), root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modified_included_deleted_excluded() {
        let root = Path::new("/work");
        let files = parse_status(" M path/to/File.swift\n D path/to/Old.m\n", root);
        assert_eq!(
            files,
            vec![ChangedFile {
                path: PathBuf::from("/work/path/to/File.swift"),
                kind: StepKind::CompileSwift,
            }]
        );
    }

    #[test]
    fn test_short_and_unsupported_lines_ignored() {
        let root = Path::new("/work");
        let output = "\n?? \nM  README.md\nA  Sources/new.c\nMM Assets/icon.png\nD  gone.swift\n";
        let files = parse_status(output, root);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, PathBuf::from("/work/Sources/new.c"));
        assert_eq!(files[0].kind, StepKind::CompileC);
        assert_eq!(files[1].kind, StepKind::CopyPngFile);
    }

    #[test]
    fn test_rename_and_quoted_paths() {
        let root = Path::new("/work");
        let files = parse_status(
            "R  Old.m -> New.mm\n?? \"My Views/Main.xib\"\nRD a.m -> b.m\n",
            root,
        );
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, PathBuf::from("/work/New.mm"));
        assert_eq!(files[1].path, PathBuf::from("/work/My Views/Main.xib"));
        assert_eq!(files[1].kind, StepKind::CompileXib);
    }
}
