use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use super::CompilationDatabase;
use crate::error::DatabaseError;

/// Missing file means nothing has been ingested yet.
pub fn load_database(path: &Path) -> Result<CompilationDatabase, DatabaseError> {
    if !path.exists() {
        return Ok(CompilationDatabase::new());
    }

    let content = fs::read_to_string(path).map_err(|source| DatabaseError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| DatabaseError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write to a sibling temp file, then rename it over `path`.
pub fn save_database(path: &Path, db: &CompilationDatabase) -> Result<(), DatabaseError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    fs::create_dir_all(parent).map_err(|source| DatabaseError::Io {
        path: parent.to_path_buf(),
        source,
    })?;

    let content = serde_json::to_string_pretty(db).map_err(DatabaseError::Serialize)?;

    let io_err = |source: std::io::Error| DatabaseError::Io {
        path: parent.to_path_buf(),
        source,
    };
    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(content.as_bytes()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;

    tmp.persist(path).map_err(|err| DatabaseError::Persist {
        path: path.to_path_buf(),
        source: err.error,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandRecord, Step};
    use crate::target::TargetFilter;

    fn record(target: &str, step: Step, content: &[&str]) -> CommandRecord {
        CommandRecord {
            target: target.to_string(),
            name: step.kind().keyword().to_string(),
            step,
            content: content.iter().map(|line| line.to_string()).collect(),
        }
    }

    fn fixture() -> CompilationDatabase {
        let mut db = CompilationDatabase::new();
        let records = vec![
            record(
                "App",
                Step::CompileC {
                    output_path: "/out/a.o".to_string(),
                    input_path: "/src/a.m".to_string(),
                    arch: "arm64".to_string(),
                    lang: "objective-c".to_string(),
                },
                &["    cd /src", "    /clang -c $FILEPATH -o /out/a.o"],
            ),
            record(
                "App",
                Step::Ld {
                    output_path: "/out/App.app/App".to_string(),
                    arch: "arm64".to_string(),
                },
                &["    /clang -filelist $ObjFileList -o /out/App.app/App"],
            ),
            record(
                "Widget",
                Step::CompileSwift {
                    arch: "arm64".to_string(),
                    input_path: None,
                },
                &["    /swiftc -filelist $SourceFileList"],
            ),
            record(
                "Widget",
                Step::MergeSwiftModule {
                    arch: "arm64".to_string(),
                },
                &["    /swift -frontend -merge-modules -filelist $ModuleList"],
            ),
            record(
                "Assets",
                Step::CopyPngFile {
                    output_path: "/out/icon.png".to_string(),
                    input_path: "/src/icon.png".to_string(),
                },
                &["    /copypng $INPUT $OUTPUT"],
            ),
            record(
                "Assets",
                Step::CodeSign {
                    output_path: "/out/Assets.bundle".to_string(),
                },
                &["    /usr/bin/codesign --force /out/Assets.bundle"],
            ),
            record("Assets", Step::GenerateDsymFile, &[]),
        ];
        for record in records {
            db.insert(record, &TargetFilter::Any);
        }
        db
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache/archivedCommands.json");
        let db = fixture();

        save_database(&path, &db).unwrap();
        let restored = load_database(&path).unwrap();

        assert_eq!(restored, db);
        assert_eq!(restored.targets().count(), 3);
        assert_eq!(restored.len(), 7);
    }

    #[test]
    fn test_persisted_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archivedCommands.json");
        save_database(&path, &fixture()).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let first = &value["App"][0];
        assert_eq!(first["kind"], "CompileC");
        assert_eq!(first["target"], "App");
        assert_eq!(first["outputPath"], "/out/a.o");
        assert_eq!(first["inputPath"], "/src/a.m");
        assert_eq!(
            first["content"],
            "    cd /src\n    /clang -c $FILEPATH -o /out/a.o"
        );
        assert_eq!(value["Assets"][0]["kind"], "CopyPNGFile");
    }

    #[test]
    fn test_save_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archivedCommands.json");
        fs::write(&path, "stale").unwrap();

        save_database(&path, &CompilationDatabase::new()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");

        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_database(&dir.path().join("missing.json"))
            .unwrap()
            .is_empty());

        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_database(&path),
            Err(DatabaseError::Parse { .. })
        ));
    }
}
