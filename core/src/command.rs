use serde::{Deserialize, Serialize};

use crate::config::IngestConfig;
use crate::error::ClassifyError;
use crate::scanner::RecordGroup;
use crate::step::StepKind;
use crate::template::{self, CapturedValue};

/// Separator between body lines in the persisted `content` field.
pub const CONTENT_SEPARATOR: &str = "\n";

/// Kind-specific fields decoded from a step header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum Step {
    CompileC {
        output_path: String,
        input_path: String,
        arch: String,
        lang: String,
    },
    CompileSwift {
        arch: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_path: Option<String>,
    },
    CompileSwiftSources {
        arch: String,
    },
    MergeSwiftModule {
        arch: String,
    },
    Ld {
        output_path: String,
        arch: String,
    },
    #[serde(rename = "CopyPNGFile")]
    CopyPngFile {
        output_path: String,
        input_path: String,
    },
    #[serde(rename = "CompileXIB")]
    CompileXib {
        input_path: String,
    },
    CodeSign {
        output_path: String,
    },
    #[serde(rename = "GenerateDSYMFile")]
    GenerateDsymFile,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::CompileC { .. } => StepKind::CompileC,
            Step::CompileSwift { .. } => StepKind::CompileSwift,
            Step::CompileSwiftSources { .. } => StepKind::CompileSwiftSources,
            Step::MergeSwiftModule { .. } => StepKind::MergeSwiftModule,
            Step::Ld { .. } => StepKind::Ld,
            Step::CopyPngFile { .. } => StepKind::CopyPngFile,
            Step::CompileXib { .. } => StepKind::CompileXib,
            Step::CodeSign { .. } => StepKind::CodeSign,
            Step::GenerateDsymFile => StepKind::GenerateDsymFile,
        }
    }

    pub fn input_path(&self) -> Option<&str> {
        match self {
            Step::CompileC { input_path, .. }
            | Step::CopyPngFile { input_path, .. }
            | Step::CompileXib { input_path } => Some(input_path),
            Step::CompileSwift { input_path, .. } => input_path.as_deref(),
            _ => None,
        }
    }

    pub fn output_path(&self) -> Option<&str> {
        match self {
            Step::CompileC { output_path, .. }
            | Step::Ld { output_path, .. }
            | Step::CopyPngFile { output_path, .. }
            | Step::CodeSign { output_path } => Some(output_path),
            _ => None,
        }
    }

    pub fn arch(&self) -> Option<&str> {
        match self {
            Step::CompileC { arch, .. }
            | Step::CompileSwift { arch, .. }
            | Step::CompileSwiftSources { arch }
            | Step::MergeSwiftModule { arch }
            | Step::Ld { arch, .. } => Some(arch),
            _ => None,
        }
    }

    pub fn lang(&self) -> Option<&str> {
        match self {
            Step::CompileC { lang, .. } => Some(lang),
            _ => None,
        }
    }

    /// Decode discriminants from whitespace-split header tokens whose count
    /// already satisfies the kind's arity.
    fn from_tokens(kind: StepKind, tokens: &[&str]) -> Self {
        let at = |idx: usize| tokens[idx].to_string();
        match kind {
            StepKind::CompileC => Step::CompileC {
                output_path: at(1),
                input_path: at(2),
                arch: at(4),
                lang: at(5),
            },
            StepKind::CompileSwift => Step::CompileSwift {
                arch: at(2),
                input_path: (tokens.len() == 7).then(|| at(3)),
            },
            StepKind::CompileSwiftSources => Step::CompileSwiftSources { arch: at(2) },
            StepKind::MergeSwiftModule => Step::MergeSwiftModule { arch: at(2) },
            StepKind::Ld => Step::Ld {
                output_path: at(1),
                arch: at(3),
            },
            StepKind::CopyPngFile => Step::CopyPngFile {
                output_path: at(1),
                input_path: at(2),
            },
            StepKind::CompileXib => Step::CompileXib { input_path: at(1) },
            StepKind::CodeSign => Step::CodeSign { output_path: at(1) },
            StepKind::GenerateDsymFile => Step::GenerateDsymFile,
        }
    }
}

/// One reusable build step captured from the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub target: String,
    pub name: String,
    #[serde(flatten)]
    pub step: Step,
    #[serde(with = "content_lines")]
    pub content: Vec<String>,
}

impl CommandRecord {
    pub fn kind(&self) -> StepKind {
        self.step.kind()
    }

    /// Same bucket, same name, same discriminants.
    pub fn is_duplicate_of(&self, other: &CommandRecord) -> bool {
        self.target == other.target && self.name == other.name && self.step == other.step
    }

    pub fn last_line(&self) -> Option<&str> {
        self.content.last().map(String::as_str)
    }

    pub fn summary(&self) -> String {
        let mut parts = vec![self.name.clone()];
        parts.extend(self.step.arch().map(str::to_string));
        parts.extend(self.step.lang().map(str::to_string));
        parts.extend(self.step.input_path().map(str::to_string));
        parts.extend(self.step.output_path().map(|out| format!("-> {}", out)));
        parts.join(" ")
    }
}

/// Decode a record group into a command record with a trimmed, untemplated body.
pub fn classify(group: &RecordGroup, config: &IngestConfig) -> Result<CommandRecord, ClassifyError> {
    let tokens: Vec<&str> = group.header.split_whitespace().collect();
    let keyword = tokens.first().copied().unwrap_or_default();
    let kind = StepKind::from_keyword(keyword)
        .ok_or_else(|| ClassifyError::UnsupportedKeyword(keyword.to_string()))?;

    let arity = kind.arity();
    if !arity.accepts(tokens.len()) {
        return Err(ClassifyError::Arity {
            kind,
            expected: arity,
            found: tokens.len(),
        });
    }

    let target = tokens
        .last()
        .map(|last| last.strip_suffix(')').unwrap_or(last))
        .filter(|target| !target.is_empty() && tokens.len() > 1)
        .ok_or(ClassifyError::MissingTarget(kind))?;

    if group.body.is_empty() {
        return Err(ClassifyError::EmptyBody(kind));
    }

    let content = match config.prefix_for(kind.trim_prefix()) {
        Some(prefix) => trim_after_prefix(&group.body, prefix),
        None => group.body.clone(),
    };

    Ok(CommandRecord {
        target: target.to_string(),
        name: kind.keyword().to_string(),
        step: Step::from_tokens(kind, &tokens),
        content,
    })
}

/// Classify then template; the captured values name file lists worth keeping.
pub fn extract(
    group: &RecordGroup,
    config: &IngestConfig,
) -> Result<(CommandRecord, Vec<CapturedValue>), ClassifyError> {
    let mut record = classify(group, config)?;
    let captured = match record.kind() {
        StepKind::GenerateDsymFile => Vec::new(),
        _ => template::apply(&mut record),
    };
    Ok((record, captured))
}

/// Keep lines up to and including the first one carrying `prefix`.
fn trim_after_prefix(body: &[String], prefix: &str) -> Vec<String> {
    match body.iter().position(|line| line.starts_with(prefix)) {
        Some(idx) => body[..=idx].to_vec(),
        None => body.to_vec(),
    }
}

mod content_lines {
    use super::CONTENT_SEPARATOR;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(lines: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&lines.join(CONTENT_SEPARATOR))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        let joined = String::deserialize(deserializer)?;
        if joined.is_empty() {
            return Ok(Vec::new());
        }
        Ok(joined.split(CONTENT_SEPARATOR).map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOOLCHAIN: &str =
        "    /Applications/Xcode.app/Contents/Developer/Toolchains/XcodeDefault.xctoolchain";

    fn group(header: &str, body: &[&str]) -> RecordGroup {
        RecordGroup {
            header: header.to_string(),
            body: body.iter().map(|line| line.to_string()).collect(),
        }
    }

    fn config() -> IngestConfig {
        IngestConfig::default()
    }

    /// Minimal well-formed header per kind plus its required token count.
    fn headers() -> Vec<(StepKind, Vec<&'static str>)> {
        vec![
            (
                StepKind::CompileC,
                vec!["CompileC", "/out/a.o", "/src/a.m", "normal", "arm64", "objective-c", "com.x.clang", "(in", "target:", "App)"],
            ),
            (
                StepKind::CompileSwiftSources,
                vec!["CompileSwiftSources", "normal", "arm64", "com.apple.xcode.tools.swift.compiler", "(in", "target:", "App)"],
            ),
            (
                StepKind::MergeSwiftModule,
                vec!["MergeSwiftModule", "normal", "arm64", "(in", "target:", "App)"],
            ),
            (
                StepKind::Ld,
                vec!["Ld", "/out/App", "normal", "arm64", "(in", "target:", "App)"],
            ),
            (
                StepKind::CompileXib,
                vec!["CompileXIB", "/src/Main.xib", "(in", "target:", "App)"],
            ),
            (
                StepKind::CopyPngFile,
                vec!["CopyPNGFile", "/out/icon.png", "/src/icon.png", "(in", "target:", "App)"],
            ),
            (
                StepKind::CodeSign,
                vec!["CodeSign", "/out/App.app", "(in", "target:", "App)"],
            ),
        ]
    }

    #[test]
    fn test_scenario_compile_c() {
        let g = group(
            "CompileC /out/a.o /src/a.m normal arm64 objective-c com.x.clang (in target: App)",
            &["    /clang -c /src/a.m -o /out/a.o"],
        );
        let (record, _) = extract(&g, &config()).unwrap();

        assert_eq!(record.kind(), StepKind::CompileC);
        assert_eq!(record.target, "App");
        assert_eq!(record.name, "CompileC");
        assert_eq!(
            record.step,
            Step::CompileC {
                output_path: "/out/a.o".to_string(),
                input_path: "/src/a.m".to_string(),
                arch: "arm64".to_string(),
                lang: "objective-c".to_string(),
            }
        );
        assert_eq!(record.content, vec!["    /clang -c $FILEPATH -o /out/a.o"]);
    }

    #[test]
    fn test_arity_boundaries() {
        for (kind, tokens) in headers() {
            let body = ["    /bin/true"];
            let exact = group(&tokens.join(" "), &body);
            let record = classify(&exact, &config()).unwrap();
            assert_eq!(record.kind(), kind);
            assert_eq!(record.target, "App");

            let mut short = tokens.clone();
            short.remove(1);
            assert!(matches!(
                classify(&group(&short.join(" "), &body), &config()),
                Err(ClassifyError::Arity { .. })
            ));

            let mut long = tokens.clone();
            long.insert(1, "extra");
            assert!(matches!(
                classify(&group(&long.join(" "), &body), &config()),
                Err(ClassifyError::Arity { .. })
            ));
        }
    }

    #[test]
    fn test_compile_swift_forms() {
        let single = classify(
            &group(
                "CompileSwift normal arm64 /src/View.swift (in target: App)",
                &["    swift -frontend"],
            ),
            &config(),
        )
        .unwrap();
        assert_eq!(single.step.input_path(), Some("/src/View.swift"));
        assert_eq!(single.step.arch(), Some("arm64"));

        let whole = classify(
            &group("CompileSwift normal arm64 (in target: App)", &["    swift -frontend"]),
            &config(),
        )
        .unwrap();
        assert_eq!(whole.step.input_path(), None);

        for header in [
            "CompileSwift normal (in target: App)",
            "CompileSwift normal arm64 /a.swift extra (in target: App)",
        ] {
            assert!(classify(&group(header, &["    swift"]), &config()).is_err());
        }
    }

    #[test]
    fn test_generate_dsym_any_arity_verbatim() {
        let body = ["    cd /src/a.m", "    dsymutil /out/App -o /out/App.dSYM"];
        let (record, captured) = extract(
            &group("GenerateDSYMFile /out/App.dSYM /out/App (in target: App)", &body),
            &config(),
        )
        .unwrap();
        assert_eq!(record.step, Step::GenerateDsymFile);
        assert_eq!(record.content, body);
        assert!(captured.is_empty());
    }

    #[test]
    fn test_unsupported_keyword() {
        let result = classify(
            &group("PhaseScriptExecution Run\\ Script (in target: App)", &["    /bin/sh"]),
            &config(),
        );
        assert_eq!(
            result,
            Err(ClassifyError::UnsupportedKeyword("PhaseScriptExecution".to_string()))
        );
    }

    #[test]
    fn test_empty_body_and_target() {
        assert_eq!(
            classify(&group("CodeSign /out/App.app (in target: App)", &[]), &config()),
            Err(ClassifyError::EmptyBody(StepKind::CodeSign))
        );
        assert_eq!(
            classify(&group("CodeSign /out/App.app (in target: )", &["    x"]), &config()),
            Err(ClassifyError::MissingTarget(StepKind::CodeSign))
        );
    }

    #[test]
    fn test_toolchain_prefix_trims_body() {
        let invocation = format!("{}/usr/bin/clang -c /src/a.m -o /out/a.o", TOOLCHAIN);
        let g = RecordGroup {
            header: "CompileC /out/a.o /src/a.m normal arm64 objective-c com.x.clang (in target: App)"
                .to_string(),
            body: vec![
                "    cd /src".to_string(),
                "    export LANG=en_US.US-ASCII".to_string(),
                invocation.clone(),
                format!("{}/usr/bin/clang --version", TOOLCHAIN),
            ],
        };
        let record = classify(&g, &config()).unwrap();
        assert_eq!(record.content.len(), 3);
        assert_eq!(record.content[2], invocation);
    }

    #[test]
    fn test_codesign_prefix_and_png_untrimmed() {
        let sign = classify(
            &group(
                "CodeSign /out/App.app (in target: App)",
                &["    export CODESIGN_ALLOCATE=x", "    /usr/bin/codesign --force /out/App.app", "    /usr/bin/codesign --verify"],
            ),
            &config(),
        )
        .unwrap();
        assert_eq!(sign.content.len(), 2);

        let png = classify(
            &group(
                "CopyPNGFile /out/icon.png /src/icon.png (in target: App)",
                &[format!("{}/copypng a", TOOLCHAIN).as_str(), "    second"],
            ),
            &config(),
        )
        .unwrap();
        assert_eq!(png.content.len(), 2);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let g = group(
            "CompileSwift normal arm64 /src/View.swift (in target: App)",
            &["    swift -frontend -filelist /tmp/x -primary-file /src/View.swift -o /obj/View.o"],
        );
        assert_eq!(extract(&g, &config()), extract(&g, &config()));
    }

    #[test]
    fn test_duplicate_detection() {
        let g = group(
            "CompileC /out/a.o /src/a.m normal arm64 objective-c com.x.clang (in target: App)",
            &["    clang"],
        );
        let a = classify(&g, &config()).unwrap();
        let mut b = a.clone();
        b.content = vec!["    different body".to_string()];
        assert!(a.is_duplicate_of(&b));

        let c = classify(
            &group(
                "CompileC /out/a.o /src/a.m normal x86_64 objective-c com.x.clang (in target: App)",
                &["    clang"],
            ),
            &config(),
        )
        .unwrap();
        assert!(!a.is_duplicate_of(&c));
    }

    #[test]
    fn test_record_json_shape() {
        let record = CommandRecord {
            target: "App".to_string(),
            name: "Ld".to_string(),
            step: Step::Ld {
                output_path: "/out/App".to_string(),
                arch: "arm64".to_string(),
            },
            content: vec!["    cd /src".to_string(), "    ld -o /out/App".to_string()],
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], "Ld");
        assert_eq!(value["target"], "App");
        assert_eq!(value["outputPath"], "/out/App");
        assert_eq!(value["arch"], "arm64");
        assert_eq!(value["content"], "    cd /src\n    ld -o /out/App");

        let restored: CommandRecord = serde_json::from_value(value).unwrap();
        assert_eq!(restored, record);
    }
}
