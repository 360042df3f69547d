//! Rewrites a captured command body into a reusable template.
//!
//! Command lines in the log are single joined strings, so option handling
//! here scans text instead of lexing a shell grammar.

use std::ops::Range;

use crate::command::{CommandRecord, Step};
use crate::step::Placeholder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Reverse,
}

/// Original value removed by an option replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedValue {
    pub placeholder: Placeholder,
    pub original: String,
}

fn token_spans(line: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    for (idx, byte) in line.bytes().enumerate() {
        if byte == b' ' {
            spans.push(start..idx);
            start = idx + 1;
        }
    }
    spans.push(start..line.len());
    spans
}

/// Byte range of the token that follows `option`.
///
/// Forward scanning takes the first occurrence of the option, reverse
/// scanning the last one, so the two differ when a flag repeats (e.g. two
/// `-Xcc` or `-F` entries). Both match whole space-delimited tokens only.
pub fn option_value_range(
    line: &str,
    option: &str,
    direction: ScanDirection,
) -> Option<Range<usize>> {
    let spans = token_spans(line);
    let is_option = |idx: &usize| &line[spans[*idx].clone()] == option;

    let position = match direction {
        ScanDirection::Forward => (0..spans.len()).find(is_option),
        ScanDirection::Reverse => (0..spans.len()).rev().find(is_option),
    }?;

    let value = spans.get(position + 1)?.clone();
    if value.is_empty() {
        return None;
    }
    Some(value)
}

pub fn option_value<'a>(line: &'a str, option: &str) -> Option<&'a str> {
    option_value_range(line, option, ScanDirection::Forward).map(|range| &line[range])
}

/// Replace `flag` and its value with `replacement`.
///
/// The value runs from the flag to the space before the next token that
/// starts with `-`, or to end of line. Returns the rewritten line and the
/// removed value, or `None` when the flag or its value is absent.
pub fn replace_option(line: &str, flag: &str, replacement: &str) -> Option<(String, String)> {
    let flag_span = token_spans(line)
        .into_iter()
        .find(|span| &line[span.clone()] == flag)?;

    let bytes = line.as_bytes();
    let value_end = (flag_span.end + 1..bytes.len())
        .find(|&idx| bytes[idx] == b'-' && bytes[idx - 1] == b' ')
        .map(|idx| idx - 1)
        .unwrap_or(bytes.len());

    let value = line[flag_span.end..value_end].trim();
    if value.is_empty() {
        return None;
    }

    let mut rewritten = String::with_capacity(line.len());
    rewritten.push_str(&line[..flag_span.start]);
    rewritten.push_str(replacement);
    rewritten.push_str(&line[value_end..]);

    Some((rewritten, value.to_string()))
}

/// File name up to its first `.`, e.g. `/src/View.m` -> `View`.
pub fn file_stem(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    name.split('.').next().filter(|stem| !stem.is_empty())
}

/// Replace `stem` where it forms a file name component: after a `/` and
/// before a `.` or `~`. Tokens containing a protected literal stay intact.
fn substitute_stem(line: &str, stem: &str, placeholder: Placeholder, protected: &[&str]) -> String {
    let reference = placeholder.reference();
    let mut out = String::with_capacity(line.len());

    for (idx, span) in token_spans(line).into_iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        let token = &line[span];
        if protected.iter().any(|literal| token.contains(literal)) {
            out.push_str(token);
            continue;
        }

        let mut cursor = 0;
        for (at, _) in token.match_indices(stem) {
            if at < cursor {
                continue;
            }
            let after = at + stem.len();
            let bounded = token[..at].ends_with('/')
                && matches!(token[after..].chars().next(), Some('.') | Some('~'));
            if bounded {
                out.push_str(&token[cursor..at]);
                out.push_str(&reference);
                cursor = after;
            }
        }
        out.push_str(&token[cursor..]);
    }

    out
}

/// Swap an input path and its stem for `$FILEPATH` and `$FILENAME`.
fn substitute_input(line: &str, input_path: &str, protected: &[&str]) -> String {
    if input_path.is_empty() || !line.contains(input_path) {
        return line.to_string();
    }

    let replaced = line.replace(input_path, &Placeholder::FilePath.reference());
    match file_stem(input_path) {
        Some(stem) => substitute_stem(&replaced, stem, Placeholder::FileName, protected),
        None => replaced,
    }
}

fn substitute_literal(line: &str, literal: &str, placeholder: Placeholder) -> String {
    if literal.is_empty() || !line.contains(literal) {
        return line.to_string();
    }
    line.replace(literal, &placeholder.reference())
}

/// Rewrite `line` in place when `flag` is present, remembering the value.
fn rewrite_option(
    line: &mut String,
    flag: &str,
    replacement: &str,
    captured: Option<(Placeholder, &mut Vec<CapturedValue>)>,
) {
    if let Some((rewritten, original)) = replace_option(line, flag, replacement) {
        *line = rewritten;
        if let Some((placeholder, values)) = captured {
            values.push(CapturedValue {
                placeholder,
                original,
            });
        }
    }
}

fn whole_module_outputs() -> String {
    let objects = Placeholder::ObjectsPath.reference();
    let name = Placeholder::FileName.reference();
    format!(
        "-primary-file {file} \
         -emit-module-path {objects}/{name}~partial.swiftmodule \
         -emit-module-doc-path {objects}/{name}~partial.swiftdoc \
         -serialize-diagnostics-path {objects}/{name}.dia \
         -emit-dependencies-path {objects}/{name}.d \
         -emit-reference-dependencies-path {objects}/{name}.swiftdeps",
        file = Placeholder::FilePath.reference(),
    )
}

/// Template the final line of a step's body.
pub fn template_line(step: &Step, line: &str) -> (String, Vec<CapturedValue>) {
    let mut captured = Vec::new();

    let templated = match step {
        Step::CompileC {
            input_path,
            output_path,
            ..
        } => substitute_input(line, input_path, &[output_path.as_str()]),
        Step::CompileXib { input_path } => substitute_input(line, input_path, &[]),
        Step::CopyPngFile {
            input_path,
            output_path,
        } => {
            let line = substitute_literal(line, input_path, Placeholder::Input);
            substitute_literal(&line, output_path, Placeholder::Output)
        }
        Step::CompileSwift {
            input_path: Some(input_path),
            ..
        } => {
            let mut line = substitute_input(line, input_path, &[]);
            let source_list = format!("-filelist {}", Placeholder::SourceFileList.reference());
            rewrite_option(
                &mut line,
                "-filelist",
                &source_list,
                Some((Placeholder::SourceFileList, &mut captured)),
            );
            line
        }
        Step::CompileSwift {
            input_path: None, ..
        } => {
            let mut line = line.to_string();
            let source_list = format!("-filelist {}", Placeholder::SourceFileList.reference());
            rewrite_option(
                &mut line,
                "-filelist",
                &source_list,
                Some((Placeholder::SourceFileList, &mut captured)),
            );
            rewrite_option(
                &mut line,
                "-supplementary-output-file-map",
                &whole_module_outputs(),
                None,
            );
            let object = format!(
                "-o {}/{}.o",
                Placeholder::ObjectsPath.reference(),
                Placeholder::FileName.reference()
            );
            rewrite_option(&mut line, "-output-filelist", &object, None);
            line
        }
        Step::MergeSwiftModule { .. } => {
            let mut line = line.to_string();
            let module_list = format!("-filelist {}", Placeholder::ModuleList.reference());
            rewrite_option(
                &mut line,
                "-filelist",
                &module_list,
                Some((Placeholder::ModuleList, &mut captured)),
            );
            line
        }
        Step::Ld { .. } => {
            let mut line = line.to_string();
            let object_list = format!("-filelist {}", Placeholder::ObjFileList.reference());
            rewrite_option(
                &mut line,
                "-filelist",
                &object_list,
                Some((Placeholder::ObjFileList, &mut captured)),
            );
            line
        }
        Step::CompileSwiftSources { .. } | Step::CodeSign { .. } | Step::GenerateDsymFile => {
            line.to_string()
        }
    };

    (templated, captured)
}

/// Template a record's body in place; returns the option values it removed.
pub fn apply(record: &mut CommandRecord) -> Vec<CapturedValue> {
    let Some(last) = record.content.last_mut() else {
        return Vec::new();
    };

    let (templated, captured) = template_line(&record.step, last);
    *last = templated;
    captured
}
