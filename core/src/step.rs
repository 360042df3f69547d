use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StepKind {
    CompileC,
    CompileSwift,
    CompileSwiftSources,
    MergeSwiftModule,
    Ld,
    #[serde(rename = "CopyPNGFile")]
    CopyPngFile,
    #[serde(rename = "CompileXIB")]
    CompileXib,
    CodeSign,
    #[serde(rename = "GenerateDSYMFile")]
    GenerateDsymFile,
}

/// Header token count a kind accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    OneOf(usize, usize),
    Any,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::OneOf(a, b) => count == a || count == b,
            Arity::Any => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::OneOf(a, b) => write!(f, "{} or {}", a, b),
            Arity::Any => write!(f, "any"),
        }
    }
}

/// Which boilerplate prefix trims a kind's body before storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimPrefix {
    Toolchain,
    Codesign,
    None,
}

impl StepKind {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "CompileC" => Some(StepKind::CompileC),
            "CompileSwift" => Some(StepKind::CompileSwift),
            "CompileSwiftSources" => Some(StepKind::CompileSwiftSources),
            "MergeSwiftModule" => Some(StepKind::MergeSwiftModule),
            "Ld" => Some(StepKind::Ld),
            "CopyPNGFile" => Some(StepKind::CopyPngFile),
            "CompileXIB" => Some(StepKind::CompileXib),
            "CodeSign" => Some(StepKind::CodeSign),
            "GenerateDSYMFile" => Some(StepKind::GenerateDsymFile),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            StepKind::CompileC => "CompileC",
            StepKind::CompileSwift => "CompileSwift",
            StepKind::CompileSwiftSources => "CompileSwiftSources",
            StepKind::MergeSwiftModule => "MergeSwiftModule",
            StepKind::Ld => "Ld",
            StepKind::CopyPngFile => "CopyPNGFile",
            StepKind::CompileXib => "CompileXIB",
            StepKind::CodeSign => "CodeSign",
            StepKind::GenerateDsymFile => "GenerateDSYMFile",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            StepKind::CompileC => Arity::Exact(10),
            StepKind::CompileSwiftSources => Arity::Exact(7),
            StepKind::CompileSwift => Arity::OneOf(7, 6),
            StepKind::MergeSwiftModule => Arity::Exact(6),
            StepKind::Ld => Arity::Exact(7),
            StepKind::CompileXib => Arity::Exact(5),
            StepKind::CopyPngFile => Arity::Exact(6),
            StepKind::CodeSign => Arity::Exact(5),
            StepKind::GenerateDsymFile => Arity::Any,
        }
    }

    pub fn trim_prefix(&self) -> TrimPrefix {
        match self {
            StepKind::CompileC
            | StepKind::CompileSwift
            | StepKind::CompileSwiftSources
            | StepKind::MergeSwiftModule
            | StepKind::Ld => TrimPrefix::Toolchain,
            StepKind::CodeSign => TrimPrefix::Codesign,
            StepKind::CopyPngFile | StepKind::CompileXib | StepKind::GenerateDsymFile => {
                TrimPrefix::None
            }
        }
    }

    /// Step kind that recompiles a changed source file, by extension.
    pub fn for_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "swift" => Some(StepKind::CompileSwift),
            "c" | "m" | "mm" => Some(StepKind::CompileC),
            "png" => Some(StepKind::CopyPngFile),
            "xib" => Some(StepKind::CompileXib),
            _ => None,
        }
    }

    pub fn all() -> Vec<StepKind> {
        vec![
            StepKind::CompileC,
            StepKind::CompileSwift,
            StepKind::CompileSwiftSources,
            StepKind::MergeSwiftModule,
            StepKind::Ld,
            StepKind::CopyPngFile,
            StepKind::CompileXib,
            StepKind::CodeSign,
            StepKind::GenerateDsymFile,
        ]
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Placeholder {
    FilePath,
    FileName,
    SourceFileList,
    ObjectsPath,
    Input,
    Output,
    ModuleList,
    ObjFileList,
}

impl Placeholder {
    /// Shell variable name the placeholder binds.
    pub fn name(&self) -> &'static str {
        match self {
            Placeholder::FilePath => "FILEPATH",
            Placeholder::FileName => "FILENAME",
            Placeholder::SourceFileList => "SourceFileList",
            Placeholder::ObjectsPath => "ObjectsPATH",
            Placeholder::Input => "INPUT",
            Placeholder::Output => "OUTPUT",
            Placeholder::ModuleList => "ModuleList",
            Placeholder::ObjFileList => "ObjFileList",
        }
    }

    /// Reference as written into a template, e.g. `$FILEPATH`.
    pub fn reference(&self) -> String {
        format!("${}", self.name())
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
