use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::step::{Placeholder, TrimPrefix};

pub const CONFIG_FILE_NAME: &str = "fastcompile.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_directory")]
    pub directory: String,
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_toolchain_prefix")]
    pub toolchain_prefix: String,
    #[serde(default = "default_codesign_prefix")]
    pub codesign_prefix: String,
    /// Explicit target allow-list; empty means ask the project.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Reject every record when no allow-list can be established.
    #[serde(default)]
    pub strict_targets: bool,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_shell")]
    pub shell: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Run merge, link and sign phases even when a compile step failed.
    #[serde(default = "default_true")]
    pub link_after_failure: bool,
    /// Fail a step that wrote to stderr even when it exited cleanly.
    #[serde(default = "default_true")]
    pub fail_on_stderr: bool,
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
    #[serde(default)]
    pub default_target: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub verbose: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_directory(),
            database_file: default_database_file(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            toolchain_prefix: default_toolchain_prefix(),
            codesign_prefix: default_codesign_prefix(),
            targets: Vec::new(),
            strict_targets: false,
            chunk_size: default_chunk_size(),
            shell: default_shell(),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            link_after_failure: true,
            fail_on_stderr: true,
            step_timeout_secs: None,
            default_target: None,
        }
    }
}

impl IngestConfig {
    pub fn prefix_for(&self, trim: TrimPrefix) -> Option<&str> {
        match trim {
            TrimPrefix::Toolchain => Some(&self.toolchain_prefix),
            TrimPrefix::Codesign => Some(&self.codesign_prefix),
            TrimPrefix::None => None,
        }
    }
}

fn default_cache_directory() -> String {
    ".FastCompile".to_string()
}

fn default_database_file() -> String {
    "archivedCommands.json".to_string()
}

fn default_toolchain_prefix() -> String {
    "    /Applications/Xcode.app/Contents/Developer/Toolchains/XcodeDefault.xctoolchain"
        .to_string()
}

fn default_codesign_prefix() -> String {
    "    /usr/bin/codesign".to_string()
}

fn default_chunk_size() -> usize {
    40960
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = Self::expand_path(&path.as_ref().to_string_lossy());

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Global config first, then the project file on top. An explicit path
    /// replaces the project file.
    pub fn load_layered(project_root: &Path, explicit: Option<&Path>) -> anyhow::Result<Self> {
        let global_path = Self::global_path();
        let project_path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project_root.join(CONFIG_FILE_NAME));

        if !project_path.exists() {
            return Self::load_from_file(global_path);
        }

        let project = Self::load_from_file(&project_path)?;
        if !global_path.exists() {
            return Ok(project);
        }

        let global = Self::load_from_file(global_path)?;
        Ok(project.merge_with(global))
    }

    /// Fill what the project file left at its defaults from `global`.
    pub fn merge_with(mut self, global: Config) -> Self {
        if self.ingest.targets.is_empty() {
            self.ingest.targets = global.ingest.targets;
        }
        if self.replay.default_target.is_none() {
            self.replay.default_target = global.replay.default_target;
        }
        if self.replay.step_timeout_secs.is_none() {
            self.replay.step_timeout_secs = global.replay.step_timeout_secs;
        }
        self.ingest.strict_targets |= global.ingest.strict_targets;
        self.logging.verbose |= global.logging.verbose;
        self
    }

    pub fn global_path() -> PathBuf {
        Self::expand_path("~/.config/fastcompile/config.toml")
    }

    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path);
        PathBuf::from(expanded.as_ref())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

/// Locations and settings of one run, built once and passed by reference.
#[derive(Debug, Clone)]
pub struct Workspace {
    project_root: PathBuf,
    cache_dir: PathBuf,
    config: Config,
}

impl Workspace {
    pub fn new(project_root: PathBuf, config: Config) -> Self {
        let cache_dir = {
            let dir = Config::expand_path(&config.cache.directory);
            if dir.is_absolute() {
                dir
            } else {
                project_root.join(dir)
            }
        };

        Self {
            project_root,
            cache_dir,
            config,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database_path(&self) -> PathBuf {
        self.cache_dir.join(&self.config.cache.database_file)
    }

    pub fn ensure_cache_dir(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.cache_dir).with_context(|| {
            format!(
                "Failed to create cache directory: {}",
                self.cache_dir.display()
            )
        })
    }

    /// Snapshot location for a file list bound to `placeholder`, if that
    /// placeholder names one.
    pub fn file_list_path(&self, target: &str, placeholder: Placeholder) -> Option<PathBuf> {
        let suffix = match placeholder {
            Placeholder::SourceFileList => "swiftfiles",
            Placeholder::ModuleList => "swiftmodules",
            Placeholder::ObjFileList => "objfiles",
            _ => return None,
        };
        Some(self.cache_dir.join(format!("{}-{}", target, suffix)))
    }

    /// Resolve a repository-relative path against the project root.
    pub fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}
