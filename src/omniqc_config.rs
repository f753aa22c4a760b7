//! Configuration file for OmniQC.
//!
//! Read from `.omniqc/omniqc.toml` in the project directory, or from an
//! explicit `--config` path. Every key is optional.
//!
//! # Configuration File Format
//!
//! ```toml
//! [analyzer]
//! program = "python"
//! script = "python/fastq_parser.py"
//! timeout_secs = 0
//!
//! [store]
//! program = "python"
//! script = "python/database.py"
//! timeout_secs = 60
//!
//! [protocol]
//! carry_partial_lines = false
//! ```
//!
//! `timeout_secs = 0` disables the timeout. Relative `script` paths are
//! resolved against the project directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = ".omniqc";
pub const CONFIG_FILE: &str = "omniqc.toml";

pub const DEFAULT_PROGRAM: &str = "python";
pub const DEFAULT_ANALYZER_SCRIPT: &str = "python/fastq_parser.py";
pub const DEFAULT_STORE_SCRIPT: &str = "python/database.py";
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 60;

/// Settings for one external tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Executable or interpreter
    #[serde(default)]
    pub program: Option<String>,
    /// Script handed to the interpreter
    #[serde(default)]
    pub script: Option<PathBuf>,
    /// Kill the process after this many seconds; 0 means never
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Analyzer stdout framing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Hold an unterminated chunk tail until the next read instead of
    /// appending it to the payload as-is
    #[serde(default)]
    pub carry_partial_lines: bool,
}

/// Parsed `omniqc.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OmniqcToml {
    #[serde(default)]
    pub analyzer: ToolConfig,
    #[serde(default)]
    pub store: ToolConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

impl OmniqcToml {
    /// Default location of the file for a project.
    pub fn path_for(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Parse configuration text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse omniqc.toml")
    }

    /// Load from `path`, or defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// The file `omniqc config init` writes: every default spelled out.
    pub fn template() -> Self {
        Self {
            analyzer: ToolConfig {
                program: Some(DEFAULT_PROGRAM.to_string()),
                script: Some(PathBuf::from(DEFAULT_ANALYZER_SCRIPT)),
                timeout_secs: Some(0),
            },
            store: ToolConfig {
                program: Some(DEFAULT_PROGRAM.to_string()),
                script: Some(PathBuf::from(DEFAULT_STORE_SCRIPT)),
                timeout_secs: Some(DEFAULT_STORE_TIMEOUT_SECS),
            },
            protocol: ProtocolConfig::default(),
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Write the template to `path`, creating parent directories.
    ///
    /// Returns `false` without touching anything if the file already exists.
    pub fn write_template(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, Self::template().to_toml_string()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(true)
    }
}
