use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::omniqc_config::{
    DEFAULT_ANALYZER_SCRIPT, DEFAULT_PROGRAM, DEFAULT_STORE_SCRIPT, DEFAULT_STORE_TIMEOUT_SECS,
    OmniqcToml, ProtocolConfig, ToolConfig,
};
use crate::process::CommandSpec;
use crate::protocol::FragmentPolicy;

pub const ENV_ANALYZER_CMD: &str = "OMNIQC_ANALYZER_CMD";
pub const ENV_STORE_CMD: &str = "OMNIQC_STORE_CMD";
pub const ENV_ANALYZER_TIMEOUT: &str = "OMNIQC_ANALYZER_TIMEOUT";

/// Values given on the command line. They win over the file and the
/// environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Analyzer executable; replaces program and script
    pub analyzer: Option<PathBuf>,
    /// Store executable; replaces program and script
    pub store: Option<PathBuf>,
    /// Analyzer timeout in seconds, 0 for none
    pub timeout_secs: Option<u64>,
}

/// Runtime configuration for OmniQC.
///
/// Layers, lowest first: built-in defaults, `omniqc.toml`, environment,
/// command line.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    /// The file that was (or would have been) read
    pub config_file: PathBuf,
    pub analyzer: CommandSpec,
    pub store: CommandSpec,
    pub analyzer_timeout: Option<Duration>,
    pub store_timeout: Option<Duration>,
    pub fragment_policy: FragmentPolicy,
}

impl Config {
    /// Load configuration for `project_dir` from the process environment.
    pub fn load(
        project_dir: &Path,
        config_file: Option<PathBuf>,
        cli: &CliOverrides,
    ) -> Result<Self> {
        Self::load_with_env(project_dir, config_file, cli, |key| std::env::var(key).ok())
    }

    /// Like `load`, with environment lookup supplied by the caller.
    pub fn load_with_env<F>(
        project_dir: &Path,
        config_file: Option<PathBuf>,
        cli: &CliOverrides,
        env: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_file = config_file.unwrap_or_else(|| OmniqcToml::path_for(&project_dir));
        let file = OmniqcToml::load_or_default(&config_file)?;

        let mut analyzer = resolve_tool(
            &file.analyzer,
            &project_dir,
            DEFAULT_ANALYZER_SCRIPT,
        );
        let mut store = resolve_tool(&file.store, &project_dir, DEFAULT_STORE_SCRIPT);
        let mut analyzer_timeout = file.analyzer.timeout_secs.unwrap_or(0);
        let store_timeout = file
            .store
            .timeout_secs
            .unwrap_or(DEFAULT_STORE_TIMEOUT_SECS);

        if let Some(cmd) = env(ENV_ANALYZER_CMD).filter(|v| !v.trim().is_empty()) {
            analyzer = CommandSpec::new(absolutize(Path::new(cmd.trim())));
        }
        if let Some(cmd) = env(ENV_STORE_CMD).filter(|v| !v.trim().is_empty()) {
            store = CommandSpec::new(absolutize(Path::new(cmd.trim())));
        }
        if let Some(raw) = env(ENV_ANALYZER_TIMEOUT) {
            analyzer_timeout = parse_timeout(ENV_ANALYZER_TIMEOUT, &raw)?;
        }

        if let Some(path) = &cli.analyzer {
            analyzer = CommandSpec::new(absolutize(path));
        }
        if let Some(path) = &cli.store {
            store = CommandSpec::new(absolutize(path));
        }
        if let Some(secs) = cli.timeout_secs {
            analyzer_timeout = secs;
        }

        let fragment_policy = if file.protocol.carry_partial_lines {
            FragmentPolicy::Carry
        } else {
            FragmentPolicy::Drop
        };

        Ok(Self {
            project_dir,
            config_file,
            analyzer,
            store,
            analyzer_timeout: seconds(analyzer_timeout),
            store_timeout: seconds(store_timeout),
            fragment_policy,
        })
    }

    /// The effective settings in file form, for `omniqc config show`.
    pub fn to_toml(&self) -> OmniqcToml {
        let tool = |spec: &CommandSpec, timeout: Option<Duration>| ToolConfig {
            program: Some(spec.program.to_string_lossy().into_owned()),
            script: spec.script.clone(),
            timeout_secs: Some(timeout.map(|t| t.as_secs()).unwrap_or(0)),
        };
        OmniqcToml {
            analyzer: tool(&self.analyzer, self.analyzer_timeout),
            store: tool(&self.store, self.store_timeout),
            protocol: ProtocolConfig {
                carry_partial_lines: self.fragment_policy == FragmentPolicy::Carry,
            },
        }
    }
}

fn resolve_tool(tool: &ToolConfig, project_dir: &Path, default_script: &str) -> CommandSpec {
    let program = match &tool.program {
        Some(program) => program.clone(),
        None => DEFAULT_PROGRAM.to_string(),
    };
    // A custom program without a script is a standalone executable.
    let script = match (&tool.program, &tool.script) {
        (_, Some(script)) => Some(script.clone()),
        (None, None) => Some(PathBuf::from(default_script)),
        (Some(_), None) => None,
    };

    let mut spec = CommandSpec::new(resolve_program(&program, project_dir));
    if let Some(script) = script {
        spec = spec.with_script(resolve_relative(&script, project_dir));
    }
    spec
}

/// Bare names like `python` are looked up on PATH; anything with a
/// separator is a path relative to the project directory.
fn resolve_program(program: &str, project_dir: &Path) -> PathBuf {
    let path = Path::new(program);
    if path.components().count() > 1 {
        resolve_relative(path, project_dir)
    } else {
        path.to_path_buf()
    }
}

fn resolve_relative(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.components().count() > 1 {
        std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
    } else {
        path.to_path_buf()
    }
}

fn parse_timeout(source: &str, raw: &str) -> Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(secs) => Ok(secs),
        Err(_) => bail!("{} must be a whole number of seconds, got {:?}", source, raw),
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
