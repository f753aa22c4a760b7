use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "omniqc")]
#[command(version, about = "Quality control for sequencing reads")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit diagnostic logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to omniqc.toml. Defaults to .omniqc/omniqc.toml in the project directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Analyzer executable. Overrides omniqc.toml and OMNIQC_ANALYZER_CMD.
    #[arg(long, global = true)]
    pub analyzer: Option<PathBuf>,

    /// Store executable. Overrides omniqc.toml and OMNIQC_STORE_CMD.
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Analyzer timeout in seconds (0 disables it)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Prepare the store
    Init,
    /// List projects and their samples
    Projects,
    /// Create a project
    CreateProject { name: String },
    /// Register sequencing files as samples of a project
    AddSample {
        project_id: i64,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Analyze one sample
    Analyze { sample_id: i64 },
    /// Analyze every sample of a project that has no results yet
    AnalyzeAll { project_id: i64 },
    /// Delete a project and its samples
    DeleteProject {
        id: i64,
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Delete a sample
    DeleteSample {
        id: i64,
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default omniqc.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    omniqc::logging::init(cli.verbose, cli.json_logs)?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&cli, &project_dir).await?,
        Commands::Projects => cmd::cmd_projects(&cli, &project_dir).await?,
        Commands::CreateProject { name } => {
            cmd::cmd_create_project(&cli, &project_dir, name).await?
        }
        Commands::AddSample { project_id, paths } => {
            cmd::cmd_add_samples(&cli, &project_dir, *project_id, paths).await?
        }
        Commands::Analyze { sample_id } => {
            cmd::cmd_analyze(&cli, &project_dir, *sample_id).await?
        }
        Commands::AnalyzeAll { project_id } => {
            cmd::cmd_analyze_all(&cli, &project_dir, *project_id).await?
        }
        Commands::DeleteProject { id, yes } => {
            cmd::cmd_delete_project(&cli, &project_dir, *id, *yes).await?
        }
        Commands::DeleteSample { id, yes } => {
            cmd::cmd_delete_sample(&cli, &project_dir, *id, *yes).await?
        }
        Commands::Config { command } => cmd::cmd_config(&cli, &project_dir, command.clone())?,
    }

    Ok(())
}
