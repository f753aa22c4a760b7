//! Project commands: `omniqc init`, `projects`, `create-project`,
//! `delete-project`.

use anyhow::{Result, bail};
use console::style;
use omniqc::service::QcService;
use omniqc::ui::icons::{CHECK, FILE_DEL};
use omniqc::ui::project_lines;
use std::path::Path;

use super::{confirm, connect, load_config};
use crate::Cli;

pub async fn cmd_init(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let service = QcService::from_config(&config);
    if !service.init().await {
        bail!(
            "Store initialization failed ({}). Run with --verbose for details.",
            config.store.display()
        );
    }
    println!("{} Store ready", CHECK);
    Ok(())
}

pub async fn cmd_projects(cli: &Cli, project_dir: &Path) -> Result<()> {
    let service = connect(cli, project_dir).await?;
    let projects = service.get_projects().await?;

    if projects.is_empty() {
        println!("No projects yet.");
        println!();
        println!("Create one with:");
        println!("  omniqc create-project <name>");
        return Ok(());
    }

    for project in &projects {
        for line in project_lines(project) {
            println!("{}", line);
        }
        println!();
    }
    Ok(())
}

pub async fn cmd_create_project(cli: &Cli, project_dir: &Path, name: &str) -> Result<()> {
    let service = connect(cli, project_dir).await?;
    let project = service.create_project(name).await?;
    println!(
        "{} Created project {} (id {})",
        CHECK,
        style(&project.name).green().bold(),
        project.id
    );
    Ok(())
}

pub async fn cmd_delete_project(cli: &Cli, project_dir: &Path, id: i64, yes: bool) -> Result<()> {
    let service = connect(cli, project_dir).await?;
    let project = service.find_project(id).await?;

    let prompt = format!(
        "Delete project \"{}\" and its {} samples?",
        project.name,
        project.samples.len()
    );
    if !confirm(&prompt, yes) {
        println!("Delete cancelled");
        return Ok(());
    }

    let message = service.delete_project(id).await?;
    println!("{}{}", FILE_DEL, message);
    Ok(())
}
