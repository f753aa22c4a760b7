//! Sample commands: `omniqc add-sample`, `delete-sample`.

use anyhow::{Result, bail};
use console::style;
use omniqc::ui::icons::{CROSS, FILE_DEL, FILE_NEW};
use std::path::{Path, PathBuf};

use super::{confirm, connect};
use crate::Cli;

pub async fn cmd_add_samples(
    cli: &Cli,
    project_dir: &Path,
    project_id: i64,
    paths: &[PathBuf],
) -> Result<()> {
    let service = connect(cli, project_dir).await?;
    let uploads = service.add_samples(project_id, paths).await;

    let mut failed = 0;
    for upload in &uploads {
        match &upload.result {
            Ok(sample) => println!(
                "{}{} (sample {})",
                FILE_NEW,
                style(&sample.filename).green(),
                sample.id
            ),
            Err(e) => {
                failed += 1;
                println!("{}{}: {}", CROSS, upload.path.display(), style(e).red());
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} files could not be added", failed, uploads.len());
    }
    Ok(())
}

pub async fn cmd_delete_sample(cli: &Cli, project_dir: &Path, id: i64, yes: bool) -> Result<()> {
    let service = connect(cli, project_dir).await?;
    let sample = service.find_sample(id).await?;

    if !confirm(&format!("Delete sample \"{}\"?", sample.filename), yes) {
        println!("Delete cancelled");
        return Ok(());
    }

    let message = service.delete_sample(id).await?;
    println!("{}{}", FILE_DEL, message);
    Ok(())
}
