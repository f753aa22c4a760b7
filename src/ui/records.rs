//! Plain-text rendering of store records for the CLI.

use crate::ui::icons::{CHECK, FOLDER};
use chrono::{DateTime, NaiveDateTime};
use console::style;
use omniqc_common::{Project, Sample};

const STORED_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Store timestamps shown as `YYYY-MM-DD HH:MM`; anything unparseable is
/// shown as given.
pub fn format_timestamp(raw: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format("%Y-%m-%d %H:%M").to_string();
    }
    STORED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| raw.to_string())
}

pub fn sample_line(sample: &Sample) -> String {
    let status = if sample.is_pending() {
        format!("{}", style("pending").yellow())
    } else {
        format!("{}analyzed", CHECK)
    };
    format!(
        "  #{:<5} {:<32} {:<16} {}",
        sample.id,
        sample.filename,
        format_timestamp(&sample.upload_date),
        status
    )
}

/// Header line plus one line per sample.
pub fn project_lines(project: &Project) -> Vec<String> {
    let pending = project.pending_samples().len();
    let mut lines = vec![format!(
        "{}{} (id {}): {} samples, {} pending",
        FOLDER,
        style(&project.name).bold(),
        project.id,
        project.samples.len(),
        pending
    )];
    lines.extend(project.samples.iter().map(sample_line));
    lines
}
