pub mod icons;
pub mod progress;
pub mod records;

pub use progress::{AnalysisUI, format_elapsed};
pub use records::{format_timestamp, project_lines};
