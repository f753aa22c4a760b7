pub mod batch;
pub mod config;
pub mod errors;
pub mod job;
pub mod logging;
pub mod omniqc_config;
pub mod process;
pub mod progress;
pub mod protocol;
pub mod service;
pub mod store;
pub mod ui;

#[cfg(test)]
pub(crate) mod test_support;
