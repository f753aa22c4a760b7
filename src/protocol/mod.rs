//! Line protocol spoken by the analyzer on stdout.
//!
//! The analyzer interleaves two kinds of lines:
//!
//! - `PROGRESS:<n>` - a completion percentage for the running job
//! - anything else that is non-blank - a piece of the final JSON payload
//!
//! The reader reproduces the analyzer's framing exactly, including its
//! chunk-boundary behavior; see [`FragmentPolicy`].

mod reader;

pub use reader::{FragmentPolicy, LineProtocolReader, PROGRESS_PREFIX, parse_percent};
