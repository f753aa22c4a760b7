//! Chunk-at-a-time decoder for the analyzer's stdout.

use tracing::{debug, trace};

/// Literal prefix of a progress line.
pub const PROGRESS_PREFIX: &str = "PROGRESS:";

/// What to do with text after the last newline of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FragmentPolicy {
    /// Each chunk is framed on its own. The trailing fragment skips line
    /// classification and, if not blank, is appended to the payload verbatim.
    /// A progress marker or payload line split across two reads is corrupted.
    #[default]
    Drop,
    /// The trailing fragment is held back and prefixed to the next chunk, so
    /// lines are classified whole regardless of read boundaries. Whatever is
    /// still held at end of stream is classified as a final line.
    Carry,
}

/// Splits raw stdout chunks into progress ticks and payload text.
///
/// The reader owns the payload accumulator; progress percentages are
/// returned to the caller for immediate forwarding and never enter the
/// payload.
#[derive(Debug, Default)]
pub struct LineProtocolReader {
    policy: FragmentPolicy,
    /// Undelimited bytes held back under `FragmentPolicy::Carry`
    held: Vec<u8>,
    payload: String,
}

impl LineProtocolReader {
    pub fn new(policy: FragmentPolicy) -> Self {
        Self {
            policy,
            held: Vec::new(),
            payload: String::new(),
        }
    }

    /// Decode one chunk, returning its progress percentages in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<u8> {
        match self.policy {
            FragmentPolicy::Drop => self.feed_dropping(chunk),
            FragmentPolicy::Carry => self.feed_carrying(chunk),
        }
    }

    fn feed_dropping(&mut self, chunk: &[u8]) -> Vec<u8> {
        let text = String::from_utf8_lossy(chunk);
        let mut percents = Vec::new();
        let mut pieces: Vec<&str> = text.split('\n').collect();
        // `split` always yields at least one piece; the last one is the fragment.
        let fragment = pieces.pop().unwrap_or_default();

        for line in pieces {
            percents.extend(self.classify(line));
        }

        if !fragment.trim().is_empty() {
            trace!(fragment, "appending unterminated chunk tail to payload");
            self.payload.push_str(fragment);
        }
        percents
    }

    fn feed_carrying(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.held.extend_from_slice(chunk);
        let mut percents = Vec::new();
        while let Some(pos) = self.held.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.held.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            percents.extend(self.classify(&line));
        }
        percents
    }

    /// Flush held text at end of stream. A no-op under `FragmentPolicy::Drop`.
    pub fn finish(&mut self) -> Vec<u8> {
        if self.held.is_empty() {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.held);
        let line = String::from_utf8_lossy(&rest).into_owned();
        self.classify(&line).into_iter().collect()
    }

    /// Route one whole line: a progress percentage is returned, payload text
    /// is accumulated.
    fn classify(&mut self, line: &str) -> Option<u8> {
        if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
            let percent = parse_percent(rest);
            if percent.is_none() {
                debug!(line, "ignoring progress line without a number");
            }
            return percent;
        }

        let trimmed = line.trim();
        if !trimmed.is_empty() {
            self.payload.push_str(trimmed);
        }
        None
    }

    /// Payload text accumulated so far.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn into_payload(self) -> String {
        self.payload
    }
}

/// Parse the leading integer of a progress remainder, clamped to 100.
///
/// Leading whitespace is skipped and trailing garbage ignored, so
/// `" 55 "` and `"55%"` both read as 55.
pub fn parse_percent(raw: &str) -> Option<u8> {
    let digits: String = raw
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    let value = digits.parse::<u64>().unwrap_or(u64::MAX);
    Some(value.min(100) as u8)
}
