use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Progress event streamed from the daemon to clients during indexing.
///
/// `total == 0` marks a setup/status message whose text lives in `info`;
/// `total > 0` reports `current/total` progress. `info` may be segmented by
/// ` | `, with the second segment carrying a rate such as `5.3 files/s`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProgressEvent {
    pub current: u64,
    pub total: u64,
    pub file_path: String,
    pub info: String,
}

impl ProgressEvent {
    #[must_use]
    pub fn status(info: impl Into<String>) -> Self {
        Self {
            current: 0,
            total: 0,
            file_path: String::new(),
            info: info.into(),
        }
    }

    #[must_use]
    pub fn progress(
        current: u64,
        total: u64,
        file_path: impl Into<String>,
        info: impl Into<String>,
    ) -> Self {
        Self {
            current,
            total,
            file_path: file_path.into(),
            info: info.into(),
        }
    }

    /// True when this event carries no counters, only a status line.
    #[must_use]
    pub const fn is_status(&self) -> bool {
        self.total == 0
    }

    /// Rate parsed from the info segments, if present.
    #[must_use]
    pub fn rate(&self) -> Option<f64> {
        parse_rate(&self.info)
    }
}

/// Extract the throughput rate from a segmented info string.
///
/// The rate lives in the second ` | `-delimited segment as
/// `<float> <unit>/s`; only the first whitespace-delimited token of that
/// segment is read. Missing segments or malformed numbers yield `None`.
#[must_use]
pub fn parse_rate(info: &str) -> Option<f64> {
    let segment = info.split(" | ").nth(1)?;
    let token = segment.split_whitespace().next()?;
    token.parse::<f64>().ok()
}
