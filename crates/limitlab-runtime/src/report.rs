//! Operator-facing rendering of run results.

use limitlab_common::constants::{GIB, KIB, MIB, SHORT_ID_LEN};
use limitlab_common::types::RunResult;
use serde::Serialize;

/// Formats a byte count with the largest binary unit it reaches
/// (e.g. `"32.00 MiB"`). Below one KiB the exact count is printed.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Abbreviates a container ID to its first twelve characters.
#[must_use]
pub fn short_id(id: &str) -> &str {
    id.char_indices()
        .nth(SHORT_ID_LEN)
        .map_or(id, |(end, _)| &id[..end])
}

/// One-line summary: `"{label} container({short id}) exit={code}"`.
#[must_use]
pub fn summary_line(label: &str, result: &RunResult) -> String {
    format!(
        "{label} container({}) exit={}",
        short_id(result.container_id.as_str()),
        result.status_code
    )
}

/// Logs the summary line and then the captured log block, if any.
pub fn log_run_result(label: &str, result: &RunResult) {
    tracing::info!("{}", summary_line(label, result));
    if !result.logs.is_empty() {
        tracing::info!("{label} logs:\n{}", result.logs);
    }
}

/// Serializable view of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Scenario label.
    pub label: String,
    /// Full container ID.
    pub container_id: String,
    /// Exit status.
    pub exit_code: i64,
    /// Rendered log block.
    pub logs: String,
}

impl RunSummary {
    /// Builds the summary of `result` under `label`.
    #[must_use]
    pub fn new(label: &str, result: &RunResult) -> Self {
        Self {
            label: label.to_string(),
            container_id: result.container_id.to_string(),
            exit_code: result.status_code,
            logs: result.logs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use limitlab_common::types::ContainerId;

    use super::*;

    #[test]
    fn format_bytes_boundaries() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KiB");
        assert_eq!(format_bytes(1_048_576), "1.00 MiB");
        assert_eq!(format_bytes(1_073_741_824), "1.00 GiB");
    }

    #[test]
    fn format_bytes_two_decimals() {
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(96 * MIB), "96.00 MiB");
        assert_eq!(format_bytes(5 * GIB / 2), "2.50 GiB");
    }

    #[test]
    fn short_id_truncates_long_ids() {
        let id = "0123456789abcdef0123456789abcdef";
        assert_eq!(short_id(id), "0123456789ab");
    }

    #[test]
    fn short_id_keeps_short_ids() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("0123456789ab"), "0123456789ab");
    }

    #[test]
    fn summary_line_format() {
        let result = RunResult {
            container_id: ContainerId::new("0123456789abcdef"),
            status_code: 42,
            logs: String::new(),
        };
        assert_eq!(
            summary_line("volume fill", &result),
            "volume fill container(0123456789ab) exit=42"
        );
    }

    #[test]
    fn summary_serializes_to_json() {
        let result = RunResult {
            container_id: ContainerId::new("c1"),
            status_code: 0,
            logs: "STDOUT:\nok".into(),
        };
        let json = serde_json::to_value(RunSummary::new("cpu", &result)).unwrap();
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["container_id"], "c1");
        assert_eq!(json["logs"], "STDOUT:\nok");
    }
}
