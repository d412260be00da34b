use serde::{Deserialize, Serialize};

/// Outcome of running one action, independent of whether that outcome was
/// itself "good news" for the repository (e.g. `BitmapAlreadyOngoing` is a
/// successful no-op, not a failure).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionResult {
    pub successful: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionResult {
    pub fn ok() -> Self {
        ActionResult {
            successful: true,
            message: None,
        }
    }

    pub fn ok_with_message(message: impl Into<String>) -> Self {
        ActionResult {
            successful: true,
            message: Some(message.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ActionResult {
            successful: false,
            message: Some(message.into()),
        }
    }
}

/// CPU/wall-clock stats, reported alongside the result.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStats {
    pub cpu_time_ns: u64,
    pub wall_time_ms: u64,
}

/// The full Result JSON written to `<outputFile>`:
/// `{"action":{...},"stats":{...}}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionOutput {
    pub action: ActionResult,
    pub stats: ActionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_expected_json_shape() {
        let output = ActionOutput {
            action: ActionResult::ok(),
            stats: ActionStats {
                cpu_time_ns: 1,
                wall_time_ms: 2,
            },
        };
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["action"]["successful"], true);
        assert!(value["action"].get("message").is_none());
        assert_eq!(value["stats"]["cpuTimeNs"], 1);
        assert_eq!(value["stats"]["wallTimeMs"], 2);
    }
}
