//! Events emitted by the orchestration engine.
//!
//! The engine produces a one-directional sequence of discrete events per
//! run; the transport layer serializes each one (e.g. as an SSE frame)
//! without a backchannel. The stream is implicitly terminated by channel
//! close after `TaskComplete`.

use serde::{Deserialize, Serialize};

/// A page-by-page progress event for one generation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// A page entered the generating state.
    PageStart { page: u32 },
    /// A page produced an image; `image_ref` resolves via the image store.
    PageSuccess { page: u32, image_ref: String },
    /// A page exhausted its retries.
    PageFailed { page: u32, error: String },
    /// All dispatched pages resolved. Always the final event of a run.
    TaskComplete {
        success_count: u32,
        failed_count: u32,
    },
}

/// Terminal result of a single page attempt, returned by the re-entrant
/// retry/regenerate operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageOutcome {
    /// The page now has an image.
    Success { image_ref: String },
    /// The page failed after the retry budget was spent.
    Failed { error: String },
}

impl PageOutcome {
    /// Whether the attempt produced an image.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let event = GenerationEvent::PageSuccess {
            page: 3,
            image_ref: "t1_page_003.png".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "page_success");
        assert_eq!(json["page"], 3);
        assert_eq!(json["image_ref"], "t1_page_003.png");
    }

    #[test]
    fn task_complete_carries_counts() {
        let event = GenerationEvent::TaskComplete {
            success_count: 2,
            failed_count: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_complete");
        assert_eq!(json["success_count"], 2);
        assert_eq!(json["failed_count"], 1);
    }
}
