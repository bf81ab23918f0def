//! Task domain model.
//!
//! A task is one end-to-end generation run across an ordered set of
//! pages; each page produces a single image from a prompt.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One unit of work: a single image generated from a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number within the task.
    pub index: u32,
    /// The image prompt for this page.
    pub prompt: String,
    /// Per-page aspect ratio override (e.g. "3:4", "16:9").
    #[serde(default)]
    pub aspect_ratio: Option<String>,
}

impl Page {
    /// Creates a page with no aspect ratio override.
    pub fn new(index: u32, prompt: impl Into<String>) -> Self {
        Self {
            index,
            prompt: prompt.into(),
            aspect_ratio: None,
        }
    }
}

/// A full image generation request: the ordered pages plus the shared
/// context that biases every page of the run.
///
/// Owned exclusively by one orchestration run; once generation starts
/// all mutation goes through the task state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationTask {
    /// Opaque task identifier, caller-supplied or generated.
    pub task_id: String,
    /// Ordered pages to generate.
    pub pages: Vec<Page>,
    /// The full outline text the pages were derived from.
    #[serde(default)]
    pub full_outline: String,
    /// The user's original topic input.
    #[serde(default)]
    pub user_topic: String,
    /// User-supplied reference images (raw bytes). When present these
    /// take priority over the cover image for every page.
    #[serde(default)]
    pub user_images: Vec<Vec<u8>>,
    /// Opt-in bounded worker pool for pages after the first.
    #[serde(default)]
    pub high_concurrency: bool,
}

impl GenerationTask {
    /// Creates a task over the given pages with a generated id.
    pub fn new(pages: Vec<Page>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            pages,
            full_outline: String::new(),
            user_topic: String::new(),
            user_images: Vec::new(),
            high_concurrency: false,
        }
    }

    /// Overrides the task id after construction.
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    /// Attaches user-supplied reference images.
    pub fn with_user_images(mut self, images: Vec<Vec<u8>>) -> Self {
        self.user_images = images;
        self
    }

    /// Enables the bounded worker pool for this task.
    pub fn with_high_concurrency(mut self, enabled: bool) -> Self {
        self.high_concurrency = enabled;
        self
    }
}
