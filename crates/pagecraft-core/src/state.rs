//! Per-task progress tracking.
//!
//! The state store is the only shared mutable resource of a run. Every
//! operation takes the lock exactly once, so a page's status transition
//! is mutually exclusive while pages of the same task may progress
//! concurrently under the worker pool.

use crate::task::{GenerationTask, Page};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Status of one page within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// Not yet dispatched.
    Pending,
    /// A provider call is in flight (or queued for one).
    Generating,
    /// Terminal: an image exists for this page.
    Success,
    /// Terminal: the retry budget was spent.
    Failed,
}

/// Mutable progress record for one task.
///
/// The page specs are retained so the re-entrant retry/regenerate
/// operations can recover prompts from just a task id.
#[derive(Debug, Clone, Default)]
pub struct TaskProgress {
    pages: BTreeMap<u32, Page>,
    status: BTreeMap<u32, PageStatus>,
    generated: BTreeMap<u32, String>,
    failed: BTreeMap<u32, String>,
    user_images: Vec<Vec<u8>>,
    cover_image: Option<Vec<u8>>,
}

/// Read-only view of a task's progress. Never carries raw image bytes;
/// callers fetch those from the image store separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStateView {
    /// Successfully generated pages, page index → image ref.
    pub generated: BTreeMap<u32, String>,
    /// Failed pages, page index → error message.
    pub failed: BTreeMap<u32, String>,
    /// Whether a cover image has been established.
    pub has_cover: bool,
}

/// Concurrent map of task id → [`TaskProgress`] with single-key atomic
/// operations.
#[derive(Clone, Default)]
pub struct TaskStateStore {
    inner: Arc<RwLock<HashMap<String, TaskProgress>>>,
}

impl TaskStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes (or resets) the progress record for a task, marking
    /// every page pending.
    pub async fn init(&self, task: &GenerationTask) {
        let mut progress = TaskProgress {
            user_images: task.user_images.clone(),
            ..TaskProgress::default()
        };
        for page in &task.pages {
            progress.pages.insert(page.index, page.clone());
            progress.status.insert(page.index, PageStatus::Pending);
        }
        self.inner
            .write()
            .await
            .insert(task.task_id.clone(), progress);
    }

    /// Whether a progress record exists for the task.
    pub async fn contains(&self, task_id: &str) -> bool {
        self.inner.read().await.contains_key(task_id)
    }

    /// Transitions a page to `Generating`, superseding any prior
    /// terminal entry so retries never accumulate duplicates.
    pub async fn mark_generating(&self, task_id: &str, page: u32) -> bool {
        let mut guard = self.inner.write().await;
        let Some(progress) = guard.get_mut(task_id) else {
            return false;
        };
        progress.generated.remove(&page);
        progress.failed.remove(&page);
        progress.status.insert(page, PageStatus::Generating);
        true
    }

    /// Records a successful page.
    pub async fn mark_success(&self, task_id: &str, page: u32, image_ref: impl Into<String>) {
        let mut guard = self.inner.write().await;
        if let Some(progress) = guard.get_mut(task_id) {
            progress.failed.remove(&page);
            progress.generated.insert(page, image_ref.into());
            progress.status.insert(page, PageStatus::Success);
        }
    }

    /// Records a failed page.
    pub async fn mark_failed(&self, task_id: &str, page: u32, error: impl Into<String>) {
        let mut guard = self.inner.write().await;
        if let Some(progress) = guard.get_mut(task_id) {
            progress.generated.remove(&page);
            progress.failed.insert(page, error.into());
            progress.status.insert(page, PageStatus::Failed);
        }
    }

    /// Sets the cover image if none has been established yet. Returns
    /// whether this call won the race.
    pub async fn set_cover(&self, task_id: &str, bytes: Vec<u8>) -> bool {
        let mut guard = self.inner.write().await;
        match guard.get_mut(task_id) {
            Some(progress) if progress.cover_image.is_none() => {
                progress.cover_image = Some(bytes);
                true
            }
            _ => false,
        }
    }

    /// Unconditionally replaces the cover image (regenerate of the
    /// first page).
    pub async fn replace_cover(&self, task_id: &str, bytes: Vec<u8>) {
        let mut guard = self.inner.write().await;
        if let Some(progress) = guard.get_mut(task_id) {
            progress.cover_image = Some(bytes);
        }
    }

    /// The task's cover image bytes, if any.
    pub async fn cover(&self, task_id: &str) -> Option<Vec<u8>> {
        self.inner
            .read()
            .await
            .get(task_id)
            .and_then(|progress| progress.cover_image.clone())
    }

    /// The user-supplied reference images recorded at init.
    pub async fn user_images(&self, task_id: &str) -> Vec<Vec<u8>> {
        self.inner
            .read()
            .await
            .get(task_id)
            .map(|progress| progress.user_images.clone())
            .unwrap_or_default()
    }

    /// The prompt and settings of one page, looked up for re-entrant
    /// operations.
    pub async fn page_spec(&self, task_id: &str, page: u32) -> Option<Page> {
        self.inner
            .read()
            .await
            .get(task_id)
            .and_then(|progress| progress.pages.get(&page).cloned())
    }

    /// The lowest page index of the task (the cover page).
    pub async fn first_page_index(&self, task_id: &str) -> Option<u32> {
        self.inner
            .read()
            .await
            .get(task_id)
            .and_then(|progress| progress.pages.keys().next().copied())
    }

    /// Current status of one page.
    pub async fn page_status(&self, task_id: &str, page: u32) -> Option<PageStatus> {
        self.inner
            .read()
            .await
            .get(task_id)
            .and_then(|progress| progress.status.get(&page).copied())
    }

    /// Snapshot of the task's progress, without image bytes.
    pub async fn snapshot(&self, task_id: &str) -> Option<TaskStateView> {
        self.inner.read().await.get(task_id).map(|progress| TaskStateView {
            generated: progress.generated.clone(),
            failed: progress.failed.clone(),
            has_cover: progress.cover_image.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Page;

    fn task(pages: u32) -> GenerationTask {
        GenerationTask::new(
            (1..=pages)
                .map(|i| Page::new(i, format!("page {i}")))
                .collect(),
        )
        .with_task_id("t-1")
    }

    #[tokio::test]
    async fn init_marks_all_pages_pending() {
        let store = TaskStateStore::new();
        store.init(&task(3)).await;
        for page in 1..=3 {
            assert_eq!(store.page_status("t-1", page).await, Some(PageStatus::Pending));
        }
        let view = store.snapshot("t-1").await.unwrap();
        assert!(view.generated.is_empty());
        assert!(view.failed.is_empty());
        assert!(!view.has_cover);
    }

    #[tokio::test]
    async fn terminal_transitions_supersede_prior_entries() {
        let store = TaskStateStore::new();
        store.init(&task(1)).await;

        store.mark_generating("t-1", 1).await;
        store.mark_failed("t-1", 1, "boom").await;
        let view = store.snapshot("t-1").await.unwrap();
        assert_eq!(view.failed.get(&1).unwrap(), "boom");

        // Retry: generating clears the failed entry, success lands once.
        store.mark_generating("t-1", 1).await;
        let view = store.snapshot("t-1").await.unwrap();
        assert!(view.failed.is_empty());

        store.mark_success("t-1", 1, "img-1").await;
        let view = store.snapshot("t-1").await.unwrap();
        assert_eq!(view.generated.get(&1).unwrap(), "img-1");
        assert!(view.failed.is_empty());
    }

    #[tokio::test]
    async fn set_cover_first_writer_wins() {
        let store = TaskStateStore::new();
        store.init(&task(2)).await;

        assert!(store.set_cover("t-1", vec![1]).await);
        assert!(!store.set_cover("t-1", vec![2]).await);
        assert_eq!(store.cover("t-1").await.unwrap(), vec![1]);

        store.replace_cover("t-1", vec![9]).await;
        assert_eq!(store.cover("t-1").await.unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn concurrent_marks_on_different_pages_do_not_corrupt() {
        let store = TaskStateStore::new();
        store.init(&task(16)).await;

        let mut handles = Vec::new();
        for page in 1..=16u32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.mark_generating("t-1", page).await;
                if page % 2 == 0 {
                    store.mark_success("t-1", page, format!("img-{page}")).await;
                } else {
                    store.mark_failed("t-1", page, "err").await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let view = store.snapshot("t-1").await.unwrap();
        assert_eq!(view.generated.len(), 8);
        assert_eq!(view.failed.len(), 8);
    }

    #[tokio::test]
    async fn unknown_task_is_absent() {
        let store = TaskStateStore::new();
        assert!(!store.contains("missing").await);
        assert!(store.snapshot("missing").await.is_none());
        assert!(!store.mark_generating("missing", 1).await);
    }
}
