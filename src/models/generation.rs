//! Progress tracking for one text-to-SQL run.
//!
//! Steps are appended as pipeline stages begin. Starting a new step marks the
//! previous one as succeeded; a terminal failure marks the last one as failed.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GenerationStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationStep {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: GenerationStatus,
}

type StepObserver = Arc<dyn Fn(&[GenerationStep]) + Send + Sync>;

/// Shared, cloneable step list with an optional change observer.
#[derive(Clone, Default)]
pub struct StepTracker {
    steps: Arc<Mutex<Vec<GenerationStep>>>,
    observer: Option<StepObserver>,
}

impl StepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `observer` with the full list after every change.
    pub fn with_observer(
        mut self,
        observer: impl Fn(&[GenerationStep]) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<GenerationStep>> {
        self.steps.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, steps: &[GenerationStep]) {
        if let Some(observer) = &self.observer {
            observer(steps);
        }
    }

    pub fn reset(&self) {
        let mut steps = self.lock();
        steps.clear();
        self.notify(&steps);
    }

    /// Start a new step, closing the running one as succeeded.
    pub fn next_step(&self, title: &str, description: Option<String>) {
        let mut steps = self.lock();
        if let Some(last) = steps.last_mut()
            && last.status == GenerationStatus::Running
        {
            last.status = GenerationStatus::Succeeded;
        }
        steps.push(GenerationStep {
            title: title.to_string(),
            description,
            status: GenerationStatus::Running,
        });
        self.notify(&steps);
    }

    /// Mark the last step as failed.
    pub fn fail(&self) {
        self.finish_last(GenerationStatus::Failed);
    }

    /// Mark the last step as succeeded.
    pub fn succeed(&self) {
        self.finish_last(GenerationStatus::Succeeded);
    }

    fn finish_last(&self, status: GenerationStatus) {
        let mut steps = self.lock();
        if let Some(last) = steps.last_mut() {
            last.status = status;
        }
        self.notify(&steps);
    }

    pub fn snapshot(&self) -> Vec<GenerationStep> {
        self.lock().clone()
    }

    pub fn last_status(&self) -> Option<GenerationStatus> {
        self.lock().last().map(|s| s.status)
    }
}

impl std::fmt::Debug for StepTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepTracker")
            .field("steps", &*self.lock())
            .field("has_observer", &self.observer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_next_step_closes_previous() {
        let tracker = StepTracker::new();
        tracker.next_step("one", None);
        tracker.next_step("two", Some("second".to_string()));

        let steps = tracker.snapshot();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].status, GenerationStatus::Succeeded);
        assert_eq!(steps[1].status, GenerationStatus::Running);
        assert_eq!(steps[1].description.as_deref(), Some("second"));
    }

    #[test]
    fn test_fail_marks_last_step() {
        let tracker = StepTracker::new();
        tracker.next_step("one", None);
        tracker.next_step("two", None);
        tracker.fail();

        let steps = tracker.snapshot();
        assert_eq!(steps[0].status, GenerationStatus::Succeeded);
        assert_eq!(steps[1].status, GenerationStatus::Failed);
    }

    #[test]
    fn test_reset_clears_steps() {
        let tracker = StepTracker::new();
        tracker.next_step("one", None);
        tracker.reset();
        assert!(tracker.snapshot().is_empty());
        assert_eq!(tracker.last_status(), None);
    }

    #[test]
    fn test_observer_sees_every_change() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let tracker = StepTracker::new().with_observer(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        tracker.next_step("one", None);
        tracker.succeed();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&GenerationStatus::Running).unwrap();
        assert_eq!(json, "\"RUNNING\"");
    }
}
