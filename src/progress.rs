//! Progress reporting for the long-running import, linking and indexing jobs.

/// A snapshot of the progress during a long-running operation.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// A description of the current stage (e.g., "Importing Belege").
    pub stage_description: String,
    /// Number of items processed in the current stage.
    pub current_item: u64,
    /// Total number of items expected in the current stage (if known).
    pub total_items: Option<u64>,
    /// An optional message providing more context (e.g., the current dboe_id).
    pub message: Option<String>,
}

/// Receives a `ProgressUpdate`; returning `false` asks the caller to stop
/// after the current item.
pub type ProgressCallback = Box<dyn FnMut(ProgressUpdate) -> bool + Send + Sync>;

impl ProgressUpdate {
    /// Creates a new progress update for the start of a stage.
    pub fn new_stage(description: impl Into<String>, total_items: Option<u64>) -> Self {
        ProgressUpdate {
            stage_description: description.into(),
            current_item: 0,
            total_items,
            message: None,
        }
    }

    pub fn item(
        description: impl Into<String>,
        current_item: u64,
        total_items: Option<u64>,
        message: Option<String>,
    ) -> Self {
        ProgressUpdate {
            stage_description: description.into(),
            current_item,
            total_items,
            message,
        }
    }
}

/// Forwards an update to the callback, if any. Returns `false` when the
/// callback requested cancellation.
pub fn report(callback: &mut Option<ProgressCallback>, update: ProgressUpdate) -> bool {
    match callback {
        Some(cb) => cb(update),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_report_forwards_and_cancels() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let mut callback: Option<ProgressCallback> = Some(Box::new(move |update| {
            seen_clone.lock().unwrap().push(update.current_item);
            update.current_item < 2
        }));
        assert!(report(&mut callback, ProgressUpdate::new_stage("Import", Some(3))));
        assert!(report(&mut callback, ProgressUpdate::item("Import", 1, Some(3), None)));
        assert!(!report(&mut callback, ProgressUpdate::item("Import", 2, Some(3), None)));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);

        let mut none: Option<ProgressCallback> = None;
        assert!(report(&mut none, ProgressUpdate::new_stage("Import", None)));
    }
}
