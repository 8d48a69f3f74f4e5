//! User-facing notifications raised by the backend.

use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    /// Failures the user should see even when quiet.
    pub critical: bool,
}

pub trait Notifier: Send + Sync + fmt::Debug {
    fn notify(&self, notification: Notification);
}

/// Forwards notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        if notification.critical {
            error!("{}: {}", notification.title, notification.message);
        } else {
            warn!("{}: {}", notification.title, notification.message);
        }
    }
}

/// Keeps every notification; handy for tests and for embedding callers
/// that render them later.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    seen: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Notification> {
        match self.seen.lock() {
            Ok(mut seen) => std::mem::take(&mut *seen),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        match self.seen.lock() {
            Ok(mut seen) => seen.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_notifier_drains() {
        let notifier = RecordingNotifier::new();
        let shared = notifier.clone();
        shared.notify(Notification {
            title: "Vineyard".to_string(),
            message: "hello".to_string(),
            critical: false,
        });
        LogNotifier.notify(Notification {
            title: "t".to_string(),
            message: "m".to_string(),
            critical: true,
        });
        let seen = notifier.take();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message, "hello");
        assert!(notifier.take().is_empty());
    }
}
