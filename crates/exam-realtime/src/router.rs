//! Type-routed dispatch of inbound frames.
//!
//! Every parsed frame first fans out to externally registered handlers, each
//! isolated so one failing handler cannot starve the others, then exactly one
//! built-in reducer is applied based on the message type. Malformed payloads
//! are dropped with a warning and never partially applied.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::protocol::ServerEvent;
use crate::roster::{ExamSession, RosterBoard};

/// Locks a mutex, recovering the guard if a panicking handler poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An externally registered callback, invoked with every inbound event.
///
/// Handlers must not block; long work belongs in a task the handler spawns.
/// A returned `Err` is logged and does not affect the rest of the dispatch.
pub type EventHandler = std::sync::Arc<dyn Fn(&ServerEvent) -> anyhow::Result<()> + Send + Sync>;

/// User-facing signals that carry no roster state.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A free-form announcement from an invigilator.
    Broadcast { message: String },
    /// An exam was paused by a teacher.
    ExamPaused {
        exam_id: Option<u64>,
        message: Option<String>,
    },
    /// An exam was resumed by a teacher.
    ExamResumed {
        exam_id: Option<u64>,
        message: Option<String>,
    },
    /// Outcome of an outbound command, for success/failure feedback.
    CommandOutcome {
        command: &'static str,
        delivered: bool,
    },
}

#[derive(Default)]
struct HandlerRegistry {
    handlers: HashMap<String, EventHandler>,
}

impl HandlerRegistry {
    /// Dispatch iterates over a snapshot, so a handler may register or remove
    /// handlers (including itself) without disturbing the in-flight fan-out.
    fn snapshot(&self) -> Vec<(String, EventHandler)> {
        self.handlers
            .iter()
            .map(|(key, handler)| (key.clone(), handler.clone()))
            .collect()
    }
}

/// Parses inbound frames and fans them out to handlers and reducers.
pub(crate) struct Router {
    handlers: Mutex<HandlerRegistry>,
    roster: Mutex<RosterBoard>,
    notify_tx: broadcast::Sender<Notification>,
}

impl Router {
    pub(crate) fn new(notify_tx: broadcast::Sender<Notification>) -> Self {
        Self {
            handlers: Mutex::new(HandlerRegistry::default()),
            roster: Mutex::new(RosterBoard::new()),
            notify_tx,
        }
    }

    /// Registers a handler under `key`; an existing handler under the same
    /// key is replaced (last write wins).
    pub(crate) fn register(&self, key: String, handler: EventHandler) {
        if lock(&self.handlers)
            .handlers
            .insert(key.clone(), handler)
            .is_some()
        {
            debug!(key = %key, "replaced existing message handler");
        }
    }

    pub(crate) fn remove(&self, key: &str) {
        lock(&self.handlers).handlers.remove(key);
    }

    pub(crate) fn clear_handlers(&self) {
        let mut registry = lock(&self.handlers);
        if !registry.handlers.is_empty() {
            debug!(count = registry.handlers.len(), "clearing message handlers");
            registry.handlers.clear();
        }
    }

    #[cfg(test)]
    fn handler_count(&self) -> usize {
        lock(&self.handlers).handlers.len()
    }

    /// Parses one raw text frame and runs the full dispatch for it.
    ///
    /// Returns the parsed event so the connection layer can react to
    /// connection-level messages such as `auth_success`.
    pub(crate) fn on_frame(&self, raw: &str) -> Option<ServerEvent> {
        let event = match serde_json::from_str::<ServerEvent>(raw) {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, "dropping malformed frame");
                return None;
            }
        };
        self.dispatch(&event);
        Some(event)
    }

    fn dispatch(&self, event: &ServerEvent) {
        let handlers = lock(&self.handlers).snapshot();
        for (key, handler) in handlers {
            if let Err(error) = handler(event) {
                warn!(handler = %key, %error, "message handler failed; continuing dispatch");
            }
        }
        self.reduce(event);
    }

    /// Applies the single built-in reducer for this message type.
    fn reduce(&self, event: &ServerEvent) {
        match event {
            ServerEvent::AuthSuccess { .. } => {
                // Connection-level: the client flips to Live and issues the
                // follow-up status query.
                debug!("authentication acknowledged by server");
            }
            ServerEvent::ExamStatus {
                exam_id,
                exam_title,
                paper_title,
                timers,
            } => {
                lock(&self.roster).apply_exam_status(
                    *exam_id,
                    exam_title.clone(),
                    paper_title.clone(),
                    timers.clone(),
                );
            }
            ServerEvent::StudentStart {
                exam_id,
                student_id,
                start_time,
                student_name,
                class_name,
            } => {
                lock(&self.roster).apply_student_start(
                    *exam_id,
                    *student_id,
                    start_time.clone(),
                    student_name.clone(),
                    class_name.clone(),
                );
            }
            ServerEvent::StudentEnd {
                exam_id,
                student_id,
                time_used,
            } => {
                lock(&self.roster).apply_student_end(*exam_id, *student_id, *time_used);
            }
            ServerEvent::Update {
                exam_id,
                student_id,
                time_used,
            }
            | ServerEvent::TimerUpdate {
                exam_id,
                student_id,
                time_used,
            } => {
                lock(&self.roster).apply_timer_update(*exam_id, *student_id, *time_used);
            }
            ServerEvent::Broadcast { message } => {
                self.notify(Notification::Broadcast {
                    message: message.clone(),
                });
            }
            ServerEvent::Pause { exam_id, message } => {
                self.notify(Notification::ExamPaused {
                    exam_id: *exam_id,
                    message: message.clone(),
                });
            }
            ServerEvent::Resume { exam_id, message } => {
                self.notify(Notification::ExamResumed {
                    exam_id: *exam_id,
                    message: message.clone(),
                });
            }
            ServerEvent::Unknown => {
                debug!("ignoring frame with unrecognized message type");
            }
        }
    }

    fn notify(&self, notification: Notification) {
        // No subscribers is fine; notifications are best-effort.
        let _ = self.notify_tx.send(notification);
    }

    pub(crate) fn session(&self, exam_id: u64) -> Option<ExamSession> {
        lock(&self.roster).session(exam_id).cloned()
    }

    pub(crate) fn sessions(&self) -> Vec<ExamSession> {
        lock(&self.roster).sessions().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_router() -> (Arc<Router>, broadcast::Receiver<Notification>) {
        let (tx, rx) = broadcast::channel(16);
        (Arc::new(Router::new(tx)), rx)
    }

    #[test]
    fn malformed_json_changes_nothing() {
        let (router, _rx) = test_router();
        router.on_frame(r#"{"type":"exam_status","examId":1,"timers":[]}"#);
        let before = router.sessions();

        assert!(router.on_frame("not json at all").is_none());
        assert!(router.on_frame(r#"{"no_type_field":true}"#).is_none());
        assert!(
            router
                .on_frame(r#"{"type":"update","examId":1,"studentId":5,"timeUsed":"42"}"#)
                .is_none()
        );

        assert_eq!(router.sessions(), before);
    }

    #[test]
    fn start_then_update_scenario() {
        let (router, _rx) = test_router();
        router.on_frame(r#"{"type":"student_start","examId":1,"studentId":5,"startTime":"t0"}"#);
        router.on_frame(r#"{"type":"update","examId":1,"studentId":5,"timeUsed":42}"#);

        let session = router.session(1).expect("session exists");
        let timer = &session.students[&5];
        assert_eq!(timer.time_used, 42);
        assert!(timer.is_active);
        assert_eq!(session.online_count, 1);
    }

    #[test]
    fn update_without_start_creates_nothing() {
        let (router, _rx) = test_router();
        let event = router.on_frame(r#"{"type":"update","examId":9,"studentId":2,"timeUsed":5}"#);
        assert!(event.is_some(), "frame itself is well-formed");
        assert!(router.session(9).is_none());
    }

    #[test]
    fn failing_handler_does_not_stop_dispatch() {
        let (router, _rx) = test_router();
        let seen = Arc::new(AtomicUsize::new(0));

        router.register(
            "broken".to_string(),
            Arc::new(|_| anyhow::bail!("handler exploded")),
        );
        let seen_by_ok = seen.clone();
        router.register(
            "counter".to_string(),
            Arc::new(move |_| {
                seen_by_ok.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        router.on_frame(r#"{"type":"student_start","examId":1,"studentId":5,"startTime":1}"#);

        assert_eq!(seen.load(Ordering::SeqCst), 1, "healthy handler still ran");
        assert!(
            router.session(1).is_some(),
            "built-in reducer still ran after the handler error"
        );
    }

    #[test]
    fn registering_same_key_replaces() {
        let (router, _rx) = test_router();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let hits = first.clone();
        router.register(
            "k".to_string(),
            Arc::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        let hits = second.clone();
        router.register(
            "k".to_string(),
            Arc::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        assert_eq!(router.handler_count(), 1);

        router.on_frame(r#"{"type":"broadcast","message":"hello"}"#);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_remove_itself_during_dispatch() {
        let (router, _rx) = test_router();
        let calls = Arc::new(AtomicUsize::new(0));

        let router_for_handler = router.clone();
        let calls_for_handler = calls.clone();
        router.register(
            "once".to_string(),
            Arc::new(move |_| {
                calls_for_handler.fetch_add(1, Ordering::SeqCst);
                router_for_handler.remove("once");
                Ok(())
            }),
        );

        router.on_frame(r#"{"type":"broadcast","message":"a"}"#);
        router.on_frame(r#"{"type":"broadcast","message":"b"}"#);

        assert_eq!(calls.load(Ordering::SeqCst), 1, "handler ran exactly once");
        assert_eq!(router.handler_count(), 0);
    }

    #[test]
    fn observational_events_emit_notifications_without_state_change() {
        let (router, mut rx) = test_router();
        router.on_frame(r#"{"type":"broadcast","message":"15 minutes remaining"}"#);
        router.on_frame(r#"{"type":"pause","examId":4,"message":"Exam paused by teacher"}"#);
        router.on_frame(r#"{"type":"resume"}"#);

        assert_eq!(
            rx.try_recv().expect("broadcast notification"),
            Notification::Broadcast {
                message: "15 minutes remaining".to_string()
            }
        );
        assert_eq!(
            rx.try_recv().expect("pause notification"),
            Notification::ExamPaused {
                exam_id: Some(4),
                message: Some("Exam paused by teacher".to_string())
            }
        );
        assert_eq!(
            rx.try_recv().expect("resume notification"),
            Notification::ExamResumed {
                exam_id: None,
                message: None
            }
        );
        assert!(router.sessions().is_empty(), "no roster mutation");
    }

    #[test]
    fn unknown_type_is_ignored() {
        let (router, _rx) = test_router();
        let event = router.on_frame(r#"{"type":"pause_ack","examId":4}"#);
        assert_eq!(event, Some(ServerEvent::Unknown));
        assert!(router.sessions().is_empty());
    }
}
