//! The canonical in-memory projection of live exam sessions.
//!
//! The [`RosterBoard`] is folded from server events by the router's built-in
//! reducers. Reducers tolerate at-least-once, possibly-reordered delivery:
//! replaying a snapshot or a `student_end` is a no-op, and a timer tick that
//! arrives before its `student_start` is dropped rather than inventing a
//! student whose name and class are unknown.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::protocol::{StartTime, TimerSnapshot};

/// Per-student elapsed time and activity state within one exam.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentTimer {
    pub student_id: u64,
    pub student_name: String,
    pub class_name: String,
    /// Elapsed seconds, as last reported by the server.
    pub time_used: u64,
    pub start_time: Option<StartTime>,
    pub is_active: bool,
}

/// The live roster for one exam instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamSession {
    pub exam_id: u64,
    pub title: String,
    pub paper_title: String,
    pub students: BTreeMap<u64, StudentTimer>,
    /// Always equals the number of students with `is_active == true`.
    /// Recomputed after every mutation, never set directly.
    pub online_count: usize,
}

impl ExamSession {
    fn empty(exam_id: u64) -> Self {
        Self {
            exam_id,
            title: fallback_title(exam_id),
            paper_title: fallback_paper_title(exam_id),
            students: BTreeMap::new(),
            online_count: 0,
        }
    }

    fn recompute_online(&mut self) {
        self.online_count = self.students.values().filter(|s| s.is_active).count();
    }
}

fn fallback_title(exam_id: u64) -> String {
    format!("Exam {exam_id}")
}

fn fallback_paper_title(exam_id: u64) -> String {
    format!("Paper {exam_id}")
}

fn fallback_student_name(student_id: u64) -> String {
    format!("Student {student_id}")
}

const FALLBACK_CLASS: &str = "Unassigned";

/// All known exam sessions, keyed by exam id.
///
/// Sessions are created lazily on first reference and live for the life of
/// the process; finished students stay in the roster with `is_active: false`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RosterBoard {
    sessions: BTreeMap<u64, ExamSession>,
}

impl RosterBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, exam_id: u64) -> Option<&ExamSession> {
        self.sessions.get(&exam_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &ExamSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Replaces (or inserts) the whole-session snapshot for `exam_id`.
    ///
    /// Titles missing from the snapshot keep their previous value if the
    /// session already exists, otherwise a generated placeholder is used.
    pub fn apply_exam_status(
        &mut self,
        exam_id: u64,
        exam_title: Option<String>,
        paper_title: Option<String>,
        timers: Vec<TimerSnapshot>,
    ) {
        let previous = self.sessions.get(&exam_id);
        let title = exam_title
            .or_else(|| previous.map(|s| s.title.clone()))
            .unwrap_or_else(|| fallback_title(exam_id));
        let paper_title = paper_title
            .or_else(|| previous.map(|s| s.paper_title.clone()))
            .unwrap_or_else(|| fallback_paper_title(exam_id));

        let mut students = BTreeMap::new();
        for timer in timers {
            students.insert(
                timer.student_id,
                StudentTimer {
                    student_id: timer.student_id,
                    student_name: timer
                        .student_name
                        .unwrap_or_else(|| fallback_student_name(timer.student_id)),
                    class_name: timer.class_name.unwrap_or_else(|| FALLBACK_CLASS.to_string()),
                    time_used: timer.time_used,
                    start_time: timer.start_time,
                    is_active: timer.is_active,
                },
            );
        }

        let mut session = ExamSession {
            exam_id,
            title,
            paper_title,
            students,
            online_count: 0,
        };
        session.recompute_online();
        self.sessions.insert(exam_id, session);
    }

    /// Records that a student began their exam; creates the session lazily.
    ///
    /// A repeated start for the same student overwrites the previous entry
    /// (last write wins) and resets `time_used` to zero.
    pub fn apply_student_start(
        &mut self,
        exam_id: u64,
        student_id: u64,
        start_time: Option<StartTime>,
        student_name: Option<String>,
        class_name: Option<String>,
    ) {
        let session = self
            .sessions
            .entry(exam_id)
            .or_insert_with(|| ExamSession::empty(exam_id));
        session.students.insert(
            student_id,
            StudentTimer {
                student_id,
                student_name: student_name.unwrap_or_else(|| fallback_student_name(student_id)),
                class_name: class_name.unwrap_or_else(|| FALLBACK_CLASS.to_string()),
                time_used: 0,
                start_time,
                is_active: true,
            },
        );
        session.recompute_online();
    }

    /// Marks a student as finished with their final elapsed time.
    ///
    /// Unknown session or student is a no-op; replaying the same message is
    /// idempotent.
    pub fn apply_student_end(&mut self, exam_id: u64, student_id: u64, time_used: u64) {
        let Some(session) = self.sessions.get_mut(&exam_id) else {
            debug!(exam_id, student_id, "student_end for unknown exam; ignoring");
            return;
        };
        if let Some(timer) = session.students.get_mut(&student_id) {
            timer.is_active = false;
            timer.time_used = time_used;
        } else {
            debug!(exam_id, student_id, "student_end for unknown student; ignoring");
        }
        session.recompute_online();
    }

    /// Overwrites `time_used` for one student; `is_active` is untouched.
    ///
    /// A tick that arrives before the corresponding `student_start` is
    /// dropped: name and class are unknown, so no student is auto-created.
    pub fn apply_timer_update(&mut self, exam_id: u64, student_id: u64, time_used: u64) {
        let Some(timer) = self
            .sessions
            .get_mut(&exam_id)
            .and_then(|session| session.students.get_mut(&student_id))
        else {
            debug!(exam_id, student_id, "timer tick for unknown student; ignoring");
            return;
        };
        timer.time_used = time_used;
    }
}
