//! Defines the wire protocol spoken with the exam server.
//!
//! Every frame is a JSON object with a `type` discriminator; the remaining
//! fields are camelCase on the wire. Inbound frames that carry a type this
//! client does not recognize deserialize to [`ServerEvent::Unknown`] and are
//! ignored by the router.

use serde::{Deserialize, Serialize};

/// Sentinel exam id meaning "every exam" in a `get_exam_status` query.
pub const ALL_EXAMS: u64 = 0;

/// When a student timer was started.
///
/// The current server sends a unix epoch timestamp; older payloads carried a
/// preformatted string. Both are accepted and kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StartTime {
    Epoch(i64),
    Text(String),
}

/// One student entry inside an `exam_status` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    #[serde(rename = "studentId")]
    pub student_id: u64,
    #[serde(rename = "isActive", default)]
    pub is_active: bool,
    #[serde(rename = "timeUsed", default)]
    pub time_used: u64,
    #[serde(rename = "startTime", default)]
    pub start_time: Option<StartTime>,
    #[serde(rename = "studentName", default)]
    pub student_name: Option<String>,
    #[serde(rename = "className", default)]
    pub class_name: Option<String>,
}

/// Messages pushed by the exam server to this client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The `auth` frame was accepted; the channel is now live.
    AuthSuccess {
        #[serde(default)]
        message: Option<String>,
    },
    /// A whole-session roster snapshot for one exam.
    ExamStatus {
        #[serde(rename = "examId")]
        exam_id: u64,
        #[serde(rename = "examTitle", default)]
        exam_title: Option<String>,
        #[serde(rename = "paperTitle", default)]
        paper_title: Option<String>,
        #[serde(default)]
        timers: Vec<TimerSnapshot>,
    },
    /// A student began their exam.
    StudentStart {
        #[serde(rename = "examId")]
        exam_id: u64,
        #[serde(rename = "studentId")]
        student_id: u64,
        #[serde(rename = "startTime", default)]
        start_time: Option<StartTime>,
        #[serde(rename = "studentName", default)]
        student_name: Option<String>,
        #[serde(rename = "className", default)]
        class_name: Option<String>,
    },
    /// A student submitted; their final elapsed time is attached.
    StudentEnd {
        #[serde(rename = "examId")]
        exam_id: u64,
        #[serde(rename = "studentId")]
        student_id: u64,
        #[serde(rename = "timeUsed")]
        time_used: u64,
    },
    /// A periodic timer tick for one student.
    Update {
        #[serde(rename = "examId")]
        exam_id: u64,
        #[serde(rename = "studentId")]
        student_id: u64,
        #[serde(rename = "timeUsed")]
        time_used: u64,
    },
    /// Alternate spelling of [`ServerEvent::Update`] used by newer servers.
    TimerUpdate {
        #[serde(rename = "examId")]
        exam_id: u64,
        #[serde(rename = "studentId")]
        student_id: u64,
        #[serde(rename = "timeUsed")]
        time_used: u64,
    },
    /// A free-form announcement from an invigilator.
    Broadcast { message: String },
    /// An exam was paused. Older servers omit the exam id.
    Pause {
        #[serde(rename = "examId", default)]
        exam_id: Option<u64>,
        #[serde(default)]
        message: Option<String>,
    },
    /// An exam was resumed. Older servers omit the exam id.
    Resume {
        #[serde(rename = "examId", default)]
        exam_id: Option<u64>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Any message type this client does not understand (acks, legacy types).
    #[serde(other)]
    Unknown,
}

/// Frames this client sends to the exam server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Auth {
        token: String,
    },
    GetExamStatus {
        #[serde(rename = "examId")]
        exam_id: u64,
    },
    Broadcast {
        message: String,
    },
    Pause {
        #[serde(rename = "examId")]
        exam_id: u64,
    },
    Resume {
        #[serde(rename = "examId")]
        exam_id: u64,
    },
}
