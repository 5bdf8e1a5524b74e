//! Typed command surface for the monitoring side of the channel.
//!
//! Each operation builds the matching wire frame, attempts delivery through
//! the live-gated send path and reports the outcome both as a return value
//! and as a [`Notification::CommandOutcome`] for feedback surfaces.

use tracing::info;

use crate::client::RealtimeClient;
use crate::protocol::ClientCommand;
use crate::router::Notification;

impl RealtimeClient {
    /// Requests the current status of one exam, or of every exam with
    /// [`crate::protocol::ALL_EXAMS`].
    pub async fn query_exam_status(&self, exam_id: u64) -> bool {
        self.issue("get_exam_status", ClientCommand::GetExamStatus { exam_id })
            .await
    }

    /// Sends an announcement to every connected student.
    pub async fn broadcast(&self, message: impl Into<String>) -> bool {
        self.issue(
            "broadcast",
            ClientCommand::Broadcast {
                message: message.into(),
            },
        )
        .await
    }

    /// Pauses all student timers in one exam.
    pub async fn pause(&self, exam_id: u64) -> bool {
        self.issue("pause", ClientCommand::Pause { exam_id }).await
    }

    /// Resumes all student timers in one exam.
    pub async fn resume(&self, exam_id: u64) -> bool {
        self.issue("resume", ClientCommand::Resume { exam_id }).await
    }

    async fn issue(&self, label: &'static str, command: ClientCommand) -> bool {
        let delivered = self.send(&command).await;
        info!(command = label, delivered, "command issued");
        let _ = self.shared.notify_tx.send(Notification::CommandOutcome {
            command: label,
            delivered,
        });
        delivered
    }
}
