//! Terminal exam monitor: connects to the realtime channel and prints roster
//! summaries and invigilator notifications as they arrive.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use exam_realtime::{
    ConnectionState, EnvTokenSource, Notification, RealtimeClient, RealtimeConfig,
    StaticTokenSource, TokenSource,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser, Debug)]
#[command(author, version, about = "Realtime exam monitor")]
struct Args {
    /// Auth token; falls back to the EXAM_AUTH_TOKEN environment variable.
    #[arg(long)]
    token: Option<String>,

    /// Restrict the summary to a single exam id.
    #[arg(long)]
    exam: Option<u64>,

    /// Seconds between roster summaries.
    #[arg(long, default_value_t = 10)]
    summary_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Args::parse();
    let config = RealtimeConfig::from_env()?;
    info!(url = %config.url(), "starting exam monitor");

    let tokens: Arc<dyn TokenSource> = match args.token {
        Some(token) => Arc::new(StaticTokenSource::new(token)),
        None => Arc::new(EnvTokenSource::default()),
    };

    let client = RealtimeClient::new(config, tokens);
    let mut state = client.watch_state();
    let mut notifications = client.subscribe_notifications();
    let mut summary = tokio::time::interval(Duration::from_secs(args.summary_interval.max(1)));

    client.open();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                client.close().await;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                info!(state = %current, "connection state changed");
                if current == ConnectionState::Closed {
                    break;
                }
            }
            notification = notifications.recv() => match notification {
                Ok(Notification::Broadcast { message }) => {
                    info!(%message, "announcement");
                }
                Ok(Notification::ExamPaused { exam_id, message }) => {
                    warn!(?exam_id, ?message, "exam paused");
                }
                Ok(Notification::ExamResumed { exam_id, message }) => {
                    info!(?exam_id, ?message, "exam resumed");
                }
                Ok(Notification::CommandOutcome { command, delivered }) => {
                    if delivered {
                        info!(command, "command delivered");
                    } else {
                        error!(command, "command not delivered");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = summary.tick() => {
                print_summary(&client, args.exam);
            }
        }
    }

    info!("exam monitor stopped");
    Ok(())
}

fn print_summary(client: &RealtimeClient, filter: Option<u64>) {
    let sessions = client.sessions();
    if sessions.is_empty() {
        info!("no exam sessions known yet");
        return;
    }
    for session in sessions {
        if filter.map_or(false, |exam_id| exam_id != session.exam_id) {
            continue;
        }
        info!(
            exam_id = session.exam_id,
            exam = %session.title,
            paper = %session.paper_title,
            students = session.students.len(),
            online = session.online_count,
            "roster summary"
        );
        for (student_id, timer) in &session.students {
            info!(
                student_id,
                name = %timer.student_name,
                class = %timer.class_name,
                active = timer.is_active,
                time_used = timer.time_used,
                "student timer"
            );
        }
    }
}
