// Sending intents and following them until the session settles

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use wg_tunnel_common::{
    DaemonClient, EventStream, IntentOutcome, IntentResponse, SessionEvent, SessionSnapshot,
    SessionViewModel,
};

/// How long to follow a transition before giving up on it
pub const WAIT_LIMIT: Duration = Duration::from_secs(60);

/// Where a followed transition ended up
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Settled(SessionSnapshot),
    Stalled(SessionSnapshot),
    DispatchFailed { command: String, diagnostic: String },
}

/// Check whether `event` ends the wait for an intent applied at `since_revision`
pub fn progress(event: &SessionEvent, since_revision: u64) -> Option<Progress> {
    match event {
        SessionEvent::StateChanged { snapshot } if snapshot.revision >= since_revision => {
            if snapshot.stalled {
                Some(Progress::Stalled(snapshot.clone()))
            } else if snapshot.pending.is_none() {
                Some(Progress::Settled(snapshot.clone()))
            } else {
                None
            }
        }
        SessionEvent::DispatchFailed {
            command,
            diagnostic,
        } => Some(Progress::DispatchFailed {
            command: command.clone(),
            diagnostic: diagnostic.clone(),
        }),
        _ => None,
    }
}

pub fn describe_outcome(outcome: &IntentOutcome) -> String {
    match outcome {
        IntentOutcome::Starting { tunnel } => format!("Connecting to {}...", tunnel),
        IntentOutcome::Stopping { target } => format!("Disconnecting {}...", target),
        IntentOutcome::Switching { from, to } => {
            format!("Switching from {} to {}...", from, to)
        }
        IntentOutcome::Ignored { reason } => format!("Nothing to do: {}", reason),
    }
}

/// One-line summary of a settled session
pub fn describe_settled(snapshot: &SessionSnapshot) -> String {
    let view = SessionViewModel::from_snapshot(snapshot);
    match &view.active_label {
        Some(active) => format!("{} ({})", view.status_text, active),
        None => view.status_text,
    }
}

/// Send an intent and, when `wait` is set, follow it on the event stream
///
/// The stream is opened before the intent goes out so no state change can
/// slip between the two.
pub async fn perform<F, Fut>(client: &DaemonClient, wait: bool, send: F) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<IntentResponse>>,
{
    let stream = if wait {
        Some(client.events().await?)
    } else {
        None
    };

    let response = send().await?;
    let message = describe_outcome(&response.outcome);

    if !response.outcome.is_accepted() {
        println!("{}", message.yellow());
        return Ok(());
    }

    let Some(mut stream) = stream else {
        println!("{}", message.cyan());
        return Ok(());
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(80));

    let result = tokio::time::timeout(
        WAIT_LIMIT,
        follow(&mut stream, response.revision, &spinner),
    )
    .await;
    spinner.finish_and_clear();

    match result {
        Ok(Ok(Progress::Settled(snapshot))) => {
            println!("{}", format!("✓ {}", describe_settled(&snapshot)).green().bold());
            Ok(())
        }
        Ok(Ok(Progress::Stalled(snapshot))) => {
            println!(
                "{}",
                format!(
                    "⚠ {} has not been confirmed after {} polls. \
                     The next select or toggle will abandon it.",
                    snapshot.phase, snapshot.stall_polls
                )
                .yellow()
            );
            Ok(())
        }
        Ok(Ok(Progress::DispatchFailed {
            command,
            diagnostic,
        })) => anyhow::bail!("`{}` failed: {}", command, diagnostic),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            let snapshot = client.session().await?;
            println!(
                "{}",
                format!(
                    "Still {} after {}s; check `wg-tunnel status` later.",
                    snapshot.phase,
                    WAIT_LIMIT.as_secs()
                )
                .yellow()
            );
            Ok(())
        }
    }
}

async fn follow(
    stream: &mut EventStream,
    since_revision: u64,
    spinner: &ProgressBar,
) -> Result<Progress> {
    loop {
        let event = match stream.next_event().await {
            Some(event) => event?,
            None => anyhow::bail!("Daemon closed the event stream"),
        };

        if let SessionEvent::StateChanged { snapshot } = &event {
            if snapshot.revision >= since_revision {
                spinner.set_message(SessionViewModel::from_snapshot(snapshot).status_text);
            }
        }

        if let Some(progress) = progress(&event, since_revision) {
            return Ok(progress);
        }
    }
}
