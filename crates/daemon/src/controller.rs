// WireGuard Tunnel Manager - Tunnel Session Controller
// Single-writer actor owning the session, plus its poller and command dispatcher

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wg_tunnel_common::{
    parse_status, IntentOutcome, IntentResponse, PollResult, SessionEvent, SessionSnapshot,
    TunnelLookup, TunnelName,
};

use crate::runner::{CommandRunner, ToolCommand};
use crate::session::{FoldReport, Intent, SessionState};

const MAILBOX_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 100;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("session controller has stopped")]
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub poll_interval: Duration,
    pub stall_threshold: u32,
    /// Network services whose DNS is cleared after each successful stop
    pub reset_dns_services: Vec<String>,
}

enum Message {
    Intent {
        intent: Intent,
        reply: oneshot::Sender<IntentResponse>,
    },
    Polled(PollResult),
    Dispatched(DispatchReport),
}

/// Commands decided by one intent, run in order
struct Batch {
    id: u64,
    commands: Vec<ToolCommand>,
}

/// Result of running one batch of commands
struct DispatchReport {
    batch: u64,
    failure: Option<(ToolCommand, String)>,
}

/// Handle to the running controller; cheap to clone
#[derive(Clone)]
pub struct Controller {
    mailbox: mpsc::Sender<Message>,
    snapshots: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    poll_now: Arc<Notify>,
}

/// Background tasks started by [`Controller::spawn`]
pub struct ControllerTasks {
    handles: Vec<JoinHandle<()>>,
}

impl ControllerTasks {
    /// Wait for every task to finish after shutdown was requested
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Controller task ended abnormally: {}", e);
            }
        }
    }
}

impl Controller {
    /// Start the actor, the poller and the dispatcher
    ///
    /// All three stop when `shutdown` is cancelled. A command already
    /// running is allowed to finish.
    pub fn spawn(
        runner: Arc<dyn CommandRunner>,
        lookup: Arc<dyn TunnelLookup>,
        settings: ControllerSettings,
        shutdown: CancellationToken,
    ) -> (Self, ControllerTasks) {
        let state = SessionState::new(settings.stall_threshold);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot(0, Utc::now()));
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let poll_now = Arc::new(Notify::new());

        let actor = Actor {
            state,
            revision: 0,
            batch: 0,
            updated_at: Utc::now(),
            snapshots: snapshot_tx,
            events: events_tx.clone(),
            dispatch: dispatch_tx,
        };

        let handles = vec![
            tokio::spawn(actor.run(mailbox_rx, shutdown.clone())),
            tokio::spawn(dispatch_loop(
                runner.clone(),
                settings.reset_dns_services,
                dispatch_rx,
                mailbox_tx.clone(),
                poll_now.clone(),
                shutdown.clone(),
            )),
            tokio::spawn(poll_loop(
                runner,
                lookup,
                settings.poll_interval,
                mailbox_tx.clone(),
                poll_now.clone(),
                shutdown,
            )),
        ];

        let controller = Self {
            mailbox: mailbox_tx,
            snapshots: snapshot_rx,
            events: events_tx,
            poll_now,
        };

        (controller, ControllerTasks { handles })
    }

    /// Select a tunnel and connect to it, switch to it, or stop it if it is the active one
    pub async fn select_and_connect(
        &self,
        name: TunnelName,
    ) -> Result<IntentResponse, ControllerError> {
        self.send_intent(Intent::SelectAndConnect(name)).await
    }

    /// Stop the active tunnel, or start the selected one
    pub async fn toggle(&self) -> Result<IntentResponse, ControllerError> {
        self.send_intent(Intent::Toggle).await
    }

    async fn send_intent(&self, intent: Intent) -> Result<IntentResponse, ControllerError> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(Message::Intent { intent, reply })
            .await
            .map_err(|_| ControllerError::Stopped)?;
        response.await.map_err(|_| ControllerError::Stopped)
    }

    /// Poll `wg show` as soon as the poller is free
    pub fn request_poll(&self) {
        self.poll_now.notify_one();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

struct Actor {
    state: SessionState,
    revision: u64,
    /// Id of the most recently dispatched batch
    batch: u64,
    updated_at: chrono::DateTime<Utc>,
    snapshots: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    dispatch: mpsc::UnboundedSender<Batch>,
}

impl Actor {
    async fn run(mut self, mut mailbox: mpsc::Receiver<Message>, shutdown: CancellationToken) {
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = mailbox.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match message {
                Message::Intent { intent, reply } => self.handle_intent(intent, reply),
                Message::Polled(poll) => self.handle_poll(poll),
                Message::Dispatched(report) => self.handle_dispatched(report),
            }
        }

        debug!("Session controller stopped");
    }

    fn handle_intent(&mut self, intent: Intent, reply: oneshot::Sender<IntentResponse>) {
        debug!("Intent: {:?}", intent);
        let decision = self.state.apply(intent);

        match &decision.outcome {
            IntentOutcome::Ignored { reason } => {
                info!("Intent ignored: {}", reason);
                self.emit(SessionEvent::IntentIgnored { reason: *reason });
            }
            outcome => info!("Intent accepted: {:?}", outcome),
        }

        if !decision.commands.is_empty() {
            self.batch += 1;
            let batch = Batch {
                id: self.batch,
                commands: decision.commands,
            };
            if self.dispatch.send(batch).is_err() {
                warn!("Command dispatcher has stopped; commands dropped");
            }
        }

        self.publish(decision.changed);

        // The caller may have given up waiting
        let _ = reply.send(IntentResponse {
            outcome: decision.outcome,
            revision: self.revision,
        });
    }

    fn handle_poll(&mut self, poll: PollResult) {
        let report = self.state.fold(&poll, Utc::now());
        self.log_poll(&report);

        if let Some(consecutive) = report.failures {
            self.emit(SessionEvent::PollFailed {
                diagnostic: poll.diagnostic.clone().unwrap_or_default(),
                consecutive,
            });
        }

        if report.stalled_now {
            self.emit(SessionEvent::TransitionStalled {
                phase: self.state.phase(),
                polls: self.state.stall_polls(),
            });
        }

        self.publish(report.changed);
    }

    fn log_poll(&self, report: &FoldReport) {
        match report.failures {
            Some(1) => warn!(
                "Status poll failed: {}",
                self.state.last_poll_diagnostic().unwrap_or("unknown error")
            ),
            Some(n) => debug!(
                "Status poll failed ({} in a row): {}",
                n,
                self.state.last_poll_diagnostic().unwrap_or("unknown error")
            ),
            None => {}
        }

        if let Some(n) = report.recovered_after {
            info!("Status poll recovered after {} failure(s)", n);
        }

        if report.stalled_now {
            warn!(
                "Transition stalled in phase {} after {} unconfirmed polls",
                self.state.phase(),
                self.state.stall_polls()
            );
        }

        if report.changed {
            debug!(
                "Session: phase={} active={}",
                self.state.phase(),
                self.state.active()
            );
        }
    }

    fn handle_dispatched(&mut self, report: DispatchReport) {
        let Some((command, diagnostic)) = report.failure else {
            return;
        };

        warn!("{} failed: {}", command, diagnostic);
        self.emit(SessionEvent::DispatchFailed {
            command: command.to_string(),
            diagnostic,
        });

        // A batch from an abandoned transition must not release the current one
        if report.batch == self.batch {
            let changed = self.state.dispatch_failed();
            self.publish(changed);
        }
    }

    /// Push a fresh snapshot; bump the revision and notify streams on change
    fn publish(&mut self, changed: bool) {
        if changed {
            self.revision += 1;
            self.updated_at = Utc::now();
        }

        let snapshot = self.state.snapshot(self.revision, self.updated_at);
        self.snapshots.send_replace(snapshot.clone());

        if changed {
            self.emit(SessionEvent::StateChanged { snapshot });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Runs command batches in request order; a failed command cancels the rest of its batch
async fn dispatch_loop(
    runner: Arc<dyn CommandRunner>,
    reset_dns_services: Vec<String>,
    mut jobs: mpsc::UnboundedReceiver<Batch>,
    mailbox: mpsc::Sender<Message>,
    poll_now: Arc<Notify>,
    shutdown: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = jobs.recv() => match job {
                Some(batch) => batch,
                None => break,
            },
        };

        let mut failure = None;
        for command in batch.commands {
            info!("Dispatching: {}", command);
            let output = runner.run(&command).await;
            if output.failed {
                failure = Some((command, output.describe_failure()));
                break;
            }
            if matches!(command, ToolCommand::Down(_)) {
                reset_dns(runner.as_ref(), &reset_dns_services).await;
            }
        }

        if mailbox
            .send(Message::Dispatched(DispatchReport {
                batch: batch.id,
                failure,
            }))
            .await
            .is_err()
        {
            break;
        }

        // Re-check right away instead of waiting for the next tick
        poll_now.notify_one();
    }

    debug!("Command dispatcher stopped");
}

/// Clear DNS servers left behind by a tunnel; failures are only logged
async fn reset_dns(runner: &dyn CommandRunner, services: &[String]) {
    for service in services {
        let command = ToolCommand::ResetDns(service.clone());
        let output = runner.run(&command).await;
        if output.failed {
            warn!("{} failed: {}", command, output.describe_failure());
        }
    }
}

/// Polls `wg show` on a fixed cadence; at most one poll runs at a time
async fn poll_loop(
    runner: Arc<dyn CommandRunner>,
    lookup: Arc<dyn TunnelLookup>,
    poll_interval: Duration,
    mailbox: mpsc::Sender<Message>,
    poll_now: Arc<Notify>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
            _ = poll_now.notified() => ticker.reset(),
        }

        let result = poll_once(runner.as_ref(), &lookup).await;

        if mailbox.send(Message::Polled(result)).await.is_err() {
            break;
        }
    }

    debug!("Status poller stopped");
}

async fn poll_once(runner: &dyn CommandRunner, lookup: &Arc<dyn TunnelLookup>) -> PollResult {
    let output = runner.run(&ToolCommand::Show).await;
    if output.failed {
        return PollResult::failed(output.describe_failure());
    }

    // Peer-key lookup reads config files
    let lookup = lookup.clone();
    let raw = output.stdout;
    tokio::task::spawn_blocking(move || parse_status(&raw, lookup.as_ref()))
        .await
        .unwrap_or_else(|e| PollResult::failed(format!("status parser failed: {}", e)))
}
