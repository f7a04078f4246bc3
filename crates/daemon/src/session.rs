// WireGuard Tunnel Manager - Session State Machine
// Pure state transitions for intents and poll results; the controller actor owns the only instance

use chrono::{DateTime, Utc};
use wg_tunnel_common::{
    ActiveTunnel, IgnoreReason, IntentOutcome, PendingTransition, Phase, PollResult,
    SessionSnapshot, StopTarget, TunnelName,
};

use crate::runner::ToolCommand;

/// A user request forwarded by a UI surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    SelectAndConnect(TunnelName),
    Toggle,
}

/// What applying an intent decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub outcome: IntentOutcome,
    /// Commands to run in order; a failed command cancels the rest
    pub commands: Vec<ToolCommand>,
    pub changed: bool,
}

/// What folding a poll result did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoldReport {
    pub changed: bool,
    /// The pending transition crossed the stall threshold on this poll
    pub stalled_now: bool,
    /// Consecutive failures so far, when this poll failed
    pub failures: Option<u32>,
    /// Failures that preceded this successful poll
    pub recovered_after: Option<u32>,
}

/// Fields whose change bumps the published revision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Core {
    phase: Phase,
    selected: Option<TunnelName>,
    active: ActiveTunnel,
    active_interface: Option<String>,
    pending: Option<PendingTransition>,
    stall_polls: u32,
    stalled: bool,
    consecutive_poll_failures: u32,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    core: Core,
    stall_threshold: u32,
    last_poll_raw: String,
    last_poll_diagnostic: Option<String>,
    polls: u64,
    last_poll_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new(stall_threshold: u32) -> Self {
        Self {
            core: Core::default(),
            stall_threshold: stall_threshold.max(1),
            last_poll_raw: String::new(),
            last_poll_diagnostic: None,
            polls: 0,
            last_poll_at: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.core.phase
    }

    pub fn selected(&self) -> Option<&TunnelName> {
        self.core.selected.as_ref()
    }

    pub fn active(&self) -> &ActiveTunnel {
        &self.core.active
    }

    pub fn pending(&self) -> Option<&PendingTransition> {
        self.core.pending.as_ref()
    }

    pub fn is_stalled(&self) -> bool {
        self.core.stalled
    }

    pub fn stall_polls(&self) -> u32 {
        self.core.stall_polls
    }

    pub fn last_poll_diagnostic(&self) -> Option<&str> {
        self.last_poll_diagnostic.as_deref()
    }

    /// Apply a user intent
    pub fn apply(&mut self, intent: Intent) -> Decision {
        let before = self.core.clone();

        if self.core.pending.is_some() {
            if !self.core.stalled {
                return self.ignore(IgnoreReason::TransitionInFlight, &before);
            }
            // A stalled transition gives way; judge the intent against what was last observed
            self.abandon_pending();
        }

        match intent {
            Intent::SelectAndConnect(name) => self.select_and_connect(name, &before),
            Intent::Toggle => self.toggle(&before),
        }
    }

    fn select_and_connect(&mut self, name: TunnelName, before: &Core) -> Decision {
        if self.core.active.is_none() {
            self.core.selected = Some(name.clone());
            return self.start(name, before);
        }

        if self.core.active.is_named(&name) {
            // Selecting the running tunnel again switches it off
            self.core.selected = Some(name.clone());
            return self.stop(StopTarget::Tunnel(name), before);
        }

        let Some(from) = self.stop_target() else {
            return self.ignore(IgnoreReason::NoStopTarget, before);
        };

        self.core.selected = Some(name.clone());
        self.begin(
            Phase::Disconnecting,
            PendingTransition::Switch {
                from: from.clone(),
                to: name.clone(),
            },
        );
        self.decide(
            IntentOutcome::Switching {
                from: from.clone(),
                to: name.clone(),
            },
            vec![ToolCommand::Down(from), ToolCommand::Up(name)],
            before,
        )
    }

    fn toggle(&mut self, before: &Core) -> Decision {
        if self.core.active.is_some() {
            return match self.stop_target() {
                Some(target) => self.stop(target, before),
                None => self.ignore(IgnoreReason::NoStopTarget, before),
            };
        }

        match self.core.selected.clone() {
            Some(name) => self.start(name, before),
            None => self.ignore(IgnoreReason::NothingSelected, before),
        }
    }

    fn start(&mut self, name: TunnelName, before: &Core) -> Decision {
        self.begin(
            Phase::Connecting,
            PendingTransition::Start {
                target: name.clone(),
            },
        );
        self.decide(
            IntentOutcome::Starting {
                tunnel: name.clone(),
            },
            vec![ToolCommand::Up(name)],
            before,
        )
    }

    fn stop(&mut self, target: StopTarget, before: &Core) -> Decision {
        self.begin(
            Phase::Disconnecting,
            PendingTransition::Stop {
                target: target.clone(),
            },
        );
        self.decide(
            IntentOutcome::Stopping {
                target: target.clone(),
            },
            vec![ToolCommand::Down(target)],
            before,
        )
    }

    fn begin(&mut self, phase: Phase, pending: PendingTransition) {
        self.core.phase = phase;
        self.core.pending = Some(pending);
        self.core.stall_polls = 0;
        self.core.stalled = false;
    }

    fn decide(
        &self,
        outcome: IntentOutcome,
        commands: Vec<ToolCommand>,
        before: &Core,
    ) -> Decision {
        Decision {
            outcome,
            commands,
            changed: self.core != *before,
        }
    }

    fn ignore(&self, reason: IgnoreReason, before: &Core) -> Decision {
        self.decide(IntentOutcome::Ignored { reason }, Vec::new(), before)
    }

    fn abandon_pending(&mut self) {
        self.core.pending = None;
        self.core.stall_polls = 0;
        self.core.stalled = false;
        self.core.phase = self.settled_phase();
    }

    fn settled_phase(&self) -> Phase {
        if self.core.active.is_some() {
            Phase::Connected
        } else {
            Phase::Idle
        }
    }

    /// What to pass to `wg-quick down` for the active tunnel
    fn stop_target(&self) -> Option<StopTarget> {
        match &self.core.active {
            ActiveTunnel::Resolved(name) => Some(StopTarget::Tunnel(name.clone())),
            ActiveTunnel::Unresolved => self
                .core
                .active_interface
                .clone()
                .map(StopTarget::Interface),
            ActiveTunnel::None => None,
        }
    }

    /// Fold one poll result into the session
    pub fn fold(&mut self, poll: &PollResult, at: DateTime<Utc>) -> FoldReport {
        let before = self.core.clone();
        let mut report = FoldReport::default();

        self.polls += 1;
        self.last_poll_at = Some(at);

        if poll.is_failure() {
            // A failed sample tells nothing about the tunnel; keep the phase
            self.core.consecutive_poll_failures += 1;
            self.last_poll_diagnostic = poll.diagnostic.clone();
            report.failures = Some(self.core.consecutive_poll_failures);
            if self.core.pending.is_some() {
                report.stalled_now = self.count_unconfirmed_poll();
            }
            report.changed = self.core != before;
            return report;
        }

        if self.core.consecutive_poll_failures > 0 {
            report.recovered_after = Some(self.core.consecutive_poll_failures);
        }
        self.core.consecutive_poll_failures = 0;
        self.last_poll_diagnostic = None;
        self.last_poll_raw = poll.raw.clone();
        self.core.active = poll.active_tunnel.clone();
        self.core.active_interface = poll.interface.clone();

        let active = poll.has_active_interface;

        match self.core.pending.clone() {
            None => self.core.phase = self.settled_phase(),
            Some(PendingTransition::Start { .. }) => {
                if active {
                    self.settle();
                } else {
                    report.stalled_now = self.count_unconfirmed_poll();
                }
            }
            Some(PendingTransition::Stop { .. }) => {
                if active {
                    report.stalled_now = self.count_unconfirmed_poll();
                } else {
                    self.settle();
                }
            }
            Some(PendingTransition::Switch { to, .. }) => {
                if poll.active_tunnel.is_named(&to) {
                    self.settle();
                } else if !active {
                    // Old tunnel is gone; now waiting for the new one
                    self.begin(Phase::Connecting, PendingTransition::Start { target: to });
                } else {
                    report.stalled_now = self.count_unconfirmed_poll();
                }
            }
        }

        report.changed = self.core != before;
        report
    }

    /// A start or stop command failed; drop the transition it was driving
    ///
    /// The phase falls back to the last observed reality and the next poll
    /// corrects it. Returns whether anything changed.
    pub fn dispatch_failed(&mut self) -> bool {
        let before = self.core.clone();
        if self.core.pending.is_some() {
            self.settle();
        }
        self.core != before
    }

    fn settle(&mut self) {
        self.core.pending = None;
        self.core.stall_polls = 0;
        self.core.stalled = false;
        self.core.phase = self.settled_phase();
    }

    /// Returns true when this poll made the transition stalled
    fn count_unconfirmed_poll(&mut self) -> bool {
        self.core.stall_polls = self.core.stall_polls.saturating_add(1);
        if !self.core.stalled && self.core.stall_polls >= self.stall_threshold {
            self.core.stalled = true;
            return true;
        }
        false
    }

    pub fn snapshot(&self, revision: u64, updated_at: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.core.phase,
            selected_tunnel: self.core.selected.clone(),
            active_tunnel: self.core.active.clone(),
            active_interface: self.core.active_interface.clone(),
            pending: self.core.pending.clone(),
            stalled: self.core.stalled,
            stall_polls: self.core.stall_polls,
            consecutive_poll_failures: self.core.consecutive_poll_failures,
            last_poll_raw: self.last_poll_raw.clone(),
            polls: self.polls,
            last_poll_at: self.last_poll_at,
            updated_at,
            revision,
        }
    }
}
