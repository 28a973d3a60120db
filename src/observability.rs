//! Telemetry handed to sync jobs instead of reaching for global state.
//!
//! Each job phase reports its start and end through a [`SyncTelemetry`]
//! implementation. Production wiring uses [`TracingTelemetry`], which opens a
//! `tracing` span per phase and emits a structured completion event; tests use
//! [`NoopTelemetry`] or their own recorder.

use std::time::{Duration, Instant};

use tracing::{info, warn, Span};
use uuid::Uuid;

use crate::errors::SyncPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Succeeded,
    PartiallyFailed,
    Failed,
    Aborted,
}

pub trait SyncTelemetry: Send + Sync {
    /// Called before the phase runs. The returned span is entered while the phase runs.
    fn phase_started(&self, phase: SyncPhase, user_id: Uuid) -> Span;

    fn phase_finished(&self, phase: SyncPhase, user_id: Uuid, outcome: PhaseOutcome, elapsed: Duration);
}

pub struct TracingTelemetry;

impl SyncTelemetry for TracingTelemetry {
    fn phase_started(&self, phase: SyncPhase, user_id: Uuid) -> Span {
        tracing::info_span!("sync_phase", phase = phase.as_str(), user_id = %user_id)
    }

    fn phase_finished(&self, phase: SyncPhase, user_id: Uuid, outcome: PhaseOutcome, elapsed: Duration) {
        let duration_ms = elapsed.as_millis() as u64;
        match outcome {
            PhaseOutcome::Succeeded | PhaseOutcome::PartiallyFailed => info!(
                phase = phase.as_str(),
                user_id = %user_id,
                outcome = ?outcome,
                duration_ms,
                "sync phase finished"
            ),
            PhaseOutcome::Failed | PhaseOutcome::Aborted => warn!(
                phase = phase.as_str(),
                user_id = %user_id,
                outcome = ?outcome,
                duration_ms,
                "sync phase finished"
            ),
        }
    }
}

pub struct NoopTelemetry;

impl SyncTelemetry for NoopTelemetry {
    fn phase_started(&self, _phase: SyncPhase, _user_id: Uuid) -> Span {
        Span::none()
    }

    fn phase_finished(&self, _phase: SyncPhase, _user_id: Uuid, _outcome: PhaseOutcome, _elapsed: Duration) {}
}

/// Measures one phase and reports it when [`PhaseTimer::finish`] is called.
pub struct PhaseTimer<'a> {
    telemetry: &'a dyn SyncTelemetry,
    phase: SyncPhase,
    user_id: Uuid,
    started: Instant,
}

impl<'a> PhaseTimer<'a> {
    pub fn start(telemetry: &'a dyn SyncTelemetry, phase: SyncPhase, user_id: Uuid) -> (Self, Span) {
        let span = telemetry.phase_started(phase, user_id);
        (
            Self {
                telemetry,
                phase,
                user_id,
                started: Instant::now(),
            },
            span,
        )
    }

    pub fn finish(self, outcome: PhaseOutcome) {
        self.telemetry
            .phase_finished(self.phase, self.user_id, outcome, self.started.elapsed());
    }
}
