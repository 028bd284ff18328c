//! Engine actor.
//!
//! One task owns the [`OrderLifecycleManager`]; the timing loops talk to it
//! through [`EngineHandle`] commands. Commands are handled strictly one at a
//! time, so offer mutations never interleave, and shutdown only takes effect
//! between commands.

use std::time::Duration;

use lend_core::{Offer, OfferRequest};
use lend_strategy::LadderPlan;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventQueue};
use crate::lifecycle::{OrderLifecycleManager, ReconcileReport, ResyncReport, StartupReport};
use crate::state::EngineSnapshot;

const COMMAND_QUEUE_CAPACITY: usize = 32;

// ============================================================================
// Commands
// ============================================================================

/// Result of a rebalance request.
#[derive(Debug, Clone)]
pub enum RebalanceOutcome {
    /// Plan matched the resting ladder, nothing was touched.
    Unchanged,
    Reconciled {
        report: ReconcileReport,
        /// Offers cancelled by a full reset run first, if one was due.
        reset: Option<usize>,
    },
}

#[derive(Debug)]
pub enum EngineCommand {
    Rebalance {
        plan: LadderPlan,
        /// Bypass the unchanged-plan skip.
        force: bool,
        reply: oneshot::Sender<EngineResult<RebalanceOutcome>>,
    },
    PlaceOpportunistic {
        request: OfferRequest,
        /// Dropped unprocessed if not picked up by then.
        deadline: Instant,
        reply: oneshot::Sender<EngineResult<Offer>>,
    },
    Resync {
        deadline: Instant,
        reply: oneshot::Sender<EngineResult<ResyncReport>>,
    },
    ForceReset {
        reply: oneshot::Sender<EngineResult<usize>>,
    },
    /// Run a full reset only if the reset interval has elapsed.
    ResetIfDue {
        reply: oneshot::Sender<EngineResult<Option<usize>>>,
    },
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable client for the engine actor.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    snapshot: watch::Receiver<EngineSnapshot>,
}

impl EngineHandle {
    /// Latest published state.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot.clone()
    }

    /// Reconcile the ladder with `plan`, running a full reset first if due.
    pub async fn rebalance(&self, plan: LadderPlan, force: bool) -> EngineResult<RebalanceOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Rebalance { plan, force, reply })
            .await?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    /// Place a protected offer, giving up with [`EngineError::Busy`] if the
    /// engine cannot take the command within `wait`.
    pub async fn place_opportunistic(
        &self,
        request: OfferRequest,
        wait: Duration,
    ) -> EngineResult<Offer> {
        let deadline = Instant::now() + wait;
        let (reply, rx) = oneshot::channel();
        self.send_by(
            EngineCommand::PlaceOpportunistic {
                request,
                deadline,
                reply,
            },
            deadline,
        )
        .await?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    pub async fn resync(&self, wait: Duration) -> EngineResult<ResyncReport> {
        let deadline = Instant::now() + wait;
        let (reply, rx) = oneshot::channel();
        self.send_by(EngineCommand::Resync { deadline, reply }, deadline)
            .await?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    pub async fn force_reset(&self) -> EngineResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::ForceReset { reply }).await?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    /// Full reset if one is due, without reconciling a ladder. Returns how
    /// many offers were cancelled, or `None` if no reset was due.
    pub async fn reset_if_due(&self) -> EngineResult<Option<usize>> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::ResetIfDue { reply }).await?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    async fn send(&self, command: EngineCommand) -> EngineResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| EngineError::Stopped)
    }

    async fn send_by(&self, command: EngineCommand, deadline: Instant) -> EngineResult<()> {
        match tokio::time::timeout_at(deadline, self.tx.send(command)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(EngineError::Stopped),
            Err(_) => Err(EngineError::Busy),
        }
    }
}

// ============================================================================
// Actor
// ============================================================================

pub struct EngineActor {
    manager: OrderLifecycleManager,
    rx: mpsc::Receiver<EngineCommand>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    events: EventQueue,
    hysteresis: bool,
    shutdown: CancellationToken,
}

/// Create the actor and its handle.
pub fn engine_channel(
    manager: OrderLifecycleManager,
    events: EventQueue,
    hysteresis: bool,
    shutdown: CancellationToken,
) -> (EngineActor, EngineHandle) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (snapshot_tx, snapshot_rx) = watch::channel(manager.snapshot());
    let actor = EngineActor {
        manager,
        rx,
        snapshot_tx,
        events,
        hysteresis,
        shutdown,
    };
    let handle = EngineHandle {
        tx,
        snapshot: snapshot_rx,
    };
    (actor, handle)
}

impl EngineActor {
    /// Rebuild state from the exchange. Call before [`Self::run`].
    pub async fn initialize(&mut self, cancel_existing: bool) -> EngineResult<StartupReport> {
        let report = self.manager.initialize(cancel_existing).await;
        self.publish();
        report
    }

    /// Process commands until shutdown or a fatal error.
    pub async fn run(mut self) -> EngineResult<()> {
        info!("Engine actor started");
        loop {
            let command = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            if let Err(e) = self.handle(command).await {
                error!(error = %e, "Fatal engine error, halting");
                self.events.push(EngineEvent::Halted {
                    reason: e.to_string(),
                });
                self.shutdown.cancel();
                return Err(EngineError::Halted(e.to_string()));
            }
        }
        info!("Engine actor stopped");
        Ok(())
    }

    /// Returns `Err` only for fatal errors; everything else goes back to
    /// the caller through the reply channel.
    async fn handle(&mut self, command: EngineCommand) -> EngineResult<()> {
        let fatal = match command {
            EngineCommand::Rebalance { plan, force, reply } => {
                let result = self.rebalance(&plan, force).await;
                let fatal = fatal_of(&result);
                let _ = reply.send(result);
                fatal
            }
            EngineCommand::PlaceOpportunistic {
                request,
                deadline,
                reply,
            } => {
                if Instant::now() > deadline {
                    debug!("Opportunistic command expired before pickup");
                    let _ = reply.send(Err(EngineError::Busy));
                    return Ok(());
                }
                let result = self.manager.place_opportunistic(request).await;
                let fatal = fatal_of(&result);
                let _ = reply.send(result);
                fatal
            }
            EngineCommand::Resync { deadline, reply } => {
                if Instant::now() > deadline {
                    let _ = reply.send(Err(EngineError::Busy));
                    return Ok(());
                }
                let result = self.manager.resync().await;
                let fatal = fatal_of(&result);
                let _ = reply.send(result);
                fatal
            }
            EngineCommand::ForceReset { reply } => {
                let result = self.manager.force_full_reset().await;
                let fatal = fatal_of(&result);
                let _ = reply.send(result);
                fatal
            }
            EngineCommand::ResetIfDue { reply } => {
                let result = self.reset_if_due().await;
                let fatal = fatal_of(&result);
                let _ = reply.send(result);
                fatal
            }
        };

        self.publish();
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn reset_if_due(&mut self) -> EngineResult<Option<usize>> {
        if !self.manager.reset_due() {
            return Ok(None);
        }
        info!("Reset interval elapsed, running full reset");
        Ok(Some(self.manager.force_full_reset().await?))
    }

    async fn rebalance(&mut self, plan: &LadderPlan, force: bool) -> EngineResult<RebalanceOutcome> {
        let reset = self.reset_if_due().await?;

        if reset.is_none() && !force && self.hysteresis && self.manager.matches_plan(plan) {
            debug!(tiers = plan.tiers.len(), "Plan unchanged, skipping reconcile");
            return Ok(RebalanceOutcome::Unchanged);
        }

        if force {
            info!("Forced rebalance");
        }
        let report = self.manager.reconcile_with_plan(plan).await?;
        Ok(RebalanceOutcome::Reconciled { report, reset })
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.manager.snapshot());
    }
}

fn fatal_of<T>(result: &EngineResult<T>) -> Option<EngineError> {
    match result {
        Err(e) if e.is_fatal() => Some(e.clone()),
        _ => None,
    }
}
