//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use lend_core::{Amount, Rate};
use lend_engine::{
    EngineEvent, EventQueue, LifecycleConfig, ManualClock, OrderLifecycleManager,
};
use lend_exchange::PaperExchange;
use lend_strategy::config::default_schedule;
use lend_strategy::{LadderPlan, LadderTier};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

pub const CURRENCY: &str = "USD";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn lifecycle_config() -> LifecycleConfig {
    LifecycleConfig {
        currency: CURRENCY.to_string(),
        retained: Amount::ZERO,
        min_offer_amount: Amount::new(Decimal::from(150)),
        amount_decimals: 0,
        protection_window: chrono::Duration::minutes(5),
        reset_interval: chrono::Duration::hours(6),
    }
}

pub struct Harness {
    pub paper: Arc<PaperExchange>,
    pub clock: Arc<ManualClock>,
    pub manager: OrderLifecycleManager,
    pub queue: EventQueue,
    pub events: mpsc::Receiver<EngineEvent>,
}

impl Harness {
    pub fn with_balance(balance: Decimal) -> Self {
        Self::with_config(balance, lifecycle_config())
    }

    pub fn with_config(balance: Decimal, config: LifecycleConfig) -> Self {
        let paper = Arc::new(PaperExchange::with_balance(CURRENCY, balance));
        let clock = Arc::new(ManualClock::new(t0()));
        let (queue, events) = EventQueue::channel(1024);
        let manager = OrderLifecycleManager::new(
            paper.clone(),
            clock.clone(),
            queue.clone(),
            default_schedule(),
            config,
        );
        Self {
            paper,
            clock,
            manager,
            queue,
            events,
        }
    }

    /// Everything emitted so far.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Plan from `(rate, tenor_days, amount)` triples, lowest rate first.
pub fn plan(tiers: &[(Decimal, u32, Decimal)]) -> LadderPlan {
    let tiers: Vec<LadderTier> = tiers
        .iter()
        .enumerate()
        .map(|(index, (rate, tenor_days, amount))| LadderTier {
            index,
            rate: Rate::new(*rate),
            tenor_days: *tenor_days,
            amount: Amount::new(*amount),
            weight: Decimal::ZERO,
        })
        .collect();
    let budget = tiers.iter().map(|t| t.amount).sum();
    LadderPlan {
        base_rate: tiers.first().map(|t| t.rate).unwrap_or(Rate::ZERO),
        budget,
        tiers,
        dropped: Vec::new(),
    }
}
