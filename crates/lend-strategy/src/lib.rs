//! Lending strategy for the funding bot.
//!
//! Pure computation, no I/O:
//! - `SentimentAnalyzer`: funding utilization → market-pressure signal
//! - `RateOptimizer`: safety factor, dynamic floor and tier count
//! - `LadderQuoteBuilder`: Fibonacci-weighted rate/tenor ladder
//! - `OpportunisticOrderMonitor`: single best placement against live demand
//!
//! # Architecture
//!
//! ```text
//! slow tick → SentimentAnalyzer.analyze()
//!              └─ RateOptimizer.optimize()
//!                   └─ LadderQuoteBuilder.build() → LadderPlan
//!                                                     ↓
//!                                   OrderLifecycleManager.reconcile_with_plan()
//!
//! fast tick → OpportunisticOrderMonitor.scan() → Opportunity
//!                                                     ↓
//!                                   OrderLifecycleManager.place_opportunistic()
//! ```

pub mod config;
pub mod error;
pub mod ladder;
pub mod opportunity;
pub mod optimizer;
pub mod sentiment;

pub use config::{
    FibonacciOrder, OpportunisticConfig, SafetyConfig, SentimentConfig, StrategyConfig,
    MAX_LADDER_STEPS, MAX_WINDOW_SECS,
};
pub use error::{StrategyError, StrategyResult};
pub use ladder::{
    fibonacci_weights, DropReason, DroppedTier, LadderInputs, LadderPlan, LadderQuoteBuilder,
    LadderTier,
};
pub use opportunity::{OpportunisticOrderMonitor, Opportunity, ScanContext};
pub use optimizer::{
    rate_volatility, DefaultPolicy, RateOptimizer, StrategyParameters, StrategyPolicy,
};
pub use sentiment::{SentimentAnalyzer, SentimentMetric};
