//! Automation Scheduler: three independent periodic loops — strategy
//! generation, performance analysis, and simulation seeding — each its
//! own long-lived task. A loop never overlaps itself (each tick runs to
//! completion before the next `interval.tick()` resolves) and a late
//! tick is coalesced rather than fired in a catch-up burst, via tokio's
//! interval default `MissedTickBehavior::Burst` being overridden to
//! `Delay`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sim_bus::EventBus;
use sim_engine::Engine;
use sim_store::{Store, TopCriteria};
use sim_types::{EngineEvent, EngineEventKind, Strategy, StrategyConfig};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ai_caller::AiCaller;

const STRATEGY_GEN_TOP_N: usize = 5;
const PERFORMANCE_ANALYSIS_TRADE_WINDOW: usize = 20;
const SIMULATION_SEEDING_INTERVAL: Duration = Duration::from_secs(30);
const STRATEGY_LIST_PAGE: usize = 100;

/// Shared collaborators and per-run bookkeeping for the three loops.
pub struct Scheduler {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    engine: Arc<Engine>,
    ai: Arc<AiCaller>,
    strategies_per_interval: u32,
    max_concurrent_simulations: usize,
    /// Closed-trade count observed at the end of the last performance-analysis
    /// tick, per strategy — used to detect "≥ one closed trade since the
    /// last cycle" without re-analyzing an unchanged run.
    last_analyzed_closed_count: DashMap<Uuid, u64>,
}

/// Handles for the three spawned loops, returned by [`Scheduler::spawn`] so
/// callers can join them on shutdown.
pub struct SchedulerHandles {
    pub strategy_generation: JoinHandle<()>,
    pub performance_analysis: JoinHandle<()>,
    pub simulation_seeding: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        engine: Arc<Engine>,
        ai: Arc<AiCaller>,
        strategies_per_interval: u32,
        max_concurrent_simulations: usize,
    ) -> Self {
        Self {
            store,
            bus,
            engine,
            ai,
            strategies_per_interval,
            max_concurrent_simulations,
            last_analyzed_closed_count: DashMap::new(),
        }
    }

    /// Spawns the three periodic loops. Each exits once `shutdown` is
    /// cancelled.
    pub fn spawn(
        self: Arc<Self>,
        strategy_gen_interval_min: u64,
        performance_analysis_interval_min: u64,
        shutdown: CancellationToken,
    ) -> SchedulerHandles {
        let strategy_generation = {
            let this = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(run_loop(
                "strategy_generation",
                Duration::from_secs(strategy_gen_interval_min.max(1) * 60),
                shutdown,
                move || {
                    let this = this.clone();
                    async move { this.tick_strategy_generation().await }
                },
            ))
        };

        let performance_analysis = {
            let this = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(run_loop(
                "performance_analysis",
                Duration::from_secs(performance_analysis_interval_min.max(1) * 60),
                shutdown,
                move || {
                    let this = this.clone();
                    async move { this.tick_performance_analysis().await }
                },
            ))
        };

        let simulation_seeding = {
            let this = self.clone();
            tokio::spawn(run_loop(
                "simulation_seeding",
                SIMULATION_SEEDING_INTERVAL,
                shutdown,
                move || {
                    let this = this.clone();
                    async move { this.tick_simulation_seeding().await }
                },
            ))
        };

        SchedulerHandles {
            strategy_generation,
            performance_analysis,
            simulation_seeding,
        }
    }

    /// Fetches top-N performers by ROI, prompts the AI Caller for a new
    /// strategy, and persists it marked `ai_enhanced`. Produces at most
    /// `strategies_per_interval` new strategies this tick.
    async fn tick_strategy_generation(&self) {
        let examples = match self.store.top_strategies(TopCriteria::Performance, STRATEGY_GEN_TOP_N).await {
            Ok(examples) => examples,
            Err(e) => {
                error!(error = %e, "strategy generation: failed to load top performers");
                return;
            }
        };

        let metadata = serde_json::json!({
            "examples": examples.iter().map(strategy_example_json).collect::<Vec<_>>(),
        });
        let prompt = format!(
            "Design a new pump.fun momentum strategy. Here are the {} best performing \
             strategies so far, described as JSON; improve on their weaknesses.",
            examples.len()
        );

        for _ in 0..self.strategies_per_interval {
            match self.ai.generate_strategy(&prompt, metadata.clone()).await {
                Ok(generated) => {
                    if let Err(e) = generated.config.validate() {
                        warn!(error = %e, "strategy generation: AI response failed validation");
                        continue;
                    }
                    let name = generated.name.unwrap_or_else(|| format!("ai-strategy-{}", Uuid::new_v4()));
                    let mut strategy = match Strategy::new(name, generated.config) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(error = %e, "strategy generation: could not construct strategy");
                            continue;
                        }
                    };
                    strategy.ai_enhanced = true;
                    strategy.description = generated.description;
                    match self.store.create_strategy(strategy).await {
                        Ok(created) => info!(strategy_id = %created.id, "strategy generation: persisted new AI strategy"),
                        Err(e) => error!(error = %e, "strategy generation: failed to persist strategy"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "strategy generation: AI Caller call failed");
                    break;
                }
            }
        }
    }

    /// Runs one performance-analysis cycle on demand, outside its normal
    /// interval — the `POST /trigger/analyze` path.
    pub async fn trigger_performance_analysis(&self) {
        self.tick_performance_analysis().await;
    }

    /// For each running simulation with at least one newly closed trade
    /// since the last cycle, asks the AI Caller for a qualitative rating
    /// and narrative, then persists and publishes it.
    async fn tick_performance_analysis(&self) {
        for summary in self.engine.get_running_simulations().await {
            if summary.closed_count == 0 {
                continue;
            }
            let previously_seen = self
                .last_analyzed_closed_count
                .get(&summary.strategy_id)
                .map(|v| *v)
                .unwrap_or(0);
            if summary.closed_count <= previously_seen {
                continue;
            }

            let metric = match self.store.latest_metric_by_strategy(summary.strategy_id).await {
                Ok(Some(m)) => m,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, strategy_id = %summary.strategy_id, "performance analysis: failed to load metric");
                    continue;
                }
            };
            let recent_trades = match self
                .store
                .get_closed_trades_by_strategy(summary.strategy_id, PERFORMANCE_ANALYSIS_TRADE_WINDOW)
                .await
            {
                Ok(trades) => trades,
                Err(e) => {
                    error!(error = %e, strategy_id = %summary.strategy_id, "performance analysis: failed to load recent trades");
                    continue;
                }
            };

            let metrics_json = serde_json::json!({
                "win_rate": metric.win_rate,
                "roi": metric.roi,
                "max_drawdown": metric.max_drawdown,
                "total_trades": metric.total_trades,
                "balance": metric.balance,
            });
            let trades_json = serde_json::to_value(&recent_trades).unwrap_or(serde_json::Value::Null);

            match self.ai.analyze_performance(metrics_json.clone(), trades_json).await {
                Ok(analysis) => {
                    self.last_analyzed_closed_count.insert(summary.strategy_id, summary.closed_count);

                    let event = EngineEvent::new(
                        summary.strategy_id,
                        EngineEventKind::AiAnalysis {
                            rating: analysis.rating,
                            analysis: analysis.narrative.clone(),
                            metrics: metrics_json,
                        },
                    );
                    self.bus.publish(event);

                    let row = sim_store::SimulationEventRow {
                        id: Uuid::new_v4(),
                        strategy_id: summary.strategy_id,
                        run_id: summary.run_id,
                        event_type: "ai_analysis".to_string(),
                        payload: serde_json::json!({
                            "rating": analysis.rating,
                            "narrative": analysis.narrative,
                            "suggested_adjustments": analysis.suggested_adjustments,
                        }),
                        created_at: chrono::Utc::now(),
                    };
                    if let Err(e) = self.store.append_event(row).await {
                        error!(error = %e, strategy_id = %summary.strategy_id, "performance analysis: failed to persist ai_analysis event");
                    }
                }
                Err(e) => warn!(error = %e, strategy_id = %summary.strategy_id, "performance analysis: AI Caller call failed"),
            }
        }
    }

    /// Starts simulations for strategies with no running simulation yet,
    /// up to `max_concurrent_simulations`.
    async fn tick_simulation_seeding(&self) {
        let running: std::collections::HashSet<Uuid> = self
            .engine
            .get_running_simulations()
            .await
            .into_iter()
            .map(|s| s.strategy_id)
            .collect();

        let candidates = match self.store.list_public_strategies(STRATEGY_LIST_PAGE, 0).await {
            Ok(strategies) => strategies,
            Err(e) => {
                error!(error = %e, "simulation seeding: failed to list strategies");
                return;
            }
        };

        for strategy in candidates {
            if self.engine.active_count() >= self.max_concurrent_simulations {
                break;
            }
            if running.contains(&strategy.id) {
                continue;
            }
            match self.engine.start_simulation(strategy.id).await {
                Ok(()) => info!(strategy_id = %strategy.id, "simulation seeding: started simulation"),
                Err(sim_types::SimError::CapacityExhausted { .. }) => break,
                Err(e) => warn!(error = %e, strategy_id = %strategy.id, "simulation seeding: failed to start simulation"),
            }
        }
    }
}

fn strategy_example_json(strategy: &Strategy) -> serde_json::Value {
    serde_json::json!({
        "name": strategy.name,
        "config": strategy.config,
    })
}

/// Drives one periodic loop: ticks on `interval`, running `work` to
/// completion between ticks, until `shutdown` is cancelled. Missed ticks
/// are delayed rather than fired back-to-back.
async fn run_loop<F, Fut>(name: &'static str, interval: Duration, shutdown: CancellationToken, mut work: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(loop_name = name, "automation loop shutting down");
                return;
            }
            _ = ticker.tick() => {
                work().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration as StdDuration;

    #[tokio::test(start_paused = true)]
    async fn run_loop_ticks_until_cancelled() {
        let count = Arc::new(AtomicU32::new(0));
        let shutdown = CancellationToken::new();
        let counter = count.clone();

        let handle = tokio::spawn(run_loop("test", StdDuration::from_millis(100), shutdown.clone(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        tokio::time::advance(StdDuration::from_millis(350)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(count.load(Ordering::SeqCst) >= 3);
    }
}
