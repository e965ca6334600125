//! The Engine: owns every running [`Simulation`], enforces the
//! concurrency cap, and drains the Ingestor's two market channels onto
//! each Simulation's inbound queue.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sim_bus::EventBus;
use sim_store::Store;
use sim_types::{
    EngineEvent, EngineEventKind, ExitReason, RunStatus, SimError, SimResult, SimulationRun,
    SimulationStatus, SimulationSummary, Token, Trade,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::simulation::{EntryOutcome, Simulation, SNAPSHOT_INTERVAL};

/// Inbound command queue capacity per running Simulation. Proportional
/// to expected event rate, per the component design.
const SIM_QUEUE_CAPACITY: usize = 1024;

/// Grace period after a stop request before the Engine gives up waiting
/// on a Simulation's graceful drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Retry policy for a Store write on the position-close path.
const STORE_RETRY_ATTEMPTS: u32 = 2;
const STORE_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// One market event resolved from the raw upstream feed, ready to fan
/// out to every running Simulation.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Token(Token),
    Trade(Trade),
}

enum SimCommand {
    Market(MarketEvent),
    QuerySummary(oneshot::Sender<SimulationSummary>),
    Stop(oneshot::Sender<()>),
}

struct SimulationHandle {
    sender: mpsc::Sender<SimCommand>,
    join: JoinHandle<()>,
    run_id: Uuid,
}

pub struct Engine {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    running: DashMap<Uuid, SimulationHandle>,
    active_count: AtomicUsize,
    max_concurrent: usize,
    draining: AtomicBool,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, bus: Arc<EventBus>, max_concurrent_simulations: usize) -> Self {
        Self {
            store,
            bus,
            running: DashMap::new(),
            active_count: AtomicUsize::new(0),
            max_concurrent: max_concurrent_simulations,
            draining: AtomicBool::new(false),
        }
    }

    /// `StartSimulation`.
    pub async fn start_simulation(&self, strategy_id: Uuid) -> SimResult<()> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(SimError::StateConflict("engine is shutting down".into()));
        }
        if self.running.contains_key(&strategy_id) {
            return Err(SimError::AlreadyRunning(strategy_id.to_string()));
        }
        if self.active_count.load(Ordering::SeqCst) >= self.max_concurrent {
            return Err(SimError::CapacityExhausted {
                active: self.active_count.load(Ordering::SeqCst),
                max: self.max_concurrent,
            });
        }

        let strategy = self
            .store
            .get_strategy_by_id(strategy_id)
            .await?
            .ok_or_else(|| SimError::not_found(format!("strategy {strategy_id}")))?;

        let run = SimulationRun::new(strategy_id, serde_json::to_value(&strategy.config).unwrap_or_default());
        let run = self.store.create_run(run).await?;
        let run_id = run.id;

        self.active_count.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(SIM_QUEUE_CAPACITY);
        let sim = Simulation::new(strategy_id, run_id, strategy.config);
        let store = self.store.clone();
        let bus = self.bus.clone();

        self.store.update_run_status(run_id, RunStatus::Running).await?;
        self.bus.publish(EngineEvent::new(strategy_id, EngineEventKind::SimulationStarted { run_id }));

        let join = tokio::spawn(run_simulation(sim, rx, store, bus));

        self.running.insert(strategy_id, SimulationHandle { sender: tx, join, run_id });

        Ok(())
    }

    /// `StopSimulation`. Returns `NotFound` without side effects if the
    /// strategy has no running Simulation. If the Simulation task
    /// panicked rather than acking gracefully, the run is marked failed
    /// here instead of by the task itself (which never got the chance).
    pub async fn stop_simulation(&self, strategy_id: Uuid) -> SimResult<()> {
        let Some((_, handle)) = self.running.remove(&strategy_id) else {
            return Err(SimError::not_found(format!("running simulation for strategy {strategy_id}")));
        };
        let run_id = handle.run_id;

        let (ack_tx, ack_rx) = oneshot::channel();
        if handle.sender.send(SimCommand::Stop(ack_tx)).await.is_ok() {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, ack_rx).await;
        }
        let join_result = tokio::time::timeout(SHUTDOWN_GRACE, handle.join).await;
        self.active_count.fetch_sub(1, Ordering::SeqCst);

        if let Ok(Err(join_err)) = join_result {
            if join_err.is_panic() {
                self.mark_run_panicked(strategy_id, run_id).await;
            }
        }
        Ok(())
    }

    /// Persists a panicked Simulation's run as failed and publishes the
    /// final `simulation_completed` event — the bookkeeping the task
    /// itself would have done on a graceful `Stop`, had it survived to do
    /// it.
    async fn mark_run_panicked(&self, strategy_id: Uuid, run_id: Uuid) {
        error!(%strategy_id, %run_id, "simulation task panicked, marking run failed");
        if let Err(e) = self.store.update_run_status(run_id, RunStatus::Failed).await {
            error!(error = %e, %run_id, "failed to persist failed run status after panic");
        }
        self.bus.publish(EngineEvent::new(
            strategy_id,
            EngineEventKind::SimulationCompleted {
                total_iterations: 0,
                execution_time_sec: 0,
                failed: true,
            },
        ));
    }

    /// `GetSimulationStatus`.
    pub async fn get_simulation_status(&self, strategy_id: Uuid) -> SimResult<SimulationStatus> {
        if let Some(handle) = self.running.get(&strategy_id) {
            return Ok(SimulationStatus {
                strategy_id,
                run_id: Some(handle.run_id),
                running: true,
                status: Some(RunStatus::Running),
            });
        }
        let runs = self.store.get_runs_by_strategy(strategy_id).await?;
        match runs.into_iter().max_by_key(|r| r.start_time) {
            Some(run) => Ok(SimulationStatus {
                strategy_id,
                run_id: Some(run.id),
                running: false,
                status: Some(run.status),
            }),
            None => {
                self.store
                    .get_strategy_by_id(strategy_id)
                    .await?
                    .ok_or_else(|| SimError::not_found(format!("strategy {strategy_id}")))?;
                Ok(SimulationStatus { strategy_id, run_id: None, running: false, status: None })
            }
        }
    }

    /// `GetRunningSimulations`.
    pub async fn get_running_simulations(&self) -> Vec<SimulationSummary> {
        let strategy_ids: Vec<Uuid> = self.running.iter().map(|e| *e.key()).collect();
        let mut summaries = Vec::with_capacity(strategy_ids.len());
        for strategy_id in strategy_ids {
            if let Ok(summary) = self.query_running_summary(strategy_id).await {
                summaries.push(summary);
            }
        }
        summaries
    }

    /// `GetSimulationSummary`.
    pub async fn get_simulation_summary(&self, strategy_id: Uuid) -> SimResult<SimulationSummary> {
        if self.running.contains_key(&strategy_id) {
            return self.query_running_summary(strategy_id).await;
        }

        let metric = self.store.latest_metric_by_strategy(strategy_id).await?;
        let runs = self.store.get_runs_by_strategy(strategy_id).await?;
        let latest_run = runs.into_iter().max_by_key(|r| r.start_time);
        match (metric, latest_run) {
            (Some(metric), Some(run)) => {
                let initial_balance = self
                    .store
                    .get_strategy_by_id(strategy_id)
                    .await?
                    .map(|s| s.config.initial_balance)
                    .unwrap_or(metric.balance);
                Ok(SimulationSummary {
                    strategy_id,
                    run_id: Some(run.id),
                    running: false,
                    status: Some(run.status),
                    started_at: Some(run.start_time),
                    balance: metric.balance,
                    initial_balance,
                    roi: metric.roi,
                    win_rate: metric.win_rate,
                    closed_count: metric.total_trades,
                    win_count: metric.successful_trades,
                    loss_count: metric.total_trades.saturating_sub(metric.successful_trades),
                    open_count: 0,
                    cumulative_profit: metric.avg_profit * Decimal::from(metric.successful_trades),
                    peak_balance: metric.balance,
                    max_drawdown: metric.max_drawdown,
                })
            }
            _ => Err(SimError::not_found(format!("simulation summary for strategy {strategy_id}"))),
        }
    }

    async fn query_running_summary(&self, strategy_id: Uuid) -> SimResult<SimulationSummary> {
        let handle = self
            .running
            .get(&strategy_id)
            .ok_or_else(|| SimError::not_found(format!("running simulation for strategy {strategy_id}")))?;
        let (tx, rx) = oneshot::channel();
        handle
            .sender
            .send(SimCommand::QuerySummary(tx))
            .await
            .map_err(|_| SimError::Internal("simulation task is gone".into()))?;
        drop(handle);
        rx.await.map_err(|_| SimError::Internal("simulation task dropped the summary query".into()))
    }

    /// `Shutdown`: stops every running Simulation with reason `manual`
    /// and refuses any subsequent `StartSimulation`.
    pub async fn shutdown(&self) {
        self.draining.store(true, Ordering::SeqCst);
        let strategy_ids: Vec<Uuid> = self.running.iter().map(|e| *e.key()).collect();
        for strategy_id in strategy_ids {
            if let Err(e) = self.stop_simulation(strategy_id).await {
                warn!(strategy_id = %strategy_id, error = %e, "error stopping simulation during shutdown");
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Resolves a raw upstream token/trade event against the Store and
    /// fans it out to every running Simulation. An unresolvable trade
    /// (unknown mint) is discarded per the entry-evaluation contract.
    pub async fn ingest_and_fan_out(&self, event: sim_types::IngestEvent) -> SimResult<()> {
        match event {
            sim_types::IngestEvent::TokenCreated {
                mint, creator, name, symbol, created_timestamp, market_cap, usd_market_cap, complete, ..
            } => {
                let created_at = chrono::DateTime::from_timestamp(created_timestamp, 0).unwrap_or_else(Utc::now);
                let mut token = Token::new(mint, created_at);
                token.creator = creator;
                token.name = name;
                token.symbol = symbol;
                token.market_cap = market_cap;
                token.usd_market_cap = usd_market_cap;
                token.complete = complete.unwrap_or(false);
                let token = self.store.upsert_token_by_mint(token).await?;
                self.fan_out(MarketEvent::Token(token));
            }
            sim_types::IngestEvent::TradeCreated {
                mint, signature, sol_amount, token_amount, is_buy, user, timestamp, market_cap, usd_market_cap,
            } => {
                let Some(token) = self.store.get_token_by_mint(&mint).await? else {
                    return Ok(());
                };
                let trade = Trade {
                    id: Uuid::new_v4(),
                    token_id: token.id,
                    mint_address: mint,
                    signature,
                    sol_amount,
                    token_amount,
                    is_buy,
                    user_address: user,
                    timestamp: chrono::DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now),
                    market_cap,
                    usd_market_cap,
                };
                let trade = self.store.append_trade(trade).await?;
                self.fan_out(MarketEvent::Trade(trade));
            }
        }
        Ok(())
    }

    fn fan_out(&self, event: MarketEvent) {
        let mut panicked = Vec::new();
        for entry in self.running.iter() {
            if entry.join.is_finished() {
                // The task ended without going through `stop_simulation`'s
                // registration removal first — it panicked.
                panicked.push(*entry.key());
                continue;
            }
            if entry.sender.try_send(SimCommand::Market(event.clone())).is_err() {
                warn!(strategy_id = %entry.key(), "simulation inbound queue full, dropping market event");
            }
        }
        for strategy_id in panicked {
            self.reap_panicked(strategy_id);
        }
    }

    /// Isolates a panicked Simulation: removes its registration, frees its
    /// concurrency slot, and schedules the same run-failed bookkeeping
    /// `stop_simulation` performs on the panic-during-stop path.
    fn reap_panicked(&self, strategy_id: Uuid) {
        let Some((_, handle)) = self.running.remove(&strategy_id) else {
            return;
        };
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        let store = self.store.clone();
        let bus = self.bus.clone();
        let run_id = handle.run_id;
        tokio::spawn(async move {
            error!(%strategy_id, %run_id, "simulation task ended without a graceful stop, marking run failed");
            if let Err(e) = store.update_run_status(run_id, RunStatus::Failed).await {
                error!(error = %e, %run_id, "failed to persist failed run status after panic");
            }
            bus.publish(EngineEvent::new(
                strategy_id,
                EngineEventKind::SimulationCompleted {
                    total_iterations: 0,
                    execution_time_sec: 0,
                    failed: true,
                },
            ));
        });
    }
}

async fn persist_close_with_retry(
    store: &Arc<dyn Store>,
    id: Uuid,
    exit_price: Decimal,
    exit_timestamp: chrono::DateTime<Utc>,
    exit_usd_market_cap: Option<Decimal>,
    profit_loss: Decimal,
    exit_reason: ExitReason,
) -> bool {
    for attempt in 0..=STORE_RETRY_ATTEMPTS {
        match store
            .close_trade(id, exit_price, exit_timestamp, exit_usd_market_cap, profit_loss, exit_reason)
            .await
        {
            Ok(_) => return true,
            Err(e) if attempt < STORE_RETRY_ATTEMPTS => {
                warn!(error = %e, attempt, "store close_trade failed, retrying");
                tokio::time::sleep(STORE_RETRY_BACKOFF).await;
            }
            Err(e) => {
                error!(error = %e, %id, "store close_trade failed after retries, keeping in-memory close");
                return false;
            }
        }
    }
    false
}

/// The per-Simulation task body. Processes its inbound queue strictly in
/// order; the only other wakeup sources are the 5 s snapshot ticker and
/// the earliest outstanding max-hold deadline.
async fn run_simulation(mut sim: Simulation, mut rx: mpsc::Receiver<SimCommand>, store: Arc<dyn Store>, bus: Arc<EventBus>) {
    let strategy_id = sim.strategy_id;
    let run_id = sim.run_id;
    let started_at = Utc::now();
    let mut snapshot_tick = tokio::time::interval(SNAPSHOT_INTERVAL);
    let mut run_failed = false;

    loop {
        let hold_deadline = sim.next_hold_deadline();
        let timer = async {
            match hold_deadline {
                Some(deadline) => {
                    let dur = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::time::sleep(dur).await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = snapshot_tick.tick() => {
                emit_snapshot(&sim, &store, &bus, run_id, run_failed).await;
            }
            _ = timer, if hold_deadline.is_some() => {
                let now = Utc::now();
                for closed in sim.process_timer_tick(now) {
                    let mint = sim.token_mint(closed.token_id).unwrap_or_default().to_string();
                    if !close_and_publish(&store, &bus, strategy_id, &closed, mint).await {
                        run_failed = true;
                    }
                }
            }
            cmd = rx.recv() => {
                match cmd {
                    None => break,
                    Some(SimCommand::Market(MarketEvent::Token(token))) => sim.observe_token(token),
                    Some(SimCommand::Market(MarketEvent::Trade(trade))) => {
                        let now = Utc::now();
                        sim.record_trade_iteration();
                        if trade.is_buy {
                            match sim.process_buy(&trade, now) {
                                Some(EntryOutcome::Opened(opened)) => {
                                    match store.insert_open_trade(opened.clone()).await {
                                        Ok(_) => {
                                            bus.publish(EngineEvent::new(strategy_id, EngineEventKind::TradeExecuted {
                                                token_mint: trade.mint_address.clone(),
                                                price: opened.entry_price,
                                                amount: opened.position_size,
                                                entry_market_cap: opened.entry_usd_market_cap,
                                                current_balance: sim.balance,
                                            }));
                                        }
                                        Err(e) => {
                                            error!(error = %e, "failed to persist opened position");
                                            run_failed = true;
                                        }
                                    }
                                }
                                Some(EntryOutcome::BalanceDepleted { remaining_balance, position_size }) => {
                                    bus.publish(EngineEvent::new(strategy_id, EngineEventKind::SimulationBalanceDepleted {
                                        remaining_balance,
                                        position_size,
                                    }));
                                }
                                None => {}
                            }
                        }
                        if let Some(mark) = trade.price() {
                            if let Some(closed) = sim.process_mark(trade.token_id, mark, now) {
                                let mint = sim.token_mint(closed.token_id).unwrap_or_default().to_string();
                                if !close_and_publish(&store, &bus, strategy_id, &closed, mint).await {
                                    run_failed = true;
                                }
                            }
                        }
                    }
                    Some(SimCommand::QuerySummary(tx)) => {
                        let _ = tx.send(sim.summary(true, Some(started_at), Some(RunStatus::Running)));
                    }
                    Some(SimCommand::Stop(ack)) => {
                        let now = Utc::now();
                        for closed in sim.close_all_manual(now) {
                            let mint = sim.token_mint(closed.token_id).unwrap_or_default().to_string();
                            if !close_and_publish(&store, &bus, strategy_id, &closed, mint).await {
                                run_failed = true;
                            }
                        }
                        let final_status = if run_failed { RunStatus::Failed } else { RunStatus::Completed };
                        if let Err(e) = store.update_run_status(run_id, final_status).await {
                            error!(error = %e, "failed to record final run status");
                        }
                        bus.publish(EngineEvent::new(strategy_id, EngineEventKind::SimulationCompleted {
                            total_iterations: sim.iterations(),
                            execution_time_sec: (Utc::now() - started_at).num_seconds().max(0) as u64,
                            failed: run_failed,
                        }));
                        let _ = ack.send(());
                        return;
                    }
                }
            }
        }
    }

    info!(%strategy_id, "simulation task ending without an explicit stop command");
}

async fn close_and_publish(
    store: &Arc<dyn Store>,
    bus: &Arc<EventBus>,
    strategy_id: Uuid,
    closed: &sim_types::SimulatedTrade,
    token_mint: String,
) -> bool {
    let ok = persist_close_with_retry(
        store,
        closed.id,
        closed.exit_price.unwrap_or_default(),
        closed.exit_timestamp.unwrap_or_else(Utc::now),
        closed.exit_usd_market_cap,
        closed.profit_loss.unwrap_or_default(),
        closed.exit_reason.unwrap_or(ExitReason::Manual),
    )
    .await;

    bus.publish(EngineEvent::new(strategy_id, EngineEventKind::TradeClosed {
        token_mint,
        entry_price: closed.entry_price,
        exit_price: closed.exit_price.unwrap_or_default(),
        profit_loss: closed.profit_loss.unwrap_or_default(),
        profit_loss_pct: closed.exit_price.map(|p| closed.pnl_pct(p)).unwrap_or_default(),
        exit_reason: closed.exit_reason.unwrap_or(ExitReason::Manual),
        entry_market_cap: closed.entry_usd_market_cap,
        exit_market_cap: closed.exit_usd_market_cap,
    }));

    ok
}

async fn emit_snapshot(sim: &Simulation, store: &Arc<dyn Store>, bus: &Arc<EventBus>, run_id: Uuid, run_failed: bool) {
    let strategy_id = sim.strategy_id;
    let snapshot = sim.summary(true, None, None);

    bus.publish(EngineEvent::new(strategy_id, EngineEventKind::SimulationStatus {
        total_trades: snapshot.closed_count + snapshot.open_count,
        active_trades: snapshot.open_count,
        profitable_trades: snapshot.win_count,
        losing_trades: snapshot.loss_count,
        win_rate: snapshot.win_rate,
        roi: snapshot.roi,
        current_balance: snapshot.balance,
        initial_balance: snapshot.initial_balance,
    }));

    let metric = sim_types::StrategyMetric {
        id: Uuid::new_v4(),
        run_id,
        strategy_id,
        win_rate: snapshot.win_rate,
        avg_profit: Decimal::ZERO,
        avg_loss: Decimal::ZERO,
        max_drawdown: snapshot.max_drawdown,
        total_trades: snapshot.closed_count,
        successful_trades: snapshot.win_count,
        balance: snapshot.balance,
        roi: snapshot.roi,
        created_at: Utc::now(),
    };
    if let Err(e) = store.append_metric(metric).await {
        warn!(error = %e, %strategy_id, "failed to append periodic strategy metric");
    }
    if run_failed {
        if let Err(e) = store.update_run_status(run_id, RunStatus::Failed).await {
            error!(error = %e, "failed to record run as failed at snapshot tick");
        }
    }
}
