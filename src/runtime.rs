use crate::config::RuntimeConfig;
use crate::control::controller::{Controller, ControllerResult};
use crate::control::inputs::Command;
use crate::error::ModelError;
use crate::instance::{LifecycleState, ModelInstance};
use crate::model::StepModel;
use crate::signals::SignalTable;
use crate::store::ParameterStore;
use crate::utils::{CancelToken, HealthFlag, StateCell, StateMarker, try_pin_core};
use anyhow::{Result, anyhow};
use crossbeam::channel::{Sender, TrySendError, bounded};
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;
use std::{hint::spin_loop, thread, time::Duration};

/// Host side of the port buffers: fills the inbound buffer before each tick
/// and consumes the outbound buffer after it.
pub trait PortExchange: Send + 'static {
    /// Inbound and outbound buffer widths this side is wired for, if it
    /// has fixed ones. Checked against the model's ports before spawning.
    fn port_sizes(&self) -> Option<(usize, usize)> {
        None
    }

    fn read_inbound(&mut self, inbound: &mut [f64], timestamp: f64) -> Result<()>;

    fn write_outbound(&mut self, outbound: &[f64], timestamp: f64) -> Result<()>;
}

/// Leaves inputs at zero and discards outputs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullExchange;

impl PortExchange for NullExchange {
    #[inline(always)]
    fn read_inbound(&mut self, _inbound: &mut [f64], _timestamp: f64) -> Result<()> {
        Ok(())
    }

    #[inline(always)]
    fn write_outbound(&mut self, _outbound: &[f64], _timestamp: f64) -> Result<()> {
        Ok(())
    }
}

/// Tick counters published after every tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Successful ticks.
    pub ticks: u64,
    /// Ticks that took longer than the base period.
    pub overruns: u64,
    pub tick_errors: u64,
    pub last_tick_nanos: u64,
}

impl StateMarker for RuntimeStats {}

/// Runtime drives a model instance at its base rate on a dedicated thread.
/// It manages the lifecycle, control commands, cancellation and OS
/// termination signals.
pub struct Runtime<M: StepModel> {
    /// Sender for control commands.
    command_tx: Sender<Command>,
    /// Handle of the spawned tick thread.
    join: Option<JoinHandle<()>>,
    /// Up while the model is running.
    model_health: HealthFlag,
    cancel: CancelToken,
    params: ParameterStore,
    signals: SignalTable,
    stats: Arc<StateCell<RuntimeStats>>,
    _phantom_data: PhantomData<M>,
}

impl<M: StepModel> Runtime<M> {
    /// Returns true if the model is running.
    pub fn is_model_running(&self) -> bool {
        self.model_health.get()
    }

    /// Handle for staging and publishing parameters from the host.
    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    pub fn signals(&self) -> &SignalTable {
        &self.signals
    }

    /// Latest tick counters.
    pub fn stats(&self) -> RuntimeStats {
        (*self.stats.load()).clone()
    }

    /// Counters if a tick completed since `last_seq`; updates `last_seq`.
    pub fn stats_if_changed(&self, last_seq: &mut u64) -> Option<RuntimeStats> {
        self.stats.with_if_changed(last_seq, RuntimeStats::clone)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Queue a control command. Fails if the queue is full or the tick
    /// thread has exited.
    pub fn send(&self, cmd: Command) -> Result<()> {
        self.command_tx.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(_) => anyhow!("command queue is full"),
            TrySendError::Disconnected(_) => anyhow!("runtime thread has exited"),
        })
    }

    /// Blocks until the runtime thread finishes.
    pub fn run_blocking(mut self) -> Result<()> {
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("runtime thread panicked")),
            None => Err(anyhow!("runtime thread already joined")),
        }
    }

    /// Requests shutdown and waits for the thread to end.
    pub fn shutdown(mut self) {
        if let Some(join) = self.join.take() {
            self.command_tx.try_send(Command::Shutdown).ok();
            let _ = join.join();
        }
    }

    /// Wraps the runtime into a guard that auto-shuts down on drop.
    pub fn into_guard(self) -> RuntimeGuard<M> {
        RuntimeGuard(Some(self))
    }

    /// Spawns the runtime and blocks until it ends.
    pub fn spawn_blocking(
        cfg: RuntimeConfig,
        instance: ModelInstance<M>,
        exchange: impl PortExchange,
    ) -> Result<RuntimeStats> {
        let rt = Self::spawn(cfg, instance, exchange)?;
        let stats = rt.stats.clone();
        rt.run_blocking()?;
        Ok((*stats.load()).clone())
    }

    /// Spawns the tick thread that drives the instance lifecycle.
    pub fn spawn(
        cfg: RuntimeConfig,
        mut instance: ModelInstance<M>,
        mut exchange: impl PortExchange,
    ) -> Result<Self> {
        if instance.state() != LifecycleState::Uninitialized {
            return Err(anyhow!(
                "runtime needs an uninitialized model, got {}",
                instance.state()
            ));
        }
        if let Some((inbound, outbound)) = exchange.port_sizes() {
            instance.bind_ports(inbound, outbound)?;
        }

        let max_commands_pending = cfg.max_commands_pending.unwrap_or(1024).max(1);
        let max_commands_drain = cfg.max_commands_drain.unwrap_or(max_commands_pending);
        let model_health = HealthFlag::new(false);
        let cancel = CancelToken::new();
        let stats_cell = StateCell::<RuntimeStats>::new_default();
        let params = instance.params().clone();
        let signals = instance.signals().clone();
        let (command_tx, command_rx) = bounded::<Command>(max_commands_pending);

        let join: JoinHandle<()>;

        {
            let model_health = model_health.clone();
            let cancel = cancel.clone();
            let stats_cell = stats_cell.clone();

            join = thread::Builder::new()
                .name(format!("steprt-{}", instance.info().name))
                .spawn(move || {
                    let term_flag = Arc::new(AtomicBool::new(false));
                    for sig in TERM_SIGNALS {
                        let _ = flag::register(*sig, term_flag.clone());
                    }

                    // Pin to a specific core if requested
                    if let Some(core_id) = cfg.core_id {
                        match try_pin_core(core_id) {
                            Ok(core_id) => {
                                tracing::info!("[StepRuntime] pinned to core: {}", core_id);
                            }
                            Err(e) => {
                                tracing::error!("[StepRuntime] cannot pin core: {:#}", e);
                                return;
                            }
                        }
                    }

                    if let Err(e) = instance.initialize() {
                        tracing::error!("[StepRuntime] model init error: {}", e);
                        return;
                    }
                    if cfg.start_on_init {
                        match instance.start() {
                            Ok(()) => model_health.up(),
                            Err(e) => {
                                tracing::error!("[StepRuntime] model start error: {}", e);
                                Controller::finalize(&mut instance, &model_health);
                                return;
                            }
                        }
                    }

                    let mut controller = Controller::new(command_rx);
                    let mut ticker = Ticker::new(&instance);

                    loop {
                        // Handle termination signals
                        if term_flag.load(Ordering::Relaxed) || cancel.is_cancelled() {
                            tracing::warn!("[StepRuntime] termination requested");
                            Controller::finalize(&mut instance, &model_health);
                            break;
                        }

                        // Drain control commands
                        match controller.drain_commands(
                            max_commands_drain,
                            &mut instance,
                            &model_health,
                        ) {
                            ControllerResult::Empty | ControllerResult::Processed => {}
                            ControllerResult::Exit => break,
                        }

                        if instance.state() != LifecycleState::Running {
                            thread::sleep(Duration::from_micros(100));
                            ticker.resync();
                            continue;
                        }

                        if !ticker.due() {
                            continue;
                        }

                        match ticker.tick(&mut instance, &mut exchange) {
                            Ok(()) => {}
                            Err(e) if cfg.halt_on_tick_error || e.is_fatal() => {
                                tracing::error!("[StepRuntime] tick failed, halting: {}", e);
                                stats_cell.publish(ticker.stats.clone());
                                Controller::finalize(&mut instance, &model_health);
                                break;
                            }
                            Err(e) => {
                                crate::error_throttled!(
                                    Duration::from_secs(1),
                                    "[StepRuntime] tick failed: {}",
                                    e
                                );
                            }
                        }
                        stats_cell.publish(ticker.stats.clone());

                        if cfg.max_ticks.is_some_and(|max| ticker.attempts >= max) {
                            tracing::info!(
                                "[StepRuntime] reached max ticks ({})",
                                ticker.attempts
                            );
                            Controller::finalize(&mut instance, &model_health);
                            break;
                        }
                    }

                    model_health.down();
                })?;
        }

        Ok(Self {
            command_tx,
            join: Some(join),
            model_health,
            cancel,
            params,
            signals,
            stats: stats_cell,
            _phantom_data: PhantomData,
        })
    }
}

/// Deadline bookkeeping and per-tick buffers of the tick thread.
struct Ticker {
    period: Duration,
    base_rate: f64,
    next: Instant,
    idle: u32,
    attempts: u64,
    inbound: Vec<f64>,
    outbound: Vec<f64>,
    stats: RuntimeStats,
}

impl Ticker {
    fn new<M: StepModel>(instance: &ModelInstance<M>) -> Self {
        let layout = instance.port_layout();
        Self {
            period: instance.info().period(),
            base_rate: instance.info().base_rate,
            next: Instant::now(),
            idle: 0,
            attempts: 0,
            inbound: vec![0.0; layout.inbound().len()],
            outbound: vec![0.0; layout.outbound().len()],
            stats: RuntimeStats::default(),
        }
    }

    /// Restart the deadline schedule from now.
    fn resync(&mut self) {
        self.next = Instant::now();
        self.idle = 0;
    }

    /// True once the next deadline has passed; otherwise backs off.
    #[inline]
    fn due(&mut self) -> bool {
        let now = Instant::now();
        if now >= self.next {
            self.idle = 0;
            return true;
        }

        let remaining = self.next - now;
        self.idle = self.idle.saturating_add(1);
        if remaining > Duration::from_micros(200) {
            thread::sleep(remaining - Duration::from_micros(100));
        } else if self.idle < 64 {
            spin_loop();
        } else {
            thread::yield_now();
        }
        false
    }

    #[inline]
    fn tick<M: StepModel>(
        &mut self,
        instance: &mut ModelInstance<M>,
        exchange: &mut impl PortExchange,
    ) -> Result<(), ModelError> {
        let timestamp = self.attempts as f64 * self.base_rate;
        self.attempts += 1;

        let started = Instant::now();
        let result = Self::exchange_and_step(
            instance,
            exchange,
            &mut self.inbound,
            &mut self.outbound,
            timestamp,
        );
        let elapsed = started.elapsed();

        self.stats.last_tick_nanos = elapsed.as_nanos() as u64;
        match &result {
            Ok(()) => self.stats.ticks += 1,
            Err(_) => self.stats.tick_errors += 1,
        }
        if elapsed > self.period {
            self.stats.overruns += 1;
            crate::warn_throttled!(
                Duration::from_secs(1),
                "[StepRuntime] tick overrun: {:?} > {:?}",
                elapsed,
                self.period
            );
        }

        self.next += self.period;
        let now = Instant::now();
        if self.next < now {
            // fell behind; do not try to catch up with a burst of ticks
            self.next = now;
        }
        result
    }

    fn exchange_and_step<M: StepModel>(
        instance: &mut ModelInstance<M>,
        exchange: &mut impl PortExchange,
        inbound: &mut [f64],
        outbound: &mut [f64],
        timestamp: f64,
    ) -> Result<(), ModelError> {
        exchange
            .read_inbound(inbound, timestamp)
            .map_err(ModelError::UserLogicFailure)?;
        instance.step(inbound, outbound, timestamp)?;
        exchange
            .write_outbound(outbound, timestamp)
            .map_err(ModelError::UserLogicFailure)
    }
}

/// Guard that auto-shuts down the runtime when dropped.
pub struct RuntimeGuard<M: StepModel>(Option<Runtime<M>>);

impl<M: StepModel> RuntimeGuard<M> {
    pub fn runtime(&self) -> Option<&Runtime<M>> {
        self.0.as_ref()
    }
}

impl<M: StepModel> Drop for RuntimeGuard<M> {
    fn drop(&mut self) {
        if let Some(rt) = self.0.take() {
            rt.shutdown();
        }
    }
}

impl<M: StepModel> Drop for Runtime<M> {
    fn drop(&mut self) {
        self.command_tx.try_send(Command::Shutdown).ok();
    }
}
