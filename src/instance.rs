use crate::block::Block;
use crate::config::ModelConfig;
use crate::error::{AccessError, ModelError};
use crate::layout::{BlockLayout, PortLayout};
use crate::model::{ModelContext, ModelInfo, StepModel, Tick};
use crate::ports::PortMapper;
use crate::signals::{SignalBlock, SignalTable};
use crate::store::ParameterStore;
use std::fmt;
use std::sync::Arc;

/// Phase of a [`ModelInstance`]. `Finalized` is terminal.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Running,
    Finalized,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One loaded model: its metadata, parameter store, signals, ports and the
/// user logic, sequenced through initialize, start, step and finalize.
pub struct ModelInstance<M: StepModel> {
    info: ModelInfo,
    state: LifecycleState,
    params: ParameterStore,
    signal_layout: Arc<BlockLayout>,
    signal_table: SignalTable,
    signals: Option<SignalBlock>,
    ports: PortMapper,
    config: M::Config,
    model: Option<M>,
    ticks: u64,
    seen_generation: u64,
}

impl<M: StepModel> ModelInstance<M> {
    /// Build layouts and defaults from a model description.
    pub fn load(cfg: &ModelConfig, model_cfg: M::Config) -> anyhow::Result<Self> {
        cfg.validate()?;
        let param_layout = Arc::new(cfg.param_layout()?);
        let defaults = cfg.default_params(&param_layout)?;
        let instance = Self::from_parts(
            cfg.info(),
            param_layout,
            defaults,
            Arc::new(cfg.signal_layout()?),
            Arc::new(cfg.port_layout()?),
            model_cfg,
        )?;
        tracing::info!(
            "[ModelInstance] loaded {}: {} parameter(s), {} signal(s), {}/{} port(s)",
            instance.info.name,
            instance.params.layout().len(),
            instance.signal_layout.len(),
            instance.ports.layout().inbound().len(),
            instance.ports.layout().outbound().len(),
        );
        Ok(instance)
    }

    pub fn from_parts(
        info: ModelInfo,
        param_layout: Arc<BlockLayout>,
        defaults: Block,
        signal_layout: Arc<BlockLayout>,
        port_layout: Arc<PortLayout>,
        config: M::Config,
    ) -> Result<Self, AccessError> {
        let params = ParameterStore::new(param_layout, defaults)?;
        Ok(Self {
            info,
            state: LifecycleState::Uninitialized,
            params,
            signal_table: SignalTable::new(signal_layout.clone()),
            signal_layout,
            signals: None,
            ports: PortMapper::new(port_layout),
            config,
            model: None,
            ticks: 0,
            seen_generation: 0,
        })
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Handle to the parameter store for host-side staging.
    pub fn params(&self) -> &ParameterStore {
        &self.params
    }

    /// Read side of the signals, safe to clone onto other threads.
    pub fn signals(&self) -> &SignalTable {
        &self.signal_table
    }

    pub fn port_layout(&self) -> &PortLayout {
        self.ports.layout()
    }

    /// Check the flat buffer lengths the host will pass to [`step`](Self::step)
    /// against the port layout, before the first tick.
    pub fn bind_ports(&self, inbound_len: usize, outbound_len: usize) -> Result<(), ModelError> {
        match self.state {
            LifecycleState::Uninitialized | LifecycleState::Initialized => {}
            state => return Err(ModelError::lifecycle("bind_ports", state)),
        }
        self.ports.bind(inbound_len, outbound_len)?;
        tracing::debug!(
            "[ModelInstance] {} ports bound: {} in, {} out",
            self.info.name,
            inbound_len,
            outbound_len
        );
        Ok(())
    }

    /// Ticks completed successfully since `initialize`.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn model(&self) -> Option<&M> {
        self.model.as_ref()
    }

    /// Allocate and bind the signal block, reseed the parameter store from
    /// defaults and construct the user model. Any failure is fatal and
    /// leaves the instance `Finalized`.
    pub fn initialize(&mut self) -> Result<(), ModelError> {
        if self.state != LifecycleState::Uninitialized {
            return Err(ModelError::lifecycle("initialize", self.state));
        }

        match self.try_initialize() {
            Ok(()) => {
                self.state = LifecycleState::Initialized;
                tracing::info!("[ModelInstance] {} initialized", self.info.name);
                Ok(())
            }
            Err(e) => {
                self.state = LifecycleState::Finalized;
                tracing::error!("[ModelInstance] {} initialize failed: {}", self.info.name, e);
                Err(e)
            }
        }
    }

    fn try_initialize(&mut self) -> Result<(), ModelError> {
        let signals = self.signal_table.new_block();
        self.seen_generation = self.params.reseed();
        self.signal_table.publish(0, 0.0, &signals);

        let ctx = ModelContext {
            info: &self.info,
            params: self.params.layout(),
            signals: &self.signal_layout,
            ports: self.ports.layout(),
        };
        let model =
            M::initialize(&ctx, self.config.clone()).map_err(ModelError::UserLogicFailure)?;

        self.model = Some(model);
        self.signals = Some(signals);
        self.ticks = 0;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ModelError> {
        if self.state != LifecycleState::Initialized {
            return Err(ModelError::lifecycle("start", self.state));
        }
        let Some(model) = self.model.as_mut() else {
            return Err(ModelError::lifecycle("start", self.state));
        };
        model.start().map_err(ModelError::UserLogicFailure)?;
        self.state = LifecycleState::Running;
        tracing::info!("[ModelInstance] {} running", self.info.name);
        Ok(())
    }

    /// Run one tick against the host's flat port buffers.
    ///
    /// A failing tick leaves the instance `Running`; whether to halt is up
    /// to the caller. Signals are published only for successful ticks.
    #[inline]
    pub fn step(
        &mut self,
        inbound: &[f64],
        outbound: &mut [f64],
        timestamp: f64,
    ) -> Result<(), ModelError> {
        if self.state != LifecycleState::Running {
            return Err(ModelError::lifecycle("step", self.state));
        }
        let (Some(model), Some(signals)) = (self.model.as_mut(), self.signals.as_mut()) else {
            return Err(ModelError::lifecycle("step", self.state));
        };

        let inports = self.ports.map_inbound(inbound)?;
        let outports = self.ports.map_outbound(outbound)?;
        let params = self.params.read_active();
        let generation = params.generation();

        let mut tick = Tick {
            params: &params,
            inports,
            outports,
            signals: &mut *signals,
            timestamp,
            count: self.ticks,
            params_changed: generation != self.seen_generation,
        };
        model.step(&mut tick).map_err(ModelError::UserLogicFailure)?;
        drop(tick);
        drop(params);

        self.seen_generation = generation;
        self.ticks += 1;
        self.signal_table.publish(self.ticks, timestamp, signals);
        Ok(())
    }

    /// Release the user model. Valid from `Running` or `Initialized`.
    pub fn finalize(&mut self) -> Result<(), ModelError> {
        match self.state {
            LifecycleState::Running | LifecycleState::Initialized => {}
            state => return Err(ModelError::lifecycle("finalize", state)),
        }
        self.state = LifecycleState::Finalized;

        let result = match self.model.take() {
            Some(mut model) => model.finalize().map_err(ModelError::UserLogicFailure),
            None => Ok(()),
        };
        self.signals = None;
        match &result {
            Ok(()) => tracing::info!(
                "[ModelInstance] {} finalized after {} tick(s)",
                self.info.name,
                self.ticks
            ),
            Err(e) => tracing::error!("[ModelInstance] {} finalize failed: {}", self.info.name, e),
        }
        result
    }
}

impl<M: StepModel> fmt::Debug for ModelInstance<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelInstance")
            .field("name", &self.info.name)
            .field("state", &self.state)
            .field("ticks", &self.ticks)
            .field("params", &self.params)
            .finish()
    }
}
