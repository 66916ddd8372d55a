use crate::layout::{BlockLayout, PortLayout};
use crate::ports::{InboundPorts, OutboundPorts};
use crate::signals::SignalBlock;
use crate::store::ActiveParams;
use anyhow::Result;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Single periodic task the model runs on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskInfo {
    pub id: u32,
    /// Seconds between ticks.
    pub period: f64,
    pub offset: f64,
}

/// Identity and timing of a loaded model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    pub builder: String,
    /// Seconds between ticks.
    pub base_rate: f64,
    pub task: TaskInfo,
}

impl ModelInfo {
    pub fn new(name: impl Into<String>, builder: impl Into<String>, base_rate: f64) -> Self {
        Self {
            name: name.into(),
            builder: builder.into(),
            base_rate,
            task: TaskInfo {
                id: 0,
                period: base_rate,
                offset: 0.0,
            },
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.base_rate)
    }
}

/// What a model sees when it is initialized. Resolve descriptor and port
/// indices here once rather than looking names up on every tick.
pub struct ModelContext<'a> {
    pub info: &'a ModelInfo,
    pub params: &'a BlockLayout,
    pub signals: &'a BlockLayout,
    pub ports: &'a PortLayout,
}

/// Everything one tick may read or write.
pub struct Tick<'a> {
    /// Active parameter set, stable for the whole tick.
    pub params: &'a ActiveParams<'a>,
    pub inports: InboundPorts<'a>,
    pub outports: OutboundPorts<'a>,
    pub signals: &'a mut SignalBlock,
    /// Model time in seconds.
    pub timestamp: f64,
    /// Zero-based index of this tick.
    pub count: u64,
    /// Set when a new parameter set was published since the previous tick.
    pub params_changed: bool,
}

/// User transfer logic driven by a [`ModelInstance`](crate::instance::ModelInstance).
pub trait StepModel: Sized + Send + 'static {
    /// Model-specific settings (serde-deserializable).
    type Config: DeserializeOwned + Clone + Send + 'static;

    /// Construct the model once layouts are bound.
    fn initialize(ctx: &ModelContext<'_>, config: Self::Config) -> Result<Self>;

    /// One-time setup before the first tick (external resources).
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// One tick. Must not block.
    fn step(&mut self, tick: &mut Tick<'_>) -> Result<()>;

    /// Release resources. Called once.
    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Model with no transfer logic; outputs stay at zero.
#[derive(Debug, Default)]
pub struct NullStepModel;

impl StepModel for NullStepModel {
    type Config = ();

    fn initialize(_ctx: &ModelContext<'_>, _config: ()) -> Result<Self> {
        Ok(NullStepModel)
    }

    #[inline(always)]
    fn step(&mut self, _tick: &mut Tick<'_>) -> Result<()> {
        Ok(())
    }
}
