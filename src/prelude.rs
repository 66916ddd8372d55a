pub use crate::access::{INVALID_READ, get_by_type, set_by_type, try_get_by_type};
pub use crate::block::Block;
pub use crate::config::{ModelConfig, RuntimeConfig};
pub use crate::control::Command;
pub use crate::error::{AccessError, ModelError, StatusCode};
pub use crate::instance::{LifecycleState, ModelInstance};
pub use crate::layout::{
    BlockLayout, Dims, Direction, FieldDescriptor, FieldSpec, PortLayout, TypeTag,
};
pub use crate::model::{ModelContext, ModelInfo, NullStepModel, StepModel, TaskInfo, Tick};
pub use crate::ports::{InboundPorts, MatrixView, MatrixViewMut, OutboundPorts, PortMapper};
pub use crate::runtime::{NullExchange, PortExchange, Runtime, RuntimeGuard, RuntimeStats};
pub use crate::signals::{SignalBlock, SignalTable};
pub use crate::store::{ActiveParams, ParameterStore, StagedParams};
