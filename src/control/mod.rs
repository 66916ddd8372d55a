pub mod controller;
pub mod inputs;

pub use controller::{Controller, ControllerResult};
pub use inputs::Command;
