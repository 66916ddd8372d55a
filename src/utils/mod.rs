pub use affinity::*;
pub use flags::*;
pub use state::*;
pub use throttle::Throttle;

mod affinity;
pub mod config_io;
mod flags;
pub mod logger;
mod state;
mod throttle;
