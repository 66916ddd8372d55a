pub mod access;
pub mod block;
pub mod config;
pub mod control;
pub mod error;
pub mod instance;
pub mod layout;
pub mod model;
pub mod ports;
pub mod runtime;
pub mod signals;
pub mod store;
mod test;
pub mod utils;

pub mod prelude;
