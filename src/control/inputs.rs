use serde_json::Value;

/// Control-plane command for the tick thread.
#[derive(Debug, Clone)]
pub enum Command {
    /// Start a model that was initialized without `start_on_init`.
    Start,
    /// Stage and publish `{ "name": number | [numbers] }` as one update.
    SetParameters(Value),
    /// Finalize the model and stop the tick thread.
    Finalize,
    /// Same as `Finalize`, also sent on drop of the runtime.
    Shutdown,
}
