use crate::control::inputs::Command;
use crate::error::ModelError;
use crate::instance::{LifecycleState, ModelInstance};
use crate::model::StepModel;
use crate::utils::HealthFlag;
use crossbeam::channel::{Receiver, TryRecvError};
use serde_json::Value;
use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::time::Duration;

/// Outcome of a single control-plane drain cycle.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub enum ControllerResult {
    /// No commands were available.
    Empty,
    /// Commands were processed.
    Processed,
    /// The model was finalized or the channel closed; the tick thread exits.
    Exit,
}

/// Consumes [`Command`]s and applies them to a model instance between ticks.
///
/// Parameter updates never wait on the store. If it is busy (a host writer
/// holds it, or a reader is still pinned on the staging side) the update is
/// kept, in order, and retried on the next drain cycle while ticks go on.
pub struct Controller {
    command_rx: Receiver<Command>,
    pending_params: VecDeque<Value>,
}

impl Controller {
    pub fn new(command_rx: Receiver<Command>) -> Self {
        Self {
            command_rx,
            pending_params: VecDeque::new(),
        }
    }

    /// Parameter updates waiting for the store.
    pub fn pending_params(&self) -> usize {
        self.pending_params.len()
    }

    /// Drain up to `max` commands.
    #[inline(always)]
    pub fn drain_commands<M: StepModel>(
        &mut self,
        max: usize,
        instance: &mut ModelInstance<M>,
        model_health: &HealthFlag,
    ) -> ControllerResult {
        let mut processed = self.flush_params(instance);
        for _ in 0..max.max(1) {
            match self.command_rx.try_recv() {
                Ok(cmd) => {
                    processed = true;
                    if let ControlFlow::Break(r) = self.handle(cmd, instance, model_health) {
                        return r;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::error!("[StepRuntime] control disconnected");
                    Self::finalize(instance, model_health);
                    return ControllerResult::Exit;
                }
            }
        }
        processed |= self.flush_params(instance);

        if processed {
            ControllerResult::Processed
        } else {
            ControllerResult::Empty
        }
    }

    fn handle<M: StepModel>(
        &mut self,
        cmd: Command,
        instance: &mut ModelInstance<M>,
        model_health: &HealthFlag,
    ) -> ControlFlow<ControllerResult> {
        match cmd {
            Command::Start => {
                if instance.state() == LifecycleState::Running {
                    tracing::info!("[StepRuntime] ignoring start - model already running");
                    return ControlFlow::Continue(());
                }
                match instance.start() {
                    Ok(()) => model_health.up(),
                    Err(e @ ModelError::LifecycleViolation { .. }) => {
                        tracing::error!("[StepRuntime] start rejected: {}", e);
                    }
                    Err(e) => {
                        tracing::error!("[StepRuntime] model start error: {}", e);
                        Self::finalize(instance, model_health);
                        return ControlFlow::Break(ControllerResult::Exit);
                    }
                }
                ControlFlow::Continue(())
            }
            Command::SetParameters(update) => {
                self.pending_params.push_back(update);
                self.flush_params(instance);
                ControlFlow::Continue(())
            }
            Command::Finalize => {
                tracing::info!("[StepRuntime] finalize requested");
                Self::finalize(instance, model_health);
                ControlFlow::Break(ControllerResult::Exit)
            }
            Command::Shutdown => {
                tracing::info!("[StepRuntime] shutdown signal received");
                Self::finalize(instance, model_health);
                ControlFlow::Break(ControllerResult::Exit)
            }
        }
    }

    /// Apply pending updates in order until the store is busy. Returns true
    /// if any update was consumed.
    fn flush_params<M: StepModel>(&mut self, instance: &ModelInstance<M>) -> bool {
        let mut consumed = false;
        while let Some(update) = self.pending_params.front() {
            match instance.params().try_apply_json(update) {
                Ok(None) => {
                    crate::warn_throttled!(
                        Duration::from_secs(1),
                        "[StepRuntime] parameter store busy, {} update(s) deferred",
                        self.pending_params.len()
                    );
                    break;
                }
                Ok(Some(_)) => {}
                Err(e) => tracing::error!("[StepRuntime] parameter update rejected: {:#}", e),
            }
            self.pending_params.pop_front();
            consumed = true;
        }
        consumed
    }

    /// Finalize if the instance is still live; errors are logged.
    pub(crate) fn finalize<M: StepModel>(instance: &mut ModelInstance<M>, model_health: &HealthFlag) {
        model_health.down();
        if matches!(
            instance.state(),
            LifecycleState::Initialized | LifecycleState::Running
        ) {
            // finalize logs its own failure
            let _ = instance.finalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::layout::{BlockLayout, Dims, FieldSpec, PortLayout, TypeTag};
    use crate::model::{ModelInfo, NullStepModel};
    use crossbeam::channel::bounded;
    use serde_json::json;
    use std::sync::Arc;

    fn instance() -> ModelInstance<NullStepModel> {
        let params = Arc::new(
            BlockLayout::from_specs(
                Some("m"),
                &[FieldSpec::new("k", TypeTag::Float64, Dims::SCALAR)],
            )
            .unwrap(),
        );
        let defaults = Block::for_layout(&params);
        let mut inst = ModelInstance::from_parts(
            ModelInfo::new("m", "test", 0.01),
            params,
            defaults,
            Arc::new(BlockLayout::default()),
            Arc::new(PortLayout::default()),
            (),
        )
        .unwrap();
        inst.initialize().unwrap();
        inst
    }

    #[test]
    fn start_then_set_parameters() {
        let (tx, rx) = bounded(8);
        let mut ctl = Controller::new(rx);
        let mut inst = instance();
        let health = HealthFlag::new(false);

        assert_eq!(
            ctl.drain_commands(8, &mut inst, &health),
            ControllerResult::Empty
        );

        let before = inst.params().generation();
        tx.send(Command::Start).unwrap();
        tx.send(Command::SetParameters(json!({"k": 4.5}))).unwrap();
        tx.send(Command::SetParameters(json!({"nope": 1}))).unwrap();
        assert_eq!(
            ctl.drain_commands(8, &mut inst, &health),
            ControllerResult::Processed
        );
        assert!(health.get());
        assert_eq!(inst.state(), LifecycleState::Running);
        assert_eq!(inst.params().read_active().get("k", 0), Some(4.5));
        // the rejected update published nothing
        assert_eq!(inst.params().generation(), before + 1);
    }

    #[test]
    fn drain_respects_max() {
        let (tx, rx) = bounded(8);
        let mut ctl = Controller::new(rx);
        let mut inst = instance();
        let health = HealthFlag::new(false);
        for v in [1.0, 2.0, 3.0] {
            tx.send(Command::SetParameters(json!({"k": v}))).unwrap();
        }
        ctl.drain_commands(2, &mut inst, &health);
        assert_eq!(inst.params().read_active().get("k", 0), Some(2.0));
        ctl.drain_commands(2, &mut inst, &health);
        assert_eq!(inst.params().read_active().get("k", 0), Some(3.0));
    }

    #[test]
    fn finalize_and_disconnect_exit() {
        let (tx, rx) = bounded(8);
        let mut ctl = Controller::new(rx);
        let mut inst = instance();
        let health = HealthFlag::new(true);
        tx.send(Command::Finalize).unwrap();
        assert_eq!(
            ctl.drain_commands(8, &mut inst, &health),
            ControllerResult::Exit
        );
        assert_eq!(inst.state(), LifecycleState::Finalized);
        assert!(!health.get());

        drop(tx);
        assert_eq!(
            ctl.drain_commands(8, &mut inst, &health),
            ControllerResult::Exit
        );
    }

    #[test]
    fn busy_store_defers_updates_without_blocking() {
        let (tx, rx) = bounded(8);
        let mut ctl = Controller::new(rx);
        let mut inst = instance();
        let health = HealthFlag::new(false);
        let store = inst.params().clone();

        // an introspection view taken before a publish pins the next staging side
        let stale = store.read_active();
        store.update(|s| s.set_by_index(0, 0, 1.0)).unwrap();

        tx.send(Command::SetParameters(json!({"k": 2.0}))).unwrap();
        tx.send(Command::SetParameters(json!({"k": 3.0}))).unwrap();
        tx.send(Command::Start).unwrap();
        assert_eq!(
            ctl.drain_commands(8, &mut inst, &health),
            ControllerResult::Processed
        );
        assert_eq!(ctl.pending_params(), 2);
        assert_eq!(inst.state(), LifecycleState::Running);
        assert_eq!(store.read_active().get("k", 0), Some(1.0));

        let mut out: [f64; 0] = [];
        inst.step(&[], &mut out, 0.0).unwrap();

        drop(stale);
        assert_eq!(
            ctl.drain_commands(8, &mut inst, &health),
            ControllerResult::Processed
        );
        assert_eq!(ctl.pending_params(), 0);
        assert_eq!(store.read_active().get("k", 0), Some(3.0));
    }

    #[test]
    fn finalize_is_not_held_up_by_deferred_updates() {
        let (tx, rx) = bounded(8);
        let mut ctl = Controller::new(rx);
        let mut inst = instance();
        let health = HealthFlag::new(true);
        let store = inst.params().clone();
        let _writer = store.stage();

        tx.send(Command::SetParameters(json!({"k": 2.0}))).unwrap();
        tx.send(Command::Finalize).unwrap();
        assert_eq!(
            ctl.drain_commands(8, &mut inst, &health),
            ControllerResult::Exit
        );
        assert_eq!(inst.state(), LifecycleState::Finalized);
    }
}
