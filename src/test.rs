#[cfg(test)]
mod tests {
    use crate::access::{get_by_type, set_by_type};
    use crate::block::Block;
    use crate::config::{ModelConfig, RuntimeConfig};
    use crate::control::Command;
    use crate::error::{AccessError, ModelError, StatusCode};
    use crate::instance::{LifecycleState, ModelInstance};
    use crate::layout::{BlockLayout, Dims, FieldDescriptor, FieldSpec, PortLayout, TypeTag};
    use crate::model::{ModelContext, ModelInfo, StepModel, Tick};
    use crate::runtime::{NullExchange, PortExchange, Runtime};
    use crate::store::ParameterStore;
    use anyhow::anyhow;
    use crossbeam::channel::{Sender, unbounded};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct EchoCfg {
        fail_at: Option<u64>,
    }

    /// y = gain * u, mirrored into the `out` signal. Fails once, on call
    /// number `fail_at`.
    struct Echo {
        gain: usize,
        calls: u64,
        fail_at: Option<u64>,
    }

    impl StepModel for Echo {
        type Config = EchoCfg;

        fn initialize(ctx: &ModelContext<'_>, cfg: EchoCfg) -> anyhow::Result<Self> {
            let gain = ctx
                .params
                .index_of("gain")
                .ok_or_else(|| anyhow!("gain parameter missing"))?;
            Ok(Self {
                gain,
                calls: 0,
                fail_at: cfg.fail_at,
            })
        }

        fn step(&mut self, tick: &mut Tick<'_>) -> anyhow::Result<()> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_at == Some(call) {
                return Err(anyhow!("transfer function diverged"));
            }
            let gain = tick.params.get_by_index(self.gain, 0)?;
            let u = tick.inports.scalar("u").unwrap_or_default();
            let y = tick
                .outports
                .scalar_mut("y")
                .ok_or_else(|| anyhow!("y port missing"))?;
            *y = gain * u;
            tick.signals.set("out", 0, gain * u);
            tick.signals.set("count", 0, tick.count as f64);
            Ok(())
        }
    }

    fn echo_config() -> ModelConfig {
        ModelConfig::from_json_str(
            &json!({
                "name": "echo",
                "builder": "tests",
                "baserate": 0.001,
                "parameters": [{"name": "gain", "default": 1.0}],
                "signals": ["out", {"name": "count", "type": "i32"}],
                "inports": ["u"],
                "outports": ["y"]
            })
            .to_string(),
        )
        .unwrap()
    }

    fn echo(fail_at: Option<u64>) -> ModelInstance<Echo> {
        ModelInstance::load(&echo_config(), EchoCfg { fail_at }).unwrap()
    }

    /// Feeds a constant input and forwards every output to a channel.
    struct ConstExchange {
        u: f64,
        sink: Sender<f64>,
    }

    impl PortExchange for ConstExchange {
        fn read_inbound(&mut self, inbound: &mut [f64], _timestamp: f64) -> anyhow::Result<()> {
            inbound[0] = self.u;
            Ok(())
        }

        fn write_outbound(&mut self, outbound: &[f64], _timestamp: f64) -> anyhow::Result<()> {
            let _ = self.sink.send(outbound[0]);
            Ok(())
        }
    }

    /// Claims the wrong output width.
    struct WideExchange;

    impl PortExchange for WideExchange {
        fn port_sizes(&self) -> Option<(usize, usize)> {
            Some((1, 3))
        }

        fn read_inbound(&mut self, _inbound: &mut [f64], _timestamp: f64) -> anyhow::Result<()> {
            Ok(())
        }

        fn write_outbound(&mut self, _outbound: &[f64], _timestamp: f64) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn typed_access_then_publish_reaches_next_tick() {
        let layout = Arc::new(
            BlockLayout::from_descriptors(
                vec![
                    FieldDescriptor::new("n", 0, TypeTag::Int32, Dims::SCALAR),
                    FieldDescriptor::new("v", 8, TypeTag::Float64, Dims::vector(4)),
                ],
                40,
            )
            .unwrap(),
        );
        let (n, v) = (&layout.fields()[0], &layout.fields()[1]);

        let mut block = Block::for_layout(&layout);
        let res = set_by_type(block.as_bytes_mut(), n, 0, 7.0, 1);
        assert_eq!(StatusCode::of(&res), StatusCode::Ok);
        assert_eq!(get_by_type(block.as_bytes(), n, 0, 1), 7.0);
        set_by_type(block.as_bytes_mut(), v, 2, 3.5, 0).unwrap();
        assert_eq!(get_by_type(block.as_bytes(), v, 2, 0), 3.5);

        struct ReadN;
        impl StepModel for ReadN {
            type Config = ();
            fn initialize(_ctx: &ModelContext<'_>, _cfg: ()) -> anyhow::Result<Self> {
                Ok(ReadN)
            }
            fn step(&mut self, tick: &mut Tick<'_>) -> anyhow::Result<()> {
                tick.outports.as_mut_slice()[0] = tick.params.get_by_index(0, 0)?;
                Ok(())
            }
        }

        let ports = Arc::new(
            PortLayout::from_specs(&[], &[FieldSpec::new("n_out", TypeTag::Float64, Dims::SCALAR)])
                .unwrap(),
        );
        let mut m: ModelInstance<ReadN> = ModelInstance::from_parts(
            ModelInfo::new("scenario", "tests", 0.001),
            layout.clone(),
            block,
            Arc::new(BlockLayout::default()),
            ports,
            (),
        )
        .unwrap();
        m.initialize().unwrap();
        m.start().unwrap();

        let mut out = [0.0];
        m.step(&[], &mut out, 0.0).unwrap();
        assert_eq!(out[0], 7.0);

        let store = m.params().clone();
        let mut staged = store.stage();
        set_by_type(staged.block_mut().as_bytes_mut(), n, 0, 99.0, 1).unwrap();
        // not visible before publish
        m.step(&[], &mut out, 0.001).unwrap();
        assert_eq!(out[0], 7.0);
        staged.publish();

        m.step(&[], &mut out, 0.002).unwrap();
        assert_eq!(out[0], 99.0);
        assert_eq!(m.params().read_active().get_by_index(0, 0), Ok(99.0));
        assert_eq!(m.params().read_active().get_by_index(1, 2), Ok(3.5));
    }

    #[test]
    fn lifecycle_violations_map_to_error_status() {
        let mut m = echo(None);
        let mut out = [0.0];
        let res = m.step(&[1.0], &mut out, 0.0);
        assert_eq!(StatusCode::of(&res), StatusCode::Error);
        assert!(matches!(res, Err(ModelError::LifecycleViolation { .. })));
        assert_eq!(i32::from(StatusCode::of(&m.initialize())), 0);
        assert_eq!(i32::from(StatusCode::of(&m.initialize())), 1);
        assert_eq!(m.state(), LifecycleState::Initialized);
    }

    #[test]
    fn publish_is_atomic_under_concurrent_reads() {
        const FIELDS: usize = 8;
        const ROUNDS: u64 = 2_000;

        let specs: Vec<FieldSpec> = (0..FIELDS)
            .map(|i| FieldSpec::new(format!("f{i}"), TypeTag::Float64, Dims::SCALAR))
            .collect();
        let layout = Arc::new(BlockLayout::from_specs(None, &specs).unwrap());
        let store = ParameterStore::new(layout.clone(), Block::for_layout(&layout)).unwrap();

        thread::scope(|s| {
            let writer = s.spawn(|| {
                for round in 1..=ROUNDS {
                    let mut staged = store.stage();
                    for field in 0..FIELDS {
                        staged.set_by_index(field, 0, round as f64).unwrap();
                    }
                    staged.publish();
                }
            });

            for _ in 0..2 {
                s.spawn(|| {
                    let mut last = 0.0;
                    loop {
                        let active = store.read_active();
                        let first = active.get_by_index(0, 0).unwrap();
                        for field in 1..FIELDS {
                            assert_eq!(active.get_by_index(field, 0).unwrap(), first);
                        }
                        assert!(first >= last, "went back from {last} to {first}");
                        last = first;
                        if first == ROUNDS as f64 {
                            break;
                        }
                    }
                });
            }

            writer.join().unwrap();
        });

        assert_eq!(store.generation(), ROUNDS);
    }

    #[test]
    fn runtime_stops_after_max_ticks() {
        let (tx, rx) = unbounded();
        let cfg = RuntimeConfig {
            max_ticks: Some(20),
            ..Default::default()
        };
        let stats =
            Runtime::spawn_blocking(cfg, echo(None), ConstExchange { u: 2.0, sink: tx }).unwrap();

        assert_eq!(stats.ticks, 20);
        assert_eq!(stats.tick_errors, 0);
        let outputs: Vec<f64> = rx.try_iter().collect();
        assert_eq!(outputs.len(), 20);
        assert!(outputs.iter().all(|y| *y == 2.0));
    }

    #[test]
    fn runtime_applies_parameter_commands() {
        let (tx, rx) = unbounded();
        let rt = Runtime::spawn(
            RuntimeConfig::default(),
            echo(None),
            ConstExchange { u: 2.0, sink: tx },
        )
        .unwrap();

        assert!(wait_for(Duration::from_secs(2), || rt.signals().read("out", 0) == 2.0));
        assert!(rt.is_model_running());

        rt.send(Command::SetParameters(json!({"gain": 3.0}))).unwrap();
        assert!(wait_for(Duration::from_secs(2), || rt.signals().read("out", 0) == 6.0));
        assert!(rt.signals().read("echo/count", 0) >= 1.0);

        // host-side staging works alongside the command path
        rt.params()
            .update(|s| s.set_by_index(0, 0, 0.5))
            .unwrap();
        assert!(wait_for(Duration::from_secs(2), || rt.signals().read("out", 0) == 1.0));

        rt.shutdown();
        let outputs: Vec<f64> = rx.try_iter().collect();
        assert!(outputs.contains(&6.0));
    }

    #[test]
    fn runtime_halts_on_tick_error() {
        let cfg = RuntimeConfig {
            max_ticks: Some(100),
            ..Default::default()
        };
        let stats = Runtime::spawn_blocking(cfg, echo(Some(3)), NullExchange).unwrap();
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.tick_errors, 1);
    }

    #[test]
    fn runtime_can_continue_past_tick_errors() {
        let cfg = RuntimeConfig {
            halt_on_tick_error: false,
            max_ticks: Some(10),
            ..Default::default()
        };
        let stats = Runtime::spawn_blocking(cfg, echo(Some(3)), NullExchange).unwrap();
        assert_eq!(stats.ticks, 9);
        assert_eq!(stats.tick_errors, 1);
    }

    #[test]
    fn runtime_waits_for_start_command() {
        let cfg = RuntimeConfig {
            start_on_init: false,
            ..Default::default()
        };
        let rt = Runtime::spawn(cfg, echo(None), NullExchange).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(rt.stats().ticks, 0);
        assert!(!rt.is_model_running());

        rt.send(Command::Start).unwrap();
        assert!(wait_for(Duration::from_secs(2), || rt.stats().ticks > 0));
        assert!(rt.is_model_running());
        let mut seq = 0;
        assert!(rt.stats_if_changed(&mut seq).is_some_and(|s| s.ticks > 0));

        rt.send(Command::Finalize).unwrap();
        assert!(wait_for(Duration::from_secs(2), || !rt.is_model_running()));
        assert!(wait_for(Duration::from_secs(2), || rt
            .send(Command::Start)
            .is_err()));
        rt.shutdown();
    }

    #[test]
    fn guard_shuts_down_on_drop() {
        let rt = Runtime::spawn(RuntimeConfig::default(), echo(None), NullExchange).unwrap();
        let params = rt.params().clone();
        let guard = rt.into_guard();
        assert!(wait_for(Duration::from_secs(2), || {
            guard.runtime().is_some_and(|rt| rt.stats().ticks > 0)
        }));
        drop(guard);
        // store handle outlives the runtime
        assert_eq!(params.read_active().get("gain", 0), Some(1.0));
    }

    #[test]
    fn runtime_rejects_mismatched_exchange_before_ticking() {
        let err = Runtime::spawn(RuntimeConfig::default(), echo(None), WideExchange)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<ModelError>(),
            Some(ModelError::Access(AccessError::LayoutMismatch(_)))
        ));
    }

    #[test]
    fn held_reader_does_not_stall_ticks() {
        let (tx, _rx) = unbounded();
        let rt = Runtime::spawn(
            RuntimeConfig::default(),
            echo(None),
            ConstExchange { u: 1.0, sink: tx },
        )
        .unwrap();
        assert!(wait_for(Duration::from_secs(2), || rt.stats().ticks > 0));

        // pins what becomes the staging side after the next publish
        let stale = rt.params().read_active();
        rt.params().update(|s| s.set_by_index(0, 0, 5.0)).unwrap();
        assert!(wait_for(Duration::from_secs(2), || rt.signals().read("out", 0) == 5.0));

        rt.send(Command::SetParameters(json!({"gain": 3.0}))).unwrap();
        let before = rt.stats().ticks;
        assert!(wait_for(Duration::from_secs(2), || rt.stats().ticks > before + 20));
        assert_eq!(rt.signals().read("out", 0), 5.0);

        drop(stale);
        assert!(wait_for(Duration::from_secs(2), || rt.signals().read("out", 0) == 3.0));
        rt.shutdown();
    }
}
