mod demo_model;

use crate::demo_model::{DemoModel, DemoModelConfig};
use serde_json::json;
use std::time::Duration;
use steprt::prelude::*;
use steprt::utils::logger::LoggerConfig;

/// Drives the inbound ports with a sine wave and logs the scalar output.
struct SineExchange {
    logged_at: f64,
}

impl PortExchange for SineExchange {
    // wired for example/model.json
    fn port_sizes(&self) -> Option<(usize, usize)> {
        Some((33, 22))
    }

    fn read_inbound(&mut self, inbound: &mut [f64], timestamp: f64) -> anyhow::Result<()> {
        let s = (timestamp * std::f64::consts::TAU).sin();
        for (i, u) in inbound.iter_mut().enumerate() {
            *u = s + i as f64;
        }
        Ok(())
    }

    fn write_outbound(&mut self, outbound: &[f64], timestamp: f64) -> anyhow::Result<()> {
        if timestamp - self.logged_at >= 1.0 {
            self.logged_at = timestamp;
            tracing::info!("t={:.3} scalar_out={:.4}", timestamp, outbound[0]);
        }
        Ok(())
    }
}

pub fn main() -> anyhow::Result<()> {
    let _guard = LoggerConfig::from_env().init()?;

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "example/model.json".to_string());
    let model_cfg = ModelConfig::load(&path)?;
    let instance = ModelInstance::<DemoModel>::load(&model_cfg, DemoModelConfig { bias: 0.25 })?;

    for (dir, name, rows, cols) in instance.port_layout().port_list() {
        tracing::info!("port {:?} {} [{}x{}]", dir, name, rows, cols);
    }

    let rt = Runtime::spawn(
        RuntimeConfig::default(),
        instance,
        SineExchange { logged_at: 0.0 },
    )?;
    let cancel = rt.cancel_token();
    let mut stats_seq = 0;

    for gain in [3, 4, 5] {
        if !cancel.sleep_cancellable(Duration::from_secs(2)) {
            break;
        }
        rt.send(Command::SetParameters(json!({ "i32_param": gain })))?;
        tracing::info!(
            "gain -> {} (double_sig={:.4})",
            gain,
            rt.signals().read("double_sig", 0)
        );
        if let Some(stats) = rt.stats_if_changed(&mut stats_seq) {
            tracing::info!(
                "ticks={} overruns={} errors={} last={}ns",
                stats.ticks,
                stats.overruns,
                stats.tick_errors,
                stats.last_tick_nanos
            );
        }
    }

    rt.shutdown();
    Ok(())
}
