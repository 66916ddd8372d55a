use anyhow::anyhow;
use serde::Deserialize;
use steprt::prelude::{ModelContext, StepModel, Tick};

#[derive(Debug, Default, Clone, Deserialize)]
pub struct DemoModelConfig {
    /// Added to every element of `vector1d_out`.
    #[serde(default)]
    pub bias: f64,
}

/// Transfer logic for `my_new_model`:
/// - `scalar_out = scalar_in * i32_param`
/// - `vector1d_out[i] = vector1d_in[i] * double_vec_param[i % 4][i % 4] + bias`
/// - `vector2d_out` is the top-left 3x5 window of `vector2d_in` (zero padded).
pub struct DemoModel {
    gain: usize,
    matrix: usize,
    counter: usize,
    last: usize,
    bias: f64,
}

impl StepModel for DemoModel {
    type Config = DemoModelConfig;

    fn initialize(ctx: &ModelContext<'_>, config: Self::Config) -> anyhow::Result<Self> {
        let param = |name: &str| {
            ctx.params
                .index_of(name)
                .ok_or_else(|| anyhow!("parameter {name} missing"))
        };
        let signal = |name: &str| {
            ctx.signals
                .index_of(name)
                .ok_or_else(|| anyhow!("signal {name} missing"))
        };

        tracing::info!(
            "[DemoModel] {} by {} at {}s",
            ctx.info.name,
            ctx.info.builder,
            ctx.info.base_rate
        );

        Ok(Self {
            gain: param("i32_param")?,
            matrix: param("double_vec_param")?,
            counter: signal("i32_vec_sig")?,
            last: signal("double_sig")?,
            bias: config.bias,
        })
    }

    #[inline]
    fn step(&mut self, tick: &mut Tick<'_>) -> anyhow::Result<()> {
        if tick.params_changed {
            tracing::info!("[DemoModel] new parameter set {}", tick.params.generation());
        }

        let gain = tick.params.get_by_index(self.gain, 0)?;
        let scalar = tick.inports.scalar("scalar_in").unwrap_or_default() * gain;
        if let Some(out) = tick.outports.scalar_mut("scalar_out") {
            *out = scalar;
        }

        let vin = tick.inports.vector("vectors/vector1d_in").unwrap_or(&[]);
        if let Some(vout) = tick.outports.vector_mut("vectors/vector1d_out") {
            for (i, (y, u)) in vout.iter_mut().zip(vin).enumerate() {
                let diag = (i % 4) * 4 + i % 4;
                *y = u * tick.params.get_by_index(self.matrix, diag)? + self.bias;
            }
        }

        if let (Some(min), Some(mut mout)) = (
            tick.inports.matrix("vectors/vector2d_in"),
            tick.outports.matrix_mut("vectors/vector2d_out"),
        ) {
            for row in 0..mout.rows() {
                for col in 0..mout.cols() {
                    mout.set(row, col, min.get(row, col).unwrap_or_default());
                }
            }
        }

        for k in 0..24 {
            tick.signals
                .set_by_index(self.counter, k, (tick.count + k as u64) as f64)?;
        }
        tick.signals.set_by_index(self.last, 0, scalar)?;
        Ok(())
    }

    fn finalize(&mut self) -> anyhow::Result<()> {
        tracing::info!("[DemoModel] finalized");
        Ok(())
    }
}
