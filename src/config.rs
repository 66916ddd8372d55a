use crate::block::Block;
use crate::layout::{BlockLayout, Dims, FieldSpec, PortLayout, TypeTag};
use crate::model::ModelInfo;
use crate::utils::config_io::{load_cfg, load_cfg_merge};
use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings of the tick executor thread.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    pub core_id: Option<usize>,
    /// Call `start` right after `initialize` instead of waiting for a command.
    #[serde(default = "default_true")]
    pub start_on_init: bool,
    /// Finalize and exit on the first failing tick.
    #[serde(default = "default_true")]
    pub halt_on_tick_error: bool,
    pub max_commands_pending: Option<usize>,
    pub max_commands_drain: Option<usize>,
    /// Stop after this many ticks (tests, batch runs).
    pub max_ticks: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            core_id: None,
            start_on_init: true,
            halt_on_tick_error: true,
            max_commands_pending: None,
            max_commands_drain: None,
            max_ticks: None,
        }
    }
}

/// Parameter, signal or port entry: a bare name or a full definition.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ValueDef {
    Name(String),
    Full(ValueSpec),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ValueSpec {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    #[serde(rename = "dimX", alias = "dimx", default, skip_serializing_if = "Option::is_none")]
    pub dim_x: Option<i64>,
    #[serde(rename = "dimY", alias = "dimy", default, skip_serializing_if = "Option::is_none")]
    pub dim_y: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Scalar(f64),
    Array(Vec<f64>),
}

impl ValueDef {
    pub fn name(&self) -> &str {
        match self {
            ValueDef::Name(name) => name,
            ValueDef::Full(spec) => &spec.name,
        }
    }

    fn spec(&self) -> Option<&ValueSpec> {
        match self {
            ValueDef::Name(_) => None,
            ValueDef::Full(spec) => Some(spec),
        }
    }

    fn dims(&self) -> Dims {
        let clamp = |d: Option<i64>| d.unwrap_or(1).clamp(1, u32::MAX as i64) as u32;
        match self.spec() {
            Some(spec) => Dims::new(clamp(spec.dim_x), clamp(spec.dim_y)),
            None => Dims::SCALAR,
        }
    }

    fn tag(&self) -> TypeTag {
        TypeTag::from_config(self.spec().and_then(|s| s.ty.as_deref()))
    }

    /// Split `cat.name` and build the layout input for this entry.
    fn field_spec(&self, kind: ValueKind) -> anyhow::Result<FieldSpec> {
        let (category, name) = split_name(self.name())?;
        let tag = match kind {
            ValueKind::Port => TypeTag::Float64,
            ValueKind::Parameter | ValueKind::Signal => self.tag(),
        };
        let mut spec = FieldSpec::new(name, tag, self.dims());
        if let Some(category) = category {
            spec = spec.in_category(category);
        }
        // signals always carry a description, falling back to their name
        if kind == ValueKind::Signal {
            let description = self
                .spec()
                .and_then(|s| s.description.as_deref())
                .unwrap_or(name);
            spec = spec.with_description(description);
        }
        Ok(spec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Parameter,
    Signal,
    Port,
}

/// Load-time description of a model, as produced by the model generator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelConfig {
    pub name: String,
    pub builder: String,
    /// Seconds per tick.
    #[serde(rename = "baserate")]
    pub base_rate: f64,
    #[serde(default)]
    pub parameters: Vec<ValueDef>,
    #[serde(default)]
    pub signals: Vec<ValueDef>,
    #[serde(default)]
    pub inports: Vec<ValueDef>,
    #[serde(default)]
    pub outports: Vec<ValueDef>,
}

impl ModelConfig {
    pub fn from_json_str(doc: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_json::from_str(doc).context("failed to parse model config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let cfg: Self = load_cfg(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Layer several files, then environment overrides under `env_prefix`
    /// (e.g. `STEPRT__BASERATE=0.001`).
    pub fn load_layered<P: AsRef<Path>>(
        paths: impl IntoIterator<Item = P>,
        env_prefix: Option<&str>,
    ) -> anyhow::Result<Self> {
        let cfg: Self = load_cfg_merge(paths, env_prefix)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !is_identifier(&self.name) {
            bail!("model name {:?} is not a valid identifier", self.name);
        }
        if !(self.base_rate.is_finite() && self.base_rate > 0.0) {
            bail!("model baserate must be a positive number of seconds");
        }
        for (kind, defs) in [
            ("parameter", &self.parameters),
            ("signal", &self.signals),
            ("inport", &self.inports),
            ("outport", &self.outports),
        ] {
            for def in defs {
                split_name(def.name()).with_context(|| format!("invalid {kind}"))?;
            }
        }
        Ok(())
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo::new(&self.name, &self.builder, self.base_rate)
    }

    fn field_specs(defs: &[ValueDef], kind: ValueKind) -> anyhow::Result<Vec<FieldSpec>> {
        defs.iter().map(|def| def.field_spec(kind)).collect()
    }

    pub fn param_layout(&self) -> anyhow::Result<BlockLayout> {
        let specs = Self::field_specs(&self.parameters, ValueKind::Parameter)?;
        BlockLayout::from_specs(Some(&self.name), &specs).context("invalid parameter layout")
    }

    pub fn signal_layout(&self) -> anyhow::Result<BlockLayout> {
        let specs = Self::field_specs(&self.signals, ValueKind::Signal)?;
        BlockLayout::from_specs(Some(&self.name), &specs).context("invalid signal layout")
    }

    pub fn port_layout(&self) -> anyhow::Result<PortLayout> {
        let inports = Self::field_specs(&self.inports, ValueKind::Port)?;
        let outports = Self::field_specs(&self.outports, ValueKind::Port)?;
        PortLayout::from_specs(&inports, &outports).context("invalid port layout")
    }

    /// Default parameter block; fields without a `default` stay zero.
    pub fn default_params(&self, layout: &BlockLayout) -> anyhow::Result<Block> {
        let mut block = Block::for_layout(layout);
        for def in &self.parameters {
            let Some(default) = def.spec().and_then(|s| s.default.as_ref()) else {
                continue;
            };
            let path = def.name().replace('.', "/");
            let desc = layout
                .field(&path)
                .ok_or_else(|| anyhow!("parameter {} missing from layout", def.name()))?;
            match default {
                DefaultValue::Scalar(v) => block.set(desc, 0, *v),
                DefaultValue::Array(values) => block.set_all(desc, values),
            }
            .with_context(|| format!("invalid default for parameter {}", def.name()))?;
        }
        Ok(block)
    }
}

fn split_name(full: &str) -> anyhow::Result<(Option<&str>, &str)> {
    let (category, name) = match full.split_once('.') {
        Some((category, name)) => (Some(category), name),
        None => (None, full),
    };
    if category.is_some_and(|c| !is_identifier(c)) || !is_identifier(name) {
        bail!("{full:?} is not `name` or `category.name` with identifier parts");
    }
    Ok((category, name))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric())
}
