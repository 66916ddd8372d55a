use anyhow::{Context, anyhow};
use core_affinity::{CoreId, get_core_ids, set_for_current};

/// Pin the calling thread to `core_id`.
pub fn try_pin_core(core_id: usize) -> anyhow::Result<usize> {
    let cores = get_core_ids().context("core_affinity::get_core_ids() returned None")?;
    if core_id >= cores.len() {
        return Err(anyhow!(
            "core {core_id} is not available ({} cores reported)",
            cores.len()
        ));
    }
    if !set_for_current(CoreId { id: core_id }) {
        return Err(anyhow!("failed to pin current thread to core {core_id}"));
    }
    Ok(core_id)
}
