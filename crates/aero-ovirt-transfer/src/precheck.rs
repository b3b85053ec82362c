//! Pre-flight check run before any upload starts.

use tracing::info;

use crate::config::UploadParams;
use crate::engine::{EngineConnection, ManagementApi};
use crate::{Result, TransferError};

/// Fail if a VM named `vm_name` already exists, so the conversion is not wasted.
pub fn precheck(engine: &dyn ManagementApi, vm_name: &str) -> Result<()> {
    let vms = engine.find_vms_by_name(vm_name)?;
    if let Some(vm) = vms.into_iter().next() {
        return Err(TransferError::VmExists {
            name: vm_name.to_string(),
            id: vm.id,
        });
    }
    info!(vm_name, "no existing VM with the target name");
    Ok(())
}

/// Connect with `params` and run [`precheck`] for `output_name`.
pub fn run_precheck(params: &UploadParams) -> Result<()> {
    let vm_name = params
        .vm_name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| TransferError::Config("precheck requires output_name".to_string()))?;

    let engine = EngineConnection::connect(params)?;
    let result = precheck(&engine, vm_name);
    let closed = engine.close();
    result?;
    closed
}
