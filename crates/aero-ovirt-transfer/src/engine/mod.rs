//! Control-plane client for the management engine.

mod client;
pub mod types;

use tracing::{debug, info};

pub use client::EngineConnection;
use types::{Disk, DiskSpec, DiskStatus, ImageTransfer, ImageTransferSpec, Vm};

use crate::clock::{poll_until, Clock};
use crate::config::{PollTimings, UploadParams};
use crate::Result;

/// The management operations the upload lifecycle depends on.
///
/// [`EngineConnection`] implements this over the REST API; tests substitute an in-memory engine.
pub trait ManagementApi: Send + Sync {
    fn create_disk(&self, spec: &DiskSpec) -> Result<Disk>;
    fn get_disk(&self, disk_id: &str) -> Result<Disk>;
    fn remove_disk(&self, disk_id: &str) -> Result<()>;

    fn create_image_transfer(&self, spec: &ImageTransferSpec) -> Result<ImageTransfer>;
    /// `Ok(None)` once the engine no longer knows the transfer.
    fn get_image_transfer(&self, transfer_id: &str) -> Result<Option<ImageTransfer>>;
    fn pause_image_transfer(&self, transfer_id: &str) -> Result<()>;
    fn finalize_image_transfer(&self, transfer_id: &str) -> Result<()>;

    fn find_vms_by_name(&self, name: &str) -> Result<Vec<Vm>>;

    /// Release the control-plane session. Failures are logged by the implementation.
    fn close(&self) -> Result<()>;
}

/// Request the destination disk. The engine answers immediately with the disk still locked.
pub fn create_disk(engine: &dyn ManagementApi, params: &UploadParams) -> Result<Disk> {
    let spec = DiskSpec::from_params(params);
    let disk = engine.create_disk(&spec)?;
    info!(
        disk_id = %disk.id,
        name = %spec.name,
        format = spec.format.as_str(),
        size = spec.provisioned_size,
        sparse = spec.sparse,
        storage_domain = %params.storage_domain,
        "created disk"
    );
    Ok(disk)
}

/// Poll the disk until the engine reports it `ok`.
pub fn await_disk_ready(
    engine: &dyn ManagementApi,
    clock: &dyn Clock,
    disk: &Disk,
    timings: &PollTimings,
) -> Result<Disk> {
    let ready = poll_until(clock, timings.disk_interval, timings.timeout, || {
        let current = engine.get_disk(&disk.id)?;
        debug!(disk_id = %current.id, status = ?current.status, "polled disk");
        Ok((current.status == DiskStatus::Ok).then_some(current))
    })?
    .or_timeout("disk to become unlocked")?;
    info!(disk_id = %ready.id, "disk is ready");
    Ok(ready)
}
