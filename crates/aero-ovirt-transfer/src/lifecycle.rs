//! Closing an upload: finalize and record the disk, or roll the disk back.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::clock::{poll_until, Clock};
use crate::config::PollTimings;
use crate::engine::types::ImageTransfer;
use crate::engine::ManagementApi;
use crate::session::{IoState, UploadSession};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The transfer was finalized and the disk id written to the result file.
    Finalized { disk_id: String },
    /// A data request failed earlier; the disk was deleted.
    Removed { disk_id: String },
}

impl UploadSession {
    /// Close the data connection, then finalize (or, after a failed request, delete the disk),
    /// then close the engine connection.
    ///
    /// Every step runs even if an earlier one failed; the first error is returned.
    pub fn finish(self) -> Result<CloseOutcome> {
        let telemetry = self.telemetry.snapshot();
        let UploadSession {
            params,
            engine,
            clock,
            disk,
            transfer,
            io,
            unclosed,
            ..
        } = self;
        unclosed.disarm();

        let IoState { conn, failed, .. } = io.into_inner().unwrap_or_else(|e| e.into_inner());
        drop(conn);

        info!(
            disk_id = %disk.id,
            failed,
            bytes_written = telemetry.bytes_written,
            bytes_zeroed = telemetry.bytes_zeroed,
            requests = telemetry.requests,
            "closing upload session"
        );

        let result = if failed {
            engine
                .remove_disk(&disk.id)
                .map(|()| CloseOutcome::Removed {
                    disk_id: disk.id.clone(),
                })
        } else {
            finalize(engine.as_ref(), clock.as_ref(), &transfer, &params.poll)
                .and_then(|()| write_disk_id(&params.disk_id_file, &disk.id))
                .map(|()| CloseOutcome::Finalized {
                    disk_id: disk.id.clone(),
                })
        };

        match &result {
            Ok(CloseOutcome::Finalized { disk_id }) => info!(disk_id = %disk_id, "upload finalized"),
            Ok(CloseOutcome::Removed { disk_id }) => info!(disk_id = %disk_id, "disk removed"),
            Err(err) => warn!(disk_id = %disk.id, error = %err, "upload close failed"),
        }

        let closed = engine.close();
        let outcome = result?;
        closed?;
        Ok(outcome)
    }

    /// Give up on the upload from the caller's side: pause the transfer and close down the
    /// failure path, deleting the disk.
    pub fn abort(self) -> Result<CloseOutcome> {
        {
            let mut io = self.lock_io();
            if !io.failed {
                if let Err(err) = self.engine.pause_image_transfer(&self.transfer.id) {
                    warn!(transfer_id = %self.transfer.id, error = %err, "failed to pause transfer");
                }
                io.failed = true;
            }
        }
        warn!(disk_id = %self.disk.id, "upload aborted");
        self.finish()
    }
}

/// Ask the engine to finalize, then wait for the transfer to disappear.
fn finalize(
    engine: &dyn ManagementApi,
    clock: &dyn Clock,
    transfer: &ImageTransfer,
    timings: &PollTimings,
) -> Result<()> {
    engine.finalize_image_transfer(&transfer.id)?;
    info!(transfer_id = %transfer.id, "finalizing transfer");

    // The engine drops the transfer once the disk is committed; that is the only success signal.
    poll_until(clock, timings.finalize_interval, timings.timeout, || {
        Ok(engine
            .get_image_transfer(&transfer.id)?
            .is_none()
            .then_some(()))
    })?
    .or_timeout("transfer to finalize")
}

/// Atomically replace `path` with `disk_id` (no trailing newline).
pub(crate) fn write_disk_id(path: &Path, disk_id: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = tmp_path(path);
    fs::write(&tmp, disk_id)?;
    match fs::rename(&tmp, path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
            fs::rename(&tmp, path)?;
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
