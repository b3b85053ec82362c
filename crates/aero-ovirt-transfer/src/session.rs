//! The upload session handle and its data path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::config::UploadParams;
use crate::device::{check_bounds, BlockDevice};
use crate::engine::types::{Disk, ImageTransfer};
use crate::engine::{self, EngineConnection, ManagementApi};
use crate::error::IoOp;
use crate::imageio::ImageioConnection;
use crate::range::ByteRange;
use crate::transfer;
use crate::{Result, TransferError};

/// Largest single PUT issued when emulating zero/trim.
pub const MAX_ZERO_CHUNK: u64 = 64 * 1024;

#[derive(Default)]
pub struct TransferTelemetry {
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
    /// Bytes written as explicit zeros by [`BlockDevice::zero`].
    pub bytes_zeroed: AtomicU64,
    /// Zero/trim calls at or past the high-water mark that needed no request.
    pub zero_requests_absorbed: AtomicU64,
    pub requests: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferTelemetrySnapshot {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub bytes_zeroed: u64,
    pub zero_requests_absorbed: u64,
    pub requests: u64,
}

impl TransferTelemetry {
    pub fn snapshot(&self) -> TransferTelemetrySnapshot {
        TransferTelemetrySnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_zeroed: self.bytes_zeroed.load(Ordering::Relaxed),
            zero_requests_absorbed: self.zero_requests_absorbed.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
        }
    }
}

/// Everything a data-plane call touches, serialized behind one lock.
pub(crate) struct IoState {
    pub(crate) conn: ImageioConnection,
    /// Highest `offset + len` over all writes so far. Never decreases.
    pub(crate) highest_write: u64,
    /// Once set, closing deletes the disk instead of finalizing. Never cleared.
    pub(crate) failed: bool,
}

/// Logs a warning if the session it belongs to is dropped while still open.
pub(crate) struct UnclosedGuard {
    disk_id: String,
    transfer_id: String,
    armed: bool,
}

impl UnclosedGuard {
    fn new(disk_id: &str, transfer_id: &str) -> Self {
        Self {
            disk_id: disk_id.to_string(),
            transfer_id: transfer_id.to_string(),
            armed: true,
        }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for UnclosedGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                disk_id = %self.disk_id,
                transfer_id = %self.transfer_id,
                "upload session dropped without finish or abort; disk and engine session left behind"
            );
        }
    }
}

/// An open upload: a created disk, a negotiated image transfer and the data connection to it.
///
/// Created by [`UploadSession::open`]. Callers must consume it with [`UploadSession::finish`]
/// (or [`BlockDevice::close`]) or [`UploadSession::abort`]; merely dropping it neither finalizes
/// nor deletes the disk, and leaves the engine token unrevoked.
pub struct UploadSession {
    pub(crate) params: UploadParams,
    pub(crate) read_only: bool,
    pub(crate) engine: Box<dyn ManagementApi>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) disk: Disk,
    pub(crate) transfer: ImageTransfer,
    pub(crate) io: Mutex<IoState>,
    pub(crate) telemetry: TransferTelemetry,
    pub(crate) unclosed: UnclosedGuard,
}

impl UploadSession {
    /// Connect to the engine named in `params` and set up the upload.
    pub fn open(params: UploadParams, read_only: bool) -> Result<Self> {
        params.validate()?;
        let engine = EngineConnection::connect(&params)?;
        Self::open_with(params, read_only, Box::new(engine), Arc::new(SystemClock))
    }

    /// Set up the upload against an already connected engine.
    ///
    /// The engine connection is closed if setup fails. A disk created before the failure is left
    /// in place.
    pub fn open_with(
        params: UploadParams,
        read_only: bool,
        engine: Box<dyn ManagementApi>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let negotiated = params
            .validate()
            .and_then(|()| negotiate(&params, engine.as_ref(), clock.as_ref()));
        let (disk, transfer, conn) = match negotiated {
            Ok(parts) => parts,
            Err(err) => {
                if let Err(close_err) = engine.close() {
                    warn!(error = %close_err, "failed to close engine connection");
                }
                return Err(err);
            }
        };

        info!(
            disk_id = %disk.id,
            transfer_id = %transfer.id,
            read_only,
            "upload session open"
        );
        let unclosed = UnclosedGuard::new(&disk.id, &transfer.id);
        Ok(Self {
            params,
            read_only,
            engine,
            clock,
            disk,
            transfer,
            io: Mutex::new(IoState {
                conn,
                highest_write: 0,
                failed: false,
            }),
            telemetry: TransferTelemetry::default(),
            unclosed,
        })
    }

    pub fn disk_id(&self) -> &str {
        &self.disk.id
    }

    pub fn transfer_id(&self) -> &str {
        &self.transfer.id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn highest_write(&self) -> u64 {
        self.lock_io().highest_write
    }

    pub fn is_failed(&self) -> bool {
        self.lock_io().failed
    }

    /// The negotiated data endpoint, without query string.
    pub fn data_url(&self) -> Url {
        self.lock_io().conn.url()
    }

    pub fn telemetry_snapshot(&self) -> TransferTelemetrySnapshot {
        self.telemetry.snapshot()
    }

    pub(crate) fn lock_io(&self) -> MutexGuard<'_, IoState> {
        self.io.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(TransferError::Config(
                "upload session was opened read-only".to_string(),
            ));
        }
        Ok(())
    }

    /// Pause the transfer and mark the session failed, then hand `err` back.
    fn fail(&self, io: &mut IoState, err: TransferError) -> TransferError {
        warn!(transfer_id = %self.transfer.id, error = %err, "data request failed, pausing transfer");
        if let Err(pause_err) = self.engine.pause_image_transfer(&self.transfer.id) {
            warn!(transfer_id = %self.transfer.id, error = %pause_err, "failed to pause transfer");
        }
        io.failed = true;
        err
    }

    fn put(&self, io: &mut IoState, range: ByteRange, body: Vec<u8>) -> Result<()> {
        self.telemetry.requests.fetch_add(1, Ordering::Relaxed);
        let resp = match io.conn.put(range, body) {
            Ok(resp) => resp,
            Err(err) => return Err(self.fail(io, err)),
        };
        if resp.status != 200 {
            let err = TransferError::Io {
                op: IoOp::Write,
                offset: range.start,
                len: range.len(),
                status: resp.status,
                reason: resp.reason,
            };
            return Err(self.fail(io, err));
        }
        Ok(())
    }
}

fn negotiate(
    params: &UploadParams,
    engine: &dyn ManagementApi,
    clock: &dyn Clock,
) -> Result<(Disk, ImageTransfer, ImageioConnection)> {
    let disk = engine::create_disk(engine, params)?;

    let rest = || -> Result<(Disk, ImageTransfer, ImageioConnection)> {
        let disk = engine::await_disk_ready(engine, clock, &disk, &params.poll)?;
        let created = transfer::create_transfer_session(engine, &disk.id)?;
        let ready = transfer::await_session_ready(engine, clock, &created, &params.poll)?;
        let url = transfer::select_endpoint(&ready, params.direct)?;
        let conn = transfer::open_data_connection(&ready, url, params.ca_file.as_deref())?;
        Ok((disk, ready, conn))
    };
    rest().map_err(|err| {
        warn!(disk_id = %disk.id, error = %err, "upload setup failed; the created disk is left in place");
        err
    })
}

impl BlockDevice for UploadSession {
    fn size(&self) -> u64 {
        self.params.disk_size
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let len = buf.len() as u64;
        check_bounds(offset, len, self.size())?;
        let Some(range) = ByteRange::new(offset, len) else {
            return Ok(());
        };

        let mut io = self.lock_io();
        self.telemetry.requests.fetch_add(1, Ordering::Relaxed);
        let resp = match io.conn.get(range) {
            Ok(resp) => resp,
            Err(err) => return Err(self.fail(&mut io, err)),
        };
        if !resp.is_success_for_read() {
            let err = TransferError::Io {
                op: IoOp::Read,
                offset,
                len,
                status: resp.status,
                reason: resp.reason,
            };
            return Err(self.fail(&mut io, err));
        }
        if resp.body.len() as u64 != len {
            let err = TransferError::ShortRead {
                offset,
                expected: len,
                actual: resp.body.len() as u64,
            };
            return Err(self.fail(&mut io, err));
        }

        buf.copy_from_slice(&resp.body);
        self.telemetry.bytes_read.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.check_writable()?;
        let len = buf.len() as u64;
        check_bounds(offset, len, self.size())?;
        let Some(range) = ByteRange::new(offset, len) else {
            return Ok(());
        };

        let mut io = self.lock_io();
        io.highest_write = io.highest_write.max(range.end_exclusive());
        self.put(&mut io, range, buf.to_vec())?;
        self.telemetry.bytes_written.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    fn zero(&self, offset: u64, len: u64, may_trim: bool) -> Result<()> {
        self.check_writable()?;
        check_bounds(offset, len, self.size())?;
        let Some(range) = ByteRange::new(offset, len) else {
            return Ok(());
        };

        let mut io = self.lock_io();
        // Nothing has been written at or past this range's end yet, and a fresh disk reads as
        // zeros: the usual whole-device zero pass before the copy lands here.
        if range.end_exclusive() >= io.highest_write {
            self.telemetry
                .zero_requests_absorbed
                .fetch_add(1, Ordering::Relaxed);
            debug!(offset, len, may_trim, highest_write = io.highest_write, "zero request absorbed");
            return Ok(());
        }

        for chunk in range.chunks(MAX_ZERO_CHUNK) {
            let zeros = vec![0u8; chunk.len() as usize];
            self.put(&mut io, chunk, zeros)?;
            self.telemetry
                .bytes_zeroed
                .fetch_add(chunk.len(), Ordering::Relaxed);
        }
        Ok(())
    }

    fn close(self) -> Result<()> {
        self.finish().map(drop)
    }
}
