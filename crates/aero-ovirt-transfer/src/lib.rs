//! Block-device bridge onto the oVirt/RHV image transfer service.
//!
//! A disk conversion tool writes a guest image through a plain block-device interface; this crate
//! turns those calls into ranged HTTPS requests against an imageio endpoint and drives the
//! engine-side lifecycle around them:
//!
//! - [`UploadSession::open`]: create the disk, wait for it, negotiate an image transfer and pick
//!   the direct or proxied data endpoint
//! - [`BlockDevice`]: read, write and zero/trim against the transfer
//! - [`UploadSession::finish`]: finalize and record the disk id, or delete the disk after a failed
//!   request
//! - [`precheck`]: refuse to start when the target VM name is already taken
//!
//! Everything is blocking. Polling waits go through a [`Clock`] so tests can run them on virtual
//! time.

pub mod clock;
pub mod config;
mod device;
pub mod engine;
mod error;
pub mod imageio;
mod lifecycle;
mod net;
mod precheck;
pub mod range;
mod session;
pub mod transfer;

#[cfg(test)]
mod test_util;

pub use clock::{Clock, ManualClock, PollOutcome, SystemClock};
pub use config::{DiskFormat, PollTimings, UploadParams};
pub use device::BlockDevice;
pub use engine::{EngineConnection, ManagementApi};
pub use error::{IoOp, Result, TransferError};
pub use lifecycle::CloseOutcome;
pub use precheck::{precheck, run_precheck};
pub use range::ByteRange;
pub use session::{TransferTelemetry, TransferTelemetrySnapshot, UploadSession, MAX_ZERO_CHUNK};
