//! Transfer negotiation: create the image transfer, wait for it, pick the data endpoint.

use std::path::Path;

use tracing::{debug, info, warn};
use url::Url;

use crate::clock::{poll_until, Clock};
use crate::config::PollTimings;
use crate::engine::types::{ImageTransfer, ImageTransferSpec, TransferPhase};
use crate::engine::ManagementApi;
use crate::imageio::ImageioConnection;
use crate::net::log_url;
use crate::{Result, TransferError};

/// Ask the engine for an upload transfer on `disk_id`. The disk must already be `ok`.
pub fn create_transfer_session(engine: &dyn ManagementApi, disk_id: &str) -> Result<ImageTransfer> {
    let transfer = engine.create_image_transfer(&ImageTransferSpec::upload(disk_id))?;
    info!(transfer_id = %transfer.id, disk_id, phase = ?transfer.phase, "created image transfer");
    Ok(transfer)
}

/// Poll until the transfer leaves `initializing`.
pub fn await_session_ready(
    engine: &dyn ManagementApi,
    clock: &dyn Clock,
    transfer: &ImageTransfer,
    timings: &PollTimings,
) -> Result<ImageTransfer> {
    let ready = poll_until(clock, timings.transfer_interval, timings.timeout, || {
        let current = engine.get_image_transfer(&transfer.id)?.ok_or_else(|| {
            TransferError::Api {
                status: 404,
                message: format!("image transfer {} disappeared during setup", transfer.id),
            }
        })?;
        debug!(transfer_id = %current.id, phase = ?current.phase, "polled image transfer");
        Ok((current.phase != TransferPhase::Initializing).then_some(current))
    })?
    .or_timeout("transfer to leave the initializing phase")?;

    if ready.phase != TransferPhase::Transferring {
        warn!(transfer_id = %ready.id, phase = ?ready.phase, "image transfer is not in the transferring phase");
    }
    Ok(ready)
}

/// Direct URL when `prefer_direct`, proxy URL otherwise.
pub fn select_endpoint(transfer: &ImageTransfer, prefer_direct: bool) -> Result<Url> {
    let raw = if prefer_direct {
        transfer.transfer_url.as_deref().ok_or_else(|| {
            TransferError::Config(
                "direct upload requested but the engine offers no transfer_url; \
                 run on an oVirt host with a newer engine or disable direct mode"
                    .to_string(),
            )
        })?
    } else {
        transfer.proxy_url.as_deref().ok_or_else(|| {
            TransferError::Config(format!("image transfer {} has no proxy_url", transfer.id))
        })?
    };

    let url = Url::parse(raw)
        .map_err(|e| TransferError::Config(format!("invalid data endpoint URL: {e}")))?;
    if url.scheme() != "https" || !url.has_host() {
        return Err(TransferError::Config(format!(
            "data endpoint must be an https URL with a host: {}",
            log_url(&url)
        )));
    }
    info!(endpoint = %log_url(&url), direct = prefer_direct, "selected data endpoint");
    Ok(url)
}

/// Set up the data connection for `transfer` at `url`.
pub fn open_data_connection(
    transfer: &ImageTransfer,
    url: Url,
    ca_file: Option<&Path>,
) -> Result<ImageioConnection> {
    let ticket = transfer.signed_ticket.clone().ok_or_else(|| {
        TransferError::Config(format!("image transfer {} carries no signed ticket", transfer.id))
    })?;
    ImageioConnection::open(url, ticket, ca_file)
}
