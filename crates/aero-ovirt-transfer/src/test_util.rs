//! In-memory engine for unit tests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use url::Url;

use crate::config::{DiskFormat, PollTimings, UploadParams, DEFAULT_DISK_DESCRIPTION};
use crate::engine::types::{
    Disk, DiskSpec, DiskStatus, ImageTransfer, ImageTransferSpec, TransferPhase, Vm,
};
use crate::engine::ManagementApi;
use crate::{Result, TransferError};

pub(crate) const DISK_ID: &str = "4f5c7d0e-disk";
pub(crate) const TRANSFER_ID: &str = "9a1b2c3d-transfer";
pub(crate) const PROXY_URL: &str = "https://engine.example.com:54323/images/ticket-id";
pub(crate) const DIRECT_URL: &str = "https://host1.example.com:54322/images/ticket-id";

pub(crate) fn sample_params() -> UploadParams {
    UploadParams {
        engine_url: Url::parse("https://engine.example.com/ovirt-engine/api").unwrap(),
        password_file: PathBuf::from("/nonexistent/password"),
        ca_file: None,
        insecure: false,
        disk_format: DiskFormat::Raw,
        disk_name: "guest-sda".to_string(),
        disk_description: DEFAULT_DISK_DESCRIPTION.to_string(),
        disk_size: 10_737_418_240,
        sparse: true,
        storage_domain: "data".to_string(),
        direct: false,
        disk_id_file: PathBuf::from("/nonexistent/diskid"),
        vm_name: None,
        poll: PollTimings::default(),
    }
}

#[derive(Default)]
struct State {
    /// Number of `get_disk` calls that still report `locked`; `None` means forever.
    disk_locked_polls: Option<u32>,
    transfer_init_polls: Option<u32>,
    /// Polls after finalize before the transfer disappears; `None` means it never does.
    finalize_polls: Option<u32>,
    transfer_url: Option<String>,
    proxy_url: Option<String>,
    vms: Vec<Vm>,

    created_disks: Vec<DiskSpec>,
    created_transfers: Vec<ImageTransferSpec>,
    removed_disks: Vec<String>,
    paused: u32,
    finalized: u32,
    closed: u32,
}

/// Cheaply cloneable handle; clones share state so a test can keep one while the session owns
/// another.
#[derive(Clone)]
pub(crate) struct FakeEngine {
    state: Arc<Mutex<State>>,
}

impl FakeEngine {
    pub(crate) fn new() -> Self {
        let state = State {
            disk_locked_polls: Some(0),
            transfer_init_polls: Some(0),
            finalize_polls: Some(0),
            transfer_url: Some(DIRECT_URL.to_string()),
            proxy_url: Some(PROXY_URL.to_string()),
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Report `ok` on the `polls`-th status check.
    pub(crate) fn disk_ready_after(self, polls: u32) -> Self {
        self.lock().disk_locked_polls = Some(polls.saturating_sub(1));
        self
    }

    pub(crate) fn disk_never_ready(self) -> Self {
        self.lock().disk_locked_polls = None;
        self
    }

    pub(crate) fn transfer_ready_after(self, polls: u32) -> Self {
        self.lock().transfer_init_polls = Some(polls.saturating_sub(1));
        self
    }

    pub(crate) fn transfer_never_ready(self) -> Self {
        self.lock().transfer_init_polls = None;
        self
    }

    pub(crate) fn finalize_never_completes(self) -> Self {
        self.lock().finalize_polls = None;
        self
    }

    pub(crate) fn without_transfer_url(self) -> Self {
        self.lock().transfer_url = None;
        self
    }

    pub(crate) fn without_proxy_url(self) -> Self {
        self.lock().proxy_url = None;
        self
    }

    pub(crate) fn with_vm(self, name: &str, id: &str) -> Self {
        self.lock().vms.push(Vm {
            id: id.to_string(),
            name: Some(name.to_string()),
        });
        self
    }

    pub(crate) fn created_disks(&self) -> Vec<DiskSpec> {
        self.lock().created_disks.clone()
    }

    pub(crate) fn created_transfers(&self) -> Vec<ImageTransferSpec> {
        self.lock().created_transfers.clone()
    }

    pub(crate) fn removed_disks(&self) -> Vec<String> {
        self.lock().removed_disks.clone()
    }

    pub(crate) fn paused(&self) -> u32 {
        self.lock().paused
    }

    pub(crate) fn finalized(&self) -> u32 {
        self.lock().finalized
    }

    pub(crate) fn closed(&self) -> u32 {
        self.lock().closed
    }

    fn transfer(state: &State, phase: TransferPhase) -> ImageTransfer {
        ImageTransfer {
            id: TRANSFER_ID.to_string(),
            phase,
            transfer_url: state.transfer_url.clone(),
            proxy_url: state.proxy_url.clone(),
            signed_ticket: Some("signed-ticket".to_string()),
        }
    }
}

fn countdown(counter: &mut Option<u32>) -> bool {
    match counter {
        Some(0) => true,
        Some(n) => {
            *n -= 1;
            false
        }
        None => false,
    }
}

impl ManagementApi for FakeEngine {
    fn create_disk(&self, spec: &DiskSpec) -> Result<Disk> {
        self.lock().created_disks.push(spec.clone());
        Ok(Disk {
            id: DISK_ID.to_string(),
            name: Some(spec.name.clone()),
            status: DiskStatus::Locked,
            format: Some(spec.format),
            provisioned_size: Some(spec.provisioned_size),
            sparse: Some(spec.sparse),
        })
    }

    fn get_disk(&self, disk_id: &str) -> Result<Disk> {
        let mut state = self.lock();
        let status = if countdown(&mut state.disk_locked_polls) {
            DiskStatus::Ok
        } else {
            DiskStatus::Locked
        };
        Ok(Disk {
            id: disk_id.to_string(),
            name: None,
            status,
            format: None,
            provisioned_size: None,
            sparse: None,
        })
    }

    fn remove_disk(&self, disk_id: &str) -> Result<()> {
        self.lock().removed_disks.push(disk_id.to_string());
        Ok(())
    }

    fn create_image_transfer(&self, spec: &ImageTransferSpec) -> Result<ImageTransfer> {
        let mut state = self.lock();
        state.created_transfers.push(spec.clone());
        Ok(Self::transfer(&state, TransferPhase::Initializing))
    }

    fn get_image_transfer(&self, transfer_id: &str) -> Result<Option<ImageTransfer>> {
        let mut state = self.lock();
        if transfer_id != TRANSFER_ID {
            return Ok(None);
        }
        if state.finalized > 0 {
            if countdown(&mut state.finalize_polls) {
                return Ok(None);
            }
            return Ok(Some(Self::transfer(&state, TransferPhase::FinalizingSuccess)));
        }
        let phase = if countdown(&mut state.transfer_init_polls) {
            TransferPhase::Transferring
        } else {
            TransferPhase::Initializing
        };
        Ok(Some(Self::transfer(&state, phase)))
    }

    fn pause_image_transfer(&self, _transfer_id: &str) -> Result<()> {
        self.lock().paused += 1;
        Ok(())
    }

    fn finalize_image_transfer(&self, transfer_id: &str) -> Result<()> {
        if transfer_id != TRANSFER_ID {
            return Err(TransferError::Api {
                status: 404,
                message: "Not Found".to_string(),
            });
        }
        self.lock().finalized += 1;
        Ok(())
    }

    fn find_vms_by_name(&self, name: &str) -> Result<Vec<Vm>> {
        Ok(self
            .lock()
            .vms
            .iter()
            .filter(|vm| vm.name.as_deref() == Some(name))
            .cloned()
            .collect())
    }

    fn close(&self) -> Result<()> {
        self.lock().closed += 1;
        Ok(())
    }
}
