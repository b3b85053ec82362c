//! Upload parameters.
//!
//! The calling tool hands over a JSON document once, before the first `open`. It is parsed into
//! an immutable [`UploadParams`] which is then passed by reference to everything that needs it.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Result, TransferError};

/// Principal used when the engine URL carries no username.
pub const DEFAULT_USERNAME: &str = "admin@internal";

pub const DEFAULT_DISK_DESCRIPTION: &str = "Uploaded by aero-ovirt-upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    Raw,
    /// Copy-on-write (qcow2) allocation on the storage domain.
    #[serde(alias = "qcow2")]
    Cow,
}

impl DiskFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Cow => "cow",
        }
    }
}

/// Intervals and deadline for the three polling loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimings {
    pub disk_interval: Duration,
    pub transfer_interval: Duration,
    pub finalize_interval: Duration,
    /// Deadline for each individual wait, measured from the start of that wait.
    pub timeout: Duration,
}

impl Default for PollTimings {
    fn default() -> Self {
        Self {
            disk_interval: Duration::from_secs(5),
            transfer_interval: Duration::from_secs(5),
            finalize_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct UploadParams {
    /// Engine API URL, e.g. `https://engine.example.com/ovirt-engine/api`. May carry a username.
    #[serde(rename = "output_conn")]
    pub engine_url: Url,
    #[serde(rename = "output_password")]
    pub password_file: PathBuf,
    /// CA bundle (PEM) trusted for both the engine and the data endpoint.
    #[serde(rename = "rhv_cafile", default)]
    pub ca_file: Option<PathBuf>,
    /// Skip certificate verification on the engine connection only.
    #[serde(default)]
    pub insecure: bool,
    pub disk_format: DiskFormat,
    pub disk_name: String,
    #[serde(default = "default_description")]
    pub disk_description: String,
    pub disk_size: u64,
    #[serde(rename = "output_sparse")]
    pub sparse: bool,
    #[serde(rename = "output_storage")]
    pub storage_domain: String,
    /// Upload straight to the host's imageio daemon instead of the engine proxy.
    #[serde(rename = "rhv_direct", default)]
    pub direct: bool,
    /// Receives the created disk id after a successful upload.
    #[serde(rename = "diskid_file")]
    pub disk_id_file: PathBuf,
    /// Name of the VM that will be created from the disk; only needed by precheck.
    #[serde(rename = "output_name", default)]
    pub vm_name: Option<String>,
    #[serde(skip)]
    pub poll: PollTimings,
}

fn default_description() -> String {
    DEFAULT_DISK_DESCRIPTION.to_string()
}

impl fmt::Debug for UploadParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The URL may embed credentials.
        f.debug_struct("UploadParams")
            .field("engine_url", &redact_url(&self.engine_url).as_str())
            .field("password_file", &self.password_file)
            .field("ca_file", &self.ca_file)
            .field("insecure", &self.insecure)
            .field("disk_format", &self.disk_format)
            .field("disk_name", &self.disk_name)
            .field("disk_size", &self.disk_size)
            .field("sparse", &self.sparse)
            .field("storage_domain", &self.storage_domain)
            .field("direct", &self.direct)
            .field("disk_id_file", &self.disk_id_file)
            .field("vm_name", &self.vm_name)
            .field("poll", &self.poll)
            .finish()
    }
}

impl UploadParams {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(raw)
            .map_err(|e| TransferError::Config(format!("invalid parameters document: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            TransferError::Config(format!("read parameters {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn with_poll_timings(mut self, poll: PollTimings) -> Self {
        self.poll = poll;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.engine_url.has_host() {
            return Err(TransferError::Config(format!(
                "engine URL must be absolute: {}",
                redact_url(&self.engine_url)
            )));
        }
        if self.disk_size == 0 {
            return Err(TransferError::Config("disk size must be non-zero".to_string()));
        }
        if self.disk_name.trim().is_empty() {
            return Err(TransferError::Config("disk name must not be empty".to_string()));
        }
        if self.storage_domain.trim().is_empty() {
            return Err(TransferError::Config(
                "storage domain must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Username embedded in the engine URL, falling back to [`DEFAULT_USERNAME`].
    pub fn username(&self) -> String {
        username_from_url(&self.engine_url)
    }

    pub fn read_password(&self) -> Result<String> {
        read_password(&self.password_file)
    }
}

pub fn username_from_url(url: &Url) -> String {
    let raw = url.username();
    if raw.is_empty() {
        return DEFAULT_USERNAME.to_string();
    }
    // `Url::username` returns the percent-encoded form (`admin%40internal`).
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Read a password file, dropping trailing whitespace (editors and `echo` add a newline).
pub fn read_password(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path).map_err(|e| {
        TransferError::Config(format!("read password file {}: {e}", path.display()))
    })?;
    Ok(raw.trim_end().to_string())
}

/// Strip credentials, query and fragment so the URL can be logged.
pub fn redact_url(url: &Url) -> Url {
    let mut url = url.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_query(None);
    url.set_fragment(None);
    url
}
