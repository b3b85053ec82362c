//! JSON shapes of the engine REST API (v4) that the upload path touches.
//!
//! The engine renders scalars inconsistently (`"provisioned_size": "1073741824"`,
//! `"sparse": "true"`), so numeric and boolean fields are decoded leniently. Enumerations carry an
//! `Unknown` catch-all so a newer engine cannot break deserialization.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::{DiskFormat, UploadParams};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskStatus {
    Ok,
    Locked,
    Illegal,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Disk {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: DiskStatus,
    #[serde(default)]
    pub format: Option<DiskFormat>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub provisioned_size: Option<u64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub sparse: Option<bool>,
}

/// Body of `POST /disks`.
#[derive(Debug, Clone, Serialize)]
pub struct DiskSpec {
    pub name: String,
    pub description: String,
    pub format: DiskFormat,
    pub provisioned_size: u64,
    pub sparse: bool,
    pub storage_domains: StorageDomains,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageDomains {
    pub storage_domain: Vec<NamedRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedRef {
    pub name: String,
}

impl DiskSpec {
    pub fn from_params(params: &UploadParams) -> Self {
        Self {
            name: params.disk_name.clone(),
            description: params.disk_description.clone(),
            format: params.disk_format,
            provisioned_size: params.disk_size,
            sparse: params.sparse,
            storage_domains: StorageDomains {
                storage_domain: vec![NamedRef {
                    name: params.storage_domain.clone(),
                }],
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    Initializing,
    Resuming,
    Transferring,
    PausedSystem,
    PausedUser,
    Cancelled,
    FinalizingSuccess,
    FinalizingFailure,
    FinishedSuccess,
    FinishedFailure,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Deserialize)]
pub struct ImageTransfer {
    pub id: String,
    #[serde(default)]
    pub phase: TransferPhase,
    /// Direct URL of the host's imageio daemon. Absent on old engines.
    #[serde(default)]
    pub transfer_url: Option<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub signed_ticket: Option<String>,
}

impl fmt::Debug for ImageTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageTransfer")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("transfer_url", &self.transfer_url)
            .field("proxy_url", &self.proxy_url)
            .field("signed_ticket", &self.signed_ticket.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Body of `POST /imagetransfers`.
#[derive(Debug, Clone, Serialize)]
pub struct ImageTransferSpec {
    pub image: IdRef,
    pub direction: &'static str,
}

impl ImageTransferSpec {
    pub fn upload(disk_id: &str) -> Self {
        Self {
            image: IdRef {
                id: disk_id.to_string(),
            },
            direction: "upload",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Vm {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// `GET /vms` response. The engine omits the key entirely when nothing matched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmList {
    #[serde(default)]
    pub vm: Vec<Vm>,
}

/// Error body returned by the engine for failed API calls.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fault {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl Fault {
    pub fn message(&self) -> Option<String> {
        match (&self.reason, &self.detail) {
            (Some(reason), Some(detail)) => Some(format!("{reason}: {detail}")),
            (Some(msg), None) | (None, Some(msg)) => Some(msg.clone()),
            (None, None) => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    U64(u64),
    Str(String),
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Ok(match Option::<Scalar>::deserialize(d)? {
        Some(Scalar::U64(v)) => Some(v),
        Some(Scalar::Str(s)) => Some(s.trim().parse().map_err(serde::de::Error::custom)?),
        Some(Scalar::Bool(_)) => return Err(serde::de::Error::custom("expected an integer")),
        None => None,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(match Option::<Scalar>::deserialize(d)? {
        Some(Scalar::Bool(v)) => Some(v),
        Some(Scalar::Str(s)) => Some(s.trim().parse().map_err(serde::de::Error::custom)?),
        Some(Scalar::U64(_)) => return Err(serde::de::Error::custom("expected a boolean")),
        None => None,
    })
}
