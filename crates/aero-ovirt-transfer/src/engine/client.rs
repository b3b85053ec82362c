use std::path::Path;

use reqwest::blocking::{RequestBuilder, Response};
use reqwest::header::ACCEPT;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::types::{Disk, DiskSpec, Fault, ImageTransfer, ImageTransferSpec, Vm, VmList};
use super::ManagementApi;
use crate::config::{redact_url, UploadParams};
use crate::net::{self, log_url, reason_phrase};
use crate::{Result, TransferError};

/// Authenticated session against the engine REST API.
///
/// Authentication goes through the engine's SSO token endpoint; every API call then carries the
/// bearer token. The token is revoked by [`ManagementApi::close`].
pub struct EngineConnection {
    client: reqwest::blocking::Client,
    api_url: Url,
    token: String,
}

#[derive(Deserialize)]
struct SsoReply {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl EngineConnection {
    pub fn connect(params: &UploadParams) -> Result<Self> {
        let password = params.read_password()?;
        Self::connect_with(
            &params.engine_url,
            &params.username(),
            &password,
            params.ca_file.as_deref(),
            params.insecure,
        )
    }

    /// `insecure` disables certificate verification for this connection only; the data
    /// connection always verifies.
    pub fn connect_with(
        url: &Url,
        username: &str,
        password: &str,
        ca_file: Option<&Path>,
        insecure: bool,
    ) -> Result<Self> {
        let api_url = api_base_url(url);
        let builder = net::client_builder(ca_file)?.danger_accept_invalid_certs(insecure);
        let client = net::build_client(builder)?;

        let token_url = sso_url(&api_url, "token")?;
        let resp = client
            .post(token_url)
            .header(ACCEPT, "application/json")
            .form(&[
                ("grant_type", "password"),
                ("scope", "ovirt-app-api"),
                ("username", username),
                ("password", password),
            ])
            .send()
            .map_err(net::transport_error)?;

        let status = resp.status();
        let body = resp.text().map_err(net::transport_error)?;
        let reply: Option<SsoReply> = serde_json::from_str(&body).ok();

        let token = match reply {
            Some(SsoReply {
                access_token: Some(token),
                ..
            }) if status.is_success() => token,
            Some(reply) if reply.error.is_some() || reply.error_description.is_some() => {
                return Err(TransferError::Auth(
                    reply
                        .error_description
                        .or(reply.error)
                        .unwrap_or_default(),
                ));
            }
            _ if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                return Err(TransferError::Auth(format!(
                    "{} {}",
                    status.as_u16(),
                    reason_phrase(status)
                )));
            }
            _ => {
                return Err(TransferError::Api {
                    status: status.as_u16(),
                    message: "SSO reply carried no access token".to_string(),
                });
            }
        };

        info!(engine = %log_url(&api_url), user = username, "connected to engine");
        Ok(Self {
            client,
            api_url,
            token,
        })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{path}", self.api_url.as_str().trim_end_matches('/'));
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json")
            .header("Version", "4")
    }

    fn send(&self, req: RequestBuilder) -> Result<Response> {
        let resp = req.send().map_err(net::transport_error)?;
        check_status(resp)
    }

    fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = self.send(req)?;
        let body = resp.text().map_err(net::transport_error)?;
        Ok(serde_json::from_str(&body)?)
    }

    fn action(&self, path: &str) -> Result<()> {
        self.send(self.request(Method::POST, path).json(&serde_json::json!({})))?;
        Ok(())
    }
}

impl ManagementApi for EngineConnection {
    fn create_disk(&self, spec: &DiskSpec) -> Result<Disk> {
        self.send_json(self.request(Method::POST, "disks").json(spec))
    }

    fn get_disk(&self, disk_id: &str) -> Result<Disk> {
        self.send_json(self.request(Method::GET, &format!("disks/{disk_id}")))
    }

    fn remove_disk(&self, disk_id: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("disks/{disk_id}")))?;
        Ok(())
    }

    fn create_image_transfer(&self, spec: &ImageTransferSpec) -> Result<ImageTransfer> {
        self.send_json(self.request(Method::POST, "imagetransfers").json(spec))
    }

    fn get_image_transfer(&self, transfer_id: &str) -> Result<Option<ImageTransfer>> {
        let resp = self
            .request(Method::GET, &format!("imagetransfers/{transfer_id}"))
            .send()
            .map_err(net::transport_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = check_status(resp)?
            .text()
            .map_err(net::transport_error)?;
        Ok(Some(serde_json::from_str(&body)?))
    }

    fn pause_image_transfer(&self, transfer_id: &str) -> Result<()> {
        self.action(&format!("imagetransfers/{transfer_id}/pause"))
    }

    fn finalize_image_transfer(&self, transfer_id: &str) -> Result<()> {
        self.action(&format!("imagetransfers/{transfer_id}/finalize"))
    }

    fn find_vms_by_name(&self, name: &str) -> Result<Vec<Vm>> {
        let list: VmList = self.send_json(
            self.request(Method::GET, "vms")
                .query(&[("search", format!("name={name}"))]),
        )?;
        Ok(list.vm)
    }

    fn close(&self) -> Result<()> {
        let revoke_url = sso_url(&self.api_url, "revoke")?;
        let resp = self
            .client
            .post(revoke_url)
            .header(ACCEPT, "application/json")
            .form(&[("scope", ""), ("token", self.token.as_str())])
            .send();
        match resp {
            Ok(resp) if resp.status().is_success() => debug!("engine token revoked"),
            Ok(resp) => warn!(status = resp.status().as_u16(), "engine token revocation rejected"),
            Err(err) => warn!(error = %net::transport_error(err), "engine token revocation failed"),
        }
        Ok(())
    }
}

fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().unwrap_or_default();
    let message = serde_json::from_str::<Fault>(&body)
        .ok()
        .and_then(|fault| fault.message())
        .unwrap_or_else(|| reason_phrase(status));

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(TransferError::Auth(message));
    }
    Err(TransferError::Api {
        status: status.as_u16(),
        message,
    })
}

/// API root without credentials, query or trailing slash.
fn api_base_url(url: &Url) -> Url {
    let mut url = redact_url(url);
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);
    url
}

/// `<scheme>://<host>/ovirt-engine/api` -> `<scheme>://<host>/ovirt-engine/sso/oauth/<leaf>`.
fn sso_url(api_url: &Url, leaf: &str) -> Result<Url> {
    let mut url = api_url.clone();
    url.path_segments_mut()
        .map_err(|()| {
            TransferError::Config(format!("engine URL has no path: {}", redact_url(api_url)))
        })?
        .pop_if_empty()
        .pop()
        .extend(["sso", "oauth", leaf]);
    Ok(url)
}
