//! reqwest plumbing shared by the engine and imageio connections.

use std::error::Error as StdError;
use std::fs;
use std::io;
use std::path::Path;

use reqwest::blocking::ClientBuilder;
use url::Url;

use crate::config::redact_url;
use crate::{Result, TransferError};

/// Client builder trusting only `ca_file` when given, the platform roots otherwise.
pub(crate) fn client_builder(ca_file: Option<&Path>) -> Result<ClientBuilder> {
    let mut builder = reqwest::blocking::Client::builder();
    if let Some(path) = ca_file {
        let pem = fs::read(path)
            .map_err(|e| TransferError::Tls(format!("read CA file {}: {e}", path.display())))?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| TransferError::Tls(format!("parse CA file {}: {e}", path.display())))?;
        builder = builder
            .tls_built_in_root_certs(false)
            .add_root_certificate(cert);
    }
    Ok(builder)
}

pub(crate) fn build_client(builder: ClientBuilder) -> Result<reqwest::blocking::Client> {
    builder
        .build()
        .map_err(|e| TransferError::Tls(format!("build HTTP client: {}", format_reqwest_error(e))))
}

/// Map a transport failure, telling TLS handshake failures apart from everything else.
pub(crate) fn transport_error(err: reqwest::Error) -> TransferError {
    let tls = err.source().is_some_and(chain_has_rustls_error);
    let msg = format_reqwest_error(err);
    if tls {
        TransferError::Tls(msg)
    } else {
        TransferError::Http(msg)
    }
}

/// tokio-rustls reports handshake failures as an `io::Error` wrapping the `rustls::Error`, and
/// `io::Error::source` skips the wrapped value, so look inside explicitly.
fn chain_has_rustls_error(err: &(dyn StdError + 'static)) -> bool {
    let mut next = Some(err);
    while let Some(cause) = next {
        if cause.is::<rustls::Error>() {
            return true;
        }
        if let Some(inner) = cause.downcast_ref::<io::Error>().and_then(io::Error::get_ref) {
            if chain_has_rustls_error(inner) {
                return true;
            }
        }
        next = cause.source();
    }
    false
}

/// Render the whole source chain (rustls puts the useful part at the bottom) without leaking
/// credentials or signed query strings.
fn format_reqwest_error(err: reqwest::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    if let Some(url) = err.url() {
        let redacted = redact_url(url);
        msg = msg.replace(url.as_str(), redacted.as_str());
    }
    msg
}

pub(crate) fn reason_phrase(status: reqwest::StatusCode) -> String {
    status.canonical_reason().unwrap_or("").to_string()
}

pub(crate) fn log_url(url: &Url) -> String {
    redact_url(url).to_string()
}
