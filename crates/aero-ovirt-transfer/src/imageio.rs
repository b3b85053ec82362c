//! Data-plane connection to an imageio endpoint (the host daemon or the engine proxy).

use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, RANGE};
use url::Url;

use crate::net::{self, reason_phrase};
use crate::range::ByteRange;
use crate::Result;

/// A status line plus body, handed back to the caller to judge.
#[derive(Debug)]
pub struct DataResponse {
    pub status: u16,
    pub reason: String,
    pub body: Vec<u8>,
}

impl DataResponse {
    pub fn is_success_for_read(&self) -> bool {
        matches!(self.status, 200 | 206)
    }
}

pub struct ImageioConnection {
    client: Client,
    url: Url,
    ticket: String,
}

impl ImageioConnection {
    /// Prepare the client. Only `https` is spoken and certificates are always verified against
    /// `ca_file` (or the platform roots when absent); the TCP connection is established by the first request and kept
    /// alive afterwards.
    pub fn open(url: Url, ticket: String, ca_file: Option<&Path>) -> Result<Self> {
        let builder = net::client_builder(ca_file)?
            .https_only(true)
            .pool_max_idle_per_host(1)
            .timeout(None::<Duration>);
        let client = net::build_client(builder)?;
        Ok(Self {
            client,
            url,
            ticket,
        })
    }

    /// Endpoint URL with any query string removed.
    pub fn url(&self) -> Url {
        crate::config::redact_url(&self.url)
    }

    pub fn get(&self, range: ByteRange) -> Result<DataResponse> {
        let resp = self
            .client
            .get(self.url.clone())
            .header(AUTHORIZATION, &self.ticket)
            .header(RANGE, range.range_header())
            .send()
            .map_err(net::transport_error)?;
        let status = resp.status();
        let body = resp.bytes().map_err(net::transport_error)?;
        Ok(DataResponse {
            status: status.as_u16(),
            reason: reason_phrase(status),
            body: body.to_vec(),
        })
    }

    /// Upload `body`, which must be exactly `range.len()` bytes.
    pub fn put(&self, range: ByteRange, body: Vec<u8>) -> Result<DataResponse> {
        debug_assert_eq!(body.len() as u64, range.len());
        let resp = self
            .client
            .put(self.url.clone())
            .header(AUTHORIZATION, &self.ticket)
            .header(CONTENT_RANGE, range.content_range_header())
            .body(body)
            .send()
            .map_err(net::transport_error)?;
        let status = resp.status();
        // Drain the reply so the connection goes back to the pool.
        let body = resp.bytes().map_err(net::transport_error)?;
        Ok(DataResponse {
            status: status.as_u16(),
            reason: reason_phrase(status),
            body: body.to_vec(),
        })
    }
}
