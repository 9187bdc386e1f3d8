//! Blocking [`HttpTransport`] on top of a `ureq` agent.

use cva_common::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};
use std::time::Duration;
use tracing::trace;
use ureq::tls::{Certificate, RootCerts, TlsConfig};
use ureq::{Agent, RequestBuilder};

/// `ureq`-backed transport. Every response is returned as-is; status codes
/// are interpreted by the caller.
pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    /// Agent trusting the platform roots.
    pub fn new(connect_timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_connect(Some(connect_timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }

    /// Agent trusting only the given PEM bundle, as used for the API server.
    pub fn with_ca(connect_timeout: Duration, ca_pem: &[u8]) -> Result<Self, TransportError> {
        let certificate = Certificate::from_pem(ca_pem)
            .map_err(|e| TransportError(format!("invalid CA certificate: {e}")))?;
        let tls = TlsConfig::builder()
            .root_certs(RootCerts::new_with_certs(&[certificate]))
            .build();
        let agent: Agent = Agent::config_builder()
            .timeout_connect(Some(connect_timeout))
            .http_status_as_error(false)
            .tls_config(tls)
            .build()
            .into();
        Ok(Self { agent })
    }
}

fn with_headers<B>(mut builder: RequestBuilder<B>, headers: &[(String, String)]) -> RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
}

impl HttpTransport for UreqTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        trace!(method = %request.method, url = %request.url, "sending request");
        let body = request.body.unwrap_or_default();
        let result = match request.method {
            Method::Get => with_headers(self.agent.get(&request.url), &request.headers).call(),
            Method::Post => {
                with_headers(self.agent.post(&request.url), &request.headers).send(body)
            }
            Method::Patch => {
                with_headers(self.agent.patch(&request.url), &request.headers).send(body)
            }
        };
        let mut response = result.map_err(|e| TransportError(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| TransportError(format!("reading response body: {e}")))?;
        trace!(status, bytes = body.len(), "received response");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
