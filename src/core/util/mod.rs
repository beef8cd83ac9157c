use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use http::{Request, Response};
use reqwest::redirect::Policy;

use crate::config::HttpClientConfig;

/// Generic HTTP client.
///
/// A trait is used here so replays can be driven against a stub in tests.
/// Implementations must hand back non-2xx responses as `Ok`; only transport
/// failures are errors.
#[async_trait]
pub trait AsyncHttpClient: std::fmt::Debug {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>>;
}

#[derive(Debug)]
pub struct ReqwestClient {
    client: reqwest::Client,
    max_response_bytes: usize,
}

impl ReqwestClient {
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        // Built without reqwest's decompression features, so bodies arrive
        // exactly as the upstream sent them.
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.timeout())
            .redirect(Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.as_str())
            .pool_max_idle_per_host(10)
            .build()
            .context("unable to build http_client")?;
        Ok(Self {
            client,
            max_response_bytes: config.max_response_bytes,
        })
    }
}

#[async_trait]
impl AsyncHttpClient for ReqwestClient {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>> {
        let response = self
            .client
            .execute(request.try_into().context("unable to convert request")?)
            .await
            .context("http request failed")?;

        if let Some(length) = response.content_length() {
            if length as usize > self.max_response_bytes {
                bail!(
                    "response body of {length} bytes exceeds the {} byte limit",
                    self.max_response_bytes
                )
            }
        }

        let mut builder = Response::builder()
            .status(response.status())
            .version(response.version());

        builder
            .headers_mut()
            .context("unable to set headers")?
            .extend(response.headers().clone());

        let body = response
            .bytes()
            .await
            .context("failed to extract response body")?;
        if body.len() > self.max_response_bytes {
            bail!(
                "response body of {} bytes exceeds the {} byte limit",
                body.len(),
                self.max_response_bytes
            )
        }

        builder
            .body(body.to_vec())
            .context("unable to construct response")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builds_from_default_config() {
        let client = ReqwestClient::new(&HttpClientConfig::default()).unwrap();
        assert_eq!(client.max_response_bytes, 50 * 1024 * 1024);
    }
}
