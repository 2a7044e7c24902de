use crate::error::UploadError;
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = concat!("windguru-uploader/", env!("CARGO_PKG_VERSION"));

/// Outbound HTTP seam used by the upload worker. Returns the response body
/// of a successful (2xx) GET.
pub trait HttpTransport: Send + Sync + 'static {
    fn get(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> impl Future<Output = Result<String, UploadError>> + Send;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> reqwest::Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<String, UploadError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    UploadError::Timeout(timeout)
                } else {
                    UploadError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%status, "upload endpoint returned non-success");
            return Err(UploadError::Status(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|err| UploadError::Transport(format!("failed to read response: {err}")))
    }
}
