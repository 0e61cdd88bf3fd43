//! HTTP client for a running API server, used by the command-line front end.

use std::io::Write;
use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::api::types::{CreateResponse, ListResponse, MessageResponse, ShowResponse};
use crate::log::StreamTag;
use crate::process::{ProcessSpec, ProcessView};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Client for a server on the local host.
    pub fn local(port: u16) -> Result<Self, ClientError> {
        Self::new(format!("http://127.0.0.1:{port}"))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/procs{}", self.base_url, path)
    }

    pub async fn list(&self) -> Result<Vec<ProcessView>, ClientError> {
        let response = self.client.get(self.url("")).send().await?;
        let body: ListResponse = decode(response).await?;
        Ok(body.processes.into_values().collect())
    }

    pub async fn show(&self, pid: &str) -> Result<ProcessView, ClientError> {
        let response = self.client.get(self.url(&format!("/{pid}"))).send().await?;
        let body: ShowResponse = decode(response).await?;
        Ok(body.process)
    }

    /// Submits a process and returns its id.
    pub async fn create(&self, spec: &ProcessSpec) -> Result<String, ClientError> {
        let response = self.client.post(self.url("")).json(spec).send().await?;
        let body: CreateResponse = decode(response).await?;
        Ok(body.pid)
    }

    pub async fn start(&self, pid: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url(&format!("/{pid}/start")))
            .send()
            .await?;
        decode::<MessageResponse>(response).await.map(|_| ())
    }

    pub async fn remove(&self, pid: &str) -> Result<(), ClientError> {
        let response = self.client.delete(self.url(&format!("/{pid}"))).send().await?;
        decode::<MessageResponse>(response).await.map(|_| ())
    }

    /// Combined output captured so far.
    pub async fn output(&self, pid: &str) -> Result<Vec<u8>, ClientError> {
        let response = check(self.client.get(self.url(&format!("/{pid}/log"))).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Copies the live log of command `index` into `out` until the command ends.
    pub async fn tail(
        &self,
        pid: &str,
        index: usize,
        tag: StreamTag,
        out: &mut impl Write,
    ) -> Result<(), ClientError> {
        let mut response = check(
            self.client
                .get(self.url(&format!("/{pid}/log/{index}")))
                .query(&[("stream", tag.as_str())])
                .send()
                .await?,
        )
        .await?;
        while let Some(chunk) = response.chunk().await? {
            out.write_all(&chunk)?;
            out.flush()?;
        }
        Ok(())
    }

    pub async fn input(&self, pid: &str, bytes: Vec<u8>) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url(&format!("/{pid}/input")))
            .body(bytes)
            .send()
            .await?;
        decode::<MessageResponse>(response).await.map(|_| ())
    }
}

async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text);
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    Ok(check(response).await?.json().await?)
}
