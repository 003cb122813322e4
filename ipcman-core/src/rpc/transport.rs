use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::error::RpcError;

/// Which of the two device endpoints a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Rpc,
    Login,
}

/// Moves one JSON envelope to the device and returns the JSON reply.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn post(&self, endpoint: Endpoint, body: Value) -> Result<Value, RpcError>;
}

pub fn rpc_url(origin: &str) -> String {
    format!("{origin}/RPC2")
}

pub fn login_url(origin: &str) -> String {
    format!("{origin}/RPC2_Login")
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    rpc_url: Url,
    login_url: Url,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, origin: &str) -> Result<Self, RpcError> {
        let parse = |raw: String| {
            Url::parse(&raw).map_err(|err| RpcError::Protocol(format!("{raw}: {err}")))
        };
        Ok(Self {
            client,
            rpc_url: parse(rpc_url(origin))?,
            login_url: parse(login_url(origin))?,
        })
    }

    /// Client shared by every device transport.
    pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, endpoint: Endpoint, body: Value) -> Result<Value, RpcError> {
        let url = match endpoint {
            Endpoint::Rpc => self.rpc_url.clone(),
            Endpoint::Login => self.login_url.clone(),
        };

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| RpcError::RequestFailed(err.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|err| RpcError::RequestFailed(err.to_string()))?;

        Ok(serde_json::from_slice(&bytes)?)
    }
}
