pub mod digest;
pub mod event;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use ipcman_model::Credentials;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};

use crate::error::CgiError;

pub use digest::DigestChallenge;
pub use event::{DeviceEvent, EventParser, boundary_from_content_type};

/// Digest-authenticated GET client for `/cgi-bin/*` endpoints.
#[derive(Debug)]
pub struct CgiClient {
    http: reqwest::Client,
    origin: String,
    credentials: Credentials,
    nonce_count: AtomicU32,
}

impl CgiClient {
    /// `http` should have no overall request timeout since event streams
    /// stay open indefinitely.
    pub fn new(http: reqwest::Client, origin: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            http,
            origin: origin.into(),
            credentials,
            nonce_count: AtomicU32::new(0),
        }
    }

    /// GETs `/cgi-bin/{path_and_query}`, answering a digest challenge once.
    pub async fn get(&self, path_and_query: &str) -> Result<reqwest::Response, CgiError> {
        let uri = format!("/cgi-bin/{path_and_query}");
        let url = format!("{}{uri}", self.origin);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| CgiError::RequestFailed(err.to_string()))?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get_all(WWW_AUTHENTICATE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .find_map(DigestChallenge::parse);
            let Some(challenge) = challenge else {
                return Err(CgiError::Status(response.status().as_u16()));
            };

            let nc = self.nonce_count.fetch_add(1, Ordering::Relaxed) + 1;
            let authorization = challenge.authorization(
                "GET",
                &uri,
                &self.credentials.username,
                &self.credentials.password,
                &digest::new_cnonce(),
                nc,
            );
            self.http
                .get(&url)
                .header(AUTHORIZATION, authorization)
                .send()
                .await
                .map_err(|err| CgiError::RequestFailed(err.to_string()))?
        } else {
            response
        };

        if !response.status().is_success() {
            return Err(CgiError::Status(response.status().as_u16()));
        }
        Ok(response)
    }
}

/// Open push-event connection.
#[async_trait]
pub trait EventStream: Send {
    /// Next event, or `None` once the device closed the stream.
    async fn next_event(&mut self) -> Result<Option<DeviceEvent>, CgiError>;
}

/// Something that can open an event stream for a device.
#[async_trait]
pub trait EventSource: Send + Sync + std::fmt::Debug {
    async fn attach(&self, heartbeat: u64) -> Result<Box<dyn EventStream>, CgiError>;
}

pub fn event_manager_path(heartbeat: u64) -> String {
    let mut path = "eventManager.cgi?action=attach&codes=[All]".to_string();
    if heartbeat != 0 {
        path.push_str(&format!("&heartbeat={heartbeat}"));
    }
    path
}

#[async_trait]
impl EventSource for CgiClient {
    async fn attach(&self, heartbeat: u64) -> Result<Box<dyn EventStream>, CgiError> {
        let response = self.get(&event_manager_path(heartbeat)).await?;
        let boundary = boundary_from_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
        );

        Ok(Box::new(HttpEventStream {
            response,
            parser: EventParser::new(&boundary),
            pending: VecDeque::new(),
            done: false,
        }))
    }
}

struct HttpEventStream {
    response: reqwest::Response,
    parser: EventParser,
    pending: VecDeque<DeviceEvent>,
    done: bool,
}

#[async_trait]
impl EventStream for HttpEventStream {
    async fn next_event(&mut self) -> Result<Option<DeviceEvent>, CgiError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.done {
                return Ok(None);
            }

            match self.response.chunk().await {
                Ok(Some(bytes)) => self.pending.extend(self.parser.push(&bytes)),
                Ok(None) => {
                    self.done = true;
                    self.pending.extend(self.parser.finish());
                }
                Err(err) => return Err(CgiError::RequestFailed(err.to_string())),
            }
        }
    }
}
