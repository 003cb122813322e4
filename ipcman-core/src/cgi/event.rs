//! Incremental parser for the `multipart/x-mixed-replace` event stream.
//!
//! Each part looks like:
//!
//! ```text
//! --myboundary
//! Content-Type: text/plain
//! Content-Length: 147
//!
//! Code=VideoMotion;action=Start;index=0;data={ ... }
//! ```

use std::collections::HashMap;

use serde_json::Value;

pub const DEFAULT_BOUNDARY: &str = "myboundary";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceEvent {
    pub content_type: String,
    pub content_length: usize,
    pub code: String,
    pub action: String,
    pub index: i64,
    /// Raw text following `data=`, usually JSON.
    pub data: String,
}

impl DeviceEvent {
    pub fn data_json(&self) -> Option<Value> {
        serde_json::from_str(self.data.trim()).ok()
    }
}

/// Boundary named by a `Content-Type` header, or the device default.
pub fn boundary_from_content_type(content_type: Option<&str>) -> String {
    content_type
        .into_iter()
        .flat_map(|ct| ct.split(';'))
        .filter_map(|token| token.trim().split_once('='))
        .find(|(key, _)| *key == "boundary")
        .map(|(_, value)| value.trim_matches('"').to_string())
        .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Seeking,
    Headers,
    Body,
}

#[derive(Debug)]
pub struct EventParser {
    marker: String,
    buffer: Vec<u8>,
    state: State,
    headers: HashMap<String, String>,
    body: String,
}

impl EventParser {
    pub fn new(boundary: &str) -> Self {
        Self {
            marker: format!("--{boundary}"),
            buffer: Vec::new(),
            state: State::Seeking,
            headers: HashMap::new(),
            body: String::new(),
        }
    }

    /// Feeds raw bytes and returns every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DeviceEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.line(line) {
                events.push(event);
            }
        }

        events
    }

    /// Flushes a trailing part that was cut off by the end of the stream.
    pub fn finish(&mut self) -> Option<DeviceEvent> {
        let rest = std::mem::take(&mut self.buffer);
        if !rest.is_empty() {
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            if let Some(event) = self.line(&line) {
                return Some(event);
            }
        }
        match self.state {
            State::Body if !self.body.is_empty() => {
                self.state = State::Seeking;
                Some(self.emit())
            }
            _ => None,
        }
    }

    fn line(&mut self, line: &str) -> Option<DeviceEvent> {
        match self.state {
            State::Seeking => {
                if line.starts_with(&self.marker) {
                    self.start_part();
                }
                None
            }
            State::Headers => {
                if line.is_empty() {
                    self.state = State::Body;
                } else if let Some((key, value)) = line.split_once(':') {
                    self.headers
                        .insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
                }
                None
            }
            State::Body => {
                if line.starts_with(&self.marker) {
                    let event = self.emit();
                    self.start_part();
                    Some(event)
                } else if line.is_empty() {
                    self.state = State::Seeking;
                    Some(self.emit())
                } else {
                    self.body.push_str(line);
                    self.body.push('\n');
                    None
                }
            }
        }
    }

    fn start_part(&mut self) {
        self.state = State::Headers;
        self.headers.clear();
        self.body.clear();
    }

    fn emit(&mut self) -> DeviceEvent {
        let body = std::mem::take(&mut self.body);
        let (fields, data) = parse_body(&body);

        DeviceEvent {
            content_type: self.headers.remove("content-type").unwrap_or_default(),
            content_length: self
                .headers
                .remove("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            code: fields.get("code").cloned().unwrap_or_default(),
            action: fields.get("action").cloned().unwrap_or_default(),
            index: fields
                .get("index")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or_default(),
            data,
        }
    }
}

/// Splits `Key=value;...;data={json}` into lower-cased keys and the trailing
/// JSON blob.
fn parse_body(body: &str) -> (HashMap<String, String>, String) {
    let mut fields = HashMap::new();
    let mut rest = body;

    while let Some((key, after)) = rest.split_once('=') {
        let key = key.trim().to_ascii_lowercase();
        if after.starts_with('{') {
            return (fields, after.to_string());
        }
        match after.split_once(';') {
            Some((value, tail)) => {
                fields.insert(key, value.trim_end().to_string());
                rest = tail;
            }
            None => {
                fields.insert(key, after.trim_end().to_string());
                break;
            }
        }
    }

    (fields, String::new())
}
