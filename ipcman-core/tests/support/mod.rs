//! Scripted device used by the core integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipcman_core::RpcError;
use ipcman_core::rpc::{Endpoint, Transport};
use ipcman_core::model::{ConnectionDescriptor, Credentials, DeviceId};
use serde_json::{Value, json};

pub const SESSION: &str = "fake-session";

/// One file as the device lists it.
#[derive(Debug, Clone)]
pub struct DeviceFile {
    pub path: String,
    pub kind: &'static str,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DeviceFile {
    pub fn video(start: DateTime<Utc>, seconds: i64) -> Self {
        let end = start + chrono::Duration::seconds(seconds);
        Self {
            path: format!(
                "/mnt/sd/{}/001/dav/{}[M][0@0][0].dav",
                start.format("%Y-%m-%d"),
                start.format("%H.%M.%S")
            ),
            kind: "dav",
            start,
            end,
        }
    }

    pub fn picture(start: DateTime<Utc>) -> Self {
        Self {
            path: format!(
                "/mnt/sd/{}/001/jpg/{}[M][0@0][0].jpg",
                start.format("%Y-%m-%d"),
                start.format("%H.%M.%S")
            ),
            kind: "jpg",
            start,
            end: start,
        }
    }

    fn info(&self) -> Value {
        json!({
            "Channel": 0,
            "StartTime": device_time(self.start),
            "EndTime": device_time(self.end),
            "Length": 1024,
            "Type": self.kind,
            "FilePath": self.path,
            "Duration": (self.end - self.start).num_seconds(),
            "Disk": 0,
            "VideoStream": "Main",
            "Flags": ["Timing"],
            "Events": null,
            "Cluster": 0,
            "Partition": 0,
            "PicIndex": 0,
            "Repeat": 0,
            "WorkDir": "/mnt/sd",
            "WorkDirSN": 0,
        })
    }
}

pub fn device_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Default)]
struct Finder {
    matches: Vec<Value>,
    offset: usize,
}

/// In-process stand-in for a device's RPC endpoints, clocked in UTC.
#[derive(Debug, Default)]
pub struct FakeDevice {
    files: Mutex<Vec<DeviceFile>>,
    finders: Mutex<HashMap<i64, Finder>>,
    next_object: AtomicUsize,
    methods: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    /// Error code returned by the second login, if any.
    reject_login: Option<i64>,
}

impl FakeDevice {
    pub fn new(files: Vec<DeviceFile>) -> Self {
        Self {
            files: Mutex::new(files),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn rejecting_login(mut self, code: i64) -> Self {
        self.reject_login = Some(code);
        self
    }

    pub fn set_files(&self, files: Vec<DeviceFile>) {
        *self.files.lock().unwrap() = files;
    }

    pub fn methods(&self) -> Vec<String> {
        self.methods.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.methods
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.as_str() == method)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn open_finders(&self) -> usize {
        self.finders.lock().unwrap().len()
    }

    fn login(&self, body: &Value) -> Value {
        let id = body["id"].clone();
        if body["params"]["password"] == "" {
            return json!({
                "id": id,
                "session": SESSION,
                "error": {"code": 268632079, "message": "Component error: login challenge!"},
                "params": {"encryption": "Default", "random": "1172275829", "realm": "Login to fake"},
                "result": false,
            });
        }
        match self.reject_login {
            Some(code) => json!({
                "id": id,
                "session": SESSION,
                "error": {"code": code, "message": ""},
                "params": null,
                "result": false,
            }),
            None => json!({"id": id, "session": SESSION, "params": null, "result": true}),
        }
    }

    fn rpc(&self, body: &Value) -> Value {
        let id = body["id"].clone();
        let object = body["object"].as_i64().unwrap_or_default();
        let ok = |params: Value, result: Value| {
            json!({"id": id, "session": SESSION, "params": params, "result": result})
        };
        let fail = |code: i64, message: &str| {
            json!({"id": id, "session": SESSION, "error": {"code": code, "message": message}, "result": false})
        };

        if body["session"] != SESSION {
            return fail(287637505, "Invalid session in request data!");
        }

        match body["method"].as_str().unwrap_or_default() {
            "global.keepAlive" => ok(json!({"timeout": 300}), json!(true)),
            "global.logout" => ok(Value::Null, json!(true)),
            "global.getCurrentTime" => ok(json!({"time": device_time(Utc::now())}), json!(true)),
            "mediaFileFind.factory.create" => {
                let object = self.next_object.fetch_add(1, Ordering::SeqCst) as i64 + 1000;
                self.finders.lock().unwrap().insert(object, Finder::default());
                ok(Value::Null, json!(object))
            }
            "mediaFileFind.findFile" => {
                let condition = &body["params"]["condition"];
                let start = condition["StartTime"].as_str().unwrap_or_default().to_string();
                let end = condition["EndTime"].as_str().unwrap_or_default().to_string();
                let types: Vec<String> = condition["Types"]
                    .as_array()
                    .map(|types| {
                        types
                            .iter()
                            .filter_map(|t| t.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();

                let mut files = self.files.lock().unwrap().clone();
                files.sort_by_key(|file| file.start);
                let matches: Vec<Value> = files
                    .iter()
                    .filter(|file| types.iter().any(|t| t == file.kind))
                    .filter(|file| {
                        let at = device_time(file.start);
                        at >= start && at < end
                    })
                    .map(DeviceFile::info)
                    .collect();

                if matches.is_empty() {
                    return fail(285409284, "No data");
                }
                match self.finders.lock().unwrap().get_mut(&object) {
                    Some(finder) => {
                        finder.matches = matches;
                        finder.offset = 0;
                        ok(Value::Null, json!(true))
                    }
                    None => fail(268894209, "Invalid object"),
                }
            }
            "mediaFileFind.findNextFile" => {
                let count = body["params"]["count"].as_u64().unwrap_or(1) as usize;
                let mut finders = self.finders.lock().unwrap();
                let Some(finder) = finders.get_mut(&object) else {
                    return fail(268894209, "Invalid object");
                };
                let batch: Vec<Value> = finder
                    .matches
                    .iter()
                    .skip(finder.offset)
                    .take(count)
                    .cloned()
                    .collect();
                finder.offset += batch.len();
                let found = batch.len();
                if found == 0 {
                    ok(json!({"found": 0}), json!(true))
                } else {
                    ok(json!({"found": found, "infos": batch}), json!(true))
                }
            }
            "mediaFileFind.close" => ok(Value::Null, json!(true)),
            "mediaFileFind.destroy" => {
                self.finders.lock().unwrap().remove(&object);
                ok(Value::Null, json!(true))
            }
            _ => fail(268894210, "Method not found"),
        }
    }
}

#[async_trait]
impl Transport for FakeDevice {
    async fn post(&self, endpoint: Endpoint, body: Value) -> Result<Value, RpcError> {
        let method = body["method"].as_str().unwrap_or_default().to_string();
        self.methods.lock().unwrap().push(method);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = match endpoint {
            Endpoint::Login => self.login(&body),
            Endpoint::Rpc => self.rpc(&body),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(reply)
    }
}

pub fn descriptor(id: i64) -> ConnectionDescriptor {
    ConnectionDescriptor::new(
        DeviceId(id),
        "http://192.0.2.10",
        Credentials::new("admin", "123"),
        "UTC",
        id,
    )
    .unwrap()
}
