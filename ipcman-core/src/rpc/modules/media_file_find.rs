use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::error::RpcError;
use crate::rpc::codec::{RpcClient, RpcRequest, send};

/// Search condition for `mediaFileFind.findFile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Condition {
    #[serde(rename = "Channel")]
    pub channel: i64,
    #[serde(rename = "Dirs")]
    pub dirs: Option<Vec<String>>,
    #[serde(rename = "Types")]
    pub types: Vec<String>,
    #[serde(rename = "Order")]
    pub order: String,
    #[serde(rename = "Redundant")]
    pub redundant: String,
    #[serde(rename = "Events")]
    pub events: Option<Vec<String>>,
    #[serde(rename = "StartTime")]
    pub start_time: String,
    #[serde(rename = "EndTime")]
    pub end_time: String,
    #[serde(rename = "Flags")]
    pub flags: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Condition {
    /// Every media type between two device-local timestamps.
    pub fn new(start_time: String, end_time: String) -> Self {
        Self {
            channel: 0,
            dirs: None,
            types: strings(&["dav", "jpg"]),
            order: "Ascent".into(),
            redundant: "Exclusion".into(),
            events: None,
            start_time,
            end_time,
            flags: strings(&["Timing", "Event", "Event", "Manual"]),
        }
    }

    pub fn picture(mut self) -> Self {
        self.types = strings(&["jpg"]);
        self.flags = strings(&["Timing", "Event", "Event"]);
        self
    }

    pub fn video(mut self) -> Self {
        self.types = strings(&["dav"]);
        self
    }
}

/// Some firmware reports integer fields as floats or null.
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or_default(),
        Value::Bool(b) => i64::from(b),
        _ => 0,
    })
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One entry of a `findNextFile` batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileInfo {
    #[serde(deserialize_with = "lenient_i64")]
    pub channel: i64,
    pub start_time: String,
    pub end_time: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub length: i64,
    #[serde(rename = "Type")]
    pub kind: String,
    pub file_path: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub duration: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub disk: i64,
    pub video_stream: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub flags: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub events: Vec<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub cluster: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub partition: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub pic_index: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub repeat: i64,
    /// Working directory, e.g. `/mnt/dvr/mmc0p2_0`.
    pub work_dir: String,
    /// Set when `work_dir` is named after the device serial number.
    #[serde(rename = "WorkDirSN", deserialize_with = "lenient_i64")]
    pub work_dir_sn: i64,
}

impl FileInfo {
    /// Stored on the device's own disk rather than a network share.
    pub fn local(&self) -> bool {
        self.file_path.starts_with('/')
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FindNextFileResult {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub found: i64,
    #[serde(default)]
    pub infos: Option<Vec<FileInfo>>,
}

pub async fn create<C>(client: &C) -> Result<i64, RpcError>
where
    C: RpcClient + ?Sized,
{
    let response = send::<Value, C>(client, RpcRequest::new("mediaFileFind.factory.create")).await?;
    Ok(response.result)
}

pub async fn find_file<C>(client: &C, object: i64, condition: &Condition) -> Result<bool, RpcError>
where
    C: RpcClient + ?Sized,
{
    let request = RpcRequest::new("mediaFileFind.findFile")
        .params(json!({"condition": serde_json::to_value(condition)?}))
        .object(object);
    Ok(send::<Value, C>(client, request).await?.result_bool())
}

pub async fn find_next_file<C>(
    client: &C,
    object: i64,
    count: i64,
) -> Result<FindNextFileResult, RpcError>
where
    C: RpcClient + ?Sized,
{
    let request = RpcRequest::new("mediaFileFind.findNextFile")
        .params(json!({"count": count}))
        .object(object);
    Ok(send::<FindNextFileResult, C>(client, request).await?.params)
}

pub async fn close<C>(client: &C, object: i64) -> Result<bool, RpcError>
where
    C: RpcClient + ?Sized,
{
    let request = RpcRequest::new("mediaFileFind.close").object(object);
    Ok(send::<Value, C>(client, request).await?.result_bool())
}

pub async fn destroy<C>(client: &C, object: i64) -> Result<bool, RpcError>
where
    C: RpcClient + ?Sized,
{
    let request = RpcRequest::new("mediaFileFind.destroy").object(object);
    Ok(send::<Value, C>(client, request).await?.result_bool())
}
