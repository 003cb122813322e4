use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ErrorKind, RpcError};
use crate::rpc::codec::{RpcClient, RpcRequest, send, send_raw};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Caps {
    #[serde(rename = "SupportControlFullcolorLight", default)]
    pub support_control_fullcolor_light: i64,
    #[serde(rename = "SupportControlLight", default)]
    pub support_control_light: i64,
    #[serde(rename = "SupportControlSpeaker", default)]
    pub support_control_speaker: i64,
}

impl Caps {
    pub fn any_supported(&self) -> bool {
        self.support_control_fullcolor_light != 0
            || self.support_control_light != 0
            || self.support_control_speaker != 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(rename = "WhiteLight", default)]
    pub white_light: String,
    #[serde(rename = "Speaker", default)]
    pub speaker: String,
}

#[derive(Debug, Default, Deserialize)]
struct CapsParams {
    #[serde(default)]
    caps: Caps,
}

#[derive(Debug, Default, Deserialize)]
struct StatusParams {
    #[serde(default)]
    status: Status,
}

/// Coaxial capabilities of `channel`, or `None` when the device has no
/// coaxial interface at all.
pub async fn probe_caps<C>(client: &C, channel: i64) -> Result<Option<Caps>, RpcError>
where
    C: RpcClient + ?Sized,
{
    let request = RpcRequest::new("CoaxialControlIO.getCaps").params(json!({"channel": channel}));
    let response = send_raw::<CapsParams, C>(client, request).await?;
    match response.error {
        Some(err)
            if matches!(
                err.kind,
                ErrorKind::InterfaceNotFound | ErrorKind::MethodNotFound
            ) =>
        {
            Ok(None)
        }
        Some(err) => Err(RpcError::Response(err)),
        None => Ok(Some(response.params.caps)),
    }
}

pub async fn get_status<C>(client: &C, channel: i64) -> Result<Status, RpcError>
where
    C: RpcClient + ?Sized,
{
    let request = RpcRequest::new("CoaxialControlIO.getStatus").params(json!({"channel": channel}));
    Ok(send::<StatusParams, C>(client, request).await?.params.status)
}
