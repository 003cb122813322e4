use serde::Deserialize;

use crate::error::RpcError;
use crate::rpc::codec::{RpcClient, RpcRequest, send};

#[derive(Debug, Default, Deserialize)]
struct CurrentTime {
    #[serde(default)]
    time: String,
}

/// Device wall clock as a device-local timestamp string.
pub async fn get_current_time<C>(client: &C) -> Result<String, RpcError>
where
    C: RpcClient + ?Sized,
{
    let response = send::<CurrentTime, C>(client, RpcRequest::new("global.getCurrentTime")).await?;
    Ok(response.params.time)
}
