//! Two-phase login handshake.
//!
//! The first login sends an empty password and must be refused with a
//! challenge. The challenge selects how the password is hashed for the second
//! login.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{LoginError, RpcError};
use crate::rpc::codec::{Response, RpcRequest};

const FIRST_LOGIN_CODES: [i64; 2] = [268_632_079, 401];

/// Parameters returned by the first login refusal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoginChallenge {
    #[serde(default)]
    pub encryption: String,
    #[serde(default)]
    pub random: String,
    #[serde(default)]
    pub realm: String,
}

fn md5_upper(input: &str) -> String {
    hex::encode_upper(Md5::digest(input.as_bytes()))
}

impl LoginChallenge {
    pub fn hash_password(&self, username: &str, password: &str) -> String {
        match self.encryption.as_str() {
            "Basic" => STANDARD.encode(format!("{username}:{password}")),
            "Default" => {
                let inner = md5_upper(&format!("{username}:{}:{password}", self.realm));
                md5_upper(&format!("{username}:{}:{inner}", self.random))
            }
            _ => password.to_string(),
        }
    }

    pub fn login_type(&self) -> &'static str {
        if self.encryption == "WatchNet" {
            "WatchNet"
        } else {
            "Direct"
        }
    }
}

pub fn first_login(username: &str) -> RpcRequest {
    RpcRequest::new_login("global.login").params(json!({
        "userName": username,
        "password": "",
        "loginType": "Direct",
        "clientType": "Web3.0",
    }))
}

/// Validates the first-login refusal and extracts the challenge.
pub fn challenge(response: &Response<Value>) -> Result<LoginChallenge, RpcError> {
    let Some(err) = &response.error else {
        return Err(RpcError::Protocol(
            "first login did not return an error".into(),
        ));
    };
    if !FIRST_LOGIN_CODES.contains(&err.code) {
        return Err(RpcError::Protocol(format!(
            "first login has invalid error code: {}",
            err.code
        )));
    }

    match &response.params {
        Value::Null => Ok(LoginChallenge::default()),
        params => Ok(serde_json::from_value(params.clone())?),
    }
}

pub fn second_login(username: &str, password: &str, challenge: &LoginChallenge) -> RpcRequest {
    RpcRequest::new_login("global.login").params(json!({
        "userName": username,
        "password": challenge.hash_password(username, password),
        "loginType": challenge.login_type(),
        "clientType": "Web3.0",
        "authorityType": challenge.encryption,
    }))
}

/// Maps the second-login reply to success, a permanent login failure, or a
/// transient device error.
pub fn check_second_login(response: Response<Value>) -> Result<(), RpcError> {
    match response.error {
        None => Ok(()),
        Some(err) => match LoginError::from_response(&err) {
            Some(login) => Err(RpcError::Login(login)),
            None => Err(RpcError::Response(err)),
        },
    }
}
