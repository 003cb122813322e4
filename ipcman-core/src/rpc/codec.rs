use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{ResponseError, RpcError};

/// Payload of a request: either a plain JSON value or a batch of nested
/// requests that each receive their own id and session cookie.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    Value(Value),
    Batch(Vec<RpcRequest>),
}

/// Outgoing RPC envelope.
///
/// `id` and `session` are assigned by the session right before the request
/// goes on the wire; callers only set method, params, object and extras.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub id: i64,
    pub session: String,
    pub method: String,
    pub params: Params,
    pub object: i64,
    pub extras: Map<String, Value>,
    /// Posted to the login-only endpoint instead of the RPC endpoint.
    pub login: bool,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: 0,
            session: String::new(),
            method: method.into(),
            params: Params::Value(Value::Null),
            object: 0,
            extras: Map::new(),
            login: false,
        }
    }

    pub fn new_login(method: impl Into<String>) -> Self {
        Self {
            login: true,
            ..Self::new(method)
        }
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = Params::Value(params);
        self
    }

    pub fn batch(mut self, requests: Vec<RpcRequest>) -> Self {
        self.params = Params::Batch(requests);
        self
    }

    pub fn object(mut self, object: i64) -> Self {
        self.object = object;
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    /// Stamps this request and every nested batch request with fresh ids and
    /// the given session cookie.
    pub fn fill(&mut self, next_id: &mut impl FnMut() -> i64, session: &str) {
        self.id = next_id();
        self.session = session.to_string();
        if let Params::Batch(requests) = &mut self.params {
            for request in requests {
                request.fill(next_id, session);
            }
        }
    }

    /// Builds the wire object. Envelope fields win over extras that share a
    /// name.
    pub fn encode(&self) -> Value {
        let mut body = self.extras.clone();
        body.insert("id".into(), Value::from(self.id));
        if !self.session.is_empty() {
            body.insert("session".into(), Value::from(self.session.clone()));
        }
        body.insert("method".into(), Value::from(self.method.clone()));
        let params = match &self.params {
            Params::Value(value) => value.clone(),
            Params::Batch(requests) => {
                Value::Array(requests.iter().map(RpcRequest::encode).collect())
            }
        };
        body.insert("params".into(), params);
        if self.object != 0 {
            body.insert("object".into(), Value::from(self.object));
        }
        Value::Object(body)
    }
}

/// Decoded response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    pub id: i64,
    pub session: String,
    pub error: Option<ResponseError>,
    pub params: T,
    pub result: i64,
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    session: Option<Value>,
    #[serde(default)]
    error: Option<RawError>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Deserialize)]
struct RawError {
    code: i64,
    #[serde(default)]
    message: String,
}

fn session_string(value: Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn result_integer(value: Option<Value>) -> Result<i64, RpcError> {
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Bool(b)) => Ok(i64::from(b)),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| RpcError::Decode(format!("result out of range: {n}"))),
        Some(other) => Err(RpcError::Decode(format!(
            "result must be a number or boolean, got {other}"
        ))),
    }
}

impl Response<Value> {
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let raw: RawResponse = serde_json::from_value(value)?;
        Ok(Self {
            id: raw.id.unwrap_or_default(),
            session: session_string(raw.session),
            error: raw.error.map(|e| ResponseError::new(e.code, e.message)),
            params: raw.params.unwrap_or(Value::Null),
            result: result_integer(raw.result)?,
        })
    }

    /// Decodes `params` into `T`; a null payload becomes `T::default()`.
    pub fn decode<T: DeserializeOwned + Default>(self) -> Result<Response<T>, RpcError> {
        let params = match self.params {
            Value::Null => T::default(),
            value => serde_json::from_value(value)?,
        };
        Ok(Response {
            id: self.id,
            session: self.session,
            error: self.error,
            params,
            result: self.result,
        })
    }
}

impl<T> Response<T> {
    pub fn result_bool(&self) -> bool {
        self.result != 0
    }

    pub fn into_checked(self) -> Result<Self, RpcError> {
        match self.error {
            Some(err) => Err(RpcError::Response(err)),
            None => Ok(self),
        }
    }
}

/// Anything that can run an RPC request against an authenticated device
/// session and hand back the raw envelope.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn call(&self, request: RpcRequest) -> Result<Response<Value>, RpcError>;
}

/// Returns the decoded envelope even when it carries a device error.
pub async fn send_raw<T, C>(client: &C, request: RpcRequest) -> Result<Response<T>, RpcError>
where
    T: DeserializeOwned + Default,
    C: RpcClient + ?Sized,
{
    client.call(request).await?.decode()
}

/// Fails with the device error when the envelope carries one.
pub async fn send<T, C>(client: &C, request: RpcRequest) -> Result<Response<T>, RpcError>
where
    T: DeserializeOwned + Default,
    C: RpcClient + ?Sized,
{
    client.call(request).await?.into_checked()?.decode()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn encode_omits_empty_session_and_zero_object() {
        let request = RpcRequest::new("global.keepAlive");
        assert_eq!(
            request.encode(),
            json!({"id": 0, "method": "global.keepAlive", "params": null})
        );
    }

    #[test]
    fn encode_merges_extras_under_envelope_fields() {
        let mut request = RpcRequest::new("mediaFileFind.findFile")
            .params(json!({"condition": {}}))
            .object(42)
            .extra("method", json!("overridden"))
            .extra("seq", json!(7));
        request.fill(&mut || 5, "cookie");

        assert_eq!(
            request.encode(),
            json!({
                "id": 5,
                "session": "cookie",
                "method": "mediaFileFind.findFile",
                "params": {"condition": {}},
                "object": 42,
                "seq": 7
            })
        );
    }

    #[test]
    fn fill_assigns_ids_to_nested_batch() {
        let mut next = 0;
        let mut request = RpcRequest::new("system.multicall").batch(vec![
            RpcRequest::new("a.b"),
            RpcRequest::new("c.d"),
        ]);
        request.fill(
            &mut || {
                next += 1;
                next
            },
            "s",
        );

        let encoded = request.encode();
        assert_eq!(encoded["id"], json!(1));
        assert_eq!(encoded["params"][0]["id"], json!(2));
        assert_eq!(encoded["params"][1]["id"], json!(3));
        assert_eq!(encoded["params"][1]["session"], json!("s"));
    }

    #[test]
    fn decode_normalizes_result_and_session() {
        let response =
            Response::from_value(json!({"id": 3, "session": 12345, "result": true}))
                .unwrap();
        assert_eq!(response.session, "12345");
        assert_eq!(response.result, 1);
        assert!(response.result_bool());

        let response =
            Response::from_value(json!({"id": 4, "session": "abc", "result": 77})).unwrap();
        assert_eq!(response.session, "abc");
        assert_eq!(response.result, 77);

        let response = Response::from_value(json!({"id": 5, "session": null})).unwrap();
        assert_eq!(response.session, "");
        assert_eq!(response.result, 0);
    }

    #[test]
    fn decode_classifies_error() {
        let response = Response::from_value(json!({
            "id": 1,
            "session": "x",
            "result": false,
            "error": {"code": 285409284, "message": "no data"}
        }))
        .unwrap();
        let err = response.error.clone().unwrap();
        assert_eq!(err.kind, ErrorKind::NoData);

        let checked = response.into_checked().unwrap_err();
        assert!(checked.is_kind(ErrorKind::NoData));
    }

    #[test]
    fn decode_rejects_non_object_envelope() {
        assert!(matches!(
            Response::from_value(json!([1, 2, 3])),
            Err(RpcError::Decode(_))
        ));
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Timeout {
        timeout: i64,
    }

    #[test]
    fn typed_params_default_when_null() {
        let response = Response::from_value(json!({"id": 1, "result": true}))
            .unwrap()
            .decode::<Timeout>()
            .unwrap();
        assert_eq!(response.params, Timeout::default());

        let response =
            Response::from_value(json!({"id": 1, "params": {"timeout": 300}}))
                .unwrap()
                .decode::<Timeout>()
                .unwrap();
        assert_eq!(response.params.timeout, 300);
    }
}
