use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ipcman_model::{Credentials, DeviceId};
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{ErrorKind, RpcError};
use crate::rpc::codec::{Response, RpcRequest};
use crate::rpc::login;
use crate::rpc::transport::{Endpoint, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// A keepalive is sent before a call once this much time has passed since
    /// the last login or keepalive.
    pub keepalive_interval: Duration,
    pub request_timeout: Duration,
    pub logout_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            logout_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Logout,
    Login,
    Error,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Logout => "logout",
            SessionState::Login => "login",
            SessionState::Error => "error",
            SessionState::Closed => "closed",
        })
    }
}

/// Point-in-time view of a session for observers outside its worker.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub cookie: String,
    pub last_login: Option<DateTime<Utc>>,
    pub error: Option<RpcError>,
}

/// Authentication state of one device.
///
/// Owned by exactly one device worker, so every method takes `&mut self` and
/// nothing inside is locked.
#[derive(Debug)]
pub struct Session {
    device_id: DeviceId,
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    options: SessionOptions,
    state: SessionState,
    cookie: String,
    last_id: i64,
    last_login: Option<Instant>,
    last_login_at: Option<DateTime<Utc>>,
    error: Option<RpcError>,
}

impl Session {
    pub fn new(
        device_id: DeviceId,
        transport: Arc<dyn Transport>,
        credentials: Credentials,
        options: SessionOptions,
    ) -> Self {
        Self {
            device_id,
            transport,
            credentials,
            options,
            state: SessionState::Logout,
            cookie: String::new(),
            last_id: 0,
            last_login: None,
            last_login_at: None,
            error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            cookie: self.cookie.clone(),
            last_login: self.last_login_at,
            error: self.error.clone(),
        }
    }

    /// Brings the session to an authenticated state, logging in or sending a
    /// keepalive as needed.
    pub async fn ready(&mut self) -> Result<(), RpcError> {
        loop {
            match self.state {
                SessionState::Logout => return self.login().await,
                SessionState::Login => {
                    if !self.keepalive_due() {
                        return Ok(());
                    }
                    match self.keepalive().await {
                        Ok(()) => {
                            self.mark_login();
                            return Ok(());
                        }
                        Err(err) if err.is_request_failed() => return Err(err),
                        Err(err) => {
                            tracing::debug!(
                                target: "rpc::session",
                                device_id = %self.device_id,
                                error = %err,
                                "keepalive rejected, logging in again"
                            );
                            self.reset_to_logout();
                        }
                    }
                }
                SessionState::Error => {
                    return Err(self.error.clone().unwrap_or(RpcError::SessionClosed));
                }
                SessionState::Closed => return Err(RpcError::SessionClosed),
            }
        }
    }

    /// Authenticated call on the RPC endpoint.
    ///
    /// A device reply classified as invalid-session demotes the session so the
    /// next call logs in again; the reply itself is still returned.
    pub async fn call(&mut self, request: RpcRequest) -> Result<Response<Value>, RpcError> {
        self.ready().await?;
        let response = self.post(request).await?;
        if response
            .error
            .as_ref()
            .is_some_and(|err| err.kind == ErrorKind::InvalidSession)
            && self.state == SessionState::Login
        {
            tracing::debug!(
                target: "rpc::session",
                device_id = %self.device_id,
                "device reported invalid session"
            );
            self.reset_to_logout();
        }
        Ok(response)
    }

    /// Logs out when authenticated and closes the session for good.
    pub async fn close(&mut self) -> Result<(), RpcError> {
        let result = if self.state == SessionState::Login {
            let logout = RpcRequest::new("global.logout");
            match tokio::time::timeout(self.options.logout_timeout, self.post(logout)).await {
                Ok(Ok(response)) => response.into_checked().map(|_| ()),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(RpcError::RequestFailed("logout timed out".into())),
            }
        } else {
            Ok(())
        };
        self.state = SessionState::Closed;
        self.cookie.clear();
        tracing::debug!(target: "rpc::session", device_id = %self.device_id, "session closed");
        result
    }

    /// Clears a retained login failure so the next call tries again.
    pub fn reset(&mut self) {
        if self.state == SessionState::Error {
            self.error = None;
            self.reset_to_logout();
        }
    }

    fn keepalive_due(&self) -> bool {
        self.last_login
            .is_none_or(|at| at.elapsed() > self.options.keepalive_interval)
    }

    async fn keepalive(&mut self) -> Result<(), RpcError> {
        self.post(RpcRequest::new("global.keepAlive"))
            .await?
            .into_checked()
            .map(|_| ())
    }

    async fn login(&mut self) -> Result<(), RpcError> {
        match self.handshake().await {
            Ok(()) => {
                self.state = SessionState::Login;
                self.error = None;
                self.mark_login();
                tracing::debug!(target: "rpc::session", device_id = %self.device_id, "logged in");
                Ok(())
            }
            Err(err @ RpcError::Login(_)) => {
                tracing::error!(
                    target: "rpc::login",
                    device_id = %self.device_id,
                    error = %err,
                    "login permanently rejected"
                );
                self.reset_to_logout();
                self.state = SessionState::Error;
                self.error = Some(err.clone());
                Err(err)
            }
            Err(err) => {
                tracing::warn!(
                    target: "rpc::login",
                    device_id = %self.device_id,
                    error = %err,
                    "login failed"
                );
                // The half-finished handshake leaves a cookie and ids the
                // device no longer honours.
                self.reset_to_logout();
                Err(err)
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), RpcError> {
        let username = self.credentials.username.clone();
        let password = self.credentials.password.clone();

        let first = self.post(login::first_login(&username)).await?;
        let challenge = login::challenge(&first)?;
        self.cookie = first.session;

        let second = self
            .post(login::second_login(&username, &password, &challenge))
            .await?;
        login::check_second_login(second)
    }

    fn mark_login(&mut self) {
        self.last_login = Some(Instant::now());
        self.last_login_at = Some(Utc::now());
    }

    fn reset_to_logout(&mut self) {
        self.state = SessionState::Logout;
        self.cookie.clear();
        self.last_id = 0;
        self.last_login = None;
        self.last_login_at = None;
    }

    async fn post(&mut self, mut request: RpcRequest) -> Result<Response<Value>, RpcError> {
        let endpoint = if request.login {
            Endpoint::Login
        } else {
            Endpoint::Rpc
        };
        let mut last_id = self.last_id;
        request.fill(
            &mut || {
                last_id += 1;
                last_id
            },
            &self.cookie,
        );
        self.last_id = last_id;

        let body = request.encode();
        let reply = tokio::time::timeout(
            self.options.request_timeout,
            self.transport.post(endpoint, body),
        )
        .await
        .map_err(|_| RpcError::RequestFailed(format!("{} timed out", request.method)))??;

        Response::from_value(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::error::LoginError;

    /// Replies with queued values and records every body it was given.
    #[derive(Debug, Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<Value, RpcError>>>,
        seen: Mutex<Vec<(Endpoint, Value)>>,
    }

    impl ScriptedTransport {
        fn push(&self, reply: Result<Value, RpcError>) {
            self.replies.lock().unwrap().push_back(reply);
        }

        fn seen(&self) -> Vec<(Endpoint, Value)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn post(&self, endpoint: Endpoint, body: Value) -> Result<Value, RpcError> {
            self.seen.lock().unwrap().push((endpoint, body));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RpcError::RequestFailed("no scripted reply".into())))
        }
    }

    fn refusal() -> Result<Value, RpcError> {
        Ok(json!({
            "id": 1,
            "session": "cookie-1",
            "error": {"code": 268632079, "message": ""},
            "params": {"encryption": "Default", "random": "1", "realm": "r"},
            "result": false
        }))
    }

    fn ok(params: Value) -> Result<Value, RpcError> {
        Ok(json!({"id": 0, "session": "cookie-1", "params": params, "result": true}))
    }

    fn session(transport: Arc<ScriptedTransport>) -> Session {
        Session::new(
            DeviceId(1),
            transport,
            Credentials::new("admin", "123"),
            SessionOptions::default(),
        )
    }

    #[tokio::test]
    async fn login_then_call_uses_cookie_and_increasing_ids() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(refusal());
        transport.push(ok(Value::Null));
        transport.push(ok(json!({"time": "2024-01-01 00:00:00"})));

        let mut session = session(transport.clone());
        let response = session
            .call(RpcRequest::new("global.getCurrentTime"))
            .await
            .unwrap();
        assert_eq!(response.params["time"], json!("2024-01-01 00:00:00"));
        assert_eq!(session.state(), SessionState::Login);

        let seen = transport.seen();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0, Endpoint::Login);
        assert_eq!(seen[1].0, Endpoint::Login);
        assert_eq!(seen[2].0, Endpoint::Rpc);
        assert!(seen[0].1.get("session").is_none());
        assert_eq!(seen[1].1["session"], json!("cookie-1"));
        assert_eq!(seen[2].1["session"], json!("cookie-1"));
        let ids: Vec<i64> = seen.iter().map(|(_, b)| b["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn permanent_login_failure_is_retained() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(refusal());
        transport.push(Ok(json!({
            "id": 2,
            "session": "cookie-1",
            "error": {"code": 268632081, "message": ""},
            "result": false
        })));

        let mut session = session(transport.clone());
        let err = session.ready().await.unwrap_err();
        assert!(matches!(err, RpcError::Login(LoginError::Locked)));
        assert_eq!(session.state(), SessionState::Error);

        let again = session.ready().await.unwrap_err();
        assert!(matches!(again, RpcError::Login(LoginError::Locked)));
        assert_eq!(transport.seen().len(), 2, "no further network traffic");

        session.reset();
        assert_eq!(session.state(), SessionState::Logout);
    }

    #[tokio::test]
    async fn transient_login_failure_stays_logged_out() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(Err(RpcError::RequestFailed("connection refused".into())));

        let mut session = session(transport);
        assert!(session.ready().await.unwrap_err().is_request_failed());
        assert_eq!(session.state(), SessionState::Logout);
    }

    #[tokio::test]
    async fn failed_second_login_forgets_the_challenge_session() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(refusal());
        transport.push(Err(RpcError::RequestFailed("connection reset".into())));

        let mut session = session(transport.clone());
        assert!(session.ready().await.unwrap_err().is_request_failed());
        assert_eq!(session.state(), SessionState::Logout);
        assert_eq!(session.status().cookie, "");

        transport.push(refusal());
        transport.push(ok(Value::Null));
        session.ready().await.unwrap();
        assert_eq!(session.state(), SessionState::Login);

        let seen = transport.seen();
        let retry = &seen[2].1;
        assert_eq!(retry["method"], json!("global.login"));
        assert_eq!(retry["id"], json!(1));
        assert!(retry.get("session").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_keepalive_logs_in_again() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(refusal());
        transport.push(ok(Value::Null));

        let mut session = session(transport.clone());
        session.ready().await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        transport.push(Ok(json!({
            "id": 3,
            "error": {"code": 287637505, "message": "invalid session"}
        })));
        transport.push(refusal());
        transport.push(ok(Value::Null));

        session.ready().await.unwrap();
        assert_eq!(session.state(), SessionState::Login);

        let seen = transport.seen();
        assert_eq!(seen[2].1["method"], json!("global.keepAlive"));
        assert_eq!(seen[3].1["method"], json!("global.login"));
        assert_eq!(seen[3].1["id"], json!(1), "ids restart after demotion");
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_transport_failure_keeps_login_state() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(refusal());
        transport.push(ok(Value::Null));

        let mut session = session(transport.clone());
        session.ready().await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        transport.push(Err(RpcError::RequestFailed("timeout".into())));
        assert!(session.ready().await.unwrap_err().is_request_failed());
        assert_eq!(session.state(), SessionState::Login);
    }

    #[tokio::test]
    async fn no_keepalive_within_interval() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(refusal());
        transport.push(ok(Value::Null));

        let mut session = session(transport.clone());
        session.ready().await.unwrap();
        session.ready().await.unwrap();
        assert_eq!(transport.seen().len(), 2);
    }

    #[tokio::test]
    async fn close_logs_out_and_refuses_further_calls() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(refusal());
        transport.push(ok(Value::Null));
        transport.push(ok(Value::Bool(true)));

        let mut session = session(transport.clone());
        session.ready().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(transport.seen()[2].1["method"], json!("global.logout"));
        assert!(matches!(
            session.call(RpcRequest::new("global.getCurrentTime")).await,
            Err(RpcError::SessionClosed)
        ));
        assert_eq!(transport.seen().len(), 3);
    }

    #[tokio::test]
    async fn invalid_session_reply_demotes() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(refusal());
        transport.push(ok(Value::Null));
        transport.push(Ok(json!({
            "id": 3,
            "error": {"code": 287637504, "message": "invalid session"}
        })));

        let mut session = session(transport);
        let response = session
            .call(RpcRequest::new("global.getCurrentTime"))
            .await
            .unwrap();
        assert!(response.error.is_some());
        assert_eq!(session.state(), SessionState::Logout);
    }
}
