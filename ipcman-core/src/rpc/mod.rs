pub mod codec;
pub mod login;
pub mod modules;
pub mod session;
pub mod timestamp;
pub mod transport;

pub use codec::{Params, Response, RpcClient, RpcRequest, send, send_raw};
pub use login::LoginChallenge;
pub use session::{Session, SessionOptions, SessionState, SessionStatus};
pub use transport::{Endpoint, HttpTransport, Transport};
