//! HTTP digest authentication (RFC 2617, MD5, `qop=auth`).

use md5::{Digest, Md5};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub qop: Option<String>,
    pub algorithm: Option<String>,
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Splits `key=value` pairs on commas outside of quotes.
fn parameters(input: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in input.chars().chain(std::iter::once(',')) {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                if let Some((key, value)) = current.split_once('=') {
                    out.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    out
}

impl DigestChallenge {
    /// Parses a `WWW-Authenticate: Digest ...` header value.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = header.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }

        let mut challenge = DigestChallenge::default();
        for (key, value) in parameters(rest) {
            match key.as_str() {
                "realm" => challenge.realm = value,
                "nonce" => challenge.nonce = value,
                "opaque" => challenge.opaque = Some(value),
                "qop" => challenge.qop = Some(value),
                "algorithm" => challenge.algorithm = Some(value),
                _ => {}
            }
        }

        (!challenge.nonce.is_empty()).then_some(challenge)
    }

    fn qop_auth(&self) -> bool {
        self.qop
            .as_deref()
            .is_some_and(|qop| qop.split(',').any(|q| q.trim() == "auth"))
    }

    /// `Authorization` header value for one request.
    pub fn authorization(
        &self,
        method: &str,
        uri: &str,
        username: &str,
        password: &str,
        cnonce: &str,
        nonce_count: u32,
    ) -> String {
        let ha1 = md5_hex(&format!("{username}:{}:{password}", self.realm));
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        let nc = format!("{nonce_count:08x}");

        let mut header = if self.qop_auth() {
            let response = md5_hex(&format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", self.nonce));
            format!(
                r#"Digest username="{username}", realm="{}", nonce="{}", uri="{uri}", qop=auth, nc={nc}, cnonce="{cnonce}", response="{response}""#,
                self.realm, self.nonce
            )
        } else {
            let response = md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce));
            format!(
                r#"Digest username="{username}", realm="{}", nonce="{}", uri="{uri}", response="{response}""#,
                self.realm, self.nonce
            )
        };

        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(r#", opaque="{opaque}""#));
        }
        if let Some(algorithm) = &self.algorithm {
            header.push_str(&format!(", algorithm={algorithm}"));
        }
        header
    }
}

pub fn new_cnonce() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}
