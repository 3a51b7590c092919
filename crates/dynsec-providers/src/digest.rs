//! HTTP digest authentication (RFC 7616, MD5 with `qop=auth`) on top of reqwest.

use md5::{Digest, Md5};
use rand::Rng;
use reqwest::header::{AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Client, Method, Response, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Challenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl Challenge {
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, rest) = header.trim().split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("Digest") {
            return None;
        }
        let params = parse_params(rest);
        Some(Self {
            realm: params.get("realm")?.clone(),
            nonce: params.get("nonce")?.clone(),
            qop: params.get("qop").cloned(),
            opaque: params.get("opaque").cloned(),
            algorithm: params.get("algorithm").cloned(),
        })
    }

    fn supports_auth_qop(&self) -> bool {
        self.qop
            .as_deref()
            .is_some_and(|qop| qop.split(',').any(|q| q.trim() == "auth"))
    }
}

fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }
        let value = if chars.peek() == Some(&'"') {
            chars.next();
            let mut value = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    c => value.push(c),
                }
            }
            value
        } else {
            chars.by_ref().take_while(|c| *c != ',').collect::<String>()
        };
        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    params
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", Md5::digest(input.as_bytes()))
}

/// Value of the `Authorization` header answering `challenge`.
pub(crate) fn authorization(
    challenge: &Challenge,
    username: &str,
    password: &str,
    method: &Method,
    uri: &str,
    nc: u32,
    cnonce: &str,
) -> String {
    let ha1 = md5_hex(&format!("{}:{}:{}", username, challenge.realm, password));
    let ha2 = md5_hex(&format!("{}:{}", method.as_str(), uri));
    let nc = format!("{:08x}", nc);

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
        username, challenge.realm, challenge.nonce, uri
    );
    if challenge.supports_auth_qop() {
        let response = md5_hex(&format!(
            "{}:{}:{}:{}:auth:{}",
            ha1, challenge.nonce, nc, cnonce, ha2
        ));
        header.push_str(&format!(
            ", qop=auth, nc={}, cnonce=\"{}\", response=\"{}\"",
            nc, cnonce, response
        ));
    } else {
        let response = md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2));
        header.push_str(&format!(", response=\"{}\"", response));
    }
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(", opaque=\"{}\"", opaque));
    }
    header.push_str(", algorithm=MD5");
    header
}

/// Request template that can be replayed after a challenge.
#[derive(Debug, Clone)]
pub(crate) struct DigestRequest {
    pub method: Method,
    pub url: reqwest::Url,
    pub accept: &'static str,
    pub body: Option<serde_json::Value>,
}

/// HTTP client answering digest challenges with a fixed key pair.
pub(crate) struct DigestClient {
    client: Client,
    username: String,
    password: String,
    nc: AtomicU32,
}

impl DigestClient {
    pub fn new(client: Client, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client,
            username: username.into(),
            password: password.into(),
            nc: AtomicU32::new(0),
        }
    }

    fn build(&self, request: &DigestRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .header(reqwest::header::ACCEPT, request.accept);
        if let Some(body) = &request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, request.accept)
                .body(body.to_string());
        }
        builder
    }

    /// Send `request`, answering a single digest challenge if the server issues one.
    pub async fn send(&self, request: &DigestRequest) -> reqwest::Result<Response> {
        let first = self.build(request).send().await?;
        if first.status() != StatusCode::UNAUTHORIZED {
            return Ok(first);
        }

        let Some(challenge) = first
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(Challenge::parse)
        else {
            return Ok(first);
        };

        let uri = match request.url.query() {
            Some(query) => format!("{}?{}", request.url.path(), query),
            None => request.url.path().to_string(),
        };
        let nc = self.nc.fetch_add(1, Ordering::Relaxed) + 1;
        let cnonce = format!("{:016x}", rand::thread_rng().r#gen::<u64>());
        let header = authorization(
            &challenge,
            &self.username,
            &self.password,
            &request.method,
            &uri,
            nc,
            &cnonce,
        );

        match HeaderValue::from_str(&header) {
            Ok(value) => self.build(request).header(AUTHORIZATION, value).send().await,
            Err(_) => Ok(first),
        }
    }
}
