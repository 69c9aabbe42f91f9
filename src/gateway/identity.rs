use actix_web::http::header::{self, HeaderMap};
use base64::prelude::BASE64_STANDARD;
use base64::Engine;

/// Who a request claims to be. The password half of Basic credentials is
/// never checked here: the upstream server (or whatever sits in front of the
/// gateway) is responsible for authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No `Authorization` header at all.
    Missing,
    /// An `Authorization` header that could not be parsed.
    Anonymous,
    User(String),
}

impl Identity {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let value = match headers.get(header::AUTHORIZATION) {
            Some(value) => value,
            None => return Self::Missing,
        };

        match value.to_str().ok().and_then(parse_basic_user) {
            Some(name) => Self::User(name),
            None => Self::Anonymous,
        }
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            Self::User(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

/// Extracts the username from `Basic <base64(username:password)>`.
pub fn parse_basic_user(value: &str) -> Option<String> {
    let (scheme, credentials) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = BASE64_STANDARD.decode(credentials.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, _password) = decoded.split_once(':')?;
    Some(username.to_string())
}

/// Collapses runs of `/` into a single one.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    let mut last_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if last_slash {
                continue;
            }
            last_slash = true;
        } else {
            last_slash = false;
        }
        normalized.push(ch);
    }
    normalized
}
