use std::time::Duration;

use axum::http::{
    header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
    HeaderMap, HeaderName, HeaderValue,
};

use super::{claims::TokenKind, jwt::JwtKeys, tokens::TokenPair};
use crate::error::{AppError, AppResult};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

fn cookie(name: &str, value: &str, max_age: Duration, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut raw = format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
        name,
        value,
        max_age.as_secs()
    );
    if secure {
        raw.push_str("; Secure");
    }
    HeaderValue::from_str(&raw)
}

/// `Set-Cookie` headers delivering both tokens of a freshly issued pair.
pub fn session_cookies(
    keys: &JwtKeys,
    pair: &TokenPair,
    secure: bool,
) -> AppResult<[(HeaderName, HeaderValue); 2]> {
    let build = |name, value: &str, kind| {
        cookie(name, value, keys.ttl(kind), secure)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid cookie value: {e}")))
    };
    Ok([
        (SET_COOKIE, build(ACCESS_COOKIE, &pair.access_token, TokenKind::Access)?),
        (SET_COOKIE, build(REFRESH_COOKIE, &pair.refresh_token, TokenKind::Refresh)?),
    ])
}

/// `Set-Cookie` headers that make the browser drop both tokens.
pub fn cleared_cookies(secure: bool) -> [(HeaderName, HeaderValue); 2] {
    let clear = |name: &str| {
        let mut raw = format!("{name}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0");
        if secure {
            raw.push_str("; Secure");
        }
        HeaderValue::from_str(&raw).unwrap_or_else(|_| HeaderValue::from_static(""))
    };
    [
        (SET_COOKIE, clear(ACCESS_COOKIE)),
        (SET_COOKIE, clear(REFRESH_COOKIE)),
    ]
}

pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}
