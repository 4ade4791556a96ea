//! Request encoding: native HTTP request to `http.request` message and back

use crate::message::{HttpRequestMessage, ParamMap};
use crate::{HttpInterfaceError, HttpResult};
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, Request, Uri};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use switchyard_channels::message::latin1;
use switchyard_channels::Message;
use tracing::debug;

/// Connection-level headers that never reach `meta`
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// GET parameter that overrides the session cookie
pub const SESSION_KEY_PARAM: &str = "session_key";

/// Encode a request for the `http.request` channel
pub fn encode_request(request: &Request<Bytes>, reply_channel: &str) -> HttpResult<Message> {
    encode_request_with_root(request, reply_channel, "")
}

/// Encode a request mounted under `root_path`, which is stripped from the
/// path to form `path_info`
pub fn encode_request_with_root(
    request: &Request<Bytes>,
    reply_channel: &str,
    root_path: &str,
) -> HttpResult<Message> {
    let path = request.uri().path().to_string();
    let path_info = match path.strip_prefix(root_path) {
        Some(rest) if !root_path.is_empty() => rest.to_string(),
        _ => path.clone(),
    };
    let method = request.method().as_str().to_uppercase();
    let query = request.uri().query().unwrap_or_default();

    let get = parse_params(query)
        .map_err(|e| HttpInterfaceError::bad_request(format!("Invalid query string: {}", e)))?;

    let post = if is_form(request.headers()) {
        let body = std::str::from_utf8(request.body())
            .map_err(|_| HttpInterfaceError::bad_request("Form body is not UTF-8"))?;
        parse_params(body)
            .map_err(|e| HttpInterfaceError::bad_request(format!("Invalid form body: {}", e)))?
    } else {
        ParamMap::new()
    };

    let mut meta = BTreeMap::new();
    meta.insert("REQUEST_METHOD".to_string(), method.clone());
    meta.insert("QUERY_STRING".to_string(), query.to_string());
    meta.insert("SCRIPT_NAME".to_string(), root_path.to_string());
    meta.insert("PATH_INFO".to_string(), path_info.clone());
    insert_server(&mut meta, request);
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        meta.insert("REMOTE_ADDR".to_string(), addr.ip().to_string());
        meta.insert("REMOTE_HOST".to_string(), addr.ip().to_string());
        meta.insert("REMOTE_PORT".to_string(), addr.port().to_string());
    }
    for (name, value) in request.headers() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        let key = meta_key(name);
        let value = latin1::decode(value.as_bytes());
        meta.entry(key)
            .and_modify(|existing: &mut String| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    let payload = HttpRequestMessage {
        get,
        post,
        cookies: parse_cookies(request.headers()),
        meta,
        path,
        path_info,
        method,
        reply_channel: reply_channel.to_string(),
        body: request.body().to_vec(),
    };

    debug!(
        method = %payload.method,
        path = %payload.path,
        reply_channel = %reply_channel,
        "Encoded HTTP request"
    );
    Ok(Message::from_payload(&payload)?)
}

/// Decode an `http.request` message
pub fn decode_request(message: Message) -> HttpResult<ChannelRequest> {
    Ok(ChannelRequest {
        inner: message.into_payload()?,
    })
}

fn parse_params(source: &str) -> Result<ParamMap, serde_urlencoded::de::Error> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(source)?;
    let mut params = ParamMap::new();
    for (name, value) in pairs {
        params.entry(name).or_default().push(value);
    }
    Ok(params)
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start().starts_with(FORM_CONTENT_TYPE))
        .unwrap_or(false)
}

fn parse_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

fn meta_key(name: &HeaderName) -> String {
    match name.as_str() {
        "content-length" => "CONTENT_LENGTH".to_string(),
        "content-type" => "CONTENT_TYPE".to_string(),
        other => format!("HTTP_{}", other.to_uppercase().replace('-', "_")),
    }
}

fn insert_server(meta: &mut BTreeMap<String, String>, request: &Request<Bytes>) {
    let authority = request
        .uri()
        .authority()
        .map(|authority| authority.as_str().to_string())
        .or_else(|| {
            request
                .headers()
                .get(header::HOST)
                .and_then(|host| host.to_str().ok())
                .map(str::to_string)
        });

    let (name, port) = match authority.as_deref().and_then(|a| a.rsplit_once(':')) {
        Some((name, port)) if port.parse::<u16>().is_ok() => (name.to_string(), port.to_string()),
        _ => match authority {
            Some(name) => (name, "80".to_string()),
            None => ("unknown".to_string(), "0".to_string()),
        },
    };
    meta.insert("SERVER_NAME".to_string(), name);
    meta.insert("SERVER_PORT".to_string(), port);
}

/// A request decoded from a channel message
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRequest {
    inner: HttpRequestMessage,
}

impl ChannelRequest {
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Path below the mount point
    pub fn path_info(&self) -> &str {
        &self.inner.path_info
    }

    /// Channel the response must be sent on
    pub fn reply_channel(&self) -> &str {
        &self.inner.reply_channel
    }

    /// First value of a query parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.inner.get.get(name)?.first().map(String::as_str)
    }

    pub fn query_params(&self) -> &ParamMap {
        &self.inner.get
    }

    /// First value of a form parameter
    pub fn form_param(&self, name: &str) -> Option<&str> {
        self.inner.post.get(name)?.first().map(String::as_str)
    }

    pub fn form_params(&self) -> &ParamMap {
        &self.inner.post
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.inner.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.inner.cookies
    }

    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.inner.meta
    }

    pub fn body(&self) -> &[u8] {
        &self.inner.body
    }

    pub fn query_string(&self) -> &str {
        self.inner
            .meta
            .get("QUERY_STRING")
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Session key from the `session_key` query parameter, else the cookie
    pub fn session_key(&self, cookie_name: &str) -> Option<&str> {
        self.query_param(SESSION_KEY_PARAM)
            .or_else(|| self.cookie(cookie_name))
    }

    /// Headers rebuilt from `meta`. Entries that are not valid header names
    /// or values are skipped.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (key, value) in &self.inner.meta {
            let name = match key.as_str() {
                "CONTENT_TYPE" => "content-type".to_string(),
                "CONTENT_LENGTH" => "content-length".to_string(),
                other => match other.strip_prefix("HTTP_") {
                    Some(rest) => rest.to_lowercase().replace('_', "-"),
                    None => continue,
                },
            };
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            let Some(bytes) = latin1::encode(value) else {
                continue;
            };
            if let Ok(value) = HeaderValue::from_bytes(&bytes) {
                headers.append(name, value);
            }
        }
        headers
    }

    pub fn into_payload(self) -> HttpRequestMessage {
        self.inner
    }

    /// Rebuild a native request
    pub fn into_http_request(self) -> HttpResult<Request<Bytes>> {
        let headers = self.headers();
        let query = self.query_string();
        let uri = if query.is_empty() {
            self.inner.path.clone()
        } else {
            format!("{}?{}", self.inner.path, query)
        };
        let uri: Uri = uri
            .parse()
            .map_err(|e| HttpInterfaceError::bad_request(format!("Invalid request path: {}", e)))?;
        let method = Method::from_bytes(self.inner.method.as_bytes())
            .map_err(|e| HttpInterfaceError::bad_request(format!("Invalid method: {}", e)))?;

        let mut request = Request::new(Bytes::from(self.inner.body));
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.headers_mut() = headers;
        Ok(request)
    }
}
