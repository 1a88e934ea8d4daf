//! Minimal HTTP/1.1 plumbing: one request per connection, JSON in and out.

use std::io;

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Upper bound for request bodies; config files are the largest payload.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
const MAX_HEADER_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    /// Request target as sent, including the query string.
    pub target: String,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Path without the query string; `/` for anything suspicious.
    pub fn path(&self) -> String {
        normalize_path(&self.target)
    }

    /// Decoded query parameter; blank values count as absent.
    pub fn query(&self, key: &str) -> Option<String> {
        let query = self.target.split_once('?')?.1;
        query.split('&').find_map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            if name.trim() != key {
                return None;
            }
            decode_query_value(value).filter(|v| !v.trim().is_empty())
        })
    }

    /// Body as a JSON value; an empty body is `{}`.
    pub fn json(&self) -> Result<Value, Response> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(json!({}));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| Response::error(400, &format!("request body must be valid JSON: {e}")))
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: "application/json; charset=utf-8",
            body: value.to_string().into_bytes(),
        }
    }

    pub fn ok(value: &Value) -> Self {
        Self::json(200, value)
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, &json!({ "error": message }))
    }

    pub fn asset(content_type: &'static str, body: &[u8]) -> Self {
        Self {
            status: 200,
            content_type,
            body: body.to_vec(),
        }
    }

    fn status_line(&self) -> &'static str {
        match self.status {
            200 => "200 OK",
            400 => "400 Bad Request",
            404 => "404 Not Found",
            405 => "405 Method Not Allowed",
            413 => "413 Payload Too Large",
            _ => "500 Internal Server Error",
        }
    }
}

fn header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Read one request. `Ok(None)` when the peer sent nothing usable.
pub async fn read_request(stream: &mut TcpStream) -> io::Result<Option<HttpRequest>> {
    let mut buf = [0u8; 8192];
    let mut data = Vec::<u8>::new();
    let end = loop {
        let read = stream.read(&mut buf).await?;
        if read == 0 {
            return Ok(None);
        }
        data.extend_from_slice(&buf[..read]);
        if let Some(end) = header_end(&data) {
            break end;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "request headers too large"));
        }
    };

    let header_text = String::from_utf8_lossy(&data[..end]).into_owned();
    let mut lines = header_text.split("\r\n");
    let Some(request_line) = lines.next() else {
        return Ok(None);
    };
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_ascii_uppercase();
    let target = parts.next().unwrap_or("/").to_string();
    if method.is_empty() {
        return Ok(None);
    }

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "request body too large"));
    }

    let mut body = data[end..].to_vec();
    while body.len() < content_length {
        let read = stream.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&buf[..read]);
    }
    body.truncate(content_length);

    Ok(Some(HttpRequest {
        method,
        target,
        body,
    }))
}

pub async fn write_response(
    stream: &mut TcpStream,
    response: &Response,
    head_only: bool,
) -> io::Result<()> {
    let mut headers = String::new();
    headers.push_str("HTTP/1.1 ");
    headers.push_str(response.status_line());
    headers.push_str("\r\n");
    headers.push_str("Content-Type: ");
    headers.push_str(response.content_type);
    headers.push_str("\r\n");
    headers.push_str("Cache-Control: no-store\r\n");
    headers.push_str("X-Content-Type-Options: nosniff\r\n");
    headers.push_str("Connection: close\r\n");
    headers.push_str("Content-Length: ");
    headers.push_str(&response.body.len().to_string());
    headers.push_str("\r\n\r\n");

    stream.write_all(headers.as_bytes()).await?;
    if !head_only {
        stream.write_all(&response.body).await?;
    }
    stream.flush().await
}

fn normalize_path(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw.split('?').next().unwrap_or(raw).trim();
    if raw.is_empty() || raw.len() > 256 || raw.contains("..") || raw.contains('\\') {
        return "/".to_string();
    }
    raw.to_string()
}

fn decode_query_value(value: &str) -> Option<String> {
    let hex = |b: u8| match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    };
    let bytes = value.trim().as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0usize;
    while idx < bytes.len() {
        match bytes[idx] {
            b'+' => {
                out.push(b' ');
                idx += 1;
            }
            b'%' if idx + 2 < bytes.len() => {
                let hi = hex(bytes[idx + 1])?;
                let lo = hex(bytes[idx + 2])?;
                out.push((hi << 4) | lo);
                idx += 3;
            }
            byte => {
                out.push(byte);
                idx += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(target: &str, body: &str) -> HttpRequest {
        HttpRequest {
            method: "GET".into(),
            target: target.into(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn query_values_are_decoded() {
        let req = request("/api/config?name=global_config.json&project=my%20app&x=", "");
        assert_eq!(req.path(), "/api/config");
        assert_eq!(req.query("name").as_deref(), Some("global_config.json"));
        assert_eq!(req.query("project").as_deref(), Some("my app"));
        assert_eq!(req.query("x"), None);
        assert_eq!(req.query("missing"), None);
    }

    #[test]
    fn traversal_paths_collapse_to_root() {
        assert_eq!(request("/../etc/passwd", "").path(), "/");
        assert_eq!(request("/app.js?v=2", "").path(), "/app.js");
    }

    #[test]
    fn empty_body_is_empty_object() {
        assert_eq!(request("/", "  ").json().unwrap(), json!({}));
        let err = request("/", "{nope").json().unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[test]
    fn percent_at_end_is_literal() {
        assert_eq!(decode_query_value("100%").as_deref(), Some("100%"));
        assert_eq!(decode_query_value("a%2Cb").as_deref(), Some("a,b"));
    }
}
