//! Minimal HTTP/1.1 exchange over an already established stream.
//!
//! The probe writes the request itself instead of going through a client so that the server
//! processing and content transfer phases are measured on the connection that was just
//! resolved, connected and handshaken.

use std::collections::BTreeMap;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

use super::error::BoxError;

const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 100;
const READ_CHUNK: usize = 16 * 1024;

/// Status line and headers of a response. The body has not been consumed yet,
/// apart from whatever arrived in the same reads as the head.
#[derive(Debug)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body_prefix: Vec<u8>,
}

impl ResponseHead {
    /// First value of the header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.trim().parse().ok()
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    }

    pub fn has_body(&self) -> bool {
        !(100..200).contains(&self.status) && self.status != 204 && self.status != 304
    }
}

/// Serialize a GET for `url`. The connection is closed by the server after the response,
/// which delimits bodies that carry no Content-Length.
pub fn build_request(url: &Url, user_agent: &str) -> String {
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let host = url.host_str().unwrap_or_default();
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    format!(
        "GET {target} HTTP/1.1\r\n\
         Host: {host}\r\n\
         User-Agent: {user_agent}\r\n\
         Accept: */*\r\n\
         Connection: close\r\n\
         \r\n"
    )
}

pub async fn write_request<S>(stream: &mut S, request: &str) -> io::Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await
}

/// Read until a final (non 1xx) response head has been parsed.
pub async fn read_head<S>(stream: &mut S) -> Result<ResponseHead, BoxError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        if let Some((status, headers, consumed)) = parse_head(&buf)? {
            // interim responses such as 100 Continue or 103 Early Hints
            if (100..200).contains(&status) && status != 101 {
                buf.drain(..consumed);
                continue;
            }
            let body_prefix = buf.split_off(consumed);
            return Ok(ResponseHead {
                status,
                headers,
                body_prefix,
            });
        }

        if buf.len() >= MAX_HEAD_BYTES {
            return Err(format!("response head exceeds {MAX_HEAD_BYTES} bytes").into());
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err("connection closed before the response head was complete".into());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

type ParsedHead = (u16, Vec<(String, String)>, usize);

fn parse_head(buf: &[u8]) -> Result<Option<ParsedHead>, BoxError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    match response.parse(buf)? {
        httparse::Status::Partial => Ok(None),
        httparse::Status::Complete(consumed) => {
            let status = response.code.ok_or("response without status code")?;
            let headers = response
                .headers
                .iter()
                .map(|h| {
                    (
                        h.name.to_string(),
                        String::from_utf8_lossy(h.value).into_owned(),
                    )
                })
                .collect();
            Ok(Some((status, headers, consumed)))
        }
    }
}

/// Read the rest of the body and return its size in bytes.
/// Chunked bodies end with their last chunk, bodies with a Content-Length after that many bytes,
/// and any other body when the server closes the connection.
pub async fn drain_body<S>(stream: &mut S, head: &ResponseHead) -> Result<u64, BoxError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    if !head.has_body() {
        return Ok(0);
    }
    if head.is_chunked() {
        return drain_chunked(stream, head.body_prefix.clone()).await;
    }

    let limit = head.content_length();
    let mut received = head.body_prefix.len() as u64;
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        if let Some(len) = limit {
            if received >= len {
                return Ok(len);
            }
        }
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => received += n as u64,
            // TLS peers regularly close without close_notify once the body is sent
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && limit.is_none() => break,
            Err(e) => return Err(e.into()),
        }
    }

    match limit {
        Some(len) if received < len => {
            Err(format!("connection closed after {received} of {len} body bytes").into())
        }
        _ => Ok(received),
    }
}

/// Decode chunked framing up to and including the trailer, returning the payload size.
/// `buf` holds the bytes already read past the head.
async fn drain_chunked<S>(stream: &mut S, mut buf: Vec<u8>) -> Result<u64, BoxError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut decoded = 0u64;
    // chunk data plus its CRLF not yet read
    let mut pending = 0u64;

    loop {
        if pending > 0 {
            let skip = pending.min(buf.len() as u64);
            buf.drain(..skip as usize);
            pending -= skip;
            if pending > 0 {
                fill(stream, &mut buf, &mut chunk).await?;
                continue;
            }
        }

        let parsed = httparse::parse_chunk_size(&buf)
            .map_err(|_| format!("invalid chunk size line after {decoded} body bytes"))?;
        match parsed {
            httparse::Status::Partial => fill(stream, &mut buf, &mut chunk).await?,
            httparse::Status::Complete((consumed, 0)) => {
                buf.drain(..consumed);
                break;
            }
            httparse::Status::Complete((consumed, size)) => {
                buf.drain(..consumed);
                decoded += size;
                pending = size.saturating_add(2);
            }
        }
    }

    // trailer fields, then the empty line that ends the message
    loop {
        match buf.windows(2).position(|w| w == b"\r\n") {
            Some(0) => return Ok(decoded),
            Some(end) => {
                buf.drain(..end + 2);
            }
            None if buf.len() >= MAX_HEAD_BYTES => {
                return Err(format!("chunked trailer exceeds {MAX_HEAD_BYTES} bytes").into());
            }
            None => fill(stream, &mut buf, &mut chunk).await?,
        }
    }
}

async fn fill<S>(stream: &mut S, buf: &mut Vec<u8>, chunk: &mut [u8]) -> Result<(), BoxError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let n = stream.read(chunk).await?;
    if n == 0 {
        return Err("connection closed before the last chunk".into());
    }
    buf.extend_from_slice(&chunk[..n]);
    Ok(())
}

/// Headers as a JSON object of name to values, keys sorted.
pub fn headers_json<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut map: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, value) in headers {
        map.entry(name).or_default().push(value);
    }
    serde_json::to_string(&map).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_build_request() {
        let url = Url::parse("https://cdn.example.com/assets/app.js?v=3").expect("url");
        let request = build_request(&url, "probe/1.0");
        assert_eq!(
            request,
            "GET /assets/app.js?v=3 HTTP/1.1\r\nHost: cdn.example.com\r\nUser-Agent: probe/1.0\r\nAccept: */*\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn test_build_request_keeps_explicit_port() {
        let url = Url::parse("http://127.0.0.1:8080").expect("url");
        let request = build_request(&url, "probe/1.0");
        assert!(request.starts_with("GET / HTTP/1.1\r\nHost: 127.0.0.1:8080\r\n"));
    }

    #[tokio::test]
    async fn test_write_request() {
        let mut out: Vec<u8> = Vec::new();
        write_request(&mut out, "GET / HTTP/1.1\r\n\r\n")
            .await
            .expect("write to vec");
        assert_eq!(out, b"GET / HTTP/1.1\r\n\r\n");
    }

    #[tokio::test]
    async fn test_read_head_and_drain_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 11\r\n\r\nhello world";
        let mut stream = &raw[..];

        let head = read_head(&mut stream).await.expect("head should parse");
        assert_eq!(head.status, 200);
        assert_eq!(head.header("content-type"), Some("text/plain"));
        assert_eq!(head.content_length(), Some(11));
        assert_eq!(head.body_prefix, b"hello world");

        let size = drain_body(&mut stream, &head).await.expect("body");
        assert_eq!(size, 11);
    }

    #[tokio::test]
    async fn test_read_head_skips_interim_responses() {
        let raw = b"HTTP/1.1 103 Early Hints\r\nLink: </style.css>\r\n\r\nHTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        let mut stream = &raw[..];

        let head = read_head(&mut stream).await.expect("head should parse");
        assert_eq!(head.status, 404);
        assert!(head.header("link").is_none());
    }

    #[tokio::test]
    async fn test_read_head_rejects_truncated_head() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Ty";
        let mut stream = &raw[..];
        assert!(read_head(&mut stream).await.is_err());
    }

    #[tokio::test]
    async fn test_read_head_rejects_garbage() {
        let raw = b"\x16\x03\x01\x00\x05hello\r\n\r\n";
        let mut stream = &raw[..];
        assert!(read_head(&mut stream).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_until_close_without_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html></html>";
        let mut stream = &raw[..];

        let head = read_head(&mut stream).await.expect("head should parse");
        assert_eq!(head.content_length(), None);
        let size = drain_body(&mut stream, &head).await.expect("body");
        assert_eq!(size, 13);
    }

    #[tokio::test]
    async fn test_drain_chunked_counts_payload_only() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4;name=value\r\nwiki\r\n5\r\npedia\r\n0\r\nExpires: never\r\n\r\n";
        let mut stream = &raw[..];

        let head = read_head(&mut stream).await.expect("head should parse");
        assert!(head.is_chunked());
        assert_eq!(drain_body(&mut stream, &head).await.expect("body"), 9);
    }

    #[tokio::test]
    async fn test_drain_chunked_stops_at_last_chunk_on_open_stream() {
        let (mut client, mut server) = tokio::io::duplex(8);
        // small pipe: the body arrives a few bytes at a time and the writer never hangs up
        let writer = tokio::spawn(async move {
            server
                .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n")
                .await
                .expect("write response");
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(server);
        });

        let size = tokio::time::timeout(Duration::from_secs(2), async {
            let head = read_head(&mut client).await?;
            drain_body(&mut client, &head).await
        })
        .await
        .expect("drain should not wait for the connection to close")
        .expect("body");

        assert_eq!(size, 11);
        writer.abort();
    }

    #[tokio::test]
    async fn test_drain_chunked_rejects_truncated_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n10\r\nonly a few";
        let mut stream = &raw[..];

        let head = read_head(&mut stream).await.expect("head should parse");
        assert!(drain_body(&mut stream, &head).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_chunked_rejects_bad_size_line() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\nhello\r\n0\r\n\r\n";
        let mut stream = &raw[..];

        let head = read_head(&mut stream).await.expect("head should parse");
        assert!(drain_body(&mut stream, &head).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_reports_short_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nonly a few bytes";
        let mut stream = &raw[..];

        let head = read_head(&mut stream).await.expect("head should parse");
        assert!(drain_body(&mut stream, &head).await.is_err());
    }

    #[tokio::test]
    async fn test_no_body_for_not_modified() {
        let raw = b"HTTP/1.1 304 Not Modified\r\nContent-Length: 1234\r\n\r\n";
        let mut stream = &raw[..];

        let head = read_head(&mut stream).await.expect("head should parse");
        assert_eq!(drain_body(&mut stream, &head).await.expect("body"), 0);
    }

    #[test]
    fn test_headers_json_groups_values() {
        let json = headers_json([
            ("Set-Cookie", "a=1"),
            ("Content-Type", "text/plain"),
            ("Set-Cookie", "b=2"),
        ]);
        assert_eq!(
            json,
            r#"{"Content-Type":["text/plain"],"Set-Cookie":["a=1","b=2"]}"#
        );
    }
}
