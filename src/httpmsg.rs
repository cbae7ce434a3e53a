//! Minimal HTTP/1.1-style head parsing and reserialization for the
//! forwarding adapter (`crate::adapter`).
//!
//! Grounded on `original_source/socket/httpforwarder.go`'s `parseHeader`/
//! `writeHeaderToString` (itself built on Go's `textproto.Reader`): read
//! the first line as the request/status line, then name/value header
//! pairs until a blank line. Only `content-length`-framed bodies are
//! understood — chunked transfer-encoding is left for a future revision.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Headers in original insertion order. Lookups (`content_length`) are
/// case-insensitive; storage is not normalized, so reserialization
/// reproduces the original casing.
pub type Headers = Vec<(String, String)>;

/// Reads the request/status line followed by header lines up to (and
/// consuming) the terminating blank line. Returns the line with its
/// trailing CRLF/LF stripped and the parsed headers.
pub async fn read_head<R>(reader: &mut R) -> io::Result<(String, Headers)>
where
    R: AsyncBufRead + Unpin,
{
    let head_line = read_trimmed_line(reader).await?;

    let mut headers = Headers::new();
    loop {
        let line = read_trimmed_line(reader).await?;
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok((head_line, headers))
}

async fn read_trimmed_line<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-header"));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Looks up `content-length` case-insensitively; a missing or unparsable
/// value is treated as zero.
pub fn content_length(headers: &Headers) -> u64 {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(0)
}

/// Reserializes a head line and its headers to HTTP/1.1 text: the line,
/// each `name: value` pair CRLF-terminated, then a terminating CRLF.
pub fn reserialize(head_line: &str, headers: &Headers) -> Vec<u8> {
    let mut text = String::with_capacity(head_line.len() + 2 + headers.len() * 32);
    text.push_str(head_line);
    text.push_str("\r\n");
    for (name, value) in headers {
        text.push_str(name);
        text.push_str(": ");
        text.push_str(value);
        text.push_str("\r\n");
    }
    text.push_str("\r\n");
    text.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn parses_request_line_and_headers() {
        let raw = b"GET /widgets HTTP/1.1\r\nHost: example.com\r\nContent-Length: 3\r\n\r\nabc";
        let mut reader = Cursor::new(&raw[..]);
        let (line, headers) = read_head(&mut reader).await.unwrap();
        assert_eq!(line, "GET /widgets HTTP/1.1");
        assert_eq!(
            headers,
            vec![
                ("Host".to_string(), "example.com".to_string()),
                ("Content-Length".to_string(), "3".to_string()),
            ]
        );
        assert_eq!(content_length(&headers), 3);
    }

    #[test]
    fn missing_content_length_is_zero() {
        let headers = vec![("Host".to_string(), "example.com".to_string())];
        assert_eq!(content_length(&headers), 0);
    }

    #[test]
    fn reserialize_round_trips_shape() {
        let headers = vec![("X-Seq".to_string(), "7".to_string())];
        let out = reserialize("HTTP/1.1 200 OK", &headers);
        assert_eq!(out, b"HTTP/1.1 200 OK\r\nX-Seq: 7\r\n\r\n");
    }
}
