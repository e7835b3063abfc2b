//! List Update Protocol
//!
//! Wire format spoken with the list server:
//!
//! ```text
//! GET /safebrowsing/update?client=<id>&apikey=<key>&version=<name>:<major>:<minor> HTTP/1.1
//! Host: <host>
//!
//! HTTP/1.1 200 OK
//! Content-Length: <n>            (or Transfer-Encoding: chunked)
//!
//! [<name> <major>.<minor> update]    (no " update": full snapshot)
//! +<hex digest>
//! -<hex digest>
//! ```

use crate::config::UpdateConfig;
use crate::error::{ProtocolError, UpdateError};
use crate::store::{BlockList, ListVersion};
use regex::Regex;
use std::sync::OnceLock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::debug;

/// Largest accepted response head
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Largest accepted response body
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

const MAX_HEADERS: usize = 64;

/// How a server update relates to the list held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Replaces the whole list
    Full,
    /// Patches the version the client announced
    Delta,
}

/// Parsed update body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListUpdate {
    pub name: String,
    pub version: ListVersion,
    pub kind: UpdateKind,
    pub adds: Vec<String>,
    pub removes: Vec<String>,
    /// Lines that were neither additions nor removals
    pub skipped: usize,
}

/// Status and framing headers of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_length: Option<usize>,
    pub chunked: bool,
}

/// Build the update request for `list`
pub fn build_request(config: &UpdateConfig, list: &BlockList) -> String {
    let host = if config.port == 80 {
        config.host.clone()
    } else {
        format!("{}:{}", config.host, config.port)
    };

    format!(
        "GET /safebrowsing/update?client={}&apikey={}&version={}:{} HTTP/1.1\r\nHost: {}\r\n\r\n",
        config.client,
        config.api_key,
        list.name(),
        list.request_version(),
        host,
    )
}

/// Read the status line and headers up to the blank line.
///
/// Anything but a parsable `200` answer is an error.
pub async fn read_response_head<R>(reader: &mut R) -> Result<ResponseHead, UpdateError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::new();
    loop {
        let start = head.len();
        let n = reader.read_until(b'\n', &mut head).await?;
        if n == 0 {
            debug!("End of stream");
            return Err(ProtocolError::TruncatedHead.into());
        }
        let line = &head[start..];
        debug!("{}", String::from_utf8_lossy(line).trim_end());
        if start > 0 && (line == b"\r\n" || line == b"\n") {
            break;
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(ProtocolError::BadHeader("response head too large".into()).into());
        }
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(ProtocolError::TruncatedHead.into()),
        Err(httparse::Error::Version | httparse::Error::Status) => {
            let status_line = head.split(|b| *b == b'\n').next().unwrap_or_default();
            return Err(ProtocolError::BadStatusLine(
                String::from_utf8_lossy(status_line).trim_end().to_string(),
            )
            .into());
        }
        Err(e) => return Err(ProtocolError::BadHeader(e.to_string()).into()),
    }

    let status = response.code.unwrap_or_default();
    if status != 200 {
        debug!("Non-successful answer: {}", status);
        return Err(ProtocolError::HttpStatus(status).into());
    }

    let mut content_length = None;
    let mut chunked = false;
    for header in response.headers.iter() {
        let value = String::from_utf8_lossy(header.value);
        if header.name.eq_ignore_ascii_case("content-length") {
            let length = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ProtocolError::BadHeader(format!("Content-Length: {}", value)))?;
            content_length = Some(length);
        } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = value
                .split(',')
                .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        }
    }

    Ok(ResponseHead {
        status,
        content_length,
        chunked,
    })
}

/// Read the body that follows `head`.
///
/// `None` means the server has nothing new (`Content-Length: 0`). A body
/// that ends early or exceeds [`MAX_BODY_BYTES`] is an error.
pub async fn read_body<R>(reader: &mut R, head: &ResponseHead) -> Result<Option<Vec<u8>>, UpdateError>
where
    R: AsyncBufRead + Unpin,
{
    read_body_within(reader, head, MAX_BODY_BYTES).await
}

async fn read_body_within<R>(
    reader: &mut R,
    head: &ResponseHead,
    max: usize,
) -> Result<Option<Vec<u8>>, UpdateError>
where
    R: AsyncBufRead + Unpin,
{
    if head.chunked {
        debug!("Going to read in chunked encoding");
        return decode_chunked_within(reader, max).await.map(Some);
    }

    let mut body = Vec::new();
    match head.content_length {
        Some(0) => return Ok(None),
        Some(n) if n > max => return Err(ProtocolError::BodyTooLarge(max).into()),
        Some(expected) => {
            body.reserve(expected);
            reader.take(expected as u64).read_to_end(&mut body).await?;
            if body.len() < expected {
                debug!("Body ended after {} of {} bytes", body.len(), expected);
                return Err(ProtocolError::TruncatedBody { received: body.len() }.into());
            }
        }
        None => {
            // one byte over the limit tells a full body from an oversized one
            reader.take(max as u64 + 1).read_to_end(&mut body).await?;
            if body.len() > max {
                return Err(ProtocolError::BodyTooLarge(max).into());
            }
        }
    }
    Ok(Some(body))
}

/// Decode a chunked transfer-encoded body up to the last chunk
pub async fn decode_chunked<R>(reader: &mut R) -> Result<Vec<u8>, UpdateError>
where
    R: AsyncBufRead + Unpin,
{
    decode_chunked_within(reader, MAX_BODY_BYTES).await
}

async fn decode_chunked_within<R>(reader: &mut R, max: usize) -> Result<Vec<u8>, UpdateError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            debug!("End of stream before last chunk");
            return Err(ProtocolError::TruncatedBody { received: body.len() }.into());
        }

        // chunk extensions follow a ';'
        let size_field = line.split(';').next().unwrap_or_default().trim();
        if size_field.is_empty() {
            continue;
        }
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| ProtocolError::BadChunkSize(size_field.to_string()))?;
        debug!("chunk length = {}", size);
        if size == 0 {
            debug!("Last chunk");
            break;
        }
        if size > max - body.len() {
            return Err(ProtocolError::BodyTooLarge(max).into());
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;

        // CRLF closing the chunk data
        line.clear();
        reader.read_line(&mut line).await?;
    }

    Ok(body)
}

fn list_header() -> &'static Regex {
    static LIST_HEADER: OnceLock<Regex> = OnceLock::new();
    LIST_HEADER.get_or_init(|| {
        Regex::new(r"^\[(\S+) (\d+)\.(\d+)( update)?\]").expect("list header pattern is valid")
    })
}

/// Parse an update body for the list named `expected`.
///
/// Lines after the header are read until a blank line or the end of the
/// body. Lines that are not `+<hex>` or `-<hex>` are skipped.
pub fn parse_update(body: &str, expected: &str) -> Result<ListUpdate, ProtocolError> {
    let mut lines = body.lines();
    let first = lines.next().unwrap_or_default().trim();
    debug!("First line='{}'", first);

    let caps = list_header()
        .captures(first)
        .ok_or_else(|| ProtocolError::BadListHeader(first.to_string()))?;

    let name = &caps[1];
    if name != expected {
        debug!("Wrong name of hash \"{}\" instead of {}", name, expected);
        return Err(ProtocolError::NameMismatch {
            expected: expected.to_string(),
            found: name.to_string(),
        });
    }

    let major = caps[2]
        .parse::<u32>()
        .map_err(|_| ProtocolError::BadListHeader(first.to_string()))?;
    let minor = caps[3]
        .parse::<u32>()
        .map_err(|_| ProtocolError::BadListHeader(first.to_string()))?;
    let kind = if caps.get(4).is_some() {
        UpdateKind::Delta
    } else {
        UpdateKind::Full
    };

    let mut update = ListUpdate {
        name: name.to_string(),
        version: ListVersion::new(major, minor),
        kind,
        adds: Vec::new(),
        removes: Vec::new(),
        skipped: 0,
    };

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        let entry = match line.strip_prefix('+') {
            Some(digest) => Some((true, digest)),
            None => line.strip_prefix('-').map(|digest| (false, digest)),
        };

        match entry {
            Some((true, digest)) if is_hex(digest) => update.adds.push(digest.to_string()),
            Some((false, digest)) if is_hex(digest) => update.removes.push(digest.to_string()),
            _ => {
                debug!("String {} not matched", line);
                update.skipped += 1;
            }
        }
    }

    Ok(update)
}

fn is_hex(digest: &str) -> bool {
    !digest.is_empty() && digest.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(status: u16, content_length: Option<usize>, chunked: bool) -> ResponseHead {
        ResponseHead {
            status,
            content_length,
            chunked,
        }
    }

    #[test]
    fn test_build_request_is_wire_exact() {
        let config = UpdateConfig {
            api_key: "KEY".into(),
            ..Default::default()
        };
        let mut list = BlockList::new("goog-black-hash");
        assert_eq!(
            build_request(&config, &list),
            "GET /safebrowsing/update?client=api&apikey=KEY&version=goog-black-hash:1:-1 HTTP/1.1\r\n\
             Host: sb.google.com\r\n\r\n"
        );

        list.apply_full_snapshot(ListVersion::new(1, 17), Vec::new());
        assert!(build_request(&config, &list).contains("&version=goog-black-hash:1:17 HTTP/1.1\r\n"));
    }

    #[test]
    fn test_build_request_host_carries_custom_port() {
        let config = UpdateConfig {
            host: "lists.example.net".into(),
            port: 8080,
            ..Default::default()
        };
        let request = build_request(&config, &BlockList::new("black"));
        assert!(request.ends_with("\r\nHost: lists.example.net:8080\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_head_with_content_length() {
        let mut input: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 42\r\nX-Other: y\r\n\r\nbody";
        let parsed = read_response_head(&mut input).await.unwrap();
        assert_eq!(parsed, head(200, Some(42), false));
        assert_eq!(input, b"body");
    }

    #[tokio::test]
    async fn test_head_with_chunked_and_bare_newlines() {
        let mut input: &[u8] = b"HTTP/1.0 200 OK\ntransfer-encoding: Chunked\n\n";
        let parsed = read_response_head(&mut input).await.unwrap();
        assert_eq!(parsed, head(200, None, true));
    }

    #[tokio::test]
    async fn test_head_rejects_non_200() {
        let mut input: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\r\n";
        let err = read_response_head(&mut input).await.unwrap_err();
        assert!(matches!(err, UpdateError::Protocol(ProtocolError::HttpStatus(503))));
    }

    #[tokio::test]
    async fn test_head_rejects_garbage_status_line() {
        let mut input: &[u8] = b"SSH-2.0-OpenSSH\r\n\r\n";
        let err = read_response_head(&mut input).await.unwrap_err();
        assert!(matches!(err, UpdateError::Protocol(ProtocolError::BadStatusLine(_))));
    }

    #[tokio::test]
    async fn test_head_rejects_bad_content_length() {
        let mut input: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: lots\r\n\r\n";
        let err = read_response_head(&mut input).await.unwrap_err();
        assert!(matches!(err, UpdateError::Protocol(ProtocolError::BadHeader(_))));
    }

    #[tokio::test]
    async fn test_head_truncated() {
        let mut input: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n";
        let err = read_response_head(&mut input).await.unwrap_err();
        assert!(matches!(err, UpdateError::Protocol(ProtocolError::TruncatedHead)));
    }

    #[tokio::test]
    async fn test_decode_chunked() {
        let mut input: &[u8] = b"4\r\ntest\r\n0\r\n\r\n";
        assert_eq!(decode_chunked(&mut input).await.unwrap(), b"test");

        let mut input: &[u8] = b"6;ext=1\r\n[black\r\nC\r\n 1.5 update]\r\n0\r\n\r\n";
        assert_eq!(decode_chunked(&mut input).await.unwrap(), b"[black 1.5 update]");
    }

    #[tokio::test]
    async fn test_decode_chunked_rejects_bad_size() {
        let mut input: &[u8] = b"zz\r\ntest\r\n0\r\n\r\n";
        let err = decode_chunked(&mut input).await.unwrap_err();
        assert!(matches!(err, UpdateError::Protocol(ProtocolError::BadChunkSize(_))));
    }

    #[tokio::test]
    async fn test_decode_chunked_truncated_data() {
        let mut input: &[u8] = b"10\r\nshort";
        let err = decode_chunked(&mut input).await.unwrap_err();
        assert!(matches!(err, UpdateError::Io(_)));
    }

    #[tokio::test]
    async fn test_decode_chunked_rejects_oversized_chunk() {
        let mut input: &[u8] = b"4\r\ntest\r\nffffffffffffffff\r\nxx\r\n0\r\n\r\n";
        let err = decode_chunked(&mut input).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Protocol(ProtocolError::BodyTooLarge(MAX_BODY_BYTES))
        ));

        let mut input: &[u8] = b"4\r\ntest\r\n5\r\nmore!\r\n0\r\n\r\n";
        let err = decode_chunked_within(&mut input, 8).await.unwrap_err();
        assert!(matches!(err, UpdateError::Protocol(ProtocolError::BodyTooLarge(8))));
    }

    #[tokio::test]
    async fn test_decode_chunked_requires_last_chunk() {
        let mut input: &[u8] = b"4\r\ntest\r\n";
        let err = decode_chunked(&mut input).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Protocol(ProtocolError::TruncatedBody { received: 4 })
        ));
    }

    #[tokio::test]
    async fn test_read_body_rejects_short_content_length() {
        let mut input: &[u8] = b"abc";
        let err = read_body(&mut input, &head(200, Some(10), false)).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Protocol(ProtocolError::TruncatedBody { received: 3 })
        ));
    }

    #[tokio::test]
    async fn test_read_body_without_length_is_bounded() {
        let mut input: &[u8] = b"0123456789";
        let err = read_body_within(&mut input, &head(200, None, false), 8)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Protocol(ProtocolError::BodyTooLarge(8))));

        let mut input: &[u8] = b"01234567";
        assert_eq!(
            read_body_within(&mut input, &head(200, None, false), 8).await.unwrap(),
            Some(b"01234567".to_vec())
        );
    }

    #[tokio::test]
    async fn test_read_body_modes() {
        let mut input: &[u8] = b"ignored";
        assert_eq!(read_body(&mut input, &head(200, Some(0), false)).await.unwrap(), None);

        let mut input: &[u8] = b"abcdefgh";
        assert_eq!(
            read_body(&mut input, &head(200, Some(3), false)).await.unwrap(),
            Some(b"abc".to_vec())
        );

        let mut input: &[u8] = b"to the end";
        assert_eq!(
            read_body(&mut input, &head(200, None, false)).await.unwrap(),
            Some(b"to the end".to_vec())
        );

        let mut input: &[u8] = b"3\r\nabc\r\n0\r\n\r\n";
        assert_eq!(
            read_body(&mut input, &head(200, Some(0), true)).await.unwrap(),
            Some(b"abc".to_vec())
        );
    }

    #[test]
    fn test_parse_delta() {
        let update = parse_update("[black 1.5 update]\n+aaaa\n-bbbb\n\n", "black").unwrap();
        assert_eq!(update.kind, UpdateKind::Delta);
        assert_eq!(update.version, ListVersion::new(1, 5));
        assert_eq!(update.adds, vec!["aaaa"]);
        assert_eq!(update.removes, vec!["bbbb"]);
        assert_eq!(update.skipped, 0);
    }

    #[test]
    fn test_parse_full_with_crlf() {
        let update = parse_update("[black 2.0]\r\n+cccc\r\n\r\n+dddd\r\n", "black").unwrap();
        assert_eq!(update.kind, UpdateKind::Full);
        assert_eq!(update.version, ListVersion::new(2, 0));
        // the blank line ends the list
        assert_eq!(update.adds, vec!["cccc"]);
    }

    #[test]
    fn test_parse_skips_unknown_lines() {
        let update = parse_update(
            "[goog-malware-hash 1.12 update]\n+00aa\n#comment\n+\n+not-hex\n-11bb",
            "goog-malware-hash",
        )
        .unwrap();
        assert_eq!(update.adds, vec!["00aa"]);
        assert_eq!(update.removes, vec!["11bb"]);
        assert_eq!(update.skipped, 3);
    }

    #[test]
    fn test_parse_rejects_wrong_name() {
        let err = parse_update("[malware 1.5 update]\n+aaaa\n", "black").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::NameMismatch {
                expected: "black".into(),
                found: "malware".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_header() {
        for body in [
            "",
            "black 1.5\n+aaaa",
            "[black one.five]\n",
            "<html>error</html>",
            "junk [black 1.5]\n+aaaa",
        ] {
            assert!(matches!(
                parse_update(body, "black"),
                Err(ProtocolError::BadListHeader(_))
            ));
        }
    }

    #[test]
    fn test_delta_applies_against_previous_version() {
        let mut list = BlockList::new("black");
        list.apply_full_snapshot(ListVersion::new(1, 4), vec!["bbbb".to_string()]);

        let update = parse_update("[black 1.5 update]\n+aaaa\n-bbbb\n\n", "black").unwrap();
        list.apply(update).unwrap();

        assert_eq!(list.version(), Some(ListVersion::new(1, 5)));
        assert!(list.contains("aaaa"));
        assert!(!list.contains("bbbb"));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_full_snapshot_discards_previous_content() {
        let mut list = BlockList::new("black");
        list.apply_full_snapshot(
            ListVersion::new(1, 9),
            vec!["aaaa".to_string(), "bbbb".to_string()],
        );

        let update = parse_update("[black 2.0]\n+cccc\n\n", "black").unwrap();
        list.apply(update).unwrap();

        assert_eq!(list.version(), Some(ListVersion::new(2, 0)));
        assert!(list.contains("cccc"));
        assert_eq!(list.len(), 1);
    }
}
