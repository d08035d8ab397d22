//! Line-delimited JSON codec
//!
//! Each message is one UTF-8 JSON object terminated by `\n`:
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"tools/list"}\n
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

/// Upper bound on a single line; anything larger is not a sane response
const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// Read one line from the stream
///
/// Bytes accumulate in `buf`, which the caller keeps across calls: if this
/// future is dropped mid-line (a timeout), the partial line is still there
/// for the next read. Returns `None` at end of stream. The terminator
/// (`\n` or `\r\n`) is stripped.
pub async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> Result<Option<String>, Error> {
    read_line_capped(reader, buf, MAX_LINE_BYTES).await
}

async fn read_line_capped<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<Option<String>, Error> {
    // Stop pulling bytes one past the cap so an endless line can't grow buf
    let budget = (max_bytes + 1).saturating_sub(buf.len()) as u64;
    (&mut *reader).take(budget).read_until(b'\n', buf).await?;

    if buf.is_empty() {
        return Ok(None);
    }

    if buf.len() > max_bytes {
        buf.clear();
        return Err(Error::Protocol(format!("Line exceeds {} bytes", max_bytes)));
    }

    let mut bytes = std::mem::take(buf);
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
    }

    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| Error::Protocol(format!("Invalid UTF-8: {}", e)))
}

/// Write one message as a single line and flush
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<(), Error> {
    if json.contains('\n') {
        return Err(Error::Internal(
            "Refusing to write a message containing a newline".to_string(),
        ));
    }

    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_lines_in_order() {
        let data = b"{\"id\":1}\r\n{\"id\":2}\n";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));
        let mut buf = Vec::new();

        assert_eq!(
            read_line(&mut reader, &mut buf).await.unwrap().as_deref(),
            Some("{\"id\":1}")
        );
        assert_eq!(
            read_line(&mut reader, &mut buf).await.unwrap().as_deref(),
            Some("{\"id\":2}")
        );
        assert_eq!(read_line(&mut reader, &mut buf).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_partial_data_is_kept_in_buffer() {
        let mut reader = BufReader::new(Cursor::new(b"rest\"}\n".to_vec()));
        let mut buf = b"{\"a\":\"".to_vec();

        let line = read_line(&mut reader, &mut buf).await.unwrap();
        assert_eq!(line.as_deref(), Some("{\"a\":\"rest\"}"));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_final_line_without_terminator() {
        let mut reader = BufReader::new(Cursor::new(b"{}".to_vec()));
        let mut buf = Vec::new();
        assert_eq!(
            read_line(&mut reader, &mut buf).await.unwrap().as_deref(),
            Some("{}")
        );
    }

    #[tokio::test]
    async fn test_line_cap_bounds_endless_input() {
        let mut reader = BufReader::new(tokio::io::repeat(b'a'));
        let mut buf = Vec::new();

        let err = read_line_capped(&mut reader, &mut buf, 1024).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_line_at_cap_is_accepted() {
        let mut reader = BufReader::new(Cursor::new(b"abcd\nabcde\n".to_vec()));
        let mut buf = Vec::new();

        // the cap counts the terminator
        let err = read_line_capped(&mut reader, &mut buf, 4).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        let mut reader = BufReader::new(Cursor::new(b"abc\n".to_vec()));
        assert_eq!(
            read_line_capped(&mut reader, &mut buf, 4).await.unwrap().as_deref(),
            Some("abc")
        );
    }

    #[tokio::test]
    async fn test_write_line() {
        let mut output = Vec::new();
        write_line(&mut output, "{\"test\":true}").await.unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "{\"test\":true}\n");

        let mut output = Vec::new();
        assert!(write_line(&mut output, "{\n}").await.is_err());
    }
}
