//! Chunked transfer-coding
//!
//! Shared by the request parser and the upstream response reader.

#[derive(Debug, PartialEq, Eq)]
pub enum ChunkError {
    /// More bytes are needed to finish the body.
    Incomplete,
    /// The framing is broken.
    Invalid(String),
}

/// Decode a chunked body from the front of `buf`.
///
/// Returns the payload and the number of bytes the encoded body occupied,
/// trailer section included. Trailers are discarded.
pub fn decode_chunked(buf: &[u8]) -> Result<(Vec<u8>, usize), ChunkError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line_end = find_crlf(&buf[pos..]).ok_or(ChunkError::Incomplete)?;

        let size_line = std::str::from_utf8(&buf[pos..pos + line_end])
            .map_err(|_| ChunkError::Invalid("chunk size is not text".to_string()))?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| ChunkError::Invalid(format!("bad chunk size {:?}", size_hex)))?;

        pos += line_end + 2;

        if size == 0 {
            return skip_trailers(buf, pos).map(|end| (body, end));
        }

        let framed = size
            .checked_add(2)
            .ok_or_else(|| ChunkError::Invalid(format!("chunk size {:?} too large", size_hex)))?;

        if buf.len() - pos < framed {
            return Err(ChunkError::Incomplete);
        }

        if &buf[pos + size..pos + framed] != b"\r\n" {
            return Err(ChunkError::Invalid("chunk data not followed by CRLF".to_string()));
        }

        body.extend_from_slice(&buf[pos..pos + size]);
        pos += framed;
    }
}

/// Skip trailer lines up to and including the empty line that ends them.
fn skip_trailers(buf: &[u8], mut pos: usize) -> Result<usize, ChunkError> {
    loop {
        let line_end = find_crlf(&buf[pos..]).ok_or(ChunkError::Incomplete)?;
        pos += line_end + 2;
        if line_end == 0 {
            return Ok(pos);
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_with_extensions_and_trailers() {
        let raw = b"5;name=value\r\nhello\r\n6\r\n world\r\n0\r\nX-Checksum: 1\r\n\r\nGET";
        let (body, used) = decode_chunked(raw).unwrap();

        assert_eq!(body, b"hello world".to_vec());
        assert_eq!(&raw[used..], b"GET");
    }

    #[test]
    fn oversized_chunk_size_is_invalid() {
        let raw = b"ffffffffffffffff\r\nabc\r\n0\r\n\r\n";
        assert!(matches!(decode_chunked(raw), Err(ChunkError::Invalid(_))));
    }

    #[test]
    fn missing_crlf_after_chunk_data_is_invalid() {
        let raw = b"3\r\nabcXY0\r\n\r\n";
        assert!(matches!(decode_chunked(raw), Err(ChunkError::Invalid(_))));
    }

    #[test]
    fn partial_input_is_incomplete() {
        assert_eq!(decode_chunked(b"a\r\nshort"), Err(ChunkError::Incomplete));
        assert_eq!(decode_chunked(b"3\r\nabc\r\n0\r\n"), Err(ChunkError::Incomplete));
    }
}
