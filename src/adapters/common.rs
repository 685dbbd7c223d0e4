//! Cross-backend helpers shared by every adapter: the canonical BLOB wire
//! encoding and pagination offset arithmetic used by `Stream`.

/// Maximum size in bytes for BLOB data included as a base64 preview in a
/// fetched row. Larger blobs are truncated; callers that need the full
/// value use a dedicated blob-read path, which lives above this core.
pub const MAX_BLOB_PREVIEW_SIZE: usize = 4096;

/// Encodes a blob byte slice into the canonical wire format used by every
/// adapter's row map: `"BLOB:<total_size_bytes>:<mime_type>:<base64_data>"`.
pub fn encode_blob(data: &[u8]) -> String {
    let total_size = data.len();
    let preview = if total_size > MAX_BLOB_PREVIEW_SIZE {
        &data[..MAX_BLOB_PREVIEW_SIZE]
    } else {
        data
    };

    let mime_type = infer::get(preview)
        .map(|k| k.mime_type())
        .unwrap_or("application/octet-stream");

    let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, preview);

    format!("BLOB:{}:{}:{}", total_size, mime_type, b64)
}

/// Decodes the canonical blob wire format back to raw bytes, or `None` if
/// the string doesn't match it (plain values pass through untouched on the
/// write path).
pub fn decode_blob_wire_format(value: &str) -> Option<Vec<u8>> {
    let rest = value.strip_prefix("BLOB:")?;
    let after_size = rest.splitn(2, ':').nth(1)?;
    let base64_data = after_size.splitn(2, ':').nth(1)?;
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, base64_data).ok()
}

/// Calculates a zero-based row offset for `page`-based pagination (1-indexed
/// pages), used by `Stream`'s offset-cursor backends.
pub fn calculate_offset(page: u32, page_size: u32) -> u32 {
    page.saturating_sub(1).saturating_mul(page_size)
}

/// Encodes an offset as an opaque `Stream` cursor token.
pub fn encode_cursor(offset: u64) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, offset.to_string())
}

/// Decodes a `Stream` cursor token back to an offset. A missing or malformed
/// cursor is treated as the start of the result set (offset 0) — callers
/// pass `nextCursor` back unchanged, but a fresh `Stream` call with no
/// cursor must also work.
pub fn decode_cursor(cursor: Option<&str>) -> u64 {
    cursor
        .and_then(|c| base64::Engine::decode(&base64::engine::general_purpose::STANDARD, c).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trips() {
        let original = b"hello blob";
        let encoded = encode_blob(original);
        let decoded = decode_blob_wire_format(&encoded).expect("valid wire format");
        assert_eq!(decoded, original);
    }

    #[test]
    fn non_wire_format_string_decodes_to_none() {
        assert!(decode_blob_wire_format("plain string").is_none());
    }

    #[test]
    fn cursor_round_trips() {
        let cursor = encode_cursor(250);
        assert_eq!(decode_cursor(Some(&cursor)), 250);
    }

    #[test]
    fn missing_cursor_is_offset_zero() {
        assert_eq!(decode_cursor(None), 0);
    }

    #[test]
    fn calculate_offset_is_zero_indexed() {
        assert_eq!(calculate_offset(1, 100), 0);
        assert_eq!(calculate_offset(3, 50), 100);
    }
}
