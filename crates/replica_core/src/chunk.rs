//! Payload chunking.
//!
//! A payload of at least `chunk_size` bytes is stored as ordered pieces:
//! piece 0 stays inside the entity's own record, piece `n >= 1` lives in a
//! sibling record keyed `<parentKey>_chunk_<n>`.

use crate::key::EntityKey;

/// Default chunk size (10 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

const CHUNK_INFIX: &str = "_chunk_";

/// Splits a payload into the pieces that will be stored.
///
/// Payloads shorter than `chunk_size` come back as a single piece, as does
/// the empty payload.
#[must_use]
pub fn split_payload(payload: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    let chunk_size = chunk_size.max(1);
    if payload.len() < chunk_size {
        return vec![payload];
    }
    payload.chunks(chunk_size).collect()
}

/// Concatenates pieces in ascending index order.
#[must_use]
pub fn reassemble(mut pieces: Vec<(u32, Vec<u8>)>) -> Vec<u8> {
    pieces.sort_by_key(|(index, _)| *index);
    let total = pieces.iter().map(|(_, data)| data.len()).sum();
    let mut out = Vec::with_capacity(total);
    for (_, data) in pieces {
        out.extend_from_slice(&data);
    }
    out
}

/// Returns the key of piece `index` (>= 1) of `parent`'s payload.
#[must_use]
pub fn chunk_key(parent: &EntityKey, index: u32) -> EntityKey {
    EntityKey::Text(format!("{parent}{CHUNK_INFIX}{index}"))
}

/// Returns the prefix shared by every chunk key of `parent`.
pub(crate) fn chunk_prefix(parent: &EntityKey) -> String {
    format!("{parent}{CHUNK_INFIX}")
}

/// Splits a chunk key into its parent's rendered key and chunk index.
///
/// Returns `None` for keys that are not chunk keys.
#[must_use]
pub fn parse_chunk_key(key: &EntityKey) -> Option<(&str, u32)> {
    let text = key.as_text()?;
    let split = text.rfind(CHUNK_INFIX)?;
    let digits = &text[split + CHUNK_INFIX.len()..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index = digits.parse().ok()?;
    Some((&text[..split], index))
}
