//! Local prompt parsing.
//!
//! Canned prompts ("PIN is not ready" and friends) ship as a contiguous
//! blob of concatenated records: a 16-byte fixed header carrying a
//! big-endian `u16` payload size at offset 2, followed by that many bytes
//! of compressed audio. Payloads are always 16 kHz mono. Everything else
//! in the header is opaque to the core.

use tracing::warn;

use crate::audio::AudioFrame;

/// Fixed record header length.
const HEADER_LEN: usize = 16;

/// Byte offset of the big-endian payload size within the header.
const PAYLOAD_SIZE_OFFSET: usize = 2;

/// Split a prompt blob into its compressed payloads, in order.
///
/// Parsing stops at the end of the buffer. A truncated trailing record
/// (short header, or a declared payload overrunning the buffer) is
/// dropped with a warning; the valid records before it are kept.
pub fn parse(data: &[u8]) -> Vec<AudioFrame> {
    let mut frames = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        if rest.len() < HEADER_LEN {
            warn!(remaining = rest.len(), "dropping truncated prompt header");
            break;
        }
        let payload_size = u16::from_be_bytes([
            rest[PAYLOAD_SIZE_OFFSET],
            rest[PAYLOAD_SIZE_OFFSET + 1],
        ]) as usize;
        let body = &rest[HEADER_LEN..];
        if body.len() < payload_size {
            warn!(
                needed = payload_size,
                remaining = body.len(),
                "dropping truncated prompt record"
            );
            break;
        }
        frames.push(body[..payload_size].to_vec());
        rest = &body[payload_size..];
    }

    frames
}

#[cfg(test)]
pub(crate) fn build_record(payload: &[u8]) -> Vec<u8> {
    let mut record = vec![0u8; HEADER_LEN];
    record[PAYLOAD_SIZE_OFFSET..PAYLOAD_SIZE_OFFSET + 2]
        .copy_from_slice(&(payload.len() as u16).to_be_bytes());
    record.extend_from_slice(payload);
    record
}
