//! WebSocket frame masking utilities
//!
//! Client→server payloads are XOR-obfuscated with a 4-byte key cycling
//! every 4 bytes (RFC 6455 §5.3). The operation is its own inverse, so the
//! same routine masks and unmasks.

/// Apply an XOR mask to a payload in place
///
/// `payload[i] ^= key[i % 4]` for every byte.
#[inline]
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Generate a random mask for client frames
#[inline]
pub fn generate_mask() -> [u8; 4] {
    fastrand::u32(..).to_ne_bytes()
}
