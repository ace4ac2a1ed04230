//! Headerless buffers.

use crate::error::{Result, TidepoolError};
use crate::types::RecordKind;

/// Append a NUL terminator, rejecting payloads that already contain one.
///
/// Modules that read their input as a C string stop at the first NUL, so an
/// interior NUL would silently truncate the payload.
pub fn nul_terminated(payload: &[u8]) -> Result<Vec<u8>> {
    if let Some(pos) = payload.iter().position(|b| *b == 0) {
        return Err(TidepoolError::malformed(
            RecordKind::RawBuffer,
            format!("interior NUL at byte {pos}"),
        ));
    }
    let mut buf = Vec::with_capacity(payload.len() + 1);
    buf.extend_from_slice(payload);
    buf.push(0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_terminator() {
        assert_eq!(nul_terminated(b"{}").unwrap(), b"{}\0".to_vec());
        assert_eq!(nul_terminated(b"").unwrap(), vec![0]);
    }

    #[test]
    fn rejects_interior_nul() {
        assert!(nul_terminated(b"a\0b").is_err());
    }
}
