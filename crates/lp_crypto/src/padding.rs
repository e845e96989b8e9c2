//! Plaintext padding applied before sealing.
//!
//! Every suite-1 plaintext is padded to a fixed bucket so that stored and
//! relayed ciphertext only leaks the bucket, never the exact length. The
//! bucket list is also what makes ciphertext length checkable without a key.
//!
//! Format: [original_len: u32 LE] [plaintext] [random padding]

use rand::RngCore;

use crate::error::CryptoError;

/// Allowed padded sizes (bytes).
pub const BUCKET_SIZES: [usize; 5] = [256, 512, 1024, 4096, 16384];

const LEN_PREFIX: usize = 4;

/// Largest plaintext that fits the largest bucket.
pub const MAX_PLAINTEXT_LEN: usize = BUCKET_SIZES[BUCKET_SIZES.len() - 1] - LEN_PREFIX;

/// Pad `plaintext` to the smallest bucket that holds it plus the length prefix.
pub fn pad_to_bucket(plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let needed = LEN_PREFIX + plaintext.len();
    let bucket = BUCKET_SIZES
        .iter()
        .copied()
        .find(|&b| b >= needed)
        .ok_or(CryptoError::PlaintextTooLarge {
            len: plaintext.len(),
            max: MAX_PLAINTEXT_LEN,
        })?;

    let mut out = Vec::with_capacity(bucket);
    out.extend_from_slice(&(plaintext.len() as u32).to_le_bytes());
    out.extend_from_slice(plaintext);
    // Random fill, not zeros: avoids compression leaks.
    let mut padding = vec![0u8; bucket - out.len()];
    rand::rngs::OsRng
        .try_fill_bytes(&mut padding)
        .map_err(|e| CryptoError::EntropyUnavailable(e.to_string()))?;
    out.extend_from_slice(&padding);
    Ok(out)
}

/// Strip padding after opening. `None` when the length prefix is inconsistent.
pub fn unpad(padded: &[u8]) -> Option<&[u8]> {
    if padded.len() < LEN_PREFIX {
        return None;
    }
    let len = u32::from_le_bytes([padded[0], padded[1], padded[2], padded[3]]) as usize;
    padded.get(LEN_PREFIX..LEN_PREFIX + len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_lands_in_smallest_bucket() {
        let padded = pad_to_bucket(b"Hello, World!").unwrap();
        assert_eq!(padded.len(), 256);
        assert_eq!(unpad(&padded).unwrap(), b"Hello, World!");
    }

    #[test]
    fn large_message_picks_next_bucket() {
        let msg = vec![0x42u8; 5000];
        let padded = pad_to_bucket(&msg).unwrap();
        assert_eq!(padded.len(), 16384);
        assert_eq!(unpad(&padded).unwrap(), &msg[..]);
    }

    #[test]
    fn empty_plaintext_is_padded_too() {
        let padded = pad_to_bucket(b"").unwrap();
        assert_eq!(padded.len(), 256);
        assert_eq!(unpad(&padded).unwrap(), b"");
    }

    #[test]
    fn oversize_plaintext_is_rejected() {
        let msg = vec![0u8; MAX_PLAINTEXT_LEN + 1];
        assert!(matches!(
            pad_to_bucket(&msg),
            Err(CryptoError::PlaintextTooLarge { .. })
        ));
        assert!(pad_to_bucket(&vec![0u8; MAX_PLAINTEXT_LEN]).is_ok());
    }

    #[test]
    fn lying_length_prefix_is_caught() {
        let mut padded = pad_to_bucket(b"abc").unwrap();
        padded[..4].copy_from_slice(&(10_000u32).to_le_bytes());
        assert!(unpad(&padded).is_none());
    }
}
