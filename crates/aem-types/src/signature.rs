use sha2::{Digest, Sha512};

const BLOCK_LEN: usize = 128;

/// HMAC-SHA-512 over `message`, hex encoded (RFC 2104).
///
/// Keys longer than the SHA-512 block are hashed first; shorter keys are
/// zero padded.
pub fn hmac_sha512_hex(key: &[u8], message: &[u8]) -> String {
    let mut block = [0u8; BLOCK_LEN];
    if key.len() > BLOCK_LEN {
        let digest = Sha512::digest(key);
        block[..digest.len()].copy_from_slice(&digest);
    } else {
        block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha512::new();
    inner.update(block.map(|b| b ^ 0x36));
    inner.update(message);
    let inner_digest = inner.finalize();

    let mut outer = Sha512::new();
    outer.update(block.map(|b| b ^ 0x5c));
    outer.update(inner_digest);
    hex::encode(outer.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231 test case 2.
    #[test]
    fn matches_rfc_4231_vector() {
        assert_eq!(
            hmac_sha512_hex(b"Jefe", b"what do ya want for nothing?"),
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea250554\
             9758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn long_keys_are_hashed_before_use() {
        let long_key = [0xaa_u8; 131];
        let hashed: Vec<u8> = Sha512::digest(long_key).to_vec();
        assert_eq!(
            hmac_sha512_hex(&long_key, b"message"),
            hmac_sha512_hex(&hashed, b"message")
        );
    }
}
