//! The header protocol: the two fixed ciphertext pages at the start of every
//! file this driver produces. Page 0 is a plaintext configuration record;
//! page 1 is an encrypted test phrase used to detect a wrong key.

use crate::cipher::CipherAdapter;
use crate::config::{CipherId, Configuration, ModeId, TEST_PHRASE};
use crate::error::{Result, VfdError};

/// Renders page 0's eight-field text record, zero-padded to
/// `ciphertext_page_size` bytes (the actual destination buffer size, not
/// some other configuration-record constant — see the open question in
/// spec.md §9).
pub fn encode_page0(cfg: &Configuration) -> Vec<u8> {
    let text = format!(
        "plaintext_page_size: {}\n\
         ciphertext_page_size: {}\n\
         encryption_buffer_size: {}\n\
         cipher: {}\n\
         cipher_block_size: {}\n\
         key_size: {}\n\
         iv_size: {}\n\
         mode: {}\n",
        cfg.plaintext_page_size,
        cfg.ciphertext_page_size,
        cfg.encryption_buffer_size,
        cfg.cipher_id as u32,
        cfg.cipher_block_size,
        cfg.key_size,
        cfg.iv_size,
        cfg.mode_id as u32,
    );
    let mut page = vec![0u8; cfg.ciphertext_page_size as usize];
    let bytes = text.as_bytes();
    let n = bytes.len().min(page.len());
    page[..n].copy_from_slice(&bytes[..n]);
    page
}

struct ParsedFields {
    plaintext_page_size: u64,
    ciphertext_page_size: u64,
    encryption_buffer_size: u64,
    cipher: u64,
    cipher_block_size: u64,
    key_size: u64,
    iv_size: u64,
    mode: u64,
}

const FIELD_ORDER: [&str; 8] = [
    "plaintext_page_size",
    "ciphertext_page_size",
    "encryption_buffer_size",
    "cipher",
    "cipher_block_size",
    "key_size",
    "iv_size",
    "mode",
];

fn parse_page0(raw: &[u8]) -> Result<ParsedFields> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| VfdError::CorruptHeader("page 0 is not valid UTF-8"))?;

    let mut values = [None; 8];
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let Some(idx) = FIELD_ORDER.iter().position(|f| *f == name) else {
            continue;
        };
        let value: u64 = value
            .trim()
            .parse()
            .map_err(|_| VfdError::CorruptHeader("non-numeric field in page 0"))?;
        values[idx] = Some(value);
    }

    let mut out = [0u64; 8];
    for (slot, value) in out.iter_mut().zip(values.iter()) {
        *slot = value.ok_or(VfdError::CorruptHeader("missing field in page 0"))?;
    }

    Ok(ParsedFields {
        plaintext_page_size: out[0],
        ciphertext_page_size: out[1],
        encryption_buffer_size: out[2],
        cipher: out[3],
        cipher_block_size: out[4],
        key_size: out[5],
        iv_size: out[6],
        mode: out[7],
    })
}

/// Parses page 0 and compares every field, strictly, against `cfg`.
pub fn verify_page0(raw: &[u8], cfg: &Configuration) -> Result<()> {
    let parsed = parse_page0(raw)?;

    macro_rules! check {
        ($field:ident, $name:literal, $supplied:expr) => {
            if parsed.$field != $supplied as u64 {
                return Err(VfdError::ConfigMismatch {
                    field: $name,
                    stored: parsed.$field,
                    supplied: $supplied as u64,
                });
            }
        };
    }

    check!(plaintext_page_size, "plaintext_page_size", cfg.plaintext_page_size);
    check!(ciphertext_page_size, "ciphertext_page_size", cfg.ciphertext_page_size);
    check!(encryption_buffer_size, "encryption_buffer_size", cfg.encryption_buffer_size);
    check!(cipher, "cipher", cfg.cipher_id as u32);
    check!(cipher_block_size, "cipher_block_size", cfg.cipher_block_size);
    check!(key_size, "key_size", cfg.key_size);
    check!(iv_size, "iv_size", cfg.iv_size);
    check!(mode, "mode", cfg.mode_id as u32);

    if CipherId::from_u32(parsed.cipher as u32).is_none() {
        return Err(VfdError::CorruptHeader("unknown cipher id in page 0"));
    }
    if ModeId::from_u32(parsed.mode as u32).is_none() {
        return Err(VfdError::CorruptHeader("unknown mode id in page 0"));
    }

    Ok(())
}

/// Builds the encrypted page 1: the literal test phrase, zero-padded to
/// `plaintext_page_size`, encrypted with a fresh IV.
pub fn encode_page1(cfg: &Configuration, adapter: &CipherAdapter) -> Result<Vec<u8>> {
    let mut plaintext = vec![0u8; cfg.plaintext_page_size as usize];
    plaintext[..TEST_PHRASE.len()].copy_from_slice(TEST_PHRASE);

    let mut page = vec![0u8; cfg.ciphertext_page_size as usize];
    let used = cfg.iv_size as usize + cfg.plaintext_page_size as usize;
    adapter.encrypt_page(&cfg.key, &plaintext, &mut page[..used])?;
    Ok(page)
}

/// Decrypts page 1 and checks the test phrase byte-for-byte.
pub fn verify_page1(raw: &[u8], cfg: &Configuration, adapter: &CipherAdapter) -> Result<()> {
    let used = cfg.iv_size as usize + cfg.plaintext_page_size as usize;
    if raw.len() < used {
        return Err(VfdError::CorruptHeader("page 1 truncated"));
    }
    let mut plaintext = vec![0u8; cfg.plaintext_page_size as usize];
    adapter.decrypt_page(&cfg.key, &raw[..used], &mut plaintext)?;

    if &plaintext[..TEST_PHRASE.len()] != TEST_PHRASE {
        return Err(VfdError::KeyVerificationFailed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Configuration {
        Configuration::with_defaults((0u8..32).collect()).unwrap()
    }

    #[test]
    fn page0_round_trips() {
        let cfg = cfg();
        let encoded = encode_page0(&cfg);
        assert_eq!(encoded.len(), cfg.ciphertext_page_size as usize);
        verify_page0(&encoded, &cfg).unwrap();
    }

    #[test]
    fn page0_mismatch_is_detected() {
        let cfg = cfg();
        let mut other = cfg.clone();
        other.plaintext_page_size = 8192;
        other.ciphertext_page_size = 8208;
        let encoded = encode_page0(&cfg);
        assert!(matches!(
            verify_page0(&encoded, &other),
            Err(VfdError::ConfigMismatch { .. })
        ));
    }

    #[test]
    fn page0_missing_field_is_corrupt() {
        let cfg = cfg();
        let mut raw = vec![0u8; cfg.ciphertext_page_size as usize];
        raw[..5].copy_from_slice(b"mode:");
        assert!(matches!(verify_page0(&raw, &cfg), Err(VfdError::CorruptHeader(_))));
    }

    #[test]
    fn page1_round_trips() {
        let cfg = cfg();
        let adapter = CipherAdapter::new(&cfg);
        let page = encode_page1(&cfg, &adapter).unwrap();
        verify_page1(&page, &cfg, &adapter).unwrap();
    }

    #[test]
    fn page1_wrong_key_fails_verification() {
        let cfg = cfg();
        let other = Configuration::with_defaults(vec![0xFF; 32]).unwrap();
        let adapter = CipherAdapter::new(&cfg);
        let other_adapter = CipherAdapter::new(&other);
        let page = encode_page1(&cfg, &adapter).unwrap();
        assert!(matches!(
            verify_page1(&page, &other, &other_adapter),
            Err(VfdError::KeyVerificationFailed)
        ));
    }
}
