use zeroize::Zeroizing;

use crate::error::{Result, VfdError};

/// Magic value stamped into every header page 0 this crate writes.
pub const MAGIC: u32 = 0x4856_4643; // "HVFC"
/// Current on-disk configuration-record version.
pub const VERSION: u32 = 1;
/// Largest key this crate will accept, per the data model.
pub const MAX_KEY_SIZE: usize = 1024;

/// The literal phrase encrypted into header page 1 and checked on open.
pub const TEST_PHRASE: &[u8] = b"Decryption works";

pub const DEFAULT_PLAINTEXT_PAGE_SIZE: u32 = 4096;
pub const DEFAULT_CIPHERTEXT_PAGE_SIZE: u32 = 4112;
pub const DEFAULT_ENCRYPTION_BUFFER_SIZE: u32 = 65792; // 16 ciphertext pages
pub const DEFAULT_CIPHER_BLOCK_SIZE: u32 = 16;
pub const DEFAULT_KEY_SIZE: u32 = 32;
pub const DEFAULT_IV_SIZE: u32 = 16;

/// Symmetric cipher selection. Numeric values match the on-disk encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CipherId {
    Aes256 = 0,
    Twofish = 1,
}

impl CipherId {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Aes256),
            1 => Some(Self::Twofish),
            _ => None,
        }
    }
}

/// Chaining-mode selection. CBC is the only supported mode; the variant
/// exists to leave room for more without changing the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ModeId {
    Cbc = 0,
}

impl ModeId {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Cbc),
            _ => None,
        }
    }
}

/// Immutable-after-open configuration for one encrypting VFD handle.
///
/// The key is held in a `Zeroizing` buffer so it is wiped the moment the
/// `Configuration` (and therefore any handle holding it by value) is dropped.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub plaintext_page_size: u32,
    pub ciphertext_page_size: u32,
    pub encryption_buffer_size: u32,
    pub cipher_id: CipherId,
    pub cipher_block_size: u32,
    pub key_size: u32,
    pub key: Zeroizing<Vec<u8>>,
    pub iv_size: u32,
    pub mode_id: ModeId,
    pub magic: u32,
    pub version: u32,
}

impl Configuration {
    /// Builds a configuration with the §6 defaults and the given key.
    pub fn with_defaults(key: Vec<u8>) -> Result<Self> {
        let cfg = Self {
            plaintext_page_size: DEFAULT_PLAINTEXT_PAGE_SIZE,
            ciphertext_page_size: DEFAULT_CIPHERTEXT_PAGE_SIZE,
            encryption_buffer_size: DEFAULT_ENCRYPTION_BUFFER_SIZE,
            cipher_id: CipherId::Aes256,
            cipher_block_size: DEFAULT_CIPHER_BLOCK_SIZE,
            key_size: key.len() as u32,
            key: Zeroizing::new(key),
            iv_size: DEFAULT_IV_SIZE,
            mode_id: ModeId::Cbc,
            magic: MAGIC,
            version: VERSION,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates the invariants of §3 eagerly; called once at open.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(VfdError::InvalidConfiguration("bad magic"));
        }
        if self.version != VERSION {
            return Err(VfdError::InvalidConfiguration("unsupported version"));
        }
        if self.key_size as usize > MAX_KEY_SIZE {
            return Err(VfdError::InvalidConfiguration("key_size exceeds MAX_KEY_SIZE"));
        }
        if self.key.len() != self.key_size as usize {
            return Err(VfdError::InvalidConfiguration("key length does not match key_size"));
        }
        if self.plaintext_page_size == 0 {
            return Err(VfdError::InvalidConfiguration("plaintext_page_size must be positive"));
        }
        if self.cipher_block_size != 0 && self.plaintext_page_size % self.cipher_block_size != 0 {
            return Err(VfdError::InvalidConfiguration(
                "plaintext_page_size must be a multiple of cipher_block_size",
            ));
        }
        if (self.ciphertext_page_size as u64)
            < self.plaintext_page_size as u64 + self.iv_size as u64
        {
            return Err(VfdError::InvalidConfiguration(
                "ciphertext_page_size must be >= plaintext_page_size + iv_size",
            ));
        }
        if self.cipher_block_size == 0
            || self.ciphertext_page_size % self.cipher_block_size != 0
        {
            return Err(VfdError::InvalidConfiguration(
                "ciphertext_page_size must be a multiple of cipher_block_size",
            ));
        }
        if self.encryption_buffer_size == 0 {
            return Err(VfdError::InvalidConfiguration("encryption_buffer_size must be positive"));
        }
        if self.encryption_buffer_size % self.ciphertext_page_size != 0 {
            return Err(VfdError::InvalidConfiguration(
                "encryption_buffer_size must be a multiple of ciphertext_page_size",
            ));
        }
        if self.num_ct_buf_pages() < 1 {
            return Err(VfdError::InvalidConfiguration("encryption buffer holds zero pages"));
        }
        match (self.cipher_id, self.mode_id) {
            (CipherId::Aes256, ModeId::Cbc) | (CipherId::Twofish, ModeId::Cbc) => {}
        }
        Ok(())
    }

    pub fn num_ct_buf_pages(&self) -> u32 {
        self.encryption_buffer_size / self.ciphertext_page_size
    }

    pub fn ciphertext_offset(&self) -> u64 {
        2 * self.ciphertext_page_size as u64
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::with_defaults(vec![0u8; DEFAULT_KEY_SIZE as usize])
            .expect("default configuration must validate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Configuration::default().validate().unwrap();
    }

    #[test]
    fn rejects_key_size_mismatch() {
        let mut cfg = Configuration::default();
        cfg.key_size = 16;
        assert!(matches!(
            cfg.validate(),
            Err(VfdError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_ciphertext_page_size_too_small_for_iv_and_plaintext() {
        let mut cfg = Configuration::default();
        cfg.ciphertext_page_size = cfg.plaintext_page_size;
        assert!(matches!(
            cfg.validate(),
            Err(VfdError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_encryption_buffer_not_a_multiple_of_ciphertext_page_size() {
        let mut cfg = Configuration::default();
        cfg.encryption_buffer_size = cfg.ciphertext_page_size + 1;
        assert!(matches!(
            cfg.validate(),
            Err(VfdError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_plaintext_page_size_not_block_aligned() {
        let mut cfg = Configuration::default();
        cfg.plaintext_page_size = 4090;
        assert!(matches!(
            cfg.validate(),
            Err(VfdError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn num_ct_buf_pages_and_offset_match_defaults() {
        let cfg = Configuration::default();
        assert_eq!(cfg.num_ct_buf_pages(), 16);
        assert_eq!(cfg.ciphertext_offset(), 2 * 4112);
    }
}
