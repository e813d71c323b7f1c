//! The cipher adapter: a uniform, per-page capability over the concrete
//! symmetric-cipher primitives. Mirrors the split between `Ivg` (IV
//! generation) and `StatefulCrypter` (the block/mode primitive) used by
//! `kms::io::crypt`, but specialized to whole-page CBC with a fresh IV
//! prefixed to every page instead of a shared running counter.

use aes::Aes256;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use twofish::Twofish;

#[cfg(test)]
use rand::SeedableRng;
#[cfg(test)]
use rand_chacha::ChaCha8Rng;

use crate::config::{CipherId, Configuration};
use crate::error::{Result, VfdError};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type TwofishCbcEnc = cbc::Encryptor<Twofish>;
type TwofishCbcDec = cbc::Decryptor<Twofish>;

/// Per-page encrypt/decrypt capability selected by `cipher_id`/`mode_id`.
///
/// Stateless between calls: each call generates (or consumes) its own IV and
/// leaves no carry-over, which is what makes random-access decryption of
/// individual pages possible.
pub struct CipherAdapter {
    cipher_id: CipherId,
    iv_size: usize,
    plaintext_page_size: usize,
}

impl CipherAdapter {
    pub fn new(cfg: &Configuration) -> Self {
        Self {
            cipher_id: cfg.cipher_id,
            iv_size: cfg.iv_size as usize,
            plaintext_page_size: cfg.plaintext_page_size as usize,
        }
    }

    /// Encrypts one plaintext page into `dst`, which must be exactly
    /// `iv_size + plaintext_page_size` bytes: a fresh random IV followed by
    /// the ciphertext. The IV is drawn from `OsRng`, a CSPRNG.
    pub fn encrypt_page(&self, key: &[u8], plaintext: &[u8], dst: &mut [u8]) -> Result<()> {
        self.encrypt_page_with_rng(key, plaintext, dst, &mut OsRng)
    }

    /// Same as `encrypt_page`, but drawing the IV from a caller-supplied RNG
    /// instead of `OsRng`. Not exposed outside the crate: production callers
    /// always go through `encrypt_page`; this exists so the test module can
    /// exercise IV generation against a seeded, reproducible RNG.
    fn encrypt_page_with_rng(
        &self,
        key: &[u8],
        plaintext: &[u8],
        dst: &mut [u8],
        rng: &mut impl RngCore,
    ) -> Result<()> {
        debug_assert_eq!(plaintext.len(), self.plaintext_page_size);
        debug_assert_eq!(dst.len(), self.iv_size + self.plaintext_page_size);

        let (iv_dst, ct_dst) = dst.split_at_mut(self.iv_size);
        rng.fill_bytes(iv_dst);
        ct_dst.copy_from_slice(plaintext);

        match self.cipher_id {
            CipherId::Aes256 => {
                let enc = Aes256CbcEnc::new_from_slices(key, iv_dst)
                    .map_err(|_| VfdError::CipherError("bad AES-256 key/iv length"))?;
                enc.encrypt_padded_mut::<cipher::block_padding::NoPadding>(ct_dst, ct_dst.len())
                    .map_err(|_| VfdError::CipherError("AES-256 CBC encryption failed"))?;
            }
            CipherId::Twofish => {
                let enc = TwofishCbcEnc::new_from_slices(key, iv_dst)
                    .map_err(|_| VfdError::CipherError("bad Twofish key/iv length"))?;
                enc.encrypt_padded_mut::<cipher::block_padding::NoPadding>(ct_dst, ct_dst.len())
                    .map_err(|_| VfdError::CipherError("Twofish CBC encryption failed"))?;
            }
        }
        Ok(())
    }

    /// Decrypts one ciphertext page (`iv_size + plaintext_page_size` bytes)
    /// from `src` into `dst` (`plaintext_page_size` bytes).
    pub fn decrypt_page(&self, key: &[u8], src: &[u8], dst: &mut [u8]) -> Result<()> {
        debug_assert_eq!(src.len(), self.iv_size + self.plaintext_page_size);
        debug_assert_eq!(dst.len(), self.plaintext_page_size);

        let (iv, ct) = src.split_at(self.iv_size);
        dst.copy_from_slice(ct);

        match self.cipher_id {
            CipherId::Aes256 => {
                let dec = Aes256CbcDec::new_from_slices(key, iv)
                    .map_err(|_| VfdError::CipherError("bad AES-256 key/iv length"))?;
                dec.decrypt_padded_mut::<cipher::block_padding::NoPadding>(dst)
                    .map_err(|_| VfdError::CipherError("AES-256 CBC decryption failed"))?;
            }
            CipherId::Twofish => {
                let dec = TwofishCbcDec::new_from_slices(key, iv)
                    .map_err(|_| VfdError::CipherError("bad Twofish key/iv length"))?;
                dec.decrypt_padded_mut::<cipher::block_padding::NoPadding>(dst)
                    .map_err(|_| VfdError::CipherError("Twofish CBC decryption failed"))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    fn cfg_with_key(key: Vec<u8>) -> Configuration {
        Configuration::with_defaults(key).unwrap()
    }

    #[test]
    fn round_trips_one_page() {
        let cfg = cfg_with_key((0u8..32).collect());
        let adapter = CipherAdapter::new(&cfg);
        let plaintext = vec![b'A'; cfg.plaintext_page_size as usize];
        let mut ct = vec![0u8; cfg.iv_size as usize + cfg.plaintext_page_size as usize];
        adapter
            .encrypt_page(&cfg.key, &plaintext, &mut ct)
            .unwrap();
        let mut pt_out = vec![0u8; cfg.plaintext_page_size as usize];
        adapter.decrypt_page(&cfg.key, &ct, &mut pt_out).unwrap();
        assert_eq!(pt_out, plaintext);
    }

    #[test]
    fn iv_differs_across_successive_encryptions() {
        let cfg = cfg_with_key((0u8..32).collect());
        let adapter = CipherAdapter::new(&cfg);
        let plaintext = vec![b'A'; cfg.plaintext_page_size as usize];
        let mut ivs = Vec::new();
        for _ in 0..8 {
            let mut ct = vec![0u8; cfg.iv_size as usize + cfg.plaintext_page_size as usize];
            adapter
                .encrypt_page(&cfg.key, &plaintext, &mut ct)
                .unwrap();
            ivs.push(ct[..cfg.iv_size as usize].to_vec());
        }
        for i in 0..ivs.len() {
            for j in (i + 1)..ivs.len() {
                assert_ne!(ivs[i], ivs[j], "IV reused across successive page encryptions");
            }
        }
    }

    /// A seeded `ChaCha8Rng` plays the role `kms`'s `SequentialIvg` test
    /// double plays for its own crypt IO: a deterministic, reproducible IV
    /// source so a test can assert on the IV itself rather than treat it as
    /// unobservable.
    #[test]
    fn seeded_rng_reproduces_the_same_iv_and_ciphertext() {
        let cfg = cfg_with_key((0u8..32).collect());
        let adapter = CipherAdapter::new(&cfg);
        let plaintext = vec![b'A'; cfg.plaintext_page_size as usize];
        let ct_len = cfg.iv_size as usize + cfg.plaintext_page_size as usize;

        let mut rng_a = ChaCha8Rng::seed_from_u64(0xC0FFEE);
        let mut ct_a = vec![0u8; ct_len];
        adapter
            .encrypt_page_with_rng(&cfg.key, &plaintext, &mut ct_a, &mut rng_a)
            .unwrap();

        let mut rng_b = ChaCha8Rng::seed_from_u64(0xC0FFEE);
        let mut ct_b = vec![0u8; ct_len];
        adapter
            .encrypt_page_with_rng(&cfg.key, &plaintext, &mut ct_b, &mut rng_b)
            .unwrap();

        assert_eq!(ct_a, ct_b, "same seed must reproduce the same IV and ciphertext");

        let mut rng_c = ChaCha8Rng::seed_from_u64(0xBAD5EED);
        let mut ct_c = vec![0u8; ct_len];
        adapter
            .encrypt_page_with_rng(&cfg.key, &plaintext, &mut ct_c, &mut rng_c)
            .unwrap();
        assert_ne!(ct_a, ct_c, "different seeds must not reproduce the same IV");
    }

    #[test]
    fn wrong_key_yields_wrong_plaintext() {
        let cfg_a = cfg_with_key(vec![0x11; 32]);
        let cfg_b = cfg_with_key(vec![0x22; 32]);
        let adapter = CipherAdapter::new(&cfg_a);
        let plaintext = vec![b'Z'; cfg_a.plaintext_page_size as usize];
        let mut ct = vec![0u8; cfg_a.iv_size as usize + cfg_a.plaintext_page_size as usize];
        adapter
            .encrypt_page(&cfg_a.key, &plaintext, &mut ct)
            .unwrap();
        let mut pt_out = vec![0u8; cfg_a.plaintext_page_size as usize];
        adapter.decrypt_page(&cfg_b.key, &ct, &mut pt_out).unwrap();
        assert_ne!(pt_out, plaintext);
    }
}
