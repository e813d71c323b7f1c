//! Pure plaintext<->ciphertext address arithmetic. No side effects, no I/O.

use crate::config::Configuration;
use crate::error::{Result, VfdError};

/// Checks that `addr` and `size` are aligned to `plaintext_page_size` and
/// that `addr + size` does not overflow. Must be called by every entry point
/// into the page I/O engine before any translation or I/O is attempted.
pub fn validate_request(cfg: &Configuration, addr: u64, size: u64) -> Result<()> {
    let page_size = cfg.plaintext_page_size as u64;
    if addr % page_size != 0 || size % page_size != 0 {
        return Err(VfdError::MisalignedRequest {
            addr,
            size,
            page_size: cfg.plaintext_page_size,
        });
    }
    addr.checked_add(size)
        .ok_or(VfdError::AddressOverflow { addr, size })?;
    Ok(())
}

/// `pt_to_ct_addr`: plaintext byte address -> ciphertext byte address.
/// Fails with `AddressOverflow` rather than wrapping if the scaled-up result
/// does not fit in a `u64`.
pub fn pt_to_ct_addr(cfg: &Configuration, addr: u64) -> Result<u64> {
    let page_size = cfg.plaintext_page_size as u64;
    let ct_page_size = cfg.ciphertext_page_size as u64;
    let overflow = || VfdError::AddressOverflow { addr, size: 0 };
    (addr / page_size)
        .checked_mul(ct_page_size)
        .and_then(|v| v.checked_add(cfg.ciphertext_offset()))
        .ok_or_else(overflow)
}

/// `pt_to_ct_size`: plaintext byte count -> ciphertext byte count.
/// Fails with `AddressOverflow` rather than wrapping if the scaled-up result
/// does not fit in a `u64`.
pub fn pt_to_ct_size(cfg: &Configuration, size: u64) -> Result<u64> {
    let page_size = cfg.plaintext_page_size as u64;
    let ct_page_size = cfg.ciphertext_page_size as u64;
    (size / page_size)
        .checked_mul(ct_page_size)
        .ok_or(VfdError::AddressOverflow { addr: 0, size })
}

/// `eoa_up_to_eoa_down`: translates a plaintext EOA into the lower driver's
/// ciphertext EOA, rounding the plaintext address up to a whole page first.
/// Fails with `AddressOverflow` rather than wrapping or panicking if `addr`
/// is close enough to `u64::MAX` that the rounding-up addition, or the
/// scaled-up result, would not fit in a `u64`.
pub fn eoa_up_to_eoa_down(cfg: &Configuration, addr: u64) -> Result<u64> {
    let page_size = cfg.plaintext_page_size as u64;
    let ct_page_size = cfg.ciphertext_page_size as u64;
    let overflow = || VfdError::AddressOverflow { addr, size: 0 };
    let pages = addr
        .checked_add(page_size - 1)
        .ok_or_else(overflow)?
        / page_size;
    pages
        .checked_add(2)
        .and_then(|v| v.checked_mul(ct_page_size))
        .ok_or_else(overflow)
}

/// `eof_down_to_eof_up`: translates a lower-driver ciphertext EOF into the
/// plaintext view. Caller must have already checked `eof_down`'s invariants.
pub fn eof_down_to_eof_up(cfg: &Configuration, eof_down: u64) -> u64 {
    let page_size = cfg.plaintext_page_size as u64;
    let ct_page_size = cfg.ciphertext_page_size as u64;
    (eof_down / ct_page_size - 2) * page_size
}
