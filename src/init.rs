//! One-time, process-wide initialization for the underlying cipher
//! primitives. The RustCrypto crates this driver uses need no runtime setup,
//! but the reference driver's underlying cipher library does (a secure
//! memory pool), so this hook exists to carry that concern forward: any
//! future swap to a cipher backend that *does* need one-time setup plugs in
//! here without touching the call sites in `driver.rs`.

use std::sync::Once;

use tracing::trace;

static INIT: Once = Once::new();

/// Idempotent, thread-safe. Safe to call on every `open`; only the first
/// call on the process does any work.
pub fn ensure_cipher_library_initialized() {
    INIT.call_once(|| {
        trace!("cipher library one-time initialization");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_across_many_calls() {
        for _ in 0..4 {
            ensure_cipher_library_initialized();
        }
    }
}
