//! An encrypting, page-aligned virtual file driver core.
//!
//! Converts random-offset plaintext reads and writes into an aligned,
//! fixed-size sequence of ciphertext pages against a lower driver,
//! transparently encrypting and decrypting data and validating file
//! identity (configuration and key) on open.
//!
//! See `SPEC_FULL.md` for the full component design; in short:
//! - [`cipher`] is the per-page symmetric-cipher capability.
//! - [`translate`] is the pure plaintext<->ciphertext address arithmetic.
//! - [`header`] is the on-disk header-page protocol.
//! - [`driver`] is the page I/O engine and lifecycle/EOA-EOF bookkeeping.
//! - [`lower`] is the downward interface to the next driver in the stack.

pub mod cipher;
pub mod config;
pub mod driver;
pub mod error;
pub mod header;
mod init;
pub mod lower;
pub mod translate;

pub use config::{CipherId, Configuration, ModeId};
pub use driver::{EncryptingVfd, OpenFlags};
pub use error::{Result, VfdError};
pub use lower::{FeatureFlags, LowerDriver, StdLowerDriver};
