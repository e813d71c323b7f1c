use thiserror::Error;

/// The failure taxonomy for the encrypting VFD core.
///
/// Every variant corresponds to exactly one row of the error table in the
/// component design: a failure is surfaced to the caller unchanged, never
/// retried, and never silently downgraded to a different kind.
#[derive(Error, Debug)]
pub enum VfdError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),

    #[error("misaligned request: addr={addr}, size={size}, page_size={page_size}")]
    MisalignedRequest {
        addr: u64,
        size: u64,
        page_size: u32,
    },

    #[error("address overflow: addr={addr}, size={size}")]
    AddressOverflow { addr: u64, size: u64 },

    #[error("corrupt header: {0}")]
    CorruptHeader(&'static str),

    #[error("header configuration mismatch in field `{field}`: stored={stored}, supplied={supplied}")]
    ConfigMismatch {
        field: &'static str,
        stored: u64,
        supplied: u64,
    },

    #[error("key verification failed")]
    KeyVerificationFailed,

    #[error("corrupt file: {0}")]
    CorruptFile(&'static str),

    #[error("EOA mismatch: cached={cached}, lower={lower}")]
    EOAMismatch { cached: u64, lower: u64 },

    #[error("cipher error: {0}")]
    CipherError(&'static str),

    #[error("lower driver error: {0}")]
    LowerDriverError(#[from] std::io::Error),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),
}

pub type Result<T> = std::result::Result<T, VfdError>;
