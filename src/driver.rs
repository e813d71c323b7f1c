//! Driver lifecycle, EOA/EOF bookkeeping, and the page I/O engine.
//!
//! ```text
//!   [Uninitialized]
//!        | open()
//!        v
//!   [Open, EOA=0, EOF=undef]
//!        | set_eoa(a) -> [Open, EOA=a, ...]  (self-loop)
//!        | get_eof()  -> caches EOF          (first call populates it)
//!        | read/write                        (self-loop; preconditions enforced)
//!        | close()
//!        v
//!   [Closed]   (terminal)
//! ```

use std::cmp::Ordering;

use bitflags::bitflags;
use tracing::{debug, trace, warn};

use crate::cipher::CipherAdapter;
use crate::config::Configuration;
use crate::error::{Result, VfdError};
use crate::header;
use crate::init::ensure_cipher_library_initialized;
use crate::lower::{FeatureFlags, LowerDriver};
use crate::translate;

bitflags! {
    /// Flags governing how `EncryptingVfd::open` treats the underlying file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Create the file if it does not exist.
        const CREATE = 1 << 0;
        /// Truncate an existing file and rewrite the header pages.
        const TRUNCATE = 1 << 1;
    }
}

/// One open encrypting-VFD handle. Owns its lower driver and working buffer
/// exclusively; both are released on `close`.
pub struct EncryptingVfd {
    cfg: Configuration,
    lower: Box<dyn LowerDriver>,
    adapter: CipherAdapter,
    work_buf: Vec<u8>,
    num_ct_buf_pages: u32,
    ciphertext_offset: u64,
    eoa_up: Option<u64>,
    eoa_down: Option<u64>,
    eof_up: Option<u64>,
    eof_down: Option<u64>,
}

impl EncryptingVfd {
    /// Opens (and, per `flags`, creates/truncates) an encrypting VFD handle
    /// over an already-opened lower driver.
    ///
    /// On any failure, the lower driver is closed best-effort before the
    /// error is returned, releasing all partially-acquired resources.
    pub fn open(
        lower: Box<dyn LowerDriver>,
        flags: OpenFlags,
        cfg: Configuration,
    ) -> Result<Self> {
        match Self::open_inner(lower, flags, cfg) {
            Ok(handle) => Ok(handle),
            Err((mut lower, err)) => {
                if let Err(close_err) = lower.close() {
                    warn!(error = %close_err, "failed to close lower driver after open failure");
                }
                Err(err)
            }
        }
    }

    fn open_inner(
        mut lower: Box<dyn LowerDriver>,
        flags: OpenFlags,
        cfg: Configuration,
    ) -> std::result::Result<Self, (Box<dyn LowerDriver>, VfdError)> {
        ensure_cipher_library_initialized();

        if let Err(e) = cfg.validate() {
            return Err((lower, e));
        }

        let adapter = CipherAdapter::new(&cfg);
        let num_ct_buf_pages = cfg.num_ct_buf_pages();
        let ciphertext_offset = cfg.ciphertext_offset();
        let work_buf = vec![0u8; cfg.encryption_buffer_size as usize];

        if let Err(e) = lower.set_eoa(ciphertext_offset) {
            return Err((lower, VfdError::LowerDriverError(e)));
        }

        let mut handle = Self {
            cfg,
            lower,
            adapter,
            work_buf,
            num_ct_buf_pages,
            ciphertext_offset,
            eoa_up: Some(0),
            eoa_down: Some(ciphertext_offset),
            eof_up: None,
            eof_down: None,
        };

        if flags.intersects(OpenFlags::CREATE | OpenFlags::TRUNCATE) {
            if let Err(e) = handle.write_header_pages() {
                return Err((handle.lower, e));
            }
        }

        if let Err(e) = handle.verify_header_pages() {
            return Err((handle.lower, e));
        }

        debug!(
            plaintext_page_size = handle.cfg.plaintext_page_size,
            ciphertext_page_size = handle.cfg.ciphertext_page_size,
            "opened encrypting VFD handle"
        );

        Ok(handle)
    }

    fn write_header_pages(&mut self) -> Result<()> {
        let page0 = header::encode_page0(&self.cfg);
        self.lower
            .write_at(0, &page0)
            .map_err(VfdError::LowerDriverError)?;

        let page1 = header::encode_page1(&self.cfg, &self.adapter)?;
        self.lower
            .write_at(self.cfg.ciphertext_page_size as u64, &page1)
            .map_err(VfdError::LowerDriverError)?;
        Ok(())
    }

    fn verify_header_pages(&mut self) -> Result<()> {
        let mut page0 = vec![0u8; self.cfg.ciphertext_page_size as usize];
        self.lower
            .read_at(0, &mut page0)
            .map_err(VfdError::LowerDriverError)?;
        header::verify_page0(&page0, &self.cfg)?;

        let mut page1 = vec![0u8; self.cfg.ciphertext_page_size as usize];
        self.lower
            .read_at(self.cfg.ciphertext_page_size as u64, &mut page1)
            .map_err(VfdError::LowerDriverError)?;
        header::verify_page1(&page1, &self.cfg, &self.adapter)?;
        Ok(())
    }

    /// Reads `buf.len()` plaintext bytes starting at plaintext address
    /// `addr`. `addr` and `buf.len()` must both be multiples of
    /// `plaintext_page_size`. A zero-length read is a no-op.
    pub fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let size = buf.len() as u64;
        if size == 0 {
            return Ok(());
        }
        translate::validate_request(&self.cfg, addr, size)?;

        let pt_page_size = self.cfg.plaintext_page_size as usize;
        let ct_page_size = self.cfg.ciphertext_page_size as usize;
        let mut ct_addr = translate::pt_to_ct_addr(&self.cfg, addr)?;
        let mut ct_remaining = translate::pt_to_ct_size(&self.cfg, size)?;
        let mut out_off = 0usize;

        trace!(addr, size, "read");

        while ct_remaining > 0 {
            let chunk = ct_remaining.min(self.cfg.encryption_buffer_size as u64) as usize;
            self.lower
                .read_at(ct_addr, &mut self.work_buf[..chunk])
                .map_err(VfdError::LowerDriverError)?;
            ct_addr += chunk as u64;
            ct_remaining -= chunk as u64;

            let mut buf_off = 0;
            while buf_off < chunk {
                let ct_page = &self.work_buf[buf_off..buf_off + ct_page_size];
                self.adapter.decrypt_page(
                    &self.cfg.key,
                    ct_page,
                    &mut buf[out_off..out_off + pt_page_size],
                )?;
                buf_off += ct_page_size;
                out_off += pt_page_size;
            }
        }

        Ok(())
    }

    /// Writes `buf.len()` plaintext bytes starting at plaintext address
    /// `addr`. `addr` and `buf.len()` must both be multiples of
    /// `plaintext_page_size`. A zero-length write is a no-op.
    pub fn write(&mut self, addr: u64, buf: &[u8]) -> Result<()> {
        let size = buf.len() as u64;
        if size == 0 {
            return Ok(());
        }
        translate::validate_request(&self.cfg, addr, size)?;

        let pt_page_size = self.cfg.plaintext_page_size as usize;
        let ct_page_size = self.cfg.ciphertext_page_size as usize;
        let buf_pages = self.num_ct_buf_pages as usize;
        let mut ct_addr = translate::pt_to_ct_addr(&self.cfg, addr)?;
        let total_pages = (size as usize) / pt_page_size;
        let mut pages_left = total_pages;
        let mut in_off = 0usize;

        trace!(addr, size, "write");

        while pages_left > 0 {
            let pages_this_round = pages_left.min(buf_pages);
            for i in 0..pages_this_round {
                let pt_slice = &buf[in_off..in_off + pt_page_size];
                let ct_slice = &mut self.work_buf[i * ct_page_size..(i + 1) * ct_page_size];
                self.adapter.encrypt_page(&self.cfg.key, pt_slice, ct_slice)?;
                in_off += pt_page_size;
            }

            let bytes_to_write = pages_this_round * ct_page_size;
            self.lower
                .write_at(ct_addr, &self.work_buf[..bytes_to_write])
                .map_err(VfdError::LowerDriverError)?;
            ct_addr += bytes_to_write as u64;
            pages_left -= pages_this_round;
        }

        Ok(())
    }

    /// Sets the plaintext-view EOA, translating and pushing the equivalent
    /// ciphertext EOA to the lower driver.
    pub fn set_eoa(&mut self, addr: u64) -> Result<()> {
        let eoa_down = translate::eoa_up_to_eoa_down(&self.cfg, addr)?;
        self.lower
            .set_eoa(eoa_down)
            .map_err(VfdError::LowerDriverError)?;
        self.eoa_up = Some(addr);
        self.eoa_down = Some(eoa_down);
        Ok(())
    }

    /// Returns the cached plaintext-view EOA after cross-checking the lower
    /// driver's EOA still matches what we last pushed.
    pub fn get_eoa(&mut self) -> Result<u64> {
        let lower_eoa = self.lower.get_eoa().map_err(VfdError::LowerDriverError)?;
        let cached = self.eoa_down.unwrap_or(self.ciphertext_offset);
        if lower_eoa != cached {
            return Err(VfdError::EOAMismatch {
                cached,
                lower: lower_eoa,
            });
        }
        Ok(self.eoa_up.unwrap_or(0))
    }

    /// Returns the plaintext-view EOF, or `None` if the lower driver's EOF
    /// is undefined. Caches both views on success.
    pub fn get_eof(&mut self) -> Result<Option<u64>> {
        let lower_eof = self.lower.get_eof().map_err(VfdError::LowerDriverError)?;
        let Some(eof_down) = lower_eof else {
            return Ok(None);
        };

        if eof_down < self.ciphertext_offset {
            return Err(VfdError::CorruptFile(
                "file is shorter than the two header pages",
            ));
        }
        if eof_down % self.cfg.ciphertext_page_size as u64 != 0 {
            return Err(VfdError::CorruptFile(
                "file length is not a multiple of ciphertext_page_size",
            ));
        }

        let eof_up = translate::eof_down_to_eof_up(&self.cfg, eof_down);
        self.eof_down = Some(eof_down);
        self.eof_up = Some(eof_up);
        Ok(Some(eof_up))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.lower.flush().map_err(VfdError::LowerDriverError)
    }

    /// Truncates the file to `len` plaintext bytes. `len` must be a multiple
    /// of `plaintext_page_size`.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        translate::validate_request(&self.cfg, 0, len)?;
        let ct_len = self
            .ciphertext_offset
            .checked_add(translate::pt_to_ct_size(&self.cfg, len)?)
            .ok_or(VfdError::AddressOverflow { addr: 0, size: len })?;
        self.lower
            .truncate(ct_len)
            .map_err(VfdError::LowerDriverError)
    }

    pub fn lock(&mut self, exclusive: bool) -> Result<()> {
        self.lower.lock(exclusive).map_err(VfdError::LowerDriverError)
    }

    pub fn unlock(&mut self) -> Result<()> {
        self.lower.unlock().map_err(VfdError::LowerDriverError)
    }

    /// Compares file identity with another open handle, delegating to the
    /// lower driver's own notion of identity.
    pub fn compare(&self, other: &Self) -> Result<Ordering> {
        let a = self.lower.identity().map_err(VfdError::LowerDriverError)?;
        let b = other.lower.identity().map_err(VfdError::LowerDriverError)?;
        Ok(a.cmp(&b))
    }

    /// Reports the lower driver's capability flags.
    pub fn query(&self) -> FeatureFlags {
        self.lower.query()
    }

    /// Diagnostic-only raw OS handle of the lower driver, if one exists.
    pub fn raw_handle(&self) -> Option<i32> {
        self.lower.raw_handle()
    }

    pub fn ctl(&mut self, op: u32, args: &[u8]) -> Result<Vec<u8>> {
        self.lower.ctl(op, args).map_err(VfdError::LowerDriverError)
    }

    /// Removes the underlying file. Pass-through to the lower driver; the
    /// caller is responsible for calling this before or instead of `close`,
    /// never on a handle it intends to keep using.
    pub fn delete(&mut self) -> Result<()> {
        self.lower.delete().map_err(VfdError::LowerDriverError)
    }

    /// The crypt VFD stores no variable superblock state beyond what's
    /// already captured in header page 0; these three hooks exist purely so
    /// this driver composes with a hosting format that expects them.
    pub fn superblock_size(&self) -> u64 {
        0
    }

    pub fn superblock_encode(&self, _buf: &mut [u8]) -> Result<()> {
        Ok(())
    }

    pub fn superblock_decode(&mut self, _buf: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Closes the handle: closes the lower driver best-effort (a failure is
    /// logged but does not prevent local resources from being released),
    /// then drops the working buffer and the configuration (whose key is
    /// zeroized on drop).
    pub fn close(self) -> Result<()> {
        let result = self.lower.close();
        if let Err(ref e) = result {
            warn!(error = %e, "lower driver close failed; local resources released anyway");
        }
        result.map_err(VfdError::LowerDriverError)
    }
}
