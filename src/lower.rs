//! The downward interface: the capability this driver needs from the next
//! driver in the stack. Modeled as a trait object (`Box<dyn LowerDriver>`)
//! rather than the reference's table of function pointers — see the design
//! note on polymorphism in spec.md §9.
//!
//! All addresses and sizes a caller of this trait passes are ciphertext-view
//! multiples of `ciphertext_page_size`; the trait itself is agnostic to that
//! convention; it is enforced by `driver.rs`.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use bitflags::bitflags;

bitflags! {
    /// Capability flags a lower driver reports via `query`, mirroring the
    /// small set of feature bits the original HDF5 driver exposes to the
    /// layer above (see SPEC_FULL.md §11).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureFlags: u32 {
        /// The driver supports aggregating small metadata writes.
        const AGGREGATE_METADATA = 1 << 0;
        /// The driver supports a data-sieve buffer above it.
        const DATA_SIEVE = 1 << 1;
        /// The driver is safe for single-writer/multi-reader access.
        const SWMR_READER = 1 << 2;
    }
}

/// Capability interface over the next driver in the stack.
pub trait LowerDriver {
    /// Reads exactly `buf.len()` ciphertext bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Writes exactly `buf.len()` ciphertext bytes starting at `offset`.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Sets the lower driver's end-of-address.
    fn set_eoa(&mut self, addr: u64) -> io::Result<()>;

    /// Returns the lower driver's end-of-address.
    fn get_eoa(&mut self) -> io::Result<u64>;

    /// Returns the lower driver's end-of-file, or `None` if undefined.
    fn get_eof(&mut self) -> io::Result<Option<u64>>;

    fn flush(&mut self) -> io::Result<()>;

    fn truncate(&mut self, len: u64) -> io::Result<()>;

    fn lock(&mut self, exclusive: bool) -> io::Result<()>;

    fn unlock(&mut self) -> io::Result<()>;

    /// An opaque identity token used by `compare`; two lower drivers over
    /// the same underlying file must produce equal tokens.
    fn identity(&self) -> io::Result<Vec<u8>>;

    /// A raw OS handle for diagnostics only; never used by the core itself.
    fn raw_handle(&self) -> Option<i32>;

    fn ctl(&mut self, op: u32, args: &[u8]) -> io::Result<Vec<u8>>;

    /// Removes the underlying file. Only valid once no handle has it open.
    fn delete(&mut self) -> io::Result<()>;

    fn close(self: Box<Self>) -> io::Result<()>;

    /// Reports the capability flags this lower driver supports. Default is
    /// "nothing extra"; concrete drivers override as appropriate.
    fn query(&self) -> FeatureFlags {
        FeatureFlags::empty()
    }
}

/// A `LowerDriver` backed directly by a `std::fs::File`, used as the default
/// terminal driver and by the test suite. Mirrors `disk.rs`'s direct
/// `std::io::{Read, Write, Seek}` implementation style, generalized from a
/// single running cursor to explicit offsets.
pub struct StdLowerDriver {
    file: File,
    path: Option<std::path::PathBuf>,
    eoa: Option<u64>,
}

impl StdLowerDriver {
    /// Wraps an already-open file with no known path; `delete` will fail.
    pub fn open(file: File) -> Self {
        Self {
            file,
            path: None,
            eoa: None,
        }
    }

    /// Opens an existing file by path, enabling `delete`.
    pub fn open_path(path: &std::path::Path) -> io::Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        Ok(Self {
            file,
            path: Some(path.to_path_buf()),
            eoa: None,
        })
    }

    pub fn create(path: &std::path::Path) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            path: Some(path.to_path_buf()),
            eoa: None,
        })
    }
}

impl LowerDriver for StdLowerDriver {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }

    fn set_eoa(&mut self, addr: u64) -> io::Result<()> {
        self.eoa = Some(addr);
        Ok(())
    }

    fn get_eoa(&mut self) -> io::Result<u64> {
        self.eoa.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "EOA not yet set on lower driver")
        })
    }

    fn get_eof(&mut self) -> io::Result<Option<u64>> {
        let len = self.file.metadata()?.len();
        Ok(Some(len))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn lock(&mut self, exclusive: bool) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let op = if exclusive { libc::LOCK_EX } else { libc::LOCK_SH };
            let rc = unsafe { libc::flock(self.file.as_raw_fd(), op) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    fn unlock(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    fn identity(&self) -> io::Result<Vec<u8>> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let meta = self.file.metadata()?;
            let mut id = Vec::with_capacity(16);
            id.extend_from_slice(&meta.dev().to_le_bytes());
            id.extend_from_slice(&meta.ino().to_le_bytes());
            return Ok(id);
        }
        #[cfg(not(unix))]
        {
            let meta = self.file.metadata()?;
            Ok(meta.len().to_le_bytes().to_vec())
        }
    }

    fn raw_handle(&self) -> Option<i32> {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            return Some(self.file.as_raw_fd());
        }
        #[cfg(not(unix))]
        {
            None
        }
    }

    fn ctl(&mut self, _op: u32, _args: &[u8]) -> io::Result<Vec<u8>> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "ctl op not recognized"))
    }

    fn delete(&mut self) -> io::Result<()> {
        match &self.path {
            Some(path) => std::fs::remove_file(path),
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "no path known for this lower driver handle",
            )),
        }
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }

    fn query(&self) -> FeatureFlags {
        FeatureFlags::SWMR_READER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut lower = StdLowerDriver::create(&dir.path().join("f")).unwrap();
        lower.write_at(0, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        lower.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn eoa_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut lower = StdLowerDriver::create(&dir.path().join("f")).unwrap();
        lower.set_eoa(4096).unwrap();
        assert_eq!(lower.get_eoa().unwrap(), 4096);
    }

    #[test]
    fn delete_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        let mut lower = StdLowerDriver::create(&path).unwrap();
        lower.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn delete_without_a_known_path_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        let file = std::fs::File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        let mut lower = StdLowerDriver::open(file);
        assert_eq!(
            lower.delete().unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
    }
}
