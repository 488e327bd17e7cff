// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Access to an FPGA's memory-mapped register window.

use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::path::PathBuf;

use crate::FpgaError;
use crate::FpgaResult;

/// A window of 32-bit registers, addressed by byte offset from the base of
/// one FPGA's BAR.
///
/// Everything above this layer talks to hardware only through this trait, so
/// the I2C engine and EEPROM paging can be exercised against a fake.
#[cfg_attr(test, mockall::automock)]
pub trait RegisterWindow: Send + Sync {
    fn read32(&self, offset: u32) -> FpgaResult<u32>;
    fn write32(&self, offset: u32, value: u32) -> FpgaResult<()>;
    fn write8(&self, offset: u32, value: u8) -> FpgaResult<()>;
}

/// A register window backed by physical memory through `/dev/mem`.
///
/// Each register access maps the page holding the register, touches it, and
/// unmaps it again.  Nothing stays mapped between calls.
#[derive(Debug)]
pub struct DevMemWindow {
    path: PathBuf,
    file: File,
    base: u64,
    size: u64,
    page_size: u64,
}

// A single live mapping of the page covering one register.
struct Mapping {
    addr: *mut libc::c_void,
    len: usize,
    delta: usize,
}

impl Mapping {
    fn ptr<T>(&self) -> *mut T {
        // The delta was computed from the requested offset, which is
        // guaranteed to lie within the mapped length.
        unsafe { (self.addr as *mut u8).add(self.delta) as *mut T }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.addr, self.len);
        }
    }
}

fn page_size() -> u64 {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as u64,
        _ => 4096,
    }
}

impl DevMemWindow {
    pub fn open(
        path: impl AsRef<Path>,
        base: u64,
        size: u64,
    ) -> FpgaResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&path)
            .map_err(|e| FpgaError::io(format!("opening {}", path.display()), e))?;
        Ok(DevMemWindow {
            path,
            file,
            base,
            size,
            page_size: page_size(),
        })
    }

    fn map(&self, offset: u32, width: u32) -> FpgaResult<Mapping> {
        let end = u64::from(offset) + u64::from(width);
        if end > self.size {
            return Err(FpgaError::InvalidValue(format!(
                "register offset {offset:#x} outside {:#x}-byte window",
                self.size
            )));
        }
        let phys = self.base + u64::from(offset);
        let page_base = phys & !(self.page_size - 1);
        let delta = (phys - page_base) as usize;
        let len = delta + width as usize;

        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.file.as_raw_fd(),
                page_base as libc::off_t,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(FpgaError::io(
                format!("mapping {phys:#x} from {}", self.path.display()),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(Mapping { addr, len, delta })
    }
}

impl RegisterWindow for DevMemWindow {
    fn read32(&self, offset: u32) -> FpgaResult<u32> {
        let m = self.map(offset, 4)?;
        Ok(unsafe { std::ptr::read_volatile(m.ptr::<u32>()) })
    }

    fn write32(&self, offset: u32, value: u32) -> FpgaResult<()> {
        let m = self.map(offset, 4)?;
        unsafe { std::ptr::write_volatile(m.ptr::<u32>(), value) };
        Ok(())
    }

    fn write8(&self, offset: u32, value: u8) -> FpgaResult<()> {
        let m = self.map(offset, 1)?;
        unsafe { std::ptr::write_volatile(m.ptr::<u8>(), value) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A plain file stands in for /dev/mem; mmap of a regular file behaves the
    // same way for our purposes.
    fn scratch_file(name: &str, len: u64) -> PathBuf {
        let path = std::env::temp_dir()
            .join(format!("fpga-regs-{}-{name}", std::process::id()));
        let f = File::create(&path).unwrap();
        f.set_len(len).unwrap();
        path
    }

    #[test]
    fn test_devmem_window_round_trip() {
        let path = scratch_file("rw", 3 * 4096);
        let window = DevMemWindow::open(&path, 4096, 2 * 4096).unwrap();

        window.write32(0x10, 0xdead_beef).unwrap();
        assert_eq!(window.read32(0x10).unwrap(), 0xdead_beef);

        // A byte write touches only the addressed byte.
        window.write8(0x11, 0x00).unwrap();
        assert_eq!(window.read32(0x10).unwrap(), 0xdead_00ef);

        // Registers past the first page are reachable too.
        window.write32(4096 + 8, 7).unwrap();
        assert_eq!(window.read32(4096 + 8).unwrap(), 7);

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[4096 + 0x10..4096 + 0x14], &[0xef, 0x00, 0xad, 0xde]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_devmem_window_bounds() {
        let path = scratch_file("bounds", 4096);
        let window = DevMemWindow::open(&path, 0, 0x100).unwrap();
        assert!(matches!(
            window.read32(0xfe),
            Err(FpgaError::InvalidValue(_))
        ));
        assert!(window.write8(0xff, 1).is_ok());
        std::fs::remove_file(&path).unwrap();
    }
}
