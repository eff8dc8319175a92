//! Minimal, hand-written `perf_event_open(2)` bindings.
//!
//! `libc` does not expose `perf_event_attr` (its layout is versioned by the
//! running kernel, not by glibc), so every Rust perf wrapper defines its own
//! copy of the struct up to the fields it actually uses. This one covers
//! the subset `cxlmem-perf` needs: raw/hardware counters read in counting
//! mode, no sampling, no mmap ring buffer.

use std::fs::File;
use std::io;
use std::mem::size_of;
use std::os::fd::FromRawFd;

pub const PERF_TYPE_HARDWARE: u32 = 0;
pub const PERF_TYPE_HW_CACHE: u32 = 3;
pub const PERF_TYPE_RAW: u32 = 4;

/// Bit positions within `perf_event_attr`'s packed boolean bitfield.
mod flag_bits {
    pub const DISABLED: u64 = 1 << 0;
    pub const EXCLUDE_KERNEL: u64 = 1 << 5;
    pub const EXCLUDE_HV: u64 = 1 << 6;
}

/// `struct perf_event_attr` (subset). `#[repr(C)]` so the field order and
/// padding match the kernel ABI exactly; `size` must be set to
/// `size_of::<PerfEventAttr>()` so the kernel knows which fields are present.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PerfEventAttr {
    pub type_: u32,
    pub size: u32,
    pub config: u64,
    pub sample_period_or_freq: u64,
    pub sample_type: u64,
    pub read_format: u64,
    pub flags: u64,
    pub wakeup_events_or_watermark: u32,
    pub bp_type: u32,
    pub config1: u64,
    pub config2: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clockid: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    pub __reserved_2: u16,
}

impl PerfEventAttr {
    /// A counting-mode (not sampling) event: created disabled so the caller
    /// controls the enable point explicitly via `PERF_EVENT_IOC_ENABLE`.
    pub fn counting(perf_type: u32, config: u64, config1: u64) -> Self {
        Self {
            type_: perf_type,
            size: size_of::<PerfEventAttr>() as u32,
            config,
            config1,
            flags: flag_bits::DISABLED | flag_bits::EXCLUDE_KERNEL | flag_bits::EXCLUDE_HV,
            ..Default::default()
        }
    }
}

const PERF_EVENT_IOC_MAGIC: u8 = b'$';

fn ioc_none(nr: u8) -> u64 {
    // _IO(PERF_EVENT_IOC_MAGIC, nr) with no argument size, matching the
    // kernel's <linux/perf_event.h> ioctl numbers for ENABLE/DISABLE/RESET.
    ((PERF_EVENT_IOC_MAGIC as u64) << 8) | nr as u64
}

pub fn ioc_enable() -> u64 {
    ioc_none(0)
}
pub fn ioc_disable() -> u64 {
    ioc_none(1)
}
pub fn ioc_reset() -> u64 {
    ioc_none(2)
}

/// Opens one perf event for `pid` pinned to `cpu` (use `-1` for "any cpu
/// the thread runs on", matching how the epoch loop binds a monitor to a
/// specific core per §4.1).
pub fn perf_event_open(attr: &PerfEventAttr, pid: i32, cpu: i32, group_fd: i32) -> io::Result<File> {
    let fd = unsafe {
        libc::syscall(
            libc::SYS_perf_event_open,
            attr as *const PerfEventAttr,
            pid,
            cpu,
            group_fd,
            0u64, // flags
        )
    };
    if fd >= 0 {
        Ok(unsafe { File::from_raw_fd(fd as i32) })
    } else {
        Err(io::Error::last_os_error())
    }
}

pub fn ioctl(file: &File, request: u64) -> io::Result<()> {
    use std::os::fd::AsRawFd;
    let r = unsafe { libc::ioctl(file.as_raw_fd(), request as _) };
    if r >= 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Reads the raw 64-bit monotonic counter value in counting mode (no
/// `read_format` extras requested, so the kernel returns exactly 8 bytes).
pub fn read_counter(file: &File) -> io::Result<u64> {
    use std::io::Read;
    let mut buf = [0u8; 8];
    (&*file).read_exact(&mut buf)?;
    Ok(u64::from_ne_bytes(buf))
}
