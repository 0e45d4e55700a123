use log::{info, warn};

use crate::error::ProbeError;

/// Hardware Topology Detector.
/// Reports core count and physical memory so the core crate can classify the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemTopology {
    logical_cores: u32,
    page_size: u64,
    total_ram: u64,
    available_ram: u64,
}

impl SystemTopology {
    /// Detects the system's core and memory configuration.
    ///
    /// # Errors
    /// Returns `ProbeError` if the OS refuses a `sysconf` query or the
    /// platform has no supported memory query at all.
    pub fn detect() -> Result<Self, ProbeError> {
        let topology = Self::query()?;

        info!(
            "Topology Discovery: {} cores, {:.2} GB RAM total ({:.2} GB available), {} byte pages.",
            topology.logical_cores,
            topology.total_ram as f64 / 1e9,
            topology.available_ram as f64 / 1e9,
            topology.page_size
        );

        if topology.total_ram < 64 * 1024 * 1024 {
            warn!("Constrained memory environment detected (< 64MB). Capability tier will be reduced.");
        }

        Ok(topology)
    }

    #[cfg(target_os = "linux")]
    fn query() -> Result<Self, ProbeError> {
        let count = sysconf(libc::_SC_NPROCESSORS_ONLN, "_SC_NPROCESSORS_ONLN")?;
        let page_size = sysconf(libc::_SC_PAGESIZE, "_SC_PAGESIZE")?;
        let total_pages = sysconf(libc::_SC_PHYS_PAGES, "_SC_PHYS_PAGES")?;
        let av_pages = sysconf(libc::_SC_AVPHYS_PAGES, "_SC_AVPHYS_PAGES")?;

        let logical_cores = if count == 0 {
            warn!("Core count reported as zero. Fallback to 1.");
            1
        } else {
            count as u32
        };

        Ok(Self {
            logical_cores,
            page_size,
            total_ram: total_pages * page_size,
            available_ram: av_pages * page_size,
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn query() -> Result<Self, ProbeError> {
        Err(ProbeError::Unsupported(std::env::consts::OS))
    }

    pub fn logical_cores(&self) -> u32 {
        self.logical_cores
    }

    /// Virtual memory page size in bytes. Zero when paging was not observable.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Returns the physical RAM in bytes.
    pub fn total_ram(&self) -> u64 {
        self.total_ram
    }

    /// Returns the available RAM in bytes.
    pub fn available_ram(&self) -> u64 {
        self.available_ram
    }
}

#[cfg(target_os = "linux")]
fn sysconf(name: libc::c_int, label: &'static str) -> Result<u64, ProbeError> {
    // SAFETY: sysconf has no memory-safety preconditions.
    let ret = unsafe { libc::sysconf(name) };
    if ret < 0 {
        return Err(ProbeError::Sysconf(label, std::io::Error::last_os_error()));
    }
    Ok(ret as u64)
}
