pub mod clock;
pub mod features;
pub mod topology;

/// Operating system name as reported by the standard library (`linux`, `macos`, ...).
pub fn os_name() -> &'static str {
    std::env::consts::OS
}

/// CPU architecture name (`x86_64`, `aarch64`, ...).
pub fn arch_name() -> &'static str {
    std::env::consts::ARCH
}
