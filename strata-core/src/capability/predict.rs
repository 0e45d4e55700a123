//! Capability estimates for hardware we are not running on.
//!
//! Used for planning and configuration only; driver selection always uses
//! detected capabilities.

use std::collections::HashMap;

use super::model::CapabilityMask;
use crate::error::{HalError, HalResult};

pub const EMPTY_HARDWARE_SPEC: HalError = HalError::validation(130, "hardware description is empty");
pub const UNRECOGNIZED_HARDWARE: HalError =
    HalError::validation(131, "hardware description matches no known platform family");
pub const INVALID_HARDWARE_FIELD: HalError = HalError::validation(132, "hardware field is not a number");

const DREAMCAST: CapabilityMask = CapabilityMask::DMA
    .union(CapabilityMask::HARDWARE_3D)
    .union(CapabilityMask::HARDWARE_2D)
    .union(CapabilityMask::HARDWARE_AUDIO)
    .union(CapabilityMask::MULTI_CHANNEL_AUDIO)
    .union(CapabilityMask::AUDIO_EFFECTS)
    .union(CapabilityMask::GAMEPAD)
    .union(CapabilityMask::PERSISTENT_STORAGE)
    .union(CapabilityMask::REAL_TIME_CLOCK);

const PSP: CapabilityMask = CapabilityMask::THREADING
    .union(CapabilityMask::DMA)
    .union(CapabilityMask::HARDWARE_3D)
    .union(CapabilityMask::HARDWARE_2D)
    .union(CapabilityMask::HARDWARE_AUDIO)
    .union(CapabilityMask::GAMEPAD)
    .union(CapabilityMask::NETWORKING)
    .union(CapabilityMask::WIFI)
    .union(CapabilityMask::PERSISTENT_STORAGE)
    .union(CapabilityMask::POWER_MANAGEMENT)
    .union(CapabilityMask::REAL_TIME_CLOCK);

const WEB: CapabilityMask = CapabilityMask::HARDWARE_3D
    .union(CapabilityMask::HARDWARE_2D)
    .union(CapabilityMask::VERTEX_SHADERS)
    .union(CapabilityMask::FRAGMENT_SHADERS)
    .union(CapabilityMask::MULTI_CHANNEL_AUDIO)
    .union(CapabilityMask::AUDIO_EFFECTS)
    .union(CapabilityMask::MULTI_TOUCH)
    .union(CapabilityMask::GAMEPAD)
    .union(CapabilityMask::NETWORKING)
    .union(CapabilityMask::ASYNC_IO)
    .union(CapabilityMask::SANDBOX_RESTRICTIONS);

const DESKTOP: CapabilityMask = CapabilityMask::THREADING
    .union(CapabilityMask::ATOMIC_OPERATIONS)
    .union(CapabilityMask::DMA)
    .union(CapabilityMask::VIRTUAL_MEMORY)
    .union(CapabilityMask::MEMORY_PROTECTION)
    .union(CapabilityMask::HARDWARE_3D)
    .union(CapabilityMask::HARDWARE_2D)
    .union(CapabilityMask::VERTEX_SHADERS)
    .union(CapabilityMask::FRAGMENT_SHADERS)
    .union(CapabilityMask::HARDWARE_AUDIO)
    .union(CapabilityMask::MULTI_CHANNEL_AUDIO)
    .union(CapabilityMask::AUDIO_EFFECTS)
    .union(CapabilityMask::GAMEPAD)
    .union(CapabilityMask::NETWORKING)
    .union(CapabilityMask::HIGH_PRECISION_TIMER)
    .union(CapabilityMask::REAL_TIME_CLOCK)
    .union(CapabilityMask::PERSISTENT_STORAGE)
    .union(CapabilityMask::ASYNC_IO)
    .union(CapabilityMask::POWER_MANAGEMENT);

const COMPUTE_GPUS: [&str; 7] = ["nvidia", "geforce", "amd", "radeon", "apple", "metal", "vulkan"];

/// Estimates the capability mask for a described machine.
///
/// Recognized keys: `vendor`, `model`, `platform`, `gpu`, `memory_mb`, `cores`.
/// Matching is case-insensitive. No I/O is performed.
pub fn predict(hardware_spec: &HashMap<String, String>) -> HalResult<CapabilityMask> {
    if hardware_spec.is_empty() {
        return Err(EMPTY_HARDWARE_SPEC);
    }

    let field = |key: &str| hardware_spec.get(key).map(|v| v.trim().to_ascii_lowercase()).unwrap_or_default();
    let vendor = field("vendor");
    let model = field("model");
    let platform = field("platform");
    let gpu = field("gpu");
    let mentions = |needle: &str| [&vendor, &model, &platform].iter().any(|s| s.contains(needle));

    let memory_mb = number(hardware_spec, "memory_mb")?;
    let cores = number(hardware_spec, "cores")?;

    let mut mask = if mentions("dreamcast") || vendor == "sega" {
        DREAMCAST
    } else if mentions("psp") {
        PSP
    } else if ["web", "browser", "wasm", "emscripten", "chrome", "firefox", "safari"]
        .iter()
        .any(|k| mentions(k))
    {
        WEB
    } else if ["apple", "intel", "amd", "nvidia", "macos", "windows", "linux", "desktop"]
        .iter()
        .any(|k| mentions(k))
    {
        let mut desktop = DESKTOP;
        if COMPUTE_GPUS.iter().any(|g| gpu.contains(g) || vendor.contains(g)) {
            desktop |= CapabilityMask::COMPUTE_SHADERS;
        }
        if mentions("apple") || mentions("macos") {
            desktop |= CapabilityMask::WIFI | CapabilityMask::BLUETOOTH;
        }
        desktop
    } else {
        return Err(UNRECOGNIZED_HARDWARE);
    };

    match cores {
        Some(1) | Some(0) => mask.remove(CapabilityMask::THREADING),
        Some(_) if !mask.contains(CapabilityMask::SANDBOX_RESTRICTIONS) => mask.insert(CapabilityMask::THREADING),
        _ => {}
    }
    if memory_mb.map_or(false, |mb| mb < 512) {
        mask.remove(CapabilityMask::COMPUTE_SHADERS);
    }

    Ok(mask)
}

fn number(spec: &HashMap<String, String>, key: &'static str) -> HalResult<Option<u64>> {
    match spec.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| INVALID_HARDWARE_FIELD.with_context(key)),
    }
}
