/// CPU feature flags relevant to capability classification.
///
/// Detection uses the standard runtime feature macros, the same way the
/// vector kernels pick between AVX2 and scalar paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    pub fpu: bool,
    pub sse2: bool,
    pub avx2: bool,
    pub fma: bool,
    pub neon: bool,
    pub atomics64: bool,
}

impl CpuFeatures {
    pub fn detect() -> Self {
        #[allow(unused_mut)]
        let mut features = Self { atomics64: cfg!(target_has_atomic = "64"), ..Self::default() };

        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            features.fpu = true;
            features.sse2 = is_x86_feature_detected!("sse2");
            features.avx2 = is_x86_feature_detected!("avx2");
            features.fma = is_x86_feature_detected!("fma");
        }

        #[cfg(target_arch = "aarch64")]
        {
            features.fpu = true;
            features.neon = std::arch::is_aarch64_feature_detected!("neon");
        }

        features
    }

    /// Any vector unit at all.
    pub fn has_simd(&self) -> bool {
        self.sse2 || self.avx2 || self.neon
    }

    /// Packs the flags into a stable bit pattern for hardware fingerprints.
    pub fn bits(&self) -> u8 {
        (self.fpu as u8)
            | (self.sse2 as u8) << 1
            | (self.avx2 as u8) << 2
            | (self.fma as u8) << 3
            | (self.neon as u8) << 4
            | (self.atomics64 as u8) << 5
    }
}
