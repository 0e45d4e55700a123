use std::time::{Duration, Instant};

/// Upper bound on spin iterations per sample so a frozen clock cannot hang the probe.
const MAX_SPINS: u32 = 1_000_000;

/// Measures the smallest observable step of the monotonic clock.
///
/// Returns `None` if the clock never advanced within the spin budget.
pub fn timer_resolution(samples: u32) -> Option<Duration> {
    let mut best: Option<Duration> = None;

    for _ in 0..samples.max(1) {
        let start = Instant::now();
        let mut spins = 0;
        let step = loop {
            let now = Instant::now();
            if now > start {
                break Some(now - start);
            }
            spins += 1;
            if spins >= MAX_SPINS {
                break None;
            }
        };

        if let Some(step) = step {
            best = Some(best.map_or(step, |b| b.min(step)));
        }
    }

    best
}
