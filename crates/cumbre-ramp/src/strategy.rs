//! Level sequences for ramp search.

use cumbre_core::Strategy;

/// Levels to try, in order, for `strategy` over `[start, max]`.
///
/// Callers validate the range first; an empty range yields no levels.
#[must_use]
pub fn levels(strategy: Strategy, start: u32, max: u32, step: u32) -> Vec<u32> {
    if start == 0 || start > max {
        return Vec::new();
    }
    match strategy {
        Strategy::Linear => linear(start, max, step.max(1)),
        Strategy::Exponential => exponential(start, max, step),
        Strategy::Binary => binary(start, max),
    }
}

fn linear(start: u32, max: u32, step: u32) -> Vec<u32> {
    (start..=max).step_by(step as usize).collect()
}

fn exponential(start: u32, max: u32, step: u32) -> Vec<u32> {
    let mut levels = Vec::new();
    let mut current = u64::from(start);
    while current <= u64::from(max) {
        levels.push(current as u32);
        // floor(current * 1.5) + step, always moving forward
        current = (current + current / 2 + u64::from(step)).max(current + 1);
    }
    levels
}

/// Brackets the range with its ends and midpoint, then fills in doublings
/// of `start` so the low end is covered densely.
fn binary(start: u32, max: u32) -> Vec<u32> {
    let mut levels = vec![start, start + (max - start) / 2, max];
    let mut doubled = u64::from(start) * 2;
    while doubled < u64::from(max) {
        levels.push(doubled as u32);
        doubled *= 2;
    }
    levels.sort_unstable();
    levels.dedup();
    levels
}
