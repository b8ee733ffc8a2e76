//! Album-level progress arithmetic.
//!
//! Pure functions shared by the aggregator and its tests: expected image
//! totals, running percentage, and the remaining-time estimate reported
//! to observers.

use std::time::Duration;

/// Images produced per 2x2 composite.
pub const IMAGES_PER_GRID: usize = 4;

/// Variation composites spawned per successful draft.
pub const VARIATIONS_PER_DRAFT: usize = 4;

/// Granularity of the remaining-time estimate.
const ESTIMATE_ROUNDING_SECS: u64 = 60;

/// Expected number of final images for a run.
///
/// Each prompt yields one 2x2 grid (4 images); with variations enabled,
/// each of the four quadrants additionally yields its own grid:
/// `4 * N` without variations, `20 * N` with them. Upscales replace
/// grid quadrants one-for-one and do not change the total.
pub fn total_images(prompt_count: usize, want_variations: bool) -> usize {
    let base = prompt_count * IMAGES_PER_GRID;
    if want_variations {
        base + base * VARIATIONS_PER_DRAFT
    } else {
        base
    }
}

/// Running completion percentage.
pub fn percentage(done: usize, total: usize) -> f32 {
    if total == 0 {
        return 100.0;
    }
    done as f32 * 100.0 / total as f32
}

/// Estimated time remaining, extrapolated from the average time per
/// image so far and rounded to whole minutes. `None` until the first
/// image lands.
pub fn estimated_remaining(elapsed: Duration, done: usize, total: usize) -> Option<Duration> {
    if done == 0 {
        return None;
    }
    let average = elapsed / done as u32;
    let remaining = average * total.saturating_sub(done) as u32;
    Some(round_to_minute(remaining))
}

fn round_to_minute(duration: Duration) -> Duration {
    let minutes = (duration.as_secs() + ESTIMATE_ROUNDING_SECS / 2) / ESTIMATE_ROUNDING_SECS;
    Duration::from_secs(minutes * ESTIMATE_ROUNDING_SECS)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- total_images -----------------------------------------------------

    #[test]
    fn total_without_variations() {
        assert_eq!(total_images(2, false), 8);
        assert_eq!(total_images(5, false), 20);
    }

    #[test]
    fn total_with_variations() {
        assert_eq!(total_images(2, true), 40);
        assert_eq!(total_images(1, true), 20);
    }

    #[test]
    fn total_empty_prompt_list() {
        assert_eq!(total_images(0, true), 0);
    }

    // -- percentage -------------------------------------------------------

    #[test]
    fn percentage_half_done() {
        assert_eq!(percentage(4, 8), 50.0);
    }

    #[test]
    fn percentage_complete() {
        assert_eq!(percentage(8, 8), 100.0);
    }

    #[test]
    fn percentage_zero_total_is_complete() {
        assert_eq!(percentage(0, 0), 100.0);
    }

    // -- estimated_remaining ----------------------------------------------

    #[test]
    fn estimate_none_before_first_image() {
        assert_eq!(estimated_remaining(Duration::from_secs(30), 0, 8), None);
    }

    #[test]
    fn estimate_extrapolates_average() {
        // 4 images in 4 minutes -> 1 min/image -> 4 remaining = 4 minutes.
        let estimate = estimated_remaining(Duration::from_secs(240), 4, 8);
        assert_eq!(estimate, Some(Duration::from_secs(240)));
    }

    #[test]
    fn estimate_rounds_to_whole_minutes() {
        // 3 images in 100s -> ~33s/image -> 5 remaining = ~166s -> 3 min.
        let estimate = estimated_remaining(Duration::from_secs(100), 3, 8);
        assert_eq!(estimate, Some(Duration::from_secs(180)));
    }

    #[test]
    fn estimate_zero_when_done() {
        let estimate = estimated_remaining(Duration::from_secs(600), 8, 8);
        assert_eq!(estimate, Some(Duration::ZERO));
    }
}
