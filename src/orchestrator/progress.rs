//! Progress checkpoints reported while a job moves through the pipeline.

pub const SEARCHING: u8 = 15;
pub const EXTRACT_START: u8 = 40;
pub const EXTRACT_END: u8 = 75;
pub const SCORING: u8 = 80;
pub const OUTREACH_START: u8 = 85;
pub const OUTREACH_END: u8 = 95;
pub const COMPLETED: u8 = 100;

/// Linear position inside `[start, end]` after `done` of `total` items.
pub fn scaled(start: u8, end: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return end;
    }
    let span = f64::from(end.saturating_sub(start));
    let fraction = done.min(total) as f64 / total as f64;
    start + (span * fraction).round() as u8
}
