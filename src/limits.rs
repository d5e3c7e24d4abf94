//! Resource limits and safe-value clamping shared by both tiers.

use std::time::Duration;

pub const MAX_URL_LENGTH: usize = 2048;

pub const MIN_SCRAPING_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_SCRAPING_TIMEOUT_SECS: u64 = 30;
pub const MAX_SCRAPING_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_PROCESSING_TIMEOUT_SECS: u64 = 60;
pub const MAX_PROCESSING_TIMEOUT_SECS: u64 = 120;

pub const MAX_IMAGE_URLS: usize = 20;
pub const MAX_IMAGES_TO_PROCESS: usize = 10;
pub const DEFAULT_MAX_IMAGES: usize = 5;
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_IMAGE_DIMENSION: u32 = 4096;
pub const DEFAULT_THUMBNAIL_SIZE: (u32, u32) = (150, 150);
pub const MAX_THUMBNAIL_DIMENSION: u32 = 500;

pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 100;
pub const DEFAULT_QUALITY: u8 = 85;

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 32;
pub const DEFAULT_WORKERS: usize = 4;

pub const DEFAULT_SCRAPING_PORT: u16 = 8000;
pub const DEFAULT_PROCESSING_PORT: u16 = 9000;

/// Capacity of the front tier's pending work queue.
pub const MAX_QUEUE_SIZE: usize = 1000;
/// Default number of task records kept in memory.
pub const DEFAULT_MAX_TASKS: usize = 1000;

/// Largest frame payload either tier will accept.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Clamp a requested timeout (seconds) into `[MIN_SCRAPING_TIMEOUT_SECS, max]`.
///
/// Missing or too-small values fall back to `default`, oversized values are
/// capped at `max`.
pub fn safe_timeout(requested: Option<u64>, max: u64, default: u64) -> Duration {
    let secs = match requested {
        Some(t) if t < MIN_SCRAPING_TIMEOUT_SECS => default,
        Some(t) if t > max => max,
        Some(t) => t,
        None => default,
    };
    Duration::from_secs(secs)
}

pub fn safe_quality(requested: Option<i64>) -> u8 {
    match requested {
        None => DEFAULT_QUALITY,
        Some(q) => q.clamp(MIN_QUALITY as i64, MAX_QUALITY as i64) as u8,
    }
}

/// Clamp thumbnail dimensions into `1..=max_dim` on each axis.
pub fn safe_dimension(requested: Option<(i64, i64)>, max_dim: u32) -> (u32, u32) {
    match requested {
        None => DEFAULT_THUMBNAIL_SIZE,
        Some((w, h)) => (
            w.clamp(1, max_dim as i64) as u32,
            h.clamp(1, max_dim as i64) as u32,
        ),
    }
}

pub fn safe_max_images(requested: Option<i64>) -> usize {
    match requested {
        None => DEFAULT_MAX_IMAGES,
        Some(n) => n.clamp(1, MAX_IMAGES_TO_PROCESS as i64) as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_timeout_bounds() {
        assert_eq!(safe_timeout(None, 60, 30), Duration::from_secs(30));
        assert_eq!(safe_timeout(Some(1), 60, 30), Duration::from_secs(30));
        assert_eq!(safe_timeout(Some(45), 60, 30), Duration::from_secs(45));
        assert_eq!(safe_timeout(Some(600), 60, 30), Duration::from_secs(60));
    }

    #[test]
    fn test_safe_quality_and_images() {
        assert_eq!(safe_quality(None), 85);
        assert_eq!(safe_quality(Some(0)), 1);
        assert_eq!(safe_quality(Some(250)), 100);
        assert_eq!(safe_max_images(Some(50)), MAX_IMAGES_TO_PROCESS);
        assert_eq!(safe_max_images(Some(-3)), 1);
    }

    #[test]
    fn test_safe_dimension() {
        assert_eq!(safe_dimension(None, 500), (150, 150));
        assert_eq!(safe_dimension(Some((0, 9000)), 500), (1, 500));
    }
}
