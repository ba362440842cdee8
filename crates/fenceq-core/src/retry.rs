//! Retry backoff (§4.6, §9 open question).
//!
//! The source's formula produces 2, 4, 8, 16, 30, 30 ... — note the floor at
//! `2^1 = 2` even for the first retry (`new_attempts = 1`). Preserved as-is;
//! see DESIGN.md.

const DEFAULT_CAP_SECONDS: i64 = 30;

/// Seconds to wait before a job with `new_attempts` completed attempts
/// becomes eligible again.
pub fn retry_delay_seconds(new_attempts: i32) -> i64 {
    retry_delay_seconds_with_cap(new_attempts, DEFAULT_CAP_SECONDS)
}

pub fn retry_delay_seconds_with_cap(new_attempts: i32, cap_seconds: i64) -> i64 {
    let exponent = new_attempts.max(1) as u32;
    let delay = 2i64.saturating_pow(exponent);
    delay.min(cap_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floors_at_two_seconds_even_on_first_retry() {
        assert_eq!(retry_delay_seconds(1), 2);
    }

    #[test]
    fn doubles_until_the_cap() {
        assert_eq!(retry_delay_seconds(2), 4);
        assert_eq!(retry_delay_seconds(3), 8);
        assert_eq!(retry_delay_seconds(4), 16);
        assert_eq!(retry_delay_seconds(5), 30);
        assert_eq!(retry_delay_seconds(6), 30);
    }

    #[test]
    fn custom_cap_is_honored() {
        assert_eq!(retry_delay_seconds_with_cap(10, 5), 5);
    }
}
