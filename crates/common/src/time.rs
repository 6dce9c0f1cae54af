//! JST time utilities
//!
//! All record timestamps are ISO-8601 strings in Japan Standard Time. JST has
//! no daylight saving, so a fixed +09:00 offset is sufficient.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use sha2::{Digest, Sha256};

const JST_OFFSET_SECS: i32 = 9 * 3600;

fn jst() -> FixedOffset {
    FixedOffset::east_opt(JST_OFFSET_SECS).expect("valid JST offset")
}

/// Current time in JST
pub fn now_jst() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&jst())
}

/// Current time in JST as an ISO-8601 string
pub fn now_jst_iso() -> String {
    now_jst().to_rfc3339()
}

/// Today's date in JST as YYYY-MM-DD
pub fn today_jst_ymd() -> String {
    now_jst().format("%Y-%m-%d").to_string()
}

/// JST time `days` from now as an ISO-8601 string
pub fn add_days_jst_iso(days: i64) -> String {
    (now_jst() + Duration::days(days)).to_rfc3339()
}

/// Whether a stored ISO-8601 deadline has elapsed.
///
/// An unparsable or missing deadline counts as expired.
pub fn is_expired(until_iso: &str) -> bool {
    match DateTime::parse_from_rfc3339(until_iso.trim()) {
        Ok(until) => now_jst() > until,
        Err(_) => true,
    }
}

/// Normalize a planned date to YYYY-MM-DD, accepting YYYY/MM/DD input.
pub fn normalize_ymd(s: &str) -> String {
    let s = s.trim();
    if s.contains('/') && s.len() >= 10 {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() >= 3 {
            return format!(
                "{:0>4}-{:0>2}-{:0>2}",
                parts[0].trim(),
                parts[1].trim(),
                parts[2].trim()
            );
        }
    }
    s.to_string()
}

/// Derive a stable article id from the planned date and keyword.
///
/// Format: `ART-YYYYMMDD-xxxxxx` where the suffix is the first six hex chars
/// of the keyword's SHA-256. The id is immutable after creation; re-starting
/// the same keyword on the same date addresses the same record.
pub fn generate_article_id(keyword: &str, planned_date: &str) -> String {
    let ymd = normalize_ymd(planned_date).replace('-', "");
    let digest = Sha256::digest(keyword.trim().as_bytes());
    let suffix = hex::encode(&digest[..3]);
    format!("ART-{}-{}", ymd, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ymd_accepts_slashes() {
        assert_eq!(normalize_ymd("2024/06/01"), "2024-06-01");
        assert_eq!(normalize_ymd("2024-06-01"), "2024-06-01");
        assert_eq!(normalize_ymd("  2024-06-01 "), "2024-06-01");
    }

    #[test]
    fn test_article_id_is_stable() {
        let a = generate_article_id("高血圧", "2024-06-01");
        let b = generate_article_id("高血圧", "2024/06/01");
        assert_eq!(a, b);
        assert!(a.starts_with("ART-20240601-"));
        assert_eq!(a.len(), "ART-20240601-".len() + 6);
    }

    #[test]
    fn test_article_id_differs_by_keyword() {
        let a = generate_article_id("高血圧", "2024-06-01");
        let b = generate_article_id("糖尿病", "2024-06-01");
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_expired_garbage_counts_as_expired() {
        assert!(is_expired("not a timestamp"));
        assert!(is_expired(""));
    }

    #[test]
    fn test_is_expired_future_deadline() {
        let until = add_days_jst_iso(7);
        assert!(!is_expired(&until));
        let past = (now_jst() - Duration::days(1)).to_rfc3339();
        assert!(is_expired(&past));
    }
}
