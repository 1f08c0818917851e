use chrono::NaiveDate;

/// Earliest year the bounded cache covers
const BASE_YEAR: i32 = 2019;

/// Years covered by the cache; dates outside fall back to chrono directly
const YEAR_SPAN: usize = 16;

const SLOTS: usize = YEAR_SPAN * 13 * 32;

/// Bounded `(year_offset, month, day) -> NaiveDate` cache.
///
/// Ingestion parses the same few thousand distinct dates millions of times;
/// this avoids repeating chrono's calendar validation on the hot path.
pub struct DateCache {
    slots: Vec<Option<NaiveDate>>,
}

impl Default for DateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DateCache {
    pub fn new() -> Self {
        Self {
            slots: vec![None; SLOTS],
        }
    }

    /// Resolve `(year, month, day)` to a date, caching within the covered span
    pub fn get(&mut self, year: i32, month: u32, day: u32) -> Option<NaiveDate> {
        if year < BASE_YEAR || month == 0 || month > 12 || day == 0 || day > 31 {
            return NaiveDate::from_ymd_opt(year, month, day);
        }
        let year_offset = (year - BASE_YEAR) as usize;
        if year_offset >= YEAR_SPAN {
            return NaiveDate::from_ymd_opt(year, month, day);
        }
        let slot = year_offset * 13 * 32 + month as usize * 32 + day as usize;
        if let Some(date) = self.slots[slot] {
            return Some(date);
        }
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        self.slots[slot] = Some(date);
        Some(date)
    }

    /// Parse `YYYY-MM-DD` through the cache. Partial dates (`YYYY-MM`,
    /// `YYYY`) resolve to the first day of the period; anything else is None.
    pub fn parse(&mut self, text: &str) -> Option<NaiveDate> {
        let mut parts = text.splitn(3, '-');
        let year: i32 = parts.next()?.parse().ok()?;
        let month: u32 = match parts.next() {
            Some(m) => m.parse().ok()?,
            None => 1,
        };
        let day: u32 = match parts.next() {
            Some(d) => d.parse().ok()?,
            None => 1,
        };
        self.get(year, month, day)
    }
}

/// Parse a date without a cache, for query-side use where the same date is
/// seen once. Accepts `YYYY-MM-DD` and the partial forms `YYYY-MM` and
/// `YYYY`, resolving to the first day of the period.
pub fn parse_date_flexible(text: &str) -> Option<NaiveDate> {
    let mut parts = text.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 1,
    };
    let day: u32 = match parts.next() {
        Some(d) => d.parse().ok()?,
        None => 1,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Does this token look like a date (`YYYY-MM-DD` or `YYYY-MM`)?
pub fn looks_like_date(text: &str) -> bool {
    let mut dashes = 0;
    for b in text.bytes() {
        match b {
            b'0'..=b'9' => {}
            b'-' => dashes += 1,
            _ => return false,
        }
    }
    (1..=2).contains(&dashes) && text.len() >= 6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_and_miss() {
        let mut cache = DateCache::new();
        let a = cache.get(2021, 2, 1).unwrap();
        let b = cache.get(2021, 2, 1).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, NaiveDate::from_ymd_opt(2021, 2, 1).unwrap());
    }

    #[test]
    fn test_invalid_dates() {
        let mut cache = DateCache::new();
        assert!(cache.get(2021, 2, 30).is_none());
        assert!(cache.get(2021, 13, 1).is_none());
        assert!(cache.get(2021, 0, 1).is_none());
    }

    #[test]
    fn test_out_of_span_falls_back() {
        let mut cache = DateCache::new();
        assert!(cache.get(1999, 1, 1).is_some());
        assert!(cache.get(2100, 6, 15).is_some());
    }

    #[test]
    fn test_parse_partial() {
        let mut cache = DateCache::new();
        assert_eq!(
            cache.parse("2021-03"),
            NaiveDate::from_ymd_opt(2021, 3, 1)
        );
        assert_eq!(cache.parse("2021"), NaiveDate::from_ymd_opt(2021, 1, 1));
        assert!(cache.parse("not-a-date").is_none());
    }

    #[test]
    fn test_looks_like_date() {
        assert!(looks_like_date("2021-02-01"));
        assert!(looks_like_date("2021-02"));
        assert!(!looks_like_date("2021"));
        assert!(!looks_like_date("N501Y"));
        assert!(!looks_like_date("12-34-56-78"));
    }
}
