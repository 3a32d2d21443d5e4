//! Legacy CSV-backed coupon cache (Algorithm E, spec.md §4.9).
//!
//! Ported from `original_source/web_api/services/code_sheet.py`: a
//! process-wide `code -> SheetCode` map with a TTL, refreshed from a CSV
//! fetched over HTTP(S) or read from a local file. Header names are
//! matched against an alias list (English and the original deployment's
//! Chinese column headers) so the sheet can be edited by non-engineers.
//! This is the secondary coupon path; the primary path is
//! `clapper_store`'s `coupon_codes` table via [`crate::billing`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetCode {
    pub code: String,
    pub credits: i64,
    pub max_uses: Option<i64>,
    pub expires_at: Option<String>,
    pub status: String,
    pub source: Option<String>,
}

impl SheetCode {
    /// Parse the free-form `expires_at` column into a unix timestamp —
    /// RFC3339, or a bare `YYYY-MM-DD` date treated as end-of-day UTC.
    pub fn expires_at_unix(&self) -> Option<i64> {
        let raw = self.expires_at.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
            return Some(dt.timestamp());
        }
        chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(23, 59, 59))
            .map(|dt| dt.and_utc().timestamp())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("coupon code csv source is not configured")]
    NotConfigured,
    #[error("failed to fetch coupon csv: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("failed to read coupon csv: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse coupon csv: {0}")]
    Csv(#[from] csv::Error),
}

struct Cache {
    expires_at: Option<Instant>,
    by_code: HashMap<String, SheetCode>,
}

/// Process-wide cache, guarded the way `code_sheet.py`'s module-level
/// `_CACHE_LOCK` guards its dict: one lock, refreshed under contention by
/// whichever caller loses the race (the refreshed map is idempotent).
pub struct CouponSheet {
    http: reqwest::Client,
    source: Option<String>,
    ttl: Duration,
    cache: Mutex<Cache>,
}

impl CouponSheet {
    pub fn new(local_csv: Option<String>, csv_url: Option<String>, cache_seconds: u64) -> Self {
        CouponSheet {
            http: reqwest::Client::new(),
            source: csv_url.or(local_csv),
            ttl: Duration::from_secs(cache_seconds.max(5)),
            cache: Mutex::new(Cache { expires_at: None, by_code: HashMap::new() }),
        }
    }

    /// `get_sheet_code(code)`: normalize then look up, refreshing the
    /// cache first if it has expired.
    pub async fn get(&self, code: &str) -> Result<Option<SheetCode>, SheetError> {
        let normalized = code.trim().to_uppercase();
        if normalized.is_empty() {
            return Ok(None);
        }
        let map = self.load_with_cache().await?;
        Ok(map.get(&normalized).cloned())
    }

    async fn load_with_cache(&self) -> Result<HashMap<String, SheetCode>, SheetError> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(expires_at) = cache.expires_at {
                if Instant::now() < expires_at && !cache.by_code.is_empty() {
                    return Ok(cache.by_code.clone());
                }
            }
        }

        let source = self.source.as_deref().ok_or(SheetError::NotConfigured)?;
        let raw = self.fetch_raw(source).await?;
        let mapping = parse_csv(&raw)?;

        let mut cache = self.cache.lock().unwrap();
        cache.by_code = mapping.clone();
        cache.expires_at = Some(Instant::now() + self.ttl);
        Ok(mapping)
    }

    async fn fetch_raw(&self, source: &str) -> Result<String, SheetError> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let bytes = self
                .http
                .get(source)
                .timeout(Duration::from_secs(6))
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?;
            Ok(strip_bom(&String::from_utf8_lossy(&bytes)))
        } else {
            let path = source.strip_prefix("file://").unwrap_or(source);
            let raw = tokio::fs::read_to_string(path).await?;
            Ok(strip_bom(&raw))
        }
    }
}

fn strip_bom(s: &str) -> String {
    s.strip_prefix('\u{feff}').unwrap_or(s).to_string()
}

fn pick<'a>(record: &'a csv::StringRecord, headers: &csv::StringRecord, keys: &[&str]) -> Option<&'a str> {
    for key in keys {
        if let Some(idx) = headers.iter().position(|h| h == *key) {
            if let Some(value) = record.get(idx) {
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
    }
    None
}

fn parse_csv(raw: &str) -> Result<HashMap<String, SheetCode>, SheetError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(raw.as_bytes());
    let headers = reader.headers()?.clone();

    let mut result = HashMap::new();
    for record in reader.records() {
        let record = record?;
        if let Some(item) = parse_row(&record, &headers) {
            result.insert(item.code.clone(), item);
        }
    }
    Ok(result)
}

fn parse_row(record: &csv::StringRecord, headers: &csv::StringRecord) -> Option<SheetCode> {
    let code = pick(record, headers, &["code", "coupon_code", "邀请码", "兑换码"])?
        .trim()
        .to_uppercase();
    if code.is_empty() {
        return None;
    }

    let credits: i64 = pick(record, headers, &["credits", "额度", "次数"])
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    if credits <= 0 {
        return None;
    }

    let max_uses = pick(record, headers, &["max_uses", "max_redemptions", "最大使用次数"])
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0);

    let expires_at = pick(record, headers, &["expires_at", "过期时间"]).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let status = pick(record, headers, &["status", "状态"])
        .map(|v| v.trim().to_uppercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "ACTIVE".to_string());
    let source = pick(record, headers, &["source", "渠道", "来源"]).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    Some(SheetCode { code, credits, max_uses, expires_at, status, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_english_headers() {
        let csv_text = "code,credits,max_uses,expires_at,status,source\nABC123,5,10,,ACTIVE,promo\n";
        let mapping = parse_csv(csv_text).unwrap();
        let entry = mapping.get("ABC123").unwrap();
        assert_eq!(entry.credits, 5);
        assert_eq!(entry.max_uses, Some(10));
        assert_eq!(entry.status, "ACTIVE");
    }

    #[test]
    fn parses_chinese_header_aliases() {
        let csv_text = "邀请码,额度\nXYZ999,3\n";
        let mapping = parse_csv(csv_text).unwrap();
        assert_eq!(mapping.get("XYZ999").unwrap().credits, 3);
    }

    #[test]
    fn rows_with_non_positive_credits_are_dropped() {
        let csv_text = "code,credits\nBAD1,0\nBAD2,-5\nGOOD,2\n";
        let mapping = parse_csv(csv_text).unwrap();
        assert_eq!(mapping.len(), 1);
        assert!(mapping.contains_key("GOOD"));
    }

    #[test]
    fn code_is_normalized_to_uppercase() {
        let csv_text = "code,credits\nlower,1\n";
        let mapping = parse_csv(csv_text).unwrap();
        assert!(mapping.contains_key("LOWER"));
    }

    #[test]
    fn expires_at_unix_parses_bare_date_and_rfc3339() {
        let bare = SheetCode {
            code: "A".into(),
            credits: 1,
            max_uses: None,
            expires_at: Some("2024-01-01".into()),
            status: "ACTIVE".into(),
            source: None,
        };
        assert!(bare.expires_at_unix().is_some());

        let rfc3339 = SheetCode { expires_at: Some("2024-01-01T00:00:00Z".into()), ..bare.clone() };
        assert!(rfc3339.expires_at_unix().is_some());

        let none = SheetCode { expires_at: None, ..bare };
        assert!(none.expires_at_unix().is_none());
    }
}
