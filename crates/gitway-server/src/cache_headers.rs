//! HTTP cache headers for repository resources.
//!
//! Objects and packs are content-addressed and never change once written, so
//! they may be cached for a year. Anything that names mutable state (HEAD,
//! refs, alternates) must be revalidated on every request.

use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Duration, Utc};
use std::time::SystemTime;

/// How long immutable resources may be cached, in seconds.
pub const CACHE_FOREVER_SECS: i64 = 31_536_000;

const NO_CACHE_EXPIRES: &str = "Fri, 01 Jan 1980 00:00:00 GMT";
const NO_CACHE_CONTROL: &str = "no-cache, max-age=0, must-revalidate";
const CACHE_FOREVER_CONTROL: &str = "public, max-age=31536000";

/// Caching class of a served resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    /// Points at mutable state; never cache.
    Volatile,
    /// Content-addressed; cache forever.
    Immutable,
}

impl ResourceClass {
    /// Writes this class's cache headers into `headers`.
    pub fn apply(&self, headers: &mut HeaderMap) {
        match self {
            ResourceClass::Volatile => apply_no_cache(headers),
            ResourceClass::Immutable => apply_cache_forever(headers, Utc::now()),
        }
    }
}

/// Marks a response as uncacheable.
pub fn apply_no_cache(headers: &mut HeaderMap) {
    headers.insert(header::EXPIRES, HeaderValue::from_static(NO_CACHE_EXPIRES));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(NO_CACHE_CONTROL),
    );
}

/// Marks a response as cacheable for [`CACHE_FOREVER_SECS`] from `now`.
pub fn apply_cache_forever(headers: &mut HeaderMap, now: DateTime<Utc>) {
    let expires = now + Duration::seconds(CACHE_FOREVER_SECS);
    insert_date(headers, header::DATE, now);
    insert_date(headers, header::EXPIRES, expires);
    headers.remove(header::PRAGMA);
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(CACHE_FOREVER_CONTROL),
    );
}

/// Formats a timestamp as an RFC 7231 IMF-fixdate.
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Formats a filesystem timestamp as an HTTP-date.
pub fn http_date_from_system(time: SystemTime) -> String {
    http_date(DateTime::<Utc>::from(time))
}

fn insert_date(headers: &mut HeaderMap, name: header::HeaderName, time: DateTime<Utc>) {
    // An IMF-fixdate is always visible ASCII.
    if let Ok(value) = HeaderValue::from_str(&http_date(time)) {
        headers.insert(name, value);
    }
}
