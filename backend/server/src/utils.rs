use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use regex::Regex;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Slug used when a trip name has nothing addressable left.
pub const FALLBACK_SLUG: &str = "viaje";

pub const JOIN_CODE_LEN: usize = 6;
const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

static NOT_ADDRESSABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("static pattern"));

static DATE_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static pattern"));

/// Topic-safe slug of a trip name.
///
/// Diacritics are stripped (NFD, combining marks dropped), every run of characters outside
/// `[A-Za-z0-9_-]` becomes a single `-`, and leading/trailing dashes are trimmed.
pub fn slugify(name: &str) -> String {
    let stripped: String = name.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let replaced = NOT_ADDRESSABLE.replace_all(&stripped, "-");
    let slug = replaced.trim_matches('-');

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

/// Random join code over an alphabet without look-alike characters (no I, O, 0, 1).
pub fn join_code() -> String {
    let mut rng = rand::thread_rng();

    (0..JOIN_CODE_LEN)
        .map(|_| JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp, keeping the UTC calendar date.
pub fn parse_date_only(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();

    if DATE_ONLY.is_match(raw) {
        return NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok();
    }

    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc).date_naive())
}

/// Inclusive containment of `[start, end]` in `[range_start, range_end]`.
pub fn within_range(
    start: NaiveDate,
    end: NaiveDate,
    range_start: NaiveDate,
    range_end: NaiveDate,
) -> bool {
    start >= range_start && end <= range_end
}
