use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static regex::Regex {
            static R: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
            R.get_or_init(|| regex::Regex::new($pat).expect("invalid regex"))
        }
    };
}
pub(crate) use re;

/// Levenshtein edit distance over chars, using the two-row O(min(m,n)) space algorithm.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    let (m, n) = (a.len(), b.len());

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    // Keep the shorter string in the inner loop to minimise allocation.
    let (a, b, m, n) = if m <= n { (a, b, m, n) } else { (b, a, n, m) };

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Edit-distance similarity in [0.0, 1.0]; two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein_distance(a, b) as f64 / max_len as f64)
}

/// Parses a statement amount into signed minor units.
///
/// Accepts thousands separators, currency markers, accounting parentheses, a
/// leading minus and a trailing `CR`/`DR` marker. Returns `None` for blanks and
/// anything that is not a number.
pub fn parse_amount(s: &str) -> Option<i64> {
    let mut s = s.trim().to_string();
    if s.is_empty() || s == "-" {
        return None;
    }

    let mut negative = false;
    let upper = s.to_ascii_uppercase();
    if upper.ends_with("DR") {
        negative = true;
        s.truncate(s.len() - 2);
    } else if upper.ends_with("CR") {
        s.truncate(s.len() - 2);
    }

    let mut s = s.trim().to_string();
    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        negative = !negative;
        s = s[1..s.len() - 1].to_string();
    }

    let cleaned: String = s
        .replace("NGN", "")
        .replace("ngn", "")
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '₦' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let mut dec = Decimal::from_str(&cleaned).ok()?;
    if negative {
        dec = -dec.abs();
    }
    dec.checked_mul(Decimal::from(100))?.round().to_i64()
}

/// Date layouts seen on statements, day-first before month-first.
pub const FALLBACK_DATE_FORMATS: &[&str] = &[
    "%d-%b-%y", "%d-%b-%Y", "%d %b %Y", "%d %b %y", "%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y",
    "%d/%m/%y", "%m/%d/%Y", "%Y/%m/%d",
];

/// Tries the preferred formats first, then the fallbacks.
pub fn parse_date(s: &str, preferred: &[String]) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    preferred
        .iter()
        .map(String::as_str)
        .chain(FALLBACK_DATE_FORMATS.iter().copied())
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}
