use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::util::re;

// ── Compiled regex cache ─────────────────────────────────────────────────────

// Bank tags that are glued straight onto the sender name.
re!(re_glued_prefix, r"(?i)^\s*FBN\s*MOBILE[\s/:\-]*");
// Channel and transaction-type codes followed by a separator.
re!(re_channel_prefix,
    r"(?i)^\s*(?:MOBILE|NIP|WTRNS|WEB|USSD|TRF|TRANSFER|POS|ATM|IB|FIP)(?:\s+(?:FROM|TO)\b)?(?:[\s/:\-]+|$)");
re!(re_from_to, r"(?i)^\s*(?:FROM|TO)\s+");
re!(re_reference_label, r"(?i)\bREF[:\s]*[A-Z0-9/\-]+");
re!(re_long_number, r"\b\d{6,}\b");
re!(re_punctuation, r"[^\p{L}\p{N}\s'&\-.]");
re!(re_spaces, r"\s+");

re!(re_ref_labelled, r"(?i)\bref(?:erence)?[:\s]*([A-Z0-9/\-]{4,})");
re!(re_ref_trf, r"(?i)\btrf[:/]?\s*([A-Z0-9]{4,})");
re!(re_ref_code, r"\b([A-Z]{2,}\d+[A-Z0-9]*)\b");

/// A narration reduced to the sender-like part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedNarration {
    /// Readable form, e.g. "John Doe".
    pub display: String,
    /// Lowercase alphanumeric words, the form aliases are stored under.
    pub key: String,
}

impl NormalizedNarration {
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

/// Lowercase alphanumeric words joined by single spaces.
pub fn narration_key(s: &str) -> String {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_prefixes(mut s: String, extra_prefixes: &[Regex]) -> String {
    loop {
        let before = s.len();
        for re in [re_glued_prefix(), re_channel_prefix(), re_from_to()]
            .into_iter()
            .chain(extra_prefixes.iter())
        {
            s = re.replace(&s, "").into_owned();
        }
        if s.len() == before || s.trim().is_empty() {
            return s;
        }
    }
}

/// Picks the `/`-separated segment carrying the most letters; the others are
/// bank codes, account numbers and channel suffixes.
fn sender_segment(s: &str) -> &str {
    let letters = |seg: &str| seg.chars().filter(|c| c.is_alphabetic()).count();
    s.split('/')
        .fold(("", 0usize), |best, seg| {
            let n = letters(seg);
            if n > best.1 {
                (seg, n)
            } else {
                best
            }
        })
        .0
}

fn title_case_word(word: &str) -> String {
    let letters: Vec<char> = word.chars().filter(|c| c.is_alphabetic()).collect();
    let all_caps = letters.len() >= 2 && letters.iter().all(|c| c.is_uppercase());
    if !all_caps {
        return word.to_string();
    }
    let mut out = String::with_capacity(word.len());
    let mut start = true;
    for c in word.chars() {
        if start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
            start = false;
        } else if c.is_alphabetic() {
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
            start = matches!(c, '-' | '\'');
        }
    }
    out
}

/// Compiles configured prefixes into anchored, case-insensitive patterns.
pub fn compile_prefixes(prefixes: &[String]) -> Vec<Regex> {
    prefixes
        .iter()
        .filter(|p| !p.trim().is_empty())
        .filter_map(|p| Regex::new(&format!(r"(?i)^\s*{}(?:[\s/:\-]+|$)", regex::escape(p.trim()))).ok())
        .collect()
}

/// Strips channel prefixes, code segments and reference numbers from a raw
/// narration and title-cases shouted names.
pub fn normalize_narration(raw: &str, extra_prefixes: &[Regex]) -> NormalizedNarration {
    let stripped = strip_prefixes(raw.trim().to_string(), extra_prefixes);
    let segment = sender_segment(&stripped);
    let without_refs = re_reference_label().replace_all(segment, " ");
    let without_numbers = re_long_number().replace_all(&without_refs, " ");
    let cleaned = re_punctuation().replace_all(&without_numbers, " ");
    let collapsed = re_spaces().replace_all(cleaned.trim(), " ");
    let collapsed = collapsed.trim_matches(|c: char| c == '-' || c == '.' || c.is_whitespace());

    let display = collapsed
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ");
    let key = narration_key(&display);
    NormalizedNarration { display, key }
}

/// Finds a bank reference in free text. Only tokens containing a digit count.
pub fn extract_reference(narration: &str) -> Option<String> {
    [re_ref_labelled(), re_ref_trf(), re_ref_code()]
        .into_iter()
        .flat_map(|re| re.captures_iter(narration).collect::<Vec<_>>())
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim_matches('/').to_string()))
        .find(|candidate| candidate.chars().any(|c| c.is_ascii_digit()))
}
