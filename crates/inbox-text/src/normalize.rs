//! Text normalization used for comparing chunks.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Everything except letters, numbers and whitespace.
static STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\s]+").unwrap());

/// Everything except letters, numbers, punctuation and whitespace.
static STRIP_KEEP_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\p{P}\s]+").unwrap());

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Fold `text` into a comparable form.
///
/// Applies compatibility decomposition (so accents become separate marks and
/// ligatures split), drops everything that is not a letter, number or
/// whitespace (punctuation survives when `keep_punctuation` is set; symbols,
/// emoji and combining marks never do), lowercases, collapses whitespace runs
/// to one space and trims.
///
/// ```
/// use inbox_text::normalize;
///
/// assert_eq!(normalize("höhÖ  ﬀ²", false), "hoho ff2");
/// assert_eq!(normalize("3.14!", true), "3.14!");
/// ```
pub fn normalize(text: &str, keep_punctuation: bool) -> String {
    let decomposed: String = text.nfkd().collect();

    let strip = if keep_punctuation {
        &STRIP_KEEP_PUNCT
    } else {
        &STRIP
    };
    let filtered = strip.replace_all(&decomposed, "");
    let lowered = filtered.to_lowercase();
    let collapsed = WHITESPACE.replace_all(&lowered, " ");
    collapsed.trim().to_string()
}
