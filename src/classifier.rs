//! Content classification for language-aware routing
//!
//! Pure functions that measure how much of a text is written in Arabic script.
//! The router uses the result to steer Arabic-dominant requests to an
//! organization's language-specialized provider.

/// Default ratio at or above which a text counts as Arabic-dominant
pub const DEFAULT_ARABIC_THRESHOLD: f64 = 0.3;

/// Arabic (U+0600..U+06FF) and Arabic Supplement (U+0750..U+077F) blocks
fn is_arabic_char(c: char) -> bool {
    matches!(c, '\u{0600}'..='\u{06FF}' | '\u{0750}'..='\u{077F}')
}

/// Fraction of a text's characters that are Arabic script, in `[0, 1]`.
///
/// Whitespace separates words and is not counted in the denominator;
/// punctuation and digits are. Empty or whitespace-only input yields 0.
pub fn detect_arabic_content(text: &str) -> f64 {
    let (arabic, total) = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .fold((0usize, 0usize), |(arabic, total), c| {
            (arabic + usize::from(is_arabic_char(c)), total + 1)
        });

    if total == 0 {
        return 0.0;
    }

    arabic as f64 / total as f64
}

/// Same as [`detect_arabic_content`] but accepts a missing text
pub fn detect_arabic_content_opt(text: Option<&str>) -> f64 {
    text.map(detect_arabic_content).unwrap_or(0.0)
}

/// True when the Arabic ratio is at or above `threshold` (inclusive)
pub fn is_arabic_dominant(text: &str, threshold: f64) -> bool {
    detect_arabic_content(text) >= threshold
}

/// [`is_arabic_dominant`] with the default threshold of 0.3
pub fn is_arabic_dominant_default(text: &str) -> bool {
    is_arabic_dominant(text, DEFAULT_ARABIC_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pure_arabic_is_dominant() {
        let ratio = detect_arabic_content("مرحبا بكم");
        assert!(ratio > 0.9, "ratio was {ratio}");
        assert!(is_arabic_dominant_default("مرحبا بكم"));
    }

    #[test]
    fn test_latin_text_has_zero_ratio() {
        assert_eq!(detect_arabic_content("Hello World"), 0.0);
        assert!(!is_arabic_dominant_default("Hello World"));
    }

    #[test]
    fn test_mixed_text_ratio() {
        let ratio = detect_arabic_content("Hello مرحبا World العالم");
        assert!(ratio > 0.3 && ratio < 0.7, "ratio was {ratio}");
    }

    #[test]
    fn test_empty_and_missing_input() {
        assert_eq!(detect_arabic_content(""), 0.0);
        assert_eq!(detect_arabic_content("   \n\t"), 0.0);
        assert_eq!(detect_arabic_content_opt(None), 0.0);
        assert!(!is_arabic_dominant_default(""));
    }

    #[test]
    fn test_arabic_supplement_block_counts() {
        // U+0750 ARABIC LETTER BEH WITH THREE DOTS HORIZONTALLY BELOW
        assert_eq!(detect_arabic_content("\u{0750}\u{077F}"), 1.0);
    }

    #[test]
    fn test_whitespace_does_not_dilute_ratio() {
        assert_eq!(detect_arabic_content("مر ح\tب\nا"), 1.0);
        assert_eq!(detect_arabic_content("مر  ab"), 0.5);
    }

    #[test]
    fn test_digits_and_punctuation_dilute_ratio() {
        // 2 Arabic letters out of 4 counted characters
        assert_eq!(detect_arabic_content("مر12"), 0.5);
        assert_eq!(detect_arabic_content("مر!?"), 0.5);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(is_arabic_dominant("مر12", 0.5));
        assert!(!is_arabic_dominant("مر12", 0.51));
    }
}
