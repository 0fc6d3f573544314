//! Number Locator: finds the first numeral in a post.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::NumberMatch;

/// Optional `-`, ASCII digits, optional `.` followed by at least one digit.
const NUMERAL_PATTERN: &str = r"-?[0-9]+(?:\.[0-9]+)?";

fn numeral_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(NUMERAL_PATTERN).expect("valid regex"))
}

/// Return the leftmost, maximal numeral in `text`, if any.
///
/// The regex engine yields the leftmost match and the greedy repetitions make
/// it maximal: a digit directly before `start` would have started an earlier
/// match, and the digit/fraction runs consume everything that could extend it.
pub fn locate(text: &str) -> Option<NumberMatch> {
    let m = numeral_re().find(text)?;
    let raw = m.as_str();
    // Grammar guarantees a valid float literal; only overflow to inf is possible.
    let value = raw.parse::<f64>().ok()?;
    Some(NumberMatch {
        start: m.start(),
        end: m.end(),
        raw: raw.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_integer_inside_persian_text() {
        let text = "قیمت امروز 7260 تومان است 🔥";
        let m = locate(text).unwrap();
        assert_eq!(m.raw, "7260");
        assert_eq!(m.value, 7260.0);
        assert_eq!(&text[m.start..m.end], "7260");
    }

    #[test]
    fn returns_leftmost_signed_decimal() {
        let m = locate("-15.5 then 20").unwrap();
        assert_eq!(m.raw, "-15.5");
        assert_eq!(m.value, -15.5);
        assert_eq!((m.start, m.end), (0, 5));
    }

    #[test]
    fn absent_for_empty_or_digitless_text() {
        assert!(locate("").is_none());
        assert!(locate("no digits here").is_none());
        assert!(locate("- . -.").is_none());
    }

    #[test]
    fn match_is_maximal() {
        assert_eq!(locate("abc123456def").unwrap().raw, "123456");
        assert_eq!(locate("x 3.14159 y").unwrap().raw, "3.14159");
    }

    #[test]
    fn trailing_dot_is_not_part_of_numeral() {
        let m = locate("costs 12. today").unwrap();
        assert_eq!(m.raw, "12");
        let m = locate("v1.2.3").unwrap();
        assert_eq!(m.raw, "1.2");
    }

    #[test]
    fn leading_dot_is_not_consumed() {
        let m = locate("rate .75").unwrap();
        assert_eq!(m.raw, "75");
    }

    #[test]
    fn dash_between_numbers_binds_to_the_second() {
        let m = locate("5-3").unwrap();
        assert_eq!(m.raw, "5");
        let m = locate("range: a-7").unwrap();
        assert_eq!(m.raw, "-7");
    }

    #[test]
    fn non_ascii_digits_are_ignored() {
        assert!(locate("۷۲۶۰ تومان").is_none());
        assert_eq!(locate("۷۲۶۰ or 42").unwrap().raw, "42");
    }

    #[test]
    fn offsets_are_byte_offsets_after_multibyte_prefix() {
        let text = "🔥🔥 99";
        let m = locate(text).unwrap();
        assert_eq!(m.start, "🔥🔥 ".len());
        assert_eq!(m.end, text.len());
    }
}
