//! Message Composer: splices the transformed numeral back into the post.

use crate::domain::NumberMatch;

/// Replace exactly `text[m.start..m.end]` with `formatted`.
///
/// Everything outside the span is copied byte-for-byte, so emoji, line breaks
/// and bidi markers around the numeral survive untouched. Returns `None` if the
/// match does not describe a valid span of `text`.
pub fn compose(text: &str, m: &NumberMatch, formatted: &str) -> Option<String> {
    let head = text.get(..m.start)?;
    let tail = text.get(m.end..)?;
    if m.start >= m.end {
        return None;
    }

    let mut out = String::with_capacity(head.len() + formatted.len() + tail.len());
    out.push_str(head);
    out.push_str(formatted);
    out.push_str(tail);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{numeral::locate, transform::transform};

    fn run(text: &str) -> Option<String> {
        let m = locate(text)?;
        compose(text, &m, &transform(m.value)?)
    }

    #[test]
    fn persian_post_is_rewritten_in_place() {
        assert_eq!(
            run("قیمت امروز 7260 تومان است 🔥").as_deref(),
            Some("قیمت امروز 2000.00 تومان است 🔥")
        );
    }

    #[test]
    fn only_first_numeral_changes() {
        assert_eq!(run("-15.5 then 20").as_deref(), Some("-4.27 then 20"));
    }

    #[test]
    fn repeated_numeral_later_in_text_is_preserved() {
        // The later "7260" must not be touched even though it is textually equal.
        assert_eq!(
            run("buy 7260\nsell 7260").as_deref(),
            Some("buy 2000.00\nsell 7260")
        );
    }

    #[test]
    fn surrounding_bytes_are_identical() {
        let text = "\u{200F}📈 نرخ:\n  363  \r\n✅\u{200E}";
        let m = locate(text).unwrap();
        let out = compose(text, &m, "100.00").unwrap();

        assert_eq!(&out.as_bytes()[..m.start], &text.as_bytes()[..m.start]);
        let tail_len = text.len() - m.end;
        assert_eq!(
            &out.as_bytes()[out.len() - tail_len..],
            &text.as_bytes()[m.end..]
        );
        assert_eq!(&out[m.start..m.start + 6], "100.00");
    }

    #[test]
    fn numeral_spanning_whole_text() {
        assert_eq!(run("363").as_deref(), Some("100.00"));
    }

    #[test]
    fn rejects_spans_off_char_boundaries() {
        let m = NumberMatch {
            start: 1,
            end: 3,
            raw: "x".to_string(),
            value: 1.0,
        };
        assert_eq!(compose("🔥12", &m, "0.28"), None);
    }
}
