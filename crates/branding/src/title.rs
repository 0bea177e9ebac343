//! Title formatting for videos without a custom title.

use std::sync::LazyLock;

use regex::Regex;

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w\S*").expect("valid regex"));

/// Upper-case the first character of every word and lower-case the rest.
pub fn to_title_case(s: &str) -> String {
    WORD_RE
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let word = &caps[0];
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shouting_title_is_tamed() {
        assert_eq!(to_title_case("YOU WON'T BELIEVE THIS"), "You Won't Believe This");
    }

    #[test]
    fn punctuation_and_spacing_survive() {
        assert_eq!(to_title_case("  hello,   world!  "), "  Hello,   World!  ");
    }

    #[test]
    fn empty_string_stays_empty() {
        assert_eq!(to_title_case(""), "");
    }
}
