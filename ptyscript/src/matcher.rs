// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use regex::bytes::Regex;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatcherKind {
    /// Literal substring search.
    Plain,
    /// A regular expression, compiled once per action.
    Regex,
}

impl MatcherKind {
    pub fn parse(s: &str) -> Result<MatcherKind, String> {
        match s {
            "plain" => Ok(MatcherKind::Plain),
            "regex" => Ok(MatcherKind::Regex),
            other => Err(format!("Unknown matcher '{other}'")),
        }
    }
}

///
/// A pattern compiled for repeated application to the output buffer.
///
#[derive(Clone, Debug)]
pub enum Matcher {
    Plain(Vec<u8>),
    Regex(Regex),
}

impl Matcher {
    pub fn compile(kind: MatcherKind, pattern: &str) -> Result<Matcher, String> {
        match kind {
            MatcherKind::Plain => Ok(Matcher::Plain(pattern.as_bytes().to_vec())),
            MatcherKind::Regex => Regex::new(pattern)
                .map(Matcher::Regex)
                .map_err(|e| format!("Invalid pattern '{pattern}': {e}")),
        }
    }

    ///
    /// The first match in the buffer, as a half-open byte span.
    ///
    pub fn find(&self, haystack: &[u8]) -> Option<(usize, usize)> {
        match self {
            Matcher::Plain(needle) => {
                if needle.is_empty() {
                    return Some((0, 0));
                }
                haystack
                    .windows(needle.len())
                    .position(|w| w == &needle[..])
                    .map(|start| (start, start + needle.len()))
            }
            Matcher::Regex(re) => re.find(haystack).map(|m| (m.start(), m.end())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_finds_first() {
        let m = Matcher::compile(MatcherKind::Plain, "ab").unwrap();
        assert_eq!(m.find(b"xxabyyab"), Some((2, 4)));
        assert_eq!(m.find(b"xxx"), None);
    }

    #[test]
    fn plain_empty_pattern() {
        let m = Matcher::compile(MatcherKind::Plain, "").unwrap();
        assert_eq!(m.find(b"anything"), Some((0, 0)));
    }

    #[test]
    fn regex_spans() {
        let m = Matcher::compile(MatcherKind::Regex, "b+").unwrap();
        assert_eq!(m.find(b"aabbbc"), Some((2, 5)));
    }

    #[test]
    fn regex_compile_error() {
        let err = Matcher::compile(MatcherKind::Regex, "(").unwrap_err();
        assert!(err.contains("Invalid pattern"), "{err}");
    }
}
