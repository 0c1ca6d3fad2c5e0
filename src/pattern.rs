/**
 * Filename filters for selecting which files get organized
 */

use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// A compiled `--file` filter.
///
/// Patterns are regular expressions with one adjustment: a bare `.` followed
/// by an ASCII letter is taken literally, so `IMG.*\.jpg` and `.jpg` behave
/// the way people expect when they type an extension.
#[derive(Debug, Clone)]
pub struct FilePattern {
    regex: Regex,
}

impl FilePattern {
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&escape_extension_dots(pattern))?;
        Ok(Self { regex })
    }

    /// Unanchored search against a bare file name.
    pub fn matches(&self, filename: &str) -> bool {
        self.regex.is_match(filename)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl FromStr for FilePattern {
    type Err = regex::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl fmt::Display for FilePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn escape_extension_dots(pattern: &str) -> String {
    let pattern = match pattern.strip_prefix("./") {
        Some(rest) if !rest.is_empty() => rest,
        _ => pattern,
    };

    let mut out = String::with_capacity(pattern.len() + pattern.matches('.').count());
    let mut chars = pattern.chars().peekable();
    while let Some(curr) = chars.next() {
        let next_is_letter = chars.peek().is_some_and(|next| next.is_ascii_alphabetic());
        if curr == '.' && next_is_letter && !out.ends_with('\\') {
            out.push_str("\\.");
        } else {
            out.push(curr);
        }
    }
    out
}

/// Any-of set of filters. A file qualifies if at least one pattern matches.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<FilePattern>,
}

impl PatternSet {
    pub fn new(patterns: Vec<FilePattern>) -> Self {
        Self { patterns }
    }

    pub fn push(&mut self, pattern: FilePattern) {
        self.patterns.push(pattern);
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn matches(&self, filename: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(filename))
    }
}

impl FromIterator<FilePattern> for PatternSet {
    fn from_iter<T: IntoIterator<Item = FilePattern>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
