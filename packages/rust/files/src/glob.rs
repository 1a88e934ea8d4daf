//! Glob patterns compiled to anchored regexes.
//!
//! Two dialects are supported:
//!
//! - **path** globs (`Glob::path`): `*` and `?` stay inside one path
//!   segment, `**` spans directories, `**/` may match nothing.
//! - **fnmatch** globs (`Glob::fnmatch`): `*` matches anything, slashes
//!   included. Used for exclude lists matched against relative paths.
//!
//! Both accept `[abc]`, `[!abc]` and `{a,b}` alternation, and a leading
//! `**/` segment may match zero directories in either dialect.

use regex::Regex;
use rtools_shared::{Result, RtoolsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Path,
    Fnmatch,
}

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    /// Compile a path-style glob (`src/**/*.rs`).
    pub fn path(pattern: &str) -> Result<Self> {
        Self::compile(pattern, Dialect::Path)
    }

    /// Compile an fnmatch-style glob where `*` crosses `/`.
    pub fn fnmatch(pattern: &str) -> Result<Self> {
        Self::compile(pattern, Dialect::Fnmatch)
    }

    fn compile(pattern: &str, dialect: Dialect) -> Result<Self> {
        let source = translate(pattern, dialect);
        let regex = Regex::new(&source).map_err(|e| {
            RtoolsError::validation(format!("invalid glob pattern '{pattern}': {e}"))
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Match a `/`-separated relative path (or a bare file name).
    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

/// Any-of matcher over several globs. Empty sets match nothing.
#[derive(Debug, Clone, Default)]
pub struct GlobSet {
    globs: Vec<Glob>,
}

impl GlobSet {
    pub fn path<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        Self::build(patterns, Glob::path)
    }

    pub fn fnmatch<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        Self::build(patterns, Glob::fnmatch)
    }

    fn build<S: AsRef<str>>(patterns: &[S], make: fn(&str) -> Result<Glob>) -> Result<Self> {
        let globs = patterns
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .map(make)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { globs })
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.globs.iter().any(|g| g.is_match(candidate))
    }

    pub fn is_empty(&self) -> bool {
        self.globs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Glob> {
        self.globs.iter()
    }
}

/// True if the string contains glob metacharacters.
pub fn has_wildcards(s: &str) -> bool {
    s.contains(['*', '?', '[', ']'])
}

/// Trim patterns and drop empty ones. With `filename_search`, patterns
/// without a `/` are made recursive (`foo.py` → `**/foo.py`,
/// `*.py` → `**/*.py`).
pub fn normalize_globs<S: AsRef<str>>(globs: &[S], filename_search: bool) -> Vec<String> {
    globs
        .iter()
        .map(|g| g.as_ref().trim())
        .filter(|g| !g.is_empty())
        .map(|g| {
            if filename_search && !g.contains('/') {
                format!("**/{g}")
            } else {
                g.to_string()
            }
        })
        .collect()
}

/// Like [`normalize_globs`] but only rewrites plain file names
/// (no `/` and no wildcards).
pub fn normalize_file_names<S: AsRef<str>>(globs: &[S], filename_search: bool) -> Vec<String> {
    globs
        .iter()
        .map(|g| g.as_ref().trim())
        .filter(|g| !g.is_empty())
        .map(|g| {
            if filename_search && !g.contains('/') && !has_wildcards(g) {
                format!("**/{g}")
            } else {
                g.to_string()
            }
        })
        .collect()
}

fn translate(pattern: &str, dialect: Dialect) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;
    let mut in_braces = false;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' => {
                let double = chars.get(i + 1) == Some(&'*');
                if double {
                    let at_segment_start = i == 0 || chars[i - 1] == '/';
                    let followed_by_slash = chars.get(i + 2) == Some(&'/');
                    if at_segment_start && followed_by_slash {
                        out.push_str("(?:.*/)?");
                        i += 3;
                    } else {
                        out.push_str(".*");
                        i += 2;
                    }
                    continue;
                }
                out.push_str(match dialect {
                    Dialect::Path => "[^/]*",
                    Dialect::Fnmatch => ".*",
                });
            }
            '?' => out.push_str(match dialect {
                Dialect::Path => "[^/]",
                Dialect::Fnmatch => ".",
            }),
            '[' => match chars[i + 1..].iter().position(|&ch| ch == ']') {
                Some(rel_end) if rel_end > 0 => {
                    out.push_str(&translate_class(&chars[i + 1..i + 1 + rel_end], dialect));
                    i += rel_end + 2;
                    continue;
                }
                _ => out.push_str("\\["),
            },
            '{' if !in_braces && chars[i + 1..].contains(&'}') => {
                in_braces = true;
                out.push_str("(?:");
            }
            ',' if in_braces => out.push('|'),
            '}' if in_braces => {
                in_braces = false;
                out.push(')');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

/// Translate the body of a `[...]` class. Only `!` negates and only
/// `a-z` forms a range; every other character is literal. Path-dialect
/// negation never matches `/`.
fn translate_class(body: &[char], dialect: Dialect) -> String {
    let (negated, body) = match body.split_first() {
        Some((&'!', rest)) => (true, rest),
        _ => (false, body),
    };

    let mut items = String::new();
    let mut i = 0;
    while i < body.len() {
        let lo = body[i];
        if body.get(i + 1) == Some(&'-') && i + 2 < body.len() {
            let hi = body[i + 2];
            // Reversed ranges match nothing.
            if lo <= hi {
                push_class_char(&mut items, lo);
                items.push('-');
                push_class_char(&mut items, hi);
            }
            i += 3;
            continue;
        }
        push_class_char(&mut items, lo);
        i += 1;
    }

    match (negated, dialect) {
        (false, _) if items.is_empty() => "[a&&b]".to_string(),
        (false, _) => format!("[{items}]"),
        (true, Dialect::Path) => format!("[^/{items}]"),
        (true, Dialect::Fnmatch) if items.is_empty() => ".".to_string(),
        (true, Dialect::Fnmatch) => format!("[^{items}]"),
    }
}

fn push_class_char(out: &mut String, c: char) {
    if matches!(c, '\\' | '^' | '&' | '-' | '~' | '[' | ']') {
        out.push('\\');
    }
    out.push(c);
}
