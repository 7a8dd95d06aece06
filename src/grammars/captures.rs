//! Turning the captures of a match into scopes.
//!
//! Two things happen here: the capture groups of a match are arranged in a tree
//! following how their ranges nest, and the templates of a rule (scope names with
//! `$1`, end patterns with `\1`) are filled in with the captured text.

use std::cmp::Reverse;
use std::ops::Range;
use std::sync::LazyLock;

use crate::grammars::regex::{MatchResult, NEVER_MATCHES, escape};
use crate::scope::ScopeName;

/// A capture group of a match along with the groups nested inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureAnchor<T> {
    pub index: usize,
    pub range: Range<usize>,
    pub attribute: T,
    pub children: Vec<CaptureAnchor<T>>,
}

impl<T> CaptureAnchor<T> {
    fn contains(&self, range: &Range<usize>) -> bool {
        self.range.start <= range.start && range.end <= self.range.end
    }
}

/// Builds the forest of capture anchors for the attributes declared on a rule.
///
/// Captures are ordered by where they start, widest first, and become the child of the
/// smallest capture before them whose range contains their own. Identical ranges go
/// to the lower index first. A group repeated by a quantifier can end up after a
/// higher-numbered one, which is why the index alone is not enough. Captures that
/// didn't participate in the match or that are empty are skipped.
pub fn build_anchor_tree<T>(
    captures: &MatchResult,
    attributes: impl IntoIterator<Item = (usize, T)>,
) -> Vec<CaptureAnchor<T>> {
    fn attach<T>(
        anchor: CaptureAnchor<T>,
        stack: &mut [CaptureAnchor<T>],
        roots: &mut Vec<CaptureAnchor<T>>,
    ) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(anchor),
            None => roots.push(anchor),
        }
    }

    let mut ordered: Vec<_> = attributes
        .into_iter()
        .filter_map(|(index, attribute)| {
            let range = captures.get(index)?;
            (!range.is_empty()).then_some((index, range, attribute))
        })
        .collect();
    ordered.sort_by_key(|(index, range, _)| (range.start, Reverse(range.end), *index));

    let mut roots = Vec::new();
    let mut stack: Vec<CaptureAnchor<T>> = Vec::new();

    for (index, range, attribute) in ordered {
        while let Some(top) = stack.last() {
            if top.contains(&range) {
                break;
            }
            if let Some(done) = stack.pop() {
                attach(done, &mut stack, &mut roots);
            }
        }

        stack.push(CaptureAnchor {
            index,
            range,
            attribute,
            children: Vec::new(),
        });
    }

    while let Some(done) = stack.pop() {
        attach(done, &mut stack, &mut roots);
    }

    roots
}

/// `$1` or `${1:/downcase}`
static SCOPE_PLACEHOLDER: LazyLock<onig::Regex> = LazyLock::new(|| {
    onig::Regex::new(r"\$(\d+)|\$\{(\d+):/(\w+)\}").expect("Invalid placeholder regex")
});

/// A scope name, or space separated scope names, that can refer to captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeTemplate {
    source: String,
    /// Already parsed if there is nothing to substitute
    fixed: Option<Vec<ScopeName>>,
}

impl ScopeTemplate {
    pub fn new(source: &str) -> Self {
        let fixed = if SCOPE_PLACEHOLDER.find(source).is_some() {
            None
        } else {
            Some(ScopeName::parse_list(source))
        };
        Self {
            source: source.to_owned(),
            fixed,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn has_captures(&self) -> bool {
        self.fixed.is_none()
    }

    /// Scopes for a match over `text`. Leading dots of the captured text are
    /// stripped; a placeholder for a capture that didn't participate is kept as is.
    pub fn resolve(&self, text: &str, captures: &MatchResult) -> Vec<ScopeName> {
        if let Some(fixed) = &self.fixed {
            return fixed.clone();
        }

        let mut out = String::with_capacity(self.source.len());
        let mut last = 0;
        for caps in SCOPE_PLACEHOLDER.captures_iter(&self.source) {
            let Some((start, end)) = caps.pos(0) else {
                continue;
            };
            out.push_str(&self.source[last..start]);
            last = end;

            let index = caps.at(1).or_else(|| caps.at(2)).and_then(|d| d.parse().ok());
            let Some(range) = index.and_then(|i: usize| captures.get(i)) else {
                out.push_str(&self.source[start..end]);
                continue;
            };

            let captured = text[range].trim_start_matches('.');
            match caps.at(3) {
                None => out.push_str(captured),
                Some("downcase") => out.push_str(&captured.to_lowercase()),
                Some("upcase") => out.push_str(&captured.to_uppercase()),
                Some(other) => {
                    log::debug!("unknown case modifier '{other}' in scope '{}'", self.source);
                    out.push_str(captured);
                }
            }
        }
        out.push_str(&self.source[last..]);

        ScopeName::parse_list(&out)
    }
}

/// Fills the `\N` back-references of an end or while pattern with the escaped text
/// of the begin captures. Returns `None` if there was nothing to replace so the
/// caller can keep using the pattern it already has compiled.
pub fn resolve_backreferences(
    pattern: &str,
    text: &str,
    captures: &MatchResult,
) -> Option<String> {
    let mut out = String::with_capacity(pattern.len());
    let mut replaced = false;
    let mut chars = pattern.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&(start, d)) if d.is_ascii_digit() => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = i + 1;
                    chars.next();
                }
                replaced = true;
                match pattern[start..end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| captures.get(i))
                {
                    Some(range) => out.push_str(&escape(&text[range])),
                    None => out.push(NEVER_MATCHES),
                }
            }
            Some(&(_, next)) => {
                out.push('\\');
                out.push(next);
                chars.next();
            }
            None => out.push('\\'),
        }
    }

    replaced.then_some(out)
}
