use std::borrow::Cow;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, OnceLock};

use onig::{RegexOptions, Region, SearchOptions, Syntax};

use crate::error::{Error, TmResult};
use crate::grammars::captures::resolve_backreferences;

/// Inserted in place of anchors that can't match at the current position and of
/// back-references to captures that didn't participate. It never appears in real text.
pub(crate) const NEVER_MATCHES: char = '\u{FFFF}';

/// Oniguruma rejects code points above U+10FFFF, which some grammars use as an
/// "up to infinity" bound in character classes.
const OVERSIZED_CODE_POINT: &str = "\\x{7fffffff}";
const MAX_CODE_POINT: &str = "\\x{10ffff}";

/// Which of the `\A` and `\G` anchors are live for a search.
/// We don't want to enable them everywhere: `\A` only makes sense on the first line
/// of a document and `\G` only where the previous begin match ended.
#[derive(Copy, Clone, PartialEq, Hash, Eq)]
pub enum AnchorActive {
    /// Only \A is active
    A,
    /// Only \G is active
    G,
    /// Both \A and \G are active
    AG,
    /// Neither \A nor \G are active
    None,
}

impl AnchorActive {
    pub fn new(is_first_line: bool, anchor_position: Option<usize>, current_pos: usize) -> Self {
        let g_active = anchor_position == Some(current_pos);

        match (is_first_line, g_active) {
            (true, true) => AnchorActive::AG,
            (true, false) => AnchorActive::A,
            (false, true) => AnchorActive::G,
            (false, false) => AnchorActive::None,
        }
    }

    fn index(self) -> usize {
        match self {
            AnchorActive::AG => 0,
            AnchorActive::A => 1,
            AnchorActive::G => 2,
            AnchorActive::None => 3,
        }
    }

    fn allows(self, anchor: char) -> bool {
        match anchor {
            'A' => matches!(self, AnchorActive::A | AnchorActive::AG),
            'G' => matches!(self, AnchorActive::G | AnchorActive::AG),
            _ => true,
        }
    }

    /// Replaces the inactive anchors with something that can never match.
    /// Escaped backslashes are skipped so `\\G` is left alone.
    pub fn replace_anchors<'a>(&self, pat: &'a str) -> Cow<'a, str> {
        if *self == AnchorActive::AG || !(pat.contains("\\A") || pat.contains("\\G")) {
            return Cow::Borrowed(pat);
        }

        let mut out = String::with_capacity(pat.len());
        let mut chars = pat.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some(anchor @ ('A' | 'G')) if !self.allows(anchor) => out.push(NEVER_MATCHES),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        }
        Cow::Owned(out)
    }
}

impl fmt::Debug for AnchorActive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnchorActive::A => "allow_A=true, allow_G=false",
            AnchorActive::G => "allow_A=false, allow_G=true",
            AnchorActive::AG => "allow_A=true, allow_G=true",
            AnchorActive::None => "allow_A=false, allow_G=false",
        };
        f.write_str(s)
    }
}

/// The capture ranges of a successful search. Index 0 is the whole match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    captures: Vec<Option<Range<usize>>>,
}

impl MatchResult {
    pub fn new(captures: Vec<Option<Range<usize>>>) -> Self {
        debug_assert!(matches!(captures.first(), Some(Some(_))));
        Self { captures }
    }

    /// Range of the whole match
    pub fn range(&self) -> Range<usize> {
        self.captures[0].clone().unwrap_or(0..0)
    }

    pub fn start(&self) -> usize {
        self.range().start
    }

    pub fn end(&self) -> usize {
        self.range().end
    }

    /// Range of capture `index`, `None` if it didn't participate or doesn't exist
    pub fn get(&self, index: usize) -> Option<Range<usize>> {
        self.captures.get(index).cloned().flatten()
    }

    /// Number of capture slots, including the ones that didn't participate
    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    /// Captures cut to the range of the whole match. Groups inside lookarounds can
    /// extend past it, they are dropped if nothing of them is left.
    pub fn clipped(&self) -> MatchResult {
        let bounds = self.range();
        let captures = self
            .captures
            .iter()
            .map(|capture| {
                let range = capture.as_ref()?;
                let start = range.start.clamp(bounds.start, bounds.end);
                let end = range.end.clamp(bounds.start, bounds.end);
                (start < end || range.is_empty() && range.start == start).then_some(start..end)
            })
            .collect();
        MatchResult { captures }
    }
}

/// A pattern from a grammar, compiled lazily the first time it's searched with.
///
/// Each combination of active anchors needs its own compiled regex, each one is
/// compiled at most once even when the grammar is shared between threads.
pub struct Regex {
    pattern: String,
    location: String,
    compiled: [OnceLock<Result<Arc<onig::Regex>, String>>; 4],
}

impl Clone for Regex {
    fn clone(&self) -> Self {
        // Same pattern but fresh lazy compilation
        Regex::new(self.pattern.clone(), self.location.clone())
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl Regex {
    /// `location` says where the pattern comes from in its grammar and is only
    /// used in errors and traces
    pub fn new(pattern: String, location: String) -> Self {
        Self {
            pattern,
            location,
            compiled: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Returns the regex compiled for the given anchors, compiling it if needed.
    pub fn compiled(&self, anchors: AnchorActive) -> TmResult<Arc<onig::Regex>> {
        self.compiled[anchors.index()]
            .get_or_init(|| {
                compile_pattern(&anchors.replace_anchors(&self.pattern)).map(Arc::new)
            })
            .clone()
            .map_err(|message| Error::RegexCompile {
                pattern: self.pattern.clone(),
                location: self.location.clone(),
                message,
            })
    }

    /// Validate that this regex pattern compiles successfully.
    /// The result is kept so the first search doesn't compile it again.
    pub fn validate(&self) -> TmResult<()> {
        self.compiled(AnchorActive::AG).map(|_| ())
    }

    /// Validates an end/while pattern whose back-references are only filled in once the
    /// begin pattern matched. Every back-reference stands for text that never occurs.
    pub fn validate_template(&self) -> TmResult<()> {
        let placeholder = MatchResult::new(vec![Some(0..0)]);
        let Some(filled) = resolve_backreferences(&self.pattern, "", &placeholder) else {
            return self.validate();
        };
        compile_pattern(&AnchorActive::AG.replace_anchors(&filled))
            .map(|_| ())
            .map_err(|message| Error::RegexCompile {
                pattern: self.pattern.clone(),
                location: self.location.clone(),
                message,
            })
    }

    /// Whether the pattern refers to captures of another match with `\1`, `\2` etc.
    /// Those patterns are templates that need to be resolved before being compiled.
    pub fn has_backreferences(&self) -> bool {
        let mut chars = self.pattern.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some(d) if d.is_ascii_digit() => return true,
                    _ => {}
                }
            }
        }
        false
    }

    /// Searches `text` for a match starting in `range`. The match can't extend past
    /// `range.end` either, but lookbehinds can see everything before `range.start`.
    pub fn search(
        &self,
        text: &str,
        range: Range<usize>,
        anchors: AnchorActive,
    ) -> TmResult<Option<MatchResult>> {
        let regex = self.compiled(anchors)?;
        let subject = &text[..range.end];
        let mut region = Region::new();

        let found = regex.search_with_options(
            subject,
            range.start,
            subject.len(),
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        );
        if found.is_none() {
            return Ok(None);
        }

        let captures = (0..region.len())
            .map(|i| region.pos(i).map(|(start, end)| start..end))
            .collect();
        Ok(Some(MatchResult::new(captures)))
    }
}

fn compile_pattern(pattern: &str) -> Result<onig::Regex, String> {
    let compile = |pat: &str| {
        onig::Regex::with_options(
            pat,
            RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
            Syntax::default(),
        )
    };

    match compile(pattern) {
        Ok(regex) => Ok(regex),
        Err(err) => match downgrade_oversized_code_points(pattern) {
            Some(downgraded) => compile(&downgraded).map_err(|e| e.to_string()),
            None => Err(err.to_string()),
        },
    }
}

/// Replaces `\x{7fffffff}` (in any case) with the largest code point Oniguruma accepts.
fn downgrade_oversized_code_points(pattern: &str) -> Option<String> {
    let lowered = pattern.to_ascii_lowercase();
    if !lowered.contains(OVERSIZED_CODE_POINT) {
        return None;
    }

    let mut out = String::with_capacity(pattern.len());
    let mut last = 0;
    for (idx, _) in lowered.match_indices(OVERSIZED_CODE_POINT) {
        out.push_str(&pattern[last..idx]);
        out.push_str(MAX_CODE_POINT);
        last = idx + OVERSIZED_CODE_POINT.len();
    }
    out.push_str(&pattern[last..]);
    Some(out)
}

/// Escapes `text` so it's matched literally when inserted in a pattern.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if matches!(
            c,
            '-' | '\\'
                | '{'
                | '}'
                | '*'
                | '+'
                | '?'
                | '|'
                | '^'
                | '$'
                | '.'
                | ','
                | '['
                | ']'
                | '('
                | ')'
                | '#'
        ) || c.is_ascii_whitespace()
        {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
