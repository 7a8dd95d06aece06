use std::collections::BTreeMap;
use std::ops::Deref;

use crate::error::{Error, TmResult};
use crate::grammars::captures::ScopeTemplate;
use crate::grammars::raw::{RawCaptures, RawGrammar, RawRule};
use crate::grammars::regex::Regex;
use crate::grammars::selector::ScopeSelector;
use crate::scope::ScopeName;

/// Index of a rule in its grammar
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub u32);

impl Deref for RuleId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Index of a pattern in its grammar
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RegexId(u32);

impl Deref for RegexId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The root of every grammar is its first rule
pub const ROOT_RULE_ID: RuleId = RuleId(0);

/// Named rules that `#name` includes can refer to
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Repository(BTreeMap<String, RuleId>);

impl Repository {
    /// Look up a rule by name in this repository
    pub fn get(&self, name: &str) -> Option<RuleId> {
        self.0.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What an `include` points to.
///
///  * Relative reference, e.g. `#entity.name.class`
///  * self, e.g. `$self`
///  * base, e.g. `$base`
///  * Scope name, e.g. `source.ts`
///  * Top level scope reference, e.g. `source.ts#entity.name.class`
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum IncludeTarget {
    SelfRoot,
    BaseRoot,
    Local(String),
    Grammar { scope: String, rule: Option<String> },
    Unknown(String),
}

impl From<&str> for IncludeTarget {
    fn from(value: &str) -> Self {
        match value {
            "$self" => Self::SelfRoot,
            "$base" => Self::BaseRoot,
            "" | "#" => Self::Unknown(value.to_owned()),
            s if s.starts_with('#') => Self::Local(s[1..].to_owned()),
            s => match s.split_once('#') {
                Some((scope, rule)) if !scope.is_empty() && !rule.is_empty() => Self::Grammar {
                    scope: scope.to_owned(),
                    rule: Some(rule.to_owned()),
                },
                Some(_) => Self::Unknown(value.to_owned()),
                None => Self::Grammar {
                    scope: s.to_owned(),
                    rule: None,
                },
            },
        }
    }
}

impl std::fmt::Display for IncludeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncludeTarget::SelfRoot => write!(f, "$self"),
            IncludeTarget::BaseRoot => write!(f, "$base"),
            IncludeTarget::Local(name) => write!(f, "#{name}"),
            IncludeTarget::Grammar { scope, rule: None } => write!(f, "{scope}"),
            IncludeTarget::Grammar {
                scope,
                rule: Some(rule),
            } => write!(f, "{scope}#{rule}"),
            IncludeTarget::Unknown(s) => write!(f, "{s}"),
        }
    }
}

/// What to do with the text of one capture group
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CaptureAttribute {
    pub name: Option<ScopeTemplate>,
    /// A group rule whose patterns tokenize the captured text
    pub patterns: Option<RuleId>,
}

/// Capture attributes indexed by capture group number
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Captures(Vec<Option<CaptureAttribute>>);

impl Captures {
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    pub fn get(&self, index: usize) -> Option<&CaptureAttribute> {
        self.0.get(index).and_then(Option::as_ref)
    }

    /// Declared attributes, sorted by capture index
    pub fn iter(&self) -> impl Iterator<Item = (usize, &CaptureAttribute)> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, attr)| attr.as_ref().map(|a| (i, a)))
    }

    /// Whether any attribute needs the captured text to be tokenized again
    pub fn has_patterns(&self) -> bool {
        self.iter().any(|(_, attr)| attr.patterns.is_some())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Match {
    pub id: RuleId,
    pub parent: Option<RuleId>,
    pub disabled: bool,
    pub name: Option<ScopeTemplate>,
    pub regex: RegexId,
    pub captures: Captures,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BeginEnd {
    pub id: RuleId,
    pub parent: Option<RuleId>,
    pub disabled: bool,
    pub name: Option<ScopeTemplate>,
    pub content_name: Option<ScopeTemplate>,
    pub begin: RegexId,
    pub begin_captures: Captures,
    pub end: RegexId,
    pub end_has_backrefs: bool,
    pub end_captures: Captures,
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<RuleId>,
    pub repository: Repository,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BeginWhile {
    pub id: RuleId,
    pub parent: Option<RuleId>,
    pub disabled: bool,
    pub name: Option<ScopeTemplate>,
    pub content_name: Option<ScopeTemplate>,
    pub begin: RegexId,
    pub begin_captures: Captures,
    pub while_: RegexId,
    pub while_has_backrefs: bool,
    pub while_captures: Captures,
    pub patterns: Vec<RuleId>,
    pub repository: Repository,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Include {
    pub id: RuleId,
    pub parent: Option<RuleId>,
    pub disabled: bool,
    pub target: IncludeTarget,
}

/// Doesn't match anything by itself: grammar roots, injection bodies, capture patterns
/// and repository entries that only have `patterns`
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Group {
    pub id: RuleId,
    pub parent: Option<RuleId>,
    pub disabled: bool,
    pub patterns: Vec<RuleId>,
    pub repository: Repository,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Rule {
    Match(Match),
    BeginEnd(BeginEnd),
    BeginWhile(BeginWhile),
    Include(Include),
    Group(Group),
}

impl Rule {
    pub fn id(&self) -> RuleId {
        match self {
            Rule::Match(r) => r.id,
            Rule::BeginEnd(r) => r.id,
            Rule::BeginWhile(r) => r.id,
            Rule::Include(r) => r.id,
            Rule::Group(r) => r.id,
        }
    }

    pub fn parent(&self) -> Option<RuleId> {
        match self {
            Rule::Match(r) => r.parent,
            Rule::BeginEnd(r) => r.parent,
            Rule::BeginWhile(r) => r.parent,
            Rule::Include(r) => r.parent,
            Rule::Group(r) => r.parent,
        }
    }

    pub fn is_disabled(&self) -> bool {
        match self {
            Rule::Match(r) => r.disabled,
            Rule::BeginEnd(r) => r.disabled,
            Rule::BeginWhile(r) => r.disabled,
            Rule::Include(r) => r.disabled,
            Rule::Group(r) => r.disabled,
        }
    }

    pub fn repository(&self) -> Option<&Repository> {
        match self {
            Rule::BeginEnd(r) => Some(&r.repository),
            Rule::BeginWhile(r) => Some(&r.repository),
            Rule::Group(r) => Some(&r.repository),
            Rule::Match(_) | Rule::Include(_) => None,
        }
    }

    /// The child patterns searched while this rule is active
    pub fn patterns(&self) -> &[RuleId] {
        match self {
            Rule::BeginEnd(r) => &r.patterns,
            Rule::BeginWhile(r) => &r.patterns,
            Rule::Group(r) => &r.patterns,
            Rule::Match(_) | Rule::Include(_) => &[],
        }
    }

    /// The pattern that starts this rule, if it's a rule that can match
    pub fn entry_regex(&self) -> Option<RegexId> {
        match self {
            Rule::Match(r) => Some(r.regex),
            Rule::BeginEnd(r) => Some(r.begin),
            Rule::BeginWhile(r) => Some(r.begin),
            Rule::Include(_) | Rule::Group(_) => None,
        }
    }

    pub fn name(&self) -> Option<&ScopeTemplate> {
        match self {
            Rule::Match(r) => r.name.as_ref(),
            Rule::BeginEnd(r) => r.name.as_ref(),
            Rule::BeginWhile(r) => r.name.as_ref(),
            Rule::Include(_) | Rule::Group(_) => None,
        }
    }
}

/// Rules injected where their selector matches the current scopes
#[derive(Debug, Clone)]
pub struct Injection {
    pub selector: ScopeSelector,
    pub rule: RuleId,
}

/// A grammar compiled into a flat list of rules.
///
/// Rules refer to each other by index: children through `patterns` and repositories,
/// and upwards through `parent`. Includes of other grammars are only names here and
/// are looked up in the registry the grammar was added to when tokenizing.
#[derive(Debug, Clone)]
pub struct Grammar {
    pub name: String,
    pub scope_name: String,
    pub scope: ScopeName,
    pub rules: Vec<Rule>,
    pub regexes: Vec<Regex>,
    /// Injections declared by this grammar, for itself
    pub injections: Vec<Injection>,
    /// This whole grammar injected in others, from `injectionSelector`
    pub injection: Option<Injection>,
    pub inject_to: Vec<String>,
}

impl Grammar {
    pub fn from_raw(raw: RawGrammar) -> TmResult<Self> {
        let mut grammar = Self {
            scope: ScopeName::new(&raw.scope_name),
            name: raw.name,
            scope_name: raw.scope_name,
            rules: Vec::new(),
            regexes: Vec::new(),
            injections: Vec::new(),
            injection: None,
            inject_to: raw.inject_to,
        };

        let root_rule = RawRule {
            patterns: raw.patterns,
            repository: raw.repository,
            ..Default::default()
        };
        let root_rule_id = grammar.compile_rule(root_rule, None, "")?;
        assert_eq!(root_rule_id, ROOT_RULE_ID);

        for (selector, raw_rule) in raw.injections {
            let location = format!("injections.{selector}");
            let selector = ScopeSelector::parse(&selector)?;
            let rule = grammar.compile_rule(raw_rule, Some(ROOT_RULE_ID), &location)?;
            grammar.injections.push(Injection { selector, rule });
        }

        if let Some(selector) = raw.injection_selector {
            grammar.injection = Some(Injection {
                selector: ScopeSelector::parse(&selector)?,
                rule: ROOT_RULE_ID,
            });
        }

        Ok(grammar)
    }

    pub fn from_json_str(json: &str) -> TmResult<Self> {
        Self::from_raw(RawGrammar::from_json_str(json)?)
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[*id as usize]
    }

    pub fn regex(&self, id: RegexId) -> &Regex {
        &self.regexes[*id as usize]
    }

    /// Finds `name` in the repository of `from` or of the closest ancestor that has it.
    pub fn lookup(&self, from: RuleId, name: &str) -> Option<RuleId> {
        let mut current = Some(from);
        while let Some(id) = current {
            let rule = self.rule(id);
            if let Some(found) = rule.repository().and_then(|repo| repo.get(name)) {
                return Some(found);
            }
            current = rule.parent();
        }
        None
    }

    /// A one line description of a rule, for traces
    pub fn describe(&self, id: RuleId) -> String {
        let rule = self.rule(id);
        let mut out = match rule.name() {
            Some(name) => format!("[{}]", name.source()),
            None => "[--]".to_owned(),
        };

        let with_pattern = |kind: &str, regex: RegexId| {
            let regex = self.regex(regex);
            format!(
                " {kind} /{}/ at {}",
                truncate(regex.pattern(), 40),
                regex.location()
            )
        };
        let detail = match rule {
            Rule::Match(r) => with_pattern("match", r.regex),
            Rule::BeginEnd(r) => with_pattern("begin-end", r.begin),
            Rule::BeginWhile(r) => with_pattern("begin-while", r.begin),
            Rule::Include(r) => format!(" include {}", r.target),
            Rule::Group(r) => format!(" group of {} patterns", r.patterns.len()),
        };
        out.push_str(&detail);
        if rule.is_disabled() {
            out.push_str(" (disabled)");
        }
        out
    }

    fn compile_rule(
        &mut self,
        raw_rule: RawRule,
        parent: Option<RuleId>,
        location: &str,
    ) -> TmResult<RuleId> {
        let id = RuleId(arena_index(self.rules.len(), location, "rules")?);
        let disabled = raw_rule.disabled;

        // push an empty group to reserve its spot, its children need the id
        self.rules.push(Rule::Group(Group {
            id,
            parent,
            disabled,
            patterns: Vec::new(),
            repository: Repository::default(),
        }));

        let name = raw_rule.name.as_deref().map(ScopeTemplate::new);
        let content_name = raw_rule.content_name.as_deref().map(ScopeTemplate::new);

        let rule = if let Some(include) = raw_rule.include {
            // the other keys of the object are ignored if there's an include
            Rule::Include(Include {
                id,
                parent,
                disabled,
                target: IncludeTarget::from(include.as_str()),
            })
        } else if let Some(pat) = raw_rule.match_ {
            let (regex, _) = self.compile_regex(pat, join(location, "match"), false)?;
            Rule::Match(Match {
                id,
                parent,
                disabled,
                name,
                regex,
                captures: self.compile_captures(
                    raw_rule.captures,
                    id,
                    &join(location, "captures"),
                )?,
            })
        } else if let Some(begin_pat) = raw_rule.begin {
            let (begin, _) = self.compile_regex(begin_pat, join(location, "begin"), false)?;
            let begin_captures = self.compile_captures(
                raw_rule.begin_captures.or_else(|| raw_rule.captures.clone()),
                id,
                &join(location, "beginCaptures"),
            )?;

            if let Some(while_pat) = raw_rule.while_ {
                let (while_, while_has_backrefs) =
                    self.compile_regex(while_pat, join(location, "while"), true)?;
                let while_captures = self.compile_captures(
                    raw_rule.while_captures.or(raw_rule.captures),
                    id,
                    &join(location, "whileCaptures"),
                )?;
                let repository = self.compile_repository(raw_rule.repository, id, location)?;
                Rule::BeginWhile(BeginWhile {
                    id,
                    parent,
                    disabled,
                    name,
                    content_name,
                    begin,
                    begin_captures,
                    while_,
                    while_has_backrefs,
                    while_captures,
                    patterns: self.compile_patterns(raw_rule.patterns, id, location)?,
                    repository,
                })
            } else if let Some(end_pat) = raw_rule.end {
                let (end, end_has_backrefs) =
                    self.compile_regex(end_pat, join(location, "end"), true)?;
                let end_captures = self.compile_captures(
                    raw_rule.end_captures.or(raw_rule.captures),
                    id,
                    &join(location, "endCaptures"),
                )?;
                let repository = self.compile_repository(raw_rule.repository, id, location)?;
                Rule::BeginEnd(BeginEnd {
                    id,
                    parent,
                    disabled,
                    name,
                    content_name,
                    begin,
                    begin_captures,
                    end,
                    end_has_backrefs,
                    end_captures,
                    apply_end_pattern_last: raw_rule.apply_end_pattern_last,
                    patterns: self.compile_patterns(raw_rule.patterns, id, location)?,
                    repository,
                })
            } else {
                return Err(Error::Definition {
                    location: display_location(location),
                    message: "rule has a `begin` but neither `end` nor `while`".to_owned(),
                });
            }
        } else {
            let repository = self.compile_repository(raw_rule.repository, id, location)?;
            Rule::Group(Group {
                id,
                parent,
                disabled,
                patterns: self.compile_patterns(raw_rule.patterns, id, location)?,
                repository,
            })
        };

        self.rules[*id as usize] = rule;
        Ok(id)
    }

    /// Patterns are compiled right away so a broken grammar fails to load instead of
    /// failing later while tokenizing. End/while patterns referring to the begin
    /// captures are templates: they are checked with placeholders and compiled for real
    /// once resolved.
    ///
    /// A `\1` in a match or begin pattern refers to its own group and is left alone.
    fn compile_regex(
        &mut self,
        pattern: String,
        location: String,
        template: bool,
    ) -> TmResult<(RegexId, bool)> {
        let regex_id = RegexId(arena_index(self.regexes.len(), &location, "patterns")?);
        let re = Regex::new(pattern, location);
        let has_backrefs = template && re.has_backreferences();
        if has_backrefs {
            re.validate_template()?;
        } else {
            re.validate()?;
        }
        self.regexes.push(re);

        Ok((regex_id, has_backrefs))
    }

    fn compile_repository(
        &mut self,
        raw_repository: BTreeMap<String, RawRule>,
        owner: RuleId,
        location: &str,
    ) -> TmResult<Repository> {
        let mut rules = BTreeMap::new();
        for (name, raw_rule) in raw_repository {
            let rule_location = join(location, &format!("repository.{name}"));
            rules.insert(name, self.compile_rule(raw_rule, Some(owner), &rule_location)?);
        }
        Ok(Repository(rules))
    }

    fn compile_patterns(
        &mut self,
        raw_rules: Vec<RawRule>,
        owner: RuleId,
        location: &str,
    ) -> TmResult<Vec<RuleId>> {
        raw_rules
            .into_iter()
            .enumerate()
            .map(|(i, r)| self.compile_rule(r, Some(owner), &join(location, &format!("patterns[{i}]"))))
            .collect()
    }

    fn compile_captures(
        &mut self,
        captures: Option<RawCaptures>,
        owner: RuleId,
        location: &str,
    ) -> TmResult<Captures> {
        let Some(captures) = captures else {
            return Ok(Captures::default());
        };

        let mut out: Vec<Option<CaptureAttribute>> = Vec::new();
        for (key, raw_rule) in captures {
            let Ok(index) = key.parse::<usize>() else {
                log::debug!("ignoring capture key '{key}' at {}", display_location(location));
                continue;
            };

            let patterns = if raw_rule.patterns.is_empty() {
                None
            } else {
                let group = RawRule {
                    patterns: raw_rule.patterns,
                    repository: raw_rule.repository,
                    ..Default::default()
                };
                Some(self.compile_rule(group, Some(owner), &join(location, &key))?)
            };

            if out.len() <= index {
                out.resize(index + 1, None);
            }
            out[index] = Some(CaptureAttribute {
                name: raw_rule.name.as_deref().map(ScopeTemplate::new),
                patterns,
            });
        }

        Ok(Captures(out))
    }
}

fn join(location: &str, suffix: &str) -> String {
    if location.is_empty() {
        suffix.to_owned()
    } else {
        format!("{location}.{suffix}")
    }
}

fn display_location(location: &str) -> String {
    if location.is_empty() {
        "<root>".to_owned()
    } else {
        location.to_owned()
    }
}

/// Index of the next element of a rule or pattern arena
fn arena_index(len: usize, location: &str, what: &str) -> TmResult<u32> {
    u32::try_from(len).map_err(|_| Error::Definition {
        location: display_location(location),
        message: format!("grammar has too many {what}"),
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(value: serde_json::Value) -> TmResult<Grammar> {
        Grammar::from_json_str(&value.to_string())
    }

    #[test]
    fn test_include_targets() {
        let test_cases = vec![
            ("$self", IncludeTarget::SelfRoot),
            ("$base", IncludeTarget::BaseRoot),
            ("#value", IncludeTarget::Local("value".to_owned())),
            (
                "source.js",
                IncludeTarget::Grammar {
                    scope: "source.js".to_owned(),
                    rule: None,
                },
            ),
            (
                "source.js#expression",
                IncludeTarget::Grammar {
                    scope: "source.js".to_owned(),
                    rule: Some("expression".to_owned()),
                },
            ),
            ("source.js#", IncludeTarget::Unknown("source.js#".to_owned())),
            ("", IncludeTarget::Unknown(String::new())),
        ];

        for (include, expected) in test_cases {
            assert_eq!(IncludeTarget::from(include), expected, "{include}");
        }
    }

    #[test]
    fn test_lookup_uses_nearest_repository() {
        let grammar = compile(json!({
            "scopeName": "source.test",
            "patterns": [{ "include": "#outer" }],
            "repository": {
                "outer": {
                    "begin": "a",
                    "end": "b",
                    "patterns": [{ "include": "#shared" }],
                    "repository": {
                        "shared": { "match": "inner", "name": "inner" }
                    }
                },
                "shared": { "match": "root", "name": "root" },
                "other": { "patterns": [{ "include": "#shared" }] }
            }
        }))
        .unwrap();

        let outer = grammar.lookup(ROOT_RULE_ID, "outer").unwrap();
        let include_in_outer = grammar.rule(outer).patterns()[0];
        let shared = grammar.lookup(include_in_outer, "shared").unwrap();
        assert_eq!(grammar.regex(grammar.rule(shared).entry_regex().unwrap()).pattern(), "inner");

        let other = grammar.lookup(ROOT_RULE_ID, "other").unwrap();
        let include_in_other = grammar.rule(other).patterns()[0];
        let shared = grammar.lookup(include_in_other, "shared").unwrap();
        assert_eq!(grammar.regex(grammar.rule(shared).entry_regex().unwrap()).pattern(), "root");

        assert_eq!(grammar.lookup(include_in_other, "missing"), None);
    }

    #[test]
    fn test_captures_fall_back_to_captures_key() {
        let grammar = compile(json!({
            "scopeName": "source.test",
            "patterns": [{
                "begin": "(<)",
                "end": "(>)",
                "captures": { "1": { "name": "punctuation" } },
                "endCaptures": { "0": { "name": "end" }, "nope": { "name": "ignored" } }
            }]
        }))
        .unwrap();

        let Rule::BeginEnd(rule) = grammar.rule(grammar.rule(ROOT_RULE_ID).patterns()[0]) else {
            panic!("expected a begin/end rule");
        };
        assert_eq!(
            rule.begin_captures.get(1).unwrap().name.as_ref().unwrap().source(),
            "punctuation"
        );
        assert!(rule.end_captures.get(1).is_none());
        assert_eq!(
            rule.end_captures.get(0).unwrap().name.as_ref().unwrap().source(),
            "end"
        );
    }

    #[test]
    fn test_begin_without_end_is_an_error() {
        let err = compile(json!({
            "scopeName": "source.test",
            "repository": { "broken": { "begin": "a" } }
        }))
        .unwrap_err();

        match err {
            Error::Definition { location, .. } => assert_eq!(location, "repository.broken"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_invalid_regex_fails_load_with_location() {
        let err = compile(json!({
            "scopeName": "source.test",
            "patterns": [{ "match": "ok" }, { "begin": "a", "end": "b", "patterns": [{ "match": "(" }] }]
        }))
        .unwrap_err();

        match err {
            Error::RegexCompile { location, pattern, .. } => {
                assert_eq!(location, "patterns[1].patterns[0].match");
                assert_eq!(pattern, "(");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_invalid_regex_with_backreference_fails_load() {
        let test_cases = vec![
            (json!({ "match": "(a)\\1(" }), "patterns[0].match"),
            (json!({ "begin": "(a)\\1(", "end": "b" }), "patterns[0].begin"),
            (json!({ "begin": "(a)", "end": "\\1(" }), "patterns[0].end"),
            (json!({ "begin": "(a)", "while": "[\\1" }), "patterns[0].while"),
        ];

        for (rule, expected) in test_cases {
            let err = compile(json!({ "scopeName": "source.test", "patterns": [rule] }))
                .unwrap_err();
            match err {
                Error::RegexCompile { location, .. } => assert_eq!(location, expected),
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_arena_index_overflow() {
        assert_eq!(arena_index(3, "patterns[0]", "rules").unwrap(), 3);
        let err = arena_index(usize::MAX, "patterns[0]", "rules").unwrap_err();
        assert!(matches!(err, Error::Definition { .. }));
    }

    #[test]
    fn test_backreference_patterns_are_compiled_later() {
        let grammar = compile(json!({
            "scopeName": "source.test",
            "patterns": [{ "begin": "(\\w+)", "end": "\\1" }]
        }))
        .unwrap();

        let Rule::BeginEnd(rule) = grammar.rule(RuleId(1)) else {
            panic!("expected a begin/end rule");
        };
        assert!(rule.end_has_backrefs);
    }

    #[test]
    fn test_injections_and_selector_errors() {
        let grammar = compile(json!({
            "scopeName": "source.test",
            "injectionSelector": "L:source.other -comment",
            "injections": {
                "L:string": { "patterns": [{ "match": "x", "name": "x" }] }
            }
        }))
        .unwrap();
        assert_eq!(grammar.injections.len(), 1);
        assert_eq!(grammar.injections[0].selector.source(), "L:string");
        assert_eq!(grammar.injection.as_ref().unwrap().rule, ROOT_RULE_ID);

        let err = compile(json!({
            "scopeName": "source.test",
            "injections": { "string (": { "patterns": [] } }
        }))
        .unwrap_err();
        assert!(matches!(err, Error::ScopeSelectorSyntax { .. }));
    }

    #[test]
    fn test_describe() {
        let grammar = compile(json!({
            "scopeName": "source.test",
            "patterns": [
                { "match": "\\b(?:abstract|boolean|break|byte|case|catch|char)\\b", "name": "keyword.test" },
                { "include": "#nope", "disabled": 1 },
                { "begin": "\"", "end": "\"" }
            ]
        }))
        .unwrap();

        assert_eq!(
            grammar.describe(RuleId(1)),
            "[keyword.test] match /\\b(?:abstract|boolean|break|byte|case|ca.../ at patterns[0].match"
        );
        assert_eq!(grammar.describe(RuleId(2)), "[--] include #nope (disabled)");
        assert_eq!(
            grammar.describe(RuleId(3)),
            "[--] begin-end /\"/ at patterns[2].begin"
        );
        assert_eq!(grammar.describe(ROOT_RULE_ID), "[--] group of 3 patterns");
    }
}
