use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, TmResult};
use crate::grammars::{
    Grammar, IncludeTarget, Injection, ROOT_RULE_ID, RawGrammar, Regex, Rule, RuleId,
};
use crate::tokenizer::{Token, Tokenizer};

/// How many resolved end/while patterns a registry keeps around. Each distinct begin
/// capture (heredoc labels, tag names...) adds one.
const MAX_RESOLVED_PATTERNS: usize = 512;

/// Index of a grammar in a [`Registry`]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GrammarId(pub u16);

impl GrammarId {
    pub fn as_index(self) -> usize {
        self.0 as usize
    }

    fn from_index(index: usize) -> TmResult<Self> {
        u16::try_from(index)
            .map(GrammarId)
            .map_err(|_| Error::RegistryFull)
    }
}

/// A rule in any grammar of a registry
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RuleRef {
    pub grammar: GrammarId,
    pub rule: RuleId,
}

impl RuleRef {
    pub fn root(grammar: GrammarId) -> Self {
        Self {
            grammar,
            rule: ROOT_RULE_ID,
        }
    }
}

/// Holds all the grammars and resolves references between them.
///
/// Grammars are read-only once added so a registry can be shared between threads, each
/// tokenizing its own documents.
pub struct Registry {
    grammars: Vec<Grammar>,
    // grammar scope name -> grammar ID, used by includes
    grammar_id_by_scope_name: HashMap<String, GrammarId>,
    // grammar name -> grammar ID, for end users
    grammar_id_by_name: HashMap<String, GrammarId>,
    // scope names of the grammars whose `injectionSelector` applies to everything
    injection_scopes: Vec<String>,
    // end/while patterns once their back-references are filled in, shared by all tokenizers.
    // Emptied when it reaches MAX_RESOLVED_PATTERNS.
    resolved_patterns: papaya::HashMap<String, Arc<Regex>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            grammars: Vec::new(),
            grammar_id_by_scope_name: HashMap::new(),
            grammar_id_by_name: HashMap::new(),
            injection_scopes: Vec::new(),
            resolved_patterns: papaya::HashMap::new(),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("grammars", &self.grammar_id_by_scope_name)
            .field("injection_scopes", &self.injection_scopes)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Adds a grammar. A grammar with the same scope name added later takes its place
    /// for includes, tokenizers already created keep using the old one.
    pub fn add_grammar(&mut self, grammar: Grammar) -> TmResult<GrammarId> {
        let grammar_id = GrammarId::from_index(self.grammars.len())?;
        self.grammar_id_by_scope_name
            .insert(grammar.scope_name.clone(), grammar_id);
        if !grammar.name.is_empty() {
            self.grammar_id_by_name
                .insert(grammar.name.clone(), grammar_id);
        }
        self.grammars.push(grammar);
        Ok(grammar_id)
    }

    pub fn add_grammar_from_raw(&mut self, raw_grammar: RawGrammar) -> TmResult<GrammarId> {
        let grammar = Grammar::from_raw(raw_grammar)?;
        self.add_grammar(grammar)
    }

    pub fn add_grammar_from_str(&mut self, json: &str) -> TmResult<GrammarId> {
        self.add_grammar_from_raw(RawGrammar::from_json_str(json)?)
    }

    /// Reads the file and add it as a grammar.
    pub fn add_grammar_from_path(&mut self, path: impl AsRef<Path>) -> TmResult<GrammarId> {
        self.add_grammar_from_raw(RawGrammar::load_from_file(path)?)
    }

    /// Makes the `injectionSelector` of the grammar with that scope name apply to all
    /// the other grammars.
    pub fn add_injection_scope(&mut self, scope_name: &str) {
        if !self.injection_scopes.iter().any(|s| s == scope_name) {
            self.injection_scopes.push(scope_name.to_owned());
        }
    }

    pub fn grammar(&self, id: GrammarId) -> &Grammar {
        &self.grammars[id.as_index()]
    }

    pub fn grammar_id_by_scope_name(&self, scope_name: &str) -> Option<GrammarId> {
        self.grammar_id_by_scope_name.get(scope_name).copied()
    }

    /// Finds a grammar by its name or its scope name
    pub fn grammar_id(&self, name: &str) -> Option<GrammarId> {
        self.grammar_id_by_name
            .get(name)
            .or_else(|| self.grammar_id_by_scope_name.get(name))
            .copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.grammar_id(name).is_some()
    }

    /// A tokenizer over `text` for the grammar with that name or scope name.
    pub fn tokenizer(&self, name: &str, text: &str) -> TmResult<Tokenizer<'_>> {
        let grammar_id = self
            .grammar_id(name)
            .ok_or_else(|| Error::GrammarNotFound(name.to_owned()))?;
        Ok(Tokenizer::from_text(self, grammar_id, text))
    }

    /// Tokenizes all the lines of `text`
    pub fn tokenize_text(&self, name: &str, text: &str) -> TmResult<Vec<Vec<Token>>> {
        let mut tokenizer = self.tokenizer(name, text)?;
        let mut out = Vec::new();
        while !tokenizer.is_at_end() {
            out.push(tokenizer.parse_next_line()?);
        }
        Ok(out)
    }

    /// The injections that apply when tokenizing with `base`: its own ones first, then
    /// the ones other grammars export to it.
    pub(crate) fn injections_for(&self, base: GrammarId) -> Vec<(GrammarId, &Injection)> {
        let base_grammar = self.grammar(base);
        let mut out: Vec<(GrammarId, &Injection)> = base_grammar
            .injections
            .iter()
            .map(|injection| (base, injection))
            .collect();

        for (index, grammar) in self.grammars.iter().enumerate() {
            let grammar_id = GrammarId(index as u16);
            if grammar_id == base
                || self.grammar_id_by_scope_name(&grammar.scope_name) != Some(grammar_id)
            {
                continue;
            }
            let Some(injection) = &grammar.injection else {
                continue;
            };
            if self.injection_scopes.contains(&grammar.scope_name)
                || grammar.inject_to.contains(&base_grammar.scope_name)
            {
                out.push((grammar_id, injection));
            }
        }

        out
    }

    /// Returns the shared compiled form of an end/while pattern after back-references
    /// have been resolved.
    pub(crate) fn resolved_pattern(&self, pattern: String, location: &str) -> Arc<Regex> {
        let patterns = self.resolved_patterns.pin();
        if let Some(regex) = patterns.get(&pattern) {
            return regex.clone();
        }
        if patterns.len() >= MAX_RESOLVED_PATTERNS {
            // activations already holding one of them keep their own reference
            patterns.clear();
        }
        let regex = Arc::new(Regex::new(pattern.clone(), location.to_owned()));
        patterns.get_or_insert(pattern, regex).clone()
    }

    /// Where an include points to, if it resolves to anything.
    pub(crate) fn resolve_include(&self, base: GrammarId, include: RuleRef) -> Option<RuleRef> {
        let grammar = self.grammar(include.grammar);
        let Rule::Include(rule) = grammar.rule(include.rule) else {
            return Some(include);
        };

        match &rule.target {
            IncludeTarget::SelfRoot => Some(RuleRef::root(include.grammar)),
            IncludeTarget::BaseRoot => Some(RuleRef::root(base)),
            IncludeTarget::Local(name) => grammar.lookup(rule.id, name).map(|rule| RuleRef {
                grammar: include.grammar,
                rule,
            }),
            IncludeTarget::Grammar { scope, rule } => {
                let grammar_id = self.grammar_id_by_scope_name(scope)?;
                match rule {
                    None => Some(RuleRef::root(grammar_id)),
                    Some(name) => self
                        .grammar(grammar_id)
                        .lookup(ROOT_RULE_ID, name)
                        .map(|rule| RuleRef {
                            grammar: grammar_id,
                            rule,
                        }),
                }
            }
            IncludeTarget::Unknown(_) => None,
        }
    }

    /// The matching rules reachable from the child patterns of `owner`, in declaration
    /// order. Includes and groups are flattened, includes that don't resolve are skipped.
    pub fn collect_child_candidates(&self, base: GrammarId, owner: RuleRef) -> Vec<RuleRef> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let patterns = self.grammar(owner.grammar).rule(owner.rule).patterns();
        for &rule in patterns {
            self.expand(
                base,
                RuleRef {
                    grammar: owner.grammar,
                    rule,
                },
                &mut visited,
                &mut out,
            );
        }
        out
    }

    /// The matching rules reachable from `rule` itself: the rule if it matches
    /// something, its flattened patterns if it's a group or an include.
    pub fn collect_entry_candidates(&self, base: GrammarId, rule: RuleRef) -> Vec<RuleRef> {
        let mut out = Vec::new();
        self.expand(base, rule, &mut HashSet::new(), &mut out);
        out
    }

    fn expand(
        &self,
        base: GrammarId,
        rule_ref: RuleRef,
        visited: &mut HashSet<RuleRef>,
        out: &mut Vec<RuleRef>,
    ) {
        if !visited.insert(rule_ref) {
            return;
        }

        let grammar = self.grammar(rule_ref.grammar);
        let rule = grammar.rule(rule_ref.rule);
        if rule.is_disabled() {
            log::debug!("skipping disabled rule {}", grammar.describe(rule_ref.rule));
            return;
        }

        match rule {
            Rule::Match(_) | Rule::BeginEnd(_) | Rule::BeginWhile(_) => out.push(rule_ref),
            Rule::Group(group) => {
                for &child in &group.patterns {
                    self.expand(
                        base,
                        RuleRef {
                            grammar: rule_ref.grammar,
                            rule: child,
                        },
                        visited,
                        out,
                    );
                }
            }
            Rule::Include(include) => match self.resolve_include(base, rule_ref) {
                Some(target) => self.expand(base, target, visited, out),
                None => {
                    log::debug!(
                        "unresolved include '{}' in grammar {}",
                        include.target,
                        grammar.scope_name
                    );
                }
            },
        }
    }
}
