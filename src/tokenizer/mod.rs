//! The line tokenizer, following the state machine of
//! <https://github.com/microsoft/vscode-textmate>
//!
//! Every line is searched as its content followed by `\n`, whatever terminator it had,
//! so patterns relying on `$` or `\n` behave the same everywhere. Tokens never cover
//! that newline.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::error::TmResult;
use crate::grammars::{
    AnchorActive, CaptureAnchor, Captures, InjectionPrecedence, Injection, MatchResult, RegexId,
    Rule, ScopeTemplate, build_anchor_tree, resolve_backreferences,
};
use crate::lines;
use crate::registry::{GrammarId, Registry, RuleRef};
use crate::scope::{ScopeName, ScopePath};
use crate::tokenizer::stack::{ExitPattern, FrameKind, ResolvedCapture, StackFrame, StateStack};

mod accumulator;
mod stack;

pub use accumulator::ScopeAccumulator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Byte span within the line (start inclusive, end exclusive, 0-based)
    pub span: Range<usize>,
    /// Hierarchical scope names, ordered from outermost to innermost
    /// (e.g., source.js -> string.quoted.double -> punctuation.definition.string).
    pub scopes: ScopePath,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{} {}", self.span.start, self.span.end, self.scopes)
    }
}

/// Small wrapper so we make we only produce valid tokens.
/// Tokens are never empty and never go past the end of the line content.
#[derive(Debug, Clone)]
struct TokenAccumulator {
    tokens: Vec<Token>,
    /// Position up to which tokens have been generated
    /// (start of next token to be produced)
    last_end_pos: usize,
    /// End of the line without its terminator
    line_end: usize,
}

impl TokenAccumulator {
    fn new(line_end: usize) -> Self {
        Self {
            tokens: Vec::new(),
            last_end_pos: 0,
            line_end,
        }
    }

    fn produce(&mut self, end_pos: usize, scopes: &ScopePath) {
        let end_pos = end_pos.min(self.line_end);
        // Skip empty tokens (can happen with zero-width matches)
        if self.last_end_pos >= end_pos {
            return;
        }

        #[cfg(feature = "debug")]
        log::debug!("[produce]: [{}..{end_pos}] {scopes}", self.last_end_pos);
        self.tokens.push(Token {
            span: self.last_end_pos..end_pos,
            scopes: scopes.clone(),
        });
        self.last_end_pos = end_pos;
    }
}

/// Where we are in the line being tokenized
struct LineState<'a> {
    /// Line content followed by `\n`
    text: &'a str,
    pos: usize,
    /// Where `\G` matches
    anchor_position: Option<usize>,
    /// Whether `\A` can match, only until something was consumed on the first line
    is_first_line: bool,
    acc: TokenAccumulator,
}

impl LineState<'_> {
    fn anchors(&self) -> AnchorActive {
        AnchorActive::new(self.is_first_line, self.anchor_position, self.pos)
    }
}

/// Something to search at the current position
#[derive(Debug, Copy, Clone)]
enum Candidate {
    /// The end pattern of the frame on top of the stack
    Exit,
    Rule(RuleRef),
}

/// Tokenizes a document line by line with a grammar of a registry.
///
/// The state is carried over between lines so lines need to be fed in order.
/// Different documents can be tokenized at the same time by different tokenizers
/// sharing the same registry.
#[derive(Debug)]
pub struct Tokenizer<'r> {
    registry: &'r Registry,
    /// The grammar we started with, what `$base` refers to
    base_grammar_id: GrammarId,
    stack: StateStack,
    lines: Vec<String>,
    next_line: usize,
    is_first_line: bool,
    trace: bool,
    injections: Vec<(GrammarId, &'r Injection)>,
    /// Flattened patterns of rules, keyed by rule and whether it's the children of the
    /// rule or the rule itself
    candidate_cache: HashMap<(RuleRef, bool), Arc<[RuleRef]>>,
}

impl<'r> Tokenizer<'r> {
    pub fn new(registry: &'r Registry, grammar_id: GrammarId, lines: Vec<String>) -> Self {
        let grammar = registry.grammar(grammar_id);
        Self {
            registry,
            base_grammar_id: grammar_id,
            stack: StateStack::new(grammar_id, grammar.scope.clone()),
            lines,
            next_line: 0,
            is_first_line: true,
            trace: false,
            injections: registry.injections_for(grammar_id),
            candidate_cache: HashMap::new(),
        }
    }

    pub fn from_text(registry: &'r Registry, grammar_id: GrammarId, text: &str) -> Self {
        let lines = lines::split_lines(text)
            .into_iter()
            .map(str::to_owned)
            .collect();
        Self::new(registry, grammar_id, lines)
    }

    /// Logs every rule transition with `log::trace!`
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn is_at_end(&self) -> bool {
        self.next_line >= self.lines.len()
    }

    /// Index of the line the next call to [`Tokenizer::parse_next_line`] tokenizes
    pub fn current_line(&self) -> usize {
        self.next_line
    }

    /// Number of rules currently open, the grammar root included
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Tokenizes the next line. Returns no tokens once all the lines are done.
    pub fn parse_next_line(&mut self) -> TmResult<Vec<Token>> {
        let Some(line) = self.lines.get(self.next_line).cloned() else {
            return Ok(Vec::new());
        };
        self.next_line += 1;
        self.tokenize_line(&line)
    }

    /// Tokenizes a line that follows the last one tokenized, for callers feeding
    /// lines themselves. A line terminator at the end of `line` is ignored.
    pub fn tokenize_line(&mut self, line: &str) -> TmResult<Vec<Token>> {
        let content_end = lines::content_end(line);
        let mut text = String::with_capacity(content_end + 1);
        text.push_str(&line[..content_end]);
        text.push('\n');

        let mut stack = std::mem::take(&mut self.stack);
        let mut state = LineState {
            text: &text,
            pos: 0,
            anchor_position: stack.top().begin_rule_has_captured_eol.then_some(0),
            is_first_line: self.is_first_line,
            acc: TokenAccumulator::new(content_end),
        };

        let res = self.tokenize_with(&mut stack, &mut state);
        if res.is_err() {
            // frames bounded to this line can't survive it
            stack.frames.retain(|frame| frame.end_position.is_none());
        }
        stack.reset();
        self.stack = stack;
        self.is_first_line = false;
        res?;

        Ok(state.acc.tokens)
    }

    fn tokenize_with(&mut self, stack: &mut StateStack, state: &mut LineState<'_>) -> TmResult<()> {
        self.check_while_conditions(stack, state)?;
        self.scan(stack, state, None)?;
        debug_assert!(stack.frames.iter().all(|f| f.end_position.is_none()));
        Ok(())
    }

    /// Checks at the start of the line that the while patterns of the open BeginWhile
    /// rules still match, outermost first. The first one that doesn't is closed along
    /// with everything opened after it.
    fn check_while_conditions(
        &mut self,
        stack: &mut StateStack,
        state: &mut LineState<'_>,
    ) -> TmResult<()> {
        let while_frames: Vec<usize> = stack
            .frames
            .iter()
            .enumerate()
            .filter(|(_, frame)| frame.kind == FrameKind::BeginWhile)
            .map(|(idx, _)| idx)
            .collect();

        for idx in while_frames {
            let frame = &stack.frames[idx];
            let rule_ref = frame.rule_ref;
            let Some(pattern) = &frame.exit_pattern else {
                continue;
            };

            let found = pattern
                .regex(self.registry)
                .search(state.text, state.pos..state.text.len(), state.anchors())?
                .filter(|m| m.start() == state.pos);

            let Some(m) = found else {
                if self.trace {
                    log::trace!(
                        "[while] {} no longer matches at {}, closing {} rule(s)",
                        self.describe(rule_ref),
                        state.pos,
                        stack.len() - idx
                    );
                }
                stack.frames.truncate(idx);
                break;
            };

            if self.trace {
                log::trace!(
                    "[while] {} continues at {}..{}",
                    self.describe(rule_ref),
                    m.start(),
                    m.end()
                );
            }

            // The while match is scoped with the rule but nothing opened after it
            let mut while_stack = StateStack {
                frames: stack.frames[..=idx].to_vec(),
            };
            let scopes = while_stack.top().content_scopes.clone();
            let has_advanced = m.end() > state.pos;
            let (grammar, captures) = self.exit_captures(rule_ref);
            if self.enter_captures(&mut while_stack, state, &m, scopes, grammar, captures) {
                self.scan(&mut while_stack, state, Some(idx + 1))?;
            }

            state.anchor_position = Some(m.end());
            if has_advanced {
                state.pos = state.pos.max(m.end());
                state.is_first_line = false;
            }
        }

        Ok(())
    }

    /// Tokenizes from the current position until the end of the line. With a
    /// `stop_depth`, returns as soon as the stack is back to that many frames.
    fn scan(
        &mut self,
        stack: &mut StateStack,
        state: &mut LineState<'_>,
        stop_depth: Option<usize>,
    ) -> TmResult<()> {
        loop {
            let top = stack.top_mut();
            while top
                .pending_captures
                .front()
                .is_some_and(|anchor| anchor.range.start < state.pos)
            {
                top.pending_captures.pop_front();
            }
            let bound = top.end_position.unwrap_or(state.text.len());
            let next_capture = top.pending_captures.front().map(|a| a.range.start);

            // nothing left in a bounded frame but zero-width matches, which would only
            // reopen what was just closed
            let exhausted = top.end_position.is_some() && state.pos >= bound;
            let found = if top.is_searchable() && !exhausted {
                self.find_best_match(stack, state, bound)?.filter(|(m, _)| {
                    next_capture.is_none_or(|capture_start| m.start() < capture_start)
                })
            } else {
                None
            };

            if let Some((m, candidate)) = found {
                if !self.apply_match(stack, state, m, candidate)? {
                    self.stop_line(stack, state);
                    return Ok(());
                }
                continue;
            }

            if let Some(anchor) = stack.top_mut().pending_captures.pop_front() {
                let parent = stack.top().content_scopes.clone();
                state.acc.produce(anchor.range.start, &parent);
                state.pos = anchor.range.start;
                let scopes = parent.with(&anchor.attribute.scopes);
                stack.push_capture(
                    scopes,
                    anchor.attribute.patterns,
                    anchor.range,
                    anchor.children,
                    state.anchor_position,
                );
                continue;
            }

            let top = stack.top();
            state.acc.produce(bound, &top.content_scopes);
            state.pos = state.pos.max(bound);
            if top.end_position.is_none() {
                return Ok(());
            }

            let popped = stack.pop();
            if popped.kind != FrameKind::Capture {
                if self.trace {
                    log::trace!("[pop] {} at end of captured text", self.describe(popped.rule_ref));
                }
                state.anchor_position = popped.anchor_position;
            }
            if stop_depth == Some(stack.len()) {
                return Ok(());
            }
        }
    }

    /// Finds the match starting first among everything that can match in the top frame.
    /// Ties go to whatever comes first in this order: injections with the `L:`
    /// precedence, the end pattern, the rule patterns and the other injections. The
    /// end pattern goes after the rule patterns for rules with `applyEndPatternLast`.
    fn find_best_match(
        &mut self,
        stack: &StateStack,
        state: &LineState<'_>,
        bound: usize,
    ) -> TmResult<Option<(MatchResult, Candidate)>> {
        let top = stack.top();
        let Some(owner) = top.rule_ref else {
            return Ok(None);
        };

        let injected: Vec<(InjectionPrecedence, RuleRef)> = self
            .injections
            .iter()
            .filter_map(|(grammar, injection)| {
                injection
                    .selector
                    .match_scopes(top.content_scopes.as_slice())
                    .map(|precedence| {
                        (
                            precedence,
                            RuleRef {
                                grammar: *grammar,
                                rule: injection.rule,
                            },
                        )
                    })
            })
            .collect();

        let mut ordered: Vec<Candidate> = Vec::new();
        for (_, rule) in injected
            .iter()
            .filter(|(precedence, _)| *precedence == InjectionPrecedence::Left)
        {
            ordered.extend(self.candidates(*rule, false).iter().map(|&r| Candidate::Rule(r)));
        }
        let has_exit = top.kind == FrameKind::BeginEnd && top.exit_pattern.is_some();
        if has_exit && !top.apply_end_pattern_last {
            ordered.push(Candidate::Exit);
        }
        ordered.extend(self.candidates(owner, true).iter().map(|&r| Candidate::Rule(r)));
        if has_exit && top.apply_end_pattern_last {
            ordered.push(Candidate::Exit);
        }
        for (_, rule) in injected
            .iter()
            .filter(|(precedence, _)| *precedence != InjectionPrecedence::Left)
        {
            ordered.extend(self.candidates(*rule, false).iter().map(|&r| Candidate::Rule(r)));
        }

        let anchors = state.anchors();
        let mut best: Option<(MatchResult, Candidate)> = None;
        for candidate in ordered {
            let regex = match candidate {
                Candidate::Exit => match &top.exit_pattern {
                    Some(pattern) => pattern.regex(self.registry),
                    None => continue,
                },
                Candidate::Rule(rule_ref) => {
                    let grammar = self.registry.grammar(rule_ref.grammar);
                    match grammar.rule(rule_ref.rule).entry_regex() {
                        Some(id) => grammar.regex(id),
                        None => continue,
                    }
                }
            };

            let Some(m) = regex.search(state.text, state.pos..bound, anchors)? else {
                continue;
            };
            if best.as_ref().is_none_or(|(b, _)| m.start() < b.start()) {
                let is_done = m.start() == state.pos;
                best = Some((m, candidate));
                if is_done {
                    break;
                }
            }
        }

        Ok(best)
    }

    /// Applies a match found in the top frame. Returns false if the grammar is stuck
    /// at the current position, in which case nothing else is tried on this line.
    fn apply_match(
        &self,
        stack: &mut StateStack,
        state: &mut LineState<'_>,
        m: MatchResult,
        candidate: Candidate,
    ) -> TmResult<bool> {
        let has_advanced = m.end() > state.pos;
        let top_scopes = stack.top().content_scopes.clone();
        state.acc.produce(m.start(), &top_scopes);

        let pushed_captures = match candidate {
            Candidate::Exit => {
                let popped = stack.pop();
                // Grammar pushed & popped a rule without advancing
                if !has_advanced && popped.enter_position == Some(state.pos) {
                    if self.trace {
                        log::trace!(
                            "[loop guard] {} ended where it started at {}",
                            self.describe(popped.rule_ref),
                            state.pos
                        );
                    }
                    stack.push(popped);
                    return Ok(false);
                }
                if self.trace {
                    log::trace!(
                        "[pop] {} at {}..{}",
                        self.describe(popped.rule_ref),
                        m.start(),
                        m.end()
                    );
                }
                state.anchor_position = popped.anchor_position;
                let (grammar, captures) = self.exit_captures(popped.rule_ref);
                self.enter_captures(stack, state, &m, popped.name_scopes, grammar, captures)
            }
            Candidate::Rule(rule_ref) => {
                let grammar = self.registry.grammar(rule_ref.grammar);
                match grammar.rule(rule_ref.rule) {
                    Rule::Match(rule) => {
                        if !has_advanced {
                            if self.trace {
                                log::trace!(
                                    "[loop guard] {} matched nothing at {}",
                                    self.describe(Some(rule_ref)),
                                    state.pos
                                );
                            }
                            return Ok(false);
                        }
                        if self.trace {
                            log::trace!(
                                "[match] {} at {}..{}",
                                self.describe(Some(rule_ref)),
                                m.start(),
                                m.end()
                            );
                        }
                        let scopes = top_scopes.with(&resolve(rule.name.as_ref(), state.text, &m));
                        self.enter_captures(
                            stack,
                            state,
                            &m,
                            scopes,
                            rule_ref.grammar,
                            Some(&rule.captures),
                        )
                    }
                    Rule::BeginEnd(rule) => {
                        if !has_advanced && stack.has_entered_at(rule_ref, state.pos) {
                            return Ok(self.begin_loop(rule_ref, state));
                        }
                        let exit = self.exit_pattern(
                            rule_ref.grammar,
                            rule.end,
                            rule.end_has_backrefs,
                            state.text,
                            &m,
                        );
                        let frame = self.begin_frame(
                            stack,
                            state,
                            &m,
                            rule_ref,
                            FrameKind::BeginEnd,
                            (rule.name.as_ref(), rule.content_name.as_ref()),
                            exit,
                            rule.apply_end_pattern_last,
                        );
                        let name_scopes = frame.name_scopes.clone();
                        stack.push(frame);
                        state.anchor_position = Some(m.end());
                        self.enter_captures(
                            stack,
                            state,
                            &m,
                            name_scopes,
                            rule_ref.grammar,
                            Some(&rule.begin_captures),
                        )
                    }
                    Rule::BeginWhile(rule) => {
                        if !has_advanced && stack.has_entered_at(rule_ref, state.pos) {
                            return Ok(self.begin_loop(rule_ref, state));
                        }
                        let exit = self.exit_pattern(
                            rule_ref.grammar,
                            rule.while_,
                            rule.while_has_backrefs,
                            state.text,
                            &m,
                        );
                        let frame = self.begin_frame(
                            stack,
                            state,
                            &m,
                            rule_ref,
                            FrameKind::BeginWhile,
                            (rule.name.as_ref(), rule.content_name.as_ref()),
                            exit,
                            false,
                        );
                        let name_scopes = frame.name_scopes.clone();
                        stack.push(frame);
                        state.anchor_position = Some(m.end());
                        self.enter_captures(
                            stack,
                            state,
                            &m,
                            name_scopes,
                            rule_ref.grammar,
                            Some(&rule.begin_captures),
                        )
                    }
                    Rule::Include(_) | Rule::Group(_) => {
                        unreachable!("only rules with a pattern are searched")
                    }
                }
            }
        };

        if pushed_captures {
            // the captures frame walks over the match itself
            state.pos = m.start();
        } else if has_advanced {
            state.pos = m.end();
        }
        if has_advanced {
            state.is_first_line = false;
        }
        Ok(true)
    }

    fn begin_loop(&self, rule_ref: RuleRef, state: &LineState<'_>) -> bool {
        if self.trace {
            log::trace!(
                "[loop guard] {} was already entered at {}",
                self.describe(Some(rule_ref)),
                state.pos
            );
        }
        false
    }

    #[allow(clippy::too_many_arguments)]
    fn begin_frame(
        &self,
        stack: &StateStack,
        state: &LineState<'_>,
        m: &MatchResult,
        rule_ref: RuleRef,
        kind: FrameKind,
        (name, content_name): (Option<&ScopeTemplate>, Option<&ScopeTemplate>),
        exit: ExitPattern,
        apply_end_pattern_last: bool,
    ) -> StackFrame {
        let parent = stack.top();
        let name_scopes = parent
            .content_scopes
            .with(&resolve(name, state.text, m));
        let content_scopes = name_scopes.with(&resolve(content_name, state.text, m));

        if self.trace {
            log::trace!(
                "[push] {} at {}..{}",
                self.describe(Some(rule_ref)),
                m.start(),
                m.end()
            );
        }

        StackFrame {
            kind,
            rule_ref: Some(rule_ref),
            name_scopes,
            content_scopes,
            exit_pattern: Some(exit),
            apply_end_pattern_last,
            pending_captures: Default::default(),
            end_position: parent.end_position,
            begin_rule_has_captured_eol: m.end() == state.text.len(),
            anchor_position: state.anchor_position,
            enter_position: Some(state.pos),
        }
    }

    /// The end/while pattern of a rule that just began, with its back-references
    /// filled by the begin match
    fn exit_pattern(
        &self,
        grammar: GrammarId,
        regex: RegexId,
        has_backrefs: bool,
        text: &str,
        m: &MatchResult,
    ) -> ExitPattern {
        if has_backrefs {
            let source = self.registry.grammar(grammar).regex(regex);
            if let Some(resolved) = resolve_backreferences(source.pattern(), text, m) {
                #[cfg(feature = "debug")]
                log::debug!("[exit_pattern] {} -> {resolved}", source.pattern());
                return ExitPattern::Resolved(
                    self.registry.resolved_pattern(resolved, source.location()),
                );
            }
        }
        ExitPattern::Static { grammar, regex }
    }

    /// The end or while captures of the rule that created a frame
    fn exit_captures(&self, rule_ref: Option<RuleRef>) -> (GrammarId, Option<&'r Captures>) {
        let Some(rule_ref) = rule_ref else {
            return (self.base_grammar_id, None);
        };
        let registry: &'r Registry = self.registry;
        let captures = match registry.grammar(rule_ref.grammar).rule(rule_ref.rule) {
            Rule::BeginEnd(rule) => Some(&rule.end_captures),
            Rule::BeginWhile(rule) => Some(&rule.while_captures),
            _ => None,
        };
        (rule_ref.grammar, captures)
    }

    /// Scopes the text of a match: `scopes` over all of it plus the scopes of the
    /// capture groups. Groups that only add scopes are turned into tokens right away;
    /// if some need to be tokenized with their own patterns, a frame covering the
    /// match is pushed instead and true is returned.
    fn enter_captures(
        &self,
        stack: &mut StateStack,
        state: &mut LineState<'_>,
        m: &MatchResult,
        scopes: ScopePath,
        grammar: GrammarId,
        captures: Option<&Captures>,
    ) -> bool {
        let range = m.range();
        if range.is_empty() {
            return false;
        }
        let Some(captures) = captures.filter(|c| !c.is_empty()) else {
            state.acc.produce(range.end, &scopes);
            return false;
        };

        let clipped = m.clipped();
        let attributes = captures
            .iter()
            .filter(|(index, _)| clipped.get(*index).is_some_and(|r| !r.is_empty()))
            .map(|(index, attribute)| {
                let capture = ResolvedCapture {
                    scopes: resolve(attribute.name.as_ref(), state.text, m),
                    patterns: attribute.patterns.map(|rule| RuleRef { grammar, rule }),
                };
                (index, capture)
            });
        let anchors = build_anchor_tree(&clipped, attributes);

        if captures.has_patterns() {
            stack.push_capture(scopes, None, range, anchors, state.anchor_position);
            return true;
        }

        fn flatten(acc: &mut ScopeAccumulator, anchors: &[CaptureAnchor<ResolvedCapture>]) {
            for anchor in anchors {
                for scope in &anchor.attribute.scopes {
                    acc.push(anchor.range.clone(), scope.clone());
                }
                flatten(acc, &anchor.children);
            }
        }
        let mut accumulator = ScopeAccumulator::new();
        flatten(&mut accumulator, &anchors);
        for (span, inner) in accumulator.build_tokens() {
            state.acc.produce(span.start, &scopes);
            state.acc.produce(span.end, &scopes.with(&inner));
        }
        state.acc.produce(range.end, &scopes);
        false
    }

    /// The grammar is stuck: close what was opened for captures and scope the rest of
    /// the line with what is left.
    fn stop_line(&self, stack: &mut StateStack, state: &mut LineState<'_>) {
        while let Some(end) = stack.top().end_position {
            state.acc.produce(end, &stack.top().content_scopes);
            let popped = stack.pop();
            if popped.kind != FrameKind::Capture {
                state.anchor_position = popped.anchor_position;
            }
        }
        state.acc.produce(state.text.len(), &stack.top().content_scopes);
        state.pos = state.text.len();
    }

    fn candidates(&mut self, rule: RuleRef, children: bool) -> Arc<[RuleRef]> {
        if let Some(found) = self.candidate_cache.get(&(rule, children)) {
            return found.clone();
        }

        let list: Arc<[RuleRef]> = if children {
            self.registry
                .collect_child_candidates(self.base_grammar_id, rule)
                .into()
        } else {
            self.registry
                .collect_entry_candidates(self.base_grammar_id, rule)
                .into()
        };
        #[cfg(feature = "debug")]
        log::debug!(
            "[candidates] {} -> {} rule(s)",
            self.describe(Some(rule)),
            list.len()
        );
        self.candidate_cache.insert((rule, children), list.clone());
        list
    }

    fn describe(&self, rule_ref: Option<RuleRef>) -> String {
        match rule_ref {
            Some(r) => self.registry.grammar(r.grammar).describe(r.rule),
            None => "[captures]".to_owned(),
        }
    }
}

fn resolve(template: Option<&ScopeTemplate>, text: &str, m: &MatchResult) -> Vec<ScopeName> {
    template
        .map(|template| template.resolve(text, m))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;

    fn registry_with(grammars: &[serde_json::Value]) -> Registry {
        let mut registry = Registry::default();
        for grammar in grammars {
            registry.add_grammar_from_str(&grammar.to_string()).unwrap();
        }
        registry
    }

    fn render(lines: &[Vec<Token>]) -> Vec<Vec<String>> {
        lines
            .iter()
            .map(|tokens| tokens.iter().map(|t| t.to_string()).collect())
            .collect()
    }

    fn tokenize(grammar: serde_json::Value, text: &str) -> Vec<Vec<String>> {
        let scope_name = grammar["scopeName"].as_str().unwrap().to_owned();
        let registry = registry_with(&[grammar]);
        render(&registry.tokenize_text(&scope_name, text).unwrap())
    }

    fn json_grammar() -> serde_json::Value {
        json!({
            "name": "JSON",
            "scopeName": "source.json",
            "patterns": [{ "include": "#value" }],
            "repository": {
                "value": {
                    "patterns": [{ "include": "#array" }, { "include": "#number" }]
                },
                "array": {
                    "begin": "\\[",
                    "end": "\\]",
                    "name": "meta.structure.array.json",
                    "beginCaptures": { "0": { "name": "punctuation.definition.array.begin.json" } },
                    "endCaptures": { "0": { "name": "punctuation.definition.array.end.json" } },
                    "patterns": [{ "include": "#value" }]
                },
                "number": { "match": "\\d+", "name": "constant.numeric.json" }
            }
        })
    }

    #[test]
    fn test_match_rule() {
        let grammar = json!({
            "scopeName": "source.json",
            "patterns": [{ "match": "\\d+", "name": "constant.numeric.json" }]
        });
        assert_eq!(
            tokenize(grammar, "123 456 789"),
            vec![vec![
                "0..3 source.json constant.numeric.json",
                "3..4 source.json",
                "4..7 source.json constant.numeric.json",
                "7..8 source.json",
                "8..11 source.json constant.numeric.json",
            ]]
        );
    }

    #[test]
    fn test_nested_begin_end() {
        let tokens = tokenize(json_grammar(), "[ [ 123 ] ]");
        insta::assert_snapshot!(tokens[0].join("\n"), @r"
        0..1 source.json meta.structure.array.json punctuation.definition.array.begin.json
        1..2 source.json meta.structure.array.json
        2..3 source.json meta.structure.array.json meta.structure.array.json punctuation.definition.array.begin.json
        3..4 source.json meta.structure.array.json meta.structure.array.json
        4..7 source.json meta.structure.array.json meta.structure.array.json constant.numeric.json
        7..8 source.json meta.structure.array.json meta.structure.array.json
        8..9 source.json meta.structure.array.json meta.structure.array.json punctuation.definition.array.end.json
        9..10 source.json meta.structure.array.json
        10..11 source.json meta.structure.array.json punctuation.definition.array.end.json
        ");
    }

    #[test]
    fn test_begin_end_over_multiple_lines() {
        let tokens = tokenize(json_grammar(), "[\n1]\n");
        assert_eq!(
            tokens,
            vec![
                vec!["0..1 source.json meta.structure.array.json punctuation.definition.array.begin.json"],
                vec![
                    "0..1 source.json meta.structure.array.json constant.numeric.json",
                    "1..2 source.json meta.structure.array.json punctuation.definition.array.end.json",
                ],
            ]
        );
    }

    #[test]
    fn test_capture_zero_is_layered_under_rule_name() {
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{ "match": "aaa", "name": "aaa", "captures": { "0": { "name": "aaa0" } } }]
        });
        assert_eq!(
            tokenize(grammar, "bbaaabb"),
            vec![vec!["0..2 root", "2..5 root aaa aaa0", "5..7 root"]]
        );
    }

    #[test]
    fn test_content_name() {
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{ "begin": "a", "end": "b", "name": "outer", "contentName": "inner" }]
        });
        assert_eq!(
            tokenize(grammar, "axb"),
            vec![vec!["0..1 root outer", "1..2 root outer inner", "2..3 root outer"]]
        );
    }

    #[test]
    fn test_nested_captures() {
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{
                "match": "((\\w+)\\.)(\\w+)",
                "name": "call",
                "captures": {
                    "1": { "name": "receiver" },
                    "2": { "name": "variable" },
                    "3": { "name": "method" }
                }
            }]
        });
        assert_eq!(
            tokenize(grammar, " ab.cd "),
            vec![vec![
                "0..1 root",
                "1..3 root call receiver variable",
                "3..4 root call receiver",
                "4..6 root call method",
                "6..7 root",
            ]]
        );
    }

    #[test]
    fn test_captures_with_patterns() {
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{
                "match": "(\\w+)=(\\w+)",
                "captures": {
                    "1": { "name": "key", "patterns": [{ "match": "_", "name": "sep" }] },
                    "2": { "name": "value" }
                }
            }]
        });
        assert_eq!(
            tokenize(grammar, "a_b=c"),
            vec![vec![
                "0..1 root key",
                "1..2 root key sep",
                "2..3 root key",
                "3..4 root",
                "4..5 root value",
            ]]
        );
    }

    #[test]
    fn test_repeated_group_captures_in_text_order() {
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{
                "match": "(?:(x)|(y))+",
                "captures": {
                    "1": { "name": "ex", "patterns": [{ "match": "x", "name": "inner" }] },
                    "2": { "name": "why" }
                }
            }]
        });
        assert_eq!(
            tokenize(grammar, "yx"),
            vec![vec!["0..1 root why", "1..2 root ex inner"]]
        );
    }

    #[test]
    fn test_begin_end_inside_capture_is_closed_at_capture_end() {
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{
                "match": "(\\w+)=",
                "captures": {
                    "1": { "patterns": [{ "begin": "a", "end": "z", "name": "blk" }] }
                }
            }]
        });
        assert_eq!(
            tokenize(grammar, "xay=b\nz"),
            vec![
                vec![
                    "0..1 root",
                    "1..2 root blk",
                    "2..3 root blk",
                    "3..4 root",
                    "4..5 root",
                ],
                vec!["0..1 root"],
            ]
        );
    }

    #[test]
    fn test_begin_and_end_captures_with_patterns() {
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{
                "begin": "(\\w+)\\(",
                "end": "\\)",
                "name": "call",
                "beginCaptures": {
                    "1": { "name": "fn", "patterns": [{ "match": "_", "name": "sep" }] }
                },
                "endCaptures": {
                    "0": { "name": "close", "patterns": [{ "match": "\\)", "name": "paren" }] }
                }
            }]
        });
        assert_eq!(
            tokenize(grammar, "a_b(x)"),
            vec![vec![
                "0..1 root call fn",
                "1..2 root call fn sep",
                "2..3 root call fn",
                "3..4 root call",
                "4..5 root call",
                "5..6 root call close paren",
            ]]
        );
    }

    #[test]
    fn test_scope_name_templates() {
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{ "match": "<(\\w+)>", "name": "tag.${1:/downcase} meta.$1" }]
        });
        assert_eq!(tokenize(grammar, "<Div>"), vec![vec!["0..5 root tag.div meta.Div"]]);
    }

    #[test]
    fn test_begin_while_closes_on_line_not_matching() {
        let grammar = json!({
            "scopeName": "text.md",
            "patterns": [{
                "begin": "^>",
                "while": "^>",
                "name": "markup.quote",
                "patterns": [{ "match": "\\w+", "name": "word" }]
            }]
        });
        assert_eq!(
            tokenize(grammar, ">a\n>b\nc"),
            vec![
                vec!["0..1 text.md markup.quote", "1..2 text.md markup.quote word"],
                vec!["0..1 text.md markup.quote", "1..2 text.md markup.quote word"],
                vec!["0..1 text.md"],
            ]
        );
    }

    #[test]
    fn test_while_captures() {
        let grammar = json!({
            "scopeName": "text.md",
            "patterns": [{
                "begin": "^(>)",
                "while": "^(>)",
                "name": "markup.quote",
                "beginCaptures": { "1": { "name": "punctuation" } },
                "whileCaptures": { "1": { "name": "punctuation.continued" } }
            }]
        });
        assert_eq!(
            tokenize(grammar, ">a\n>b"),
            vec![
                vec!["0..1 text.md markup.quote punctuation", "1..2 text.md markup.quote"],
                vec![
                    "0..1 text.md markup.quote punctuation.continued",
                    "1..2 text.md markup.quote",
                ],
            ]
        );
    }

    #[test]
    fn test_zero_width_while_sets_g_anchor() {
        let grammar = json!({
            "scopeName": "text.md",
            "patterns": [{
                "begin": "^>",
                "while": "(?=\\s)",
                "name": "quote",
                "patterns": [{ "match": "\\G\\s+", "name": "indent" }]
            }]
        });
        assert_eq!(
            tokenize(grammar, ">a\n  b"),
            vec![
                vec!["0..1 text.md quote", "1..2 text.md quote"],
                vec!["0..2 text.md quote indent", "2..3 text.md quote"],
            ]
        );
    }

    #[test]
    fn test_end_with_backreference() {
        let grammar = json!({
            "scopeName": "source.shell",
            "patterns": [{ "begin": "<<(\\S+)", "end": "^\\1$", "name": "string.heredoc" }]
        });
        assert_eq!(
            tokenize(grammar, "<<a.b\naxb\na.b\nx"),
            vec![
                vec!["0..5 source.shell string.heredoc"],
                vec!["0..3 source.shell string.heredoc"],
                vec!["0..3 source.shell string.heredoc"],
                vec!["0..1 source.shell"],
            ]
        );
    }

    #[test]
    fn test_apply_end_pattern_last() {
        let grammar = |last: bool| {
            json!({
                "scopeName": "root",
                "patterns": [{
                    "begin": "<",
                    "end": ">",
                    "name": "tag",
                    "applyEndPatternLast": last,
                    "patterns": [{ "match": ">>", "name": "shift" }]
                }]
            })
        };
        assert_eq!(
            tokenize(grammar(true), "<>>"),
            vec![vec!["0..1 root tag", "1..3 root tag shift"]]
        );
        assert_eq!(
            tokenize(grammar(false), "<>>"),
            vec![vec!["0..1 root tag", "1..2 root tag", "2..3 root"]]
        );
    }

    #[test]
    fn test_g_anchor() {
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{
                "begin": "x",
                "end": "(?!\\G)",
                "name": "block",
                "patterns": [{ "match": "\\Gy", "name": "first" }]
            }]
        });
        assert_eq!(
            tokenize(grammar, "xyy"),
            vec![vec!["0..1 root block", "1..2 root block first", "2..3 root"]]
        );
    }

    #[test]
    fn test_a_anchor_only_on_first_line() {
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{ "match": "\\A#!.*", "name": "shebang" }]
        });
        assert_eq!(
            tokenize(grammar, "#!sh\n#!sh"),
            vec![vec!["0..4 root shebang"], vec!["0..4 root"]]
        );
    }

    #[test]
    fn test_injections() {
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{ "begin": "\"", "end": "\"", "name": "string.quoted" }],
            "injections": {
                "L:string": { "patterns": [{ "match": "TODO", "name": "todo" }] }
            }
        });
        assert_eq!(
            tokenize(grammar, "TODO \"TODO\""),
            vec![vec![
                "0..5 root",
                "5..6 root string.quoted",
                "6..10 root string.quoted todo",
                "10..11 root string.quoted",
            ]]
        );
    }

    #[test]
    fn test_left_injection_wins_ties() {
        let grammar = |selector: &str| {
            json!({
                "scopeName": "root",
                "patterns": [{ "match": "ab", "name": "word" }],
                "injections": {
                    selector: { "patterns": [{ "match": "a", "name": "injected" }] }
                }
            })
        };
        assert_eq!(
            tokenize(grammar("L:root"), "ab"),
            vec![vec!["0..1 root injected", "1..2 root"]]
        );
        assert_eq!(tokenize(grammar("root"), "ab"), vec![vec!["0..2 root word"]]);
        assert_eq!(tokenize(grammar("R:root"), "ab"), vec![vec!["0..2 root word"]]);
    }

    #[test]
    fn test_exported_injection() {
        let base = json!({
            "scopeName": "source.base",
            "patterns": [{ "begin": "#", "end": "$", "name": "comment.line" }]
        });
        let todo = json!({
            "scopeName": "source.todo",
            "injectionSelector": "L:comment",
            "injectTo": ["source.base"],
            "patterns": [{ "match": "TODO", "name": "keyword.todo" }]
        });
        let registry = registry_with(&[base, todo]);
        let tokens = render(&registry.tokenize_text("source.base", "x # TODO").unwrap());
        assert_eq!(
            tokens,
            vec![vec![
                "0..2 source.base",
                "2..3 source.base comment.line",
                "3..4 source.base comment.line",
                "4..8 source.base comment.line keyword.todo",
            ]]
        );
    }

    #[test]
    fn test_embedded_grammar_base_include() {
        let outer = json!({
            "scopeName": "text.outer",
            "patterns": [
                {
                    "begin": "<css>",
                    "end": "</css>",
                    "name": "embedded",
                    "patterns": [{ "include": "source.inner" }]
                },
                { "match": "B", "name": "outer.b" }
            ]
        });
        let inner = json!({
            "scopeName": "source.inner",
            "patterns": [{ "match": "\\d", "name": "digit" }, { "include": "$base" }]
        });
        let registry = registry_with(&[outer, inner]);
        let tokens = render(&registry.tokenize_text("text.outer", "<css>1B</css>").unwrap());
        assert_eq!(
            tokens,
            vec![vec![
                "0..5 text.outer embedded",
                "5..6 text.outer embedded digit",
                "6..7 text.outer embedded outer.b",
                "7..13 text.outer embedded",
            ]]
        );
    }

    #[test]
    fn test_rule_ending_where_it_began_stops_line() {
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{ "begin": "(?=x)", "end": "(?=x)", "name": "stuck" }]
        });
        assert_eq!(
            tokenize(grammar, "xy\nab\nz"),
            vec![vec!["0..2 root stuck"], vec!["0..2 root stuck"], vec!["0..1 root stuck"]]
        );
    }

    #[test]
    fn test_empty_match_rule_stops_line() {
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{ "match": "(?=a)", "name": "empty" }, { "match": "b", "name": "b" }]
        });
        assert_eq!(
            tokenize(grammar, "bab\nb"),
            vec![vec!["0..1 root b", "1..3 root"], vec!["0..1 root b"]]
        );
    }

    #[test]
    fn test_line_terminators() {
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{ "match": "\\w$", "name": "last" }]
        });
        assert_eq!(
            tokenize(grammar, "ab\r\ncd\ref"),
            vec![
                vec!["0..1 root", "1..2 root last"],
                vec!["0..1 root", "1..2 root last"],
                vec!["0..1 root", "1..2 root last"],
            ]
        );
    }

    #[test]
    fn test_lazy_compile_errors_are_reported() {
        // only broken once the empty capture is substituted: `*` has nothing to repeat
        let grammar = json!({
            "scopeName": "root",
            "patterns": [{ "begin": "(x?)y", "end": "\\1*" }]
        });
        let registry = registry_with(&[grammar]);
        let err = registry.tokenize_text("root", "y").unwrap_err();
        assert!(matches!(err, Error::RegexCompile { .. }), "{err}");
    }

    #[test]
    fn test_streaming_api() {
        let registry = registry_with(&[json_grammar()]);
        let grammar_id = registry.grammar_id("JSON").unwrap();
        let mut tokenizer = Tokenizer::new(
            &registry,
            grammar_id,
            vec!["[[\n".to_owned(), "]\n".to_owned()],
        );
        assert_eq!(tokenizer.stack_depth(), 1);
        assert!(!tokenizer.is_at_end());
        tokenizer.parse_next_line().unwrap();
        assert_eq!(tokenizer.current_line(), 1);
        assert_eq!(tokenizer.stack_depth(), 3);
        tokenizer.parse_next_line().unwrap();
        assert_eq!(tokenizer.stack_depth(), 2);
        assert!(tokenizer.is_at_end());
        assert!(tokenizer.parse_next_line().unwrap().is_empty());

        let tokens = tokenizer.tokenize_line("]").unwrap();
        assert_eq!(tokenizer.stack_depth(), 1);
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_tokens_cover_lines() {
        let text = "[1, [2 ,3]]\n\n  [ \n 4 5 ] 6\r\n]] [";
        let registry = registry_with(&[json_grammar()]);
        let first = registry.tokenize_text("source.json", text).unwrap();
        let second = registry.tokenize_text("source.json", text).unwrap();
        assert_eq!(first, second);

        for (line, tokens) in lines::split_lines(text).iter().zip(&first) {
            let mut pos = 0;
            for token in tokens {
                assert_eq!(token.span.start, pos, "{line:?}");
                assert!(token.span.end > token.span.start, "{line:?}");
                assert_eq!(token.scopes.root().build_string(), "source.json");
                pos = token.span.end;
            }
            assert_eq!(pos, lines::content_end(line), "{line:?}");
        }
    }

    #[test]
    fn test_registry_shared_between_threads() {
        let registry = registry_with(&[json_grammar()]);
        let text = "[1, [2]]\n[3\n]";
        let expected = registry.tokenize_text("source.json", text).unwrap();

        std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| registry.tokenize_text("source.json", text).unwrap()))
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), expected);
            }
        });
    }
}
