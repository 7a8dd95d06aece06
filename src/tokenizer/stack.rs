use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::grammars::{CaptureAnchor, Regex, RegexId};
use crate::registry::{GrammarId, Registry, RuleRef};
use crate::scope::{ScopeName, ScopePath};

/// What pushed a frame on the stack
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// The grammar itself, always at the bottom
    Root,
    BeginEnd,
    BeginWhile,
    /// A capture group being tokenized, gone once its text is done
    Capture,
}

/// The end pattern of a BeginEnd frame or the while pattern of a BeginWhile one.
#[derive(Debug, Clone)]
pub enum ExitPattern {
    /// Straight from the grammar
    Static { grammar: GrammarId, regex: RegexId },
    /// Back-references filled with the text captured by the begin pattern
    Resolved(Arc<Regex>),
}

impl ExitPattern {
    pub fn regex<'a>(&'a self, registry: &'a Registry) -> &'a Regex {
        match self {
            ExitPattern::Static { grammar, regex } => registry.grammar(*grammar).regex(*regex),
            ExitPattern::Resolved(regex) => regex,
        }
    }
}

/// A capture group scopes, resolved against the text it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCapture {
    pub scopes: Vec<ScopeName>,
    /// Rules to tokenize the captured text with
    pub patterns: Option<RuleRef>,
}

#[derive(Clone, Debug)]
pub struct StackFrame {
    pub kind: FrameKind,
    /// Rule whose patterns are searched in this frame. `None` for captures that are
    /// only scoped.
    pub rule_ref: Option<RuleRef>,
    /// Scopes of the begin/end delimiters
    pub name_scopes: ScopePath,
    /// Scopes of the text between the delimiters
    pub content_scopes: ScopePath,
    pub exit_pattern: Option<ExitPattern>,
    pub apply_end_pattern_last: bool,
    /// Capture groups inside this frame that haven't been entered yet, in order
    pub pending_captures: VecDeque<CaptureAnchor<ResolvedCapture>>,
    /// Where the frame stops in the current line. `None` for frames that can last
    /// over multiple lines.
    pub end_position: Option<usize>,
    /// The begin pattern matched until the end of the line so `\G` is live at the
    /// start of the next one
    pub begin_rule_has_captured_eol: bool,
    /// The `\G` position to get back to when this frame is popped
    pub anchor_position: Option<usize>,
    /// Where the frame was pushed in the current line, used to detect loops
    pub enter_position: Option<usize>,
}

impl StackFrame {
    /// Whether there are rules to look for in this frame
    pub fn is_searchable(&self) -> bool {
        self.rule_ref.is_some()
    }
}

/// Keeps track of nested context as well as how to exit that context.
///
/// This is the state carried from one line to the next.
#[derive(Clone, Default)]
pub struct StateStack {
    /// Stack frames from root to current
    pub frames: Vec<StackFrame>,
}

impl StateStack {
    pub fn new(grammar_id: GrammarId, grammar_scope: ScopeName) -> Self {
        let scopes = ScopePath::new(grammar_scope);
        Self {
            frames: vec![StackFrame {
                kind: FrameKind::Root,
                rule_ref: Some(RuleRef::root(grammar_id)),
                name_scopes: scopes.clone(),
                content_scopes: scopes,
                exit_pattern: None,
                apply_end_pattern_last: false,
                pending_captures: VecDeque::new(),
                end_position: None,
                begin_rule_has_captured_eol: false,
                anchor_position: None,
                enter_position: None,
            }],
        }
    }

    /// A frame tokenizing the text of a capture group, on top of the current one
    pub fn push_capture(
        &mut self,
        scopes: ScopePath,
        rule_ref: Option<RuleRef>,
        range: std::ops::Range<usize>,
        children: Vec<CaptureAnchor<ResolvedCapture>>,
        anchor_position: Option<usize>,
    ) {
        self.frames.push(StackFrame {
            kind: FrameKind::Capture,
            rule_ref,
            name_scopes: scopes.clone(),
            content_scopes: scopes,
            exit_pattern: None,
            apply_end_pattern_last: false,
            pending_captures: children.into(),
            end_position: Some(range.end),
            begin_rule_has_captured_eol: false,
            anchor_position,
            enter_position: Some(range.start),
        });
    }

    pub fn push(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    /// Exits the current context, getting back to the parent.
    /// The root frame is never popped.
    pub fn pop(&mut self) -> StackFrame {
        assert!(self.frames.len() > 1, "cannot pop the root frame");
        self.frames.pop().expect("stack never empty")
    }

    /// Whether `rule` was already entered at `pos` by one of the frames pushed at
    /// that same position
    pub fn has_entered_at(&self, rule: RuleRef, pos: usize) -> bool {
        self.frames
            .iter()
            .rev()
            .take_while(|frame| frame.enter_position == Some(pos))
            .any(|frame| frame.rule_ref == Some(rule))
    }

    /// Resets enter_position/anchor_position for all stack elements to None
    pub fn reset(&mut self) {
        for frame in &mut self.frames {
            frame.enter_position = None;
            frame.anchor_position = None;
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Access the top frame of the stack
    pub fn top(&self) -> &StackFrame {
        self.frames.last().expect("stack never empty")
    }

    /// Mutable access to the top frame of the stack
    pub fn top_mut(&mut self) -> &mut StackFrame {
        self.frames.last_mut().expect("stack never empty")
    }
}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "StateStack:")?;

        for (depth, frame) in self.frames.iter().enumerate() {
            let indent = "  ".repeat(depth);
            write!(f, "{indent}{:?}", frame.kind)?;
            if let Some(rule_ref) = frame.rule_ref {
                write!(f, " grammar={}, rule={}", rule_ref.grammar.0, rule_ref.rule.0)?;
            }
            write!(f, " name=[{}]", frame.name_scopes)?;
            if frame.content_scopes != frame.name_scopes {
                write!(f, ", content=[{}]", frame.content_scopes)?;
            }
            if let Some(ExitPattern::Resolved(regex)) = &frame.exit_pattern {
                write!(f, ", exit_pattern=\"{}\"", regex.pattern())?;
            }
            if let Some(end) = frame.end_position {
                write!(f, ", end_pos={end}")?;
            }
            write!(f, ", anchor_pos={:?}", frame.anchor_position)?;
            if let Some(enter_pos) = frame.enter_position
                && frame.anchor_position != Some(enter_pos)
            {
                write!(f, ", enter_pos={enter_pos}")?;
            }
            if frame.begin_rule_has_captured_eol {
                write!(f, ", begin_rule_has_captured_eol")?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}
