use std::ops::Range;

use crate::scope::ScopeName;

/// Turns nested scoped ranges into a flat list of non-overlapping spans.
///
/// Used for captures that are only scoped, which don't need a stack frame each.
/// Ranges must nest: two ranges either don't overlap or one contains the other.
/// When several ranges start at the same position the longest one is the outermost,
/// equal ranges nest in the order they were pushed.
#[derive(Debug, Default)]
pub struct ScopeAccumulator {
    items: Vec<(Range<usize>, ScopeName)>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum EventKind {
    Push,
    Pop,
}

impl ScopeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, range: Range<usize>, scope: ScopeName) {
        self.items.push((range, scope));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Spans between consecutive range boundaries with the scopes covering them,
    /// outermost first. Gaps between ranges are returned with no scopes.
    pub fn build_tokens(&self) -> Vec<(Range<usize>, Vec<ScopeName>)> {
        let mut events: Vec<(usize, EventKind, usize)> = Vec::with_capacity(self.items.len() * 2);
        for (index, (range, _)) in self.items.iter().enumerate() {
            if range.is_empty() {
                continue;
            }
            events.push((range.start, EventKind::Push, index));
            events.push((range.end, EventKind::Pop, index));
        }
        events.sort_by(|a, b| {
            a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then_with(|| match a.1 {
                // outer ranges first when starting at the same position
                EventKind::Push => self.items[b.2]
                    .0
                    .end
                    .cmp(&self.items[a.2].0.end)
                    .then(a.2.cmp(&b.2)),
                EventKind::Pop => a.2.cmp(&b.2),
            })
        });

        let mut out = Vec::new();
        let mut open: Vec<usize> = Vec::new();
        let mut last_pos: Option<usize> = None;

        for (pos, kind, index) in events {
            if let Some(last) = last_pos
                && last < pos
            {
                let scopes = open.iter().map(|&i| self.items[i].1.clone()).collect();
                out.push((last..pos, scopes));
            }
            match kind {
                EventKind::Push => open.push(index),
                EventKind::Pop => {
                    if let Some(at) = open.iter().rposition(|&i| i == index) {
                        open.remove(at);
                    }
                }
            }
            last_pos = Some(pos);
        }

        assert!(open.is_empty(), "unbalanced scope ranges: {open:?}");
        out
    }
}
