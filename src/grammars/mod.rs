mod captures;
mod compiled;
mod raw;
mod regex;
mod selector;

pub use captures::{CaptureAnchor, ScopeTemplate, build_anchor_tree, resolve_backreferences};
pub use compiled::*;
pub use raw::{RawCaptures, RawGrammar, RawRule};
pub use regex::{AnchorActive, MatchResult, Regex, escape};
pub use selector::{InjectionPrecedence, ScopeSelector};
