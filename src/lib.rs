//! Tokenizing text with TextMate grammars.
//!
//! Grammars are loaded into a [`Registry`], which resolves the includes between them.
//! A [`Tokenizer`] then goes through a document line by line and gives, for every
//! line, the list of [`Token`]s covering it along with their scopes.
//!
//! ```
//! use tmscope::Registry;
//!
//! let mut registry = Registry::default();
//! registry
//!     .add_grammar_from_str(r#"{
//!         "scopeName": "source.demo",
//!         "patterns": [{ "match": "\\d+", "name": "constant.numeric" }]
//!     }"#)
//!     .unwrap();
//!
//! let lines = registry.tokenize_text("source.demo", "a 12").unwrap();
//! assert_eq!(lines[0][1].to_string(), "2..4 source.demo constant.numeric");
//! ```

mod error;
pub mod grammars;
pub mod lines;
mod registry;
pub mod scope;
pub mod tokenizer;

pub use error::Error;
pub use grammars::{Grammar, RawGrammar, ScopeSelector};
pub use registry::{GrammarId, Registry, RuleRef};
pub use scope::{ScopeName, ScopePath};
pub use tokenizer::{Token, Tokenizer};
