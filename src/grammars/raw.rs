use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::error::TmResult;

/// Capture attributes keyed by capture group number, "0" being the whole match.
///
/// Keys are kept as strings since that's what grammar files contain; non-numeric keys
/// are ignored when compiling.
///
/// # Examples
/// ```json
/// {
///   "1": { "name": "storage.type.function.js" },
///   "2": {
///     "name": "meta.parameters.js",
///     "patterns": [{ "include": "#parameter" }]
///   }
/// }
/// ```
pub type RawCaptures = BTreeMap<String, RawRule>;

/// A single rule object, in any of its shapes.
///
/// Which kind of rule it is gets decided when compiling, based on which keys are set:
/// `include` wins over everything, then `match`, then `begin` with either `end` or
/// `while`. An object with none of those only groups `patterns` and a `repository`.
///
/// # Examples
/// ```json
/// {
///   "name": "string.quoted.double.js",
///   "begin": "\"",
///   "end": "\"",
///   "beginCaptures": {
///     "0": { "name": "punctuation.definition.string.begin.js" }
///   },
///   "patterns": [
///     { "match": "\\\\.", "name": "constant.character.escape.js" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all(deserialize = "camelCase"))]
pub struct RawRule {
    /// - "#name": a repository entry, looked up from the including rule upwards
    /// - "$self": the root of the grammar containing the include
    /// - "$base": the root of the grammar being tokenized
    /// - "source.lang" or "source.lang#name": another grammar
    pub include: Option<String>,
    /// Scope name(s) of the whole match or region, space separated.
    /// Can reference captures with `$1` or `${1:/downcase}`
    pub name: Option<String>,
    /// Scope name(s) applied only between begin and end
    pub content_name: Option<String>,
    #[serde(rename(deserialize = "match"))]
    pub match_: Option<String>,
    pub begin: Option<String>,
    /// Can reference the begin captures with `\1`, `\2` etc
    pub end: Option<String>,
    #[serde(rename(deserialize = "while"))]
    pub while_: Option<String>,
    /// Used for `match` rules, and as a fallback for the begin/end/while captures
    pub captures: Option<RawCaptures>,
    pub begin_captures: Option<RawCaptures>,
    pub end_captures: Option<RawCaptures>,
    pub while_captures: Option<RawCaptures>,
    /// Whether nested patterns win over the end pattern when both match at the same position
    #[serde(deserialize_with = "bool_or_int")]
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<RawRule>,
    pub repository: BTreeMap<String, RawRule>,
    /// A disabled rule is kept in the tree but never matches
    #[serde(deserialize_with = "bool_or_int")]
    pub disabled: bool,
}

/// Top-level structure of a grammar file
///
/// # Examples
/// ```json
/// {
///   "name": "JSON",
///   "scopeName": "source.json",
///   "patterns": [{ "include": "#value" }],
///   "repository": {
///     "value": {
///       "patterns": [
///         { "match": "-?\\d+(\\.\\d+)?", "name": "constant.numeric.json" }
///       ]
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all(deserialize = "camelCase"))]
pub struct RawGrammar {
    /// Human-readable name of the language
    pub name: String,
    /// Unique identifier for this grammar's scope, eg "source.js"
    pub scope_name: String,
    pub patterns: Vec<RawRule>,
    pub repository: BTreeMap<String, RawRule>,
    /// Rules injected into this grammar wherever their selector matches
    pub injections: BTreeMap<String, RawRule>,
    /// Selector at which this whole grammar is injected into other grammars
    pub injection_selector: Option<String>,
    /// Scope names of the grammars this grammar's `injectionSelector` applies to
    pub inject_to: Vec<String>,
}

impl RawGrammar {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> TmResult<Self> {
        let file = File::open(path)?;
        let raw_grammar = serde_json::from_reader(BufReader::new(file))?;
        Ok(raw_grammar)
    }

    pub fn from_json_str(json: &str) -> TmResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Some grammars use 0/1 for booleans
fn bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrInt {
        Bool(bool),
        Int(i64),
    }

    Ok(match BoolOrInt::deserialize(deserializer)? {
        BoolOrInt::Bool(b) => b,
        BoolOrInt::Int(i) => i != 0,
    })
}
