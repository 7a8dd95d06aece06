//! Scope names and scope paths.
//!
//! A scope name like `constant.numeric.json` is stored as a list of interned atoms so
//! that equality and prefix checks compare integers instead of strings.
//! Atoms live in a process-wide repository and are never freed.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

/// A dot-separated scope name such as `string.quoted.double.json`.
///
/// Cloning is cheap: the atoms are shared.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ScopeName {
    atoms: Arc<[u32]>,
}

impl ScopeName {
    /// Builds a scope name from its dotted form. Empty segments (`a..b`) are dropped.
    pub fn new(s: &str) -> ScopeName {
        let mut repo = lock_global_scope_repo();
        let atoms: Vec<u32> = s
            .trim()
            .split('.')
            .filter(|part| !part.is_empty())
            .map(|part| repo.atom_to_index(part))
            .collect();
        ScopeName {
            atoms: atoms.into(),
        }
    }

    /// Parses a space separated list of scope names, as found in a rule's `name`.
    pub fn parse_list(s: &str) -> Vec<ScopeName> {
        s.split_whitespace().map(ScopeName::new).collect()
    }

    /// Number of dotted segments.
    #[inline]
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Whether the dotted parts of `self` are a prefix of the dotted parts of `other`.
    ///
    /// `source.js` is a prefix of `source.js.embedded` but not of `source.json`.
    #[inline]
    pub fn is_prefix_of(&self, other: &ScopeName) -> bool {
        other.atoms.starts_with(&self.atoms)
    }

    /// The individual segments, resolved back to strings.
    pub fn segments(&self) -> Vec<String> {
        let repo = lock_global_scope_repo();
        self.atoms
            .iter()
            .map(|&atom| repo.atom_str(atom).to_owned())
            .collect()
    }

    /// Converts back to the dotted string form.
    pub fn build_string(&self) -> String {
        self.segments().join(".")
    }
}

impl fmt::Debug for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeName(\"{}\")", self.build_string())
    }
}

impl fmt::Display for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build_string())
    }
}

impl From<&str> for ScopeName {
    fn from(s: &str) -> Self {
        ScopeName::new(s)
    }
}

/// The stack of scopes active at a point in the text, outermost first.
///
/// A path always holds at least one scope: the grammar's root scope.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ScopePath {
    scopes: Vec<ScopeName>,
}

impl ScopePath {
    pub fn new(root: ScopeName) -> Self {
        Self { scopes: vec![root] }
    }

    /// Builds a path from a list of scopes.
    ///
    /// # Panics
    /// If `scopes` is empty.
    pub fn from_scopes(scopes: Vec<ScopeName>) -> Self {
        assert!(!scopes.is_empty(), "a scope path can't be empty");
        Self { scopes }
    }

    pub fn push(&mut self, scope: ScopeName) {
        self.scopes.push(scope);
    }

    /// Returns a new path with `scopes` appended.
    pub fn with(&self, scopes: &[ScopeName]) -> Self {
        let mut path = self.clone();
        path.scopes.extend_from_slice(scopes);
        path
    }

    /// Removes the innermost scope.
    ///
    /// # Panics
    /// If only the root scope is left.
    pub fn pop(&mut self) -> ScopeName {
        assert!(self.scopes.len() > 1, "can't pop the root scope of a path");
        self.scopes.pop().expect("path has more than one scope")
    }

    pub fn root(&self) -> &ScopeName {
        &self.scopes[0]
    }

    pub fn innermost(&self) -> &ScopeName {
        &self.scopes[self.scopes.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Always false, kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn as_slice(&self) -> &[ScopeName] {
        &self.scopes
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScopeName> {
        self.scopes.iter()
    }

    /// Scopes as dotted strings, mostly useful in tests.
    pub fn to_strings(&self) -> Vec<String> {
        self.scopes.iter().map(|s| s.build_string()).collect()
    }
}

impl fmt::Debug for ScopePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopePath({self})")
    }
}

impl fmt::Display for ScopePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, scope) in self.scopes.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{scope}")?;
        }
        Ok(())
    }
}

/// Global repository that maps atom strings to indices for deduplication
struct ScopeRepository {
    atoms: Vec<String>,
    atom_index_map: HashMap<String, u32>,
}

impl ScopeRepository {
    fn new() -> Self {
        Self {
            atoms: Vec::new(),
            atom_index_map: HashMap::new(),
        }
    }

    fn atom_to_index(&mut self, atom: &str) -> u32 {
        if let Some(&index) = self.atom_index_map.get(atom) {
            return index;
        }

        let index = u32::try_from(self.atoms.len()).expect("scope atom repository overflow");
        self.atoms.push(atom.to_owned());
        self.atom_index_map.insert(atom.to_owned(), index);
        index
    }

    fn atom_str(&self, index: u32) -> &str {
        &self.atoms[index as usize]
    }
}

static SCOPE_REPO: LazyLock<Mutex<ScopeRepository>> =
    LazyLock::new(|| Mutex::new(ScopeRepository::new()));

fn lock_global_scope_repo() -> MutexGuard<'static, ScopeRepository> {
    // The repository is append-only so a poisoned lock still holds consistent data
    SCOPE_REPO
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
