//! Scope-chain storage of declared names.
//!
//! Scopes form a stack: `enter_scope` pushes, `exit_scope` pops and drops every record the
//! scope owned. Depth 0 is the global scope. Redeclaration checks only look at the current
//! scope, lookups walk outward to the global scope, so shadowing across scopes is legal.

use std::collections::HashMap;
use std::fmt;

use crate::ast::TypeSpec;

/// Where a variable or array lives at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Static,
    Local(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayLen {
    Sized(u32),
    /// Only for array parameters (`int a[]`).
    Unsized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub scope: usize,
    pub storage: Storage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Array {
    pub name: String,
    pub scope: usize,
    pub len: ArrayLen,
    pub storage: Storage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamSym {
    Scalar(Variable),
    Array(Array),
}

impl ParamSym {
    pub fn into_symbol(self) -> Symbol {
        match self {
            ParamSym::Scalar(v) => Symbol::Variable(v),
            ParamSym::Array(a) => Symbol::Array(a),
        }
    }
}

/// Slot number of the designated entry point; every other function gets `OTHER_SLOT`.
pub const ENTRY_SLOT: u8 = 1;
pub const OTHER_SLOT: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub scope: usize,
    pub ret: TypeSpec,
    pub params: Vec<ParamSym>,
    pub slot: u8,
}

impl Function {
    pub fn is_entry(&self) -> bool {
        self.slot == ENTRY_SLOT
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    Variable(Variable),
    Array(Array),
    Function(Function),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Array,
    Function,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolKind::Variable => write!(f, "variable"),
            SymbolKind::Array => write!(f, "array"),
            SymbolKind::Function => write!(f, "function"),
        }
    }
}

impl Symbol {
    pub fn name(&self) -> &str {
        match self {
            Symbol::Variable(v) => &v.name,
            Symbol::Array(a) => &a.name,
            Symbol::Function(f) => &f.name,
        }
    }

    pub fn scope(&self) -> usize {
        match self {
            Symbol::Variable(v) => v.scope,
            Symbol::Array(a) => a.scope,
            Symbol::Function(f) => f.scope,
        }
    }

    pub fn kind(&self) -> SymbolKind {
        match self {
            Symbol::Variable(_) => SymbolKind::Variable,
            Symbol::Array(_) => SymbolKind::Array,
            Symbol::Function(_) => SymbolKind::Function,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("exit_scope called with no open scope")]
pub struct ScopeUnderflow;

#[derive(Debug, Default)]
struct Scope {
    index: HashMap<String, usize>,
    records: Vec<Symbol>,
}

/// Starts empty; the first `enter_scope` opens the global scope.
#[derive(Debug, Default)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn exit_scope(&mut self) -> Result<(), ScopeUnderflow> {
        self.scopes.pop().map(|_| ()).ok_or(ScopeUnderflow)
    }

    pub fn declared_in_current_scope(&self, name: &str) -> bool {
        self.scopes
            .last()
            .is_some_and(|s| s.index.contains_key(name))
    }

    /// Adds `sym` to the current scope. The caller has already checked
    /// `declared_in_current_scope`.
    pub fn insert(&mut self, sym: Symbol) {
        debug_assert!(!self.declared_in_current_scope(sym.name()));
        let Some(scope) = self.scopes.last_mut() else {
            debug_assert!(false, "insert with no open scope");
            return;
        };
        scope.index.insert(sym.name().to_string(), scope.records.len());
        scope.records.push(sym);
    }

    pub fn resolve(&self, name: &str) -> Option<&Symbol> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.index.get(name).map(|&i| &s.records[i]))
    }

    /// The record `name` declared at exactly `depth`, for updates made while the owning
    /// scope is still open (a function's parameter list is attached after its header).
    pub fn lookup_at_mut(&mut self, depth: usize, name: &str) -> Option<&mut Symbol> {
        let scope = self.scopes.get_mut(depth)?;
        let i = *scope.index.get(name)?;
        scope.records.get_mut(i)
    }

    /// Depth of the current scope, 0 for global. Meaningless before the global scope opens.
    pub fn current_depth(&self) -> usize {
        self.scopes.len().saturating_sub(1)
    }

    pub fn open_scopes(&self) -> usize {
        self.scopes.len()
    }

    /// Records of the current scope in declaration order.
    pub fn current_records(&self) -> &[Symbol] {
        self.scopes.last().map(|s| s.records.as_slice()).unwrap_or(&[])
    }
}
