//! Syntax and semantic error reporting.
//!
//! Syntax errors are always surfaced. Semantic errors are always *counted* (so the driver
//! knows not to write target code) but only surfaced when semantic diagnostics are enabled.

use crate::ast::Pos;
use crate::symtab::SymbolKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SemanticError {
    #[error("'{0}' is already declared in this scope")]
    Redeclared(String),
    #[error("'{0}' is not declared")]
    Undeclared(String),
    #[error("expected {expected}, found {found} '{name}'")]
    KindMismatch {
        name: String,
        expected: SymbolKind,
        found: SymbolKind,
    },
    #[error("variable '{0}' cannot have type void")]
    VoidVariable(String),
    #[error("entry point '{0}' must return void")]
    EntryPointReturnType(String),
    #[error("entry point '{0}' must not take parameters")]
    EntryPointParams(String),
    #[error("function '{0}' is declared after the entry point")]
    DeclaredAfterEntryPoint(String),
    #[error("missing entry point '{0}'")]
    MissingEntryPoint(String),
    #[error("void function '{0}' cannot return a value")]
    ReturnValueInVoid(String),
    #[error("function '{0}' must return a value")]
    MissingReturnValue(String),
    #[error("void function '{0}' used as a value")]
    VoidValue(String),
    #[error("function '{0}' needs more than 65535 local slots")]
    TooManyLocals(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("syntax error at {pos}: unexpected {token}")]
pub struct SyntaxError {
    pub pos: Pos,
    /// Offending token text, or `end of input`.
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Diagnostic {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("semantic error at {pos}: {error}")]
    Semantic { pos: Pos, error: SemanticError },
}

#[derive(Debug)]
pub struct Reporter {
    semantic_enabled: bool,
    surfaced: Vec<Diagnostic>,
    syntax_errors: usize,
    semantic_errors: usize,
}

impl Reporter {
    pub fn new(semantic_enabled: bool) -> Self {
        Self {
            semantic_enabled,
            surfaced: vec![],
            syntax_errors: 0,
            semantic_errors: 0,
        }
    }

    pub fn syntax(&mut self, err: SyntaxError) {
        self.syntax_errors += 1;
        self.surfaced.push(Diagnostic::Syntax(err));
    }

    pub fn semantic(&mut self, pos: Pos, error: SemanticError) {
        self.semantic_errors += 1;
        if self.semantic_enabled {
            self.surfaced.push(Diagnostic::Semantic { pos, error });
        } else {
            log::trace!("suppressed semantic error at {pos}: {error}");
        }
    }

    pub fn has_errors(&self) -> bool {
        self.syntax_errors + self.semantic_errors > 0
    }

    pub fn semantic_errors(&self) -> usize {
        self.semantic_errors
    }

    /// Diagnostics that passed the output policy, in report order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.surfaced
    }
}
