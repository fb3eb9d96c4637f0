//! Syntax-directed translation: the semantic actions fired per construct.
//!
//! The walk is post-order and left-to-right, so every request reaches the emitter in the
//! same order a one-pass parser would fire its actions. Semantic errors are reported and
//! recovered locally: the offending construct emits nothing well-formed and the walk
//! carries on so later errors surface in the same run.

use crate::ast::*;
use crate::codegen::StackUnderflow;
use crate::diag::{Reporter, SemanticError};
use crate::emit::Emitter;
use crate::labels::{LabelRole, LabelStacks, LabelUnderflow};
use crate::symtab::*;

/// Name of the designated entry point.
pub const ENTRY_POINT: &str = "main";

/// Internal invariant breaks. Valid translation logic never produces these.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error(transparent)]
    Scope(#[from] ScopeUnderflow),
    #[error(transparent)]
    Label(#[from] LabelUnderflow),
    #[error(transparent)]
    Stack(#[from] StackUnderflow),
}

/// Whole-program facts for one compilation run.
#[derive(Debug, Default)]
pub struct ProgramState {
    pub has_entry_point: bool,
    /// Set together with `has_entry_point`; any later function is out of position.
    pub entry_point_closed: bool,
    pub uses_input: bool,
    pub entry: Option<Function>,
    /// One-shot: the next compound statement reuses the scope opened for parameters.
    pub share_next_block: bool,
}

/// The header of the function whose body is being translated.
#[derive(Debug)]
pub struct FunctionFrame {
    pub name: String,
    pub ret: TypeSpec,
    next_local: u16,
}

#[derive(Debug, Default)]
pub struct TranslationContext {
    pub scopes: SymbolTable,
    pub labels: LabelStacks,
    pub functions: Vec<FunctionFrame>,
    pub program: ProgramState,
}

/// What an expression left on the evaluation stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Value,
    Address,
    Nothing,
}

pub struct Translator<'a, E: Emitter + ?Sized> {
    pub(crate) ctx: TranslationContext,
    pub(crate) out: &'a mut E,
    diag: &'a mut Reporter,
}

impl<'a, E: Emitter + ?Sized> Translator<'a, E> {
    pub fn new(out: &'a mut E, diag: &'a mut Reporter) -> Self {
        Self {
            ctx: TranslationContext::default(),
            out,
            diag,
        }
    }

    pub(crate) fn error(&mut self, pos: Pos, e: SemanticError) {
        self.diag.semantic(pos, e);
    }

    fn enter_scope(&mut self) {
        self.ctx.scopes.enter_scope();
        log::trace!("enter scope {}", self.ctx.scopes.current_depth());
    }

    fn exit_scope(&mut self) -> Result<(), TranslateError> {
        log::trace!("exit scope {}", self.ctx.scopes.current_depth());
        self.ctx.scopes.exit_scope()?;
        Ok(())
    }

    /// Next free local slot of the current function, `None` once the JVM's slots run out.
    fn alloc_local(&mut self, pos: Pos) -> Option<u16> {
        let Some(f) = self.ctx.functions.last_mut() else {
            return Some(0);
        };
        let n = f.next_local;
        match n.checked_add(1) {
            Some(next) => {
                f.next_local = next;
                Some(n)
            }
            None => {
                let name = f.name.clone();
                self.error(pos, SemanticError::TooManyLocals(name));
                None
            }
        }
    }

    /// Resolves `name` and checks it is of kind `expected`.
    fn resolve_as(&mut self, name: &str, pos: Pos, expected: SymbolKind) -> Option<Symbol> {
        let found = match self.ctx.scopes.resolve(name) {
            Some(sym) if sym.kind() == expected => {
                log::trace!("'{name}' resolved at depth {}", sym.scope());
                return Some(sym.clone());
            }
            Some(sym) => sym.kind(),
            None => {
                self.error(pos, SemanticError::Undeclared(name.to_string()));
                return None;
            }
        };
        self.error(
            pos,
            SemanticError::KindMismatch {
                name: name.to_string(),
                expected,
                found,
            },
        );
        None
    }

    fn resolve_variable(&mut self, name: &str, pos: Pos) -> Option<Variable> {
        match self.resolve_as(name, pos, SymbolKind::Variable) {
            Some(Symbol::Variable(v)) => Some(v),
            _ => None,
        }
    }

    fn resolve_array(&mut self, name: &str, pos: Pos) -> Option<Array> {
        match self.resolve_as(name, pos, SymbolKind::Array) {
            Some(Symbol::Array(a)) => Some(a),
            _ => None,
        }
    }

    fn resolve_function(&mut self, name: &str, pos: Pos) -> Option<Function> {
        match self.resolve_as(name, pos, SymbolKind::Function) {
            Some(Symbol::Function(f)) => Some(f),
            _ => None,
        }
    }

    pub fn declaration(&mut self, d: &Decl) -> Result<(), TranslateError> {
        match d {
            Decl::Var(v) => {
                self.var_declaration(v);
                Ok(())
            }
            Decl::Fun(f) => self.fun_declaration(f),
        }
    }

    fn var_declaration(&mut self, d: &VarDecl) {
        if self.ctx.scopes.declared_in_current_scope(&d.name) {
            self.error(d.pos, SemanticError::Redeclared(d.name.clone()));
            return;
        }
        if d.ty == TypeSpec::Void {
            self.error(d.pos, SemanticError::VoidVariable(d.name.clone()));
            return;
        }
        let scope = self.ctx.scopes.current_depth();
        let global = scope == 0;
        let storage = if global {
            Storage::Static
        } else {
            match self.alloc_local(d.pos) {
                Some(n) => Storage::Local(n),
                None => return,
            }
        };
        let sym = match d.len {
            None => Symbol::Variable(Variable {
                name: d.name.clone(),
                scope,
                storage,
            }),
            Some(n) => Symbol::Array(Array {
                name: d.name.clone(),
                scope,
                len: ArrayLen::Sized(n),
                storage,
            }),
        };
        self.ctx.scopes.insert(sym.clone());
        match &sym {
            _ if global => self.out.emit_static_declaration(&sym),
            Symbol::Array(a) => self.out.emit_array_local_init(a),
            Symbol::Variable(v) => self.out.emit_scalar_local_init(v),
            Symbol::Function(_) => {}
        }
    }

    fn fun_declaration(&mut self, d: &FunDecl) -> Result<(), TranslateError> {
        let scope = self.ctx.scopes.current_depth();
        let mut record = Function {
            name: d.name.clone(),
            scope,
            ret: d.ret,
            params: vec![],
            slot: OTHER_SLOT,
        };

        let redeclared = self.ctx.scopes.declared_in_current_scope(&d.name);
        if redeclared {
            self.error(d.pos, SemanticError::Redeclared(d.name.clone()));
        }
        if self.ctx.program.entry_point_closed {
            self.error(d.pos, SemanticError::DeclaredAfterEntryPoint(d.name.clone()));
        } else if d.name == ENTRY_POINT && !redeclared {
            self.ctx.program.has_entry_point = true;
            self.ctx.program.entry_point_closed = true;
            record.slot = ENTRY_SLOT;
            log::debug!("entry point '{}' at {}", d.name, d.pos);
        }
        if !redeclared {
            self.ctx.scopes.insert(Symbol::Function(record.clone()));
        }

        // Parameters and body share this scope.
        self.enter_scope();
        self.ctx.program.share_next_block = true;
        self.ctx.functions.push(FunctionFrame {
            name: d.name.clone(),
            ret: d.ret,
            next_local: 0,
        });

        record.params = self.param_list(&d.params);
        if record.is_entry() {
            if d.ret != TypeSpec::Void {
                self.error(d.pos, SemanticError::EntryPointReturnType(d.name.clone()));
            }
            if !d.params.is_empty() {
                self.error(d.pos, SemanticError::EntryPointParams(d.name.clone()));
            }
            self.ctx.program.entry = Some(record.clone());
        }
        if !redeclared {
            if let Some(Symbol::Function(f)) = self.ctx.scopes.lookup_at_mut(scope, &d.name) {
                f.params = record.params.clone();
            }
        }
        log::debug!(
            "function '{}' ({} params) returning {}",
            record.name,
            record.params.len(),
            record.ret
        );
        self.out.emit_function_begin(&record);

        self.compound(&d.body)?;

        self.out.emit_function_end();
        self.ctx.functions.pop();
        self.exit_scope()
    }

    fn param_list(&mut self, params: &[Param]) -> Vec<ParamSym> {
        let scope = self.ctx.scopes.current_depth();
        let mut out = vec![];
        for p in params {
            if self.ctx.scopes.declared_in_current_scope(&p.name) {
                self.error(p.pos, SemanticError::Redeclared(p.name.clone()));
                continue;
            }
            if p.ty == TypeSpec::Void {
                self.error(p.pos, SemanticError::VoidVariable(p.name.clone()));
                continue;
            }
            let Some(n) = self.alloc_local(p.pos) else {
                continue;
            };
            let storage = Storage::Local(n);
            let sym = if p.is_array {
                ParamSym::Array(Array {
                    name: p.name.clone(),
                    scope,
                    len: ArrayLen::Unsized,
                    storage,
                })
            } else {
                ParamSym::Scalar(Variable {
                    name: p.name.clone(),
                    scope,
                    storage,
                })
            };
            self.ctx.scopes.insert(sym.clone().into_symbol());
            out.push(sym);
        }
        out
    }

    fn compound(&mut self, c: &Compound) -> Result<(), TranslateError> {
        let shared = std::mem::take(&mut self.ctx.program.share_next_block);
        if !shared {
            self.enter_scope();
        }
        for v in &c.locals {
            self.var_declaration(v);
        }
        for s in &c.stmts {
            self.statement(s)?;
        }
        if !shared {
            self.exit_scope()?;
        }
        Ok(())
    }

    fn statement(&mut self, s: &Stmt) -> Result<(), TranslateError> {
        match s {
            Stmt::Expr(None) => {}
            Stmt::Expr(Some(e)) => {
                if let Some(Operand::Value | Operand::Address) = self.expr(e) {
                    self.out.emit_discard();
                }
            }
            Stmt::Compound(c) => self.compound(c)?,
            Stmt::If {
                cond,
                then_s,
                else_s,
            } => self.if_stmt(cond, then_s, else_s.as_deref())?,
            Stmt::While { cond, body } => self.while_stmt(cond, body)?,
            Stmt::Return(value, pos) => self.return_stmt(value.as_ref(), *pos),
            Stmt::Assign(target, value) => self.assign(target, value),
            Stmt::Print(e) => {
                self.out.emit_begin_print();
                if self.value(e).is_some() {
                    self.out.emit_end_print();
                }
            }
            Stmt::Read(name, pos) => {
                if let Some(v) = self.resolve_variable(name, *pos) {
                    self.ctx.program.uses_input = true;
                    self.out.emit_read(&v);
                }
            }
        }
        Ok(())
    }

    fn if_stmt(&mut self, cond: &Expr, then_s: &Stmt, else_s: Option<&Stmt>) -> Result<(), TranslateError> {
        let cond_ok = self.value(cond).is_some();
        let near = self.ctx.labels.push_new_label(LabelRole::SelectionNear, &mut *self.out);
        if cond_ok {
            self.out.emit_jump_if_false(near);
        }
        self.statement(then_s)?;
        match else_s {
            Some(es) => {
                let far = self.ctx.labels.push_new_label(LabelRole::SelectionFar, &mut *self.out);
                self.out.emit_jump(far);
                let near = self.ctx.labels.pop_label(LabelRole::SelectionNear)?;
                self.out.emit_label(near);
                self.statement(es)?;
                let far = self.ctx.labels.pop_label(LabelRole::SelectionFar)?;
                self.out.emit_label(far);
            }
            None => {
                let near = self.ctx.labels.pop_label(LabelRole::SelectionNear)?;
                self.out.emit_label(near);
            }
        }
        Ok(())
    }

    fn while_stmt(&mut self, cond: &Expr, body: &Stmt) -> Result<(), TranslateError> {
        let near = self.ctx.labels.push_new_label(LabelRole::IterationNear, &mut *self.out);
        self.out.emit_label(near);
        let cond_ok = self.value(cond).is_some();
        let far = self.ctx.labels.push_new_label(LabelRole::IterationFar, &mut *self.out);
        if cond_ok {
            self.out.emit_jump_if_false(far);
        }
        self.statement(body)?;
        let near = self.ctx.labels.pop_label(LabelRole::IterationNear)?;
        self.out.emit_jump(near);
        let far = self.ctx.labels.pop_label(LabelRole::IterationFar)?;
        self.out.emit_label(far);
        Ok(())
    }

    fn return_stmt(&mut self, value: Option<&Expr>, pos: Pos) {
        let Some((name, ret)) = self.ctx.functions.last().map(|f| (f.name.clone(), f.ret)) else {
            return;
        };
        match (value, ret) {
            (None, TypeSpec::Void) => self.out.emit_return(),
            (None, TypeSpec::Int) => self.error(pos, SemanticError::MissingReturnValue(name)),
            (Some(e), TypeSpec::Int) => {
                if self.value(e).is_some() {
                    self.out.emit_return_value();
                }
            }
            (Some(e), TypeSpec::Void) => {
                self.error(pos, SemanticError::ReturnValueInVoid(name));
                self.expr(e);
            }
        }
    }

    fn assign(&mut self, target: &VarRef, value: &Expr) {
        match &target.index {
            None => {
                let var = self.resolve_variable(&target.name, target.pos);
                let v = self.value(value);
                if let (Some(var), Some(_)) = (var, v) {
                    self.out.emit_store(&var);
                }
            }
            Some(index) => {
                let arr = self.resolve_array(&target.name, target.pos);
                if let Some(a) = &arr {
                    self.out.emit_load_array_address(a);
                }
                let i = self.value(index);
                let v = self.value(value);
                if arr.is_some() && i.is_some() && v.is_some() {
                    self.out.emit_indexed_store();
                }
            }
        }
    }

    /// Translates `e` where a value is required; a void call there is an error.
    fn value(&mut self, e: &Expr) -> Option<Operand> {
        match self.expr(e)? {
            Operand::Nothing => {
                if let Expr::Call(name, _, pos) = e {
                    self.error(*pos, SemanticError::VoidValue(name.clone()));
                }
                None
            }
            op => Some(op),
        }
    }

    /// `None` when the expression hit a semantic error.
    fn expr(&mut self, e: &Expr) -> Option<Operand> {
        match e {
            Expr::Num(n, _) => {
                self.out.emit_load_constant(*n);
                Some(Operand::Value)
            }
            Expr::Var(VarRef {
                name,
                index: None,
                pos,
            }) => match self.ctx.scopes.resolve(name).cloned() {
                Some(Symbol::Variable(v)) => {
                    self.out.emit_load_variable(&v);
                    Some(Operand::Value)
                }
                Some(Symbol::Array(a)) => {
                    self.out.emit_load_array_address(&a);
                    Some(Operand::Address)
                }
                Some(Symbol::Function(_)) => {
                    self.error(
                        *pos,
                        SemanticError::KindMismatch {
                            name: name.clone(),
                            expected: SymbolKind::Variable,
                            found: SymbolKind::Function,
                        },
                    );
                    None
                }
                None => {
                    self.error(*pos, SemanticError::Undeclared(name.clone()));
                    None
                }
            },
            Expr::Var(VarRef {
                name,
                index: Some(index),
                pos,
            }) => {
                let arr = self.resolve_array(name, *pos);
                if let Some(a) = &arr {
                    self.out.emit_load_array_address(a);
                }
                let i = self.value(index);
                if arr.is_some() && i.is_some() {
                    self.out.emit_indexed_load();
                    Some(Operand::Value)
                } else {
                    None
                }
            }
            Expr::Call(name, args, pos) => {
                let f = self.resolve_function(name, *pos);
                // Arity and argument types are not checked, only that the callee is a function.
                let mut args_ok = true;
                for a in args {
                    args_ok &= self.value(a).is_some();
                }
                let f = f.filter(|_| args_ok)?;
                self.out.emit_call(&f);
                Some(match f.ret {
                    TypeSpec::Int => Operand::Value,
                    TypeSpec::Void => Operand::Nothing,
                })
            }
            Expr::Binary(l, op, r) => {
                let a = self.value(l);
                let b = self.value(r);
                a?;
                b?;
                if op.is_relational() {
                    self.out.emit_relational(*op);
                } else {
                    self.out.emit_arithmetic(*op);
                }
                Some(Operand::Value)
            }
        }
    }
}
