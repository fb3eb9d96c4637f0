//! Instruction-request contract between the translation scheme and a target backend.
//!
//! The translator calls these in exactly the order its actions fire; an implementation
//! must not reorder them.

use crate::ast::BinOp;
use crate::labels::{Label, LabelSource};
use crate::symtab::{Array, Function, Symbol, Variable};

/// What the closing boilerplate gets to see.
pub struct EpilogueContext<'a> {
    pub entry: Option<&'a Function>,
    /// Global records in declaration order.
    pub globals: &'a [Symbol],
}

pub trait Emitter: LabelSource {
    fn emit_prologue(&mut self);
    /// Global variable or array.
    fn emit_static_declaration(&mut self, sym: &Symbol);
    fn emit_array_local_init(&mut self, arr: &Array);
    /// Gives a local scalar its initial zero.
    fn emit_scalar_local_init(&mut self, var: &Variable);
    fn emit_function_begin(&mut self, f: &Function);
    fn emit_function_end(&mut self);
    fn emit_store(&mut self, var: &Variable);
    /// Consumes array address, index and value.
    fn emit_indexed_store(&mut self);
    fn emit_load_variable(&mut self, var: &Variable);
    fn emit_load_array_address(&mut self, arr: &Array);
    fn emit_indexed_load(&mut self);
    fn emit_load_constant(&mut self, value: i32);
    fn emit_arithmetic(&mut self, op: BinOp);
    fn emit_relational(&mut self, op: BinOp);
    fn emit_label(&mut self, label: Label);
    fn emit_jump(&mut self, label: Label);
    fn emit_jump_if_false(&mut self, label: Label);
    fn emit_call(&mut self, f: &Function);
    fn emit_return(&mut self);
    fn emit_return_value(&mut self);
    fn emit_begin_print(&mut self);
    fn emit_end_print(&mut self);
    fn emit_read(&mut self, var: &Variable);
    fn emit_read_support_routine(&mut self);
    fn emit_epilogue(&mut self, ctx: &EpilogueContext<'_>);
    /// Drops the value an expression statement left behind.
    fn emit_discard(&mut self);
}
