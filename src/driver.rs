//! Whole-program orchestration: the global scope bracket and the end-of-program checks.

use crate::ast::{Pos, Program};
use crate::codegen::JasminGen;
use crate::diag::{Diagnostic, Reporter, SemanticError};
use crate::emit::{Emitter, EpilogueContext};
use crate::parser::{parse_program, ParseError};
use crate::translate::{TranslateError, Translator, ENTRY_POINT};

/// Per-run settings, built from the command line.
#[derive(Debug, Clone)]
pub struct Config {
    pub class_name: String,
    pub semantic_diagnostics: bool,
}

/// Counts reported after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub declarations: usize,
    pub has_entry_point: bool,
    pub uses_input: bool,
}

/// Result of compiling one source text.
#[derive(Debug)]
pub struct Compilation {
    /// Target code, present only when no error of any kind was detected.
    pub output: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl<E: Emitter + ?Sized> Translator<'_, E> {
    fn open_program(&mut self) {
        self.ctx.scopes.enter_scope();
        self.out.emit_prologue();
    }

    fn close_program(&mut self, end: Pos) -> Result<(), TranslateError> {
        if self.ctx.program.uses_input {
            self.out.emit_read_support_routine();
        }
        self.out.emit_epilogue(&EpilogueContext {
            entry: self.ctx.program.entry.as_ref(),
            globals: self.ctx.scopes.current_records(),
        });
        self.ctx.scopes.exit_scope()?;
        debug_assert_eq!(self.ctx.scopes.open_scopes(), 0);
        debug_assert!(self.ctx.labels.is_balanced());
        if !self.ctx.program.has_entry_point {
            self.error(end, SemanticError::MissingEntryPoint(ENTRY_POINT.to_string()));
        }
        Ok(())
    }
}

/// Translates every declaration of `prog` between the program prologue and epilogue.
pub fn translate_program<E: Emitter + ?Sized>(
    prog: &Program,
    out: &mut E,
    diag: &mut Reporter,
) -> Result<Summary, TranslateError> {
    let mut t = Translator::new(out, diag);
    t.open_program();
    for d in &prog.decls {
        t.declaration(d)?;
    }
    t.close_program(prog.end)?;
    Ok(Summary {
        declarations: prog.decls.len(),
        has_entry_point: t.ctx.program.has_entry_point,
        uses_input: t.ctx.program.uses_input,
    })
}

pub fn compile(src: &str, cfg: &Config) -> Result<Compilation, TranslateError> {
    let mut diag = Reporter::new(cfg.semantic_diagnostics);
    let prog = match parse_program(src) {
        Ok(p) => p,
        Err(ParseError::Syntax(e)) => {
            diag.syntax(e);
            return Ok(Compilation {
                output: None,
                diagnostics: diag.diagnostics().to_vec(),
            });
        }
        Err(ParseError::Malformed(pos, what)) => {
            log::error!("malformed parse tree at {pos}: missing {what}");
            return Ok(Compilation {
                output: None,
                diagnostics: vec![],
            });
        }
    };

    let mut gen = JasminGen::new(&cfg.class_name);
    let summary = translate_program(&prog, &mut gen, &mut diag)?;
    log::info!(
        "{} declarations, entry point: {}, input: {}, {} semantic errors",
        summary.declarations,
        summary.has_entry_point,
        summary.uses_input,
        diag.semantic_errors()
    );

    let output = if diag.has_errors() {
        None
    } else {
        Some(gen.finish()?)
    };
    Ok(Compilation {
        output,
        diagnostics: diag.diagnostics().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinOp;
    use crate::emit::recording::{Op, Recorder};
    use crate::symtab::ENTRY_SLOT;

    fn translate(src: &str) -> (Vec<Op>, Reporter, Summary) {
        let _ = env_logger::builder().is_test(true).try_init();
        let prog = parse_program(src).unwrap();
        let mut rec = Recorder::default();
        let mut diag = Reporter::new(true);
        let summary = translate_program(&prog, &mut rec, &mut diag).unwrap();
        (rec.ops, diag, summary)
    }

    fn cfg() -> Config {
        Config {
            class_name: "Prog".into(),
            semantic_diagnostics: true,
        }
    }

    #[test]
    fn round_trip_arithmetic_print() {
        let (ops, diag, summary) =
            translate("void main(void){ int x; x = 2 + 3 * 4; print(x); }");
        assert!(!diag.has_errors());
        assert!(summary.has_entry_point);
        assert_eq!(
            ops,
            vec![
                Op::Prologue,
                Op::FunctionBegin("main".into()),
                Op::ScalarInit("x".into()),
                Op::Const(2),
                Op::Const(3),
                Op::Const(4),
                Op::Arith(BinOp::Mul),
                Op::Arith(BinOp::Add),
                Op::Store("x".into()),
                Op::BeginPrint,
                Op::Load("x".into()),
                Op::EndPrint,
                Op::FunctionEnd,
                Op::Epilogue(Some(ENTRY_SLOT)),
            ]
        );
    }

    #[test]
    fn no_entry_point_yields_only_missing_entry_error() {
        let (ops, diag, summary) =
            translate("int f(int a){ return a; }\nint g(void){ return f(1); }\nvoid h(void){ }\n");
        assert!(!summary.has_entry_point);
        let msgs: Vec<String> = diag.diagnostics().iter().map(|d| d.to_string()).collect();
        assert_eq!(
            msgs,
            vec!["semantic error at line 4, column 1: missing entry point 'main'"]
        );
        assert_eq!(ops.last(), Some(&Op::Epilogue(None)));
    }

    #[test]
    fn read_support_precedes_epilogue() {
        let (ops, _, summary) = translate("void main(void){ int x; read(x); print(x); }");
        assert!(summary.uses_input);
        let n = ops.len();
        assert_eq!(ops[n - 2..], [Op::ReadSupport, Op::Epilogue(Some(ENTRY_SLOT))]);
    }

    #[test]
    fn compile_writes_nothing_on_error() {
        let c = compile("void main(void){ x = 1; }", &cfg()).unwrap();
        assert!(c.output.is_none());
        assert_eq!(c.diagnostics.len(), 1);

        let quiet = Config {
            semantic_diagnostics: false,
            ..cfg()
        };
        let c = compile("void main(void){ x = 1; }", &quiet).unwrap();
        assert!(c.output.is_none());
        assert!(c.diagnostics.is_empty());
    }

    #[test]
    fn compile_reports_first_syntax_error() {
        let c = compile("void main(void){ int x x = 1; }", &cfg()).unwrap();
        assert!(c.output.is_none());
        assert_eq!(c.diagnostics.len(), 1);
        assert!(matches!(c.diagnostics[0], Diagnostic::Syntax(_)));
    }

    #[test]
    fn compile_emits_class() {
        let c = compile(
            "int sq(int v){ return v * v; }\nvoid main(void){ print(sq(7)); }\n",
            &cfg(),
        )
        .unwrap();
        let out = c.output.unwrap();
        assert!(out.starts_with(".class public Prog\n"));
        assert!(out.contains(".method public static sq(I)I"));
        assert!(out.contains("  invokestatic Prog/sq(I)I\n"));
        assert!(out.contains(".method public static main([Ljava/lang/String;)V"));
    }

    #[test]
    fn fixtures_keep_operand_stack_balanced() {
        for src in [
            include_str!("../tests/fixtures/all_syntax.cm"),
            include_str!("../tests/fixtures/factorial.cm"),
        ] {
            let c = compile(src, &cfg()).unwrap();
            assert!(c.diagnostics.is_empty());
            assert!(c.output.is_some());
        }
    }

    #[test]
    fn void_call_as_value_writes_nothing() {
        let c = compile(
            "void p(void){ } void main(void){ int x; x = p(); print(p() + 1); if (p()) x = 1; }",
            &cfg(),
        )
        .unwrap();
        assert!(c.output.is_none());
        assert_eq!(c.diagnostics.len(), 3);
    }
}
