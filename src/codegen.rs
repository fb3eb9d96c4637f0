//! Jasmin (JVM assembler) backend.
//!
//! Fields and methods are buffered separately because C-Minus lets globals follow
//! functions while a class file lists fields first. Each method body is buffered too so its
//! `.limit` directives can be computed once the body is complete.

use crate::ast::{BinOp, TypeSpec};
use crate::emit::{Emitter, EpilogueContext};
use crate::labels::{Label, LabelSource};
use crate::symtab::*;

// `$` keeps these out of the C-Minus identifier space.
const READ_ROUTINE: &str = "$read";
const SCANNER_FIELD: &str = "$in";

/// An instruction popped more operands than the method had pushed.
#[derive(Debug, thiserror::Error)]
#[error("operand stack underflow in `{0}`")]
pub struct StackUnderflow(pub String);

struct Method {
    header: String,
    ret: TypeSpec,
    body: Vec<String>,
    max_locals: u16,
    depth: i32,
    max_depth: i32,
}

pub struct JasminGen {
    class: String,
    header: String,
    fields: Vec<String>,
    methods: String,
    cur: Option<Method>,
    next_label: u32,
    /// Header of the first method whose operand stack went negative.
    underflow: Option<String>,
}

impl JasminGen {
    pub fn new(class: &str) -> Self {
        Self {
            class: class.to_string(),
            header: String::new(),
            fields: vec![],
            methods: String::new(),
            cur: None,
            next_label: 0,
            underflow: None,
        }
    }

    pub fn finish(self) -> Result<String, StackUnderflow> {
        if let Some(method) = self.underflow {
            return Err(StackUnderflow(method));
        }
        let mut out = self.header;
        for f in &self.fields {
            out.push_str(f);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.methods);
        Ok(out)
    }

    /// Writes one instruction into the current method and tracks stack depth.
    fn ins(&mut self, text: &str, stack_delta: i32) {
        let Some(m) = self.cur.as_mut() else {
            log::warn!("instruction outside a method dropped: {text}");
            return;
        };
        m.body.push(format!("  {text}"));
        m.depth += stack_delta;
        if m.depth < 0 {
            log::error!("stack underflow at `{text}` in {}", m.header);
            self.underflow.get_or_insert_with(|| m.header.clone());
            m.depth = 0;
        }
        m.max_depth = m.max_depth.max(m.depth);
    }

    fn touch_local(&mut self, n: u16) {
        if let Some(m) = self.cur.as_mut() {
            m.max_locals = m.max_locals.max(n.saturating_add(1));
        }
    }

    fn wln_method(&mut self, s: &str) {
        self.methods.push_str(s);
        self.methods.push('\n');
    }

    fn static_ref(&self, name: &str, desc: &str) -> String {
        format!("{}/{name} {desc}", self.class)
    }

    fn descriptor(f: &Function) -> String {
        let mut d = String::from("(");
        for p in &f.params {
            d.push_str(match p {
                ParamSym::Scalar(_) => "I",
                ParamSym::Array(_) => "[I",
            });
        }
        d.push(')');
        d.push_str(match f.ret {
            TypeSpec::Int => "I",
            TypeSpec::Void => "V",
        });
        d
    }

    fn load_array_ref(&mut self, storage: Storage, name: &str) {
        match storage {
            Storage::Local(n) => {
                self.touch_local(n);
                self.ins(&format!("aload {n}"), 1);
            }
            Storage::Static => {
                let r = self.static_ref(name, "[I");
                self.ins(&format!("getstatic {r}"), 1);
            }
        }
    }

    fn new_int_array(&mut self, len: u32) {
        self.emit_load_constant(i32::try_from(len).unwrap_or(i32::MAX));
        self.ins("newarray int", 0);
    }
}

impl LabelSource for JasminGen {
    fn fresh_label(&mut self) -> Label {
        self.next_label += 1;
        Label(self.next_label)
    }
}

impl Emitter for JasminGen {
    fn emit_prologue(&mut self) {
        self.header = format!(".class public {}\n.super java/lang/Object\n\n", self.class);
    }

    fn emit_static_declaration(&mut self, sym: &Symbol) {
        let desc = match sym {
            Symbol::Variable(_) => "I",
            Symbol::Array(_) => "[I",
            Symbol::Function(_) => return,
        };
        self.fields
            .push(format!(".field public static {} {desc}", sym.name()));
    }

    fn emit_array_local_init(&mut self, arr: &Array) {
        let (ArrayLen::Sized(len), Storage::Local(n)) = (arr.len, arr.storage) else {
            return;
        };
        self.new_int_array(len);
        self.touch_local(n);
        self.ins(&format!("astore {n}"), -1);
    }

    fn emit_scalar_local_init(&mut self, var: &Variable) {
        if let Storage::Local(_) = var.storage {
            self.ins("iconst_0", 1);
            self.emit_store(var);
        }
    }

    fn emit_function_begin(&mut self, f: &Function) {
        self.cur = Some(Method {
            header: format!(".method public static {}{}", f.name, Self::descriptor(f)),
            ret: f.ret,
            body: vec![],
            // Parameters beyond the slot limit were rejected before they got a record.
            max_locals: u16::try_from(f.params.len()).unwrap_or(u16::MAX),
            depth: 0,
            max_depth: 0,
        });
    }

    fn emit_function_end(&mut self) {
        // The body may fall off its end; close it the way the return type requires.
        match self.cur.as_ref().map(|m| m.ret) {
            Some(TypeSpec::Void) => self.ins("return", 0),
            Some(TypeSpec::Int) => {
                self.ins("iconst_0", 1);
                self.ins("ireturn", -1);
            }
            None => return,
        }
        let Some(m) = self.cur.take() else { return };
        self.wln_method(&m.header);
        self.wln_method(&format!("  .limit stack {}", m.max_depth.max(1)));
        self.wln_method(&format!("  .limit locals {}", m.max_locals));
        for line in &m.body {
            self.wln_method(line);
        }
        self.wln_method(".end method");
        self.wln_method("");
    }

    fn emit_store(&mut self, var: &Variable) {
        match var.storage {
            Storage::Local(n) => {
                self.touch_local(n);
                self.ins(&format!("istore {n}"), -1);
            }
            Storage::Static => {
                let r = self.static_ref(&var.name, "I");
                self.ins(&format!("putstatic {r}"), -1);
            }
        }
    }

    fn emit_indexed_store(&mut self) {
        self.ins("iastore", -3);
    }

    fn emit_load_variable(&mut self, var: &Variable) {
        match var.storage {
            Storage::Local(n) => {
                self.touch_local(n);
                self.ins(&format!("iload {n}"), 1);
            }
            Storage::Static => {
                let r = self.static_ref(&var.name, "I");
                self.ins(&format!("getstatic {r}"), 1);
            }
        }
    }

    fn emit_load_array_address(&mut self, arr: &Array) {
        self.load_array_ref(arr.storage, &arr.name);
    }

    fn emit_indexed_load(&mut self) {
        self.ins("iaload", -1);
    }

    fn emit_load_constant(&mut self, value: i32) {
        let text = match value {
            -1 => "iconst_m1".to_string(),
            0..=5 => format!("iconst_{value}"),
            -128..=127 => format!("bipush {value}"),
            -32768..=32767 => format!("sipush {value}"),
            _ => format!("ldc {value}"),
        };
        self.ins(&text, 1);
    }

    fn emit_arithmetic(&mut self, op: BinOp) {
        let text = match op {
            BinOp::Add => "iadd",
            BinOp::Sub => "isub",
            BinOp::Mul => "imul",
            BinOp::Div => "idiv",
            _ => {
                log::warn!("'{op}' is not an arithmetic operator");
                return;
            }
        };
        self.ins(text, -1);
    }

    fn emit_relational(&mut self, op: BinOp) {
        let branch = match op {
            BinOp::Eq => "if_icmpeq",
            BinOp::Ne => "if_icmpne",
            BinOp::Lt => "if_icmplt",
            BinOp::Le => "if_icmple",
            BinOp::Gt => "if_icmpgt",
            BinOp::Ge => "if_icmpge",
            _ => {
                log::warn!("'{op}' is not a relational operator");
                return;
            }
        };
        let yes = self.fresh_label();
        let done = self.fresh_label();
        self.ins(&format!("{branch} {yes}"), -2);
        self.ins("iconst_0", 1);
        self.ins(&format!("goto {done}"), 0);
        self.emit_label(yes);
        // iconst_1 replaces the iconst_0 of the other path.
        self.ins("iconst_1", 0);
        self.emit_label(done);
    }

    fn emit_label(&mut self, label: Label) {
        if let Some(m) = self.cur.as_mut() {
            m.body.push(format!("{label}:"));
        }
    }

    fn emit_jump(&mut self, label: Label) {
        self.ins(&format!("goto {label}"), 0);
    }

    fn emit_jump_if_false(&mut self, label: Label) {
        self.ins(&format!("ifeq {label}"), -1);
    }

    fn emit_call(&mut self, f: &Function) {
        let pushed = i32::from(f.ret == TypeSpec::Int);
        let text = format!("invokestatic {}/{}{}", self.class, f.name, Self::descriptor(f));
        self.ins(&text, pushed - f.params.len() as i32);
    }

    fn emit_return(&mut self) {
        self.ins("return", 0);
    }

    fn emit_return_value(&mut self) {
        self.ins("ireturn", -1);
    }

    fn emit_begin_print(&mut self) {
        self.ins("getstatic java/lang/System/out Ljava/io/PrintStream;", 1);
    }

    fn emit_end_print(&mut self) {
        self.ins("invokevirtual java/io/PrintStream/println(I)V", -2);
    }

    fn emit_read(&mut self, var: &Variable) {
        let text = format!("invokestatic {}/{READ_ROUTINE}()I", self.class);
        self.ins(&text, 1);
        self.emit_store(var);
    }

    fn emit_read_support_routine(&mut self) {
        let scanner = self.static_ref(SCANNER_FIELD, "Ljava/util/Scanner;");
        self.fields.push(format!(
            ".field private static {SCANNER_FIELD} Ljava/util/Scanner;"
        ));
        let ready = self.fresh_label();
        self.wln_method(&format!(".method private static {READ_ROUTINE}()I"));
        self.wln_method("  .limit stack 3");
        self.wln_method("  .limit locals 0");
        self.wln_method(&format!("  getstatic {scanner}"));
        self.wln_method(&format!("  ifnonnull {ready}"));
        self.wln_method("  new java/util/Scanner");
        self.wln_method("  dup");
        self.wln_method("  getstatic java/lang/System/in Ljava/io/InputStream;");
        self.wln_method("  invokespecial java/util/Scanner/<init>(Ljava/io/InputStream;)V");
        self.wln_method(&format!("  putstatic {scanner}"));
        self.wln_method(&format!("{ready}:"));
        self.wln_method(&format!("  getstatic {scanner}"));
        self.wln_method("  invokevirtual java/util/Scanner/nextInt()I");
        self.wln_method("  ireturn");
        self.wln_method(".end method");
        self.wln_method("");
    }

    fn emit_epilogue(&mut self, ctx: &EpilogueContext<'_>) {
        self.wln_method(".method public <init>()V");
        self.wln_method("  aload_0");
        self.wln_method("  invokespecial java/lang/Object/<init>()V");
        self.wln_method("  return");
        self.wln_method(".end method");
        self.wln_method("");

        let arrays: Vec<(&str, u32)> = ctx
            .globals
            .iter()
            .filter_map(|s| match s {
                Symbol::Array(Array {
                    name,
                    len: ArrayLen::Sized(n),
                    ..
                }) => Some((name.as_str(), *n)),
                _ => None,
            })
            .collect();
        if !arrays.is_empty() {
            self.cur = Some(Method {
                header: ".method static <clinit>()V".to_string(),
                ret: TypeSpec::Void,
                body: vec![],
                max_locals: 0,
                depth: 0,
                max_depth: 0,
            });
            for (name, len) in arrays {
                self.new_int_array(len);
                let r = self.static_ref(name, "[I");
                self.ins(&format!("putstatic {r}"), -1);
            }
            self.emit_function_end();
        }

        if let Some(entry) = ctx.entry.filter(|f| f.is_entry()) {
            self.wln_method(".method public static main([Ljava/lang/String;)V");
            self.wln_method("  .limit stack 0");
            self.wln_method("  .limit locals 1");
            self.wln_method(&format!(
                "  invokestatic {}/{}{}",
                self.class,
                entry.name,
                Self::descriptor(entry)
            ));
            self.wln_method("  return");
            self.wln_method(".end method");
        }
    }

    fn emit_discard(&mut self) {
        self.ins("pop", -1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(name: &str, n: u16) -> Variable {
        Variable {
            name: name.into(),
            scope: 1,
            storage: Storage::Local(n),
        }
    }

    fn func(name: &str, ret: TypeSpec, params: Vec<ParamSym>, slot: u8) -> Function {
        Function {
            name: name.into(),
            scope: 0,
            ret,
            params,
            slot,
        }
    }

    #[test]
    fn constants_pick_shortest_form() {
        let mut g = JasminGen::new("T");
        g.emit_function_begin(&func("f", TypeSpec::Void, vec![], OTHER_SLOT));
        for v in [-1, 3, 100, -200, 40000] {
            g.emit_load_constant(v);
        }
        g.emit_function_end();
        let out = g.finish().unwrap();
        assert!(out.contains("iconst_m1"));
        assert!(out.contains("iconst_3"));
        assert!(out.contains("bipush 100"));
        assert!(out.contains("sipush -200"));
        assert!(out.contains("ldc 40000"));
        assert!(out.contains(".limit stack 5"));
    }

    #[test]
    fn method_header_limits_and_trailing_return() {
        let f = func(
            "sum",
            TypeSpec::Int,
            vec![
                ParamSym::Array(Array {
                    name: "a".into(),
                    scope: 1,
                    len: ArrayLen::Unsized,
                    storage: Storage::Local(0),
                }),
                ParamSym::Scalar(local("n", 1)),
            ],
            OTHER_SLOT,
        );
        let mut g = JasminGen::new("T");
        g.emit_prologue();
        g.emit_function_begin(&f);
        g.emit_load_variable(&local("n", 1));
        g.emit_store(&local("s", 2));
        g.emit_function_end();
        let out = g.finish().unwrap();
        assert!(out.starts_with(".class public T\n.super java/lang/Object\n"));
        assert!(out.contains(".method public static sum([II)I"));
        assert!(out.contains(".limit locals 3"));
        assert!(out.contains("  iload 1\n  istore 2\n  iconst_0\n  ireturn\n.end method"));
    }

    #[test]
    fn relational_materialises_zero_or_one() {
        let mut g = JasminGen::new("T");
        g.emit_function_begin(&func("f", TypeSpec::Void, vec![], OTHER_SLOT));
        g.emit_load_constant(1);
        g.emit_load_constant(2);
        g.emit_relational(BinOp::Le);
        let skip = g.fresh_label();
        g.emit_jump_if_false(skip);
        g.emit_label(skip);
        g.emit_function_end();
        let out = g.finish().unwrap();
        assert!(out.contains(
            "  if_icmple L1\n  iconst_0\n  goto L2\nL1:\n  iconst_1\nL2:\n  ifeq L3\nL3:\n"
        ));
    }

    #[test]
    fn globals_become_fields_and_arrays_get_clinit() {
        let g_var = Symbol::Variable(Variable {
            name: "g".into(),
            scope: 0,
            storage: Storage::Static,
        });
        let g_arr = Symbol::Array(Array {
            name: "buf".into(),
            scope: 0,
            len: ArrayLen::Sized(16),
            storage: Storage::Static,
        });
        let main = func("main", TypeSpec::Void, vec![], ENTRY_SLOT);
        let mut g = JasminGen::new("Prog");
        g.emit_prologue();
        g.emit_static_declaration(&g_var);
        g.emit_static_declaration(&g_arr);
        g.emit_function_begin(&main);
        g.emit_function_end();
        let globals = [g_var, g_arr, Symbol::Function(main.clone())];
        g.emit_epilogue(&EpilogueContext {
            entry: Some(&main),
            globals: &globals,
        });
        let out = g.finish().unwrap();
        assert!(out.contains(".field public static g I\n.field public static buf [I\n"));
        assert!(out.contains(".method static <clinit>()V"));
        assert!(out.contains("  bipush 16\n  newarray int\n  putstatic Prog/buf [I\n  return"));
        assert!(out.contains(".method public static main([Ljava/lang/String;)V"));
        assert!(out.contains("  invokestatic Prog/main()V\n"));
        // fields precede every method
        let first_method = out.find(".method").unwrap();
        assert!(out.rfind(".field").unwrap() < first_method);
    }

    #[test]
    fn read_support_and_print() {
        let mut g = JasminGen::new("IO");
        g.emit_prologue();
        g.emit_function_begin(&func("main", TypeSpec::Void, vec![], ENTRY_SLOT));
        g.emit_read(&local("x", 0));
        g.emit_begin_print();
        g.emit_load_variable(&local("x", 0));
        g.emit_end_print();
        g.emit_function_end();
        g.emit_read_support_routine();
        let out = g.finish().unwrap();
        assert!(out.contains("  invokestatic IO/$read()I\n  istore 0\n"));
        assert!(out.contains("  getstatic java/lang/System/out Ljava/io/PrintStream;\n  iload 0\n"));
        assert!(out.contains(".method private static $read()I"));
        assert!(out.contains(".field private static $in Ljava/util/Scanner;"));
    }

    #[test]
    fn scalar_local_is_stored_before_first_load() {
        let i = local("i", 0);
        let mut g = JasminGen::new("T");
        g.emit_function_begin(&func("main", TypeSpec::Void, vec![], ENTRY_SLOT));
        g.emit_scalar_local_init(&i);
        g.emit_load_variable(&i);
        g.emit_discard();
        g.emit_function_end();
        let out = g.finish().unwrap();
        let first_store = out.find("istore 0").unwrap();
        let first_load = out.find("iload 0").unwrap();
        assert!(first_store < first_load);
        assert!(out.contains("  iconst_0\n  istore 0\n"));
    }

    #[test]
    fn consuming_a_missing_value_is_caught() {
        let p = func("p", TypeSpec::Void, vec![], OTHER_SLOT);
        let mut g = JasminGen::new("T");
        g.emit_function_begin(&func("main", TypeSpec::Void, vec![], ENTRY_SLOT));
        g.emit_call(&p);
        g.emit_store(&local("x", 0));
        g.emit_function_end();
        let err = g.finish().unwrap_err();
        assert_eq!(err.0, ".method public static main()V");
    }
}
