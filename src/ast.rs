use std::fmt;

/// 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

impl Pos {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.col)
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    pub decls: Vec<Decl>,
    /// Position just past the last token; whole-program errors are reported here.
    pub end: Pos,
}

#[derive(Debug, Clone)]
pub enum Decl {
    Var(VarDecl),
    Fun(FunDecl),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSpec {
    Int,
    Void,
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::Int => write!(f, "int"),
            TypeSpec::Void => write!(f, "void"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub ty: TypeSpec,
    pub name: String,
    /// `Some(n)` for `int a[n];`
    pub len: Option<u32>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct FunDecl {
    pub ret: TypeSpec,
    pub name: String,
    pub params: Vec<Param>,
    pub body: Compound,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub ty: TypeSpec,
    pub name: String,
    pub is_array: bool,
    pub pos: Pos,
}

#[derive(Debug, Clone, Default)]
pub struct Compound {
    pub locals: Vec<VarDecl>,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Option<Expr>),
    Compound(Compound),
    If {
        cond: Expr,
        then_s: Box<Stmt>,
        else_s: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    Return(Option<Expr>, Pos),
    Assign(VarRef, Expr),
    Print(Expr),
    Read(String, Pos),
}

/// `x` or `a[i]` in either value or store position.
#[derive(Debug, Clone)]
pub struct VarRef {
    pub name: String,
    pub index: Option<Box<Expr>>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Num(i32, Pos),
    Var(VarRef),
    Call(String, Vec<Expr>, Pos),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn is_relational(self) -> bool {
        !matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BinOp::*;
        let s = match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Eq => "==",
            Ne => "!=",
            Lt => "<",
            Le => "<=",
            Gt => ">",
            Ge => ">=",
        };
        f.write_str(s)
    }
}
