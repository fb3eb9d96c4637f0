use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;

use crate::ast::*;
use crate::diag::SyntaxError;

#[derive(Parser)]
#[grammar = "cminus.pest"]
struct CMinusParser;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("internal: malformed parse tree at {0}: missing {1}")]
    Malformed(Pos, &'static str),
}

pub fn parse_program(src: &str) -> Result<Program, ParseError> {
    let mut pairs = CMinusParser::parse(Rule::program, src).map_err(|e| syntax_error(src, &e))?;
    let p = pairs
        .next()
        .ok_or(ParseError::Malformed(Pos::new(1, 1), "program"))?;
    build_program(p)
}

fn syntax_error(src: &str, e: &pest::error::Error<Rule>) -> SyntaxError {
    let (line, col) = match e.line_col {
        pest::error::LineColLocation::Pos((l, c)) => (l, c),
        pest::error::LineColLocation::Span((l, c), _) => (l, c),
    };
    let offset = match e.location {
        pest::error::InputLocation::Pos(o) => o,
        pest::error::InputLocation::Span((o, _)) => o,
    };
    SyntaxError {
        pos: Pos::new(line, col),
        token: token_at(src, offset),
    }
}

/// Text of the token starting at `offset`, for error messages.
fn token_at(src: &str, offset: usize) -> String {
    let rest = src.get(offset..).unwrap_or("");
    let mut chars = rest.char_indices();
    let Some((_, first)) = chars.next() else {
        return "end of input".to_string();
    };
    if first.is_ascii_alphanumeric() || first == '_' {
        let end = rest
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        format!("'{}'", &rest[..end])
    } else {
        format!("'{first}'")
    }
}

fn pos_of(p: &Pair<Rule>) -> Pos {
    let (l, c) = p.as_span().start_pos().line_col();
    Pos::new(l, c)
}

fn next_pair<'i>(
    it: &mut Pairs<'i, Rule>,
    at: Pos,
    what: &'static str,
) -> Result<Pair<'i, Rule>, ParseError> {
    it.next().ok_or(ParseError::Malformed(at, what))
}

fn build_program(p: Pair<Rule>) -> Result<Program, ParseError> {
    let mut decls = vec![];
    let mut end = pos_of(&p);
    for item in p.into_inner() {
        match item.as_rule() {
            Rule::var_decl => decls.push(Decl::Var(build_var_decl(item)?)),
            Rule::fun_decl => decls.push(Decl::Fun(build_fun_decl(item)?)),
            Rule::EOI => end = pos_of(&item),
            _ => {}
        }
    }
    Ok(Program { decls, end })
}

fn build_type(p: &Pair<Rule>) -> TypeSpec {
    if p.as_str() == "void" {
        TypeSpec::Void
    } else {
        TypeSpec::Int
    }
}

fn build_var_decl(p: Pair<Rule>) -> Result<VarDecl, ParseError> {
    let at = pos_of(&p);
    let mut it = p.into_inner();
    let ty = build_type(&next_pair(&mut it, at, "type")?);
    let name_pair = next_pair(&mut it, at, "variable name")?;
    let pos = pos_of(&name_pair);
    let len = match it.next() {
        Some(n) => Some(parse_number::<u32>(&n)?),
        None => None,
    };
    Ok(VarDecl {
        ty,
        name: name_pair.as_str().to_string(),
        len,
        pos,
    })
}

fn build_fun_decl(p: Pair<Rule>) -> Result<FunDecl, ParseError> {
    let at = pos_of(&p);
    let mut it = p.into_inner();
    let ret = build_type(&next_pair(&mut it, at, "return type")?);
    let name_pair = next_pair(&mut it, at, "function name")?;
    let mut params = vec![];
    let mut body = None;
    for x in it {
        match x.as_rule() {
            Rule::params => params = build_params(x)?,
            Rule::compound_stmt => body = Some(build_compound(x)?),
            _ => {}
        }
    }
    Ok(FunDecl {
        ret,
        name: name_pair.as_str().to_string(),
        params,
        body: body.ok_or(ParseError::Malformed(at, "function body"))?,
        pos: pos_of(&name_pair),
    })
}

fn build_params(p: Pair<Rule>) -> Result<Vec<Param>, ParseError> {
    let mut params = vec![];
    for x in p.into_inner() {
        if x.as_rule() != Rule::param {
            continue;
        }
        let at = pos_of(&x);
        let mut it = x.into_inner();
        let ty = build_type(&next_pair(&mut it, at, "parameter type")?);
        let name_pair = next_pair(&mut it, at, "parameter name")?;
        params.push(Param {
            ty,
            name: name_pair.as_str().to_string(),
            is_array: it.next().is_some(),
            pos: pos_of(&name_pair),
        });
    }
    Ok(params)
}

fn build_compound(p: Pair<Rule>) -> Result<Compound, ParseError> {
    let mut c = Compound::default();
    for x in p.into_inner() {
        match x.as_rule() {
            Rule::var_decl => c.locals.push(build_var_decl(x)?),
            _ => c.stmts.push(build_stmt(x)?),
        }
    }
    Ok(c)
}

fn build_stmt(p: Pair<Rule>) -> Result<Stmt, ParseError> {
    let at = pos_of(&p);
    match p.as_rule() {
        Rule::compound_stmt => Ok(Stmt::Compound(build_compound(p)?)),
        Rule::if_stmt => {
            let mut it = p.into_inner().filter(|x| !matches!(x.as_rule(), Rule::kw_if | Rule::kw_else));
            let cond = build_expr(it.next().ok_or(ParseError::Malformed(at, "if condition"))?)?;
            let then_s = build_stmt(it.next().ok_or(ParseError::Malformed(at, "then branch"))?)?;
            let else_s = match it.next() {
                Some(e) => Some(Box::new(build_stmt(e)?)),
                None => None,
            };
            Ok(Stmt::If {
                cond,
                then_s: Box::new(then_s),
                else_s,
            })
        }
        Rule::while_stmt => {
            let mut it = p.into_inner().skip(1);
            let cond = build_expr(it.next().ok_or(ParseError::Malformed(at, "loop condition"))?)?;
            let body = build_stmt(it.next().ok_or(ParseError::Malformed(at, "loop body"))?)?;
            Ok(Stmt::While {
                cond,
                body: Box::new(body),
            })
        }
        Rule::return_stmt => {
            let value = match p.into_inner().nth(1) {
                Some(e) => Some(build_expr(e)?),
                None => None,
            };
            Ok(Stmt::Return(value, at))
        }
        Rule::print_stmt => {
            let e = p
                .into_inner()
                .nth(1)
                .ok_or(ParseError::Malformed(at, "print argument"))?;
            Ok(Stmt::Print(build_expr(e)?))
        }
        Rule::read_stmt => {
            let target = p
                .into_inner()
                .nth(1)
                .ok_or(ParseError::Malformed(at, "read target"))?;
            Ok(Stmt::Read(target.as_str().to_string(), pos_of(&target)))
        }
        Rule::assign_stmt => {
            let mut it = p.into_inner();
            let target = build_var(next_pair(&mut it, at, "assignment target")?)?;
            let value = build_expr(next_pair(&mut it, at, "assigned value")?)?;
            Ok(Stmt::Assign(target, value))
        }
        Rule::expr_stmt => match p.into_inner().next() {
            Some(e) => Ok(Stmt::Expr(Some(build_expr(e)?))),
            None => Ok(Stmt::Expr(None)),
        },
        _ => Err(ParseError::Malformed(at, "statement")),
    }
}

fn build_var(p: Pair<Rule>) -> Result<VarRef, ParseError> {
    let at = pos_of(&p);
    let mut it = p.into_inner();
    let name = next_pair(&mut it, at, "identifier")?.as_str().to_string();
    let index = match it.next() {
        Some(ix) => Some(Box::new(build_expr(ix)?)),
        None => None,
    };
    Ok(VarRef {
        name,
        index,
        pos: at,
    })
}

fn build_expr(p: Pair<Rule>) -> Result<Expr, ParseError> {
    let at = pos_of(&p);
    match p.as_rule() {
        Rule::expr => {
            let mut it = p.into_inner();
            let left = build_expr(next_pair(&mut it, at, "operand")?)?;
            if let Some(op) = it.next() {
                let right = build_expr(next_pair(&mut it, at, "operand")?)?;
                Ok(Expr::Binary(
                    Box::new(left),
                    parse_relop(&op),
                    Box::new(right),
                ))
            } else {
                Ok(left)
            }
        }
        Rule::additive | Rule::term => {
            let mut it = p.into_inner();
            let mut e = build_expr(next_pair(&mut it, at, "operand")?)?;
            while let Some(op) = it.next() {
                let rhs = build_expr(next_pair(&mut it, at, "operand")?)?;
                let bop = match op.as_str() {
                    "+" => BinOp::Add,
                    "-" => BinOp::Sub,
                    "*" => BinOp::Mul,
                    _ => BinOp::Div,
                };
                e = Expr::Binary(Box::new(e), bop, Box::new(rhs));
            }
            Ok(e)
        }
        Rule::number => Ok(Expr::Num(parse_number::<i32>(&p)?, at)),
        Rule::var => Ok(Expr::Var(build_var(p)?)),
        Rule::call => {
            let mut it = p.into_inner();
            let name = next_pair(&mut it, at, "callee")?.as_str().to_string();
            let mut args = vec![];
            if let Some(list) = it.next() {
                for a in list.into_inner() {
                    args.push(build_expr(a)?);
                }
            }
            Ok(Expr::Call(name, args, at))
        }
        _ => Err(ParseError::Malformed(at, "expression")),
    }
}

fn parse_relop(p: &Pair<Rule>) -> BinOp {
    match p.as_str() {
        "<=" => BinOp::Le,
        ">=" => BinOp::Ge,
        "==" => BinOp::Eq,
        "!=" => BinOp::Ne,
        "<" => BinOp::Lt,
        _ => BinOp::Gt,
    }
}

fn parse_number<T: std::str::FromStr>(p: &Pair<Rule>) -> Result<T, ParseError> {
    p.as_str().parse::<T>().map_err(|_| {
        ParseError::Syntax(SyntaxError {
            pos: pos_of(p),
            token: format!("'{}' (integer literal out of range)", p.as_str()),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_declarations_and_params() {
        let p = parse_program("int g; int a[10]; int f(int x, int v[]) { return x; } void main(void) { }")
            .unwrap();
        assert_eq!(p.decls.len(), 4);
        match &p.decls[1] {
            Decl::Var(v) => assert_eq!(v.len, Some(10)),
            other => panic!("unexpected {other:?}"),
        }
        match &p.decls[2] {
            Decl::Fun(f) => {
                assert_eq!(f.params.len(), 2);
                assert!(!f.params[0].is_array);
                assert!(f.params[1].is_array);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &p.decls[3] {
            Decl::Fun(f) => {
                assert!(f.params.is_empty());
                assert_eq!(f.ret, TypeSpec::Void);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let p = parse_program("void main(void) { int x; x = 2 + 3 * 4; }").unwrap();
        let Decl::Fun(f) = &p.decls[0] else { panic!() };
        let Stmt::Assign(_, Expr::Binary(l, BinOp::Add, r)) = &f.body.stmts[0] else {
            panic!("unexpected {:?}", f.body.stmts[0]);
        };
        assert!(matches!(**l, Expr::Num(2, _)));
        assert!(matches!(**r, Expr::Binary(_, BinOp::Mul, _)));
    }

    #[test]
    fn equality_is_not_assignment() {
        let p = parse_program("void main(void) { int x; x == 1; }").unwrap();
        let Decl::Fun(f) = &p.decls[0] else { panic!() };
        assert!(matches!(
            f.body.stmts[0],
            Stmt::Expr(Some(Expr::Binary(_, BinOp::Eq, _)))
        ));
    }

    #[test]
    fn else_is_optional_and_keywords_need_boundaries() {
        let p = parse_program(
            "void main(void) { int iffy; if (iffy) iffy = 1; if (iffy < 2) ; else { iffy = 3; } }",
        )
        .unwrap();
        let Decl::Fun(f) = &p.decls[0] else { panic!() };
        assert!(matches!(f.body.stmts[0], Stmt::If { else_s: None, .. }));
        assert!(matches!(f.body.stmts[1], Stmt::If { else_s: Some(_), .. }));
    }

    #[test]
    fn syntax_error_reports_position_and_token() {
        let err = parse_program("void main(void) {\n  x = ;\n}").unwrap_err();
        match err {
            ParseError::Syntax(e) => {
                assert_eq!(e.pos.line, 2);
                assert_eq!(e.token, "';'");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn comments_are_skipped() {
        let p = parse_program("/* header */ void main(void) { /* body */ }").unwrap();
        assert_eq!(p.decls.len(), 1);
    }
}
