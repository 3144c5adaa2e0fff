//! Arithmetic expressions over component variables.
//!
//! Grammar (usual precedence, `^`/`**` right-associative and binding tighter
//! than unary minus):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | power
//! power   := primary (('^' | '**') unary)?
//! primary := number | name ['[' int ']'] | func '(' expr ')' | '(' expr ')'
//! ```
//!
//! Expressions are parsed once, bound to local buffer offsets, and evaluated
//! on any [`Scalar`] so that the same tree serves real and complex-step runs.

use crate::error::{ComponentError, ComponentResult};
use crate::scalar::Scalar;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sqrt,
    Tanh,
    Abs,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "sqrt" => Func::Sqrt,
            "tanh" => Func::Tanh,
            "abs" => Func::Abs,
            _ => return None,
        })
    }

    fn apply<T: Scalar>(self, v: T) -> T {
        match self {
            Func::Sin => v.sin(),
            Func::Cos => v.cos(),
            Func::Tan => v.tan(),
            Func::Exp => v.exp(),
            Func::Log => v.ln(),
            Func::Sqrt => v.sqrt(),
            Func::Tanh => v.tanh(),
            Func::Abs => v.abs_cs(),
        }
    }
}

/// Which local buffer a variable reference reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Input,
    Output,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub index: Option<usize>,
    source: Source,
    offset: usize,
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Const(f64),
    Var(VarRef),
    Neg(Box<Node>),
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Div(Box<Node>, Box<Node>),
    Pow(Box<Node>, Box<Node>),
    Call(Func, Box<Node>),
}

impl Node {
    fn eval<T: Scalar>(&self, inputs: &[T], outputs: &[T]) -> T {
        match self {
            Node::Const(c) => T::from_f64(*c),
            Node::Var(v) => match v.source {
                Source::Input => inputs[v.offset],
                Source::Output => outputs[v.offset],
            },
            Node::Neg(a) => -a.eval(inputs, outputs),
            Node::Add(a, b) => a.eval(inputs, outputs) + b.eval(inputs, outputs),
            Node::Sub(a, b) => a.eval(inputs, outputs) - b.eval(inputs, outputs),
            Node::Mul(a, b) => a.eval(inputs, outputs) * b.eval(inputs, outputs),
            Node::Div(a, b) => a.eval(inputs, outputs) / b.eval(inputs, outputs),
            Node::Pow(a, b) => {
                let base = a.eval(inputs, outputs);
                match **b {
                    Node::Const(c) if c.fract() == 0.0 && c.abs() <= i32::MAX as f64 => {
                        base.powi(c as i32)
                    }
                    Node::Const(c) => base.powf(c),
                    _ => base.pow(b.eval(inputs, outputs)),
                }
            }
            Node::Call(f, a) => f.apply(a.eval(inputs, outputs)),
        }
    }

    fn visit_vars<'s>(&'s self, f: &mut dyn FnMut(&'s VarRef)) {
        match self {
            Node::Const(_) => {}
            Node::Var(v) => f(v),
            Node::Neg(a) | Node::Call(_, a) => a.visit_vars(f),
            Node::Add(a, b)
            | Node::Sub(a, b)
            | Node::Mul(a, b)
            | Node::Div(a, b)
            | Node::Pow(a, b) => {
                a.visit_vars(f);
                b.visit_vars(f);
            }
        }
    }

    fn visit_vars_mut(&mut self, f: &mut dyn FnMut(&mut VarRef) -> ComponentResult<()>) -> ComponentResult<()> {
        match self {
            Node::Const(_) => Ok(()),
            Node::Var(v) => f(v),
            Node::Neg(a) | Node::Call(_, a) => a.visit_vars_mut(f),
            Node::Add(a, b)
            | Node::Sub(a, b)
            | Node::Mul(a, b)
            | Node::Div(a, b)
            | Node::Pow(a, b) => {
                a.visit_vars_mut(f)?;
                b.visit_vars_mut(f)
            }
        }
    }
}

/// A parsed expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    source: String,
    root: Node,
}

impl Expr {
    pub fn parse(source: &str) -> ComponentResult<Self> {
        let tokens = tokenize(source)?;
        let mut p = Parser {
            src: source,
            tokens,
            pos: 0,
        };
        let root = p.expr()?;
        if p.pos != p.tokens.len() {
            return Err(p.error("unexpected trailing input"));
        }
        Ok(Self {
            source: source.trim().to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Variable references in order of appearance (duplicates included).
    pub fn vars(&self) -> Vec<&VarRef> {
        let mut out = Vec::new();
        self.root.visit_vars(&mut |v| out.push(v));
        out
    }

    /// Distinct variable names in order of first appearance.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for v in self.vars() {
            if !names.contains(&v.name) {
                names.push(v.name.clone());
            }
        }
        names
    }

    /// Resolve every reference to a buffer offset.
    ///
    /// `resolve(name)` returns the source buffer, the variable's offset and size.
    pub fn bind(
        &mut self,
        mut resolve: impl FnMut(&str) -> Option<(Source, usize, usize)>,
    ) -> ComponentResult<()> {
        let src = self.source.clone();
        self.root.visit_vars_mut(&mut |v| {
            let (source, offset, size) = resolve(&v.name).ok_or_else(|| {
                ComponentError::invalid(format!("unknown variable '{}' in '{src}'", v.name))
            })?;
            let index = match v.index {
                Some(i) if i >= size => {
                    return Err(ComponentError::invalid(format!(
                        "index {i} out of range for '{}' (size {size}) in '{src}'",
                        v.name
                    )));
                }
                Some(i) => i,
                None if size == 1 => 0,
                None => {
                    return Err(ComponentError::invalid(format!(
                        "'{}' has {size} entries and must be indexed in '{src}'",
                        v.name
                    )));
                }
            };
            v.source = source;
            v.offset = offset + index;
            Ok(())
        })
    }

    pub fn eval<T: Scalar>(&self, inputs: &[T], outputs: &[T]) -> T {
        self.root.eval(inputs, outputs)
    }
}

/// `lhs = rhs` with a plain variable name on the left.
#[derive(Clone, Debug, PartialEq)]
pub struct Equation {
    pub lhs: String,
    pub rhs: Expr,
}

impl Equation {
    pub fn parse(source: &str) -> ComponentResult<Self> {
        let (lhs, rhs) = source.split_once('=').ok_or_else(|| {
            ComponentError::invalid(format!("equation '{source}' has no '='"))
        })?;
        let lhs = lhs.trim();
        if !is_identifier(lhs) || Func::from_name(lhs).is_some() {
            return Err(ComponentError::invalid(format!(
                "left-hand side '{lhs}' of '{source}' is not a variable name"
            )));
        }
        Ok(Self {
            lhs: lhs.to_string(),
            rhs: Expr::parse(rhs)?,
        })
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

fn tokenize(src: &str) -> ComponentResult<Vec<Tok>> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                out.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                out.push(Tok::Minus);
                i += 1;
            }
            '*' if bytes.get(i + 1) == Some(&b'*') => {
                out.push(Tok::Caret);
                i += 2;
            }
            '*' => {
                out.push(Tok::Star);
                i += 1;
            }
            '/' => {
                out.push(Tok::Slash);
                i += 1;
            }
            '^' => {
                out.push(Tok::Caret);
                i += 1;
            }
            '(' => {
                out.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                out.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                out.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                out.push(Tok::RBracket);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                // exponent: 1e-3, 2.5E+4
                if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                        j += 1;
                    }
                    if j < bytes.len() && bytes[j].is_ascii_digit() {
                        while j < bytes.len() && bytes[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text = &src[start..i];
                let v = text.parse::<f64>().map_err(|_| {
                    ComponentError::invalid(format!("bad number '{text}' in '{src}'"))
                })?;
                out.push(Tok::Num(v));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                out.push(Tok::Ident(src[start..i].to_string()));
            }
            other => {
                return Err(ComponentError::invalid(format!(
                    "unexpected character '{other}' in '{src}'"
                )));
            }
        }
    }
    Ok(out)
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> ComponentError {
        ComponentError::invalid(format!("{reason} in '{}'", self.src.trim()))
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> ComponentResult<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn expr(&mut self) -> ComponentResult<Node> {
        let mut lhs = self.term()?;
        loop {
            if self.eat(&Tok::Plus) {
                lhs = Node::Add(Box::new(lhs), Box::new(self.term()?));
            } else if self.eat(&Tok::Minus) {
                lhs = Node::Sub(Box::new(lhs), Box::new(self.term()?));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn term(&mut self) -> ComponentResult<Node> {
        let mut lhs = self.unary()?;
        loop {
            if self.eat(&Tok::Star) {
                lhs = Node::Mul(Box::new(lhs), Box::new(self.unary()?));
            } else if self.eat(&Tok::Slash) {
                lhs = Node::Div(Box::new(lhs), Box::new(self.unary()?));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn unary(&mut self) -> ComponentResult<Node> {
        if self.eat(&Tok::Minus) {
            return Ok(Node::Neg(Box::new(self.unary()?)));
        }
        if self.eat(&Tok::Plus) {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> ComponentResult<Node> {
        let base = self.primary()?;
        if self.eat(&Tok::Caret) {
            let exp = self.unary()?;
            let exp = match exp {
                Node::Neg(inner) => match *inner {
                    Node::Const(c) => Node::Const(-c),
                    other => Node::Neg(Box::new(other)),
                },
                other => other,
            };
            return Ok(Node::Pow(Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> ComponentResult<Node> {
        match self.next() {
            Some(Tok::Num(v)) => Ok(Node::Const(v)),
            Some(Tok::LParen) => {
                let inner = self.expr()?;
                self.expect(&Tok::RParen, "')'")?;
                Ok(inner)
            }
            Some(Tok::Ident(name)) => {
                if let Some(func) = Func::from_name(&name) {
                    self.expect(&Tok::LParen, &format!("'(' after {name}"))?;
                    let arg = self.expr()?;
                    self.expect(&Tok::RParen, "')'")?;
                    return Ok(Node::Call(func, Box::new(arg)));
                }
                if name == "pi" {
                    return Ok(Node::Const(std::f64::consts::PI));
                }
                let index = if self.eat(&Tok::LBracket) {
                    let idx = match self.next() {
                        Some(Tok::Num(v)) if v >= 0.0 && v.fract() == 0.0 => v as usize,
                        _ => return Err(self.error("expected a non-negative integer index")),
                    };
                    self.expect(&Tok::RBracket, "']'")?;
                    Some(idx)
                } else {
                    None
                };
                Ok(Node::Var(VarRef {
                    name,
                    index,
                    source: Source::Input,
                    offset: 0,
                }))
            }
            Some(_) => Err(self.error("unexpected token")),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::C64;
    use nalgebra::Complex;

    fn eval_with(src: &str, vars: &[(&str, f64)]) -> f64 {
        let mut e = Expr::parse(src).unwrap();
        let names: Vec<&str> = vars.iter().map(|(n, _)| *n).collect();
        e.bind(|n| names.iter().position(|m| *m == n).map(|i| (Source::Input, i, 1)))
            .unwrap();
        let values: Vec<f64> = vars.iter().map(|(_, v)| *v).collect();
        e.eval(&values, &[])
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval_with("1 + 2*3", &[]), 7.0);
        assert_eq!(eval_with("(1 + 2)*3", &[]), 9.0);
        assert_eq!(eval_with("2^3^2", &[]), 512.0);
        assert_eq!(eval_with("2**3", &[]), 8.0);
        assert_eq!(eval_with("-x^2", &[("x", 3.0)]), -9.0);
        assert_eq!(eval_with("2^-1", &[]), 0.5);
        assert_eq!(eval_with("8/4/2", &[]), 1.0);
        assert_eq!(eval_with("1.5e2 - 50", &[]), 100.0);
    }

    #[test]
    fn functions_and_variables() {
        let v = eval_with("2*b + 1", &[("b", 4.0)]);
        assert_eq!(v, 9.0);
        let v = eval_with("sqrt(x) + abs(-y) + log(exp(2))", &[("x", 9.0), ("y", 1.0)]);
        assert!((v - 6.0).abs() < 1e-12);
        assert!((eval_with("sin(pi/2)", &[]) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn indexed_references_bind_to_entries() {
        let mut e = Expr::parse("v[2] - v[0]").unwrap();
        e.bind(|_| Some((Source::Input, 1, 3))).unwrap();
        assert_eq!(e.eval(&[0.0, 1.0, 2.0, 5.0], &[]), 4.0);

        let mut bad = Expr::parse("v[3]").unwrap();
        assert!(bad.bind(|_| Some((Source::Input, 0, 3))).is_err());
        let mut unindexed = Expr::parse("v + 1").unwrap();
        assert!(unindexed.bind(|_| Some((Source::Input, 0, 3))).is_err());
    }

    #[test]
    fn complex_evaluation_gives_derivative() {
        let mut e = Expr::parse("x**3 + sin(x)").unwrap();
        e.bind(|_| Some((Source::Input, 0, 1))).unwrap();
        let h = 1e-30;
        let z: C64 = e.eval(&[Complex::new(1.2, h)], &[]);
        let exact = 3.0 * 1.2_f64.powi(2) + 1.2_f64.cos();
        assert!((z.im / h - exact).abs() < 1e-13);
    }

    #[test]
    fn syntax_errors() {
        assert!(Expr::parse("1 +").is_err());
        assert!(Expr::parse("(1 + 2").is_err());
        assert!(Expr::parse("sin 2").is_err());
        assert!(Expr::parse("x $ 2").is_err());
        assert!(Equation::parse("y + 1 = x").is_err());
        assert!(Equation::parse("y 2").is_err());
        let eq = Equation::parse("y = 2*b + 1").unwrap();
        assert_eq!(eq.lhs, "y");
        assert_eq!(eq.rhs.names(), vec!["b".to_string()]);
    }
}
