use std::rc::Rc;

use super::value::RegexValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    LooseEq,
    LooseNe,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    /// `??`: falls through only on `null` and `undefined`.
    Nullish,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    Str(Rc<str>),
    Bool(bool),
    Null,
    Undefined,
    Regex(Rc<RegexValue>),
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `name = value`, or `name op= value` when `op` is set.
    Assign {
        name: String,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    /// `++name`, `name--` and friends.
    Update {
        name: String,
        delta: f64,
        prefix: bool,
    },
    // `optional` marks a `?.` link; a nullish target ends the whole chain.
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
    },
    /// A template literal: `quasis` has one more element than `exprs`.
    Template {
        quasis: Vec<Rc<str>>,
        exprs: Vec<Expr>,
    },
    Function(Rc<FunctionDef>),
}

#[derive(Debug)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: FunctionBody,
}

#[derive(Debug)]
pub enum FunctionBody {
    /// Arrow function with an expression body.
    Expr(Expr),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Declare(Vec<(String, Option<Expr>)>),
    Function(Rc<FunctionDef>),
    If {
        test: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        name: String,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Block(Vec<Stmt>),
    Expr(Expr),
    Empty,
}

/// A parsed sequence of top-level statements.
#[derive(Debug, Clone)]
pub struct Program {
    pub body: Vec<Stmt>,
}

impl Program {
    /// Name of the first top-level function declaration, if any.
    pub fn first_function_name(&self) -> Option<&str> {
        self.body.iter().find_map(|stmt| match stmt {
            Stmt::Function(def) => def.name.as_deref(),
            _ => None,
        })
    }
}
