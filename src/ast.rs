use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::token::Pos;
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    /// `^^` string concatenation.
    Concat,
    /// `~` substring search, 0-based, -1 when absent.
    IndexOf,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Pow => "**",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Less => "<",
            BinOp::LessEq => "<=",
            BinOp::Greater => ">",
            BinOp::GreaterEq => ">=",
            BinOp::Concat => "^^",
            BinOp::IndexOf => "~",
        };
        write!(f, "{}", text)
    }
}

/// Short-circuiting operators. The low-precedence word forms and the
/// symbolic forms share these; they differ only in binding tightness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IncDec {
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    /// `.=` string concatenation assignment.
    Concat,
}

#[derive(Debug, Clone, Serialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub default: Option<Node>,
}

/// A function definition, shared between its AST node and every closure
/// value created from it. The validator rewrites `ret` (return-type
/// inference), the body, and default expressions (desugaring) in place,
/// which is why they sit behind RefCell.
#[derive(Debug, Serialize)]
pub struct FuncDef {
    pub name: Option<String>,
    pub params: RefCell<Vec<Param>>,
    pub ret: RefCell<Type>,
    pub body: RefCell<Node>,
}

impl FuncDef {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Catch {
    /// `None` is the default (bare) catch.
    pub cond: Option<Node>,
    pub handler: Node,
}

/// One node of the annotated syntax tree: an instruction plus operands,
/// with the source position of the producing token.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub kind: NodeKind,
    pub pos: Pos,
}

impl Node {
    pub fn new(kind: NodeKind, pos: Pos) -> Self {
        Node { kind, pos }
    }

    pub fn nop() -> Self {
        Node::new(NodeKind::Nop, Pos::EOF)
    }

    pub fn is_nop(&self) -> bool {
        matches!(self.kind, NodeKind::Nop)
    }

    /// Whether this expression may be assigned into.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Ident(_) | NodeKind::QualIdent { .. } | NodeKind::Access { .. } | NodeKind::Dot { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum NodeKind {
    Program(Vec<Node>),
    Nop,

    IntLit(i64),
    RealLit(f64),
    BoolLit(bool),
    NullLit,
    StrLit(String),
    /// Interpolated string, stored raw; segments are parsed and
    /// evaluated when the value is produced.
    InterpLit(String),

    Ident(String),
    QualIdent { module: String, name: String },

    /// Parenthesized sequence `(e1; e2; …)`: child scope, value of the
    /// last expression.
    Block(Vec<Node>),

    VarDecl {
        name: String,
        ty: Type,
        init: Option<Box<Node>>,
    },
    Assign {
        op: AssignOp,
        target: Box<Node>,
        value: Box<Node>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Logical {
        op: LogicOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Unary {
        op: UnOp,
        expr: Box<Node>,
    },
    Prefix {
        op: IncDec,
        target: Box<Node>,
    },
    Postfix {
        op: IncDec,
        target: Box<Node>,
    },
    Range {
        from: Box<Node>,
        to: Box<Node>,
    },
    /// `if c then a else b` and `c ? a : b`.
    Cond {
        cond: Box<Node>,
        then: Box<Node>,
        els: Option<Box<Node>>,
    },
    While {
        cond: Box<Node>,
        body: Box<Node>,
    },
    Next,
    Last(Option<Box<Node>>),
    Return(Option<Box<Node>>),

    FuncDef(Rc<FuncDef>),
    Call {
        target: Box<Node>,
        args: Vec<Node>,
    },
    /// `name = value` inside a call's argument list; rewritten to
    /// positional form by the validator.
    NamedArg {
        name: String,
        value: Box<Node>,
    },
    /// `x[k]`.
    Access {
        target: Box<Node>,
        key: Box<Node>,
    },
    /// `x.y`; desugared by the validator to `x["y"]`.
    Dot {
        target: Box<Node>,
        field: String,
    },
    ArrayLit(Vec<Node>),
    MapLit(Vec<(Node, Node)>),

    Exists(Box<Node>),
    Delete(Box<Node>),
    Keys(Box<Node>),
    Values(Box<Node>),

    Try {
        body: Box<Node>,
        catches: Vec<Catch>,
    },
    Throw(Box<Node>),

    TypeDecl {
        name: String,
        parent: Option<String>,
        alias: Option<Type>,
    },
    ModuleDecl(String),
    Import {
        path: String,
        alias: Option<String>,
    },
}
