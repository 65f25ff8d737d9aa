//! Syntax tree of the script language.

use std::rc::Rc;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    InstanceOf,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
}

/// Short-circuiting operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
    Void,
    Delete,
    BitNot,
}

/// Declaration keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Var,
    Let,
    Const,
}

/// Binding target of a declaration, parameter or loop variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Ident(String),
    /// `{a, b: c, d = 1}`
    Object(Vec<(String, Pattern, Option<Expr>)>),
    /// `[a, , b = 2]`
    Array(Vec<Option<(Pattern, Option<Expr>)>>),
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub pattern: Pattern,
    pub default: Option<Expr>,
}

/// Body of a function.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    /// Concise arrow body.
    Expr(Box<Expr>),
}

/// A function literal or declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: FunctionBody,
    pub is_arrow: bool,
}

/// Element of an array literal or argument list.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Expr(Expr),
    Spread(Expr),
}

/// Key of an object literal property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropKey {
    Static(String),
    Computed(Expr),
}

/// Object literal member.
#[derive(Debug, Clone, PartialEq)]
pub enum Prop {
    KeyValue(PropKey, Expr),
    Spread(Expr),
}

/// Property reference in a member expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Named(String),
    Computed(Box<Expr>),
}

/// Segment of a template literal.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSegment {
    Text(String),
    Expr(Expr),
}

/// Expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Template(Vec<TemplateSegment>),
    Bool(bool),
    Null,
    Undefined,
    This,
    Ident(String),
    Array(Vec<Element>),
    Object(Vec<Prop>),
    Function(Rc<FunctionDef>),
    Unary(UnaryOp, Box<Expr>),
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        property: Member,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Element>,
        optional: bool,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Element>,
    },
    Await(Box<Expr>),
}

impl Expr {
    /// Whether the expression can be assigned to.
    #[must_use]
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Expr::Ident(_)
                | Expr::Member {
                    optional: false,
                    ..
                }
        )
    }
}

/// One `case` (or `default`, with no test) of a switch.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

/// Statements.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Declare {
        kind: VarKind,
        decls: Vec<(Pattern, Option<Expr>)>,
    },
    Function(Rc<FunctionDef>),
    Return(Option<Expr>),
    If(Expr, Box<Stmt>, Option<Box<Stmt>>),
    While(Expr, Box<Stmt>),
    DoWhile(Box<Stmt>, Expr),
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        kind: Option<VarKind>,
        pattern: Pattern,
        iterable: Expr,
        body: Box<Stmt>,
    },
    ForIn {
        kind: Option<VarKind>,
        pattern: Pattern,
        object: Expr,
        body: Box<Stmt>,
    },
    Switch(Expr, Vec<SwitchCase>),
    Break,
    Continue,
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        catch: Option<(Option<Pattern>, Vec<Stmt>)>,
        finally: Option<Vec<Stmt>>,
    },
    Block(Vec<Stmt>),
    Empty,
}

/// A parsed script.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}
