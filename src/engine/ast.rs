//! Syntax tree shared by every engine release.

use std::fmt;
use std::sync::Arc;

/// 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pos {
    /// Line number, starting at 1.
    pub line: u32,
    /// Column number, starting at 1.
    pub column: u32,
}

impl Pos {
    /// Construct a position.
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A top-level or block-level statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Statement payload.
    pub kind: NodeKind,
    /// Where the statement starts.
    pub pos: Pos,
}

/// Statement variants.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// `### name { ... }` metadata block. Only valid at the top level.
    Meta {
        /// Optional block name.
        name: Option<String>,
        /// Static literal value.
        value: Expr,
    },
    /// Variable definition.
    Def {
        /// Bound name.
        name: String,
        /// Whether the binding may be reassigned.
        mutable: bool,
        /// Initial value.
        expr: Expr,
    },
    /// Assignment to an existing place.
    Assign {
        /// Identifier, index or property expression.
        target: Expr,
        /// Plain or compound assignment.
        op: AssignOp,
        /// Assigned value.
        expr: Expr,
    },
    /// `<: expr`
    Out(Expr),
    /// `return expr?`
    Return(Option<Expr>),
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `loop { ... }`
    Loop(Block),
    /// `each <decl> x, items { ... }`
    Each {
        /// Loop variable.
        var: String,
        /// Iterated array.
        items: Expr,
        /// Loop body.
        body: Block,
    },
    /// `for <decl> i, times { ... }`
    For {
        /// Counter variable.
        var: String,
        /// Number of iterations.
        times: Expr,
        /// Loop body.
        body: Block,
    },
    /// Bare expression statement.
    Expr(Expr),
}

/// Assignment operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=` or `<-`
    Set,
    /// `+=`
    Add,
    /// `-=`
    Sub,
}

/// Statement sequence delimited by braces.
pub type Block = Arc<[Node]>;

/// Expression with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// Expression payload.
    pub kind: ExprKind,
    /// Where the expression starts.
    pub pos: Pos,
}

/// Expression variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// `null` / `_`
    Null,
    /// `true`/`false` or `yes`/`no`
    Bool(bool),
    /// Numeric literal.
    Num(f64),
    /// String literal.
    Str(String),
    /// `[a, b]`
    Arr(Vec<Expr>),
    /// `{ key: value }`
    Obj(Vec<(String, Expr)>),
    /// Variable reference, possibly namespaced (`Core:type`).
    Ident(String),
    /// `@(params) { body }`
    Fn {
        /// Parameter names.
        params: Arc<[String]>,
        /// Function body.
        body: Block,
    },
    /// `callee(args)`
    Call {
        /// Called expression.
        callee: Box<Expr>,
        /// Positional arguments.
        args: Vec<Expr>,
    },
    /// `target[index]`
    Index {
        /// Indexed value.
        target: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// `target.name`
    Prop {
        /// Receiver.
        target: Box<Expr>,
        /// Property name.
        name: String,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Prefix operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        expr: Box<Expr>,
    },
    /// `if c { } elif c { } else { }`
    If {
        /// Condition and body pairs, `if` first then each `elif`.
        arms: Vec<(Expr, Block)>,
        /// Trailing `else` body.
        otherwise: Option<Block>,
    },
}

impl Expr {
    /// Whether the expression is built only from literals, as metadata requires.
    pub fn is_static(&self) -> bool {
        match &self.kind {
            ExprKind::Null | ExprKind::Bool(_) | ExprKind::Num(_) | ExprKind::Str(_) => true,
            ExprKind::Arr(items) => items.iter().all(Expr::is_static),
            ExprKind::Obj(entries) => entries.iter().all(|(_, value)| value.is_static()),
            ExprKind::Unary {
                op: UnaryOp::Neg,
                expr,
            } => matches!(expr.kind, ExprKind::Num(_)),
            _ => false,
        }
    }
}

/// Binary operators, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `||`
    Or,
    /// `&&`
    And,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
}

impl BinaryOp {
    /// Binding power used by the precedence climber.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 3,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
        }
    }

    /// Source spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `!`
    Not,
    /// `-`
    Neg,
}
