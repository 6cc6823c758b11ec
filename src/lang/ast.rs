//! Typed syntax tree consumed by the bytecode compiler.
//!
//! The scanner, parser and type checker live outside this crate; whatever
//! front end is in use must hand the compiler a [`Program`] in this shape.
//! Every node carries the source line it came from so runtime traces can
//! point back at the program text.

/// A whole script: the statements of the top level, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `var name = init;`
    VarDecl {
        name: String,
        init: Expr,
        line: u32,
    },
    /// `print expr;`
    Print {
        value: Expr,
        line: u32,
    },
    /// An expression evaluated for its effect (or, at the end of a
    /// script, for its value).
    Expr {
        expr: Expr,
        line: u32,
    },
    /// `{ ... }`
    Block {
        statements: Vec<Stmt>,
        line: u32,
    },
    /// `if` / `elif` / `else`. An `elif` chain arrives as nested `If`
    /// nodes in the else branch.
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        line: u32,
    },
    /// `while condition { ... }`
    While {
        condition: Expr,
        body: Box<Stmt>,
        line: u32,
    },
    /// `func name(params) { ... }`
    Func {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
        line: u32,
    },
    /// `return;` or `return expr;`
    Return {
        value: Option<Expr>,
        line: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int {
        value: i64,
        line: u32,
    },
    Bool {
        value: bool,
        line: u32,
    },
    Str {
        value: String,
        line: u32,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        line: u32,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        line: u32,
    },
    Variable {
        name: String,
        line: u32,
    },
    /// Assignment is an expression; its value is the assigned value.
    Assign {
        name: String,
        value: Box<Expr>,
        line: u32,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        line: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

impl Expr {
    pub fn line(&self) -> u32 {
        match self {
            Expr::Int { line, .. }
            | Expr::Bool { line, .. }
            | Expr::Str { line, .. }
            | Expr::Unary { line, .. }
            | Expr::Binary { line, .. }
            | Expr::Variable { line, .. }
            | Expr::Assign { line, .. }
            | Expr::Call { line, .. } => *line,
        }
    }

    pub fn int(value: i64, line: u32) -> Expr {
        Expr::Int { value, line }
    }

    pub fn boolean(value: bool, line: u32) -> Expr {
        Expr::Bool { value, line }
    }

    pub fn string(value: impl Into<String>, line: u32) -> Expr {
        Expr::Str {
            value: value.into(),
            line,
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr, line: u32) -> Expr {
        Expr::Unary {
            op,
            operand: Box::new(operand),
            line,
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr, line: u32) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            line,
        }
    }

    pub fn variable(name: impl Into<String>, line: u32) -> Expr {
        Expr::Variable {
            name: name.into(),
            line,
        }
    }

    pub fn assign(name: impl Into<String>, value: Expr, line: u32) -> Expr {
        Expr::Assign {
            name: name.into(),
            value: Box::new(value),
            line,
        }
    }

    pub fn call(callee: Expr, args: Vec<Expr>, line: u32) -> Expr {
        Expr::Call {
            callee: Box::new(callee),
            args,
            line,
        }
    }
}

impl Stmt {
    pub fn line(&self) -> u32 {
        match self {
            Stmt::VarDecl { line, .. }
            | Stmt::Print { line, .. }
            | Stmt::Expr { line, .. }
            | Stmt::Block { line, .. }
            | Stmt::If { line, .. }
            | Stmt::While { line, .. }
            | Stmt::Func { line, .. }
            | Stmt::Return { line, .. } => *line,
        }
    }

    pub fn var(name: impl Into<String>, init: Expr, line: u32) -> Stmt {
        Stmt::VarDecl {
            name: name.into(),
            init,
            line,
        }
    }

    pub fn print(value: Expr, line: u32) -> Stmt {
        Stmt::Print { value, line }
    }

    pub fn expr(expr: Expr, line: u32) -> Stmt {
        Stmt::Expr { expr, line }
    }

    pub fn block(statements: Vec<Stmt>, line: u32) -> Stmt {
        Stmt::Block { statements, line }
    }

    pub fn if_else(
        condition: Expr,
        then_branch: Stmt,
        else_branch: Option<Stmt>,
        line: u32,
    ) -> Stmt {
        Stmt::If {
            condition,
            then_branch: Box::new(then_branch),
            else_branch: else_branch.map(Box::new),
            line,
        }
    }

    pub fn while_loop(condition: Expr, body: Stmt, line: u32) -> Stmt {
        Stmt::While {
            condition,
            body: Box::new(body),
            line,
        }
    }

    pub fn func(
        name: impl Into<String>,
        params: Vec<&str>,
        body: Vec<Stmt>,
        line: u32,
    ) -> Stmt {
        Stmt::Func {
            name: name.into(),
            params: params.into_iter().map(str::to_string).collect(),
            body,
            line,
        }
    }

    pub fn ret(value: Option<Expr>, line: u32) -> Stmt {
        Stmt::Return { value, line }
    }
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Program { statements }
    }
}
