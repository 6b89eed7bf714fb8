use std::sync::Arc;

use super::Dialect;
use super::ast::{AssignOp, BinaryOp, Block, Expr, ExprKind, Node, NodeKind, Pos, UnaryOp};
use super::error::{EngineError, EngineResult};
use super::lexer::{Keyword, Lexer, Token, TokenKind};

/// Nesting limit that keeps recursive descent off the end of the stack.
/// Every operator and postfix link in a chain counts as one level.
const MAX_DEPTH: usize = 128;

/// Deepest tree the evaluator is handed, counted over statements and
/// expressions alike.
const MAX_TREE_DEPTH: usize = 256;

/// Parse program text written in `dialect` into top-level nodes.
pub(crate) fn parse_program(source: &str, dialect: Dialect) -> EngineResult<Vec<Node>> {
    let tokens = Lexer::new(source, dialect).tokenize()?;
    let mut parser = Parser {
        tokens,
        index: 0,
        dialect,
        depth: 0,
    };
    let nodes = parser.program()?;
    check_depth(&nodes)?;
    Ok(nodes)
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    dialect: Dialect,
    depth: usize,
}

impl Parser {
    fn program(&mut self) -> EngineResult<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            self.skip_semicolons();
            if self.at(&TokenKind::Eof) {
                return Ok(nodes);
            }
            let node = if self.at(&TokenKind::Meta) {
                self.meta()?
            } else {
                self.statement()?
            };
            nodes.push(node);
            self.expect_separator(&TokenKind::Eof)?;
        }
    }

    fn meta(&mut self) -> EngineResult<Node> {
        let pos = self.advance().pos;
        let name = match &self.peek().kind {
            TokenKind::Ident(name) => Some(name.clone()),
            _ => None,
        };
        if name.is_some() {
            self.advance();
        }
        let value = self.expression()?;
        if !value.is_static() {
            return Err(EngineError::syntax(
                "metadata values must be literals",
                value.pos,
            ));
        }
        Ok(Node {
            kind: NodeKind::Meta { name, value },
            pos,
        })
    }

    fn block(&mut self) -> EngineResult<Block> {
        self.expect(&TokenKind::LBrace)?;
        self.enter()?;
        let mut nodes = Vec::new();
        loop {
            self.skip_semicolons();
            if self.at(&TokenKind::RBrace) {
                self.advance();
                break;
            }
            if self.at(&TokenKind::Meta) {
                return Err(EngineError::syntax(
                    "metadata is only allowed at the top level",
                    self.peek().pos,
                ));
            }
            nodes.push(self.statement()?);
            self.expect_separator(&TokenKind::RBrace)?;
        }
        self.depth -= 1;
        Ok(Arc::from(nodes))
    }

    fn statement(&mut self) -> EngineResult<Node> {
        let token = self.peek().clone();
        let pos = token.pos;
        let kind = match token.kind {
            TokenKind::Out => {
                self.advance();
                NodeKind::Out(self.expression()?)
            }
            TokenKind::Keyword(Keyword::Let) | TokenKind::Keyword(Keyword::Var) => {
                self.advance();
                let mutable = token.kind == TokenKind::Keyword(Keyword::Var);
                let name = self.ident()?;
                self.expect(&TokenKind::Assign)?;
                NodeKind::Def {
                    name,
                    mutable,
                    expr: self.expression()?,
                }
            }
            TokenKind::Hash => {
                self.advance();
                let name = self.ident()?;
                self.expect(&TokenKind::Assign)?;
                NodeKind::Def {
                    name,
                    mutable: false,
                    expr: self.expression()?,
                }
            }
            TokenKind::Dollar => {
                self.advance();
                let name = self.ident()?;
                self.expect(&TokenKind::LeftArrow)?;
                NodeKind::Def {
                    name,
                    mutable: true,
                    expr: self.expression()?,
                }
            }
            TokenKind::At if matches!(self.peek_nth(1).kind, TokenKind::Ident(_)) => {
                self.advance();
                let name = self.ident()?;
                let expr = self.function_rest(pos)?;
                NodeKind::Def {
                    name,
                    mutable: false,
                    expr,
                }
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                if self.at_separator() {
                    NodeKind::Return(None)
                } else {
                    NodeKind::Return(Some(self.expression()?))
                }
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                NodeKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                NodeKind::Continue
            }
            TokenKind::Keyword(Keyword::Loop) => {
                self.advance();
                NodeKind::Loop(self.block()?)
            }
            TokenKind::Keyword(Keyword::Each) => {
                self.advance();
                let var = self.loop_binding()?;
                self.expect(&TokenKind::Comma)?;
                let items = self.expression()?;
                NodeKind::Each {
                    var,
                    items,
                    body: self.block()?,
                }
            }
            TokenKind::Keyword(Keyword::For) => {
                self.advance();
                let var = self.loop_binding()?;
                self.expect(&TokenKind::Comma)?;
                let times = self.expression()?;
                NodeKind::For {
                    var,
                    times,
                    body: self.block()?,
                }
            }
            _ => return self.expression_statement(),
        };
        Ok(Node { kind, pos })
    }

    fn expression_statement(&mut self) -> EngineResult<Node> {
        let expr = self.expression()?;
        let pos = expr.pos;
        let op = match (&self.peek().kind, self.dialect) {
            (TokenKind::Assign, Dialect::Modern) => Some(AssignOp::Set),
            (TokenKind::PlusAssign, Dialect::Modern) => Some(AssignOp::Add),
            (TokenKind::MinusAssign, Dialect::Modern) => Some(AssignOp::Sub),
            (TokenKind::LeftArrow, Dialect::Legacy) => Some(AssignOp::Set),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(Node {
                kind: NodeKind::Expr(expr),
                pos,
            });
        };
        if !matches!(
            expr.kind,
            ExprKind::Ident(_) | ExprKind::Index { .. } | ExprKind::Prop { .. }
        ) {
            return Err(EngineError::syntax("invalid assignment target", pos));
        }
        self.advance();
        let value = self.expression()?;
        Ok(Node {
            kind: NodeKind::Assign {
                target: expr,
                op,
                expr: value,
            },
            pos,
        })
    }

    /// `let x` in the modern dialect, `#x` in the legacy one.
    fn loop_binding(&mut self) -> EngineResult<String> {
        match self.dialect {
            Dialect::Modern => self.expect(&TokenKind::Keyword(Keyword::Let))?,
            Dialect::Legacy => self.expect(&TokenKind::Hash)?,
        };
        self.ident()
    }

    fn expression(&mut self) -> EngineResult<Expr> {
        self.enter()?;
        let expr = self.binary(0)?;
        self.depth -= 1;
        Ok(expr)
    }

    fn binary(&mut self, min_prec: u8) -> EngineResult<Expr> {
        let mut lhs = self.unary()?;
        let mut links = 0;
        loop {
            let token = self.peek();
            // An operator that starts a new line begins a new statement.
            if token.newline_before {
                break;
            }
            let Some(op) = binary_op(&token.kind) else {
                break;
            };
            if op.precedence() <= min_prec {
                break;
            }
            self.advance();
            self.enter()?;
            links += 1;
            let rhs = self.binary(op.precedence())?;
            let pos = lhs.pos;
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            };
        }
        self.depth -= links;
        Ok(lhs)
    }

    fn unary(&mut self) -> EngineResult<Expr> {
        let token = self.peek().clone();
        let op = match token.kind {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        self.advance();
        self.enter()?;
        let expr = self.unary()?;
        self.depth -= 1;
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                expr: Box::new(expr),
            },
            pos: token.pos,
        })
    }

    fn postfix(&mut self) -> EngineResult<Expr> {
        let mut expr = self.primary()?;
        let mut links = 0;
        loop {
            let token = self.peek().clone();
            let linked = match token.kind {
                TokenKind::LParen | TokenKind::LBracket => !token.newline_before,
                TokenKind::Dot => true,
                _ => false,
            };
            if !linked {
                self.depth -= links;
                return Ok(expr);
            }
            self.enter()?;
            links += 1;
            expr = match token.kind {
                TokenKind::LParen => {
                    self.advance();
                    let args = self.list(&TokenKind::RParen, Self::expression)?;
                    Expr {
                        pos: expr.pos,
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(&TokenKind::RBracket)?;
                    Expr {
                        pos: expr.pos,
                        kind: ExprKind::Index {
                            target: Box::new(expr),
                            index: Box::new(index),
                        },
                    }
                }
                _ => {
                    self.advance();
                    let name = self.ident()?;
                    Expr {
                        pos: expr.pos,
                        kind: ExprKind::Prop {
                            target: Box::new(expr),
                            name,
                        },
                    }
                }
            };
        }
    }

    fn primary(&mut self) -> EngineResult<Expr> {
        let token = self.advance().clone();
        let pos = token.pos;
        let kind = match token.kind {
            TokenKind::Num(value) => ExprKind::Num(value),
            TokenKind::Str(value) => ExprKind::Str(value),
            TokenKind::Keyword(Keyword::True) => ExprKind::Bool(true),
            TokenKind::Keyword(Keyword::False) => ExprKind::Bool(false),
            TokenKind::Keyword(Keyword::Null) => ExprKind::Null,
            TokenKind::Keyword(Keyword::If) => return self.if_rest(pos),
            TokenKind::Ident(name) => ExprKind::Ident(name),
            TokenKind::At => return self.function_rest(pos),
            TokenKind::LParen => {
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::LBracket => ExprKind::Arr(self.list(&TokenKind::RBracket, Self::expression)?),
            TokenKind::LBrace => ExprKind::Obj(self.list(&TokenKind::RBrace, Self::entry)?),
            other => return Err(unexpected(&other, pos)),
        };
        Ok(Expr { kind, pos })
    }

    fn entry(&mut self) -> EngineResult<(String, Expr)> {
        let token = self.advance().clone();
        let key = match token.kind {
            TokenKind::Ident(name) => name,
            TokenKind::Str(name) => name,
            other => return Err(unexpected(&other, token.pos)),
        };
        self.expect(&TokenKind::Colon)?;
        Ok((key, self.expression()?))
    }

    /// Comma separated items up to `close`; a trailing comma is accepted.
    fn list<T>(
        &mut self,
        close: &TokenKind,
        mut item: impl FnMut(&mut Self) -> EngineResult<T>,
    ) -> EngineResult<Vec<T>> {
        let mut items = Vec::new();
        loop {
            if self.at(close) {
                self.advance();
                return Ok(items);
            }
            items.push(item(self)?);
            if !self.eat(&TokenKind::Comma) {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    /// Parameter list and body after `@` or `@name`.
    fn function_rest(&mut self, pos: Pos) -> EngineResult<Expr> {
        self.expect(&TokenKind::LParen)?;
        let params = self.list(&TokenKind::RParen, Self::ident)?;
        let body = self.block()?;
        Ok(Expr {
            kind: ExprKind::Fn {
                params: Arc::from(params),
                body,
            },
            pos,
        })
    }

    fn if_rest(&mut self, pos: Pos) -> EngineResult<Expr> {
        let mut arms = Vec::new();
        let cond = self.expression()?;
        arms.push((cond, self.block()?));
        let mut otherwise = None;
        loop {
            if self.eat(&TokenKind::Keyword(Keyword::Elif)) {
                let cond = self.expression()?;
                arms.push((cond, self.block()?));
            } else if self.eat(&TokenKind::Keyword(Keyword::Else)) {
                otherwise = Some(self.block()?);
                break;
            } else {
                break;
            }
        }
        Ok(Expr {
            kind: ExprKind::If { arms, otherwise },
            pos,
        })
    }

    fn ident(&mut self) -> EngineResult<String> {
        let token = self.advance().clone();
        match token.kind {
            TokenKind::Ident(name) => Ok(name),
            other => Err(unexpected(&other, token.pos)),
        }
    }

    fn enter(&mut self) -> EngineResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EngineError::syntax("nesting too deep", self.peek().pos));
        }
        Ok(())
    }

    fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.index + offset).min(last)]
    }

    fn advance(&mut self) -> &Token {
        let index = self.index;
        if index < self.tokens.len() - 1 {
            self.index += 1;
        }
        &self.tokens[index]
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> EngineResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            let token = self.peek();
            Err(EngineError::syntax(
                format!(
                    "expected {} but found {}",
                    kind.describe(),
                    token.kind.describe()
                ),
                token.pos,
            ))
        }
    }

    fn skip_semicolons(&mut self) {
        while self.eat(&TokenKind::Semicolon) {}
    }

    fn at_separator(&self) -> bool {
        let token = self.peek();
        token.newline_before
            || matches!(
                token.kind,
                TokenKind::Eof | TokenKind::Semicolon | TokenKind::RBrace
            )
    }

    fn expect_separator(&mut self, close: &TokenKind) -> EngineResult<()> {
        let token = self.peek();
        if token.newline_before || &token.kind == close || token.kind == TokenKind::Semicolon {
            return Ok(());
        }
        Err(unexpected(&token.kind, token.pos))
    }
}

enum Item<'a> {
    Node(&'a Node),
    Expr(&'a Expr),
}

/// Reject trees deeper than [`MAX_TREE_DEPTH`]. Walks with an explicit stack
/// so the check itself cannot overflow.
fn check_depth(nodes: &[Node]) -> EngineResult<()> {
    let mut stack: Vec<(Item<'_>, usize)> =
        nodes.iter().map(|node| (Item::Node(node), 1)).collect();
    while let Some((item, depth)) = stack.pop() {
        let next = depth + 1;
        match item {
            Item::Node(node) => {
                if depth > MAX_TREE_DEPTH {
                    return Err(EngineError::syntax("nesting too deep", node.pos));
                }
                match &node.kind {
                    NodeKind::Meta { value: expr, .. }
                    | NodeKind::Def { expr, .. }
                    | NodeKind::Out(expr)
                    | NodeKind::Return(Some(expr))
                    | NodeKind::Expr(expr) => stack.push((Item::Expr(expr), next)),
                    NodeKind::Assign { target, expr, .. } => {
                        stack.push((Item::Expr(target), next));
                        stack.push((Item::Expr(expr), next));
                    }
                    NodeKind::Loop(body) => {
                        stack.extend(body.iter().map(|node| (Item::Node(node), next)));
                    }
                    NodeKind::Each { items: expr, body, .. }
                    | NodeKind::For {
                        times: expr, body, ..
                    } => {
                        stack.push((Item::Expr(expr), next));
                        stack.extend(body.iter().map(|node| (Item::Node(node), next)));
                    }
                    NodeKind::Return(None) | NodeKind::Break | NodeKind::Continue => {}
                }
            }
            Item::Expr(expr) => {
                if depth > MAX_TREE_DEPTH {
                    return Err(EngineError::syntax("nesting too deep", expr.pos));
                }
                match &expr.kind {
                    ExprKind::Null
                    | ExprKind::Bool(_)
                    | ExprKind::Num(_)
                    | ExprKind::Str(_)
                    | ExprKind::Ident(_) => {}
                    ExprKind::Arr(items) => {
                        stack.extend(items.iter().map(|item| (Item::Expr(item), next)));
                    }
                    ExprKind::Obj(entries) => {
                        stack.extend(entries.iter().map(|(_, item)| (Item::Expr(item), next)));
                    }
                    ExprKind::Fn { body, .. } => {
                        stack.extend(body.iter().map(|node| (Item::Node(node), next)));
                    }
                    ExprKind::Call { callee, args } => {
                        stack.push((Item::Expr(callee), next));
                        stack.extend(args.iter().map(|arg| (Item::Expr(arg), next)));
                    }
                    ExprKind::Index { target, index } => {
                        stack.push((Item::Expr(target), next));
                        stack.push((Item::Expr(index), next));
                    }
                    ExprKind::Prop { target, .. } => stack.push((Item::Expr(target), next)),
                    ExprKind::Binary { lhs, rhs, .. } => {
                        stack.push((Item::Expr(lhs), next));
                        stack.push((Item::Expr(rhs), next));
                    }
                    ExprKind::Unary { expr, .. } => stack.push((Item::Expr(expr), next)),
                    ExprKind::If { arms, otherwise } => {
                        for (cond, body) in arms {
                            stack.push((Item::Expr(cond), next));
                            stack.extend(body.iter().map(|node| (Item::Node(node), next)));
                        }
                        if let Some(body) = otherwise {
                            stack.extend(body.iter().map(|node| (Item::Node(node), next)));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
    let op = match kind {
        TokenKind::OrOr => BinaryOp::Or,
        TokenKind::AndAnd => BinaryOp::And,
        TokenKind::EqEq => BinaryOp::Eq,
        TokenKind::BangEq => BinaryOp::Ne,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Le => BinaryOp::Le,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Ge => BinaryOp::Ge,
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Rem,
        _ => return None,
    };
    Some(op)
}

fn unexpected(kind: &TokenKind, pos: Pos) -> EngineError {
    EngineError::syntax(format!("unexpected {}", kind.describe()), pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ErrorKind;

    fn parse(src: &str) -> EngineResult<Vec<Node>> {
        parse_program(src, Dialect::Modern)
    }

    #[test]
    fn parses_binary_expression_with_precedence() {
        let nodes = parse("1 + 2 * 3").expect("parse");
        let NodeKind::Expr(expr) = &nodes[0].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Binary { op, rhs, .. } = &expr.kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn truncated_expression_is_syntax_error() {
        let err = parse("1 + ").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.contains("end of input"), "{}", err.message);
    }

    #[test]
    fn statements_split_on_newlines_and_semicolons() {
        let nodes = parse("<: 1\n<: 2; <: 3").expect("parse");
        assert_eq!(nodes.len(), 3);
        assert!(parse("<: 1 <: 2").is_err());
    }

    #[test]
    fn call_does_not_continue_across_lines() {
        let nodes = parse("let f = @(x) { x }\n(1)").expect("parse");
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn parses_function_declaration_and_control_flow() {
        let src = r#"
            @add(a, b) { a + b }
            var total = 0
            each let x, [1, 2, 3] { total += x }
            for let i, 3 { if i == 1 { continue } elif i > 5 { break } else { total -= 1 } }
            loop { break }
            add(total, 1)
        "#;
        let nodes = parse(src).expect("parse");
        assert_eq!(nodes.len(), 6);
        assert!(matches!(
            nodes[0].kind,
            NodeKind::Def { mutable: false, .. }
        ));
        assert!(matches!(nodes[1].kind, NodeKind::Def { mutable: true, .. }));
    }

    #[test]
    fn legacy_dialect_uses_sigils() {
        let nodes = parse_program("#a = yes\n$b <- _\nb <- a", Dialect::Legacy).expect("parse");
        assert_eq!(nodes.len(), 3);
        assert!(matches!(nodes[2].kind, NodeKind::Assign { .. }));

        let err = parse_program("let a = 1", Dialect::Legacy).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        let err = parse("#a = 1").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn metadata_must_be_static_and_top_level() {
        let nodes = parse("### { name: \"demo\", tags: [1, -2] }\n<: 1").expect("parse");
        assert!(matches!(nodes[0].kind, NodeKind::Meta { name: None, .. }));

        assert!(parse("### { name: x }").is_err());
        assert!(parse("loop { ### {} }").is_err());
    }

    #[test]
    fn rejects_invalid_assignment_target() {
        let err = parse("1 = 2").unwrap_err();
        assert!(err.message.contains("assignment target"));
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let src = format!("{}1{}", "(".repeat(5000), ")".repeat(5000));
        let err = parse(&src).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn long_operator_and_postfix_chains_are_rejected() {
        let sum = format!("1{}", "+1".repeat(20_000));
        let err = parse(&sum).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.contains("too deep"), "{}", err.message);

        for chain in [
            format!("x{}", "[0]".repeat(20_000)),
            format!("f{}", "()".repeat(20_000)),
            format!("o{}", ".a".repeat(20_000)),
        ] {
            assert_eq!(parse(&chain).unwrap_err().kind, ErrorKind::Syntax);
        }
    }

    #[test]
    fn moderate_chains_still_parse() {
        assert!(parse(&format!("1{}", "+1".repeat(100))).is_ok());
        assert!(parse(&format!("x{}", "[0]".repeat(100))).is_ok());
    }

    #[test]
    fn tree_depth_is_checked_across_nested_chains() {
        let nested = |levels: usize| {
            let mut src = String::from("1");
            for _ in 0..levels {
                src = format!("({src}){}", "+1".repeat(30));
            }
            src
        };
        assert!(parse(&nested(5)).is_ok());
        let err = parse(&nested(10)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.contains("too deep"), "{}", err.message);

        let mut src = String::from("1");
        for _ in 0..40 {
            src = format!("@() {{ {src} }}");
        }
        assert!(parse(&src).is_ok());
    }
}
