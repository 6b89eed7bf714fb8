//! Async tree-walking evaluator shared by every release.
//!
//! Evaluation is a chain of boxed futures so that `Core:sleep` and the periodic
//! scheduler yields can suspend anywhere in a program. An abort flips a flag
//! that every step checks and wakes a pending sleep; evaluation then unwinds
//! through an abort halt without emitting anything else.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::ast::{AssignOp, BinaryOp, Block, Expr, ExprKind, Node, NodeKind, Pos, UnaryOp};
use super::builtins::{Builtin, expect_num, type_mismatch};
use super::error::{EngineError, EngineResult};
use super::scope::{Scope, ScopeRef};
use super::value::{Closure, Function, Value};

/// Callback receiving each `<:` / `print` value.
pub type OutHook = Box<dyn Fn(Value) + Send + Sync>;
/// Callback receiving lifecycle events.
pub type LogHook = Box<dyn Fn(Event) + Send + Sync>;

/// Host callbacks installed at construction.
pub struct Hooks {
    /// Invoked once per emitted value, in program order.
    pub out: OutHook,
    /// Invoked on lifecycle events.
    pub log: LogHook,
}

/// Interpreter lifecycle event.
#[derive(Debug, Clone)]
pub enum Event {
    /// Execution of a program started.
    Start,
    /// The program ran to completion. `val` is the value of its final
    /// expression statement, if it ended with one.
    End {
        /// Final value.
        val: Option<Value>,
    },
}

/// Resource limits applied to each execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Statement budget per execution; `None` is unbounded.
    pub max_step: Option<u64>,
    /// Maximum nesting of user function calls.
    pub max_call_depth: usize,
    /// Yield to the async scheduler every this many steps (0 never yields).
    pub yield_interval: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_step: None,
            max_call_depth: 64,
            yield_interval: 256,
        }
    }
}

/// How an execution ended, when it did not fail.
#[derive(Debug, Clone)]
pub enum Completion {
    /// Ran to the end; carries the final value if any.
    Finished(Option<Value>),
    /// Stopped by [`Interpreter::abort`].
    Aborted,
}

/// Why evaluation stopped early.
pub(crate) enum Halt {
    Error(EngineError),
    Abort,
    /// Loop control or `return` leaving an `if` expression.
    Jump(Flow),
}

impl From<EngineError> for Halt {
    fn from(err: EngineError) -> Self {
        Halt::Error(err)
    }
}

pub(crate) type Eval<T> = Result<T, Halt>;

/// Result of running one statement.
pub(crate) enum Flow {
    /// Fell through; carries the value of an expression statement.
    Next(Option<Value>),
    Break,
    Continue,
    Return(Value),
}

/// One interpreter instance: a global scope, host hooks and an abort switch.
pub struct Interpreter {
    globals: ScopeRef,
    hooks: Hooks,
    limits: Limits,
    aborted: AtomicBool,
    abort_signal: Notify,
    steps: AtomicU64,
}

impl Interpreter {
    /// Build an interpreter whose global scope holds the builtins plus `consts`.
    pub fn new(consts: IndexMap<String, Value>, hooks: Hooks, limits: Limits) -> Self {
        let builtins = Builtin::ALL
            .iter()
            .map(|builtin| (builtin.name().to_string(), Value::builtin(*builtin)));
        // Host constants shadow builtins of the same name.
        let globals = Scope::with_consts(builtins.chain(consts));
        Self {
            globals,
            hooks,
            limits,
            aborted: AtomicBool::new(false),
            abort_signal: Notify::new(),
            steps: AtomicU64::new(0),
        }
    }

    /// Run `nodes` in a fresh program scope below the globals.
    pub async fn exec(&self, nodes: &[Node]) -> EngineResult<Completion> {
        if self.is_aborted() {
            return Ok(Completion::Aborted);
        }
        self.steps.store(0, Ordering::Relaxed);
        (self.hooks.log)(Event::Start);

        let scope = Scope::child(&self.globals);
        let completion = self.run_program(nodes, &scope).await;
        // Named functions live in the scope their closures capture.
        scope.clear();
        completion
    }

    async fn run_program(&self, nodes: &[Node], scope: &ScopeRef) -> EngineResult<Completion> {
        let mut last = None;
        for node in nodes {
            match self.run_node(node, scope, 0).await {
                Ok(Flow::Next(value)) => last = value,
                Ok(Flow::Return(value)) => {
                    last = Some(value);
                    break;
                }
                Ok(Flow::Break) | Ok(Flow::Continue) | Err(Halt::Jump(_)) => {
                    return Err(EngineError::runtime(
                        "break or continue outside of a loop",
                        node.pos,
                    ));
                }
                Err(Halt::Abort) => return Ok(Completion::Aborted),
                Err(Halt::Error(err)) => return Err(err),
            }
        }

        if self.is_aborted() {
            return Ok(Completion::Aborted);
        }
        (self.hooks.log)(Event::End { val: last.clone() });
        Ok(Completion::Finished(last))
    }

    /// Stop the running execution, if any, and refuse future ones.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.abort_signal.notify_one();
    }

    /// Whether [`Interpreter::abort`] has been called.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Statements executed by the current or last execution.
    pub(crate) fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    /// Evaluate every top-level `###` block. `None` when there are none.
    pub fn collect_metadata(nodes: &[Node]) -> Option<IndexMap<Option<String>, Value>> {
        let entries: IndexMap<_, _> = nodes
            .iter()
            .filter_map(|node| match &node.kind {
                NodeKind::Meta { name, value } => Some((name.clone(), static_value(value))),
                _ => None,
            })
            .collect();
        if entries.is_empty() { None } else { Some(entries) }
    }

    pub(crate) fn emit(&self, value: Value) {
        if !self.is_aborted() {
            (self.hooks.out)(value);
        }
    }

    pub(crate) async fn sleep(&self, duration: Duration) -> Eval<()> {
        if self.is_aborted() {
            return Err(Halt::Abort);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.abort_signal.notified() => Err(Halt::Abort),
        }
    }

    async fn step(&self, pos: Pos) -> Eval<()> {
        if self.is_aborted() {
            return Err(Halt::Abort);
        }
        let steps = self.steps.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(max) = self.limits.max_step {
            if steps > max {
                return Err(EngineError::runtime("max step exceeded", pos).into());
            }
        }
        if self.limits.yield_interval > 0 && steps % self.limits.yield_interval == 0 {
            tokio::task::yield_now().await;
            if self.is_aborted() {
                return Err(Halt::Abort);
            }
        }
        Ok(())
    }

    fn run_node<'a>(
        &'a self,
        node: &'a Node,
        scope: &'a ScopeRef,
        depth: usize,
    ) -> BoxFuture<'a, Eval<Flow>> {
        async move {
            match self.exec_node(node, scope, depth).await {
                Err(Halt::Jump(flow)) => Ok(flow),
                other => other,
            }
        }
        .boxed()
    }

    async fn exec_node(&self, node: &Node, scope: &ScopeRef, depth: usize) -> Eval<Flow> {
        self.step(node.pos).await?;
        match &node.kind {
            NodeKind::Meta { .. } => Ok(Flow::Next(None)),
            NodeKind::Def {
                name,
                mutable,
                expr,
            } => {
                let value = self.eval(expr, scope, depth).await?;
                scope.define(name, value, *mutable, node.pos)?;
                Ok(Flow::Next(None))
            }
            NodeKind::Assign { target, op, expr } => {
                let value = self.eval(expr, scope, depth).await?;
                self.assign(target, *op, value, scope, depth).await?;
                Ok(Flow::Next(None))
            }
            NodeKind::Out(expr) => {
                let value = self.eval(expr, scope, depth).await?;
                self.emit(value);
                Ok(Flow::Next(None))
            }
            NodeKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, scope, depth).await?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            NodeKind::Break => Ok(Flow::Break),
            NodeKind::Continue => Ok(Flow::Continue),
            NodeKind::Loop(body) => {
                loop {
                    match self.run_block(body, &Scope::child(scope), depth).await? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Next(_) | Flow::Continue => {}
                    }
                    self.step(node.pos).await?;
                }
                Ok(Flow::Next(None))
            }
            NodeKind::Each { var, items, body } => {
                let target = self.eval(items, scope, depth).await?;
                let Value::Arr(list) = &target else {
                    return Err(type_mismatch("arr", &target, items.pos).into());
                };
                let snapshot = list.lock().clone();
                for item in snapshot {
                    self.step(node.pos).await?;
                    let inner = Scope::child(scope);
                    inner.define(var, item, false, node.pos)?;
                    match self.run_block(body, &inner, depth).await? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Next(_) | Flow::Continue => {}
                    }
                }
                Ok(Flow::Next(None))
            }
            NodeKind::For { var, times, body } => {
                let count = self.eval(times, scope, depth).await?;
                let count = expect_num(&count, times.pos)?.floor().max(0.0) as u64;
                for i in 0..count {
                    self.step(node.pos).await?;
                    let inner = Scope::child(scope);
                    inner.define(var, Value::Num(i as f64), false, node.pos)?;
                    match self.run_block(body, &inner, depth).await? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Next(_) | Flow::Continue => {}
                    }
                }
                Ok(Flow::Next(None))
            }
            NodeKind::Expr(expr) => {
                let value = self.eval(expr, scope, depth).await?;
                Ok(Flow::Next(Some(value)))
            }
        }
    }

    /// Run a block in `scope`. Falls through with the block's value: the value
    /// of its last statement when that is an expression, `null` otherwise.
    fn run_block<'a>(
        &'a self,
        body: &'a Block,
        scope: &'a ScopeRef,
        depth: usize,
    ) -> BoxFuture<'a, Eval<Flow>> {
        async move {
            let mut last = None;
            for node in body.iter() {
                match self.run_node(node, scope, depth).await? {
                    Flow::Next(value) => last = value,
                    other => return Ok(other),
                }
            }
            Ok(Flow::Next(Some(last.unwrap_or(Value::Null))))
        }
        .boxed()
    }

    fn eval<'a>(
        &'a self,
        expr: &'a Expr,
        scope: &'a ScopeRef,
        depth: usize,
    ) -> BoxFuture<'a, Eval<Value>> {
        async move {
            let pos = expr.pos;
            match &expr.kind {
                ExprKind::Null => Ok(Value::Null),
                ExprKind::Bool(flag) => Ok(Value::Bool(*flag)),
                ExprKind::Num(num) => Ok(Value::Num(*num)),
                ExprKind::Str(text) => Ok(Value::Str(text.clone())),
                ExprKind::Arr(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item, scope, depth).await?);
                    }
                    Ok(Value::arr(values))
                }
                ExprKind::Obj(entries) => {
                    let mut values = IndexMap::with_capacity(entries.len());
                    for (key, item) in entries {
                        values.insert(key.clone(), self.eval(item, scope, depth).await?);
                    }
                    Ok(Value::obj(values))
                }
                ExprKind::Ident(name) => Ok(scope.get(name, pos)?),
                ExprKind::Fn { params, body } => Ok(Value::Fn(Arc::new(Function::User(
                    Closure {
                        params: Arc::clone(params),
                        body: Arc::clone(body),
                        scope: Arc::clone(scope),
                    },
                )))),
                ExprKind::Call { callee, args } => {
                    let callee = self.eval(callee, scope, depth).await?;
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(arg, scope, depth).await?);
                    }
                    self.call(&callee, values, pos, depth).await
                }
                ExprKind::Index { target, index } => {
                    let target = self.eval(target, scope, depth).await?;
                    let index = self.eval(index, scope, depth).await?;
                    Ok(read_index(&target, &index, pos)?)
                }
                ExprKind::Prop { target, name } => {
                    let target = self.eval(target, scope, depth).await?;
                    Ok(read_prop(&target, name, pos)?)
                }
                ExprKind::Binary { op, lhs, rhs } => match op {
                    BinaryOp::And | BinaryOp::Or => {
                        let left = expect_bool(&self.eval(lhs, scope, depth).await?, lhs.pos)?;
                        if (*op == BinaryOp::And) != left {
                            return Ok(Value::Bool(left));
                        }
                        let right = expect_bool(&self.eval(rhs, scope, depth).await?, rhs.pos)?;
                        Ok(Value::Bool(right))
                    }
                    _ => {
                        let left = self.eval(lhs, scope, depth).await?;
                        let right = self.eval(rhs, scope, depth).await?;
                        Ok(binary(*op, &left, &right, pos)?)
                    }
                },
                ExprKind::Unary { op, expr } => {
                    let value = self.eval(expr, scope, depth).await?;
                    match op {
                        UnaryOp::Not => Ok(Value::Bool(!expect_bool(&value, expr.pos)?)),
                        UnaryOp::Neg => Ok(Value::Num(-expect_num(&value, expr.pos)?)),
                    }
                }
                ExprKind::If { arms, otherwise } => {
                    for (cond, body) in arms {
                        let value = self.eval(cond, scope, depth).await?;
                        if expect_bool(&value, cond.pos)? {
                            return self.branch(body, scope, depth).await;
                        }
                    }
                    match otherwise {
                        Some(body) => self.branch(body, scope, depth).await,
                        None => Ok(Value::Null),
                    }
                }
            }
        }
        .boxed()
    }

    /// Evaluate the taken arm of an `if`. Loop control and `return` inside it
    /// travel up as [`Halt::Jump`] to the enclosing statement.
    async fn branch(&self, body: &Block, scope: &ScopeRef, depth: usize) -> Eval<Value> {
        match self.run_block(body, &Scope::child(scope), depth).await? {
            Flow::Next(value) => Ok(value.unwrap_or(Value::Null)),
            jump => Err(Halt::Jump(jump)),
        }
    }

    /// Call a function value with already evaluated arguments.
    pub(crate) fn call<'a>(
        &'a self,
        callee: &'a Value,
        args: Vec<Value>,
        pos: Pos,
        depth: usize,
    ) -> BoxFuture<'a, Eval<Value>> {
        async move {
            let Value::Fn(function) = callee else {
                return Err(type_mismatch("fn", callee, pos).into());
            };
            match function.as_ref() {
                Function::Builtin(builtin) => self.call_builtin(*builtin, args, pos).await,
                Function::User(closure) => {
                    if depth >= self.limits.max_call_depth {
                        return Err(EngineError::runtime("max call depth exceeded", pos).into());
                    }
                    let inner = Scope::child(&closure.scope);
                    let mut args = args.into_iter();
                    for param in closure.params.iter() {
                        inner.define(param, args.next().unwrap_or(Value::Null), false, pos)?;
                    }
                    match self.run_block(&closure.body, &inner, depth + 1).await? {
                        Flow::Next(value) => Ok(value.unwrap_or(Value::Null)),
                        Flow::Return(value) => Ok(value),
                        Flow::Break | Flow::Continue => Err(EngineError::runtime(
                            "break or continue outside of a loop",
                            pos,
                        )
                        .into()),
                    }
                }
            }
        }
        .boxed()
    }

    async fn assign(
        &self,
        target: &Expr,
        op: AssignOp,
        value: Value,
        scope: &ScopeRef,
        depth: usize,
    ) -> Eval<()> {
        let pos = target.pos;
        let value = match op {
            AssignOp::Set => value,
            AssignOp::Add | AssignOp::Sub => {
                let current = self.eval(target, scope, depth).await?;
                let op = if op == AssignOp::Add {
                    BinaryOp::Add
                } else {
                    BinaryOp::Sub
                };
                binary(op, &current, &value, pos)?
            }
        };
        match &target.kind {
            ExprKind::Ident(name) => Ok(scope.assign(name, value, pos)?),
            ExprKind::Index { target, index } => {
                let container = self.eval(target, scope, depth).await?;
                let index = self.eval(index, scope, depth).await?;
                Ok(write_index(&container, &index, value, pos)?)
            }
            ExprKind::Prop { target, name } => {
                let container = self.eval(target, scope, depth).await?;
                let Value::Obj(entries) = &container else {
                    return Err(type_mismatch("obj", &container, pos).into());
                };
                entries.lock().insert(name.clone(), value);
                Ok(())
            }
            _ => Err(EngineError::syntax("invalid assignment target", pos).into()),
        }
    }
}

fn expect_bool(value: &Value, pos: Pos) -> EngineResult<bool> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        other => Err(type_mismatch("bool", other, pos)),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value, pos: Pos) -> EngineResult<Value> {
    let num = |value: &Value| num_operand(value, pos);
    let value = match op {
        BinaryOp::Eq => Value::Bool(left.loose_eq(right)),
        BinaryOp::Ne => Value::Bool(!left.loose_eq(right)),
        BinaryOp::And => Value::Bool(expect_bool(left, pos)? && expect_bool(right, pos)?),
        BinaryOp::Or => Value::Bool(expect_bool(left, pos)? || expect_bool(right, pos)?),
        BinaryOp::Add => match (left, right) {
            (Value::Str(a), Value::Str(b)) => Value::Str(format!("{a}{b}")),
            _ => Value::Num(num(left)? + num(right)?),
        },
        BinaryOp::Sub => Value::Num(num(left)? - num(right)?),
        BinaryOp::Mul => Value::Num(num(left)? * num(right)?),
        BinaryOp::Div => Value::Num(num(left)? / num(right)?),
        BinaryOp::Rem => Value::Num(num(left)? % num(right)?),
        BinaryOp::Lt => Value::Bool(num(left)? < num(right)?),
        BinaryOp::Le => Value::Bool(num(left)? <= num(right)?),
        BinaryOp::Gt => Value::Bool(num(left)? > num(right)?),
        BinaryOp::Ge => Value::Bool(num(left)? >= num(right)?),
    };
    Ok(value)
}

fn num_operand(value: &Value, pos: Pos) -> EngineResult<f64> {
    match value {
        Value::Num(num) => Ok(*num),
        other => Err(type_mismatch("num", other, pos)),
    }
}

fn array_slot(len: usize, index: &Value, pos: Pos) -> EngineResult<usize> {
    let raw = num_operand(index, pos)?;
    if raw.fract() != 0.0 || raw < 0.0 || raw >= len as f64 {
        return Err(EngineError::out_of_range(
            format!(
                "Index out of range. index: {} max: {}",
                super::value::format_num(raw),
                len as i64 - 1
            ),
            pos,
        ));
    }
    Ok(raw as usize)
}

fn read_index(target: &Value, index: &Value, pos: Pos) -> EngineResult<Value> {
    match target {
        Value::Arr(items) => {
            let items = items.lock();
            let slot = array_slot(items.len(), index, pos)?;
            Ok(items[slot].clone())
        }
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            let slot = array_slot(chars.len(), index, pos)?;
            Ok(Value::Str(chars[slot].to_string()))
        }
        Value::Obj(entries) => match index {
            Value::Str(key) => Ok(entries.lock().get(key).cloned().unwrap_or(Value::Null)),
            other => Err(type_mismatch("str", other, pos)),
        },
        other => Err(type_mismatch("arr", other, pos)),
    }
}

fn write_index(target: &Value, index: &Value, value: Value, pos: Pos) -> EngineResult<()> {
    match target {
        Value::Arr(items) => {
            let mut items = items.lock();
            let slot = array_slot(items.len(), index, pos)?;
            items[slot] = value;
            Ok(())
        }
        Value::Obj(entries) => match index {
            Value::Str(key) => {
                entries.lock().insert(key.clone(), value);
                Ok(())
            }
            other => Err(type_mismatch("str", other, pos)),
        },
        other => Err(type_mismatch("arr", other, pos)),
    }
}

fn read_prop(target: &Value, name: &str, pos: Pos) -> EngineResult<Value> {
    match (target, name) {
        (Value::Arr(items), "len") => Ok(Value::Num(items.lock().len() as f64)),
        (Value::Str(text), "len") => Ok(Value::Num(text.chars().count() as f64)),
        (Value::Obj(entries), _) => Ok(entries.lock().get(name).cloned().unwrap_or(Value::Null)),
        (other, _) => Err(EngineError::type_error(
            format!("No property '{name}' on {}", other.type_name()),
            pos,
        )),
    }
}

/// Value of a `###` block, which the parser guarantees is literal-only.
fn static_value(expr: &Expr) -> Value {
    match &expr.kind {
        ExprKind::Bool(flag) => Value::Bool(*flag),
        ExprKind::Num(num) => Value::Num(*num),
        ExprKind::Str(text) => Value::Str(text.clone()),
        ExprKind::Arr(items) => Value::arr(items.iter().map(static_value).collect()),
        ExprKind::Obj(entries) => Value::obj(
            entries
                .iter()
                .map(|(key, item)| (key.clone(), static_value(item)))
                .collect(),
        ),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            expr,
        } => match static_value(expr) {
            Value::Num(num) => Value::Num(-num),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}
