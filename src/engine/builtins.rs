//! Functions every release installs into the global scope.

use std::time::Duration;

use super::ast::Pos;
use super::error::{EngineError, ErrorKind};
use super::interpreter::{Eval, Halt, Interpreter};
use super::value::Value;

/// Longest array `Core:range` builds.
const MAX_RANGE_LEN: u64 = 1 << 20;

/// Engine-provided function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `print(v)`: same as `<: v`.
    Print,
    /// `Core:type(v)`
    CoreType,
    /// `Core:to_str(v)`
    CoreToStr,
    /// `Core:sleep(ms)`: suspends; cut short by an abort.
    CoreSleep,
    /// `Core:abort(message)`: raises a user error.
    CoreAbort,
    /// `Core:range(a, b)`: inclusive numeric range.
    CoreRange,
    /// `Math:floor(n)`
    MathFloor,
    /// `Math:abs(n)`
    MathAbs,
    /// `Arr:push(arr, v)`: appends in place and returns the array.
    ArrPush,
}

impl Builtin {
    /// Every builtin, in installation order.
    pub const ALL: &'static [Builtin] = &[
        Builtin::Print,
        Builtin::CoreType,
        Builtin::CoreToStr,
        Builtin::CoreSleep,
        Builtin::CoreAbort,
        Builtin::CoreRange,
        Builtin::MathFloor,
        Builtin::MathAbs,
        Builtin::ArrPush,
    ];

    /// Name the builtin is bound to.
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::CoreType => "Core:type",
            Builtin::CoreToStr => "Core:to_str",
            Builtin::CoreSleep => "Core:sleep",
            Builtin::CoreAbort => "Core:abort",
            Builtin::CoreRange => "Core:range",
            Builtin::MathFloor => "Math:floor",
            Builtin::MathAbs => "Math:abs",
            Builtin::ArrPush => "Arr:push",
        }
    }
}

impl Interpreter {
    pub(super) async fn call_builtin(
        &self,
        builtin: Builtin,
        args: Vec<Value>,
        pos: Pos,
    ) -> Eval<Value> {
        let arg = |index: usize| args.get(index).cloned().unwrap_or(Value::Null);
        match builtin {
            Builtin::Print => {
                self.emit(arg(0));
                Ok(Value::Null)
            }
            Builtin::CoreType => Ok(Value::str(arg(0).type_name())),
            Builtin::CoreToStr => Ok(Value::Str(arg(0).to_text())),
            Builtin::CoreSleep => {
                let ms = expect_num(&arg(0), pos)?;
                self.sleep(Duration::from_millis(ms.max(0.0) as u64)).await?;
                Ok(Value::Null)
            }
            Builtin::CoreAbort => {
                let message = arg(0).to_text();
                Err(EngineError::new(ErrorKind::User, message, Some(pos)).into())
            }
            Builtin::CoreRange => {
                let start = expect_num(&arg(0), pos)?.floor() as i64;
                let end = expect_num(&arg(1), pos)?.floor() as i64;
                if start.abs_diff(end) >= MAX_RANGE_LEN {
                    return Err(EngineError::runtime(
                        format!("range too long (at most {MAX_RANGE_LEN} items)"),
                        pos,
                    )
                    .into());
                }
                let items = if start <= end {
                    (start..=end).map(|n| Value::Num(n as f64)).collect()
                } else {
                    (end..=start).rev().map(|n| Value::Num(n as f64)).collect()
                };
                Ok(Value::arr(items))
            }
            Builtin::MathFloor => Ok(Value::Num(expect_num(&arg(0), pos)?.floor())),
            Builtin::MathAbs => Ok(Value::Num(expect_num(&arg(0), pos)?.abs())),
            Builtin::ArrPush => {
                let target = arg(0);
                let Value::Arr(items) = &target else {
                    return Err(type_mismatch("arr", &target, pos).into());
                };
                items.lock().push(arg(1));
                Ok(target)
            }
        }
    }
}

pub(super) fn expect_num(value: &Value, pos: Pos) -> Result<f64, Halt> {
    match value {
        Value::Num(num) => Ok(*num),
        other => Err(type_mismatch("num", other, pos).into()),
    }
}

pub(super) fn type_mismatch(expected: &str, found: &Value, pos: Pos) -> EngineError {
    EngineError::type_error(
        format!("Expect {expected}, but got {}", found.type_name()),
        pos,
    )
}
