//! Adapter for AiScript 0.16.0.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;

use super::sink::SinkSlot;
use super::{
    ErrorLabel, ExecOutcome, OutputSink, ParseResult, Parsed, Runner, RunnerError, SyntaxTree,
    classify_with, metadata_json, panic_message, parse_with,
};
use crate::engine::v0_16::{AiScriptError, ExecStatus, Interpreter, InterpreterOpts, Parser, VERSION};
use crate::engine::{Limits, Node};

const ERROR_TABLE: &[(ErrorLabel, fn(&AiScriptError) -> bool)] = &[
    (ErrorLabel::SyntaxError, |e| {
        matches!(e, AiScriptError::AiScriptSyntaxError(_))
    }),
    (ErrorLabel::TypeError, |e| {
        matches!(e, AiScriptError::AiScriptTypeError(_))
    }),
    (ErrorLabel::RuntimeError, |e| {
        matches!(e, AiScriptError::AiScriptRuntimeError(_))
    }),
    (ErrorLabel::IndexOutOfRangeError, |e| {
        matches!(e, AiScriptError::AiScriptIndexOutOfRangeError(_))
    }),
];

/// Runner bound to AiScript 0.16.0.
pub struct AiScript016Runner {
    parser: Parser,
    interpreter: Mutex<Option<Arc<Interpreter>>>,
    sink: SinkSlot,
}

impl AiScript016Runner {
    /// Create a runner writing to `sink` with default limits.
    pub fn new(sink: OutputSink) -> Self {
        Self::with_limits(sink, &Limits::default())
    }

    /// Create a runner writing to `sink`.
    pub fn with_limits(sink: OutputSink, limits: &Limits) -> Self {
        let sink = SinkSlot::new(sink);
        let opts = InterpreterOpts {
            out: sink.out_hook(),
            log: sink.log_hook(),
            max_step: limits.max_step,
            max_call_depth: limits.max_call_depth,
            yield_interval: limits.yield_interval,
        };
        let interpreter = Interpreter::new(IndexMap::new(), opts);
        tracing::debug!(version = VERSION, "runner created");
        Self {
            parser: Parser::new(),
            interpreter: Mutex::new(Some(Arc::new(interpreter))),
            sink,
        }
    }
}

#[async_trait]
impl Runner for AiScript016Runner {
    fn version(&self) -> &'static str {
        VERSION
    }

    fn parse(&self, code: &str) -> ParseResult {
        let parser = &self.parser;
        let nodes = parse_with(VERSION, || parser.parse(code))?;
        let metadata = metadata_json(Interpreter::collect_metadata(&nodes));
        Ok(Parsed {
            tree: SyntaxTree::new(VERSION, nodes),
            metadata,
        })
    }

    async fn exec(&self, tree: &SyntaxTree) -> anyhow::Result<ExecOutcome> {
        let script = tree.native::<Vec<Node>>(VERSION)?;
        let interpreter = self
            .interpreter
            .lock()
            .clone()
            .ok_or(RunnerError::Disposed { version: VERSION })?;

        tracing::debug!(version = VERSION, statements = script.len(), "exec started");
        let status = AssertUnwindSafe(interpreter.exec(script))
            .catch_unwind()
            .await
            .map_err(|payload| RunnerError::Panicked {
                version: VERSION,
                message: panic_message(&*payload),
            })??;

        let outcome = match status {
            ExecStatus::Finished => ExecOutcome::Completed,
            ExecStatus::Stopped => ExecOutcome::Aborted,
        };
        tracing::debug!(version = VERSION, ?outcome, steps = interpreter.steps(), "exec finished");
        Ok(outcome)
    }

    fn classify_error(&self, error: &anyhow::Error) -> Option<ErrorLabel> {
        classify_with(error, ERROR_TABLE)
    }

    fn dispose(&self) {
        if let Some(interpreter) = self.interpreter.lock().take() {
            interpreter.abort();
            tracing::debug!(version = VERSION, "runner disposed");
        }
        self.sink.release();
    }
}
