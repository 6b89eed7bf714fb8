use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::ast::Pos;
use super::error::{EngineError, EngineResult};
use super::value::Value;

pub(crate) type ScopeRef = Arc<Scope>;

struct Variable {
    value: Value,
    mutable: bool,
}

/// Lexical scope. Lookups walk the parent chain.
pub(crate) struct Scope {
    vars: Mutex<HashMap<String, Variable>>,
    parent: Option<ScopeRef>,
}

impl Scope {
    #[cfg(test)]
    pub(crate) fn root() -> ScopeRef {
        Arc::new(Self {
            vars: Mutex::new(HashMap::new()),
            parent: None,
        })
    }

    /// Root scope holding immutable bindings; later entries win on duplicate names.
    pub(crate) fn with_consts(consts: impl IntoIterator<Item = (String, Value)>) -> ScopeRef {
        let vars = consts
            .into_iter()
            .map(|(name, value)| {
                let var = Variable {
                    value,
                    mutable: false,
                };
                (name, var)
            })
            .collect();
        Arc::new(Self {
            vars: Mutex::new(vars),
            parent: None,
        })
    }

    pub(crate) fn child(parent: &ScopeRef) -> ScopeRef {
        Arc::new(Self {
            vars: Mutex::new(HashMap::new()),
            parent: Some(Arc::clone(parent)),
        })
    }

    /// Drop every binding, releasing closures that captured this scope.
    pub(crate) fn clear(&self) {
        let vars = std::mem::take(&mut *self.vars.lock());
        drop(vars);
    }

    pub(crate) fn define(
        &self,
        name: &str,
        value: Value,
        mutable: bool,
        pos: Pos,
    ) -> EngineResult<()> {
        let mut vars = self.vars.lock();
        if vars.contains_key(name) {
            return Err(EngineError::runtime(
                format!("Variable '{name}' already exists in this scope"),
                pos,
            ));
        }
        vars.insert(name.to_string(), Variable { value, mutable });
        Ok(())
    }

    pub(crate) fn get(&self, name: &str, pos: Pos) -> EngineResult<Value> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(var) = current.vars.lock().get(name) {
                return Ok(var.value.clone());
            }
            scope = current.parent.as_deref();
        }
        Err(EngineError::runtime(format!("No such variable '{name}'"), pos))
    }

    pub(crate) fn assign(&self, name: &str, value: Value, pos: Pos) -> EngineResult<()> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(var) = current.vars.lock().get_mut(name) {
                if !var.mutable {
                    return Err(EngineError::runtime(
                        format!("Cannot assign to an immutable variable '{name}'"),
                        pos,
                    ));
                }
                var.value = value;
                return Ok(());
            }
            scope = current.parent.as_deref();
        }
        Err(EngineError::runtime(format!("No such variable '{name}'"), pos))
    }
}
