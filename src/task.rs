//! Typed task wrappers and the symbol registry
//!
//! A [`TaskSpec`] wraps a registered callable together with its declared
//! input and output types. Callables are registered under a symbolic name in
//! a [`TaskRegistry`]; persisted graphs reference tasks by symbol and are
//! re-bound against a registry at load time.

use crate::error::{LoomError, Result};
use crate::ids::TaskId;
use crate::types::TypeTag;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Keyword arguments applied to a task invocation.
pub type Kwargs = serde_json::Map<String, Value>;

/// A plain user callable: positional inputs plus keyword arguments.
pub type PlainFn = Arc<dyn Fn(&[Value], &Kwargs) -> anyhow::Result<Value> + Send + Sync>;

/// A callable that additionally receives the shared runtime context.
pub type ContextFn =
    Arc<dyn Fn(&TaskContext, &[Value], &Kwargs) -> anyhow::Result<Value> + Send + Sync>;

/// Shared runtime resources handed to context-aware tasks.
///
/// Resources (database sessions, connection pools, ...) are registered by
/// name and fetched by type. The context is injected into the run loop; there
/// is no process-wide session object.
#[derive(Default, Clone)]
pub struct TaskContext {
    resources: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared resource under a name.
    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, resource: T) {
        self.resources.insert(name.into(), Arc::new(resource));
    }

    /// Fetch a resource by name, downcast to its concrete type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.resources
            .get(name)
            .cloned()
            .and_then(|r| r.downcast::<T>().ok())
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Declared signature of a registered callable.
///
/// The output type is optional at registration; constructing a [`TaskSpec`]
/// from a symbol without one fails with [`LoomError::MissingTypeHint`].
#[derive(Debug, Clone)]
pub struct Signature {
    pub inputs: Vec<TypeTag>,
    pub output: Option<TypeTag>,
}

enum Callable {
    Plain(PlainFn),
    ContextAware(ContextFn),
}

/// A callable registered under a symbolic name.
pub struct RegisteredTask {
    callable: Callable,
    signature: Signature,
}

/// Symbol table mapping names to callables and their declared signatures.
///
/// The registry is an explicit value passed where needed (pipeline loading,
/// the scan-and-launch trigger); there is no global registry.
#[derive(Default)]
pub struct TaskRegistry {
    entries: HashMap<String, RegisteredTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plain callable with its declared parameter and return types.
    pub fn register<F>(
        &mut self,
        symbol: impl Into<String>,
        inputs: Vec<TypeTag>,
        output: Option<TypeTag>,
        func: F,
    ) where
        F: Fn(&[Value], &Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.entries.insert(
            symbol.into(),
            RegisteredTask {
                callable: Callable::Plain(Arc::new(func)),
                signature: Signature { inputs, output },
            },
        );
    }

    /// Register a context-aware callable.
    pub fn register_with_context<F>(
        &mut self,
        symbol: impl Into<String>,
        inputs: Vec<TypeTag>,
        output: Option<TypeTag>,
        func: F,
    ) where
        F: Fn(&TaskContext, &[Value], &Kwargs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.entries.insert(
            symbol.into(),
            RegisteredTask {
                callable: Callable::ContextAware(Arc::new(func)),
                signature: Signature { inputs, output },
            },
        );
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.entries.contains_key(symbol)
    }

    fn entry(&self, symbol: &str) -> Result<&RegisteredTask> {
        self.entries.get(symbol).ok_or_else(|| LoomError::UnknownSymbol {
            symbol: symbol.to_string(),
        })
    }

    fn plain_handle(&self, symbol: &str) -> Result<PlainFn> {
        match &self.entry(symbol)?.callable {
            Callable::Plain(f) => Ok(f.clone()),
            Callable::ContextAware(_) => Err(LoomError::Other(format!(
                "task '{}' is context-aware and cannot be used as a conditional branch",
                symbol
            ))),
        }
    }
}

/// Resolved callables of a conditional task.
#[derive(Clone)]
pub struct ConditionalFns {
    pub predicate: PlainFn,
    pub when_true: PlainFn,
    pub when_false: PlainFn,
}

/// The kind of callable a [`TaskSpec`] wraps.
///
/// Function handles are not serialized; a deserialized spec must be re-bound
/// against a [`TaskRegistry`] before it can run.
#[derive(Clone, Serialize, Deserialize)]
pub enum TaskKind {
    Plain {
        symbol: String,
        #[serde(skip)]
        func: Option<PlainFn>,
    },
    ContextAware {
        symbol: String,
        #[serde(skip)]
        func: Option<ContextFn>,
    },
    /// A predicate that dispatches to one of two branch callables. The two
    /// branch return types are both candidate output types.
    Conditional {
        predicate: String,
        when_true: String,
        when_false: String,
        #[serde(skip)]
        funcs: Option<ConditionalFns>,
    },
}

impl fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Plain { symbol, .. } => f.debug_struct("Plain").field("symbol", symbol).finish(),
            TaskKind::ContextAware { symbol, .. } => {
                f.debug_struct("ContextAware").field("symbol", symbol).finish()
            }
            TaskKind::Conditional {
                predicate,
                when_true,
                when_false,
                ..
            } => f
                .debug_struct("Conditional")
                .field("predicate", predicate)
                .field("when_true", when_true)
                .field("when_false", when_false)
                .finish(),
        }
    }
}

/// A typed wrapper around a registered callable.
///
/// Specs are immutable after construction and may be shared by several
/// activities; two activities holding clones of the same spec land on the
/// same DAG node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub tid: TaskId,
    kind: TaskKind,
    input_types: Vec<TypeTag>,
    output_types: Vec<TypeTag>,
    #[serde(default)]
    bound_kwargs: Kwargs,
    #[serde(default)]
    pub desc: Option<String>,
}

impl TaskSpec {
    /// Wrap the callable registered under `symbol`.
    ///
    /// # Errors
    ///
    /// * [`LoomError::UnknownSymbol`] - if the symbol is not registered
    /// * [`LoomError::MissingTypeHint`] - if no return type was declared
    pub fn new(registry: &TaskRegistry, symbol: &str) -> Result<Self> {
        let entry = registry.entry(symbol)?;
        let output = entry
            .signature
            .output
            .clone()
            .ok_or_else(|| LoomError::MissingTypeHint {
                symbol: symbol.to_string(),
            })?;
        let kind = match &entry.callable {
            Callable::Plain(f) => TaskKind::Plain {
                symbol: symbol.to_string(),
                func: Some(f.clone()),
            },
            Callable::ContextAware(f) => TaskKind::ContextAware {
                symbol: symbol.to_string(),
                func: Some(f.clone()),
            },
        };
        Ok(Self {
            tid: TaskId::new(),
            kind,
            input_types: entry.signature.inputs.clone(),
            output_types: vec![output],
            bound_kwargs: Kwargs::new(),
            desc: None,
        })
    }

    /// Wrap a predicate plus two branch callables.
    ///
    /// Input types come from the predicate's signature; both branch return
    /// types become candidate output types and both must be declared.
    pub fn conditional(
        registry: &TaskRegistry,
        predicate: &str,
        when_true: &str,
        when_false: &str,
    ) -> Result<Self> {
        let pred_entry = registry.entry(predicate)?;
        let mut outputs = Vec::with_capacity(2);
        for branch in [when_true, when_false] {
            let out = registry
                .entry(branch)?
                .signature
                .output
                .clone()
                .ok_or_else(|| LoomError::MissingTypeHint {
                    symbol: branch.to_string(),
                })?;
            outputs.push(out);
        }
        let funcs = ConditionalFns {
            predicate: registry.plain_handle(predicate)?,
            when_true: registry.plain_handle(when_true)?,
            when_false: registry.plain_handle(when_false)?,
        };
        Ok(Self {
            tid: TaskId::new(),
            kind: TaskKind::Conditional {
                predicate: predicate.to_string(),
                when_true: when_true.to_string(),
                when_false: when_false.to_string(),
                funcs: Some(funcs),
            },
            input_types: pred_entry.signature.inputs.clone(),
            output_types: outputs,
            bound_kwargs: Kwargs::new(),
            desc: None,
        })
    }

    /// Pre-bind keyword arguments.
    ///
    /// Bound parameters stay in the declared input type list; the
    /// compatibility checker sees the callable's original signature.
    pub fn bind(mut self, kwargs: Kwargs) -> Self {
        for (k, v) in kwargs {
            self.bound_kwargs.insert(k, v);
        }
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// The primary symbol this spec was built from.
    pub fn symbol(&self) -> &str {
        match &self.kind {
            TaskKind::Plain { symbol, .. } | TaskKind::ContextAware { symbol, .. } => symbol,
            TaskKind::Conditional { predicate, .. } => predicate,
        }
    }

    pub fn input_types(&self) -> &[TypeTag] {
        &self.input_types
    }

    pub fn output_types(&self) -> &[TypeTag] {
        &self.output_types
    }

    /// Check that `upstream`'s declared output satisfies this spec's inputs.
    ///
    /// Rules:
    /// * an upstream output of `Any` cannot be checked and is rejected,
    /// * `Unit` is always acceptable (the upstream contributes no input),
    /// * otherwise every candidate output must appear in the input list,
    ///   compared by identity.
    pub fn validate(&self, upstream: &TaskSpec) -> Result<()> {
        if upstream.output_types.iter().any(TypeTag::is_any) {
            return Err(LoomError::Compatibility {
                upstream: upstream.symbol().to_string(),
                downstream: self.symbol().to_string(),
                detail: "cannot check compatibility when the return type is 'Any'".to_string(),
            });
        }
        for out in &upstream.output_types {
            if out.is_unit() {
                continue;
            }
            if !self.input_types.contains(out) {
                return Err(LoomError::Compatibility {
                    upstream: upstream.symbol().to_string(),
                    downstream: self.symbol().to_string(),
                    detail: format!("no declared input matches '{}'", out),
                });
            }
        }
        Ok(())
    }

    /// Invoke the wrapped callable.
    ///
    /// `kwargs` are merged over the spec's pre-bound kwargs (call-site wins).
    pub fn run(&self, ctx: &TaskContext, inputs: &[Value], kwargs: &Kwargs) -> anyhow::Result<Value> {
        let mut merged = self.bound_kwargs.clone();
        for (k, v) in kwargs {
            merged.insert(k.clone(), v.clone());
        }
        match &self.kind {
            TaskKind::Plain { func: Some(f), .. } => f(inputs, &merged),
            TaskKind::ContextAware { func: Some(f), .. } => f(ctx, inputs, &merged),
            TaskKind::Conditional {
                predicate,
                funcs: Some(fns),
                ..
            } => match (fns.predicate)(inputs, &merged)? {
                Value::Bool(true) => (fns.when_true)(inputs, &merged),
                Value::Bool(false) => (fns.when_false)(inputs, &merged),
                other => Err(anyhow!(
                    "predicate '{}' returned {} instead of a bool",
                    predicate,
                    other
                )),
            },
            _ => Err(anyhow!(
                "task '{}' has no bound callable; re-bind it against a registry",
                self.symbol()
            )),
        }
    }

    /// Re-resolve the callable handles from a registry.
    ///
    /// Required after deserialization, where handles are not restored.
    pub fn rebind(&mut self, registry: &TaskRegistry) -> Result<()> {
        match &mut self.kind {
            TaskKind::Plain { symbol, func } => match &registry.entry(symbol)?.callable {
                Callable::Plain(f) => *func = Some(f.clone()),
                Callable::ContextAware(_) => {
                    return Err(LoomError::Other(format!(
                        "task '{}' was persisted as plain but is registered as context-aware",
                        symbol
                    )))
                }
            },
            TaskKind::ContextAware { symbol, func } => match &registry.entry(symbol)?.callable {
                Callable::ContextAware(f) => *func = Some(f.clone()),
                Callable::Plain(_) => {
                    return Err(LoomError::Other(format!(
                        "task '{}' was persisted as context-aware but is registered as plain",
                        symbol
                    )))
                }
            },
            TaskKind::Conditional {
                predicate,
                when_true,
                when_false,
                funcs,
            } => {
                *funcs = Some(ConditionalFns {
                    predicate: registry.plain_handle(predicate)?,
                    when_true: registry.plain_handle(when_true)?,
                    when_false: registry.plain_handle(when_false)?,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture_registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry.register(
            "double",
            vec![TypeTag::named("int")],
            Some(TypeTag::named("int")),
            |inputs, _| Ok(json!(inputs[0].as_i64().unwrap() * 2)),
        );
        registry.register(
            "stringify",
            vec![TypeTag::named("int")],
            Some(TypeTag::named("str")),
            |inputs, _| Ok(json!(inputs[0].to_string())),
        );
        registry.register(
            "untyped",
            vec![TypeTag::named("int")],
            None,
            |_, _| Ok(Value::Null),
        );
        registry.register("top", vec![], Some(TypeTag::Any), |_, _| Ok(Value::Null));
        registry.register("noop", vec![], Some(TypeTag::Unit), |_, _| Ok(Value::Null));
        registry
    }

    #[test]
    fn test_missing_return_type() {
        let registry = fixture_registry();
        let result = TaskSpec::new(&registry, "untyped");
        assert!(matches!(result, Err(LoomError::MissingTypeHint { .. })));
    }

    #[test]
    fn test_unknown_symbol() {
        let registry = fixture_registry();
        let result = TaskSpec::new(&registry, "nonexistent");
        assert!(matches!(
            result,
            Err(LoomError::UnknownSymbol { symbol }) if symbol == "nonexistent"
        ));
    }

    #[test]
    fn test_chain_compatibility() {
        let registry = fixture_registry();
        let double = TaskSpec::new(&registry, "double").unwrap();
        let stringify = TaskSpec::new(&registry, "stringify").unwrap();

        // double: int -> int feeds stringify: int -> str
        stringify.validate(&double).unwrap();
        // str does not feed double
        assert!(matches!(
            double.validate(&stringify),
            Err(LoomError::Compatibility { .. })
        ));
    }

    #[test]
    fn test_any_output_defeats_checking() {
        let registry = fixture_registry();
        let top = TaskSpec::new(&registry, "top").unwrap();
        let double = TaskSpec::new(&registry, "double").unwrap();
        assert!(matches!(
            double.validate(&top),
            Err(LoomError::Compatibility { .. })
        ));
    }

    #[test]
    fn test_unit_output_is_always_acceptable() {
        let registry = fixture_registry();
        let noop = TaskSpec::new(&registry, "noop").unwrap();
        let double = TaskSpec::new(&registry, "double").unwrap();
        double.validate(&noop).unwrap();
    }

    #[test]
    fn test_generic_parameterization_is_identity_checked() {
        let mut registry = fixture_registry();
        registry.register(
            "pair",
            vec![],
            Some(TypeTag::named("Tuple<int,int>")),
            |_, _| Ok(json!([1, 2])),
        );
        let pair = TaskSpec::new(&registry, "pair").unwrap();
        let double = TaskSpec::new(&registry, "double").unwrap();
        assert!(matches!(
            double.validate(&pair),
            Err(LoomError::Compatibility { .. })
        ));
    }

    #[test]
    fn test_bound_kwargs_do_not_prune_inputs() {
        let registry = fixture_registry();
        let mut kwargs = Kwargs::new();
        kwargs.insert("n".to_string(), json!(3));
        let spec = TaskSpec::new(&registry, "double").unwrap().bind(kwargs);
        assert_eq!(spec.input_types(), &[TypeTag::named("int")]);
    }

    #[test]
    fn test_call_site_kwargs_win_over_bound() {
        let mut registry = TaskRegistry::new();
        registry.register("pick_n", vec![], Some(TypeTag::named("int")), |_, kwargs| {
            Ok(kwargs.get("n").cloned().unwrap_or(Value::Null))
        });
        let mut bound = Kwargs::new();
        bound.insert("n".to_string(), json!(1));
        let spec = TaskSpec::new(&registry, "pick_n").unwrap().bind(bound);

        let ctx = TaskContext::new();
        let mut call = Kwargs::new();
        call.insert("n".to_string(), json!(9));
        assert_eq!(spec.run(&ctx, &[], &call).unwrap(), json!(9));
        assert_eq!(spec.run(&ctx, &[], &Kwargs::new()).unwrap(), json!(1));
    }

    #[test]
    fn test_conditional_dispatch() {
        let mut registry = TaskRegistry::new();
        registry.register(
            "is_positive",
            vec![TypeTag::named("int")],
            Some(TypeTag::named("bool")),
            |inputs, _| Ok(json!(inputs[0].as_i64().unwrap() > 0)),
        );
        registry.register("yes", vec![TypeTag::named("int")], Some(TypeTag::named("str")), |_, _| {
            Ok(json!("positive"))
        });
        registry.register("no", vec![TypeTag::named("int")], Some(TypeTag::named("str")), |_, _| {
            Ok(json!("negative"))
        });

        let spec = TaskSpec::conditional(&registry, "is_positive", "yes", "no").unwrap();
        assert_eq!(spec.output_types().len(), 2);

        let ctx = TaskContext::new();
        let result = spec.run(&ctx, &[json!(5)], &Kwargs::new()).unwrap();
        assert_eq!(result, json!("positive"));
        let result = spec.run(&ctx, &[json!(-5)], &Kwargs::new()).unwrap();
        assert_eq!(result, json!("negative"));
    }

    #[test]
    fn test_conditional_requires_bool_predicate() {
        let mut registry = TaskRegistry::new();
        registry.register("not_a_bool", vec![], Some(TypeTag::named("int")), |_, _| {
            Ok(json!(42))
        });
        registry.register("a", vec![], Some(TypeTag::named("int")), |_, _| Ok(json!(1)));
        registry.register("b", vec![], Some(TypeTag::named("int")), |_, _| Ok(json!(2)));

        let spec = TaskSpec::conditional(&registry, "not_a_bool", "a", "b").unwrap();
        let ctx = TaskContext::new();
        assert!(spec.run(&ctx, &[], &Kwargs::new()).is_err());
    }

    #[test]
    fn test_context_aware_task_reads_resources() {
        let mut registry = TaskRegistry::new();
        registry.register_with_context(
            "scaled",
            vec![],
            Some(TypeTag::named("int")),
            |ctx: &TaskContext, _, _| {
                let factor = ctx.get::<i64>("factor").ok_or_else(|| anyhow!("no factor"))?;
                Ok(json!(*factor * 10))
            },
        );
        let spec = TaskSpec::new(&registry, "scaled").unwrap();

        let mut ctx = TaskContext::new();
        ctx.insert("factor", 4i64);
        assert_eq!(spec.run(&ctx, &[], &Kwargs::new()).unwrap(), json!(40));
    }

    #[test]
    fn test_rebind_after_serde() {
        let registry = fixture_registry();
        let spec = TaskSpec::new(&registry, "double").unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        let mut restored: TaskSpec = serde_json::from_str(&json).unwrap();

        let ctx = TaskContext::new();
        // handles are gone until rebind
        assert!(restored.run(&ctx, &[json!(2)], &Kwargs::new()).is_err());
        restored.rebind(&registry).unwrap();
        assert_eq!(restored.run(&ctx, &[json!(2)], &Kwargs::new()).unwrap(), json!(4));
        assert_eq!(restored.tid, spec.tid);
    }
}
