use crate::data::sample::AttrBag;
use crate::data::{AttrScope, MergeFn, Merger};
use crate::executors::{Executor, ExecutorFactory, SubprocessExecutor};
use crate::modules::hook::{resolve_order, Hook, HookKind};
use crate::modules::runner::RunnerDef;
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A mixin-declared attribute: name, default, optional validator.
///
/// Defaults fill absent manifest attributes; validators run against every
/// value read from the manifest (and against the default itself at load).
#[derive(Clone)]
pub struct AttrSchema {
    name: String,
    default: Value,
    validator: Option<Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>>,
}

impl AttrSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: Value::Null,
            validator: None,
        }
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = value;
        self
    }

    pub fn validator(
        mut self,
        validator: impl Fn(&Value) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fills the default into the bag when absent and validates the value.
    pub fn apply(&self, bag: &mut AttrBag) -> Result<()> {
        let value = bag
            .entry(self.name.clone())
            .or_insert_with(|| self.default.clone());
        if let Some(validator) = &self.validator {
            validator(value).with_context(|| format!("invalid value for attribute '{}'", self.name))?;
        }
        Ok(())
    }

    fn validate_default(&self) -> Result<()> {
        if let Some(validator) = &self.validator {
            validator(&self.default)
                .with_context(|| format!("default for attribute '{}' is invalid", self.name))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for AttrSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttrSchema")
            .field("name", &self.name)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

/// A user plug-in module: a named bundle of hooks, runners, attribute
/// mixins, merge functions, and executor backends.
///
/// Registration is explicit; the registry is built once from all modules and
/// frozen before scheduling starts.
pub struct Module {
    name: String,
    hooks: Vec<Hook>,
    runners: Vec<RunnerDef>,
    sample_attrs: Vec<AttrSchema>,
    collection_attrs: Vec<AttrSchema>,
    merge_fns: Vec<(AttrScope, String, MergeFn)>,
    executors: Vec<(String, ExecutorFactory)>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hooks: Vec::new(),
            runners: Vec::new(),
            sample_attrs: Vec::new(),
            collection_attrs: Vec::new(),
            merge_fns: Vec::new(),
            executors: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hook(mut self, hook: Hook) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn runner(mut self, runner: RunnerDef) -> Self {
        self.runners.push(runner);
        self
    }

    pub fn sample_attr(mut self, schema: AttrSchema) -> Self {
        self.sample_attrs.push(schema);
        self
    }

    pub fn collection_attr(mut self, schema: AttrSchema) -> Self {
        self.collection_attrs.push(schema);
        self
    }

    pub fn merge_fn(mut self, scope: AttrScope, attr: impl Into<String>, func: MergeFn) -> Self {
        self.merge_fns.push((scope, attr.into(), func));
        self
    }

    pub fn executor(mut self, name: impl Into<String>, factory: ExecutorFactory) -> Self {
        self.executors.push((name.into(), factory));
        self
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("hooks", &self.hooks.len())
            .field("runners", &self.runners.len())
            .finish_non_exhaustive()
    }
}

/// The frozen, process-wide registry built from all loaded modules.
pub struct Registry {
    pre_hooks: Vec<Hook>,
    post_hooks: Vec<Hook>,
    runners: Vec<RunnerDef>,
    sample_attrs: Vec<AttrSchema>,
    collection_attrs: Vec<AttrSchema>,
    merger: Merger,
    executors: HashMap<String, ExecutorFactory>,
}

impl Registry {
    /// Builds the registry from the given modules, in registration order.
    ///
    /// Any conflicting contribution fails the load with a diagnostic naming
    /// the module; the hook graphs are resolved here so an unresolvable
    /// ordering aborts before anything runs.
    pub fn load(modules: impl IntoIterator<Item = Module>) -> Result<Self> {
        let mut pre_hooks: Vec<Hook> = Vec::new();
        let mut post_hooks: Vec<Hook> = Vec::new();
        let mut runners: Vec<RunnerDef> = Vec::new();
        let mut sample_attrs: Vec<AttrSchema> = Vec::new();
        let mut collection_attrs: Vec<AttrSchema> = Vec::new();
        let mut merger = Merger::new();
        let mut executors: HashMap<String, ExecutorFactory> = HashMap::new();
        executors.insert(
            crate::executors::subprocess::SUBPROCESS_EXECUTOR_NAME.to_string(),
            Arc::new(|scope| Ok(Box::new(SubprocessExecutor::new(scope)?) as Box<dyn Executor>)),
        );

        for module in modules {
            Self::integrate(
                module,
                &mut pre_hooks,
                &mut post_hooks,
                &mut runners,
                &mut sample_attrs,
                &mut collection_attrs,
                &mut merger,
                &mut executors,
            )?;
        }

        let pre_order = resolve_order(&pre_hooks)?;
        let post_order = resolve_order(&post_hooks)?;
        let pre_hooks = reorder(pre_hooks, pre_order);
        let post_hooks = reorder(post_hooks, post_order);

        tracing::debug!("Found {} sample attributes", sample_attrs.len());
        tracing::debug!("Found {} collection attributes", collection_attrs.len());
        tracing::debug!("Found {} executors", executors.len());

        Ok(Self {
            pre_hooks,
            post_hooks,
            runners,
            sample_attrs,
            collection_attrs,
            merger,
            executors,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn integrate(
        module: Module,
        pre_hooks: &mut Vec<Hook>,
        post_hooks: &mut Vec<Hook>,
        runners: &mut Vec<RunnerDef>,
        sample_attrs: &mut Vec<AttrSchema>,
        collection_attrs: &mut Vec<AttrSchema>,
        merger: &mut Merger,
        executors: &mut HashMap<String, ExecutorFactory>,
    ) -> Result<()> {
        let fail = |cause: String| anyhow!("Unable to load module '{}': {cause}", module.name);

        for hook in module.hooks {
            let known = pre_hooks.iter().chain(post_hooks.iter());
            if known.into_iter().any(|h| h.label() == hook.label()) {
                return Err(fail(format!("duplicate hook label '{}'", hook.label())));
            }
            match hook.kind() {
                HookKind::Pre => pre_hooks.push(hook),
                HookKind::Post => post_hooks.push(hook),
            }
        }
        for runner in module.runners {
            if runners.iter().any(|r| r.label() == runner.label()) {
                return Err(fail(format!("duplicate runner label '{}'", runner.label())));
            }
            runners.push(runner);
        }
        for (schemas, new) in [
            (sample_attrs, module.sample_attrs),
            (collection_attrs, module.collection_attrs),
        ] {
            for schema in new {
                schema.validate_default().map_err(|e| fail(format!("{e:#}")))?;
                if schemas.iter().any(|s| s.name() == schema.name()) {
                    return Err(fail(format!("duplicate attribute '{}'", schema.name())));
                }
                schemas.push(schema);
            }
        }
        for (scope, attr, func) in module.merge_fns {
            merger
                .register(scope, attr, func)
                .map_err(|e| fail(format!("{e:#}")))?;
        }
        for (name, factory) in module.executors {
            if executors.contains_key(&name) {
                return Err(fail(format!("duplicate executor '{name}'")));
            }
            executors.insert(name, factory);
        }
        Ok(())
    }

    pub fn pre_hooks(&self) -> &[Hook] {
        &self.pre_hooks
    }

    pub fn post_hooks(&self) -> &[Hook] {
        &self.post_hooks
    }

    pub fn runners(&self) -> &[RunnerDef] {
        &self.runners
    }

    pub fn sample_attrs(&self) -> &[AttrSchema] {
        &self.sample_attrs
    }

    pub fn collection_attrs(&self) -> &[AttrSchema] {
        &self.collection_attrs
    }

    pub fn merger(&self) -> &Merger {
        &self.merger
    }

    pub fn executor_factory(&self, name: &str) -> Result<ExecutorFactory> {
        self.executors
            .get(name)
            .cloned()
            .with_context(|| format!("unknown executor '{name}'"))
    }

    pub fn executor_names(&self) -> Vec<&str> {
        self.executors.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("pre_hooks", &self.pre_hooks)
            .field("post_hooks", &self.post_hooks)
            .field("runners", &self.runners)
            .field("executors", &self.executor_names())
            .finish_non_exhaustive()
    }
}

fn reorder<T>(items: Vec<T>, order: Vec<usize>) -> Vec<T> {
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|index| slots.get_mut(index).and_then(Option::take))
        .collect()
}
