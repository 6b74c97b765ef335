use anyhow::{bail, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Which attribute bag a merge function or attribute schema targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrScope {
    Sample,
    Collection,
}

impl std::fmt::Display for AttrScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrScope::Sample => write!(f, "sample"),
            AttrScope::Collection => write!(f, "collection"),
        }
    }
}

/// A merge function combines the two sides of one attribute when a shard is
/// merged back into the master collection.
pub type MergeFn = Arc<dyn Fn(&Value, &Value) -> Result<Value> + Send + Sync>;

/// Registry mapping `(scope, attribute)` to user merge functions.
///
/// Frozen together with the module registry; consulted by the dispatcher's
/// result-collection phase.
#[derive(Clone, Default)]
pub struct Merger {
    fns: HashMap<(AttrScope, String), MergeFn>,
}

impl Merger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        scope: AttrScope,
        attr: impl Into<String>,
        func: MergeFn,
    ) -> Result<()> {
        let attr = attr.into();
        if self.fns.contains_key(&(scope, attr.clone())) {
            bail!("merge function for {scope} attribute '{attr}' is already registered");
        }
        self.fns.insert((scope, attr), func);
        Ok(())
    }

    /// Merges one attribute, falling back to the default policy when no
    /// function is registered for it.
    pub fn merge(&self, scope: AttrScope, attr: &str, this: &Value, that: &Value) -> Result<Value> {
        match self.fns.get(&(scope, attr.to_string())) {
            Some(func) => func(this, that),
            None => Ok(default_merge(this, that)),
        }
    }

    pub fn is_registered(&self, scope: AttrScope, attr: &str) -> bool {
        self.fns.contains_key(&(scope, attr.to_string()))
    }
}

impl std::fmt::Debug for Merger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merger").field("fns", &self.fns.len()).finish()
    }
}

/// Default merge policy: equal values pass through, one-sided nulls yield the
/// other side, and disagreeing values pair into a two-element array.
pub fn default_merge(this: &Value, that: &Value) -> Value {
    if this == that {
        this.clone()
    } else if this.is_null() {
        that.clone()
    } else if that.is_null() {
        this.clone()
    } else {
        json!([this, that])
    }
}
