use crate::cfg::Config;
use crate::cleanup::Cleaner;
use crate::data::SampleCollection;
use crate::executors::Executor;
use anyhow::{bail, Result};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

/// Whether a hook runs before or after the runner phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Pre,
    Post,
}

/// When a post-hook runs, relative to the collection's terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookCondition {
    Always,
    Complete,
    Failed,
}

impl HookCondition {
    /// Evaluates the condition against the current collection.
    ///
    /// `Complete` is vacuously true for an empty collection; `Failed`
    /// requires at least one effectively failed sample.
    pub fn should_run(&self, samples: &SampleCollection) -> bool {
        match self {
            HookCondition::Always => true,
            HookCondition::Complete => samples.iter().all(|s| s.failure().is_none()),
            HookCondition::Failed => samples.iter().any(|s| s.failure().is_some()),
        }
    }
}

/// An ordering constraint naming another hook, or the `all` sentinel pinning
/// a hook to the extremes of its kind's ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Label(String),
    All,
}

impl Constraint {
    fn parse(value: &str) -> Self {
        if value == "all" {
            Constraint::All
        } else {
            Constraint::Label(value.to_string())
        }
    }
}

/// Context handed to hook callables. Hooks run in-process in the driver and
/// mutate the collection directly.
pub struct HookScope<'a> {
    pub config: &'a Config,
    pub workdir: PathBuf,
    pub executor: &'a mut dyn Executor,
    pub cleaner: &'a mut Cleaner,
}

pub type HookFn =
    Arc<dyn Fn(&mut SampleCollection, &mut HookScope<'_>) -> Result<()> + Send + Sync>;

/// A user pre- or post-processing callable with its scheduling metadata.
#[derive(Clone)]
pub struct Hook {
    label: String,
    kind: HookKind,
    condition: HookCondition,
    before: Vec<Constraint>,
    after: Vec<Constraint>,
    func: HookFn,
}

impl Hook {
    pub fn pre(label: impl Into<String>, func: HookFn) -> Self {
        Self::new(label, HookKind::Pre, func)
    }

    pub fn post(label: impl Into<String>, func: HookFn) -> Self {
        Self::new(label, HookKind::Post, func)
    }

    fn new(label: impl Into<String>, kind: HookKind, func: HookFn) -> Self {
        Self {
            label: label.into(),
            kind,
            condition: HookCondition::Always,
            before: Vec::new(),
            after: Vec::new(),
            func,
        }
    }

    /// Run condition; only meaningful on post-hooks.
    pub fn condition(mut self, condition: HookCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Declares hooks (or `"all"`) this hook must run before.
    pub fn before<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.before
            .extend(labels.into_iter().map(|l| Constraint::parse(l.as_ref())));
        self
    }

    /// Declares hooks (or `"all"`) this hook must run after.
    pub fn after<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.after
            .extend(labels.into_iter().map(|l| Constraint::parse(l.as_ref())));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }

    pub fn run_condition(&self) -> HookCondition {
        self.condition
    }

    pub fn func(&self) -> &HookFn {
        &self.func
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("condition", &self.condition)
            .field("before", &self.before)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

// Synthetic node ids for the `all` sentinels and the offset real hooks start
// at inside the constraint graph.
const BEFORE_ALL: usize = 0;
const AFTER_ALL: usize = 1;
const HOOK_BASE: usize = 2;

/// Computes the execution order of one kind's hooks.
///
/// The order is a topological sort of the declared constraints; when several
/// orders are legal the tie-break is registration order. Returns indices into
/// the input slice.
pub fn resolve_order(hooks: &[Hook]) -> Result<Vec<usize>> {
    let mut labels: HashMap<&str, usize> = HashMap::new();
    for (index, hook) in hooks.iter().enumerate() {
        labels.insert(hook.label(), HOOK_BASE + index);
    }

    // Nodes: the two sentinels, one per hook, then one per unknown label
    // referenced by a constraint.
    let mut node_count = HOOK_BASE + hooks.len();
    let mut virtual_nodes: HashMap<String, usize> = HashMap::new();
    let resolve = |label: &str,
                       virtual_nodes: &mut HashMap<String, usize>,
                       node_count: &mut usize| {
        if let Some(&node) = labels.get(label) {
            node
        } else {
            *virtual_nodes.entry(label.to_string()).or_insert_with(|| {
                let node = *node_count;
                *node_count += 1;
                node
            })
        }
    };

    let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();
    for (index, hook) in hooks.iter().enumerate() {
        let node = HOOK_BASE + index;
        let pinned_first = hook.before.contains(&Constraint::All);
        let pinned_last = hook.after.contains(&Constraint::All);
        if pinned_first && pinned_last {
            bail!("Unable to resolve hook dependencies");
        }

        if pinned_first {
            edges.insert((node, BEFORE_ALL));
        } else if pinned_last {
            edges.insert((AFTER_ALL, node));
        } else {
            edges.insert((BEFORE_ALL, node));
            edges.insert((node, AFTER_ALL));
        }

        for constraint in &hook.before {
            if let Constraint::Label(label) = constraint {
                let target = resolve(label, &mut virtual_nodes, &mut node_count);
                edges.insert((node, target));
            }
        }
        for constraint in &hook.after {
            if let Constraint::Label(label) = constraint {
                let source = resolve(label, &mut virtual_nodes, &mut node_count);
                edges.insert((source, node));
            }
        }
    }

    let mut in_degree = vec![0usize; node_count];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    for &(from, to) in &edges {
        if from == to {
            bail!("Unable to resolve hook dependencies");
        }
        in_degree[to] += 1;
        successors[from].push(to);
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..node_count)
        .filter(|&node| in_degree[node] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(hooks.len());
    let mut visited = 0usize;

    while let Some(Reverse(node)) = ready.pop() {
        visited += 1;
        if node >= HOOK_BASE && node < HOOK_BASE + hooks.len() {
            order.push(node - HOOK_BASE);
        }
        for &next in &successors[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if visited != node_count {
        bail!("Unable to resolve hook dependencies");
    }
    Ok(order)
}
