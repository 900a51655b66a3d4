use crate::types::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::rc::Rc;
use thiserror::Error;

// --- Environment Error ---
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    #[error("Unknown variable {0}")]
    UnknownVariable(String),
}

// --- Namespace slots ---

/// One path segment of a closure's bindings. A segment can hold a value
/// and nested segments at the same time (`a` and `a.b` coexist).
#[derive(Debug, Default)]
struct Slot {
    value: Option<Value>,
    children: HashMap<String, Slot>,
}

impl Slot {
    fn collect_names(&self, prefix: &str, names: &mut Vec<String>) {
        for (segment, slot) in &self.children {
            let dotted = if prefix.is_empty() {
                segment.clone()
            } else {
                format!("{}.{}", prefix, segment)
            };
            if slot.value.is_some() {
                names.push(dotted.clone());
            }
            slot.collect_names(&dotted, names);
        }
    }
}

fn segments(dotted: &str) -> Vec<&str> {
    dotted.split('.').filter(|s| !s.is_empty()).collect()
}

// --- Closure Definition ---

/// An environment frame: dotted bindings plus a pointer to the lexically
/// enclosing closure. Children share their parent; parents never own
/// children.
#[derive(Debug)]
pub struct Closure {
    parent: Option<Rc<RefCell<Closure>>>,
    name: String,
    bindings: Slot,
}

impl Closure {
    /// Creates a closure without a parent (the VM's root, `__G`).
    pub fn new_root(name: &str) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Closure {
            parent: None,
            name: name.to_string(),
            bindings: Slot::default(),
        }))
    }

    /// Creates a new closure enclosed within `parent`.
    pub fn new_enclosed(parent: Rc<RefCell<Closure>>, name: &str) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Closure {
            parent: Some(parent),
            name: name.to_string(),
            bindings: Slot::default(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binds `dotted` in *this* closure, creating intermediate namespace
    /// segments as needed. Existing bindings are overwritten.
    pub fn define(&mut self, dotted: &str, value: Value) {
        let mut slot = &mut self.bindings;
        for segment in segments(dotted) {
            slot = slot.children.entry(segment.to_string()).or_default();
        }
        slot.value = Some(value);
    }

    fn resolve(&self, path: &[&str], name: &str) -> Option<Value> {
        let mut slot = &self.bindings;
        for segment in path.iter().chain(std::iter::once(&name)) {
            slot = slot.children.get(*segment)?;
        }
        slot.value.clone()
    }

    /// Searches this closure only: tries `path ++ [name]`, then drops the
    /// last path segment and retries until `name` alone has been tried.
    pub fn lookup_local(&self, dotted: &str) -> Option<Value> {
        let segments = segments(dotted);
        let (name, path) = segments.split_last()?;
        (0..=path.len())
            .rev()
            .find_map(|len| self.resolve(&path[..len], name))
    }

    /// Looks up a variable: the full namespace search in this closure,
    /// then the same search in each lexical parent in turn.
    pub fn get(&self, dotted: &str) -> Result<Value, EnvError> {
        if let Some(value) = self.lookup_local(dotted) {
            return Ok(value);
        }
        match &self.parent {
            Some(parent) => parent.borrow().get(dotted),
            None => Err(EnvError::UnknownVariable(dotted.to_string())),
        }
    }

    /// Dotted names bound directly in this closure.
    pub fn local_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.bindings.collect_names("", &mut names);
        names.sort();
        names
    }

    /// Every dotted name visible from this closure.
    pub fn get_identifiers(&self) -> HashSet<String> {
        let mut identifiers: HashSet<String> = self.local_names().into_iter().collect();
        if let Some(parent) = &self.parent {
            identifiers.extend(parent.borrow().get_identifiers());
        }
        identifiers
    }

    /// Renders the closure chain, innermost first, for inspection.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(&mut out, 0);
        out
    }

    fn dump_into(&self, out: &mut String, depth: usize) {
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), self.name);
        let values: BTreeMap<String, String> = self
            .local_names()
            .into_iter()
            .filter_map(|name| {
                let value = self.lookup_local(&name)?;
                Some((name, value.to_string()))
            })
            .collect();
        for (name, value) in values {
            let _ = writeln!(out, "{}  {} = {}", "  ".repeat(depth), name, value);
        }
        if let Some(parent) = &self.parent {
            parent.borrow().dump_into(out, depth + 1);
        }
    }
}
