// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Registry of the ghost state the lockset instrumentation declared.
//!
//! The instrumentation tags every ghost global with an attribute that says
//! what it models:
//! ```ignore
//! var {:lock} lock$power: bool;
//! var {:current_lockset "lock$power", "foo_open"} CLS_lock$power_foo_open: bool;
//! var {:memory_lockset "lock$power", "$M.0", "foo_open"} LS_$M.0_lock$power_foo_open: bool;
//! var {:access_checking "write", "$M.0", "foo_open"} WRITTEN_$M.0_foo_open: bool;
//! ```
//! Variable names are never parsed; only the attributes are.

use boogie_ast::boogie_program::BoogieProgram;
use tracing::trace;

/// Read or write access to a shared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AccessKind {
    Read,
    Write,
}

/// Ghost boolean tracking whether a lock is held. Current locksets track a
/// lock per entry point; memory locksets track it per entry point and
/// resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lockset {
    pub name: String,
    pub lock: String,
    pub entry_point: String,
    pub resource: Option<String>,
}

/// Ghost boolean set when an entry point accesses a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCheckingVariable {
    pub name: String,
    pub kind: AccessKind,
    pub resource: String,
    pub entry_point: String,
}

#[derive(Debug, Clone, Default)]
pub struct GhostRegistry {
    locks: Vec<String>,
    current_locksets: Vec<Lockset>,
    memory_locksets: Vec<Lockset>,
    access_variables: Vec<AccessCheckingVariable>,
}

impl GhostRegistry {
    /// Collect the ghost state declared in `program`. Variables with
    /// malformed tags are ignored.
    pub fn new(program: &BoogieProgram) -> GhostRegistry {
        let mut registry = GhostRegistry::default();
        for var in &program.variables {
            let attrs = &var.attributes;
            if attrs.has("lock") {
                registry.locks.push(var.name.clone());
            }
            if let Some(attr) = attrs.get("current_lockset") {
                let params: Vec<&str> = attr.strings().collect();
                if let [lock, ep] = params.as_slice() {
                    registry.current_locksets.push(Lockset {
                        name: var.name.clone(),
                        lock: lock.to_string(),
                        entry_point: ep.to_string(),
                        resource: None,
                    });
                } else {
                    trace!(var = %var.name, "malformed current lockset tag");
                }
            }
            if let Some(attr) = attrs.get("memory_lockset") {
                let params: Vec<&str> = attr.strings().collect();
                if let [lock, resource, ep] = params.as_slice() {
                    registry.memory_locksets.push(Lockset {
                        name: var.name.clone(),
                        lock: lock.to_string(),
                        entry_point: ep.to_string(),
                        resource: Some(resource.to_string()),
                    });
                } else {
                    trace!(var = %var.name, "malformed memory lockset tag");
                }
            }
            if let Some(attr) = attrs.get("access_checking") {
                let params: Vec<&str> = attr.strings().collect();
                let kind = params.first().and_then(|kind| kind.parse::<AccessKind>().ok());
                match (kind, params.as_slice()) {
                    (Some(kind), [_, resource, ep]) => registry.access_variables.push(AccessCheckingVariable {
                        name: var.name.clone(),
                        kind,
                        resource: resource.to_string(),
                        entry_point: ep.to_string(),
                    }),
                    _ => trace!(var = %var.name, "malformed access checking tag"),
                }
            }
        }
        registry
    }

    /// Every lock, in declaration order.
    pub fn locks(&self) -> &[String] {
        &self.locks
    }

    pub fn current_lockset(&self, ep: &str, lock: &str) -> Option<&Lockset> {
        self.current_locksets.iter().find(|ls| ls.entry_point == ep && ls.lock == lock)
    }

    pub fn current_locksets_of<'a>(&'a self, ep: &'a str) -> impl Iterator<Item = &'a Lockset> + 'a {
        self.current_locksets.iter().filter(move |ls| ls.entry_point == ep)
    }

    pub fn memory_lockset(&self, ep: &str, resource: &str, lock: &str) -> Option<&Lockset> {
        self.memory_locksets
            .iter()
            .find(|ls| ls.entry_point == ep && ls.lock == lock && ls.resource.as_deref() == Some(resource))
    }

    pub fn memory_locksets_of<'a>(&'a self, ep: &'a str) -> impl Iterator<Item = &'a Lockset> + 'a {
        self.memory_locksets.iter().filter(move |ls| ls.entry_point == ep)
    }

    pub fn access_variable(&self, ep: &str, resource: &str, kind: AccessKind) -> Option<&AccessCheckingVariable> {
        self.access_variables.iter().find(|v| v.entry_point == ep && v.resource == resource && v.kind == kind)
    }

    pub fn access_variables_of<'a>(&'a self, ep: &'a str) -> impl Iterator<Item = &'a AccessCheckingVariable> + 'a {
        self.access_variables.iter().filter(move |v| v.entry_point == ep)
    }

    /// Whether the entry point takes `lock` anywhere.
    pub fn uses_lock(&self, ep: &str, lock: &str) -> bool {
        self.current_lockset(ep, lock).is_some()
    }

    /// The resource a per-resource ghost variable belongs to.
    pub fn resource_of(&self, ghost: &str) -> Option<&str> {
        self.memory_locksets
            .iter()
            .find(|ls| ls.name == ghost)
            .and_then(|ls| ls.resource.as_deref())
            .or_else(|| self.access_variables.iter().find(|v| v.name == ghost).map(|v| v.resource.as_str()))
    }

    /// Whether `name` is any kind of ghost state.
    pub fn is_ghost(&self, name: &str) -> bool {
        self.locks.iter().any(|l| l == name)
            || self.current_locksets.iter().any(|ls| ls.name == name)
            || self.resource_of(name).is_some()
    }
}
