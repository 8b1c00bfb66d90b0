// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::ghost::AccessKind;
use crate::pointer::PointerExpr;
use boogie_ast::boogie_program::Expr;
use driver_metadata::KernelLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Position of a call command inside an implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSite {
    pub block: usize,
    pub index: usize,
}

/// How the caller binds one formal parameter of the callee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentBinding {
    /// Root pointer of the actual argument, if it has one
    pub actual: Option<PointerExpr>,
    pub formal: String,
}

/// The analysis record of one function body.
#[derive(Debug, Clone)]
pub struct InstrumentationRegion {
    name: String,
    /// Resolved accesses per resource. Expressions are unique by their text.
    resource_accesses: BTreeMap<String, Vec<Expr>>,
    /// Resources accessed through a pointer with no root
    unidentified: BTreeSet<String>,
    /// Kinds of the accesses the body performs itself
    local_access_kinds: BTreeMap<String, BTreeSet<AccessKind>>,
    /// Kernel locks the body acquires itself
    acquired_locks: BTreeSet<KernelLock>,
    call_information: HashMap<CallSite, Vec<ArgumentBinding>>,
    pub is_local_resource_analysis_done: bool,
    pub is_resource_analysis_done: bool,
    pub is_device_registered: bool,
    pub is_changing_device_registration: bool,
}

impl InstrumentationRegion {
    pub fn new(name: &str) -> Self {
        InstrumentationRegion {
            name: name.to_string(),
            resource_accesses: BTreeMap::new(),
            unidentified: BTreeSet::new(),
            local_access_kinds: BTreeMap::new(),
            acquired_locks: BTreeSet::new(),
            call_information: HashMap::new(),
            is_local_resource_analysis_done: false,
            is_resource_analysis_done: false,
            is_device_registered: false,
            is_changing_device_registration: false,
        }
    }

    /// Name of the implementation this region analyses.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record an access to `resource`. `None` means the accessed location is
    /// unknown, which taints the resource until a resolved access shows up.
    /// Returns whether a new resolved access was added.
    pub fn try_add_resource_access(&mut self, resource: &str, access: Option<Expr>) -> bool {
        debug_assert!(!self.is_resource_analysis_done, "access added to finished region `{}`", self.name);
        let Some(access) = access else {
            self.unidentified.insert(resource.to_string());
            return false;
        };
        let accesses = self.resource_accesses.entry(resource.to_string()).or_default();
        let text = access.to_string();
        if accesses.iter().any(|a| a.to_string() == text) {
            return false;
        }
        accesses.push(access);
        self.unidentified.remove(resource);
        true
    }

    pub fn resource_accesses(&self) -> &BTreeMap<String, Vec<Expr>> {
        &self.resource_accesses
    }

    pub fn accesses_of(&self, resource: &str) -> &[Expr] {
        self.resource_accesses.get(resource).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of resolved accesses over all resources.
    pub fn access_count(&self) -> usize {
        self.resource_accesses.values().map(Vec::len).sum()
    }

    pub fn has_unidentified_access(&self, resource: &str) -> bool {
        self.unidentified.contains(resource)
    }

    pub fn resources_with_unidentified_accesses(&self) -> &BTreeSet<String> {
        &self.unidentified
    }

    /// Every resource this region is known to touch, resolved or not.
    pub fn resources(&self) -> BTreeSet<&str> {
        self.resource_accesses
            .keys()
            .chain(self.unidentified.iter())
            .chain(self.local_access_kinds.keys())
            .map(String::as_str)
            .collect()
    }

    pub fn record_local_access(&mut self, resource: &str, kind: AccessKind) {
        self.local_access_kinds.entry(resource.to_string()).or_default().insert(kind);
    }

    /// Kinds of the accesses to `resource` the body performs itself.
    pub fn local_access_kinds(&self) -> &BTreeMap<String, BTreeSet<AccessKind>> {
        &self.local_access_kinds
    }

    pub fn record_acquired_lock(&mut self, lock: KernelLock) {
        self.acquired_locks.insert(lock);
    }

    pub fn acquired_locks(&self) -> &BTreeSet<KernelLock> {
        &self.acquired_locks
    }

    pub fn call_information(&self, site: CallSite) -> Option<&[ArgumentBinding]> {
        self.call_information.get(&site).map(Vec::as_slice)
    }

    pub fn cache_call_information(&mut self, site: CallSite, bindings: Vec<ArgumentBinding>) {
        self.call_information.insert(site, bindings);
    }

    /// Whether nothing can ever flow into or out of this region.
    pub fn is_done_and_empty(&self) -> bool {
        self.is_resource_analysis_done && self.resource_accesses.is_empty()
    }
}
