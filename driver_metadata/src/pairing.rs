// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Decide which entry points the kernel may run concurrently.

use crate::entry_point::{EntryPoint, EntryPointPair};
use crate::kernel_api::{ApiClasses, EXCLUSIVE_CLASSES, ModuleApi};
use std::collections::BTreeSet;
use tracing::trace;

/// All pairs of `entry_points` that may run concurrently. Self pairs are
/// included, and each unordered pair appears once, ordered by catalog
/// position.
pub fn compute_pairs(entry_points: &[EntryPoint]) -> Vec<EntryPointPair> {
    let mut seen = BTreeSet::new();
    let mut pairs = Vec::new();
    for ep1 in entry_points {
        for ep2 in entry_points {
            if !can_be_paired(ep1, ep2) {
                continue;
            }
            let key = if ep1.name <= ep2.name { (&ep1.name, &ep2.name) } else { (&ep2.name, &ep1.name) };
            if seen.contains(&key) {
                continue;
            }
            if !can_run_concurrently(ep1, ep2) {
                trace!(ep1 = %ep1.name, ep2 = %ep2.name, "serialised");
                continue;
            }
            seen.insert(key);
            pairs.push(EntryPointPair::new(&ep1.name, &ep2.name));
        }
    }
    pairs
}

/// Whether the pair is a meaningful combination of originals and clones.
///
/// A callback that runs with the network down (or takes it down) only meets
/// network callbacks through its clone; the original never does. Outside of
/// that situation clones take no part in pairing.
pub fn can_be_paired(ep1: &EntryPoint, ep2: &EntryPoint) -> bool {
    let is_network = |ep: &EntryPoint| ep.classes.contains(ApiClasses::NETWORK);
    if ep1.needs_network_clone() && is_network(ep2) {
        return ep1.is_clone;
    }
    if ep2.needs_network_clone() && is_network(ep1) {
        return ep2.is_clone;
    }
    !ep1.is_clone && !ep2.is_clone
}

/// Whether the kernel allows both callbacks to be in flight at once.
pub fn can_run_concurrently(ep1: &EntryPoint, ep2: &EntryPoint) -> bool {
    if ep1.is_init && ep2.is_init {
        return false;
    }
    if ep1.is_exit || ep2.is_exit {
        return false;
    }
    if ep1.classes.intersects(ep2.classes & EXCLUSIVE_CLASSES) {
        return false;
    }
    !is_serialised_by_module(ep1, ep2)
}

fn is_serialised_by_module(ep1: &EntryPoint, ep2: &EntryPoint) -> bool {
    if ep1.module != ep2.module {
        return false;
    }
    ep1.module.parse::<ModuleApi>().is_ok_and(|module| module.serialises(&ep1.api, &ep2.api))
}
