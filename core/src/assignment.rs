// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Maps the registered worker fleet onto the model catalog.
//!
//! `assign` is a pure function over a snapshot of workers and the catalog:
//! it never mutates the registry itself, so it can be unit tested without a
//! running coordinator and re-run idempotently by `WorkerRegistry::rebalance`.

use crate::catalog::ModelCatalog;
use crate::error::WorkerId;
use crate::registry::WorkerRecord;
use std::collections::HashMap;

/// A single worker's resolved assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedModel {
    /// The model identifier assigned to this worker.
    pub model: String,
    /// This worker's performance group, 0 = the strongest group. Agrees
    /// with score order: a worker in a lower-numbered group never scores
    /// below a worker in a higher-numbered group.
    pub group_index: usize,
}

/// The full fleet assignment produced by one `assign` call.
#[derive(Debug, Clone, Default)]
pub struct AssignmentPlan {
    /// Per-worker resolved assignment.
    pub assignments: HashMap<WorkerId, AssignedModel>,
}

/// Compute a fleet-wide assignment: sort workers by score, carve them into
/// contiguous performance groups sized to the catalog, and hand each group
/// its model.
///
/// 1. Workers are sorted descending by performance score, ties broken by
///    worker ID ascending.
/// 2. `G` = catalog size. An empty catalog or empty fleet yields an empty
///    plan.
/// 3. Workers are partitioned into `min(G, N)` contiguous groups, sizes
///    `ceil(N/G)` for the first `N mod G` groups and `floor(N/G)` for the
///    rest, preserving sorted order — group 0 is the strongest contiguous
///    block. When `N <= G` every worker is its own group.
/// 4. The catalog is walked descending by complexity rank (ties: parameter
///    count descending, then identifier ascending) to pick one model per
///    group.
/// 5. Within each group, the single strongest worker (index 0 of the
///    group, since the fleet is already sorted) receives the group's
///    designated model, resolving intra-group selection deterministically
///    rather than randomly; see DESIGN.md.
/// 6. Every other worker left unassigned after step 5 receives a model via
///    round-robin over the *entire* catalog ordered ascending by parameter
///    count, indexed by that worker's position in the residual list.
pub fn assign(workers: &[WorkerRecord], catalog: &ModelCatalog) -> AssignmentPlan {
    let mut plan = AssignmentPlan::default();
    if workers.is_empty() || catalog.is_empty() {
        return plan;
    }

    let mut sorted: Vec<&WorkerRecord> = workers.iter().collect();
    sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.id.cmp(&b.id)));

    let n = sorted.len();
    let g = catalog.len();
    let group_count = n.min(g);

    let groups = partition_contiguous(n, group_count);

    let models_by_rank_desc: Vec<&str> = {
        let mut models: Vec<&crate::catalog::ModelDescriptor> = catalog.models().iter().collect();
        models.sort_by(|a, b| {
            b.complexity_rank
                .cmp(&a.complexity_rank)
                .then_with(|| b.parameters_b.partial_cmp(&a.parameters_b).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        models.iter().map(|m| m.identifier.as_str()).collect()
    };

    let mut residual: Vec<&WorkerRecord> = Vec::new();
    let mut cursor = 0usize;
    for (group_idx, size) in groups.into_iter().enumerate() {
        let members = &sorted[cursor..cursor + size];
        cursor += size;
        let model = models_by_rank_desc[group_idx].to_string();

        let (chief, rest) = members.split_first().expect("partition never yields empty groups");
        plan.assignments.insert(chief.id.clone(), AssignedModel { model, group_index: group_idx });
        residual.extend(rest.iter().copied());
    }

    if !residual.is_empty() {
        let models_by_params_asc: Vec<&str> = {
            let mut models: Vec<&crate::catalog::ModelDescriptor> = catalog.models().iter().collect();
            models.sort_by(|a, b| a.parameters_b.partial_cmp(&b.parameters_b).unwrap_or(std::cmp::Ordering::Equal));
            models.iter().map(|m| m.identifier.as_str()).collect()
        };
        for (i, worker) in residual.into_iter().enumerate() {
            let model = models_by_params_asc[i % models_by_params_asc.len()].to_string();
            // A round-robin worker still belongs to the contiguous group it
            // was partitioned into, for group-order invariants; recompute
            // which group this worker's sorted index falls in.
            let sorted_idx = sorted.iter().position(|w| w.id == worker.id).unwrap_or(0);
            let group_index = group_index_for(sorted_idx, n, group_count);
            plan.assignments.insert(worker.id.clone(), AssignedModel { model, group_index });
        }
    }

    plan
}

/// Sizes of `group_count` contiguous groups covering `n` items: the first
/// `n mod group_count` groups get `ceil(n/group_count)`, the rest get
/// `floor(n/group_count)`.
fn partition_contiguous(n: usize, group_count: usize) -> Vec<usize> {
    if group_count == 0 {
        return Vec::new();
    }
    let base = n / group_count;
    let remainder = n % group_count;
    (0..group_count).map(|i| base + usize::from(i < remainder)).collect()
}

/// Which contiguous group a sorted-order index falls into, given the same
/// partition `partition_contiguous` computed.
fn group_index_for(sorted_idx: usize, n: usize, group_count: usize) -> usize {
    let sizes = partition_contiguous(n, group_count);
    let mut cursor = 0usize;
    for (i, size) in sizes.iter().enumerate() {
        if sorted_idx < cursor + size {
            return i;
        }
        cursor += size;
    }
    group_count.saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::HardwareSpecs;

    fn worker(id: &str, score_ram: f64) -> WorkerRecord {
        let hw = HardwareSpecs {
            cpu_cores: 4,
            cpu_ghz: 2.5,
            ram_gb: score_ram,
            gpu_name: "Unknown GPU".to_string(),
            gpu_memory_gb: 0.0,
            os_name: "linux".to_string(),
        };
        WorkerRecord::new(id.to_string(), format!("{id}:1"), hw, vec![])
    }

    fn catalog(models: &[&str]) -> ModelCatalog {
        ModelCatalog::from_identifiers(models.iter().map(|s| s.to_string()))
    }

    #[test]
    fn empty_catalog_yields_empty_plan() {
        let workers = vec![worker("w1", 8.0)];
        let plan = assign(&workers, &ModelCatalog::default());
        assert!(plan.assignments.is_empty());
    }

    #[test]
    fn empty_fleet_yields_empty_plan() {
        let cat = catalog(&["llama3.2:1b"]);
        let plan = assign(&[], &cat);
        assert!(plan.assignments.is_empty());
    }

    #[test]
    fn two_workers_two_models_each_worker_is_own_group() {
        // A is the stronger worker and takes the heavy model, B the light one.
        let workers = vec![worker("a", 60.0), worker("b", 33.3)];
        let cat = catalog(&["llama3.2:1b", "llama3.1:70b"]);
        let plan = assign(&workers, &cat);
        assert_eq!(plan.assignments["a"].model, "llama3.1:70b");
        assert_eq!(plan.assignments["a"].group_index, 0);
        assert_eq!(plan.assignments["b"].model, "llama3.2:1b");
        assert_eq!(plan.assignments["b"].group_index, 1);
    }

    #[test]
    fn three_workers_two_models_residual_gets_lightest_by_round_robin() {
        // Groups: {A,B} size 2 (ceil(3/2)), {C} size 1. A (highest in group)
        // gets large-8B, B is residual and round-robins to the lightest model.
        let workers = vec![worker("a", 60.0), worker("b", 53.3), worker("c", 26.7)];
        let cat = catalog(&["llama3.2:1b", "llama3.1:8b"]);
        let plan = assign(&workers, &cat);
        assert_eq!(plan.assignments["a"].model, "llama3.1:8b");
        assert_eq!(plan.assignments["a"].group_index, 0);
        assert_eq!(plan.assignments["b"].model, "llama3.2:1b");
        assert_eq!(plan.assignments["b"].group_index, 0);
        assert_eq!(plan.assignments["c"].model, "llama3.2:1b");
        assert_eq!(plan.assignments["c"].group_index, 1);
    }

    #[test]
    fn group_index_order_agrees_with_score_order() {
        let workers = vec![worker("a", 66.7), worker("b", 40.0), worker("c", 6.7), worker("d", 0.0)];
        let cat = catalog(&["llama3.2:1b", "llama3.1:8b"]);
        let plan = assign(&workers, &cat);
        for (hi, lo) in [("a", "b"), ("a", "c"), ("a", "d"), ("b", "c"), ("b", "d"), ("c", "d")] {
            assert!(plan.assignments[hi].group_index <= plan.assignments[lo].group_index);
        }
    }

    #[test]
    fn surplus_models_are_left_unassigned() {
        let workers = vec![worker("solo", 50.0)];
        let cat = catalog(&["llama3.2:1b", "llama3.1:8b", "llama3.1:70b"]);
        let plan = assign(&workers, &cat);
        assert_eq!(plan.assignments.len(), 1);
        assert_eq!(plan.assignments["solo"].model, "llama3.1:70b");
        assert_eq!(plan.assignments["solo"].group_index, 0);
    }

    #[test]
    fn assignment_domain_equals_every_registered_worker() {
        let workers = vec![worker("a", 10.0), worker("b", 9.0), worker("c", 1.0), worker("d", 0.5)];
        let cat = catalog(&["llama3.2:1b"]);
        let plan = assign(&workers, &cat);
        assert_eq!(plan.assignments.len(), workers.len());
    }

    #[test]
    fn highest_scoring_worker_gets_max_complexity_model() {
        let workers = vec![worker("top", 100.0), worker("mid", 50.0), worker("low", 10.0)];
        let cat = catalog(&["llama3.2:1b", "llama3.1:8b", "llama3.1:70b"]);
        let plan = assign(&workers, &cat);
        let max_rank = cat.models().iter().map(|m| m.complexity_rank).max().unwrap();
        let top_model = &plan.assignments["top"].model;
        assert_eq!(cat.get(top_model).unwrap().complexity_rank, max_rank);
    }
}
