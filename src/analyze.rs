//! Plan analyzer (A): walks the tree computing exclusive cost/duration,
//! planner estimate error, parallel-awareness, and outlier tags.
//!
//! The three running maxima are owned by a stack-local `Accumulators`
//! created fresh on every call, never a struct field — the source
//! implementation this crate's design is grounded on kept them as
//! instance fields, which is unsound under concurrent or repeated use.

use crate::model::{EstimateDirection, Node, Plan};

#[derive(Default)]
struct Accumulators {
    max_rows: f64,
    max_cost: f64,
    max_duration: f64,
}

impl Accumulators {
    fn observe(&mut self, rows: Option<f64>, cost: Option<f64>, duration: Option<f64>) {
        if let Some(r) = rows {
            if r > self.max_rows {
                self.max_rows = r;
            }
        }
        if let Some(c) = cost {
            if c > self.max_cost {
                self.max_cost = c;
            }
        }
        if let Some(d) = duration {
            if d > self.max_duration {
                self.max_duration = d;
            }
        }
    }
}

/// Sum of every non-InitPlan descendant's (already-exclusive) `Actual
/// Duration`, at all depths — not just direct children. `Actual Total Time`
/// is cumulative/inclusive of a node's whole subtree, so peeling a node's
/// own exclusive time off its parent's raw total requires subtracting the
/// full inclusive time of each child subtree, which by telescoping equals
/// the sum of every descendant's exclusive duration.
fn sum_exclusive_descendant_durations(node: &Node) -> f64 {
    node.plans
        .iter()
        .filter(|child| !child.is_init_plan())
        .map(|child| child.actual_duration.unwrap_or(0.0) + sum_exclusive_descendant_durations(child))
        .sum()
}

fn walk(node: &mut Node, parallel: bool, acc: &mut Accumulators) {
    if let (Some(plan_rows), Some(actual_rows)) = (node.plan_rows, node.actual_rows) {
        if actual_rows != 0.0 {
            let ratio = actual_rows / plan_rows;
            #[allow(clippy::comparison_chain)]
            if ratio > 1.0 {
                node.planner_estimate_direction = Some(EstimateDirection::Under);
                node.planner_estimate_factor = Some(ratio);
            } else if ratio < 1.0 {
                node.planner_estimate_direction = Some(EstimateDirection::Over);
                node.planner_estimate_factor = Some(plan_rows / actual_rows);
            } else {
                node.planner_estimate_direction = Some(EstimateDirection::None);
                node.planner_estimate_factor = Some(ratio);
            }
            tracing::trace!(
                node_type = ?node.node_type,
                direction = ?node.planner_estimate_direction,
                factor = ?node.planner_estimate_factor,
                "computed planner estimate"
            );
        }
    }

    let is_parallel = parallel || node.node_type.as_deref().is_some_and(|t| t.contains("Gather"));
    for child in node.plans.iter_mut() {
        walk(child, is_parallel, acc);
    }

    if let Some(actual_total_time) = node.actual_total_time {
        let mut duration = actual_total_time;
        if parallel {
            let loops = node.actual_loops.unwrap_or(0.0);
            node.parallel = Some(loops > 1.0);
        } else {
            duration *= node.actual_loops.unwrap_or(1.0);
        }
        duration -= sum_exclusive_descendant_durations(node);
        node.actual_duration = Some(duration);
    }

    if let Some(total_cost) = node.total_cost {
        let mut cost = total_cost;
        for child in &node.plans {
            if !child.is_init_plan() {
                if let Some(child_cost) = child.total_cost {
                    cost -= child_cost;
                }
            }
        }
        node.actual_cost = Some(cost.max(0.0));
    }

    acc.observe(node.actual_rows, node.actual_cost, node.actual_duration);
}

fn tag_outliers(node: &mut Node, acc: &Accumulators) {
    node.costliest_node = (node.actual_cost == Some(acc.max_cost)).then_some(true);
    node.largest_node = (node.actual_rows == Some(acc.max_rows) && node.actual_rows != Some(0.0)).then_some(true);
    node.slowest_node = (node.actual_duration == Some(acc.max_duration)).then_some(true);
    for child in node.plans.iter_mut() {
        tag_outliers(child, acc);
    }
}

/// Annotates `plan.content.Plan` in place with derived metrics and outlier
/// tags. Accumulators are scoped to this single call.
pub fn analyze(plan: &mut Plan) {
    let mut acc = Accumulators::default();
    walk(&mut plan.content.plan, false, &mut acc);

    plan.content.maximum_rows = Some(acc.max_rows);
    plan.content.maximum_costs = Some(acc.max_cost);
    plan.content.maximum_duration = Some(acc.max_duration);

    tracing::debug!(
        max_rows = acc.max_rows,
        max_cost = acc.max_cost,
        max_duration = acc.max_duration,
        "analysis complete"
    );

    tag_outliers(&mut plan.content.plan, &acc);
}
