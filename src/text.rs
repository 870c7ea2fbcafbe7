//! Text plan parser (T): reconstructs a plan tree from PostgreSQL's
//! line-oriented `EXPLAIN` text output using a depth stack keyed by
//! indentation, since the format has no explicit closing tokens.

use serde_json::Value;

use crate::error::{ExplainError, Result};
use crate::lexicon::{BUFFERS_ATTR, BUFFER_PAIR, BUFFER_SEGMENT, CTE_LINE, EXTRA_LINE, NODE_LINE, SORT_ATTR, SUBPLAN_LINE, TRIGGER_LINE, WORKER_LINE};
use crate::model::{Node, ParentRelationship, PlanTree, Trigger, Worker};
use crate::util::{leading_ws, strip_csv_quotes, title_case};

/// A property harvested from a free-form attribute line, before it's
/// applied to whichever target (a node or a worker) actually owns it.
enum ExtraAttribute {
    Sort { method: String, space_type: String, space_used: i64 },
    Buffers(Vec<(String, i64)>),
    KeyValue(String, Value),
}

fn parse_sort_attribute(text: &str) -> Option<ExtraAttribute> {
    let caps = SORT_ATTR.captures(text)?;
    let space_used = caps["space_used"].parse().unwrap_or(0);
    Some(ExtraAttribute::Sort {
        method: caps["method"].to_string(),
        space_type: caps["space_type"].to_string(),
        space_used,
    })
}

fn parse_buffers_attribute(text: &str) -> Option<ExtraAttribute> {
    let caps = BUFFERS_ATTR.captures(text)?;
    let mut pairs = Vec::new();
    for segment in caps["rest"].split(", ") {
        let segment = segment.trim();
        if let Some(seg_caps) = BUFFER_SEGMENT.captures(segment) {
            let kind = title_case(&seg_caps["kind"]);
            for token in seg_caps["pairs"].split_whitespace() {
                let token = token.trim_end_matches(',');
                if let Some(pair_caps) = BUFFER_PAIR.captures(token) {
                    let method = title_case(&pair_caps["method"]);
                    let count: i64 = pair_caps["count"].parse().unwrap_or(0);
                    pairs.push((format!("{kind} {method} Blocks"), count));
                }
            }
        }
    }
    Some(ExtraAttribute::Buffers(pairs))
}

fn parse_key_value_attribute(text: &str) -> Option<ExtraAttribute> {
    let (label, value) = text.split_once(": ")?;
    let (label, value) = (label.trim(), value.trim());
    if label.is_empty() || value.is_empty() {
        return None;
    }
    let value = value.strip_suffix(" ms").unwrap_or(value);
    let key = title_case(label);
    let json_value = match value.parse::<f64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::from(value),
    };
    Some(ExtraAttribute::KeyValue(key, json_value))
}

/// Node/root extra-line interpretation: sort, then buffers, then a raw
/// `(label, value)` split.
fn parse_extra_attribute(text: &str) -> Option<ExtraAttribute> {
    parse_sort_attribute(text).or_else(|| parse_buffers_attribute(text)).or_else(|| parse_key_value_attribute(text))
}

/// Worker trailing-remainder interpretation: only a sort probe, then a raw
/// `(label, value)` split — the buffers probe is node/root-only.
fn parse_worker_extra_attribute(text: &str) -> Option<ExtraAttribute> {
    parse_sort_attribute(text).or_else(|| parse_key_value_attribute(text))
}

fn apply_attribute_to_node(node: &mut Node, attr: ExtraAttribute) {
    match attr {
        ExtraAttribute::Sort { method, space_type, space_used } => {
            node.sort_method = Some(method);
            node.sort_space_type = Some(space_type);
            node.sort_space_used = Some(space_used);
        }
        ExtraAttribute::Buffers(pairs) => {
            for (key, count) in pairs {
                node.extra.insert(key, Value::from(count));
            }
        }
        ExtraAttribute::KeyValue(key, value) => {
            node.extra.insert(key, value);
        }
    }
}

fn apply_attribute_to_worker(worker: &mut Worker, attr: ExtraAttribute) {
    match attr {
        ExtraAttribute::Sort { method, space_type, space_used } => {
            worker.extra.insert("Sort Method".to_string(), Value::from(method));
            worker.extra.insert("Sort Space Type".to_string(), Value::from(space_type));
            worker.extra.insert("Sort Space Used".to_string(), Value::from(space_used));
        }
        ExtraAttribute::Buffers(pairs) => {
            for (key, count) in pairs {
                worker.extra.insert(key, Value::from(count));
            }
        }
        ExtraAttribute::KeyValue(key, value) => {
            worker.extra.insert(key, value);
        }
    }
}

#[derive(Clone)]
enum Relation {
    SubPlan(String),
    InitPlan(String),
}

/// One entry on the depth stack. `owner_path` is the path (from the root
/// node) to the node that owns whatever attaches under this entry: for a
/// node-line entry that's the node itself; for a marker entry it's the
/// enclosing node, since markers don't create a new nesting level of their
/// own, just annotate the next node line.
struct Frame {
    prefix_len: usize,
    owner_path: Vec<usize>,
    relation: Option<Relation>,
}

fn node_at_mut<'a>(root: &'a mut Node, path: &[usize]) -> &'a mut Node {
    let mut node = root;
    for &i in path {
        node = &mut node.plans[i];
    }
    node
}

fn build_node_from_captures(caps: &regex::Captures) -> Node {
    let mut node = Node::new(caps["node_type"].trim());
    node.startup_cost = caps["startup_cost"].parse().ok();
    node.total_cost = caps["total_cost"].parse().ok();
    node.plan_rows = caps["plan_rows"].parse().ok();
    node.plan_width = caps["plan_width"].parse().ok();

    if caps.name("never_executed").is_some() {
        node.actual_loops = Some(0.0);
        node.actual_rows = Some(0.0);
        node.actual_total_time = Some(0.0);
    } else if let Some(actual_rows) = caps.name("actual_rows") {
        node.actual_startup_time = caps.name("actual_startup").and_then(|m| m.as_str().parse().ok());
        node.actual_total_time = caps.name("actual_total").and_then(|m| m.as_str().parse().ok());
        node.actual_rows = actual_rows.as_str().parse().ok();
        node.actual_loops = caps.name("actual_loops").and_then(|m| m.as_str().parse().ok());
    } else if let Some(actual_rows2) = caps.name("actual_rows2") {
        node.actual_rows = actual_rows2.as_str().parse().ok();
        node.actual_loops = caps.name("actual_loops2").and_then(|m| m.as_str().parse().ok());
    }

    node
}

fn build_worker_from_captures(caps: &regex::Captures) -> (Worker, String) {
    let mut worker = Worker::default();
    worker.worker_number = caps["number"].parse().ok();

    if caps.name("never_executed").is_some() {
        worker.actual_loops = Some(0.0);
        worker.actual_rows = Some(0.0);
        worker.actual_total_time = Some(0.0);
    } else if let Some(actual_rows) = caps.name("actual_rows") {
        worker.actual_startup_time = caps.name("actual_startup").and_then(|m| m.as_str().parse().ok());
        worker.actual_total_time = caps.name("actual_total").and_then(|m| m.as_str().parse().ok());
        worker.actual_rows = actual_rows.as_str().parse().ok();
        worker.actual_loops = caps.name("actual_loops").and_then(|m| m.as_str().parse().ok());
    } else if let Some(actual_rows2) = caps.name("actual_rows2") {
        worker.actual_rows = actual_rows2.as_str().parse().ok();
        worker.actual_loops = caps.name("actual_loops2").and_then(|m| m.as_str().parse().ok());
    }

    (worker, caps["rest"].to_string())
}

/// Parses PostgreSQL's default (non-JSON) `EXPLAIN` text output.
pub fn from_text(source: &str) -> Result<PlanTree> {
    let mut root: Option<Node> = None;
    let mut triggers: Option<Vec<Trigger>> = None;
    let mut stack: Vec<Frame> = Vec::new();

    for raw_line in source.lines() {
        let line = strip_csv_quotes(raw_line);
        if line.trim().is_empty() {
            continue;
        }

        if let Some(caps) = NODE_LINE.captures(line) {
            let prefix_len = leading_ws(line);
            while matches!(stack.last(), Some(top) if top.prefix_len >= prefix_len) {
                stack.pop();
            }
            let mut node = build_node_from_captures(&caps);
            tracing::trace!(pattern = "node", node_type = ?node.node_type, "classified line");

            match stack.last() {
                None => {
                    stack.push(Frame { prefix_len, owner_path: Vec::new(), relation: None });
                    root = Some(node);
                }
                Some(top) => {
                    match &top.relation {
                        Some(Relation::SubPlan(name)) => {
                            node.parent_relationship = Some(ParentRelationship::SubPlan);
                            node.subplan_name = Some(name.clone());
                        }
                        Some(Relation::InitPlan(name)) => {
                            node.parent_relationship = Some(ParentRelationship::InitPlan);
                            node.subplan_name = Some(name.clone());
                        }
                        None => {}
                    }
                    let owner_path = top.owner_path.clone();
                    let root_mut = root.as_mut().expect("root exists once stack is non-empty");
                    let owner = node_at_mut(root_mut, &owner_path);
                    owner.plans.push(node);
                    let mut new_path = owner_path;
                    new_path.push(owner.plans.len() - 1);
                    stack.push(Frame { prefix_len, owner_path: new_path, relation: None });
                }
            }
            continue;
        }

        if let Some(caps) = SUBPLAN_LINE.captures(line) {
            let prefix_len = leading_ws(line);
            while matches!(stack.last(), Some(top) if top.prefix_len >= prefix_len) {
                stack.pop();
            }
            let owner_path = stack.last().map(|f| f.owner_path.clone()).unwrap_or_default();
            let name = line.trim().to_string();
            let relation = if &caps["kind"] == "SubPlan" {
                Relation::SubPlan(name)
            } else {
                Relation::InitPlan(name)
            };
            tracing::trace!(pattern = "subplan_marker", "classified line");
            stack.push(Frame { prefix_len, owner_path, relation: Some(relation) });
            continue;
        }

        if let Some(caps) = CTE_LINE.captures(line) {
            let prefix_len = leading_ws(line);
            while matches!(stack.last(), Some(top) if top.prefix_len >= prefix_len) {
                stack.pop();
            }
            let owner_path = stack.last().map(|f| f.owner_path.clone()).unwrap_or_default();
            let name = format!("CTE {}", &caps["name"]);
            tracing::trace!(pattern = "cte_marker", name = %name, "classified line");
            stack.push(Frame { prefix_len, owner_path, relation: Some(Relation::InitPlan(name)) });
            continue;
        }

        if let Some(caps) = WORKER_LINE.captures(line) {
            tracing::trace!(pattern = "worker", "classified line");
            let (mut worker, rest) = build_worker_from_captures(&caps);
            if let Some(root_mut) = root.as_mut() {
                let owner_path = stack.last().map(|f| f.owner_path.clone()).unwrap_or_default();
                let owner = node_at_mut(root_mut, &owner_path);
                let number = worker.worker_number;
                let existing = owner.workers.iter_mut().find(|w| w.worker_number == number && number.is_some());
                if let Some(existing) = existing {
                    if worker.actual_startup_time.is_some() {
                        existing.actual_startup_time = worker.actual_startup_time;
                    }
                    if worker.actual_total_time.is_some() {
                        existing.actual_total_time = worker.actual_total_time;
                    }
                    if worker.actual_rows.is_some() {
                        existing.actual_rows = worker.actual_rows;
                    }
                    if worker.actual_loops.is_some() {
                        existing.actual_loops = worker.actual_loops;
                    }
                    if !rest.is_empty() {
                        if let Some(attr) = parse_worker_extra_attribute(&rest) {
                            apply_attribute_to_worker(existing, attr);
                        }
                    }
                } else {
                    if !rest.is_empty() {
                        if let Some(attr) = parse_worker_extra_attribute(&rest) {
                            apply_attribute_to_worker(&mut worker, attr);
                        }
                    }
                    owner.workers.push(worker);
                }
            }
            continue;
        }

        if let Some(caps) = TRIGGER_LINE.captures(line) {
            tracing::trace!(pattern = "trigger", "classified line");
            let time_ms: f64 = caps["time"].parse().unwrap_or(0.0);
            let trigger = Trigger {
                trigger_name: Some(caps["name"].trim().to_string()),
                time: Some(time_ms),
                calls: Some(caps["calls"].to_string()),
            };
            triggers.get_or_insert_with(Vec::new).push(trigger);
            continue;
        }

        if let Some(caps) = EXTRA_LINE.captures(line) {
            let content = &caps["content"];
            tracing::trace!(pattern = "extra", content = %content, "classified line");
            match parse_extra_attribute(content) {
                Some(attr) => {
                    if let Some(root_mut) = root.as_mut() {
                        let owner_path = stack.last().map(|f| f.owner_path.clone()).unwrap_or_default();
                        let owner = node_at_mut(root_mut, &owner_path);
                        apply_attribute_to_node(owner, attr);
                    }
                    // `root.is_none()` here means the stack is empty and no
                    // node has been seen yet; there is nowhere sensible to
                    // attach a root-level extra property, so it's dropped.
                }
                None => {
                    tracing::warn!(content = %content, "extra line did not yield a usable label/value pair");
                }
            }
            continue;
        }
    }

    match root {
        Some(plan) => Ok(PlanTree {
            plan,
            triggers,
            maximum_rows: None,
            maximum_costs: None,
            maximum_duration: None,
        }),
        None => Err(ExplainError::parse("Unable to parse plan".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_node_with_full_actual_stats() {
        let tree = from_text(
            "Seq Scan on t  (cost=0.00..10.00 rows=100 width=4) (actual time=0.1..2.0 rows=150 loops=1)",
        )
        .unwrap();
        assert_eq!(tree.plan.node_type.as_deref(), Some("Seq Scan on t"));
        assert_eq!(tree.plan.plan_rows, Some(100.0));
        assert_eq!(tree.plan.actual_rows, Some(150.0));
    }

    #[test]
    fn parses_nested_children_via_indentation() {
        let text = "\
Hash Join  (cost=1.00..2.00 rows=1 width=1) (actual time=0.1..0.2 rows=1 loops=1)
  ->  Seq Scan on a  (cost=0.00..1.00 rows=1 width=1) (actual time=0.01..0.02 rows=1 loops=1)
  ->  Hash  (cost=0.00..1.00 rows=1 width=1) (actual time=0.01..0.02 rows=1 loops=1)
        ->  Seq Scan on b  (cost=0.00..1.00 rows=1 width=1) (actual time=0.01..0.01 rows=1 loops=1)
";
        let tree = from_text(text).unwrap();
        assert_eq!(tree.plan.plans.len(), 2);
        assert_eq!(tree.plan.plans[1].plans.len(), 1);
        assert_eq!(tree.plan.plans[1].plans[0].node_type.as_deref(), Some("Seq Scan on b"));
    }

    #[test]
    fn subplan_marker_tags_parent_relationship() {
        let text = "\
Seq Scan on t  (cost=0.00..10.00 rows=1 width=1)
  SubPlan 1
    ->  Seq Scan on u  (cost=0.00..1.00 rows=1 width=1)
";
        let tree = from_text(text).unwrap();
        let child = &tree.plan.plans[0];
        assert_eq!(child.parent_relationship, Some(ParentRelationship::SubPlan));
        assert_eq!(child.subplan_name.as_deref(), Some("SubPlan 1"));
    }

    #[test]
    fn cte_marker_tags_initplan_relationship() {
        let text = "\
Seq Scan on t  (cost=0.00..10.00 rows=1 width=1)
  CTE foo
    ->  Seq Scan on u  (cost=0.00..1.00 rows=1 width=1)
";
        let tree = from_text(text).unwrap();
        let child = &tree.plan.plans[0];
        assert_eq!(child.parent_relationship, Some(ParentRelationship::InitPlan));
        assert_eq!(child.subplan_name.as_deref(), Some("CTE foo"));
    }

    #[test]
    fn plain_child_under_a_node_carries_no_relationship() {
        let text = "\
Hash Join  (cost=1.00..2.00 rows=1 width=1)
  ->  Seq Scan on a  (cost=0.00..1.00 rows=1 width=1)
";
        let tree = from_text(text).unwrap();
        assert_eq!(tree.plan.plans[0].parent_relationship, None);
    }

    #[test]
    fn never_executed_node_has_zeroed_actuals() {
        let text = "\
Hash Join  (cost=1.00..2.00 rows=1 width=1) (actual time=0.1..0.2 rows=0 loops=1)
  ->  Seq Scan on a  (cost=0.00..1.00 rows=1 width=1) (never executed)
";
        let tree = from_text(text).unwrap();
        let child = &tree.plan.plans[0];
        assert_eq!(child.actual_loops, Some(0.0));
        assert_eq!(child.actual_rows, Some(0.0));
        assert_eq!(child.actual_total_time, Some(0.0));
        assert_eq!(child.planner_estimate_direction, None);
    }

    #[test]
    fn worker_line_attaches_to_top_of_stack_node() {
        let text = "\
Gather  (cost=1.00..2.00 rows=1 width=1) (actual time=0.1..0.2 rows=1 loops=1)
  Workers Planned: 2
  ->  Seq Scan on a  (cost=0.00..1.00 rows=1 width=1) (actual time=0.01..0.02 rows=1 loops=1)
        Worker 0:  actual time=0.01..0.02 rows=1 loops=1
";
        let tree = from_text(text).unwrap();
        let scan = &tree.plan.plans[0];
        assert_eq!(scan.workers.len(), 1);
        assert_eq!(scan.workers[0].worker_number, Some(0));
    }

    #[test]
    fn worker_sort_attribute_lands_in_extra_map() {
        let text = "\
Gather  (cost=1.00..2.00 rows=1 width=1) (actual time=0.1..0.2 rows=1 loops=1)
  ->  Sort  (cost=0.00..1.00 rows=1 width=1) (actual time=0.01..0.02 rows=1 loops=1)
        Worker 0:  actual time=0.01..0.02 rows=1 loops=1 Sort Method: quicksort  Memory: 25kB
";
        let tree = from_text(text).unwrap();
        let sort = &tree.plan.plans[0];
        let worker = &sort.workers[0];
        assert_eq!(worker.extra.get("Sort Method").and_then(|v| v.as_str()), Some("quicksort"));
        assert_eq!(worker.extra.get("Sort Space Type").and_then(|v| v.as_str()), Some("Memory"));
    }

    #[test]
    fn worker_buffers_remainder_is_stored_verbatim_not_decomposed() {
        let text = "\
Gather  (cost=1.00..2.00 rows=1 width=1) (actual time=0.1..0.2 rows=1 loops=1)
  ->  Seq Scan on a  (cost=0.00..1.00 rows=1 width=1) (actual time=0.01..0.02 rows=1 loops=1)
        Worker 0:  actual time=0.01..0.02 rows=1 loops=1 Buffers: shared hit=10 read=2
";
        let tree = from_text(text).unwrap();
        let scan = &tree.plan.plans[0];
        let worker = &scan.workers[0];
        assert_eq!(worker.extra.get("Buffers").and_then(|v| v.as_str()), Some("shared hit=10 read=2"));
        assert!(worker.extra.get("Shared Hit Blocks").is_none());
    }

    #[test]
    fn trigger_line_parses_time_and_preserves_calls_as_string() {
        let text = "\
Seq Scan on t  (cost=0.00..1.00 rows=1 width=1)
Trigger my_trigger: time=1.234 calls=7
";
        let tree = from_text(text).unwrap();
        let triggers = tree.triggers.unwrap();
        assert_eq!(triggers[0].trigger_name.as_deref(), Some("my_trigger"));
        assert_eq!(triggers[0].time, Some(1.234));
        assert_eq!(triggers[0].calls.as_deref(), Some("7"));
        assert_eq!(triggers[0].calls_as_u64(), Some(7));
    }

    #[test]
    fn sort_attribute_sets_typed_node_fields() {
        let text = "\
Sort  (cost=1.00..2.00 rows=1 width=1) (actual time=0.1..0.2 rows=1 loops=1)
  Sort Method: quicksort  Memory: 25kB
";
        let tree = from_text(text).unwrap();
        assert_eq!(tree.plan.sort_method.as_deref(), Some("quicksort"));
        assert_eq!(tree.plan.sort_space_type.as_deref(), Some("Memory"));
        assert_eq!(tree.plan.sort_space_used, Some(25));
    }

    #[test]
    fn buffers_attribute_composes_titlecased_keys() {
        let text = "\
Seq Scan on t  (cost=0.00..1.00 rows=1 width=1) (actual time=0.1..0.2 rows=1 loops=1)
  Buffers: shared hit=10 read=2, temp written=1
";
        let tree = from_text(text).unwrap();
        assert_eq!(tree.plan.extra.get("Shared Hit Blocks").and_then(|v| v.as_i64()), Some(10));
        assert_eq!(tree.plan.extra.get("Shared Read Blocks").and_then(|v| v.as_i64()), Some(2));
        assert_eq!(tree.plan.extra.get("Temp Written Blocks").and_then(|v| v.as_i64()), Some(1));
    }

    #[test]
    fn generic_extra_line_parses_numeric_and_string_values() {
        let text = "\
Seq Scan on t  (cost=0.00..1.00 rows=1 width=1)
  Planning Time: 0.123 ms
  Filter: (a = 1)
";
        let tree = from_text(text).unwrap();
        assert_eq!(tree.plan.extra.get("Planning Time").and_then(|v| v.as_f64()), Some(0.123));
        assert_eq!(tree.plan.extra.get("Filter").and_then(|v| v.as_str()), Some("(a = 1)"));
    }

    #[test]
    fn empty_source_is_a_parse_error() {
        let err = from_text("").unwrap_err();
        assert!(matches!(err, ExplainError::Parse(_)));
    }
}
