//! Public facade (F): turns a raw query string plus a parsed `PlanTree`
//! into the full `Plan` envelope, running the analyzer over it.

use crate::analyze;
use crate::model::{Plan, PlanTree};
use chrono::Utc;
use serde_json::Map;

const PLAN_ID_PREFIX: &str = "plan";

/// Collapses interior runs of two-or-more whitespace characters in `query`
/// down to a single space, leaving leading and trailing whitespace alone.
///
/// The source behavior this mirrors is a regex with a negative lookahead
/// (`(?!$)`) excluding the trailing run; the `regex` crate has no lookahead
/// support, so this scans runs directly instead.
pub fn collapse_query_whitespace(query: &str) -> String {
    let bytes: Vec<char> = query.chars().collect();
    let len = bytes.len();
    let mut out = String::with_capacity(query.len());
    let mut i = 0;
    while i < len {
        let c = bytes[i];
        if c.is_whitespace() {
            let start = i;
            while i < len && bytes[i].is_whitespace() {
                i += 1;
            }
            let run_len = i - start;
            let is_interior = start > 0 && i < len;
            if is_interior && run_len >= 2 {
                out.push(' ');
            } else {
                out.extend(&bytes[start..i]);
            }
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}

fn default_name(now: chrono::DateTime<Utc>) -> String {
    format!("plan created on {}", now.to_rfc3339())
}

/// Builds the full `Plan` envelope around `tree`, running the analyzer and
/// filling in an id/name/timestamp when the caller doesn't supply one.
pub fn create_plan(tree: PlanTree, query: &str, name: Option<String>) -> Plan {
    let now = Utc::now();
    let id = format!("{PLAN_ID_PREFIX}{}", now.timestamp_millis());
    let name = name.unwrap_or_else(|| default_name(now));
    let query = collapse_query_whitespace(query);

    let mut plan = Plan {
        id,
        name,
        created_on: now,
        content: tree,
        query,
        plan_stats: Map::new(),
    };

    analyze::analyze(&mut plan);
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;

    #[test]
    fn collapses_interior_whitespace_runs() {
        assert_eq!(collapse_query_whitespace("select  *    from t"), "select * from t");
    }

    #[test]
    fn leaves_single_spaces_alone() {
        assert_eq!(collapse_query_whitespace("select * from t"), "select * from t");
    }

    #[test]
    fn preserves_leading_and_trailing_whitespace() {
        assert_eq!(collapse_query_whitespace("  select *  "), "  select *  ");
    }

    #[test]
    fn collapse_is_idempotent() {
        let q = "select   *\t\tfrom   t  where a =   1";
        let once = collapse_query_whitespace(q);
        let twice = collapse_query_whitespace(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn create_plan_defaults_name_and_runs_analysis() {
        let mut root = Node::new("Seq Scan on t");
        root.plan_rows = Some(10.0);
        root.actual_rows = Some(20.0);
        let tree = PlanTree { plan: root, triggers: None, maximum_rows: None, maximum_costs: None, maximum_duration: None };
        let plan = create_plan(tree, "select  *  from t", None);
        assert!(plan.name.starts_with("plan created on "));
        assert_eq!(plan.query, "select * from t");
        assert_eq!(plan.content.maximum_rows, Some(20.0));
    }

    #[test]
    fn create_plan_honors_explicit_name() {
        let root = Node::new("Seq Scan on t");
        let tree = PlanTree { plan: root, triggers: None, maximum_rows: None, maximum_costs: None, maximum_duration: None };
        let plan = create_plan(tree, "select 1", Some("my plan".to_string()));
        assert_eq!(plan.name, "my plan");
    }

    #[test]
    fn create_plan_id_has_no_separator_between_prefix_and_timestamp() {
        let root = Node::new("Seq Scan on t");
        let tree = PlanTree { plan: root, triggers: None, maximum_rows: None, maximum_costs: None, maximum_duration: None };
        let plan = create_plan(tree, "select 1", None);
        let suffix = plan.id.strip_prefix(PLAN_ID_PREFIX).expect("id starts with the plan tag");
        assert!(!suffix.starts_with('-'));
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }
}
