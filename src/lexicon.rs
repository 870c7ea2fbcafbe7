//! The line-shape patterns the text parser tests, in match order. Compiled
//! once and shared across calls: all of them are stateless and `Sync`.

use once_cell::sync::Lazy;
use regex::Regex;

pub static NODE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^(?:\s*->\s*|\s*)
        (?P<node_type>\S.*?)
        \s+\(cost=(?P<startup_cost>\d+\.\d+)\.\.(?P<total_cost>\d+\.\d+)
        \s+rows=(?P<plan_rows>\d+)
        \s+width=(?P<plan_width>\d+)\)
        (?:\s+\(
            (?:actual\ time=(?P<actual_startup>\d+\.\d+)\.\.(?P<actual_total>\d+\.\d+)
               \s+rows=(?P<actual_rows>\d+)\s+loops=(?P<actual_loops>\d+)
             |actual\ rows=(?P<actual_rows2>\d+)\s+loops=(?P<actual_loops2>\d+)
             |(?P<never_executed>never\ executed)
            )
        \))?
        \s*$
        ",
    )
    .expect("NODE_LINE regex is valid")
});

pub static SUBPLAN_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<indent>\s*)(?P<kind>SubPlan|InitPlan)\s*(?:\d+\s*)?(?:\(returns.*\))?\s*$")
        .expect("SUBPLAN_LINE regex is valid")
});

pub static CTE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<indent>\s*)CTE\s+(?P<name>\S+)\s*$").expect("CTE_LINE regex is valid"));

pub static WORKER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^(?P<indent>\s*)Worker\s+(?P<number>\d+):\s+
        (?:
            actual\ time=(?P<actual_startup>\d+\.\d+)\.\.(?P<actual_total>\d+\.\d+)
               \s+rows=(?P<actual_rows>\d+)\s+loops=(?P<actual_loops>\d+)
          | actual\ rows=(?P<actual_rows2>\d+)\s+loops=(?P<actual_loops2>\d+)
          | (?P<never_executed>never\ executed)
        )?
        \s*(?P<rest>.*?)\s*$
        ",
    )
    .expect("WORKER_LINE regex is valid")
});

pub static TRIGGER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<indent>\s*)Trigger\s+(?P<name>.*):\s+time=(?P<time>\d+\.\d+)\s+calls=(?P<calls>\d+)\s*$")
        .expect("TRIGGER_LINE regex is valid")
});

pub static EXTRA_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<indent>\s*)(?P<content>\S(?:.*\S)?)\s*$").expect("EXTRA_LINE regex is valid"));

pub static SORT_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*Sort Method:\s+(?P<method>.*)\s+(?P<space_type>Memory|Disk):\s+(?P<space_used>\S*)kB\s*$")
        .expect("SORT_ATTR regex is valid")
});

pub static BUFFERS_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Buffers:\s+(?P<rest>.*)\s*$").expect("BUFFERS_ATTR regex is valid"));

pub static BUFFER_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<kind>shared|temp|local)\s+(?P<pairs>.*)$").expect("BUFFER_SEGMENT regex is valid"));

pub static BUFFER_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<method>\w+)=(?P<count>\d+)$").expect("BUFFER_PAIR regex is valid"));

/// A bracketed JSON block on its own lines, used both by the dispatcher (to
/// decide text vs. JSON) and by the JSON merger (to trim surrounding noise).
pub static BLOCK_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<indent>\s*)(?P<open>[\[{])\s*$").expect("BLOCK_OPEN regex is valid"));

/// Trailing `psql` line-continuation marker.
pub static TRAILING_PLUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\+\s*$").expect("TRAILING_PLUS regex is valid"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_line_matches_with_full_actual_time() {
        let caps = NODE_LINE
            .captures("Seq Scan on t  (cost=0.00..10.00 rows=100 width=4) (actual time=0.1..2.0 rows=150 loops=1)")
            .unwrap();
        assert_eq!(&caps["node_type"], "Seq Scan on t");
        assert_eq!(&caps["plan_rows"], "100");
        assert_eq!(&caps["actual_rows"], "150");
    }

    #[test]
    fn node_line_matches_with_arrow_prefix() {
        let caps = NODE_LINE
            .captures("  ->  Hash Join  (cost=1.00..2.00 rows=1 width=1)")
            .unwrap();
        assert_eq!(&caps["node_type"], "Hash Join");
    }

    #[test]
    fn node_line_matches_never_executed() {
        let caps = NODE_LINE
            .captures("  ->  Seq Scan on t  (cost=0.00..1.00 rows=1 width=1) (never executed)")
            .unwrap();
        assert!(caps.name("never_executed").is_some());
    }

    #[test]
    fn subplan_line_matches_with_number_and_returns() {
        let caps = SUBPLAN_LINE.captures("  SubPlan 1 (returns $0)").unwrap();
        assert_eq!(&caps["kind"], "SubPlan");
    }

    #[test]
    fn worker_line_splits_number_and_rest() {
        let caps = WORKER_LINE
            .captures("  Worker 0:  actual time=0.01..0.02 rows=5 loops=1 Sort Method: quicksort  Memory: 25kB")
            .unwrap();
        assert_eq!(&caps["number"], "0");
        assert_eq!(&caps["rest"], "Sort Method: quicksort  Memory: 25kB");
    }

    #[test]
    fn buffers_attr_splits_segments() {
        let caps = BUFFERS_ATTR.captures("Buffers: shared hit=10 read=2, temp written=1").unwrap();
        let rest = &caps["rest"];
        let segments: Vec<&str> = rest.split(", ").collect();
        assert_eq!(segments, vec!["shared hit=10 read=2", "temp written=1"]);
    }
}
