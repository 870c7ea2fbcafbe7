//! Streaming JSON merger (J). PostgreSQL's `EXPLAIN (FORMAT JSON)` output is
//! otherwise plain JSON, except that it sometimes repeats a key (notably
//! `Worker`) inside a single object — invalid JSON, but something callers
//! must tolerate. `serde_json`'s own parser drops the earlier occurrence, so
//! this module hand-rolls a small recursive-descent tokenizer whose object
//! parsing deep-merges a repeated key's value into the one already seen
//! instead of overwriting it.

use serde_json::{Map, Number, Value};

use crate::error::{ExplainError, Result};
use crate::lexicon::BLOCK_OPEN;
use crate::model::{Node, ParentRelationship, PlanTree, Trigger, Worker};

/// Scans for a line matching `^(\s*)([\[{])\s*$`, then the first subsequent
/// line matching `^<indent>([\]}])\s*$`. Returns the byte range of the
/// block including both marker lines, or `None` if no such block exists.
pub(crate) fn find_bracketed_block(text: &str) -> Option<(usize, usize)> {
    let mut offset = 0usize;
    let mut lines = Vec::new();
    for line in text.split_inclusive('\n') {
        lines.push((offset, line));
        offset += line.len();
    }

    for (i, (start, line)) in lines.iter().enumerate() {
        let trimmed_end = line.trim_end_matches(['\n', '\r']);
        if let Some(caps) = BLOCK_OPEN.captures(trimmed_end) {
            let indent = caps["indent"].to_string();
            let closing = if &caps["open"] == "[" { ']' } else { '}' };
            for (end_start, end_line) in &lines[i + 1..] {
                let end_trimmed = end_line.trim_end_matches(['\n', '\r']);
                if end_trimmed.len() >= indent.len()
                    && end_trimmed.starts_with(&indent)
                    && end_trimmed.len() - end_trimmed.trim_start().len() == indent.len()
                    && end_trimmed[indent.len()..].trim_end() == closing.to_string()
                {
                    let block_end = *end_start + end_line.len();
                    return Some((*start, block_end));
                }
            }
        }
    }
    None
}

/// Parses the bracketed block in `source` (trimming everything outside it)
/// into a single merged `Value`, tolerating duplicate object keys.
fn parse_merged_value(source: &str) -> Result<Value> {
    let (start, end) = find_bracketed_block(source).ok_or(ExplainError::no_json_block())?;
    let mut cursor = Cursor::new(&source[start..end]);
    cursor.skip_ws();
    let value = cursor.parse_value()?;
    cursor.skip_ws();
    Ok(value)
}

/// Deep-merges `b` into `a`: mapping keys are unioned (recursing when both
/// sides are mappings), sequences concatenate, everything else lets the
/// right-hand side win.
fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut am), Value::Object(bm)) => {
            for (k, v) in bm {
                let merged = match am.remove(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => v,
                };
                am.insert(k, merged);
            }
            Value::Object(am)
        }
        (Value::Array(mut aa), Value::Array(ba)) => {
            aa.extend(ba);
            Value::Array(aa)
        }
        (_, b) => b,
    }
}

struct Cursor<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Cursor {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        match self.bump() {
            Some(b) if b == byte => Ok(()),
            Some(b) => Err(ExplainError::json(format!(
                "expected '{}' at byte {}, found '{}'",
                byte as char,
                self.pos - 1,
                b as char
            ))),
            None => Err(ExplainError::json(format!("unexpected end of input, expected '{}'", byte as char))),
        }
    }

    fn parse_value(&mut self) -> Result<Value> {
        self.skip_ws();
        match self.peek() {
            Some(b'{') => self.parse_object(),
            Some(b'[') => self.parse_array(),
            Some(b'"') => Ok(Value::String(self.parse_string()?)),
            Some(b't') => self.parse_literal("true", Value::Bool(true)),
            Some(b'f') => self.parse_literal("false", Value::Bool(false)),
            Some(b'n') => self.parse_literal("null", Value::Null),
            Some(b'-') | Some(b'0'..=b'9') => self.parse_number(),
            Some(c) => Err(ExplainError::json(format!("unexpected character '{}' at byte {}", c as char, self.pos))),
            None => Err(ExplainError::json("unexpected end of input".to_string())),
        }
    }

    fn parse_literal(&mut self, literal: &str, value: Value) -> Result<Value> {
        if self.src[self.pos..].starts_with(literal) {
            self.pos += literal.len();
            Ok(value)
        } else {
            Err(ExplainError::json(format!("expected literal '{literal}' at byte {}", self.pos)))
        }
    }

    fn parse_object(&mut self) -> Result<Value> {
        self.expect(b'{')?;
        let mut map = Map::new();
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(Value::Object(map));
        }
        loop {
            self.skip_ws();
            let key = self.parse_string()?;
            self.skip_ws();
            self.expect(b':')?;
            let value = self.parse_value()?;
            if let Some(existing) = map.remove(&key) {
                tracing::debug!(key = %key, "merged duplicate JSON key");
                map.insert(key, deep_merge(existing, value));
            } else {
                map.insert(key, value);
            }
            self.skip_ws();
            match self.bump() {
                Some(b',') => continue,
                Some(b'}') => break,
                Some(b) => return Err(ExplainError::json(format!("expected ',' or '}}', found '{}'", b as char))),
                None => return Err(ExplainError::json("unexpected end of input in object".to_string())),
            }
        }
        Ok(Value::Object(map))
    }

    fn parse_array(&mut self) -> Result<Value> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(Value::Array(items));
        }
        loop {
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.bump() {
                Some(b',') => continue,
                Some(b']') => break,
                Some(b) => return Err(ExplainError::json(format!("expected ',' or ']', found '{}'", b as char))),
                None => return Err(ExplainError::json("unexpected end of input in array".to_string())),
            }
        }
        Ok(Value::Array(items))
    }

    fn parse_string(&mut self) -> Result<String> {
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(b'"') => return Ok(out),
                Some(b'\\') => match self.bump() {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'/') => out.push('/'),
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'r') => out.push('\r'),
                    Some(b'b') => out.push('\u{8}'),
                    Some(b'f') => out.push('\u{c}'),
                    Some(b'u') => {
                        let cp = self.parse_hex4()?;
                        out.push(char::from_u32(cp).unwrap_or('\u{FFFD}'));
                    }
                    Some(b) => return Err(ExplainError::json(format!("invalid escape '\\{}'", b as char))),
                    None => return Err(ExplainError::json("unexpected end of input in string escape".to_string())),
                },
                Some(b) if b < 0x80 => out.push(b as char),
                Some(_) => {
                    // multi-byte UTF-8: walk back one byte and decode the full
                    // codepoint from the source string directly.
                    let start = self.pos - 1;
                    let ch = self.src[start..].chars().next().expect("valid utf8 boundary");
                    self.pos = start + ch.len_utf8();
                    out.push(ch);
                }
                None => return Err(ExplainError::json("unterminated string".to_string())),
            }
        }
    }

    fn parse_hex4(&mut self) -> Result<u32> {
        if self.pos + 4 > self.bytes.len() {
            return Err(ExplainError::json("truncated \\u escape".to_string()));
        }
        let hex = &self.src[self.pos..self.pos + 4];
        let cp = u32::from_str_radix(hex, 16).map_err(|_| ExplainError::json(format!("invalid \\u escape '{hex}'")))?;
        self.pos += 4;
        Ok(cp)
    }

    fn parse_number(&mut self) -> Result<Value> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        let text = &self.src[start..self.pos];
        let number: Number = text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .ok_or_else(|| ExplainError::json(format!("invalid number literal '{text}'")))?;
        Ok(Value::Number(number))
    }
}

/// Parses PostgreSQL `EXPLAIN (FORMAT JSON)` output, merging duplicate keys.
pub fn from_json(source: &str) -> Result<PlanTree> {
    let value = parse_merged_value(source)?;
    let root = unwrap_array_root(value);
    value_to_plan_tree(&root)
}

fn unwrap_array_root(value: Value) -> Value {
    match value {
        Value::Array(mut items) if !items.is_empty() => items.remove(0),
        other => other,
    }
}

fn value_to_plan_tree(value: &Value) -> Result<PlanTree> {
    let obj = value
        .as_object()
        .ok_or_else(|| ExplainError::parse("JSON plan root is not an object".to_string()))?;
    let plan_value = obj
        .get("Plan")
        .ok_or_else(|| ExplainError::parse("Unable to parse plan".to_string()))?;
    let plan = value_to_node(plan_value);
    let triggers = obj.get("Triggers").and_then(|v| v.as_array()).map(|arr| arr.iter().map(value_to_trigger).collect());
    Ok(PlanTree {
        plan,
        triggers,
        maximum_rows: None,
        maximum_costs: None,
        maximum_duration: None,
    })
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

fn as_u64(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_f64().map(|f| f as u64))
}

fn as_str(v: &Value) -> Option<String> {
    v.as_str().map(str::to_string)
}

const KNOWN_NODE_KEYS: &[&str] = &[
    "Node Type",
    "Parent Relationship",
    "Subplan Name",
    "Startup Cost",
    "Total Cost",
    "Plan Rows",
    "Plan Width",
    "Actual Startup Time",
    "Actual Total Time",
    "Actual Rows",
    "Actual Loops",
    "Actual Cost",
    "Actual Duration",
    "Planner Estimate Factor",
    "Planner Estimate Direction",
    "Parallel",
    "Costliest Node",
    "Largest Node",
    "Slowest Node",
    "Sort Method",
    "Sort Space Type",
    "Sort Space Used",
    "Plans",
    "Workers",
    "Worker",
];

fn value_to_node(value: &Value) -> Node {
    let mut node = Node::default();
    let Some(obj) = value.as_object() else {
        return node;
    };

    node.node_type = obj.get("Node Type").and_then(as_str);
    node.parent_relationship = obj.get("Parent Relationship").and_then(as_str).map(|s| ParentRelationship::parse(&s));
    node.subplan_name = obj.get("Subplan Name").and_then(as_str);
    node.startup_cost = obj.get("Startup Cost").and_then(as_f64);
    node.total_cost = obj.get("Total Cost").and_then(as_f64);
    node.plan_rows = obj.get("Plan Rows").and_then(as_f64);
    node.plan_width = obj.get("Plan Width").and_then(as_u64);
    node.actual_startup_time = obj.get("Actual Startup Time").and_then(as_f64);
    node.actual_total_time = obj.get("Actual Total Time").and_then(as_f64);
    node.actual_rows = obj.get("Actual Rows").and_then(as_f64);
    node.actual_loops = obj.get("Actual Loops").and_then(as_f64);
    node.sort_method = obj.get("Sort Method").and_then(as_str);
    node.sort_space_type = obj.get("Sort Space Type").and_then(as_str);
    node.sort_space_used = obj.get("Sort Space Used").and_then(|v| v.as_i64());

    if let Some(plans) = obj.get("Plans").and_then(|v| v.as_array()) {
        node.plans = plans.iter().map(value_to_node).collect();
    }
    if let Some(workers) = obj.get("Workers").and_then(|v| v.as_array()) {
        node.workers = workers.iter().map(value_to_worker).collect();
    }
    // PostgreSQL's JSON output proper always uses the plural "Workers" array;
    // a lone, merged "Worker" key is the duplicate-key artifact this module
    // exists to tolerate. Fold it in as one more worker entry.
    if let Some(worker_value) = obj.get("Worker") {
        node.workers.push(value_to_worker(worker_value));
    }

    for (key, val) in obj {
        if !KNOWN_NODE_KEYS.contains(&key.as_str()) {
            node.extra.insert(key.clone(), val.clone());
        }
    }

    node
}

fn value_to_worker(value: &Value) -> Worker {
    let mut worker = Worker::default();
    let Some(obj) = value.as_object() else {
        return worker;
    };
    worker.worker_number = obj.get("Worker Number").and_then(as_u64);
    worker.actual_startup_time = obj.get("Actual Startup Time").and_then(as_f64);
    worker.actual_total_time = obj.get("Actual Total Time").and_then(as_f64);
    worker.actual_rows = obj.get("Actual Rows").and_then(as_f64);
    worker.actual_loops = obj.get("Actual Loops").and_then(as_f64);
    for (key, val) in obj {
        if !matches!(
            key.as_str(),
            "Worker Number" | "Actual Startup Time" | "Actual Total Time" | "Actual Rows" | "Actual Loops"
        ) {
            worker.extra.insert(key.clone(), val.clone());
        }
    }
    worker
}

fn value_to_trigger(value: &Value) -> Trigger {
    let mut trigger = Trigger::default();
    let Some(obj) = value.as_object() else {
        return trigger;
    };
    trigger.trigger_name = obj.get("Trigger Name").and_then(as_str);
    trigger.time = obj.get("Time").and_then(as_f64);
    trigger.calls = obj.get("Calls").map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    trigger
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_bracketed_block_and_ignores_noise() {
        let src = "garbage\n{\n  \"Plan\": {}\n}\ntrailer\n";
        let (start, end) = find_bracketed_block(src).unwrap();
        assert_eq!(&src[start..end], "{\n  \"Plan\": {}\n}\n");
    }

    #[test]
    fn parses_plain_object() {
        let v = parse_merged_value("{\"a\": 1, \"b\": [1,2,3], \"c\": \"hi\"}").unwrap();
        assert_eq!(v["a"], Value::from(1));
        assert_eq!(v["b"], Value::from(vec![1, 2, 3]));
        assert_eq!(v["c"], Value::from("hi"));
    }

    #[test]
    fn merges_duplicate_object_keys() {
        let v = parse_merged_value(r#"{"Worker": {"a": 1}, "Worker": {"b": 2}}"#).unwrap();
        let worker = &v["Worker"];
        assert_eq!(worker["a"], Value::from(1));
        assert_eq!(worker["b"], Value::from(2));
    }

    #[test]
    fn merged_worker_field_collision_lets_right_win() {
        let v = parse_merged_value(r#"{"Worker": {"n": 1}, "Worker": {"n": 2}}"#).unwrap();
        assert_eq!(v["Worker"]["n"], Value::from(2));
    }

    #[test]
    fn scenario_duplicate_worker_key_merges_both_fragments() {
        // PostgreSQL sometimes emits a node's worker stats split across two
        // "Worker" keys at the same level (e.g. timing stats separately from
        // buffer stats). Both fragments' fields must survive in the result.
        let src = r#"{
          "Plan": {
            "Node Type": "Gather",
            "Worker": {"Worker Number": 0, "Actual Loops": 1},
            "Worker": {"Actual Rows": 20}
          }
        }"#;
        let v = parse_merged_value(src).unwrap();
        let worker = &v["Plan"]["Worker"];
        assert_eq!(worker["Worker Number"], Value::from(0));
        assert_eq!(worker["Actual Loops"], Value::from(1));
        assert_eq!(worker["Actual Rows"], Value::from(20));

        let tree = from_json(src).unwrap();
        assert_eq!(tree.plan.workers.len(), 1);
        assert_eq!(tree.plan.workers[0].worker_number, Some(0));
        assert_eq!(tree.plan.workers[0].actual_rows, Some(20.0));
    }

    #[test]
    fn unwraps_array_root() {
        let src = r#"[{"Plan": {"Node Type": "Seq Scan", "Actual Rows": 5}}]"#;
        let tree = from_json(src).unwrap();
        assert_eq!(tree.plan.node_type.as_deref(), Some("Seq Scan"));
    }

    #[test]
    fn missing_plan_key_is_a_parse_error() {
        let err = from_json("{\"NotAPlan\": {}}").unwrap_err();
        assert!(matches!(err, ExplainError::Parse(_)));
    }

    #[test]
    fn malformed_token_is_a_json_error() {
        let err = parse_merged_value("{\"a\": tru}").unwrap_err();
        assert!(matches!(err, ExplainError::Json(_)));
    }
}
