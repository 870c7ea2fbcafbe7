//! Source dispatcher (D): strips export artifacts, then decides whether
//! the preprocessed text is a JSON plan or a text plan.

use crate::error::Result;
use crate::json;
use crate::lexicon::TRAILING_PLUS;
use crate::model::PlanTree;
use crate::text;

/// Strips a whole-line `"..."` / `'...'` wrap (pgAdmin3 export) and a
/// trailing `+` continuation marker (psql's default pager) from one line.
fn preprocess_line(line: &str) -> &str {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let line = match TRAILING_PLUS.find(line) {
        Some(m) => &line[..m.start()],
        None => line,
    };
    let bytes = line.as_bytes();
    if line.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &line[1..line.len() - 1];
        }
    }
    line
}

fn preprocess(source: &str) -> String {
    source
        .lines()
        .map(preprocess_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// True if `text` contains a block that opens with `[`/`{` alone on a line
/// (after optional indentation) and closes with the matching bracket at the
/// same indentation.
pub(crate) fn contains_bracketed_block(text: &str) -> bool {
    json::find_bracketed_block(text).is_some()
}

/// Parses an `EXPLAIN` source of unknown format (text or JSON), after
/// stripping common export artifacts.
pub fn from_source(source: &str) -> Result<PlanTree> {
    let preprocessed = preprocess(source);
    if contains_bracketed_block(&preprocessed) {
        tracing::trace!(path = "json", "dispatching preprocessed source");
        json::from_json(&preprocessed)
    } else {
        tracing::trace!(path = "text", "dispatching preprocessed source");
        text::from_text(&preprocessed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapping_double_quotes_per_line() {
        assert_eq!(preprocess_line("\"Seq Scan  (cost=0.00..1.00 rows=1 width=1)\""), "Seq Scan  (cost=0.00..1.00 rows=1 width=1)");
    }

    #[test]
    fn strips_trailing_plus_continuation() {
        assert_eq!(preprocess_line("Seq Scan on t +"), "Seq Scan on t");
        assert_eq!(preprocess_line("Seq Scan on t+"), "Seq Scan on t");
    }

    #[test]
    fn leaves_plain_lines_untouched() {
        assert_eq!(preprocess_line("Seq Scan on t"), "Seq Scan on t");
    }

    #[test]
    fn dispatches_to_json_when_block_present() {
        let src = "noise before\n{\n  \"Plan\": {\"Node Type\": \"Seq Scan\"}\n}\n";
        assert!(contains_bracketed_block(src));
    }

    #[test]
    fn dispatches_to_text_when_no_block() {
        let src = "Seq Scan on t  (cost=0.00..1.00 rows=1 width=1)";
        assert!(!contains_bracketed_block(src));
    }
}
