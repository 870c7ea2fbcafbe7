//! Small string helpers shared by the text parser and JSON merger.

/// Number of leading whitespace bytes, used as the depth key for the text
/// parser's stack. Works the same whether or not the line carries a `->`
/// marker: `trim_start` always stops right before the first non-space
/// character, be that `-` or the start of a node type.
pub fn leading_ws(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Splits on non-alphanumeric characters, uppercases the first byte of each
/// token, and joins with single spaces. E.g. `local_blks_hit` -> `Local
/// Blks Hit`, `hit` -> `Hit`.
pub fn title_case(input: &str) -> String {
    input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            let mut chars = tok.chars();
            match chars.next() {
                Some(first) => {
                    let mut out = String::with_capacity(tok.len());
                    out.extend(first.to_uppercase());
                    out.push_str(&tok[first.len_utf8()..]);
                    out
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strips a single leading+trailing straight double quote, the artifact
/// psql leaves behind when `EXPLAIN` output is exported as a CSV column.
pub fn strip_csv_quotes(line: &str) -> &str {
    if line.len() >= 2 && line.starts_with('"') && line.ends_with('"') {
        &line[1..line.len() - 1]
    } else {
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_ws_counts_indent_before_arrow() {
        assert_eq!(leading_ws("  ->  Seq Scan"), 2);
        assert_eq!(leading_ws("Seq Scan"), 0);
        assert_eq!(leading_ws("    Seq Scan"), 4);
    }

    #[test]
    fn title_case_splits_on_non_alnum() {
        assert_eq!(title_case("local_blks_hit"), "Local Blks Hit");
        assert_eq!(title_case("hit"), "Hit");
        assert_eq!(title_case("sort method"), "Sort Method");
    }

    #[test]
    fn strip_csv_quotes_only_when_wrapping() {
        assert_eq!(strip_csv_quotes("\"Seq Scan\""), "Seq Scan");
        assert_eq!(strip_csv_quotes("Seq Scan"), "Seq Scan");
        assert_eq!(strip_csv_quotes("\""), "\"");
    }
}
