//! Parsing of DCM parameter names such as `A(3,1)` or `B{2}(4,2)`.
//!
//! Indices in the names are 1-based, as written by the estimation software.
//! Names that do not follow the pattern are kept with empty indices so that the
//! caller can still line them up with the flat parameter vector.

use regex::Regex;
use std::sync::LazyLock;

static PARAMETER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<field>[A-Za-z0-9{},]+)\((?P<row>\d+)(?:,|\))(?P<col>\d+)?")
        .expect("parameter name pattern is a valid regex")
});

/// One entry of `Pnames`, split into its field and 1-based matrix indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedParameter {
    pub field: String,
    pub row: Option<usize>,
    pub col: Option<usize>,
}

impl ParsedParameter {
    /// The 0-based `(row, col)` this parameter occupies, if both indices parsed.
    pub fn position(&self) -> Option<(usize, usize)> {
        match (self.row, self.col) {
            (Some(row), Some(col)) if row >= 1 && col >= 1 => Some((row - 1, col - 1)),
            _ => None,
        }
    }
}

/// Parses a single parameter name.
pub fn parse_parameter_name(name: &str) -> ParsedParameter {
    match PARAMETER_NAME.captures(name) {
        Some(caps) => ParsedParameter {
            field: caps["field"].to_string(),
            row: caps["row"].parse().ok(),
            col: caps.name("col").and_then(|m| m.as_str().parse().ok()),
        },
        None => ParsedParameter {
            field: name.to_string(),
            row: None,
            col: None,
        },
    }
}

/// Parses every name, preserving order. Entries without a usable position are
/// reported once as a data-quality warning.
pub fn parse_parameter_names<S: AsRef<str>>(names: &[S]) -> Vec<ParsedParameter> {
    let parsed: Vec<ParsedParameter> = names
        .iter()
        .map(|name| parse_parameter_name(name.as_ref()))
        .collect();

    let unplaced: Vec<&str> = parsed
        .iter()
        .filter(|p| p.position().is_none())
        .map(|p| p.field.as_str())
        .collect();
    if !unplaced.is_empty() {
        log::warn!(
            "{} parameter name(s) carry no matrix position and will be skipped: {:?}",
            unplaced.len(),
            unplaced
        );
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_matrix_entry() {
        let p = parse_parameter_name("A(3,1)");
        assert_eq!(p.field, "A");
        assert_eq!(p.row, Some(3));
        assert_eq!(p.col, Some(1));
        assert_eq!(p.position(), Some((2, 0)));
    }

    #[test]
    fn parses_braced_fields() {
        let p = parse_parameter_name("B{2}(4,2)");
        assert_eq!(p.field, "B{2}");
        assert_eq!(p.position(), Some((3, 1)));
    }

    #[test]
    fn single_index_has_no_position() {
        let p = parse_parameter_name("C(5)");
        assert_eq!(p.row, Some(5));
        assert_eq!(p.col, None);
        assert_eq!(p.position(), None);
    }

    #[test]
    fn malformed_name_keeps_text_as_field() {
        let p = parse_parameter_name("transit");
        assert_eq!(p.field, "transit");
        assert_eq!(p.row, None);
        assert_eq!(p.col, None);
    }

    #[test]
    fn zero_index_is_not_a_position() {
        assert_eq!(parse_parameter_name("A(0,1)").position(), None);
    }

    #[test]
    fn order_is_preserved() {
        let parsed = parse_parameter_names(&["A(1,2)", "bogus", "A(2,1)"]);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].position(), Some((0, 1)));
        assert_eq!(parsed[1].position(), None);
        assert_eq!(parsed[2].position(), Some((1, 0)));
    }
}
