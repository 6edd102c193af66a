//! Statement shape of MQL queries.
//!
//! Execution is owned by the [`crate::query::QueryEngine`] collaborator; the engine only needs to
//! know which columns a query selects, which tree it is scoped to and what its predicate is, so
//! that it can restrict queries with chart-level conditions and synthesize drill-down predicates.

use crate::error::{QueryError, bold};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(Self::Count),
            "SUM" => Some(Self::Sum),
            "AVG" => Some(Self::Avg),
            "MIN" => Some(Self::Min),
            "MAX" => Some(Self::Max),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    Property(String),
    /// `property` is `None` for `COUNT(*)`.
    Aggregate {
        function: Aggregate,
        property: Option<String>,
    },
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Column::Property(name) => write!(f, "{}", quote(name)),
            Column::Aggregate {
                function,
                property: None,
            } => write!(f, "{}(*)", function.as_str()),
            Column::Aggregate {
                function,
                property: Some(p),
            } => write!(f, "{}({})", function.as_str(), quote(p)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub columns: Vec<Column>,
    pub tree: Option<String>,
    pub predicate: Option<String>,
}

impl Query {
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let text = text.trim();
        let Some(select_at) = find_keyword(text, "SELECT").filter(|at| *at == 0) else {
            return Err(QueryError::syntax(format!(
                "{} is not a valid query: it must start with SELECT.",
                bold(text)
            )));
        };
        let rest = &text[select_at + "SELECT".len()..];

        let where_at = find_keyword(rest, "WHERE");
        let from_at = find_keyword(rest, "FROM").filter(|f| where_at.is_none_or(|w| *f < w));
        let select_end = [from_at, where_at]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(rest.len());

        let columns = split_top_level(&rest[..select_end], ',')
            .into_iter()
            .map(|c| parse_column(c.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            return Err(QueryError::syntax(format!(
                "{} is not a valid query: nothing is selected.",
                bold(text)
            )));
        }

        let tree = match from_at {
            Some(at) => {
                let end = where_at.filter(|w| *w > at).unwrap_or(rest.len());
                let clause = rest[at + "FROM".len()..end].trim();
                let Some(tree_at) = find_keyword(clause, "TREE").filter(|t| *t == 0) else {
                    return Err(QueryError::syntax(format!(
                        "{} is not a valid query: FROM must be followed by TREE.",
                        bold(text)
                    )));
                };
                let name = unquote(clause[tree_at + "TREE".len()..].trim());
                if name.is_empty() {
                    return Err(QueryError::syntax(format!(
                        "{} is not a valid query: FROM TREE requires a tree name.",
                        bold(text)
                    )));
                }
                Some(name)
            }
            None => None,
        };

        let predicate = match where_at {
            Some(at) => {
                let clause = rest[at + "WHERE".len()..].trim();
                if clause.is_empty() {
                    return Err(QueryError::syntax(format!(
                        "{} is not a valid query: WHERE requires a condition.",
                        bold(text)
                    )));
                }
                Some(clause.to_string())
            }
            None => None,
        };

        Ok(Self {
            columns,
            tree,
            predicate,
        })
    }

    /// ANDs `conditions` onto the predicate, keeping both sides parenthesized.
    pub fn restrict_with(&self, conditions: Option<&str>) -> Query {
        let conditions = conditions.map(str::trim).filter(|c| !c.is_empty());
        let predicate = match (&self.predicate, conditions) {
            (Some(p), Some(c)) => Some(format!("({p}) AND ({c})")),
            (Some(p), None) => Some(p.clone()),
            (None, Some(c)) => Some(c.to_string()),
            (None, None) => None,
        };
        Query {
            columns: self.columns.clone(),
            tree: self.tree.clone(),
            predicate,
        }
    }

    /// The property of the first column, when the first column is a plain property.
    pub fn category_property(&self) -> Option<&str> {
        match self.columns.first()? {
            Column::Property(p) => Some(p),
            Column::Aggregate { .. } => None,
        }
    }

    pub fn aggregate(&self) -> Option<(Aggregate, Option<&str>)> {
        self.columns.iter().find_map(|c| match c {
            Column::Aggregate { function, property } => Some((*function, property.as_deref())),
            Column::Property(_) => None,
        })
    }

    /// The same query with its aggregate column switched to `function` over the same argument.
    pub fn with_aggregate(&self, function: Aggregate) -> Query {
        let columns = self
            .columns
            .iter()
            .map(|c| match c {
                Column::Aggregate { property, .. } => Column::Aggregate {
                    function,
                    property: property.clone(),
                },
                other => other.clone(),
            })
            .collect();
        Query {
            columns,
            tree: self.tree.clone(),
            predicate: self.predicate.clone(),
        }
    }

    /// True when the query selects exactly `(property, aggregate)`.
    pub fn is_category_aggregate(&self) -> bool {
        matches!(
            self.columns.as_slice(),
            [Column::Property(_), Column::Aggregate { .. }]
        )
    }

    /// True when the query selects a single aggregate.
    pub fn is_single_aggregate(&self) -> bool {
        matches!(self.columns.as_slice(), [Column::Aggregate { .. }])
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        for (i, c) in self.columns.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{c}")?;
        }
        if let Some(tree) = &self.tree {
            write!(f, " FROM TREE {}", quote(tree))?;
        }
        if let Some(p) = &self.predicate {
            write!(f, " WHERE {p}")?;
        }
        Ok(())
    }
}

fn parse_column(text: &str) -> Result<Column, QueryError> {
    if text.is_empty() {
        return Err(QueryError::syntax("A selected column is empty."));
    }
    if is_quoted(text) {
        return Ok(Column::Property(unquote(text)));
    }
    let Some(open) = text.find('(') else {
        return Ok(Column::Property(text.to_string()));
    };
    if !text.ends_with(')') {
        return Err(QueryError::syntax(format!(
            "{} is not a valid column.",
            bold(text)
        )));
    }
    let name = text[..open].trim();
    let Some(function) = Aggregate::parse(name) else {
        return Err(QueryError::syntax(format!(
            "{} is not a supported aggregate function.",
            bold(name)
        )));
    };
    let arg = text[open + 1..text.len() - 1].trim();
    if arg == "*" {
        if function != Aggregate::Count {
            return Err(QueryError::syntax(format!(
                "{}(*) is not supported; only COUNT(*) is.",
                function.as_str()
            )));
        }
        return Ok(Column::Aggregate {
            function,
            property: None,
        });
    }
    if arg.is_empty() {
        return Err(QueryError::syntax(format!(
            "{} requires a property.",
            function.as_str()
        )));
    }
    Ok(Column::Aggregate {
        function,
        property: Some(unquote(arg)),
    })
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Byte offset of the first top-level (outside quotes and parentheses) occurrence of `keyword`
/// as a whole word, case-insensitively.
pub(crate) fn find_keyword(input: &str, keyword: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut depth = 0i32;
    let mut prev: Option<char> = None;
    for (idx, ch) in input.char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            prev = Some(ch);
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth == 0
            && quote.is_none()
            && !prev.is_some_and(is_word_char)
            && input[idx..]
                .get(..keyword.len())
                .is_some_and(|s| s.eq_ignore_ascii_case(keyword))
            && !input[idx + keyword.len()..]
                .chars()
                .next()
                .is_some_and(is_word_char)
        {
            return Some(idx);
        }
        prev = Some(ch);
    }
    None
}

/// Splits on `sep` outside quotes and parentheses.
pub(crate) fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0i32;
    let mut start = 0usize;
    for (idx, ch) in input.char_indices() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '(' => depth += 1,
            ')' => depth -= 1,
            c if c == sep && depth == 0 => {
                out.push(&input[start..idx]);
                start = idx + ch.len_utf8();
            }
            _ => {}
        }
    }
    if !input[start..].trim().is_empty() || !out.is_empty() {
        out.push(&input[start..]);
    }
    out
}

fn is_quoted(s: &str) -> bool {
    s.len() >= 2
        && ((s.starts_with('\'') && s.ends_with('\'')) || (s.starts_with('"') && s.ends_with('"')))
}

pub(crate) fn unquote(s: &str) -> String {
    let s = s.trim();
    if is_quoted(s) {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// Renders a property name or value token: bare alphanumeric tokens stay unquoted, everything
/// else is single-quoted (double-quoted when the token itself holds a single quote).
pub fn quote(token: &str) -> String {
    if !token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return token.to_string();
    }
    if token.contains('\'') {
        format!("\"{token}\"")
    } else {
        format!("'{token}'")
    }
}

fn today_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bTODAY\b").expect("valid regex"))
}

fn current_user_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bCURRENT\s+USER\b").expect("valid regex"))
}

/// Whether the text depends on the render date or the viewer, which makes a chart uncacheable.
pub fn mentions_volatile_context(text: &str) -> bool {
    today_re().is_match(text) || current_user_re().is_match(text)
}
