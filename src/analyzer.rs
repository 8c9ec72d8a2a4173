//! Lexical shape analysis of SQL statements.
//!
//! Everything here is a heuristic over the raw text. Clause detection is a plain
//! substring check, so a `WHERE` inside a string literal still sets `has_where`.

use once_cell::sync::Lazy;
use regex::Regex;

/// SQL operation types recognized as queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Alter,
    Drop,
    Unknown,
}

impl Operation {
    /// Returns the operation as a string suitable for span names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Select => "SELECT",
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Create => "CREATE",
            Operation::Alter => "ALTER",
            Operation::Drop => "DROP",
            Operation::Unknown => "UNKNOWN",
        }
    }

    /// Classify a single keyword token, ignoring case.
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.to_ascii_uppercase().as_str() {
            "SELECT" => Operation::Select,
            "INSERT" => Operation::Insert,
            "UPDATE" => Operation::Update,
            "DELETE" => Operation::Delete,
            "CREATE" => Operation::Create,
            "ALTER" => Operation::Alter,
            "DROP" => Operation::Drop,
            _ => Operation::Unknown,
        }
    }

    /// Parse the operation from the first keyword of a statement.
    ///
    /// Leading whitespace and comments are skipped.
    pub fn from_statement(sql: &str) -> Self {
        let stripped = strip_comments(sql);
        LEADING_KEYWORD_REGEX
            .captures(&stripped)
            .and_then(|caps| caps.get(1))
            .map(|m| Operation::from_keyword(m.as_str()))
            .unwrap_or(Operation::Unknown)
    }

    /// Read/write/schema classification of this operation.
    pub fn query_type(&self) -> QueryType {
        match self {
            Operation::Select => QueryType::Read,
            Operation::Insert | Operation::Update | Operation::Delete => QueryType::Write,
            Operation::Create | Operation::Alter | Operation::Drop => QueryType::Schema,
            Operation::Unknown => QueryType::Unknown,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse classification of what a statement does to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Read,
    Write,
    Schema,
    Unknown,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Read => "read",
            QueryType::Write => "write",
            QueryType::Schema => "schema",
            QueryType::Unknown => "unknown",
        }
    }
}

/// Estimated statement complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
        }
    }
}

/// Statements with more placeholders than this are at least [`Complexity::Medium`].
const MEDIUM_PARAMETER_THRESHOLD: usize = 5;

static LEADING_KEYWORD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z]+)\b").expect("valid keyword regex"));

static LINE_COMMENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--[^\n]*").expect("valid line comment regex"));

static BLOCK_COMMENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid block comment regex"));

static STRING_LITERAL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").expect("valid string literal regex"));

// Table extraction, tried in this order; first match wins.
static FROM_TABLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bFROM\s+[`"\[]?(\w+)[`"\]]?"#).expect("valid FROM regex")
});

static INTO_TABLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bINTO\s+[`"\[]?(\w+)[`"\]]?"#).expect("valid INTO regex")
});

static UPDATE_TABLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bUPDATE\s+[`"\[]?(\w+)[`"\]]?"#).expect("valid UPDATE regex")
});

/// Remove `-- line` and `/* block */` comments.
fn strip_comments(sql: &str) -> String {
    let without_blocks = BLOCK_COMMENT_REGEX.replace_all(sql, " ");
    LINE_COMMENT_REGEX.replace_all(&without_blocks, "").into_owned()
}

/// Comment-free text with every whitespace run collapsed to one space.
fn normalize(sql: &str) -> String {
    strip_comments(sql)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract the primary table name from a SQL statement.
///
/// Returns `None` if the table cannot be determined.
pub fn extract_table(sql: &str) -> Option<String> {
    [&*FROM_TABLE_REGEX, &*INTO_TABLE_REGEX, &*UPDATE_TABLE_REGEX]
        .iter()
        .find_map(|regex| regex.captures(sql).and_then(|caps| caps.get(1)))
        .map(|m| m.as_str().to_string())
}

/// Whether a statement should be measured as a query.
///
/// True when the first keyword, after leading whitespace and comments, is one of
/// the recognized operations.
pub fn is_query(statement: &str) -> bool {
    Operation::from_statement(statement) != Operation::Unknown
}

/// Statement text safe to attach to a span.
///
/// Comments are removed, whitespace is collapsed and string literals are
/// replaced by `?`.
pub fn sanitize_statement(sql: &str) -> String {
    STRING_LITERAL_REGEX.replace_all(&normalize(sql), "?").into_owned()
}

/// Shape descriptor of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryShape {
    pub operation: Operation,
    pub table: Option<String>,
    pub has_where: bool,
    pub has_join: bool,
    pub has_order_by: bool,
    pub has_limit: bool,
    pub parameter_count: usize,
    pub complexity: Complexity,
}

impl QueryShape {
    /// Analyze a statement. Never fails; unrecognized input yields an
    /// `Unknown`, low-complexity shape.
    pub fn analyze(sql: &str) -> Self {
        let normalized = normalize(sql);
        let upper = normalized.to_ascii_uppercase();

        let operation = Operation::from_statement(&normalized);
        let table = extract_table(&normalized);
        let has_where = upper.contains("WHERE");
        let has_join = upper.contains("JOIN");
        let has_order_by = upper.contains("ORDER BY");
        let has_limit = upper.contains("LIMIT");
        // Placeholders are counted on the raw text, comments included.
        let parameter_count = sql.matches('?').count();

        let mut complexity = Complexity::Low;
        if has_join || has_order_by || parameter_count > MEDIUM_PARAMETER_THRESHOLD {
            complexity = Complexity::Medium;
        }
        if has_join && has_order_by && has_where {
            complexity = Complexity::High;
        }

        Self {
            operation,
            table,
            has_where,
            has_join,
            has_order_by,
            has_limit,
            parameter_count,
            complexity,
        }
    }

    pub fn query_type(&self) -> QueryType {
        self.operation.query_type()
    }
}
