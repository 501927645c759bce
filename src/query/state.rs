//! Builder state and the validation applied to every identifier it holds.

use std::time::Duration;

use crate::error::{DbError, DbResult};
use crate::models::{Params, SqlValue};

/// Comparison operators accepted in predicates.
const OPERATORS: &[&str] = &["=", "!=", "<>", "<", "<=", ">", ">=", "LIKE", "NOT LIKE"];

/// How a predicate attaches to the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boolean {
    And,
    Or,
}

impl Boolean {
    fn as_sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// A compiled predicate fragment.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Predicate {
    pub boolean: Boolean,
    pub sql: String,
}

/// Predicate standing for an empty `NOT IN ()`.
pub(crate) const MATCH_ALL: &str = "1 = 1";
/// Predicate standing for an empty `IN ()`.
pub(crate) const MATCH_NONE: &str = "1 = 0";

/// Whether the predicates select every row regardless of data.
///
/// AND binds tighter than OR, so the expression is a disjunction of AND
/// runs; one run made only of [`MATCH_ALL`] makes the whole thing true.
pub(crate) fn matches_every_row(predicates: &[Predicate]) -> bool {
    if predicates.is_empty() {
        return true;
    }
    let mut run_is_tautology = true;
    for (i, p) in predicates.iter().enumerate() {
        if i > 0 && p.boolean == Boolean::Or {
            if run_is_tautology {
                return true;
            }
            run_is_tautology = true;
        }
        run_is_tautology &= p.sql == MATCH_ALL;
    }
    run_is_tautology
}

/// Join `predicates` into one `a AND b OR c` expression.
pub(crate) fn join_predicates(predicates: &[Predicate]) -> String {
    let mut out = String::new();
    for (i, p) in predicates.iter().enumerate() {
        if i > 0 {
            out.push(' ');
            out.push_str(p.boolean.as_sql());
            out.push(' ');
        }
        out.push_str(&p.sql);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
    Random,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Order {
    Column(String, OrderDirection),
    Random,
}

/// Where the wildcards go in a LIKE match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LikeSide {
    /// `%value%`
    #[default]
    Both,
    /// `%value`
    Before,
    /// `value%`
    After,
    /// exact match, wildcards still escaped
    None,
}

/// Escape character used in every LIKE clause. Not special in any dialect's
/// string literals.
pub(crate) const LIKE_ESCAPE: char = '!';

/// Escape LIKE wildcards in `value` and add the requested ones.
pub(crate) fn like_pattern(value: &str, side: LikeSide) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    match side {
        LikeSide::Both => format!("%{escaped}%"),
        LikeSide::Before => format!("%{escaped}"),
        LikeSide::After => format!("{escaped}%"),
        LikeSide::None => escaped,
    }
}

/// A table name with an optional alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// Parse `users`, `users u` or `users AS u`.
    pub fn parse(raw: &str) -> DbResult<Self> {
        let parts: Vec<&str> = raw.split_whitespace().collect();
        let (name, alias) = match parts.as_slice() {
            [name] => (*name, None),
            [name, alias] => (*name, Some(*alias)),
            [name, kw, alias] if kw.eq_ignore_ascii_case("as") => (*name, Some(*alias)),
            _ => return Err(DbError::invalid_input(format!("Invalid table reference '{raw}'"))),
        };
        let name = validate_identifier(name)?;
        let alias = alias.map(validate_plain_identifier).transpose()?;
        Ok(Self { name, alias })
    }

    pub(crate) fn to_sql(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} AS {}", self.name, alias),
            None => self.name.clone(),
        }
    }
}

/// A predicate argument accepted by `where_`, `or_where` and `having`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        column: String,
        operator: String,
        value: SqlValue,
    },
    /// Equality on every pair, joined with AND
    All(Vec<(String, SqlValue)>),
    /// Expression with its own named parameters
    Raw { sql: String, params: Params },
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::op(column, "=", value)
    }

    pub fn op(column: impl Into<String>, operator: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::Compare {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }

    pub fn all<I, C, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, V)>,
        C: Into<String>,
        V: Into<SqlValue>,
    {
        Self::All(
            pairs
                .into_iter()
                .map(|(c, v)| (c.into(), v.into()))
                .collect(),
        )
    }

    pub fn raw(sql: impl Into<String>, params: Params) -> Self {
        Self::Raw {
            sql: sql.into(),
            params,
        }
    }
}

impl<C: Into<String>, V: Into<SqlValue>> From<(C, V)> for Condition {
    fn from((column, value): (C, V)) -> Self {
        Self::eq(column, value)
    }
}

impl<C: Into<String>, V: Into<SqlValue>> From<(C, &str, V)> for Condition {
    fn from((column, operator, value): (C, &str, V)) -> Self {
        Self::op(column, operator, value)
    }
}

/// Everything a builder has accumulated since its last reset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub(crate) columns: Vec<String>,
    pub(crate) distinct: bool,
    pub(crate) table: Option<TableRef>,
    pub(crate) joins: Vec<Join>,
    pub(crate) wheres: Vec<Predicate>,
    pub(crate) groups: Vec<String>,
    pub(crate) havings: Vec<Predicate>,
    pub(crate) orders: Vec<Order>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) params: Params,
    pub(crate) no_cache: bool,
    pub(crate) cache_ttl: Option<Duration>,
}

impl QueryState {
    pub fn with_table(table: Option<TableRef>) -> Self {
        Self {
            table,
            ..Default::default()
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table.as_ref().map(|t| t.name.as_str())
    }

    /// Base names of the FROM table and every joined table.
    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = Vec::new();
        for t in self.table.iter().chain(self.joins.iter().map(|j| &j.table)) {
            if !tables.contains(&t.name) {
                tables.push(t.name.clone());
            }
        }
        tables
    }

    /// Next placeholder name: prefix, normalized column, parameter count.
    pub(crate) fn placeholder(&self, prefix: &str, column: &str) -> String {
        format!("{prefix}{}_{}", normalize_column(column), self.params.len())
    }

    /// Bind `value` under a fresh placeholder and return `:name`.
    pub(crate) fn bind(&mut self, prefix: &str, column: &str, value: SqlValue) -> DbResult<String> {
        let name = self.placeholder(prefix, column);
        self.params.insert(name.clone(), value)?;
        Ok(format!(":{name}"))
    }

    /// Compile one comparison, mapping `= NULL` onto `IS NULL`.
    pub(crate) fn comparison(
        &mut self,
        prefix: &str,
        column: &str,
        operator: &str,
        value: SqlValue,
    ) -> DbResult<String> {
        let column = validate_expression(column)?;
        let operator = validate_operator(operator)?;
        if value.is_null() {
            return match operator.as_str() {
                "=" => Ok(format!("{column} IS NULL")),
                "!=" | "<>" => Ok(format!("{column} IS NOT NULL")),
                other => Err(DbError::invalid_input(format!(
                    "Operator '{other}' cannot compare against NULL"
                ))),
            };
        }
        let placeholder = self.bind(prefix, &column, value)?;
        Ok(format!("{column} {operator} {placeholder}"))
    }

    /// Compile a [`Condition`] into one predicate fragment.
    pub(crate) fn condition(&mut self, prefix: &str, condition: Condition) -> DbResult<String> {
        match condition {
            Condition::Compare {
                column,
                operator,
                value,
            } => self.comparison(prefix, &column, &operator, value),
            Condition::All(pairs) => {
                if pairs.is_empty() {
                    return Err(DbError::invalid_input("Empty condition map"));
                }
                let parts = pairs
                    .into_iter()
                    .map(|(column, value)| self.comparison(prefix, &column, "=", value))
                    .collect::<DbResult<Vec<_>>>()?;
                Ok(if parts.len() == 1 {
                    parts.into_iter().collect()
                } else {
                    format!("({})", parts.join(" AND "))
                })
            }
            Condition::Raw { sql, params } => {
                if sql.trim().is_empty() {
                    return Err(DbError::invalid_input("Empty raw condition"));
                }
                self.params.extend(params)?;
                Ok(format!("({})", sql.trim()))
            }
        }
    }
}

fn normalize_column(column: &str) -> String {
    let normalized: String = column
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = normalized.trim_matches('_');
    if trimmed.is_empty() {
        "expr".to_string()
    } else {
        trimmed.to_string()
    }
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_plain_identifier(s: &str) -> DbResult<String> {
    if is_plain_identifier(s) {
        Ok(s.to_string())
    } else {
        Err(DbError::invalid_input(format!("Invalid identifier '{s}'")))
    }
}

/// `column` or `table.column`.
pub(crate) fn validate_identifier(raw: &str) -> DbResult<String> {
    let s = raw.trim();
    let valid = match s.split_once('.') {
        Some((table, column)) => is_plain_identifier(table) && is_plain_identifier(column),
        None => is_plain_identifier(s),
    };
    if valid {
        Ok(s.to_string())
    } else {
        Err(DbError::invalid_input(format!("Invalid identifier '{raw}'")))
    }
}

/// An identifier, or an aggregate over one: `COUNT(*)`, `SUM(o.total)`,
/// `COUNT(DISTINCT user_id)`.
pub(crate) fn validate_expression(raw: &str) -> DbResult<String> {
    let s = raw.trim();
    if let Some((func, rest)) = s.split_once('(') {
        let arg = rest.strip_suffix(')').map(str::trim);
        let valid_arg = match arg {
            Some("*") => true,
            Some(arg) => {
                let arg = match arg.split_once(char::is_whitespace) {
                    Some((kw, col)) if kw.eq_ignore_ascii_case("distinct") => col.trim(),
                    _ => arg,
                };
                validate_identifier(arg).is_ok()
            }
            None => false,
        };
        if is_plain_identifier(func.trim()) && valid_arg {
            return Ok(s.to_string());
        }
        return Err(DbError::invalid_input(format!("Invalid expression '{raw}'")));
    }
    validate_identifier(s)
}

/// A projection item: `*`, `t.*`, an expression, optionally `AS alias`.
pub(crate) fn validate_select_item(raw: &str) -> DbResult<String> {
    let s = raw.trim();
    if s == "*" {
        return Ok(s.to_string());
    }
    if let Some(table) = s.strip_suffix(".*") {
        validate_plain_identifier(table)?;
        return Ok(s.to_string());
    }

    let lower = s.to_ascii_lowercase();
    if let Some(pos) = lower.rfind(" as ") {
        let expr = validate_expression(&s[..pos])?;
        let alias = validate_plain_identifier(s[pos + 4..].trim())?;
        return Ok(format!("{expr} AS {alias}"));
    }
    validate_expression(s)
}

pub(crate) fn validate_operator(raw: &str) -> DbResult<String> {
    let op = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase();
    if OPERATORS.contains(&op.as_str()) {
        Ok(op)
    } else {
        Err(DbError::invalid_input(format!("Operator '{raw}' is not allowed")))
    }
}

/// `a.x = b.y [AND ...]`, identifiers only.
pub(crate) fn validate_join_on(raw: &str) -> DbResult<String> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    let clauses = tokens
        .split(|t| t.eq_ignore_ascii_case("and"))
        .map(|clause| match clause {
            [left, op, right] => Ok(format!(
                "{} {} {}",
                validate_identifier(left)?,
                validate_operator(op)?,
                validate_identifier(right)?
            )),
            _ => Err(DbError::invalid_input(format!("Invalid join condition '{raw}'"))),
        })
        .collect::<DbResult<Vec<_>>>()?;
    Ok(clauses.join(" AND "))
}
