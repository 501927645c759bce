//! Parameter binding utilities.
//!
//! Statements are compiled with named placeholders (`:where_name_0`). Just
//! before execution they are rewritten to the dialect's positional form and
//! the values are bound in the matching order. Values never enter the SQL text
//! except through [`interpolate`], which exists for diagnostics only.

use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};

use crate::error::{DbError, DbResult};
use crate::models::{Driver, Params, SqlValue};

/// Walk `sql`, calling `replace` for every `:name` outside quoted literals.
///
/// `::` (PostgreSQL casts) and a colon not followed by an identifier start are
/// copied through untouched.
fn scan_placeholders(
    sql: &str,
    mut replace: impl FnMut(&str) -> DbResult<String>,
) -> DbResult<String> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<u8> = None;
    let mut i = 0;
    let mut copied = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == q {
                // doubled quote is an escaped quote
                if bytes.get(i + 1) == Some(&q) {
                    i += 2;
                    continue;
                }
                quote = None;
            } else if c == b'\\' && q != b'`' {
                i += 1;
            }
            i += 1;
            continue;
        }

        match c {
            b'\'' | b'"' | b'`' => quote = Some(c),
            b':' if bytes.get(i + 1) == Some(&b':') => {
                i += 2;
                continue;
            }
            b':' if bytes
                .get(i + 1)
                .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_') =>
            {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                out.push_str(&sql[copied..i]);
                out.push_str(&replace(&sql[start..end])?);
                copied = end;
                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    out.push_str(&sql[copied..]);
    Ok(out)
}

/// Rewrite named placeholders to positional ones and order the bound values.
///
/// A name used twice is bound twice. Unknown names are rejected.
pub fn to_positional(sql: &str, params: &Params, driver: Driver) -> DbResult<(String, Vec<SqlValue>)> {
    if params.is_empty() {
        return Ok((sql.to_string(), Vec::new()));
    }

    let mut ordered = Vec::with_capacity(params.len());
    let rewritten = scan_placeholders(sql, |name| {
        let value = params.get(name).ok_or_else(|| {
            DbError::invalid_input(format!("No value bound for placeholder ':{name}'"))
        })?;
        ordered.push(value.clone());
        Ok(match driver {
            Driver::Postgres => format!("${}", ordered.len()),
            Driver::MySql | Driver::Sqlite => "?".to_string(),
        })
    })?;
    Ok((rewritten, ordered))
}

/// Human-readable SQL with literal values substituted. Never execute the result.
pub fn interpolate(sql: &str, params: &Params) -> String {
    if params.is_empty() {
        return sql.to_string();
    }
    scan_placeholders(sql, |name| {
        Ok(params
            .get(name)
            .map(SqlValue::to_sql_literal)
            .unwrap_or_else(|| format!(":{name}")))
    })
    .unwrap_or_else(|_| sql.to_string())
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q SqlValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::String(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Json(v) => query.bind(Json(v)),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q SqlValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::String(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Json(v) => query.bind(Json(v)),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q SqlValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::String(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        // SQLite doesn't have native JSON type, store as string
        SqlValue::Json(v) => query.bind(v.to_string()),
        SqlValue::Date(v) => query.bind(v.format("%Y-%m-%d").to_string()),
        SqlValue::DateTime(v) => query.bind(v.format("%Y-%m-%d %H:%M:%S").to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Params {
        Params::new()
            .with("where_name_0", "Ada")
            .unwrap()
            .with("where_age_1", 36)
            .unwrap()
    }

    #[test]
    fn test_rewrite_mysql() {
        let (sql, values) = to_positional(
            "SELECT * FROM users WHERE name = :where_name_0 AND age > :where_age_1",
            &params(),
            Driver::MySql,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE name = ? AND age > ?");
        assert_eq!(values, vec![SqlValue::from("Ada"), SqlValue::Int(36)]);
    }

    #[test]
    fn test_rewrite_postgres_numbers_in_order_of_appearance() {
        let (sql, values) = to_positional(
            "SELECT * FROM users WHERE age > :where_age_1 AND name = :where_name_0",
            &params(),
            Driver::Postgres,
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE age > $1 AND name = $2");
        assert_eq!(values[0], SqlValue::Int(36));
    }

    #[test]
    fn test_rewrite_skips_literals_and_casts() {
        let params = Params::new().with("id", 1).unwrap();
        let (sql, values) = to_positional(
            "SELECT ':id', created_at::date, `a:b` FROM t WHERE id = :id AND note = 'it''s :id'",
            &params,
            Driver::Postgres,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT ':id', created_at::date, `a:b` FROM t WHERE id = $1 AND note = 'it''s :id'"
        );
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_rewrite_unknown_placeholder() {
        let err = to_positional("SELECT :missing", &params(), Driver::Sqlite).unwrap_err();
        assert!(err.to_string().contains(":missing"));
    }

    #[test]
    fn test_repeated_name_binds_twice() {
        let params = Params::new().with("v", 5).unwrap();
        let (sql, values) =
            to_positional("SELECT :v + :v", &params, Driver::Sqlite).unwrap();
        assert_eq!(sql, "SELECT ? + ?");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_no_params_passthrough() {
        let (sql, values) = to_positional("SELECT 1", &Params::new(), Driver::MySql).unwrap();
        assert_eq!(sql, "SELECT 1");
        assert!(values.is_empty());
    }

    #[test]
    fn test_interpolate() {
        let params = Params::new().with("where_name_0", "O'Brien").unwrap();
        assert_eq!(
            interpolate("SELECT * FROM users WHERE name = :where_name_0", &params),
            "SELECT * FROM users WHERE name = 'O''Brien'"
        );
    }
}
