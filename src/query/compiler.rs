//! SQL compilation for builder state.
//!
//! Output keeps named placeholders; [`crate::db::params::to_positional`]
//! rewrites them for the driver at execution time.

use crate::error::{DbError, DbResult};
use crate::models::{Driver, Params, Values};

use super::state::{
    Order, OrderDirection, QueryState, join_predicates, matches_every_row, validate_identifier,
};

/// Alias of the single column returned by count statements.
pub const COUNT_ALIAS: &str = "numrows";

fn require_table<'a>(state: &'a QueryState, operation: &str) -> DbResult<&'a str> {
    state.table_name().ok_or_else(|| {
        DbError::unsafe_operation(operation, "No table is set on the query builder")
    })
}

fn from_clause(state: &QueryState, sql: &mut String) {
    if let Some(table) = &state.table {
        sql.push_str(" FROM ");
        sql.push_str(&table.to_sql());
    }
    for join in &state.joins {
        sql.push(' ');
        sql.push_str(join.kind.as_sql());
        sql.push(' ');
        sql.push_str(&join.table.to_sql());
        sql.push_str(" ON ");
        sql.push_str(&join.on);
    }
}

fn where_clause(state: &QueryState, sql: &mut String) {
    if !state.wheres.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&join_predicates(&state.wheres));
    }
}

fn group_clause(state: &QueryState, sql: &mut String) {
    if !state.groups.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&state.groups.join(", "));
    }
    if !state.havings.is_empty() {
        sql.push_str(" HAVING ");
        sql.push_str(&join_predicates(&state.havings));
    }
}

fn random_function(driver: Driver) -> &'static str {
    match driver {
        Driver::MySql => "RAND()",
        Driver::Postgres | Driver::Sqlite => "RANDOM()",
    }
}

fn order_clause(state: &QueryState, driver: Driver, sql: &mut String) {
    if state.orders.is_empty() {
        return;
    }
    let items: Vec<String> = state
        .orders
        .iter()
        .map(|order| match order {
            Order::Random => random_function(driver).to_string(),
            Order::Column(column, OrderDirection::Desc) => format!("{column} DESC"),
            Order::Column(column, _) => format!("{column} ASC"),
        })
        .collect();
    sql.push_str(" ORDER BY ");
    sql.push_str(&items.join(", "));
}

fn limit_clause(state: &QueryState, driver: Driver, sql: &mut String) {
    match (state.limit, state.offset) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
        // OFFSET alone needs the dialect's "no limit" form
        (None, Some(offset)) => match driver {
            Driver::MySql => sql.push_str(&format!(" LIMIT 18446744073709551615 OFFSET {offset}")),
            Driver::Sqlite => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            Driver::Postgres => sql.push_str(&format!(" OFFSET {offset}")),
        },
        (None, None) => {}
    }
}

fn projection(state: &QueryState) -> String {
    if state.columns.is_empty() {
        "*".to_string()
    } else {
        state.columns.join(", ")
    }
}

/// Compile a SELECT.
pub fn compile_select(state: &QueryState, driver: Driver) -> DbResult<String> {
    require_table(state, "select")?;
    let mut sql = String::from("SELECT ");
    if state.distinct {
        sql.push_str("DISTINCT ");
    }
    sql.push_str(&projection(state));
    from_clause(state, &mut sql);
    where_clause(state, &mut sql);
    group_clause(state, &mut sql);
    order_clause(state, driver, &mut sql);
    limit_clause(state, driver, &mut sql);
    Ok(sql)
}

/// Compile a count of the rows `compile_select` would return, ignoring
/// ordering and limits.
///
/// Grouped, filtered-by-HAVING or DISTINCT selections are counted over a
/// subquery so that groups (or distinct rows) are counted, not base rows.
pub fn compile_count(state: &QueryState) -> DbResult<String> {
    require_table(state, "count")?;
    let needs_subquery = state.distinct || !state.groups.is_empty() || !state.havings.is_empty();

    if !needs_subquery {
        let mut sql = format!("SELECT COUNT(*) AS {COUNT_ALIAS}");
        from_clause(state, &mut sql);
        where_clause(state, &mut sql);
        return Ok(sql);
    }

    let mut inner = String::from("SELECT ");
    if state.distinct {
        inner.push_str("DISTINCT ");
        inner.push_str(&projection(state));
    } else if state.columns.is_empty() {
        inner.push('1');
    } else {
        inner.push_str(&state.columns.join(", "));
    }
    from_clause(state, &mut inner);
    where_clause(state, &mut inner);
    group_clause(state, &mut inner);
    Ok(format!(
        "SELECT COUNT(*) AS {COUNT_ALIAS} FROM ({inner}) count_subquery"
    ))
}

fn column_list(values: &Values) -> DbResult<Vec<String>> {
    values
        .iter()
        .map(|(column, _)| validate_identifier(column))
        .collect()
}

/// Compile a single- or multi-row INSERT with its own parameter map.
pub fn compile_insert(table: &str, rows: &[Values], start: usize) -> DbResult<(String, Params)> {
    let Some(first) = rows.first() else {
        return Err(DbError::invalid_input("Nothing to insert"));
    };
    if first.is_empty() {
        return Err(DbError::invalid_input("Insert row has no columns"));
    }
    let columns = column_list(first)?;

    let mut params = Params::new();
    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        let row_columns: Vec<&str> = row.iter().map(|(c, _)| c.trim()).collect();
        if row_columns != columns.iter().map(String::as_str).collect::<Vec<_>>() {
            return Err(DbError::invalid_input(
                "Every row of a batch insert must have the same columns in the same order",
            ));
        }
        let mut placeholders = Vec::with_capacity(row.len());
        for (column, value) in row {
            let name = format!(
                "ins_{}_{}",
                column.trim().replace('.', "_").to_ascii_lowercase(),
                start + params.len()
            );
            params.insert(name.clone(), value.clone())?;
            placeholders.push(format!(":{name}"));
        }
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        columns.join(", "),
        tuples.join(", ")
    );
    Ok((sql, params))
}

/// Target of an UPDATE or DELETE, alias included so qualified predicates
/// resolve.
fn write_target(state: &QueryState, operation: &str) -> DbResult<String> {
    require_table(state, operation)?;
    Ok(state.table.as_ref().map(|t| t.to_sql()).unwrap_or_default())
}

/// Compile an UPDATE. Refuses to run unless the WHERE clause restricts rows.
pub fn compile_update(state: &mut QueryState, values: &Values) -> DbResult<String> {
    let table = require_table(state, "update")?.to_string();
    if matches_every_row(&state.wheres) {
        return Err(DbError::unsafe_operation(
            "update",
            format!("Refusing to update every row of '{table}' without a restricting WHERE clause"),
        ));
    }
    if values.is_empty() {
        return Err(DbError::invalid_input("Nothing to update"));
    }

    let mut sets = Vec::with_capacity(values.len());
    for (column, value) in values {
        let column = validate_identifier(column)?;
        let placeholder = state.bind("upd_", &column, value.clone())?;
        sets.push(format!("{column} = {placeholder}"));
    }

    let mut sql = format!("UPDATE {} SET {}", write_target(state, "update")?, sets.join(", "));
    where_clause(state, &mut sql);
    Ok(sql)
}

/// Compile a DELETE. Refuses to run unless the WHERE clause restricts rows.
pub fn compile_delete(state: &QueryState) -> DbResult<String> {
    let table = require_table(state, "delete")?;
    if matches_every_row(&state.wheres) {
        return Err(DbError::unsafe_operation(
            "delete",
            format!("Refusing to delete every row of '{table}' without a restricting WHERE clause"),
        ));
    }
    let mut sql = format!("DELETE FROM {}", write_target(state, "delete")?);
    where_clause(state, &mut sql);
    Ok(sql)
}

pub fn compile_truncate(state: &QueryState, driver: Driver) -> DbResult<String> {
    let table = require_table(state, "truncate")?;
    Ok(match driver {
        Driver::MySql | Driver::Postgres => format!("TRUNCATE TABLE {table}"),
        Driver::Sqlite => format!("DELETE FROM {table}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SqlValue;
    use crate::query::state::{Boolean, MATCH_ALL, Predicate, TableRef};

    fn state(table: &str) -> QueryState {
        QueryState::with_table(Some(TableRef::parse(table).unwrap()))
    }

    #[test]
    fn test_select_without_table_is_refused() {
        let err = compile_select(&QueryState::default(), Driver::Sqlite).unwrap_err();
        assert!(matches!(err, DbError::UnsafeOperation { .. }));
    }

    #[test]
    fn test_offset_without_limit() {
        let mut s = state("users");
        s.offset = Some(10);
        assert_eq!(
            compile_select(&s, Driver::Sqlite).unwrap(),
            "SELECT * FROM users LIMIT -1 OFFSET 10"
        );
        assert_eq!(
            compile_select(&s, Driver::MySql).unwrap(),
            "SELECT * FROM users LIMIT 18446744073709551615 OFFSET 10"
        );
        assert_eq!(
            compile_select(&s, Driver::Postgres).unwrap(),
            "SELECT * FROM users OFFSET 10"
        );
    }

    #[test]
    fn test_random_order_per_dialect() {
        let mut s = state("users");
        s.orders.push(Order::Random);
        assert!(compile_select(&s, Driver::MySql).unwrap().ends_with("ORDER BY RAND()"));
        assert!(compile_select(&s, Driver::Postgres).unwrap().ends_with("ORDER BY RANDOM()"));
    }

    #[test]
    fn test_count_plain_and_grouped() {
        let mut s = state("orders");
        s.wheres.push(Predicate {
            boolean: Boolean::And,
            sql: "status = :where_status_0".into(),
        });
        s.orders.push(Order::Column("id".into(), OrderDirection::Desc));
        s.limit = Some(5);
        assert_eq!(
            compile_count(&s).unwrap(),
            "SELECT COUNT(*) AS numrows FROM orders WHERE status = :where_status_0"
        );

        s.groups.push("user_id".into());
        assert_eq!(
            compile_count(&s).unwrap(),
            "SELECT COUNT(*) AS numrows FROM (SELECT 1 FROM orders WHERE status = :where_status_0 GROUP BY user_id) count_subquery"
        );
    }

    #[test]
    fn test_insert_batch_placeholders() {
        let rows = vec![
            vec![("name".to_string(), SqlValue::from("a")), ("age".to_string(), SqlValue::Int(1))],
            vec![("name".to_string(), SqlValue::from("b")), ("age".to_string(), SqlValue::Int(2))],
        ];
        let (sql, params) = compile_insert("users", &rows, 0).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO users (name, age) VALUES (:ins_name_0, :ins_age_1), (:ins_name_2, :ins_age_3)"
        );
        assert_eq!(params.len(), 4);

        let ragged = vec![rows[0].clone(), vec![("name".to_string(), SqlValue::from("c"))]];
        assert!(compile_insert("users", &ragged, 0).is_err());
    }

    #[test]
    fn test_update_and_delete_need_predicates() {
        let mut s = state("users");
        let values = vec![("name".to_string(), SqlValue::from("x"))];
        assert!(matches!(
            compile_update(&mut s, &values),
            Err(DbError::UnsafeOperation { .. })
        ));
        assert!(matches!(compile_delete(&s), Err(DbError::UnsafeOperation { .. })));
        assert!(s.params.is_empty());
    }

    #[test]
    fn test_tautological_predicates_do_not_count() {
        let values = vec![("name".to_string(), SqlValue::from("x"))];
        let all = Predicate { boolean: Boolean::And, sql: MATCH_ALL.to_string() };
        let real = Predicate { boolean: Boolean::And, sql: "id = :where_id_0".to_string() };

        let mut s = state("users");
        s.wheres.push(all.clone());
        assert!(matches!(compile_delete(&s), Err(DbError::UnsafeOperation { .. })));
        assert!(matches!(
            compile_update(&mut s, &values),
            Err(DbError::UnsafeOperation { .. })
        ));

        // `id = x OR 1 = 1` still matches everything
        let mut s = state("users");
        s.wheres.push(real.clone());
        s.wheres.push(Predicate { boolean: Boolean::Or, ..all.clone() });
        assert!(compile_delete(&s).is_err());

        let mut s = state("users");
        s.wheres.push(real);
        s.wheres.push(all);
        assert_eq!(compile_delete(&s).unwrap(), "DELETE FROM users WHERE id = :where_id_0 AND 1 = 1");
    }

    #[test]
    fn test_writes_keep_the_table_alias() {
        let mut s = state("users u");
        s.wheres.push(Predicate { boolean: Boolean::And, sql: "u.id = :where_u_id_0".to_string() });
        assert_eq!(
            compile_delete(&s).unwrap(),
            "DELETE FROM users AS u WHERE u.id = :where_u_id_0"
        );
        let values = vec![("name".to_string(), SqlValue::from("x"))];
        assert_eq!(
            compile_update(&mut s, &values).unwrap(),
            "UPDATE users AS u SET name = :upd_name_0 WHERE u.id = :where_u_id_0"
        );
    }

    #[test]
    fn test_truncate() {
        let s = state("users");
        assert_eq!(compile_truncate(&s, Driver::Sqlite).unwrap(), "DELETE FROM users");
        assert_eq!(compile_truncate(&s, Driver::Postgres).unwrap(), "TRUNCATE TABLE users");
    }
}
