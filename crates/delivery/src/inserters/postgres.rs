//! PostgreSQL row inserter
//!
//! 一个 batch 对应一条多行 INSERT：
//! `INSERT INTO "schema"."table" ("a", "b") VALUES ($1, $2), ($3, $4)`
//! NULL 直接写入 SQL，不占用参数位。

use contracts::{ColumnValue, ContractError, MAX_INSERT_PARAMS};

/// Build the parameterised multi-row insert for `rows`
///
/// Empty `schema` falls back to `public`.
pub fn build_insert_query(
    schema: &str,
    table: &str,
    columns: &[String],
    rows: &[Vec<ColumnValue>],
) -> Result<String, ContractError> {
    let schema = if schema.is_empty() { "public" } else { schema };
    if table.is_empty() {
        return Err(ContractError::row_mapping("table name cannot be empty string"));
    }
    if rows.is_empty() {
        return Err(ContractError::row_mapping("requires at least 1 value"));
    }
    if columns.is_empty() {
        return Err(ContractError::row_mapping("requires at least 1 column"));
    }

    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut query = format!(
        "INSERT INTO {}.{} ({}) VALUES ",
        quote_ident(schema),
        quote_ident(table),
        column_list
    );

    let mut param = 0;
    for (row_idx, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(ContractError::row_mapping(format!(
                "value has {} elements, so cannot insert into {} columns",
                row.len(),
                columns.len()
            )));
        }

        if row_idx > 0 {
            query.push_str(", ");
        }
        query.push('(');
        for (field_idx, value) in row.iter().enumerate() {
            if field_idx > 0 {
                query.push_str(", ");
            }
            if matches!(value, ColumnValue::Null) {
                query.push_str("NULL");
            } else {
                param += 1;
                query.push('$');
                query.push_str(&param.to_string());
            }
        }
        query.push(')');
    }

    if param > MAX_INSERT_PARAMS {
        return Err(ContractError::row_mapping(format!(
            "insert needs {} bind parameters, limit is {}",
            param, MAX_INSERT_PARAMS
        )));
    }

    Ok(query)
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(feature = "postgres")]
mod pg {
    use sqlx::postgres::{PgPool, PgPoolOptions};
    use tracing::{debug, info, instrument};

    use contracts::{ColumnValue, CommitPoolConfig, ContractError, RowInserter};

    use super::build_insert_query;

    /// Inserter backed by a pooled PostgreSQL connection
    pub struct PgRowInserter {
        name: String,
        schema: String,
        pool: PgPool,
    }

    impl PgRowInserter {
        pub fn new(name: impl Into<String>, schema: impl Into<String>, pool: PgPool) -> Self {
            Self {
                name: name.into(),
                schema: schema.into(),
                pool,
            }
        }

        /// Connect using the commit pool settings
        ///
        /// `database_url` falls back to the `DATABASE_URL` environment variable.
        #[instrument(name = "pg_row_inserter_connect", skip(config), fields(table = %config.table))]
        pub async fn connect(name: &str, config: &CommitPoolConfig) -> Result<Self, ContractError> {
            let url = match config.database_url.clone() {
                Some(url) => url,
                None => std::env::var("DATABASE_URL").map_err(|_| {
                    ContractError::sink_connection(name, "no database_url configured and DATABASE_URL unset")
                })?,
            };

            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&url)
                .await
                .map_err(|e| ContractError::sink_connection(name, e.to_string()))?;

            info!(sink = %name, max_connections = config.max_connections, "Connected to Postgres");
            Ok(Self::new(name, config.schema.clone(), pool))
        }
    }

    impl RowInserter for PgRowInserter {
        async fn insert_rows(
            &self,
            table: &str,
            columns: &[String],
            rows: Vec<Vec<ColumnValue>>,
        ) -> Result<(), ContractError> {
            let sql = build_insert_query(&self.schema, table, columns, &rows)?;

            let mut query = sqlx::query(&sql);
            for value in rows.into_iter().flatten() {
                query = match value {
                    ColumnValue::Null => continue,
                    ColumnValue::Bool(b) => query.bind(b),
                    ColumnValue::Int(i) => query.bind(i),
                    ColumnValue::Float(f) => query.bind(f),
                    ColumnValue::Text(s) => query.bind(s),
                    ColumnValue::Json(v) => query.bind(sqlx::types::Json(v)),
                };
            }

            let result = query
                .execute(&self.pool)
                .await
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
            debug!(sink = %self.name, table, rows = result.rows_affected(), "Rows inserted");
            Ok(())
        }
    }
}

#[cfg(feature = "postgres")]
pub use pg::PgRowInserter;
