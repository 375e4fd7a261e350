//! Binds a saved field list to the rows of one query execution.

use crate::api::{ApiError, ConfigStore, QueryExecutor, Row};
use crate::config::SavedConfig;
use crate::descriptor::{ColumnDef, build_col_defs, filter_implicit_id};
use serde::Serialize;
use serde_json::Value;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryTable {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Row>,
}

impl SummaryTable {
    /// Value of `column` in row `index`. Columns whose alias is missing
    /// render as null.
    pub fn cell(&self, index: usize, column: &ColumnDef) -> &Value {
        self.rows
            .get(index)
            .filter(|_| !column.is_missing())
            .and_then(|row| row.get(&column.key))
            .unwrap_or(&NULL)
    }

    pub fn missing_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.is_missing())
    }
}

/// Run `config` and resolve its summary fields against the returned
/// alias map.
pub async fn run_summary<Q: QueryExecutor + ?Sized>(
    executor: &Q,
    config: &SavedConfig,
) -> Result<SummaryTable, ApiError> {
    let output = executor.run(config).await?;
    let columns = build_col_defs(&config.summary_fields, &output.alias_map);
    let columns = filter_implicit_id(columns, &config.main_table);

    Ok(SummaryTable {
        columns,
        rows: output.rows,
    })
}

pub async fn load_summary<S, Q>(
    store: &S,
    executor: &Q,
    config_id: &str,
) -> Result<SummaryTable, ApiError>
where
    S: ConfigStore + ?Sized,
    Q: QueryExecutor + ?Sized,
{
    let config = store.get(config_id).await?;
    run_summary(executor, &config).await
}
