//! Tool return values and their agent-facing projection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool's vendor-facing result plus optional guidance for the consumer.
///
/// Deliberately not `Serialize`: any serializable value converts into a
/// `ToolResult` through [`IntoToolResult`], and a `ToolResult` converts as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub result: Value,
    pub additional_context: Option<String>,
}

impl ToolResult {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            additional_context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.additional_context = Some(context.into());
        self
    }
}

/// Converts whatever an execute function returns into a [`ToolResult`].
pub trait IntoToolResult {
    fn into_tool_result(self) -> Result<ToolResult, serde_json::Error>;
}

impl IntoToolResult for ToolResult {
    fn into_tool_result(self) -> Result<ToolResult, serde_json::Error> {
        Ok(self)
    }
}

impl<T: Serialize> IntoToolResult for T {
    fn into_tool_result(self) -> Result<ToolResult, serde_json::Error> {
        serde_json::to_value(self).map(ToolResult::new)
    }
}

/// Named columns with positional rows, as returned by SQL-style vendor APIs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TabularResult {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn with_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows = rows;
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// What `Tool::execute` hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalToolOutput {
    /// Exactly what the tool produced.
    pub raw_result: Value,
    /// Row-oriented projection of `raw_result` for language-model consumers.
    pub agent_result: Value,
    pub additional_agent_context: String,
}

impl From<ToolResult> for FinalToolOutput {
    fn from(result: ToolResult) -> Self {
        let agent_result = project_for_agent(&result.result);
        Self {
            raw_result: result.result,
            agent_result,
            additional_agent_context: result.additional_context.unwrap_or_default(),
        }
    }
}

fn column_name(column: &Value) -> Option<&str> {
    match column {
        Value::String(name) => Some(name),
        Value::Object(object) => object.get("name").and_then(Value::as_str),
        _ => None,
    }
}

/// Flattens a `{columns, rows}` value into column-keyed records.
///
/// Returns `None` when `value` is not tabular: columns must all be names (or
/// objects with a `name`) and every row must be an array of the same width.
pub fn flatten_tabular(value: &Value) -> Option<Vec<Map<String, Value>>> {
    let object = value.as_object()?;
    let columns = object
        .get("columns")?
        .as_array()?
        .iter()
        .map(column_name)
        .collect::<Option<Vec<_>>>()?;
    let rows = object.get("rows")?.as_array()?;

    rows.iter()
        .map(|row| {
            let cells = row.as_array()?;
            if cells.len() != columns.len() {
                return None;
            }
            Some(
                columns
                    .iter()
                    .zip(cells)
                    .map(|(column, cell)| (column.to_string(), cell.clone()))
                    .collect(),
            )
        })
        .collect()
}

/// Agent-facing projection: flattened records for tabular values, otherwise
/// the value unchanged.
pub fn project_for_agent(value: &Value) -> Value {
    match flatten_tabular(value) {
        Some(records) => Value::Array(records.into_iter().map(Value::Object).collect()),
        None => value.clone(),
    }
}
