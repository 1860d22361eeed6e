//! The tool contract: one typed, invokable action belonging to a connector.
//!
//! A [`Tool`] pairs a declared input schema with an execute function taking
//! exactly one argument. [`Tool::execute`] coerces raw named arguments,
//! runs the function, and returns a [`FinalToolOutput`] carrying both the raw
//! vendor result and its agent-facing projection.

pub mod output;
pub mod schema;

pub use output::{
    flatten_tabular, project_for_agent, FinalToolOutput, IntoToolResult, TabularResult,
    ToolResult,
};
pub use schema::{ExtraFields, FieldKind, FieldSpec, InputSchema, ToolInput};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use sb_observability::tool_span;
use serde_json::{json, Map, Value};
use tracing::{debug, error, Instrument};

use crate::error::{ConnectorResult, FieldIssue, ToolError};

type HandlerFuture = BoxFuture<'static, Result<ToolResult, ToolError>>;
type Handler = Arc<dyn Fn(Map<String, Value>) -> HandlerFuture + Send + Sync>;

/// One invokable action of a connector.
///
/// The execute function's arity is fixed by its type: it must be callable
/// with exactly one [`ToolInput`].
///
/// ```compile_fail
/// use sb_core::tool::{ExtraFields, InputSchema, Tool, ToolInput};
///
/// #[derive(serde::Deserialize)]
/// struct Pair {}
///
/// impl ToolInput for Pair {
///     fn schema() -> InputSchema {
///         InputSchema::structured(ExtraFields::Ignore, vec![])
///     }
/// }
///
/// // Two parameters: rejected when the tool is defined.
/// let _ = Tool::new("demo", "pair", "", |a: Pair, b: Pair| async move {
///     Ok::<_, sb_core::ConnectorError>(1)
/// });
/// ```
///
/// ```compile_fail
/// use sb_core::tool::Tool;
///
/// // Zero parameters: rejected as well.
/// let _ = Tool::new("demo", "nothing", "", || async move {
///     Ok::<_, sb_core::ConnectorError>(1)
/// });
/// ```
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    connector_id: String,
    schema: InputSchema,
    handler: Handler,
}

impl Tool {
    /// Defines a tool backed by an async execute function.
    ///
    /// Fails when the name is empty or the input type does not declare a
    /// structured schema.
    pub fn new<I, F, Fut, R>(
        connector_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        execute: F,
    ) -> Result<Self, ToolError>
    where
        I: ToolInput,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConnectorResult<R>> + Send + 'static,
        R: IntoToolResult + Send + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ToolError::InvalidDefinition {
                tool: name,
                reason: "tool name must not be empty".to_string(),
            });
        }

        let schema = I::schema();
        schema.validate(&name)?;

        let tool_name = name.clone();
        let execute = Arc::new(execute);
        let handler: Handler = Arc::new(move |arguments: Map<String, Value>| -> HandlerFuture {
            let tool_name = tool_name.clone();
            let execute = execute.clone();
            Box::pin(async move {
                let input: I = serde_json::from_value(Value::Object(arguments)).map_err(|e| {
                    ToolError::InvalidInput {
                        tool: tool_name.clone(),
                        issues: vec![FieldIssue::new("(input)", e.to_string())],
                    }
                })?;
                let returned = (*execute)(input).await?;
                returned
                    .into_tool_result()
                    .map_err(|e| ToolError::InvalidOutput {
                        tool: tool_name,
                        reason: e.to_string(),
                    })
            })
        });

        Ok(Self {
            name,
            description: description.into(),
            connector_id: connector_id.into(),
            schema,
            handler,
        })
    }

    /// Defines a tool backed by a synchronous execute function.
    pub fn new_sync<I, F, R>(
        connector_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        execute: F,
    ) -> Result<Self, ToolError>
    where
        I: ToolInput,
        F: Fn(I) -> ConnectorResult<R> + Send + Sync + 'static,
        R: IntoToolResult + Send + 'static,
    {
        Self::new(connector_id, name, description, move |input: I| {
            std::future::ready(execute(input))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn connector_id(&self) -> &str {
        &self.connector_id
    }

    pub fn schema(&self) -> &InputSchema {
        &self.schema
    }

    /// Function-calling definition: name, description, JSON-schema parameters.
    pub fn definition(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.schema.to_json_schema(),
        })
    }

    /// Runs the tool with named arguments.
    ///
    /// Input problems come back as one [`ToolError::InvalidInput`] listing
    /// every offending field. Errors from the execute function are logged
    /// and returned unchanged.
    pub async fn execute(
        &self,
        arguments: Map<String, Value>,
    ) -> Result<FinalToolOutput, ToolError> {
        let span = tool_span!(self.connector_id, self.name);
        async {
            let argument_names: Vec<String> = arguments.keys().cloned().collect();
            let coerced = self.schema.coerce(&self.name, arguments)?;

            match (self.handler)(coerced).await {
                Ok(result) => {
                    debug!(arguments = ?argument_names, "Tool executed");
                    Ok(FinalToolOutput::from(result))
                }
                Err(err) => {
                    error!(
                        tool = %self.name,
                        connector_id = %self.connector_id,
                        arguments = ?argument_names,
                        error = %err,
                        "Tool execution failed"
                    );
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Runs the tool with a JSON object of named arguments; `null` means none.
    pub async fn execute_json(&self, arguments: Value) -> Result<FinalToolOutput, ToolError> {
        match arguments {
            Value::Object(map) => self.execute(map).await,
            Value::Null => self.execute(Map::new()).await,
            _ => Err(ToolError::InvalidInput {
                tool: self.name.clone(),
                issues: vec![FieldIssue::new(
                    "(input)",
                    "expected an object of named arguments",
                )],
            }),
        }
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("connector_id", &self.connector_id)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorError;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize)]
    struct SearchInput {
        query: String,
        #[serde(default)]
        limit: Option<i64>,
    }

    impl ToolInput for SearchInput {
        fn schema() -> InputSchema {
            InputSchema::structured(
                ExtraFields::Ignore,
                vec![
                    FieldSpec::required("query", FieldKind::String),
                    FieldSpec::optional("limit", FieldKind::Integer),
                ],
            )
        }
    }

    #[derive(Debug, Deserialize)]
    struct StrictInput {
        #[allow(dead_code)]
        id: String,
    }

    impl ToolInput for StrictInput {
        fn schema() -> InputSchema {
            InputSchema::structured(
                ExtraFields::Forbid,
                vec![FieldSpec::required("id", FieldKind::String)],
            )
        }
    }

    fn search_tool() -> Tool {
        Tool::new(
            "test",
            "search",
            "Searches things",
            |input: SearchInput| async move {
                Ok::<_, ConnectorError>(json!({
                    "query": input.query,
                    "limit": input.limit.unwrap_or(10),
                }))
            },
        )
        .unwrap()
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_bare_value_wrapped_unchanged() {
        let output = search_tool()
            .execute(args(json!({"query": "phish", "limit": "5"})))
            .await
            .unwrap();

        assert_eq!(output.raw_result, json!({"query": "phish", "limit": 5}));
        assert_eq!(output.agent_result, output.raw_result);
        assert_eq!(output.additional_agent_context, "");
    }

    #[tokio::test]
    async fn test_missing_required_field_named() {
        let err = search_tool().execute(Map::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
        assert!(err.to_string().contains("query"));
    }

    #[tokio::test]
    async fn test_extra_field_ignored() {
        let output = search_tool()
            .execute(args(json!({"query": "x", "verbose": true})))
            .await
            .unwrap();
        assert_eq!(output.raw_result["query"], "x");
    }

    #[tokio::test]
    async fn test_extra_field_forbidden() {
        let tool = Tool::new_sync("test", "strict", "", |_: StrictInput| {
            Ok::<_, ConnectorError>("ok")
        })
        .unwrap();

        let err = tool
            .execute(args(json!({"id": "1", "other": 2})))
            .await
            .unwrap_err();
        assert_eq!(err.issues()[0].field, "other");
    }

    #[tokio::test]
    async fn test_tabular_result_projected() {
        let tool = Tool::new_sync("test", "table", "", |_: SearchInput| {
            Ok::<_, ConnectorError>(json!({"columns": ["a", "b"], "rows": [[1, 2], [3, 4]]}))
        })
        .unwrap();

        let output = tool.execute(args(json!({"query": "q"}))).await.unwrap();
        assert_eq!(
            output.agent_result,
            json!([{"a": 1, "b": 2}, {"a": 3, "b": 4}])
        );
        assert_eq!(
            output.raw_result,
            json!({"columns": ["a", "b"], "rows": [[1, 2], [3, 4]]})
        );
    }

    #[tokio::test]
    async fn test_tool_result_context_passed_through() {
        let tool = Tool::new("test", "ctx", "", |_: SearchInput| async {
            Ok::<_, ConnectorError>(ToolResult::new(json!([])).with_context("no matches"))
        })
        .unwrap();

        let output = tool.execute(args(json!({"query": "q"}))).await.unwrap();
        assert_eq!(output.additional_agent_context, "no matches");
    }

    #[tokio::test]
    async fn test_vendor_error_returned_unchanged() {
        let tool = Tool::new("test", "fail", "", |_: SearchInput| async {
            Err::<Value, _>(ConnectorError::RateLimited(30))
        })
        .unwrap();

        let err = tool.execute(args(json!({"query": "q"}))).await.unwrap_err();
        assert!(matches!(
            err,
            ToolError::Execution(ConnectorError::RateLimited(30))
        ));
    }

    #[test]
    fn test_untyped_input_rejected_at_construction() {
        let result = Tool::new("test", "raw", "", |_: Value| async {
            Ok::<_, ConnectorError>(1)
        });
        assert!(matches!(result, Err(ToolError::InvalidDefinition { .. })));

        let result = Tool::new_sync("test", "raw", "", |_: HashMap<String, Value>| {
            Ok::<_, ConnectorError>(1)
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = Tool::new_sync("test", " ", "", |_: SearchInput| {
            Ok::<_, ConnectorError>(1)
        });
        assert!(matches!(result, Err(ToolError::InvalidDefinition { .. })));
    }

    #[tokio::test]
    async fn test_execute_json() {
        let tool = search_tool();
        assert!(tool.execute_json(json!({"query": "x"})).await.is_ok());
        assert!(tool.execute_json(json!(["x"])).await.is_err());
    }

    #[test]
    fn test_definition() {
        let tool = search_tool();
        let definition = tool.definition();
        assert_eq!(definition["name"], "search");
        assert_eq!(definition["description"], "Searches things");
        assert_eq!(definition["parameters"]["required"], json!(["query"]));
        assert_eq!(tool.connector_id(), "test");
    }
}
