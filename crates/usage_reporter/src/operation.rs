/*
Copyright 2024 The Spice.ai OSS Authors

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

     https://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use graphql_parser::query::{parse_query, Definition, Document, OperationDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::ResultExt;

use crate::{schema::Schema, Result, UnableToParseQuerySnafu};

/// Caller supplied execution context, e.g. client identity headers.
pub type Context = Map<String, Value>;

/// A parsed executable document together with the schema it runs against and the caller's
/// execution context. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    document: Arc<Document<'static, String>>,
    schema: Arc<Schema>,
    context: Arc<Context>,
}

impl ParsedQuery {
    /// # Errors
    ///
    /// Returns `UnableToParseQuery` if `source` is not a valid executable document.
    pub fn parse(schema: Arc<Schema>, source: &str) -> Result<Self> {
        let document = parse_query::<String>(source)
            .context(UnableToParseQuerySnafu)?
            .into_static();

        Ok(Self::new(schema, document))
    }

    #[must_use]
    pub fn new(schema: Arc<Schema>, document: Document<'static, String>) -> Self {
        Self {
            document: Arc::new(document),
            schema,
            context: Arc::new(Context::new()),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Arc::new(context);
        self
    }

    #[must_use]
    pub fn document(&self) -> &Document<'static, String> {
        &self.document
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Names of the named operations in the document, in document order.
    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                Definition::Operation(OperationDefinition::Query(query)) => query.name.as_deref(),
                Definition::Operation(OperationDefinition::Mutation(mutation)) => {
                    mutation.name.as_deref()
                }
                Definition::Operation(OperationDefinition::Subscription(subscription)) => {
                    subscription.name.as_deref()
                }
                Definition::Operation(OperationDefinition::SelectionSet(_))
                | Definition::Fragment(_) => None,
            })
    }
}

/// The response of executing one query. Only the error count is used for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
}

impl ExecutionResult {
    #[must_use]
    pub fn new(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_errors(mut self, errors: Vec<Value>) -> Self {
        self.errors = errors;
        self
    }

    /// A copy that keeps the errors and leaves out `data`.
    #[must_use]
    pub fn errors_only(&self) -> Self {
        Self {
            data: None,
            errors: self.errors.clone(),
        }
    }
}

/// One executed query batch. `queries[i]` produced `results[i]`.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub queries: Vec<ParsedQuery>,
    pub results: Vec<ExecutionResult>,
    /// Nanoseconds.
    pub duration: i64,
}

impl Operation {
    /// Creates an operation stamped with the current time.
    #[must_use]
    pub fn new(
        queries: Vec<ParsedQuery>,
        results: Vec<ExecutionResult>,
        duration: Duration,
    ) -> Self {
        Self {
            timestamp: now_millis(),
            queries,
            results,
            duration: i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX),
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Comma-joined names of every named operation in the batch.
    #[must_use]
    pub fn operation_name(&self) -> String {
        self.queries
            .iter()
            .flat_map(ParsedQuery::operation_names)
            .collect::<Vec<_>>()
            .join(", ")
    }

    #[must_use]
    pub fn errors_total(&self) -> usize {
        self.results.iter().map(|result| result.errors.len()).sum()
    }

    /// Context of the first result, which belongs to the first query.
    #[must_use]
    pub fn result_context(&self) -> Option<&Context> {
        if self.results.is_empty() {
            return None;
        }
        self.queries.first().map(ParsedQuery::context)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::parse("type Query { a: String b: String }").expect("valid schema"))
    }

    #[test]
    fn test_operation_name_joins_named_operations() {
        let schema = schema();
        let first = ParsedQuery::parse(Arc::clone(&schema), "query First { a } query Second { b }")
            .expect("valid query");
        let anonymous = ParsedQuery::parse(Arc::clone(&schema), "{ a }").expect("valid query");
        let third = ParsedQuery::parse(schema, "query Third { b }").expect("valid query");

        let operation = Operation::new(
            vec![first, anonymous, third],
            vec![],
            Duration::from_millis(1),
        );
        assert_eq!(operation.operation_name(), "First, Second, Third");
    }

    #[test]
    fn test_errors_total_and_result_context() {
        let mut context = Context::new();
        context.insert("client".to_string(), json!("ios"));
        let query = ParsedQuery::parse(schema(), "{ a }")
            .expect("valid query")
            .with_context(context.clone());

        let no_results = Operation::new(vec![query.clone()], vec![], Duration::ZERO);
        assert!(no_results.result_context().is_none());

        let operation = Operation::new(
            vec![query],
            vec![
                ExecutionResult::new(json!({"a": null}))
                    .with_errors(vec![json!({"message": "x"}), json!({"message": "y"})]),
                ExecutionResult::default().with_errors(vec![json!({"message": "z"})]),
            ],
            Duration::from_nanos(1500),
        );
        assert_eq!(operation.errors_total(), 3);
        assert_eq!(operation.duration, 1500);
        assert_eq!(operation.result_context(), Some(&context));
    }

    #[test]
    fn test_parse_rejects_invalid_documents() {
        assert!(matches!(
            ParsedQuery::parse(schema(), "query {"),
            Err(crate::Error::UnableToParseQuery { .. })
        ));
    }
}
