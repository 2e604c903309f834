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

use crate::{
    operation::{Context, Operation},
    printer, report,
};

/// What sampling callbacks get to see about an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleContext<'a> {
    /// Names of every named operation in the batch, joined by `", "`.
    pub operation_name: String,
    /// Canonical form of all definitions of all queries in the batch.
    pub canonical_document: String,
    /// Execution context of the first result, if there is one.
    pub context_value: Option<&'a Context>,
}

impl<'a> SampleContext<'a> {
    #[must_use]
    pub fn from_operation(operation: &'a Operation) -> Self {
        let definitions = operation
            .queries
            .iter()
            .flat_map(|query| query.document().definitions.iter());

        Self {
            operation_name: operation.operation_name(),
            canonical_document: printer::print_definitions(definitions),
            context_value: operation.result_context(),
        }
    }

    /// Default at-least-once key: the fingerprint of the canonical document.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        report::fingerprint(&self.canonical_document)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use serde_json::json;

    use super::*;
    use crate::{ExecutionResult, ParsedQuery, Schema};

    #[test]
    fn test_context_merges_all_queries() {
        let schema = Arc::new(Schema::parse("type Query { a: Int b: Int }").expect("valid schema"));
        let mut context = Context::new();
        context.insert("user".to_string(), json!("alice"));

        let first = ParsedQuery::parse(Arc::clone(&schema), "query A { a }")
            .expect("valid query")
            .with_context(context.clone());
        let second = ParsedQuery::parse(schema, "query B { b }").expect("valid query");
        let operation = Operation::new(
            vec![first, second],
            vec![ExecutionResult::default(), ExecutionResult::default()],
            Duration::from_millis(3),
        );

        let sample_context = SampleContext::from_operation(&operation);
        assert_eq!(sample_context.operation_name, "A, B");
        assert_eq!(
            sample_context.canonical_document,
            "query A {\n  a\n}\n\nquery B {\n  b\n}"
        );
        assert_eq!(sample_context.context_value, Some(&context));
        assert_eq!(sample_context.fingerprint().len(), 32);
    }
}
