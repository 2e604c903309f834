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

//! Schema coordinate extraction.
//!
//! A coordinate is a bare type name (`Post`), a field (`Post.title`) or an argument path
//! (`Query.post.id`). Input object fields and enum values use the field form
//! (`PostFilter.title`, `Order.ASC`).

use std::collections::{BTreeSet, HashMap, HashSet};

use graphql_parser::query::{
    Definition, Document, Field, FragmentDefinition, OperationDefinition, Selection,
    SelectionSet, TypeCondition, Value,
};

use crate::{
    operation::ParsedQuery,
    schema::{NamedType, Schema},
};

/// Returns every schema coordinate the query touches.
///
/// Fields that the schema does not know about are still recorded, but their selections are not
/// descended into since their type is unknown.
#[must_use]
pub fn analyze(query: &ParsedQuery) -> BTreeSet<String> {
    let mut analyzer = Analyzer::new(query.schema(), query.document());
    analyzer.document();
    analyzer.used
}

struct Analyzer<'q> {
    schema: &'q Schema,
    document: &'q Document<'static, String>,
    fragments: HashMap<&'q str, &'q FragmentDefinition<'static, String>>,
    expanding: HashSet<&'q str>,
    used: BTreeSet<String>,
}

impl<'q> Analyzer<'q> {
    fn new(schema: &'q Schema, document: &'q Document<'static, String>) -> Self {
        let fragments = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                Definition::Fragment(fragment) => Some((fragment.name.as_str(), fragment)),
                Definition::Operation(_) => None,
            })
            .collect();

        Self {
            schema,
            document,
            fragments,
            expanding: HashSet::new(),
            used: BTreeSet::new(),
        }
    }

    fn document(&mut self) {
        let document = self.document;
        let schema = self.schema;
        for definition in &document.definitions {
            // Fragments are analyzed where they are spread.
            let Definition::Operation(operation) = definition else {
                continue;
            };
            let (root, selection_set) = match operation {
                OperationDefinition::SelectionSet(selection_set) => {
                    (schema.query_type(), selection_set)
                }
                OperationDefinition::Query(query) => (schema.query_type(), &query.selection_set),
                OperationDefinition::Mutation(mutation) => {
                    (schema.mutation_type(), &mutation.selection_set)
                }
                OperationDefinition::Subscription(subscription) => {
                    (schema.subscription_type(), &subscription.selection_set)
                }
            };
            self.selection_set(root, selection_set);
        }
    }

    fn selection_set(&mut self, parent: &'q str, selection_set: &'q SelectionSet<'static, String>) {
        for selection in &selection_set.items {
            match selection {
                Selection::Field(field) => self.field(parent, field),
                Selection::InlineFragment(inline) => {
                    let parent = match &inline.type_condition {
                        Some(TypeCondition::On(type_name)) => type_name.as_str(),
                        None => parent,
                    };
                    self.selection_set(parent, &inline.selection_set);
                }
                Selection::FragmentSpread(spread) => {
                    let name = spread.fragment_name.as_str();
                    let Some(fragment) = self.fragments.get(name).copied() else {
                        continue;
                    };
                    // Guards against fragment cycles in documents that skipped validation.
                    if !self.expanding.insert(name) {
                        continue;
                    }
                    let TypeCondition::On(type_name) = &fragment.type_condition;
                    self.selection_set(type_name, &fragment.selection_set);
                    self.expanding.remove(name);
                }
            }
        }
    }

    fn field(&mut self, parent: &'q str, field: &'q Field<'static, String>) {
        self.used.insert(parent.to_string());
        self.used.insert(format!("{parent}.{}", field.name));

        let schema = self.schema;
        let definition = schema.field(parent, &field.name);

        for (argument, value) in &field.arguments {
            self.used.insert(format!("{parent}.{}.{argument}", field.name));
            if let Some(type_name) = definition.and_then(|d| d.argument_type(argument)) {
                self.input_value(type_name, value);
            }
        }

        if let Some(definition) = definition {
            self.selection_set(definition.type_name(), &field.selection_set);
        }
    }

    /// Records an input type and the parts of it that `value` uses.
    fn input_value(&mut self, type_name: &str, value: &Value<'static, String>) {
        if let Value::List(items) = value {
            for item in items {
                self.input_value(type_name, item);
            }
            return;
        }

        self.used.insert(type_name.to_string());

        let schema = self.schema;
        match (schema.get(type_name), value) {
            (Some(NamedType::InputObject { fields }), Value::Variable(_)) => {
                for (field, _) in fields {
                    self.used.insert(format!("{type_name}.{field}"));
                }
            }
            (Some(NamedType::InputObject { fields }), Value::Object(written)) => {
                for (field, field_value) in written {
                    self.used.insert(format!("{type_name}.{field}"));
                    if let Some((_, field_type)) = fields.iter().find(|(name, _)| name == field) {
                        self.input_value(field_type, field_value);
                    }
                }
            }
            (Some(NamedType::Enum { values }), Value::Variable(_)) => {
                for enum_value in values {
                    self.used.insert(format!("{type_name}.{enum_value}"));
                }
            }
            (Some(NamedType::Enum { .. }), Value::Enum(enum_value)) => {
                self.used.insert(format!("{type_name}.{enum_value}"));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const SCHEMA: &str = r"
        type Query {
          project(selector: ProjectSelectorInput!): Project
          projectsByType(type: ProjectType!): [Project!]!
          projectsByManyTypes(type: [ProjectType!]!): [Project!]!
          projects(filter: FilterInput): [Project!]!
          searchResult(query: String!): SearchResult
          post(id: ID!): Post
        }

        type Mutation {
          deleteProject(selector: ProjectSelectorInput!): DeleteProjectPayload!
        }

        input ProjectSelectorInput {
          organization: ID!
          project: ID!
        }

        input FilterInput {
          type: ProjectType
          pagination: PaginationInput
          order: [ProjectOrderByInput!]
        }

        input PaginationInput {
          limit: Int
          offset: Int
        }

        input ProjectOrderByInput {
          field: String!
          direction: OrderDirection
        }

        enum OrderDirection {
          ASC
          DESC
        }

        type ProjectSelector {
          organization: ID!
          project: ID!
        }

        type DeleteProjectPayload {
          selector: ProjectSelector!
          deletedProject: Project!
        }

        type Project {
          id: ID!
          cleanId: ID!
          name: String!
          type: ProjectType!
          buildUrl: String
          validationUrl: String
        }

        type Post {
          id: ID!
          title: String!
        }

        enum ProjectType {
          FEDERATION
          STITCHING
          SINGLE
          CUSTOM
        }

        union SearchResult = Project | ProjectSelector
    ";

    fn coordinates(source: &str) -> BTreeSet<String> {
        let schema = Arc::new(Schema::parse(SCHEMA).expect("valid schema"));
        let query = ParsedQuery::parse(schema, source).expect("valid query");
        analyze(&query)
    }

    fn set(coordinates: &[&str]) -> BTreeSet<String> {
        coordinates.iter().map(ToString::to_string).collect()
    }

    fn assert_contains(used: &BTreeSet<String>, coordinates: &[&str]) {
        for coordinate in coordinates {
            assert!(used.contains(*coordinate), "missing {coordinate} in {used:?}");
        }
    }

    fn assert_excludes(used: &BTreeSet<String>, coordinates: &[&str]) {
        for coordinate in coordinates {
            assert!(!used.contains(*coordinate), "unexpected {coordinate} in {used:?}");
        }
    }

    #[test]
    fn test_collects_fields_arguments_and_variable_input_objects() {
        let used = coordinates(
            r"
            mutation deleteProject($selector: ProjectSelectorInput!) {
              deleteProject(selector: $selector) {
                selector { organization project }
                deletedProject { id cleanId name type }
              }
            }
            ",
        );

        assert_contains(
            &used,
            &[
                "DeleteProjectPayload",
                "DeleteProjectPayload.selector",
                "Mutation",
                "Mutation.deleteProject",
                "Mutation.deleteProject.selector",
                "Project",
                "Project.cleanId",
                "Project.id",
                "Project.name",
                "Project.type",
                "ProjectSelector",
                "ProjectSelector.organization",
                "ProjectSelector.project",
                "ProjectSelectorInput",
                "ProjectSelectorInput.organization",
                "ProjectSelectorInput.project",
            ],
        );
        assert_excludes(&used, &["Project.buildUrl", "Project.validationUrl"]);
    }

    #[test]
    fn test_enum_variable_records_every_value() {
        let used = coordinates(
            "query getProjects($type: ProjectType!) { projectsByType(type: $type) { id } }",
        );
        assert_contains(
            &used,
            &[
                "ProjectType.FEDERATION",
                "ProjectType.STITCHING",
                "ProjectType.SINGLE",
                "ProjectType.CUSTOM",
            ],
        );
    }

    #[test]
    fn test_enum_literal_records_only_that_value() {
        let used = coordinates("query getProjects { projectsByType(type: FEDERATION) { id } }");
        assert_contains(&used, &["ProjectType.FEDERATION"]);
        assert_excludes(
            &used,
            &["ProjectType.STITCHING", "ProjectType.SINGLE", "ProjectType.CUSTOM"],
        );
    }

    #[test]
    fn test_literal_input_object_records_written_fields() {
        let used = coordinates(
            r"
            query getProjects($limit: Int!, $type: ProjectType!) {
              projects(filter: { pagination: { limit: $limit }, type: $type }) { id }
            }
            ",
        );
        assert_contains(
            &used,
            &[
                "FilterInput",
                "FilterInput.pagination",
                "FilterInput.type",
                "PaginationInput",
                "PaginationInput.limit",
                "Query.projects.filter",
            ],
        );
        assert_excludes(&used, &["FilterInput.order", "PaginationInput.offset"]);
    }

    #[test]
    fn test_variable_inside_literal_input_object_records_all_fields() {
        let used = coordinates(
            r"
            query getProjects($type: ProjectType!, $pagination: PaginationInput) {
              projects(filter: { pagination: $pagination, type: $type }) { id }
            }
            ",
        );
        assert_contains(
            &used,
            &[
                "PaginationInput",
                "PaginationInput.limit",
                "PaginationInput.offset",
                "FilterInput.type",
                "FilterInput.pagination",
            ],
        );
        assert_excludes(&used, &["FilterInput.order"]);
    }

    #[test]
    fn test_lists_of_input_objects_and_enums() {
        let used = coordinates(
            r#"
            query getProjects($limit: Int!, $type: ProjectType!) {
              projects(filter: {
                pagination: { limit: $limit },
                type: $type,
                order: [{ field: "id", direction: ASC }, { field: "cleanId" }]
              }) { id }
            }
            "#,
        );
        assert_contains(&used, &["ProjectOrderByInput.field", "OrderDirection.ASC"]);
        assert_excludes(&used, &["ProjectOrderByInput.direction", "OrderDirection.DESC"]);

        let used = coordinates(
            "query getGatewayProjects {
              projectsByManyTypes(type: [STITCHING, FEDERATION]) { id }
            }",
        );
        assert_contains(&used, &["ProjectType.STITCHING", "ProjectType.FEDERATION"]);
        assert_excludes(&used, &["ProjectType.SINGLE", "ProjectType.CUSTOM"]);
    }

    #[test]
    fn test_single_object_for_list_input_is_analyzed() {
        let used = coordinates(
            r#"
            query getProjects($type: ProjectType!) {
              projects(filter: { type: $type, order: { field: "test", direction: ASC } }) { id }
            }
            "#,
        );
        assert_contains(&used, &["OrderDirection.ASC"]);
        assert_excludes(&used, &["OrderDirection.DESC"]);
    }

    #[test]
    fn test_union_type_conditions() {
        let used = coordinates(
            r"
            query searchProjects($query: String!) {
              searchResult(query: $query) {
                __typename
                ... on Project { id }
                ... on ProjectSelector { organization }
              }
            }
            ",
        );
        assert_eq!(
            used,
            set(&[
                "Query",
                "Query.searchResult",
                "Query.searchResult.query",
                "SearchResult",
                "SearchResult.__typename",
                "Project",
                "Project.id",
                "ProjectSelector",
                "ProjectSelector.organization",
                "String",
            ])
        );
    }

    #[test]
    fn test_unknown_fields_are_recorded_but_not_descended() {
        let used = coordinates(
            r"
            query getGatewayProjects($query: String!) {
              searchResult(query: $query) {
                nonExistentField { subField }
                ... on Project { id }
              }
              nonExistentField { subField }
            }
            ",
        );
        assert_eq!(
            used,
            set(&[
                "Query",
                "Query.searchResult",
                "Query.searchResult.query",
                "SearchResult",
                "SearchResult.nonExistentField",
                "Project",
                "Project.id",
                "Query.nonExistentField",
                "String",
            ])
        );
    }

    #[test]
    fn test_named_fragments_are_analyzed_on_their_type() {
        let used = coordinates(
            r"
            query GetPost($id: ID!) { post(id: $id) { ...PostFields } }
            fragment PostFields on Post { id title }
            ",
        );
        assert_eq!(
            used,
            set(&[
                "Query",
                "Query.post",
                "Query.post.id",
                "ID",
                "Post",
                "Post.id",
                "Post.title",
            ])
        );
    }

    #[test]
    fn test_recursive_fragments_terminate() {
        let used = coordinates(
            r"
            query Loop { post(id: 1) { ...A } }
            fragment A on Post { id ...B }
            fragment B on Post { title ...A }
            ",
        );
        assert_contains(&used, &["Post.id", "Post.title"]);
    }
}
