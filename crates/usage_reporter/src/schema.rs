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

use std::collections::HashMap;

use graphql_parser::schema::{
    parse_schema, Definition, Field, InputValue, Type, TypeDefinition, TypeExtension,
};
use snafu::ResultExt;

use crate::{Result, UnableToParseSchemaSnafu};

const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

/// A field of an object or interface type, reduced to the unwrapped names of its output and
/// argument types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDefinition {
    type_name: String,
    arguments: HashMap<String, String>,
}

impl FieldDefinition {
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn argument_type(&self, argument: &str) -> Option<&str> {
        self.arguments.get(argument).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamedType {
    Scalar,
    Object {
        fields: HashMap<String, FieldDefinition>,
    },
    Interface {
        fields: HashMap<String, FieldDefinition>,
    },
    Union {
        members: Vec<String>,
    },
    Enum {
        values: Vec<String>,
    },
    /// Input fields keep their declaration order, paired with their unwrapped type name.
    InputObject {
        fields: Vec<(String, String)>,
    },
}

/// Owned index over a GraphQL schema, built once from SDL and shared by every parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    types: HashMap<String, NamedType>,
    query_type: String,
    mutation_type: String,
    subscription_type: String,
}

impl Schema {
    /// Parses a schema definition document.
    ///
    /// # Errors
    ///
    /// Returns `UnableToParseSchema` if the SDL is not a valid schema document.
    pub fn parse(sdl: &str) -> Result<Self> {
        let document = parse_schema::<String>(sdl).context(UnableToParseSchemaSnafu)?;

        let mut schema = Schema {
            types: BUILTIN_SCALARS
                .iter()
                .map(|name| ((*name).to_string(), NamedType::Scalar))
                .collect(),
            query_type: "Query".to_string(),
            mutation_type: "Mutation".to_string(),
            subscription_type: "Subscription".to_string(),
        };

        for definition in document.definitions {
            match definition {
                Definition::SchemaDefinition(definition) => {
                    if let Some(query) = definition.query {
                        schema.query_type = query;
                    }
                    if let Some(mutation) = definition.mutation {
                        schema.mutation_type = mutation;
                    }
                    if let Some(subscription) = definition.subscription {
                        schema.subscription_type = subscription;
                    }
                }
                Definition::TypeDefinition(definition) => schema.add_type(definition),
                Definition::TypeExtension(extension) => schema.extend_type(extension),
                Definition::DirectiveDefinition(_) => {}
            }
        }

        Ok(schema)
    }

    #[must_use]
    pub fn query_type(&self) -> &str {
        &self.query_type
    }

    #[must_use]
    pub fn mutation_type(&self) -> &str {
        &self.mutation_type
    }

    #[must_use]
    pub fn subscription_type(&self) -> &str {
        &self.subscription_type
    }

    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<&NamedType> {
        self.types.get(type_name)
    }

    /// Looks up a field on an object or interface type.
    #[must_use]
    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDefinition> {
        match self.types.get(type_name)? {
            NamedType::Object { fields } | NamedType::Interface { fields } => {
                fields.get(field_name)
            }
            _ => None,
        }
    }

    fn add_type(&mut self, definition: TypeDefinition<'_, String>) {
        let (name, named_type) = match definition {
            TypeDefinition::Scalar(scalar) => (scalar.name, NamedType::Scalar),
            TypeDefinition::Object(object) => (
                object.name,
                NamedType::Object {
                    fields: field_definitions(object.fields),
                },
            ),
            TypeDefinition::Interface(interface) => (
                interface.name,
                NamedType::Interface {
                    fields: field_definitions(interface.fields),
                },
            ),
            TypeDefinition::Union(union) => (
                union.name,
                NamedType::Union {
                    members: union.types,
                },
            ),
            TypeDefinition::Enum(enum_type) => (
                enum_type.name,
                NamedType::Enum {
                    values: enum_type.values.into_iter().map(|v| v.name).collect(),
                },
            ),
            TypeDefinition::InputObject(input) => (
                input.name,
                NamedType::InputObject {
                    fields: input_fields(input.fields),
                },
            ),
        };

        // An extension may have been seen before its base definition.
        match self.types.remove(&name) {
            Some(existing) => {
                let merged = merge(named_type, existing);
                self.types.insert(name, merged);
            }
            None => {
                self.types.insert(name, named_type);
            }
        }
    }

    fn extend_type(&mut self, extension: TypeExtension<'_, String>) {
        let (name, extension) = match extension {
            TypeExtension::Scalar(scalar) => (scalar.name, NamedType::Scalar),
            TypeExtension::Object(object) => (
                object.name,
                NamedType::Object {
                    fields: field_definitions(object.fields),
                },
            ),
            TypeExtension::Interface(interface) => (
                interface.name,
                NamedType::Interface {
                    fields: field_definitions(interface.fields),
                },
            ),
            TypeExtension::Union(union) => (
                union.name,
                NamedType::Union {
                    members: union.types,
                },
            ),
            TypeExtension::Enum(enum_type) => (
                enum_type.name,
                NamedType::Enum {
                    values: enum_type.values.into_iter().map(|v| v.name).collect(),
                },
            ),
            TypeExtension::InputObject(input) => (
                input.name,
                NamedType::InputObject {
                    fields: input_fields(input.fields),
                },
            ),
        };

        let merged = match self.types.remove(&name) {
            Some(existing) => merge(existing, extension),
            None => extension,
        };
        self.types.insert(name, merged);
    }
}

/// Appends the members of `extension` to `base` when both are the same kind of type. A kind
/// mismatch keeps `base` untouched.
fn merge(base: NamedType, extension: NamedType) -> NamedType {
    match (base, extension) {
        (NamedType::Object { mut fields }, NamedType::Object { fields: extra }) => {
            fields.extend(extra);
            NamedType::Object { fields }
        }
        (NamedType::Interface { mut fields }, NamedType::Interface { fields: extra }) => {
            fields.extend(extra);
            NamedType::Interface { fields }
        }
        (NamedType::Union { mut members }, NamedType::Union { members: extra }) => {
            members.extend(extra);
            NamedType::Union { members }
        }
        (NamedType::Enum { mut values }, NamedType::Enum { values: extra }) => {
            values.extend(extra);
            NamedType::Enum { values }
        }
        (NamedType::InputObject { mut fields }, NamedType::InputObject { fields: extra }) => {
            fields.extend(extra);
            NamedType::InputObject { fields }
        }
        (base, _) => base,
    }
}

fn field_definitions(fields: Vec<Field<'_, String>>) -> HashMap<String, FieldDefinition> {
    fields
        .into_iter()
        .map(|field| {
            let definition = FieldDefinition {
                type_name: unwrap_type(&field.field_type).to_string(),
                arguments: input_fields(field.arguments).into_iter().collect(),
            };
            (field.name, definition)
        })
        .collect()
}

fn input_fields(values: Vec<InputValue<'_, String>>) -> Vec<(String, String)> {
    values
        .into_iter()
        .map(|value| {
            let type_name = unwrap_type(&value.value_type).to_string();
            (value.name, type_name)
        })
        .collect()
}

/// Strips list and non-null wrappers down to the named type.
pub(crate) fn unwrap_type<'t>(ty: &'t Type<'_, String>) -> &'t str {
    match ty {
        Type::NamedType(name) => name,
        Type::ListType(inner) | Type::NonNullType(inner) => unwrap_type(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_indexes_types() {
        let schema = Schema::parse(
            r"
            type Query { post(id: ID!, tags: [String!]): Post }
            type Post { id: ID! title: String! }
            input PostFilter { title: String order: [Order!] }
            enum Order { ASC DESC }
            union Result = Post
            ",
        )
        .expect("valid schema");

        let post = schema.field("Query", "post").expect("Query.post");
        assert_eq!(post.type_name(), "Post");
        assert_eq!(post.argument_type("id"), Some("ID"));
        assert_eq!(post.argument_type("tags"), Some("String"));
        assert_eq!(post.argument_type("missing"), None);

        assert_eq!(
            schema.get("PostFilter"),
            Some(&NamedType::InputObject {
                fields: vec![
                    ("title".to_string(), "String".to_string()),
                    ("order".to_string(), "Order".to_string()),
                ]
            })
        );
        assert_eq!(
            schema.get("Order"),
            Some(&NamedType::Enum {
                values: vec!["ASC".to_string(), "DESC".to_string()]
            })
        );
        assert!(schema.field("Result", "id").is_none());
        assert_eq!(schema.get("Boolean"), Some(&NamedType::Scalar));
    }

    #[test]
    fn test_schema_definition_overrides_root_types() {
        let schema = Schema::parse(
            r"
            schema { query: RootQuery mutation: RootMutation }
            type RootQuery { ping: String }
            type RootMutation { pong: String }
            ",
        )
        .expect("valid schema");

        assert_eq!(schema.query_type(), "RootQuery");
        assert_eq!(schema.mutation_type(), "RootMutation");
        assert_eq!(schema.subscription_type(), "Subscription");
    }

    #[test]
    fn test_extensions_merge_into_base_type() {
        let schema = Schema::parse(
            r"
            extend type Query { late: String }
            type Query { early: String }
            extend enum Color { BLUE }
            enum Color { RED }
            ",
        )
        .expect("valid schema");

        assert!(schema.field("Query", "early").is_some());
        assert!(schema.field("Query", "late").is_some());
        let Some(NamedType::Enum { values }) = schema.get("Color") else {
            panic!("Color should be an enum");
        };
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_invalid_sdl_is_an_error() {
        assert!(matches!(
            Schema::parse("type Query {"),
            Err(crate::Error::UnableToParseSchema { .. })
        ));
    }
}
