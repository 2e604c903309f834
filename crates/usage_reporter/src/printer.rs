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

//! Canonical printing of executable documents.
//!
//! The canonical form is what gets fingerprinted, so it only keeps the shape of an operation:
//! - scalar literals are replaced (`0` for numbers, `""` for strings)
//! - aliases are dropped
//! - arguments, directives, selections and variable definitions are sorted by name, with
//!   same-name siblings ordered by their printed text
//!
//! Two operations that only differ in literal values, aliases or ordering print identically.

use graphql_parser::query::{
    Definition, Directive, Document, FragmentDefinition, OperationDefinition, Selection,
    SelectionSet, Type, TypeCondition, Value, VariableDefinition,
};

const INDENT: &str = "  ";

/// Prints a whole document in canonical form.
#[must_use]
pub fn print(document: &Document<'_, String>) -> String {
    print_definitions(&document.definitions)
}

/// Prints a sequence of definitions, possibly gathered from several documents, as one
/// canonical document.
pub fn print_definitions<'a, 'd, I>(definitions: I) -> String
where
    I: IntoIterator<Item = &'d Definition<'a, String>>,
    'a: 'd,
{
    let mut printer = Printer::default();
    for (i, definition) in definitions.into_iter().enumerate() {
        if i > 0 {
            printer.out.push_str("\n\n");
        }
        printer.definition(definition);
    }
    printer.out
}

#[derive(Default)]
struct Printer {
    out: String,
}

impl Printer {
    fn definition(&mut self, definition: &Definition<'_, String>) {
        match definition {
            Definition::Operation(operation) => self.operation(operation),
            Definition::Fragment(fragment) => self.fragment(fragment),
        }
    }

    fn operation(&mut self, operation: &OperationDefinition<'_, String>) {
        match operation {
            OperationDefinition::SelectionSet(selection_set) => {
                self.out.push_str("query");
                self.selection_set(selection_set, "");
            }
            OperationDefinition::Query(query) => self.operation_definition(
                "query",
                query.name.as_deref(),
                &query.variable_definitions,
                &query.directives,
                &query.selection_set,
            ),
            OperationDefinition::Mutation(mutation) => self.operation_definition(
                "mutation",
                mutation.name.as_deref(),
                &mutation.variable_definitions,
                &mutation.directives,
                &mutation.selection_set,
            ),
            OperationDefinition::Subscription(subscription) => self.operation_definition(
                "subscription",
                subscription.name.as_deref(),
                &subscription.variable_definitions,
                &subscription.directives,
                &subscription.selection_set,
            ),
        }
    }

    fn operation_definition(
        &mut self,
        kind: &str,
        name: Option<&str>,
        variables: &[VariableDefinition<'_, String>],
        directives: &[Directive<'_, String>],
        selection_set: &SelectionSet<'_, String>,
    ) {
        self.out.push_str(kind);
        if let Some(name) = name {
            self.out.push(' ');
            self.out.push_str(name);
        }

        if !variables.is_empty() {
            let mut sorted: Vec<_> = variables.iter().collect();
            sorted.sort_by(|a, b| a.name.cmp(&b.name));

            self.out.push('(');
            for (i, variable) in sorted.into_iter().enumerate() {
                if i > 0 {
                    self.out.push_str(", ");
                }
                self.out.push('$');
                self.out.push_str(&variable.name);
                self.out.push_str(": ");
                self.type_ref(&variable.var_type);
                if let Some(default_value) = &variable.default_value {
                    self.out.push_str(" = ");
                    self.value(default_value);
                }
            }
            self.out.push(')');
        }

        self.directives(directives);
        self.selection_set(selection_set, "");
    }

    fn fragment(&mut self, fragment: &FragmentDefinition<'_, String>) {
        let TypeCondition::On(type_name) = &fragment.type_condition;
        self.out.push_str("fragment ");
        self.out.push_str(&fragment.name);
        self.out.push_str(" on ");
        self.out.push_str(type_name);
        self.directives(&fragment.directives);
        self.selection_set(&fragment.selection_set, "");
    }

    fn selection_set(&mut self, selection_set: &SelectionSet<'_, String>, indent: &str) {
        if selection_set.items.is_empty() {
            return;
        }

        let inner = format!("{indent}{INDENT}");
        // Siblings can share a key once aliases are gone, so the printed text breaks ties.
        let mut selections: Vec<_> = selection_set
            .items
            .iter()
            .map(|selection| {
                let printed = render(|printer| printer.selection(selection, &inner));
                (selection_key(selection), printed)
            })
            .collect();
        selections.sort_unstable();

        self.out.push_str(" {\n");
        for (_, printed) in selections {
            self.out.push_str(&printed);
            self.out.push('\n');
        }
        self.out.push_str(indent);
        self.out.push('}');
    }

    fn selection(&mut self, selection: &Selection<'_, String>, indent: &str) {
        self.out.push_str(indent);
        match selection {
            Selection::Field(field) => {
                // Aliases are intentionally not printed.
                self.out.push_str(&field.name);
                self.arguments(&field.arguments);
                self.directives(&field.directives);
                self.selection_set(&field.selection_set, indent);
            }
            Selection::FragmentSpread(spread) => {
                self.out.push_str("...");
                self.out.push_str(&spread.fragment_name);
                self.directives(&spread.directives);
            }
            Selection::InlineFragment(inline) => {
                self.out.push_str("...");
                if let Some(TypeCondition::On(type_name)) = &inline.type_condition {
                    self.out.push_str(" on ");
                    self.out.push_str(type_name);
                }
                self.directives(&inline.directives);
                self.selection_set(&inline.selection_set, indent);
            }
        }
    }

    fn arguments(&mut self, arguments: &[(String, Value<'_, String>)]) {
        if arguments.is_empty() {
            return;
        }

        let mut sorted: Vec<_> = arguments.iter().collect();
        sorted.sort_by(|(a, _), (b, _)| a.cmp(b));

        self.out.push('(');
        for (i, (name, value)) in sorted.into_iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.out.push_str(name);
            self.out.push_str(": ");
            self.value(value);
        }
        self.out.push(')');
    }

    fn directives(&mut self, directives: &[Directive<'_, String>]) {
        let mut sorted: Vec<_> = directives
            .iter()
            .map(|directive| {
                let printed = render(|printer| {
                    printer.out.push_str(" @");
                    printer.out.push_str(&directive.name);
                    printer.arguments(&directive.arguments);
                });
                (directive.name.as_str(), printed)
            })
            .collect();
        sorted.sort_unstable();

        for (_, printed) in sorted {
            self.out.push_str(&printed);
        }
    }

    fn value(&mut self, value: &Value<'_, String>) {
        match value {
            Value::Variable(name) => {
                self.out.push('$');
                self.out.push_str(name);
            }
            Value::Int(_) | Value::Float(_) => self.out.push('0'),
            Value::String(_) => self.out.push_str("\"\""),
            Value::Boolean(true) => self.out.push_str("true"),
            Value::Boolean(false) => self.out.push_str("false"),
            Value::Null => self.out.push_str("null"),
            Value::Enum(name) => self.out.push_str(name),
            Value::List(items) => {
                self.out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.value(item);
                }
                self.out.push(']');
            }
            // Object fields are kept in a BTreeMap, so they are already sorted.
            Value::Object(fields) => {
                self.out.push('{');
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.out.push_str(name);
                    self.out.push_str(": ");
                    self.value(value);
                }
                self.out.push('}');
            }
        }
    }

    fn type_ref(&mut self, ty: &Type<'_, String>) {
        match ty {
            Type::NamedType(name) => self.out.push_str(name),
            Type::ListType(inner) => {
                self.out.push('[');
                self.type_ref(inner);
                self.out.push(']');
            }
            Type::NonNullType(inner) => {
                self.type_ref(inner);
                self.out.push('!');
            }
        }
    }
}

fn render(print: impl FnOnce(&mut Printer)) -> String {
    let mut printer = Printer::default();
    print(&mut printer);
    printer.out
}

fn selection_key<'s>(selection: &'s Selection<'_, String>) -> &'s str {
    match selection {
        Selection::Field(field) => &field.name,
        Selection::FragmentSpread(spread) => &spread.fragment_name,
        Selection::InlineFragment(inline) => match &inline.type_condition {
            Some(TypeCondition::On(type_name)) => type_name,
            None => "",
        },
    }
}
