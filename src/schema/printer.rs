//! Prints a subset of an executable document back to GraphQL text.
//!
//! The router hands each source only the root fields that source owns. The
//! printed document keeps the operation's name and directives, the variable
//! definitions actually referenced, and the fragments reachable from the
//! selected fields.
use std::{
    collections::{HashMap, HashSet},
    convert::Infallible,
    fmt::Write,
};

use async_graphql::{
    Name, Value,
    parser::{
        Positioned,
        types::{
            Directive, Field, FragmentDefinition, OperationDefinition, OperationType, Selection,
            SelectionSet,
        },
    },
};

type Fragments = HashMap<Name, Positioned<FragmentDefinition>>;

/// A printed sub-operation.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintedOperation {
    pub query: String,
    /// Variables referenced by the printed text.
    pub variables: HashSet<Name>,
}

pub fn operation_keyword(ty: OperationType) -> &'static str {
    match ty {
        OperationType::Query => "query",
        OperationType::Mutation => "mutation",
        OperationType::Subscription => "subscription",
    }
}

/// Print `operation` restricted to `fields`.
pub fn print_operation(
    name: Option<&str>,
    operation: &OperationDefinition,
    fields: &[Positioned<Field>],
    fragments: &Fragments,
) -> PrintedOperation {
    let mut used_fragments = Vec::new();
    let mut seen = HashSet::new();
    for field in fields {
        collect_fragments(&field.node.selection_set.node, fragments, &mut seen, &mut used_fragments);
    }

    let mut variables = HashSet::new();
    collect_directive_variables(&operation.directives, &mut variables);
    for field in fields {
        collect_field_variables(&field.node, &mut variables);
    }
    for fragment in &used_fragments {
        if let Some(definition) = fragments.get(fragment) {
            collect_directive_variables(&definition.node.directives, &mut variables);
            collect_selection_set_variables(&definition.node.selection_set.node, &mut variables);
        }
    }

    let mut out = String::new();
    out.push_str(operation_keyword(operation.ty));
    if let Some(name) = name {
        let _ = write!(out, " {name}");
    }

    let definitions: Vec<String> = operation
        .variable_definitions
        .iter()
        .filter(|def| variables.contains(&def.node.name.node))
        .map(|def| {
            let def = &def.node;
            let mut text = format!("${}: {}", def.name.node, def.var_type.node);
            if let Some(default) = &def.default_value {
                let _ = write!(text, " = {}", default.node);
            }
            write_directives(&mut text, &def.directives);
            text
        })
        .collect();
    if !definitions.is_empty() {
        let _ = write!(out, "({})", definitions.join(", "));
    }
    write_directives(&mut out, &operation.directives);

    out.push_str(" {");
    for field in fields {
        out.push(' ');
        write_field(&mut out, &field.node);
    }
    out.push_str(" }");

    for fragment in &used_fragments {
        if let Some(definition) = fragments.get(fragment) {
            let definition = &definition.node;
            let _ = write!(
                out,
                "\nfragment {fragment} on {}",
                definition.type_condition.node.on.node
            );
            write_directives(&mut out, &definition.directives);
            out.push(' ');
            write_selection_set(&mut out, &definition.selection_set.node);
        }
    }

    PrintedOperation {
        query: out,
        variables,
    }
}

fn write_field(out: &mut String, field: &Field) {
    if let Some(alias) = &field.alias {
        let _ = write!(out, "{}: ", alias.node);
    }
    out.push_str(field.name.node.as_str());
    if !field.arguments.is_empty() {
        let arguments: Vec<String> = field
            .arguments
            .iter()
            .map(|(name, value)| format!("{}: {}", name.node, value.node))
            .collect();
        let _ = write!(out, "({})", arguments.join(", "));
    }
    write_directives(out, &field.directives);
    if !field.selection_set.node.items.is_empty() {
        out.push(' ');
        write_selection_set(out, &field.selection_set.node);
    }
}

fn write_selection_set(out: &mut String, set: &SelectionSet) {
    out.push('{');
    for item in &set.items {
        out.push(' ');
        match &item.node {
            Selection::Field(field) => write_field(out, &field.node),
            Selection::FragmentSpread(spread) => {
                let _ = write!(out, "...{}", spread.node.fragment_name.node);
                write_directives(out, &spread.node.directives);
            }
            Selection::InlineFragment(inline) => {
                out.push_str("...");
                if let Some(condition) = &inline.node.type_condition {
                    let _ = write!(out, " on {}", condition.node.on.node);
                }
                write_directives(out, &inline.node.directives);
                out.push(' ');
                write_selection_set(out, &inline.node.selection_set.node);
            }
        }
    }
    out.push_str(" }");
}

fn write_directives(out: &mut String, directives: &[Positioned<Directive>]) {
    for directive in directives {
        let _ = write!(out, " @{}", directive.node.name.node);
        if !directive.node.arguments.is_empty() {
            let arguments: Vec<String> = directive
                .node
                .arguments
                .iter()
                .map(|(name, value)| format!("{}: {}", name.node, value.node))
                .collect();
            let _ = write!(out, "({})", arguments.join(", "));
        }
    }
}

fn collect_fragments(
    set: &SelectionSet,
    fragments: &Fragments,
    seen: &mut HashSet<Name>,
    ordered: &mut Vec<Name>,
) {
    for item in &set.items {
        match &item.node {
            Selection::Field(field) => {
                collect_fragments(&field.node.selection_set.node, fragments, seen, ordered)
            }
            Selection::InlineFragment(inline) => {
                collect_fragments(&inline.node.selection_set.node, fragments, seen, ordered)
            }
            Selection::FragmentSpread(spread) => {
                let name = &spread.node.fragment_name.node;
                if seen.insert(name.clone()) {
                    ordered.push(name.clone());
                    if let Some(definition) = fragments.get(name) {
                        collect_fragments(&definition.node.selection_set.node, fragments, seen, ordered);
                    }
                }
            }
        }
    }
}

/// Records every `$variable` referenced inside an argument value.
macro_rules! collect_value_variables {
    ($value:expr, $variables:expr) => {{
        let variables: &mut HashSet<Name> = $variables;
        let _ = $value.clone().into_const_with(|name| {
            variables.insert(name);
            Ok::<Value, Infallible>(Value::Null)
        });
    }};
}

fn collect_field_variables(field: &Field, variables: &mut HashSet<Name>) {
    for (_, value) in &field.arguments {
        collect_value_variables!(value.node, variables);
    }
    collect_directive_variables(&field.directives, variables);
    collect_selection_set_variables(&field.selection_set.node, variables);
}

fn collect_selection_set_variables(set: &SelectionSet, variables: &mut HashSet<Name>) {
    for item in &set.items {
        match &item.node {
            Selection::Field(field) => collect_field_variables(&field.node, variables),
            Selection::FragmentSpread(spread) => {
                collect_directive_variables(&spread.node.directives, variables)
            }
            Selection::InlineFragment(inline) => {
                collect_directive_variables(&inline.node.directives, variables);
                collect_selection_set_variables(&inline.node.selection_set.node, variables);
            }
        }
    }
}

fn collect_directive_variables(directives: &[Positioned<Directive>], variables: &mut HashSet<Name>) {
    for directive in directives {
        for (_, value) in &directive.node.arguments {
            collect_value_variables!(value.node, variables);
        }
    }
}
