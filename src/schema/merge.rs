//! Union of several introspected type systems.
//!
//! Sources are merged in order: a named type from a later source replaces the
//! same name from an earlier one. Root operation types are the exception;
//! their fields are merged one by one and each field remembers which source
//! declared it last, so the router knows where to send it.
use std::collections::HashMap;

use super::introspection::{FullType, IntrospectionSchema, NamedRef, TypeKind};

/// The three GraphQL root operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind {
    Query,
    Mutation,
    Subscription,
}

impl RootKind {
    pub const ALL: [RootKind; 3] = [RootKind::Query, RootKind::Mutation, RootKind::Subscription];

    pub fn default_type_name(&self) -> &'static str {
        match self {
            RootKind::Query => "Query",
            RootKind::Mutation => "Mutation",
            RootKind::Subscription => "Subscription",
        }
    }

    fn root_name<'a>(&self, schema: &'a IntrospectionSchema) -> Option<&'a str> {
        match self {
            RootKind::Query => schema.query_type_name(),
            RootKind::Mutation => schema.mutation_type_name(),
            RootKind::Subscription => schema.subscription_type_name(),
        }
    }
}

/// Merged type system plus the owner of every root field.
#[derive(Debug, Clone)]
pub struct MergedTypeSystem {
    schema: IntrospectionSchema,
    owners: HashMap<(RootKind, String), usize>,
}

impl MergedTypeSystem {
    pub fn schema(&self) -> &IntrospectionSchema {
        &self.schema
    }

    /// Index of the source that serves root field `field` of `kind`.
    pub fn owner(&self, kind: RootKind, field: &str) -> Option<usize> {
        self.owners.get(&(kind, field.to_string())).copied()
    }

    pub fn root_type_name(&self, kind: RootKind) -> Option<&str> {
        kind.root_name(&self.schema)
    }
}

/// Merge `sources` in order. Source indices in the result refer to positions
/// in `sources`.
pub fn merge(sources: &[&IntrospectionSchema]) -> MergedTypeSystem {
    let mut types: Vec<FullType> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut directives = Vec::new();
    let mut directive_positions: HashMap<String, usize> = HashMap::new();

    let mut root_names: HashMap<RootKind, String> = HashMap::new();
    let mut root_types: HashMap<RootKind, FullType> = HashMap::new();
    let mut owners = HashMap::new();

    for (index, source) in sources.iter().enumerate() {
        let source_roots: HashMap<&str, RootKind> = RootKind::ALL
            .iter()
            .filter_map(|kind| kind.root_name(source).map(|name| (name, *kind)))
            .collect();

        for ty in &source.types {
            if let Some(kind) = source_roots.get(ty.name.as_str()) {
                merge_root(*kind, ty, index, &mut root_types, &mut owners);
                root_names.insert(*kind, ty.name.clone());
                continue;
            }
            match positions.get(&ty.name) {
                Some(&position) => types[position] = ty.clone(),
                None => {
                    positions.insert(ty.name.clone(), types.len());
                    types.push(ty.clone());
                }
            }
        }

        for directive in &source.directives {
            match directive_positions.get(&directive.name) {
                Some(&position) => directives[position] = directive.clone(),
                None => {
                    directive_positions.insert(directive.name.clone(), directives.len());
                    directives.push(directive.clone());
                }
            }
        }
    }

    let mut root_refs: HashMap<RootKind, NamedRef> = HashMap::new();
    for kind in RootKind::ALL {
        if let Some(mut root) = root_types.remove(&kind) {
            let name = root_names
                .remove(&kind)
                .unwrap_or_else(|| kind.default_type_name().to_string());
            root.name = name.clone();
            // A plain type with the root's name would shadow the root.
            if let Some(position) = positions.remove(&name) {
                types.remove(position);
                for value in positions.values_mut() {
                    if *value > position {
                        *value -= 1;
                    }
                }
            }
            types.push(root);
            root_refs.insert(kind, NamedRef { name });
        }
    }

    MergedTypeSystem {
        schema: IntrospectionSchema {
            query_type: root_refs.remove(&RootKind::Query),
            mutation_type: root_refs.remove(&RootKind::Mutation),
            subscription_type: root_refs.remove(&RootKind::Subscription),
            types,
            directives,
        },
        owners,
    }
}

fn merge_root(
    kind: RootKind,
    ty: &FullType,
    index: usize,
    roots: &mut HashMap<RootKind, FullType>,
    owners: &mut HashMap<(RootKind, String), usize>,
) {
    let root = roots.entry(kind).or_insert_with(|| FullType {
        kind: TypeKind::Object,
        name: ty.name.clone(),
        description: None,
        fields: Some(Vec::new()),
        input_fields: None,
        interfaces: Some(Vec::new()),
        enum_values: None,
        possible_types: None,
    });
    if ty.description.is_some() {
        root.description = ty.description.clone();
    }

    let fields = root.fields.get_or_insert_with(Vec::new);
    for field in ty.fields.iter().flatten() {
        match fields.iter_mut().find(|existing| existing.name == field.name) {
            Some(existing) => *existing = field.clone(),
            None => fields.push(field.clone()),
        }
        owners.insert((kind, field.name.clone()), index);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema(value: serde_json::Value) -> IntrospectionSchema {
        serde_json::from_value(value).unwrap()
    }

    fn scalar_field(name: &str, scalar: &str) -> serde_json::Value {
        json!({
            "name": name,
            "args": [],
            "type": { "kind": "SCALAR", "name": scalar }
        })
    }

    fn offers_remote() -> IntrospectionSchema {
        schema(json!({
            "queryType": { "name": "Query" },
            "types": [
                { "kind": "OBJECT", "name": "Query", "fields": [
                    scalar_field("offers", "String"),
                    scalar_field("version", "String")
                ]},
                { "kind": "OBJECT", "name": "Offer", "description": "remote", "fields": [
                    scalar_field("id", "ID")
                ]}
            ]
        }))
    }

    fn local() -> IntrospectionSchema {
        schema(json!({
            "queryType": { "name": "RootQuery" },
            "mutationType": { "name": "RootMutation" },
            "types": [
                { "kind": "OBJECT", "name": "RootQuery", "fields": [
                    scalar_field("version", "String"),
                    scalar_field("bids", "String")
                ]},
                { "kind": "OBJECT", "name": "RootMutation", "fields": [
                    scalar_field("placeBid", "Boolean")
                ]},
                { "kind": "OBJECT", "name": "Offer", "description": "local", "fields": [
                    scalar_field("id", "ID")
                ]}
            ]
        }))
    }

    #[test]
    fn test_root_fields_record_last_owner() {
        let remote = offers_remote();
        let local = local();
        let merged = merge(&[&remote, &local]);

        assert_eq!(merged.owner(RootKind::Query, "offers"), Some(0));
        assert_eq!(merged.owner(RootKind::Query, "version"), Some(1));
        assert_eq!(merged.owner(RootKind::Query, "bids"), Some(1));
        assert_eq!(merged.owner(RootKind::Mutation, "placeBid"), Some(1));
        assert_eq!(merged.owner(RootKind::Query, "missing"), None);
    }

    #[test]
    fn test_later_source_overrides_types() {
        let remote = offers_remote();
        let local = local();
        let merged = merge(&[&remote, &local]);

        let offer = merged.schema().find_type("Offer").unwrap();
        assert_eq!(offer.description.as_deref(), Some("local"));
        assert_eq!(
            merged.schema().types.iter().filter(|t| t.name == "Offer").count(),
            1
        );
    }

    #[test]
    fn test_root_names_follow_last_source() {
        let remote = offers_remote();
        let local = local();
        let merged = merge(&[&remote, &local]);

        assert_eq!(merged.root_type_name(RootKind::Query), Some("RootQuery"));
        assert_eq!(merged.root_type_name(RootKind::Mutation), Some("RootMutation"));
        assert_eq!(merged.root_type_name(RootKind::Subscription), None);

        let query = merged.schema().find_type("RootQuery").unwrap();
        let names: Vec<&str> = query
            .fields
            .iter()
            .flatten()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["offers", "version", "bids"]);
        assert!(merged.schema().find_type("Query").is_none());
    }
}
