//! Executes requests against a stitched set of sources.
//!
//! Root fields are routed to the source that owns them. Everything below the
//! root is opaque to the router and handled by the owning source.
use std::{collections::HashMap, sync::Arc, time::Instant};

use async_graphql::{
    Name, Request, Response, ServerError, Value, Variables,
    indexmap::IndexMap,
    parser::{
        Positioned, parse_query,
        types::{
            DocumentOperations, ExecutableDocument, Field, OperationDefinition, OperationType,
            Selection, SelectionSet,
        },
    },
};
use futures_util::future::join_all;

use super::{
    SchemaBuildError,
    context::RequestContext,
    merge::{MergedTypeSystem, RootKind, merge},
    printer::print_operation,
    shadow,
    source::SchemaSource,
};

/// Where a group of root fields is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Target {
    Source(usize),
    Introspection,
}

/// Several sources merged behind one endpoint.
pub struct StitchedSchema {
    sources: Vec<Arc<dyn SchemaSource>>,
    types: MergedTypeSystem,
    introspection: Option<async_graphql::dynamic::Schema>,
    /// Source that answers meta fields when no shadow schema could be built.
    fallback: usize,
    trace_sources: bool,
}

impl StitchedSchema {
    /// Introspect and merge `sources` in order. The last source wins type
    /// conflicts and answers introspection if the shadow schema fails.
    pub async fn build(sources: Vec<Arc<dyn SchemaSource>>) -> Result<Self, SchemaBuildError> {
        if sources.is_empty() {
            return Err(SchemaBuildError::NoSources);
        }

        let mut described = Vec::with_capacity(sources.len());
        for source in &sources {
            described.push(source.introspect().await?);
        }
        let refs: Vec<_> = described.iter().collect();
        let types = merge(&refs);

        let introspection = match shadow::build(&types) {
            Ok(schema) => Some(schema),
            Err(e) => {
                tracing::warn!(
                    "Introspection over the merged schema is unavailable, falling back to the local schema: {e}"
                );
                None
            }
        };

        Ok(Self {
            fallback: sources.len() - 1,
            sources,
            types,
            introspection,
            trace_sources: false,
        })
    }

    /// Log how long each source takes to answer its share of a request.
    pub fn with_source_tracing(mut self, enabled: bool) -> Self {
        self.trace_sources = enabled;
        self
    }

    pub async fn execute(&self, request: Request, ctx: &RequestContext) -> Response {
        let document = match parse_query(&request.query) {
            Ok(document) => document,
            Err(e) => return error_response(e.to_string()),
        };
        let (name, operation) = match select_operation(&document, request.operation_name.as_deref()) {
            Ok(selected) => selected,
            Err(message) => return error_response(message),
        };

        let kind = match operation.ty {
            OperationType::Query => RootKind::Query,
            OperationType::Mutation => RootKind::Mutation,
            OperationType::Subscription => {
                return error_response("Subscriptions are not supported by this gateway".to_string());
            }
        };

        let mut fields = Vec::new();
        flatten_root(&operation.selection_set.node, &document, &mut fields, 0);
        if fields.is_empty() {
            return Response::new(Value::Object(IndexMap::new()));
        }

        let mut routed = Vec::with_capacity(fields.len());
        for field in fields {
            match self.route(kind, &field.node.name.node) {
                Some(target) => routed.push((target, field)),
                None => {
                    let root = self
                        .types
                        .root_type_name(kind)
                        .unwrap_or(kind.default_type_name());
                    return error_response(format!(
                        "Cannot query field \"{}\" on type \"{root}\".",
                        field.node.name.node
                    ));
                }
            }
        }

        let groups = group(routed, kind == RootKind::Mutation);
        let plans: Vec<(Target, Request)> = groups
            .iter()
            .map(|group| {
                let printed =
                    print_operation(name.as_deref(), operation, &group.fields, &document.fragments);
                let mut variables = Variables::default();
                for variable in &printed.variables {
                    if let Some(value) = request.variables.get(variable) {
                        variables.insert(variable.clone(), value.clone());
                    }
                }
                let mut sub = Request::new(printed.query).variables(variables);
                if let Some(name) = &name {
                    sub = sub.operation_name(name.as_str());
                }
                (group.target, sub)
            })
            .collect();

        let responses = if kind == RootKind::Mutation {
            let mut responses = Vec::with_capacity(plans.len());
            for (target, sub) in plans {
                responses.push(self.run(target, sub, ctx).await);
            }
            responses
        } else {
            join_all(plans.into_iter().map(|(target, sub)| self.run(target, sub, ctx))).await
        };

        merge_responses(&groups, responses)
    }

    fn route(&self, kind: RootKind, field: &str) -> Option<Target> {
        if field.starts_with("__") {
            return Some(match self.introspection {
                Some(_) => Target::Introspection,
                None => Target::Source(self.fallback),
            });
        }
        self.types.owner(kind, field).map(Target::Source)
    }

    async fn run(&self, target: Target, request: Request, ctx: &RequestContext) -> Response {
        match target {
            Target::Introspection => match &self.introspection {
                Some(schema) => schema.execute(request).await,
                None => self.sources[self.fallback].execute(request, ctx).await,
            },
            Target::Source(index) => {
                let source = &self.sources[index];
                let started = Instant::now();
                let response = source.execute(request, ctx).await;
                if self.trace_sources {
                    tracing::info!(
                        source = source.name(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        errors = response.errors.len(),
                        "Resolved root fields"
                    );
                }
                response
            }
        }
    }
}

fn error_response(message: String) -> Response {
    Response::from_errors(vec![ServerError::new(message, None)])
}

fn select_operation<'a>(
    document: &'a ExecutableDocument,
    requested: Option<&str>,
) -> Result<(Option<String>, &'a OperationDefinition), String> {
    match (&document.operations, requested) {
        (DocumentOperations::Single(operation), _) => Ok((None, &operation.node)),
        (DocumentOperations::Multiple(operations), Some(requested)) => operations
            .iter()
            .find(|(name, _)| name.as_str() == requested)
            .map(|(name, operation)| (Some(name.to_string()), &operation.node))
            .ok_or_else(|| format!("Unknown operation named \"{requested}\"")),
        (DocumentOperations::Multiple(operations), None) if operations.len() == 1 => {
            let (name, operation) = operations
                .iter()
                .next()
                .ok_or_else(|| "Document does not contain an operation".to_string())?;
            Ok((Some(name.to_string()), &operation.node))
        }
        (DocumentOperations::Multiple(_), None) => {
            Err("Must provide operation name if query contains multiple operations".to_string())
        }
    }
}

const MAX_FRAGMENT_DEPTH: usize = 32;

/// Collect root fields, expanding root-level fragments. Directives on an
/// expanded fragment move onto each of its fields.
fn flatten_root(
    set: &SelectionSet,
    document: &ExecutableDocument,
    out: &mut Vec<Positioned<Field>>,
    depth: usize,
) {
    if depth > MAX_FRAGMENT_DEPTH {
        return;
    }
    for item in &set.items {
        match &item.node {
            Selection::Field(field) => out.push(field.clone()),
            Selection::InlineFragment(inline) => {
                let start = out.len();
                flatten_root(&inline.node.selection_set.node, document, out, depth + 1);
                for field in &mut out[start..] {
                    field.node.directives.extend(inline.node.directives.iter().cloned());
                }
            }
            Selection::FragmentSpread(spread) => {
                if let Some(fragment) = document.fragments.get(&spread.node.fragment_name.node) {
                    let start = out.len();
                    flatten_root(&fragment.node.selection_set.node, document, out, depth + 1);
                    for field in &mut out[start..] {
                        field.node.directives.extend(spread.node.directives.iter().cloned());
                    }
                }
            }
        }
    }
}

/// Root fields sent to one target, with their positions in the request.
struct Group {
    target: Target,
    fields: Vec<Positioned<Field>>,
    order: Vec<usize>,
}

/// Group routed fields by target. Mutations only group adjacent fields so
/// that execution order is preserved.
fn group(routed: Vec<(Target, Positioned<Field>)>, keep_order: bool) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<Target, usize> = HashMap::new();
    for (position, (target, field)) in routed.into_iter().enumerate() {
        let existing = if keep_order {
            groups
                .last()
                .filter(|last| last.target == target)
                .map(|_| groups.len() - 1)
        } else {
            index.get(&target).copied()
        };
        match existing {
            Some(slot) => {
                groups[slot].fields.push(field);
                groups[slot].order.push(position);
            }
            None => {
                index.insert(target, groups.len());
                groups.push(Group {
                    target,
                    fields: vec![field],
                    order: vec![position],
                });
            }
        }
    }
    groups
}

/// Reassemble group responses into one, in the original field order.
fn merge_responses(groups: &[Group], responses: Vec<Response>) -> Response {
    let mut errors = Vec::new();
    let mut any_data = false;
    let mut keyed: Vec<(usize, Name, Value)> = Vec::new();

    for (group, response) in groups.iter().zip(responses) {
        errors.extend(response.errors);
        let mut map = match response.data {
            Value::Object(map) => {
                any_data = true;
                Some(map)
            }
            _ => None,
        };
        for (field, position) in group.fields.iter().zip(&group.order) {
            let key = field.node.response_key().node.clone();
            let value = map
                .as_mut()
                .and_then(|map| map.shift_remove(&key))
                .unwrap_or(Value::Null);
            keyed.push((*position, key, value));
        }
    }

    keyed.sort_by_key(|(position, _, _)| *position);
    let mut data: IndexMap<Name, Value> = IndexMap::new();
    for (_, key, value) in keyed {
        data.entry(key).or_insert(value);
    }

    let data = if any_data {
        Value::Object(data)
    } else {
        Value::Null
    };
    let mut response = Response::new(data);
    response.errors = errors;
    response
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_graphql::{Context, EmptySubscription, Object, Schema, SimpleObject};
    use serde_json::json;

    use super::*;
    use crate::schema::source::LocalSchema;

    #[derive(SimpleObject)]
    struct Offer {
        id: i32,
        crop: String,
    }

    struct OffersQuery;

    #[Object(name = "Query")]
    impl OffersQuery {
        async fn offers(&self, crop: String) -> Vec<Offer> {
            vec![Offer { id: 1, crop }]
        }
    }

    type Journal = Arc<Mutex<Vec<&'static str>>>;

    struct OffersMutation;

    #[Object(name = "Mutation")]
    impl OffersMutation {
        async fn cancel_offer(&self, ctx: &Context<'_>, id: i32) -> i32 {
            ctx.data_unchecked::<Journal>().lock().unwrap().push("cancel");
            id
        }
    }

    struct LocalQuery;

    #[Object(name = "Query")]
    impl LocalQuery {
        async fn version(&self) -> &str {
            "1.2.3"
        }
    }

    struct LocalMutation;

    #[Object(name = "Mutation")]
    impl LocalMutation {
        async fn place_bid(&self, ctx: &Context<'_>, amount: i32) -> i32 {
            ctx.data_unchecked::<Journal>().lock().unwrap().push("bid");
            amount
        }
    }

    async fn stitched(journal: Journal) -> StitchedSchema {
        let offers = Schema::build(OffersQuery, OffersMutation, EmptySubscription)
            .data(journal.clone())
            .finish();
        let local = Schema::build(LocalQuery, LocalMutation, EmptySubscription)
            .data(journal)
            .finish();
        StitchedSchema::build(vec![
            Arc::new(LocalSchema::new(offers)),
            Arc::new(LocalSchema::new(local)),
        ])
        .await
        .unwrap()
    }

    async fn run(schema: &StitchedSchema, request: Request) -> (serde_json::Value, Vec<String>) {
        let response = schema.execute(request, &RequestContext::default()).await;
        let errors = response.errors.iter().map(|e| e.message.clone()).collect();
        (response.data.into_json().unwrap(), errors)
    }

    #[tokio::test]
    async fn test_query_spanning_sources_keeps_field_order() {
        let schema = stitched(Journal::default()).await;
        let request = Request::new(
            r#"query Market($crop: String!) {
                version
                corn: offers(crop: $crop) { ...OfferFields }
                __typename
            }
            fragment OfferFields on Offer { id crop }"#,
        )
        .variables(Variables::from_json(json!({ "crop": "CORN" })));

        let (data, errors) = run(&schema, request).await;
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(
            data,
            json!({
                "version": "1.2.3",
                "corn": [{ "id": 1, "crop": "CORN" }],
                "__typename": "Query"
            })
        );
        let keys: Vec<String> = data.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["version", "corn", "__typename"]);
    }

    #[tokio::test]
    async fn test_root_fragments_are_routed_per_field() {
        let schema = stitched(Journal::default()).await;
        let (data, errors) = run(
            &schema,
            Request::new("{ ...Everything } fragment Everything on Query { version offers(crop: \"OATS\") { id } }"),
        )
        .await;
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(data, json!({ "version": "1.2.3", "offers": [{ "id": 1 }] }));
    }

    #[tokio::test]
    async fn test_mutations_run_in_document_order() {
        let journal = Journal::default();
        let schema = stitched(journal.clone()).await;
        let (data, errors) = run(
            &schema,
            Request::new("mutation { a: placeBid(amount: 5) cancelOffer(id: 9) b: placeBid(amount: 6) }"),
        )
        .await;

        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(data, json!({ "a": 5, "cancelOffer": 9, "b": 6 }));
        assert_eq!(*journal.lock().unwrap(), vec!["bid", "cancel", "bid"]);
    }

    #[tokio::test]
    async fn test_introspection_sees_merged_type_system() {
        let schema = stitched(Journal::default()).await;
        let (data, errors) = run(
            &schema,
            Request::new("{ __type(name: \"Query\") { fields { name } } }"),
        )
        .await;
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(
            data,
            json!({ "__type": { "fields": [{ "name": "offers" }, { "name": "version" }] } })
        );
    }

    #[tokio::test]
    async fn test_unknown_field_and_subscription_are_rejected() {
        let schema = stitched(Journal::default()).await;

        let (_, errors) = run(&schema, Request::new("{ hedgeOrders }")).await;
        assert_eq!(errors, vec!["Cannot query field \"hedgeOrders\" on type \"Query\"."]);

        let (_, errors) = run(&schema, Request::new("subscription { ticks }")).await;
        assert_eq!(errors, vec!["Subscriptions are not supported by this gateway"]);
    }

    #[tokio::test]
    async fn test_operation_selection() {
        let schema = stitched(Journal::default()).await;
        let query = "query A { version } query B { offers(crop: \"CORN\") { id } }";

        let (data, _) = run(&schema, Request::new(query).operation_name("B")).await;
        assert_eq!(data, json!({ "offers": [{ "id": 1 }] }));

        let (_, errors) = run(&schema, Request::new(query)).await;
        assert_eq!(
            errors,
            vec!["Must provide operation name if query contains multiple operations"]
        );
    }

    #[tokio::test]
    async fn test_group_splits_mutations_only_on_owner_change() {
        let field = |name: &str| {
            let document = parse_query(format!("{{ {name} }}")).unwrap();
            match document.operations {
                DocumentOperations::Single(op) => match &op.node.selection_set.node.items[0].node {
                    Selection::Field(field) => field.clone(),
                    _ => unreachable!(),
                },
                _ => unreachable!(),
            }
        };
        let routed = || {
            vec![
                (Target::Source(0), field("a")),
                (Target::Source(1), field("b")),
                (Target::Source(0), field("c")),
            ]
        };

        assert_eq!(group(routed(), false).len(), 2);
        let ordered = group(routed(), true);
        assert_eq!(ordered.len(), 3);
        assert_eq!(ordered[2].order, vec![2]);
    }
}
