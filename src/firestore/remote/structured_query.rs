use serde_json::{json, Value as JsonValue};

use crate::firestore::api::query::{FieldFilter, Query};
use crate::firestore::remote::serializer::JsonProtoSerializer;

/// Encodes the `StructuredQuery` for a listen target.
pub(crate) fn encode_structured_query(
    serializer: &JsonProtoSerializer,
    query: &Query,
) -> JsonValue {
    let mut structured = serde_json::Map::new();

    structured.insert(
        "from".to_string(),
        json!([{
            "collectionId": query.collection_id(),
            "allDescendants": false,
        }]),
    );

    if !query.filters().is_empty() {
        structured.insert("where".to_string(), encode_filters(serializer, query.filters()));
    }

    if !query.order_by_clauses().is_empty() {
        let orders: Vec<_> = query
            .order_by_clauses()
            .iter()
            .map(|order| {
                json!({
                    "field": { "fieldPath": order.field().canonical_string() },
                    "direction": order.direction().as_str(),
                })
            })
            .collect();
        structured.insert("orderBy".to_string(), JsonValue::Array(orders));
    }

    JsonValue::Object(structured)
}

/// Encodes the `QueryTarget` (`parent` plus `structuredQuery`) for `query`.
pub(crate) fn encode_query_target(serializer: &JsonProtoSerializer, query: &Query) -> JsonValue {
    json!({
        "parent": serializer.resource_name(&query.parent_path()),
        "structuredQuery": encode_structured_query(serializer, query),
    })
}

fn encode_filters(serializer: &JsonProtoSerializer, filters: &[FieldFilter]) -> JsonValue {
    if let [single] = filters {
        return encode_field_filter(serializer, single);
    }

    let nested: Vec<_> = filters
        .iter()
        .map(|filter| encode_field_filter(serializer, filter))
        .collect();

    json!({
        "compositeFilter": {
            "op": "AND",
            "filters": nested
        }
    })
}

fn encode_field_filter(serializer: &JsonProtoSerializer, filter: &FieldFilter) -> JsonValue {
    json!({
        "fieldFilter": {
            "field": { "fieldPath": filter.field().canonical_string() },
            "op": filter.operator().as_str(),
            "value": serializer.encode_value(filter.value())
        }
    })
}
