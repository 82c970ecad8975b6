use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::{
    Document, DocumentComparator, FieldPath, IntoFieldPath, ResourcePath,
};
use crate::firestore::value::{compare_values, FirestoreValue, ValueKind};

/// Comparison operators accepted in a listen query's filter group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOperator {
    Equal,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
    ArrayContainsAny,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "EQUAL",
            FilterOperator::LessThan => "LESS_THAN",
            FilterOperator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            FilterOperator::GreaterThan => "GREATER_THAN",
            FilterOperator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            FilterOperator::ArrayContains => "ARRAY_CONTAINS",
            FilterOperator::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

impl OrderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Ascending => "ASCENDING",
            OrderDirection::Descending => "DESCENDING",
        }
    }

    fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            OrderDirection::Ascending => ordering,
            OrderDirection::Descending => ordering.reverse(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    field: FieldPath,
    operator: FilterOperator,
    value: FirestoreValue,
}

impl FieldFilter {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &FirestoreValue {
        &self.value
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    field: FieldPath,
    direction: OrderDirection,
}

impl OrderBy {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }
}

/// Immutable description of a listen query over one collection: a conjunction of
/// field filters and an ordered list of sort clauses.
///
/// Every builder call returns a new query; the receiver is left untouched.
#[derive(Clone, PartialEq)]
pub struct Query {
    collection_path: ResourcePath,
    filters: Arc<Vec<FieldFilter>>,
    order_by: Arc<Vec<OrderBy>>,
}

impl Query {
    /// Query over the collection at `path`, e.g. `"rooms"` or `"rooms/a/messages"`.
    pub fn collection(path: &str) -> FirestoreResult<Self> {
        Self::from_path(ResourcePath::from_string(path)?)
    }

    pub fn from_path(collection_path: ResourcePath) -> FirestoreResult<Self> {
        if !collection_path.is_collection() {
            return Err(invalid_argument(format!(
                "Queries must reference a collection (odd number of path segments), got '{collection_path}'"
            )));
        }
        Ok(Self {
            collection_path,
            filters: Arc::new(Vec::new()),
            order_by: Arc::new(Vec::new()),
        })
    }

    pub fn collection_path(&self) -> &ResourcePath {
        &self.collection_path
    }

    /// The identifier (last segment) of the targeted collection.
    pub fn collection_id(&self) -> &str {
        self.collection_path.last_segment().unwrap_or_default()
    }

    /// Path of the document owning the collection; the root for top-level collections.
    pub fn parent_path(&self) -> ResourcePath {
        self.collection_path.without_last()
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn order_by_clauses(&self) -> &[OrderBy] {
        &self.order_by
    }

    /// Adds a filter to the conjunction.
    pub fn where_field(
        &self,
        field: impl IntoFieldPath,
        operator: FilterOperator,
        value: impl Into<FirestoreValue>,
    ) -> FirestoreResult<Self> {
        let field = field.into_field_path()?;
        let value = value.into();
        if operator == FilterOperator::ArrayContainsAny {
            match value.kind() {
                ValueKind::Array(values) if !values.is_empty() => {}
                _ => {
                    return Err(invalid_argument(
                        "array-contains-any requires a non-empty array value",
                    ))
                }
            }
        }

        let mut filters = Vec::clone(&self.filters);
        filters.push(FieldFilter {
            field,
            operator,
            value,
        });
        Ok(Self {
            filters: Arc::new(filters),
            ..self.clone()
        })
    }

    /// Appends a sort clause; clauses apply in call order.
    pub fn order_by(
        &self,
        field: impl IntoFieldPath,
        direction: OrderDirection,
    ) -> FirestoreResult<Self> {
        let field = field.into_field_path()?;
        let mut order_by = Vec::clone(&self.order_by);
        order_by.push(OrderBy { field, direction });
        Ok(Self {
            order_by: Arc::new(order_by),
            ..self.clone()
        })
    }

    /// Direction of the implicit document-name tie-break.
    pub fn tie_break_direction(&self) -> OrderDirection {
        self.order_by
            .last()
            .map(OrderBy::direction)
            .unwrap_or_default()
    }

    /// First sort field `document` cannot be ordered on, if any.
    pub fn missing_order_field(&self, document: &Document) -> Option<&FieldPath> {
        self.order_by
            .iter()
            .map(OrderBy::field)
            .find(|field| !document.contains(field))
    }

    /// Total order over documents matching this query: every sort clause in turn,
    /// then the document path in the direction of the last clause.
    ///
    /// # Panics
    ///
    /// The returned comparator panics when either document lacks a sort field;
    /// check with [`Query::missing_order_field`] first.
    pub fn comparator(&self) -> DocumentComparator {
        let order_by = Arc::clone(&self.order_by);
        let tie_break = self.tie_break_direction();
        Arc::new(move |left: &Document, right: &Document| {
            for clause in order_by.iter() {
                let ordering = clause
                    .direction
                    .apply(compare_field(&clause.field, left, right));
                if ordering.is_ne() {
                    return ordering;
                }
            }
            tie_break.apply(left.path().cmp(right.path()))
        })
    }
}

fn compare_field(field: &FieldPath, left: &Document, right: &Document) -> Ordering {
    if field.is_document_id() {
        return left.path().cmp(right.path());
    }
    match (left.get(field), right.get(field)) {
        (Some(l), Some(r)) => compare_values(l, r),
        (None, _) => panic!("document {} has no field '{field}' to order by", left.path()),
        (_, None) => panic!("document {} has no field '{field}' to order by", right.path()),
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("collection_path", &self.collection_path.canonical_string())
            .field("filters", &self.filters)
            .field("order_by", &self.order_by)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::value::MapValue;

    fn doc(path: &str, fields: &[(&str, FirestoreValue)]) -> Document {
        let fields: MapValue = fields
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect();
        Document::new(ResourcePath::from_string(path).unwrap(), fields)
    }

    #[test]
    fn rejects_document_paths() {
        let err = Query::collection("rooms/a").unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
        let query = Query::collection("rooms/a/messages").unwrap();
        assert_eq!(query.collection_id(), "messages");
        assert_eq!(query.parent_path().canonical_string(), "rooms/a");
    }

    #[test]
    fn builder_calls_return_new_queries() {
        let base = Query::collection("rooms").unwrap();
        let filtered = base
            .where_field("size", FilterOperator::GreaterThan, 3)
            .unwrap()
            .order_by("size", OrderDirection::Descending)
            .unwrap();
        assert!(base.filters().is_empty());
        assert!(base.order_by_clauses().is_empty());
        assert_eq!(filtered.filters().len(), 1);
        assert_eq!(filtered.filters()[0].operator(), FilterOperator::GreaterThan);
        assert_eq!(filtered.order_by_clauses()[0].direction(), OrderDirection::Descending);
    }

    #[test]
    fn array_contains_any_needs_values() {
        let base = Query::collection("rooms").unwrap();
        assert!(base
            .where_field("tags", FilterOperator::ArrayContainsAny, "x")
            .is_err());
        assert!(base
            .where_field(
                "tags",
                FilterOperator::ArrayContainsAny,
                vec![FirestoreValue::from("x")]
            )
            .is_ok());
    }

    #[test]
    fn comparator_applies_clauses_then_path() {
        let query = Query::collection("rooms")
            .unwrap()
            .order_by("floor", OrderDirection::Ascending)
            .unwrap()
            .order_by("name", OrderDirection::Descending)
            .unwrap();
        let comparator = query.comparator();
        let a = doc("rooms/a", &[("floor", 1.into()), ("name", "x".into())]);
        let b = doc("rooms/b", &[("floor", 1.into()), ("name", "y".into())]);
        let c = doc("rooms/c", &[("floor", 0.into()), ("name", "a".into())]);
        let d = doc("rooms/d", &[("floor", 1.into()), ("name", "y".into())]);

        assert_eq!(comparator(&c, &a), Ordering::Less);
        assert_eq!(comparator(&b, &a), Ordering::Less);
        // Equal on every clause: path decides, descending like the last clause.
        assert_eq!(comparator(&d, &b), Ordering::Less);
    }

    #[test]
    fn comparator_without_clauses_orders_by_path() {
        let comparator = Query::collection("rooms").unwrap().comparator();
        let a = doc("rooms/a", &[]);
        let b = doc("rooms/b", &[]);
        assert_eq!(comparator(&a, &b), Ordering::Less);
        assert_eq!(comparator(&b, &b), Ordering::Equal);
    }

    #[test]
    fn nested_fields_and_document_id() {
        let query = Query::collection("rooms")
            .unwrap()
            .order_by("meta.rank", OrderDirection::Ascending)
            .unwrap()
            .order_by(FieldPath::document_id(), OrderDirection::Descending)
            .unwrap();
        let nested = |rank: i64| {
            FirestoreValue::from_map(
                [("rank".to_string(), FirestoreValue::from(rank))]
                    .into_iter()
                    .collect(),
            )
        };
        let a = doc("rooms/a", &[("meta", nested(2))]);
        let b = doc("rooms/b", &[("meta", nested(2))]);
        let c = doc("rooms/c", &[("meta", nested(1))]);
        let comparator = query.comparator();
        assert_eq!(comparator(&c, &a), Ordering::Less);
        assert_eq!(comparator(&b, &a), Ordering::Less);
        assert_eq!(query.missing_order_field(&a), None);
    }

    #[test]
    fn reports_missing_sort_fields() {
        let query = Query::collection("rooms")
            .unwrap()
            .order_by("name", OrderDirection::Ascending)
            .unwrap();
        let unnamed = doc("rooms/a", &[("size", 1.into())]);
        assert_eq!(
            query.missing_order_field(&unnamed).map(FieldPath::canonical_string),
            Some("name".to_string())
        );
    }

    #[test]
    #[should_panic(expected = "to order by")]
    fn comparator_panics_on_missing_field() {
        let query = Query::collection("rooms")
            .unwrap()
            .order_by("name", OrderDirection::Ascending)
            .unwrap();
        let named = doc("rooms/a", &[("name", "a".into())]);
        let unnamed = doc("rooms/b", &[]);
        (query.comparator())(&named, &unnamed);
    }
}
