use std::cmp::Ordering;

use firestore_realtime::firestore::model::ResourcePath;

fn path(value: &str) -> ResourcePath {
    ResourcePath::from_string(value).unwrap()
}

#[test]
fn indexes_into_segments() {
    let messages = ResourcePath::from_segments(["rooms", "Eros", "messages"]);
    assert_eq!(messages.get(0), Some("rooms"));
    assert_eq!(messages.get(2), Some("messages"));
    assert_eq!(messages.get(3), None);
    assert!(messages.is_collection());
    assert!(!messages.is_document());
}

#[test]
fn parent_and_child_are_inverse() {
    let room = path("rooms/eros");
    let message = room.child(["messages", "1"]);
    assert_eq!(message, path("rooms/eros/messages/1"));
    assert!(message.is_document());
    assert_eq!(message.without_last().without_last(), room);
    assert_eq!(room, path("rooms/eros"));
}

#[test]
fn pop_first_walks_to_root() {
    let messages = path("rooms/Eros/messages");
    assert_eq!(messages.pop_first(), path("Eros/messages"));
    assert!(messages.pop_first().pop_first().pop_first().is_empty());
    assert!(ResourcePath::root().pop_first().is_empty());
    assert_eq!(ResourcePath::root().parent(), None);
}

#[test]
fn orders_segment_wise_then_by_length() {
    let ordered = [
        ResourcePath::root(),
        path("a"),
        path("a/b"),
        path("a/b/c"),
        path("a/bb"),
        path("aa"),
        path("b"),
        path("b/a"),
    ];
    for (i, left) in ordered.iter().enumerate() {
        for (j, right) in ordered.iter().enumerate() {
            assert_eq!(
                ResourcePath::comparator(left, right),
                i.cmp(&j),
                "comparing '{left}' with '{right}'"
            );
        }
    }
    assert_eq!(path("a/b").cmp(&path("/a/b/")), Ordering::Equal);
}

#[test]
fn determines_prefix() {
    let empty = ResourcePath::root();
    let a = path("a");
    let ab = path("a/b");
    let ba = path("b/a");

    assert!(empty.is_prefix_of(&empty));
    assert!(empty.is_prefix_of(&ab));
    assert!(a.is_prefix_of(&a));
    assert!(a.is_prefix_of(&ab));
    assert!(!a.is_prefix_of(&empty));
    assert!(!a.is_prefix_of(&ba));
    assert!(!ab.is_prefix_of(&a));
}
