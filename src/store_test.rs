use super::*;

fn msg(id: &str, content: &str) -> ChatMessage {
    ChatMessage {
        id: id.to_owned(),
        content: content.to_owned(),
        sender_id: Some("A".to_owned()),
        target_id: Some("B".to_owned()),
        ..ChatMessage::default()
    }
}

fn selected_store() -> MessageStore {
    let mut store = MessageStore::new();
    store.select(ConversationKey::Direct("B".to_owned()));
    store
}

#[test]
fn upsert_with_known_id_updates_in_place() {
    let mut store = selected_store();
    assert_eq!(store.upsert(msg("1", "first")), Upsert::Inserted);
    assert_eq!(store.upsert(msg("2", "second")), Upsert::Inserted);

    let mut edited = msg("1", "first (edited)");
    edited.edited = true;
    assert_eq!(store.upsert(edited), Upsert::Updated);

    assert_eq!(store.ids(), vec!["1", "2"]);
    let first = store.get("1").unwrap();
    assert_eq!(first.content, "first (edited)");
    assert!(first.edited);
}

#[test]
fn upsert_keeps_read_once_set_and_fills_missing_identity() {
    let mut store = selected_store();
    let mut partial = msg("1", "x");
    partial.sender_id = None;
    partial.read = true;
    store.upsert(partial);

    store.upsert(msg("1", "x"));
    let stored = store.get("1").unwrap();
    assert!(stored.read);
    assert_eq!(stored.sender_id.as_deref(), Some("A"));
}

#[test]
fn upsert_does_not_clear_attachment_with_missing_url() {
    let mut store = selected_store();
    let mut with_file = msg("1", "pic");
    with_file.attachment_url = Some("/files/1.png".to_owned());
    store.upsert(with_file);

    store.upsert(msg("1", "pic"));
    assert_eq!(store.get("1").unwrap().attachment_url.as_deref(), Some("/files/1.png"));
}

#[test]
fn select_clears_previous_conversation_and_bumps_generation() {
    let mut store = selected_store();
    store.upsert(msg("1", "old"));
    let before = store.generation();

    let generation = store.select(ConversationKey::Direct("C".to_owned()));
    assert!(store.is_empty());
    assert_eq!(generation, before + 1);
    assert!(store.is_selected(&ConversationKey::Direct("C".to_owned())));
}

#[test]
fn stale_snapshot_after_switch_is_dropped() {
    let mut store = selected_store();
    let ticket = store.snapshot_ticket().unwrap();

    store.select(ConversationKey::Direct("C".to_owned()));
    assert!(!store.apply_snapshot(&ticket, vec![msg("1", "belongs to B")]));
    assert!(store.is_empty());
}

#[test]
fn snapshot_after_reselecting_same_key_is_still_stale() {
    let mut store = selected_store();
    let ticket = store.snapshot_ticket().unwrap();
    store.select(ConversationKey::Direct("B".to_owned()));
    assert!(!store.apply_snapshot(&ticket, vec![msg("1", "x")]));
}

#[test]
fn snapshot_upserts_and_appends_in_server_order() {
    let mut store = selected_store();
    store.upsert(msg("2", "local copy"));

    let ticket = store.snapshot_ticket().unwrap();
    assert!(store.apply_snapshot(&ticket, vec![msg("1", "one"), msg("2", "two"), msg("3", "three")]));

    assert_eq!(store.ids(), vec!["2", "1", "3"]);
    assert_eq!(store.get("2").unwrap().content, "two");
}

#[test]
fn snapshot_prunes_entries_missing_on_server() {
    let mut store = selected_store();
    store.upsert(msg("1", "kept"));
    store.upsert(msg("2", "deleted elsewhere"));

    let ticket = store.snapshot_ticket().unwrap();
    store.apply_snapshot(&ticket, vec![msg("1", "kept")]);
    assert_eq!(store.ids(), vec!["1"]);
}

#[test]
fn snapshot_keeps_pushes_that_raced_the_fetch() {
    let mut store = selected_store();
    store.upsert(msg("1", "old"));
    let ticket = store.snapshot_ticket().unwrap();

    // Arrives over the socket while the refetch is in flight.
    store.upsert(msg("2", "pushed"));

    store.apply_snapshot(&ticket, vec![msg("1", "old")]);
    assert_eq!(store.ids(), vec!["1", "2"]);
}

#[test]
fn empty_snapshot_then_push_yields_exactly_one_entry() {
    let mut store = selected_store();
    let ticket = store.snapshot_ticket().unwrap();
    store.apply_snapshot(&ticket, Vec::new());
    assert!(store.is_empty());

    store.upsert(msg("5", "hello"));
    store.upsert(msg("5", "hello"));
    assert_eq!(store.ids(), vec!["5"]);
}

#[test]
fn apply_patch_only_touches_present_fields() {
    let mut store = selected_store();
    store.upsert(msg("1", "before"));

    let patch = MessagePatch { id: "1".to_owned(), read: Some(true), ..MessagePatch::default() };
    assert!(store.apply_patch(&patch));
    let stored = store.get("1").unwrap();
    assert_eq!(stored.content, "before");
    assert!(stored.read);

    let unknown = MessagePatch { id: "9".to_owned(), content: Some("x".to_owned()), ..MessagePatch::default() };
    assert!(!store.apply_patch(&unknown));
}

#[test]
fn mark_edited_and_remove() {
    let mut store = selected_store();
    store.upsert(msg("1", "typo"));
    assert!(store.mark_edited("1", "fixed"));
    assert!(store.get("1").unwrap().edited);
    assert_eq!(store.get("1").unwrap().content, "fixed");

    assert!(store.remove("1"));
    assert!(!store.remove("1"));
    assert!(store.is_empty());
}

#[test]
fn mark_read_where_counts_changes() {
    let mut store = selected_store();
    store.upsert(msg("1", "a"));
    store.upsert(msg("2", "b"));
    assert_eq!(store.mark_read_where(|m| m.id == "2"), 1);
    assert_eq!(store.mark_read_where(|_| true), 1);
}

#[test]
fn no_ticket_without_selection() {
    let mut store = MessageStore::new();
    assert!(store.snapshot_ticket().is_none());
    store.select(ConversationKey::Support("c".to_owned()));
    store.deselect();
    assert!(store.snapshot_ticket().is_none());
}
