use super::*;

#[test]
fn badge_total_sums_direct_and_support_only() {
    let mut unread = UnreadTracker::new();
    unread.set_direct(3);
    unread.set_support(2);
    unread.set_by_sender(HashMap::from([("a".to_owned(), 7)]));
    assert_eq!(unread.badge_total(), 5);
}

#[test]
fn live_direct_message_bumps_total_and_row_badge() {
    let mut unread = UnreadTracker::new();
    unread.set_direct(3);

    unread.record_direct("new-sender");
    assert_eq!(unread.direct(), 4);
    assert_eq!(unread.badge_total(), 4);
    assert_eq!(unread.for_sender("new-sender"), 1);
}

#[test]
fn poll_overwrites_live_increments() {
    let mut unread = UnreadTracker::new();
    unread.record_support();
    unread.record_support();
    assert_eq!(unread.support(), 2);

    unread.set_support(0);
    assert_eq!(unread.support(), 0);
}

#[test]
fn clear_sender_deducts_without_going_negative() {
    let mut unread = UnreadTracker::new();
    unread.set_by_sender(HashMap::from([("a".to_owned(), 5)]));
    unread.set_direct(2);

    unread.clear_sender("a");
    assert_eq!(unread.direct(), 0);
    assert_eq!(unread.for_sender("a"), 0);

    unread.clear_sender("missing");
    assert_eq!(unread.direct(), 0);
}

#[test]
fn set_by_sender_drops_zero_rows() {
    let mut unread = UnreadTracker::new();
    unread.set_by_sender(HashMap::from([("a".to_owned(), 0), ("b".to_owned(), 2)]));
    assert_eq!(unread.by_sender().len(), 1);
    assert_eq!(unread.for_sender("b"), 2);
}

#[test]
fn counters_saturate_at_max() {
    let mut unread = UnreadTracker::new();
    unread.set_direct(u32::MAX);
    unread.set_support(1);
    assert_eq!(unread.badge_total(), u32::MAX);
    unread.record_direct("x");
    assert_eq!(unread.direct(), u32::MAX);
}
