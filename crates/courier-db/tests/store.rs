use std::thread::sleep;
use std::time::Duration;

use uuid::Uuid;

use courier_db::{Database, StoreError};

fn db_with_users(count: usize) -> (Database, Vec<Uuid>) {
    let db = Database::open_in_memory().unwrap();
    let mut users = Vec::with_capacity(count);
    for i in 0..count {
        let id = Uuid::new_v4();
        db.create_user(id, &format!("user{}", i), "hash").unwrap();
        users.push(id);
    }
    (db, users)
}

/// Stamps have microsecond precision; a short pause keeps consecutive
/// appends strictly ordered so the ordering assertions below are stable.
fn tick() {
    sleep(Duration::from_millis(2));
}

#[test]
fn conversation_pair_is_canonical() {
    let (db, users) = db_with_users(2);
    let (a, b) = (users[0], users[1]);

    let first = db.get_or_create_conversation(a, b).unwrap();
    let second = db.get_or_create_conversation(b, a).unwrap();

    assert_eq!(first.id, second.id);
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    assert_eq!(first.user_a, lo.to_string());
    assert_eq!(first.user_b, hi.to_string());
}

#[test]
fn self_conversation_is_rejected() {
    let (db, users) = db_with_users(1);
    let result = db.get_or_create_conversation(users[0], users[0]);
    assert!(matches!(result, Err(StoreError::InvalidPair)));
}

#[test]
fn empty_content_is_rejected_without_side_effects() {
    let (db, users) = db_with_users(2);
    let conversation = db.get_or_create_conversation(users[0], users[1]).unwrap();

    tick();
    let result = db.append_message(conversation.id.parse().unwrap(), users[0], "  \t ");
    assert!(matches!(result, Err(StoreError::EmptyContent)));

    // The activity stamp must not move on a failed append.
    let after = db
        .get_conversation(conversation.id.parse().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(after.updated_at, conversation.updated_at);
}

#[test]
fn append_bumps_conversation_activity() {
    let (db, users) = db_with_users(2);
    let conversation = db.get_or_create_conversation(users[0], users[1]).unwrap();
    let cid: Uuid = conversation.id.parse().unwrap();

    tick();
    let message = db.append_message(cid, users[0], "  hello  ").unwrap();
    assert_eq!(message.content, "hello");

    let after = db.get_conversation(cid).unwrap().unwrap();
    assert_eq!(after.updated_at, message.sent_at);
    assert!(after.updated_at > conversation.updated_at);
}

#[test]
fn mark_delivered_is_idempotent() {
    let (db, users) = db_with_users(2);
    let conversation = db.get_or_create_conversation(users[0], users[1]).unwrap();
    let cid: Uuid = conversation.id.parse().unwrap();
    let message = db.append_message(cid, users[0], "hi").unwrap();
    let mid: Uuid = message.id.parse().unwrap();

    let first = db.mark_delivered(mid).unwrap();
    assert!(first.is_some());
    let stamped = db.get_message(mid).unwrap().unwrap().delivered_at;

    tick();
    let second = db.mark_delivered(mid).unwrap();
    assert!(second.is_none());

    // The first stamp survives the second call untouched.
    let after = db.get_message(mid).unwrap().unwrap().delivered_at;
    assert_eq!(after, stamped);
}

#[test]
fn mark_conversation_read_counts_then_zero() {
    let (db, users) = db_with_users(2);
    let (a, b) = (users[0], users[1]);
    let conversation = db.get_or_create_conversation(a, b).unwrap();
    let cid: Uuid = conversation.id.parse().unwrap();

    for i in 0..5 {
        db.append_message(cid, b, &format!("from b {}", i)).unwrap();
    }
    // The reader's own message must not be touched.
    let own = db.append_message(cid, a, "from a").unwrap();

    assert_eq!(db.mark_conversation_read(cid, a).unwrap(), 5);
    assert_eq!(db.mark_conversation_read(cid, a).unwrap(), 0);

    let own_after = db.get_message(own.id.parse().unwrap()).unwrap().unwrap();
    assert!(own_after.read_at.is_none());
}

#[test]
fn read_is_reachable_without_delivery() {
    let (db, users) = db_with_users(2);
    let (a, b) = (users[0], users[1]);
    let conversation = db.get_or_create_conversation(a, b).unwrap();
    let cid: Uuid = conversation.id.parse().unwrap();
    let message = db.append_message(cid, b, "never delivered").unwrap();

    assert_eq!(db.mark_conversation_read(cid, a).unwrap(), 1);

    let row = db.get_message(message.id.parse().unwrap()).unwrap().unwrap();
    assert!(row.read_at.is_some());
    assert!(row.delivered_at.is_none());
}

#[test]
fn undelivered_backlog_is_filtered_and_ordered() {
    let (db, users) = db_with_users(3);
    let (a, b, c) = (users[0], users[1], users[2]);
    let ab = db.get_or_create_conversation(a, b).unwrap();
    let ab_id: Uuid = ab.id.parse().unwrap();
    let ac = db.get_or_create_conversation(a, c).unwrap();
    let ac_id: Uuid = ac.id.parse().unwrap();

    let m1 = db.append_message(ab_id, b, "first").unwrap();
    tick();
    let m2 = db.append_message(ac_id, c, "second").unwrap();
    tick();
    // Authored by the recipient: never part of their backlog.
    db.append_message(ab_id, a, "own message").unwrap();
    tick();
    let m3 = db.append_message(ab_id, b, "third").unwrap();

    // Already-delivered messages drop out.
    db.mark_delivered(m2.id.parse().unwrap()).unwrap();

    let backlog = db.list_undelivered_for(a).unwrap();
    let ids: Vec<&str> = backlog.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec![m1.id.as_str(), m3.id.as_str()]);
}

#[test]
fn pagination_walks_newest_first() {
    let (db, users) = db_with_users(2);
    let (a, b) = (users[0], users[1]);
    let conversation = db.get_or_create_conversation(a, b).unwrap();
    let cid: Uuid = conversation.id.parse().unwrap();

    for i in 0..120 {
        let sender = if i % 2 == 0 { a } else { b };
        db.append_message(cid, sender, &format!("message {}", i)).unwrap();
        sleep(Duration::from_millis(1));
    }

    let (page1, total) = db.list_page(cid, 50, 0).unwrap();
    assert_eq!(total, 120);
    assert_eq!(page1.len(), 50);
    assert_eq!(page1[0].content, "message 119");

    let (page3, total) = db.list_page(cid, 50, 100).unwrap();
    assert_eq!(total, 120);
    assert_eq!(page3.len(), 20);
    assert_eq!(page3[19].content, "message 0");

    // Pages are disjoint and descending across the whole walk.
    let (page2, _) = db.list_page(cid, 50, 50).unwrap();
    let all: Vec<_> = page1.iter().chain(&page2).chain(&page3).collect();
    assert_eq!(all.len(), 120);
    for pair in all.windows(2) {
        assert!(pair[0].sent_at >= pair[1].sent_at);
    }
    let mut ids: Vec<&str> = all.iter().map(|m| m.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 120);
}
