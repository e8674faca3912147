//! PostgreSQL repository tests.
//!
//! Require a running database (`DATABASE_URL`, see
//! `inbox_db::test_fixtures::DEFAULT_TEST_DATABASE_URL`). Run with:
//!
//! ```bash
//! cargo test -p inbox-db --test pg_repository_test -- --ignored --test-threads=1
//! ```

use inbox_db::test_fixtures::{fixture_mail, TestDatabase};
use inbox_db::{ExtractedMessages, MailRepository, RoomRepository, ThreadRepository};

/// Connect with `DATABASE_URL` from `.env` when present.
async fn test_db() -> TestDatabase {
    dotenvy::dotenv().ok();
    TestDatabase::new().await.unwrap()
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_insert_is_idempotent_by_message_id() {
    let test_db = test_db().await;
    let db = &test_db.db;

    let inserted = db
        .mails
        .insert_mails(&[fixture_mail("<a@x>", 0), fixture_mail("<b@x>", 1)])
        .await
        .unwrap();
    assert_eq!(inserted, 2);
    let again = db.mails.insert_mails(&[fixture_mail("<a@x>", 0)]).await.unwrap();
    assert_eq!(again, 0);

    let pending = db.mails.mails_needing_extraction().await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].message_id, "<a@x>");
    assert_eq!(pending[0].addr_to, vec!["team@example.org".to_string()]);

    test_db.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_extraction_roundtrips_as_jsonb() {
    let test_db = test_db().await;
    let db = &test_db.db;
    db.mails.insert_mails(&[fixture_mail("<a@x>", 0)]).await.unwrap();
    let mail = db.mails.mails_needing_extraction().await.unwrap().remove(0);

    let extracted = ExtractedMessages {
        forwarded: true,
        forwarded_by: Some("Bob".to_string()),
        ..ExtractedMessages::single("Carol", "original", mail.timestamp)
    };
    db.mails.save_extracted_messages(mail.id, &extracted).await.unwrap();

    let stored = db.mails.mail_by_id(mail.id).await.unwrap().unwrap();
    assert_eq!(stored.messages, Some(extracted));
    assert!(db.mails.mails_needing_extraction().await.unwrap().is_empty());
    assert_eq!(db.mails.mails_needing_sorting().await.unwrap().len(), 1);

    test_db.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_thread_creation_and_reply_linking() {
    let test_db = test_db().await;
    let db = &test_db.db;
    let mut reply = fixture_mail("<reply@x>", 10);
    reply.in_reply_to = Some("<head@x>".to_string());
    db.mails
        .insert_mails(&[fixture_mail("<head@x>", 0), reply])
        .await
        .unwrap();

    assert_eq!(db.mails.link_reply_targets().await.unwrap(), 1);
    let mails = db
        .mails
        .mails_by_message_ids(&["<head@x>".to_string(), "<reply@x>".to_string()])
        .await
        .unwrap();
    let (head, reply) = (&mails[0], &mails[1]);
    assert_eq!(reply.reply_to, Some(head.id));

    let thread_id = db.threads.create_thread(head).await.unwrap();
    db.mails.assign_thread(reply.id, thread_id).await.unwrap();
    db.threads
        .update_last_mail(thread_id, reply.id, reply.timestamp)
        .await
        .unwrap();

    let thread = db.threads.thread_by_id(thread_id).await.unwrap().unwrap();
    assert_eq!(thread.first_mail, head.id);
    assert_eq!(thread.last_mail, reply.id);
    assert_eq!(db.mails.thread_history(thread_id).await.unwrap().len(), 2);

    let parents = db
        .mails
        .threaded_mails_by_reference_ids(&["<head@x>".to_string()])
        .await
        .unwrap();
    assert_eq!(parents[0].thread, Some(thread_id));

    test_db.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_chat_ids_and_overview() {
    let test_db = test_db().await;
    let db = &test_db.db;
    db.rooms.ensure_rooms(&["!room".to_string()]).await.unwrap();
    db.mails.insert_mails(&[fixture_mail("<head@x>", 0)]).await.unwrap();
    let head = db.mails.mails_needing_extraction().await.unwrap().remove(0);
    db.mails
        .save_extracted_messages(head.id, &ExtractedMessages::single("Alice", "Hi", head.timestamp))
        .await
        .unwrap();
    let thread_id = db.threads.create_thread(&head).await.unwrap();

    assert_eq!(db.threads.threads_ready_for_notification().await.unwrap().len(), 1);
    db.threads
        .set_thread_chat_ids(thread_id, "!room", Some("$root"))
        .await
        .unwrap();
    let replies = db.mails.mails_ready_for_notification().await.unwrap();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].is_first);

    let overview = db.threads.overview_threads(&["!room".to_string()]).await.unwrap();
    assert_eq!(overview.len(), 1);
    assert_eq!(overview[0].chat_message_id, "$root");

    assert!(db
        .threads
        .set_thread_enabled("!room", "$root", false, true)
        .await
        .unwrap());
    assert!(db.threads.overview_threads(&["!room".to_string()]).await.unwrap().is_empty());

    db.rooms.set_overview_message_id("!room", Some("$ov")).await.unwrap();
    assert_eq!(
        db.rooms.overview_message_id("!room").await.unwrap().as_deref(),
        Some("$ov")
    );

    test_db.cleanup().await.unwrap();
}
