//! End-to-end pipeline tests over the in-memory store.
//!
//! This test suite validates:
//! - Reply chains (In-Reply-To and References) end up in one thread
//! - Late replies join an already published thread
//! - Blacklisted senders never head a thread and are sorted once
//! - Force-closing only blocks the reply-to link
//! - Quoted history is masked before extraction, also along unsorted
//!   In-Reply-To chains
//! - Failed oracle calls and chat publishes are retried
//! - Overview rooms list open threads
//! - Shutdown stops every stage
//!
//! All tests run with paused time; stage retry delays and the sorting poll
//! advance instantly.

mod helpers;

use std::time::Duration;

use helpers::{wait_for, Harness, RecordingSink, ScriptedOracle, PLACEHOLDER};
use inbox_db::test_fixtures::fixture_mail;
use inbox_jobs::{NewMail, StageEvent, ThreadActions};

fn reply(message_id: &str, minutes: i64, parent: &str, references: &[&str]) -> NewMail {
    let mut mail = fixture_mail(message_id, minutes);
    mail.in_reply_to = Some(parent.to_string());
    mail.references = references.iter().map(|r| r.to_string()).collect();
    mail.name_from = "Bob".to_string();
    mail.addr_from = "bob@example.org".to_string();
    mail
}

#[tokio::test(start_paused = true)]
async fn test_reply_chain_forms_single_thread() {
    let h = Harness::start(ScriptedOracle::default(), RecordingSink::default());

    let batch = vec![
        fixture_mail("<head@x>", 0),
        reply("<r1@x>", 5, "<head@x>", &["<head@x>"]),
        reply("<r2@x>", 10, "<r1@x>", &["<head@x>", "<r1@x>"]),
    ];
    assert_eq!(h.pipeline.store_mails(&batch).await.unwrap(), 3);
    h.settled().await;

    let head = h.mail("<head@x>").await;
    let r1 = h.mail("<r1@x>").await;
    let r2 = h.mail("<r2@x>").await;
    assert!(head.thread.is_some());
    assert_eq!(r1.thread, head.thread);
    assert_eq!(r2.thread, head.thread);
    assert_eq!(r1.reply_to, Some(head.id));

    let threads = h.store.all_threads().await;
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].first_mail, head.id);
    assert_eq!(threads[0].last_mail, r2.id);
    assert_eq!(threads[0].chat_room_id.as_deref(), Some("!inbox"));

    assert_eq!(h.sink.thread_count(), 1);
    assert_eq!(h.sink.reply_count(), 3);

    h.pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_joins_published_thread() {
    let h = Harness::start(ScriptedOracle::default(), RecordingSink::default());

    let mut head = fixture_mail("<head@x>", 0);
    head.addr_to = vec!["sales@example.org".to_string()];
    h.pipeline.store_mails(&[head]).await.unwrap();
    h.settled().await;
    let head = h.mail("<head@x>").await;
    let thread_id = head.thread.unwrap();

    h.pipeline
        .store_mails(&[reply("<late@x>", 60, "<head@x>", &[])])
        .await
        .unwrap();
    let store = h.store.clone();
    wait_for("late reply published", || {
        let store = store.clone();
        async move {
            store
                .mail_by_message_id("<late@x>")
                .await
                .is_some_and(|m| m.chat_message_id.is_some())
        }
    })
    .await;

    let late = h.mail("<late@x>").await;
    assert_eq!(late.thread, Some(thread_id));
    assert_eq!(h.sink.thread_count(), 1);
    let log = h.sink.log.lock().unwrap();
    let (_, room, root) = log.replies.iter().find(|(id, _, _)| *id == late.id).unwrap();
    assert_eq!(room, "!sales");
    assert_eq!(Some(root.as_str()), head.chat_message_id.as_deref());
    drop(log);

    h.pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_blacklisted_head_is_marked_sorted_once() {
    let h = Harness::start(ScriptedOracle::default(), RecordingSink::default());

    let mut bounce = fixture_mail("<bounce@x>", 0);
    bounce.addr_from = "noreply@example.org".to_string();
    h.pipeline.store_mails(&[bounce]).await.unwrap();
    h.settled().await;

    let stored = h.mail("<bounce@x>").await;
    assert!(stored.sorted);
    assert!(stored.thread.is_none());

    assert!(h.pipeline.queue_thread_sorting_blocking().await);
    assert!(h.store.all_threads().await.is_empty());
    assert_eq!(h.sink.thread_count(), 0);

    h.pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_force_close_blocks_reply_link_only() {
    let h = Harness::start(ScriptedOracle::default(), RecordingSink::default());
    let actions = h.pipeline.thread_actions(None);

    h.pipeline
        .store_mails(&[fixture_mail("<head@x>", 0)])
        .await
        .unwrap();
    h.settled().await;
    let head = h.mail("<head@x>").await;
    let thread = h.store.all_threads().await.remove(0);
    let root = thread.chat_message_id.clone().unwrap();
    assert!(actions.force_close_thread("!inbox", &root).await);

    // only In-Reply-To: the force-closed thread is not joined
    h.pipeline
        .store_mails(&[reply("<direct@x>", 5, "<head@x>", &[])])
        .await
        .unwrap();
    h.settled().await;
    let direct = h.mail("<direct@x>").await;
    assert_eq!(direct.reply_to, Some(head.id));
    assert_ne!(direct.thread, head.thread);

    // References still lead into the closed thread, which reopens it
    h.pipeline
        .store_mails(&[reply("<cc@x>", 10, "<unknown@x>", &["<head@x>"])])
        .await
        .unwrap();
    h.settled().await;
    let cc = h.mail("<cc@x>").await;
    assert_eq!(cc.thread, head.thread);

    let thread = h
        .store
        .all_threads()
        .await
        .into_iter()
        .find(|t| t.id == thread.id)
        .unwrap();
    assert!(thread.enabled);
    assert_eq!(h.store.all_threads().await.len(), 2);

    h.pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_quoted_history_is_masked_before_extraction() {
    let h = Harness::start(ScriptedOracle::default(), RecordingSink::default());

    let mut head = fixture_mail("<head@x>", 0);
    head.body = "I love go! :)".to_string();
    let mut answer = reply("<answer@x>", 5, "<head@x>", &["<head@x>"]);
    answer.body = "Hi, thanks.\nReply to: I love go! :)".to_string();
    h.pipeline.store_mails(&[head, answer]).await.unwrap();
    h.settled().await;

    let request = h.oracle.request_containing("Hi, thanks.").unwrap();
    assert!(request.conversation.contains(PLACEHOLDER));
    assert!(!request.conversation.contains("I love go"));
    assert!(request.reply_candidate);
    assert!(!request.forward_candidate);

    let answer = h.mail("<answer@x>").await;
    let messages = answer.messages.unwrap().messages;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "Hi, thanks.\nReply to:");
    assert_eq!(messages[0].author, "Bob");

    let head = h.mail("<head@x>").await;
    assert_eq!(head.leading_message().unwrap().content, "I love go! :)");

    h.pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_in_reply_to_chain_is_extracted_in_order() {
    let h = Harness::start(
        ScriptedOracle::slow(Duration::from_secs(1)),
        RecordingSink::default(),
    );

    let mut head = fixture_mail("<h@x>", 0);
    head.body = "Original question about rust".to_string();
    let mut first = reply("<r1@x>", 5, "<h@x>", &[]);
    first.body = "First reply text here\n> Original question about rust".to_string();
    let mut second = reply("<r2@x>", 10, "<r1@x>", &[]);
    second.body =
        "Second reply now\n> First reply text here\n> > Original question about rust".to_string();
    h.pipeline.store_mails(&[head, first, second]).await.unwrap();
    h.settled().await;

    let request = h.oracle.request_containing("Second reply now").unwrap();
    assert!(request.conversation.contains(PLACEHOLDER));
    assert!(!request.conversation.contains("First reply text here"));

    let threads = h.store.all_threads().await;
    assert_eq!(threads.len(), 1);
    assert_eq!(h.mail("<r2@x>").await.thread, Some(threads[0].id));

    h.pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_extraction_is_retried() {
    let h = Harness::start(ScriptedOracle::failing(2), RecordingSink::default());

    h.pipeline
        .store_mails(&[fixture_mail("<a@x>", 0), fixture_mail("<b@x>", 1)])
        .await
        .unwrap();
    h.settled().await;

    for mail in h.store.all_mails().await {
        assert!(mail.messages.is_some(), "mail {} not extracted", mail.message_id);
    }
    assert!(h.oracle.requests.lock().unwrap().len() >= 4);

    h.pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_publish_is_retried() {
    let h = Harness::start(ScriptedOracle::default(), RecordingSink::failing(3));

    h.pipeline
        .store_mails(&[fixture_mail("<a@x>", 0)])
        .await
        .unwrap();
    h.settled().await;

    assert_eq!(h.sink.thread_count(), 1);
    assert_eq!(h.sink.reply_count(), 1);

    h.pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_overview_lists_open_threads() {
    let h = Harness::start(ScriptedOracle::default(), RecordingSink::default());
    let actions = h.pipeline.thread_actions(None);

    h.pipeline
        .store_mails(&[fixture_mail("<a@x>", 0), fixture_mail("<b@x>", 1)])
        .await
        .unwrap();
    h.settled().await;
    let sink = h.sink.clone();
    wait_for("overview lists both threads", || {
        let sink = sink.clone();
        async move { sink.last_overview("!ovw") == Some(2) }
    })
    .await;

    let thread = h.store.all_threads().await.remove(0);
    let root = thread.chat_message_id.unwrap();
    assert!(actions.close_thread("!inbox", &root, true).await);
    let sink = h.sink.clone();
    wait_for("overview drops the closed thread", || {
        let sink = sink.clone();
        async move { sink.last_overview("!ovw") == Some(1) }
    })
    .await;

    // a plain close keeps replies free to reopen the thread
    let closed = h
        .store
        .all_threads()
        .await
        .into_iter()
        .find(|t| t.id == thread.id)
        .unwrap();
    assert!(!closed.enabled);
    assert!(!closed.force_close);

    h.pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_all_stages() {
    let h = Harness::start(ScriptedOracle::default(), RecordingSink::default());
    let mut events = h.pipeline.sorting_stage().events();

    h.pipeline.shutdown().await;

    assert!(!h.pipeline.enqueue_new_mail_batch());
    assert!(!h.pipeline.queue_thread_sorting());
    assert!(!h.pipeline.queue_thread_sorting_blocking().await);
    assert!(!h.pipeline.notification_stage().is_working());
    assert!(h.pipeline.overview_stage("!ovw").is_some());

    let mut stopped = false;
    while let Ok(event) = events.try_recv() {
        stopped |= matches!(event, StageEvent::Stopped { .. });
    }
    assert!(stopped);
}
