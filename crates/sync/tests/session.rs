mod common;

use std::time::Duration;

use common::{BUYER, FIRST, SECOND, backend, buyer, channel, conversation, core_with};
use threadline_backend::MemoryBackend;
use threadline_sync::{
    ChatSession, OpenOutcome, StartOutcome, SubmitOutcome, SyncError, SyncSettings,
};

fn session(backend: &MemoryBackend) -> ChatSession {
    ChatSession::new(core_with(backend, SyncSettings::default()), buyer())
}

#[tokio::test]
async fn start_opens_first_conversation_by_default() {
    let backend = backend();
    let session = session(&backend);

    let started = session.start(None).await.expect("start succeeds");

    assert_eq!(
        started,
        StartOutcome::Opened(OpenOutcome::Opened {
            conversation_id: conversation(FIRST),
            history_len: 2,
        })
    );
    let counterpart = session.counterpart().await.expect("counterpart resolved");
    assert_eq!(counterpart.user_name, "grace");
    assert_eq!(counterpart.profile_photo.as_deref(), Some("grace.png"));
}

#[tokio::test]
async fn start_honours_requested_conversation() {
    let backend = backend();
    let session = session(&backend);

    session
        .start(Some(conversation(SECOND)))
        .await
        .expect("start succeeds");

    assert_eq!(
        session.core().current_conversation().await,
        Some(conversation(SECOND))
    );
    assert_eq!(backend.subscribed_channels(), vec![channel(SECOND)]);
}

#[tokio::test]
async fn start_without_conversations_opens_nothing() {
    let backend = MemoryBackend::new();
    let session = session(&backend);

    let started = session.start(None).await.expect("start succeeds");

    assert_eq!(started, StartOutcome::NoConversations);
    assert_eq!(
        session.submit("anyone there?").await.expect("submit resolves"),
        SubmitOutcome::NoConversation
    );
    assert_eq!(backend.subscriber_count(), 0);
}

#[tokio::test]
async fn selecting_the_open_conversation_is_a_no_op() {
    let backend = backend();
    let session = session(&backend);
    session.start(None).await.expect("start succeeds");
    let generation = session.core().generation();

    let reselected = session
        .select(&conversation(FIRST))
        .await
        .expect("select resolves");

    assert_eq!(reselected, None);
    assert_eq!(session.core().generation(), generation);

    let switched = session
        .select(&conversation(SECOND))
        .await
        .expect("select resolves");
    assert!(matches!(switched, Some(OpenOutcome::Opened { .. })));
}

#[tokio::test]
async fn selecting_again_after_a_failed_start_retries_the_open() {
    let backend = backend();
    let session = session(&backend);
    backend.fail_subscribe(1);

    let error = session.start(None).await.expect_err("subscribe fails");
    assert!(matches!(error, SyncError::ChannelUnavailable { .. }));
    assert_eq!(
        session.core().current_conversation().await,
        Some(conversation(FIRST))
    );
    assert_eq!(backend.subscriber_count(), 0);

    let retried = session
        .select(&conversation(FIRST))
        .await
        .expect("retry succeeds");

    assert_eq!(
        retried,
        Some(OpenOutcome::Opened {
            conversation_id: conversation(FIRST),
            history_len: 2,
        })
    );
    assert_eq!(backend.subscriber_count(), 1);
    assert_eq!(backend.subscribed_channels(), vec![channel(FIRST)]);
    assert_eq!(
        session.core().snapshot().await.armed_channel,
        Some(channel(FIRST))
    );
}

#[tokio::test]
async fn selecting_again_after_a_failed_history_load_retries_the_open() {
    let backend = backend();
    let session = session(&backend);
    backend.fail_history(1);

    session.start(None).await.expect_err("history fails");
    assert!(session.messages().await.is_empty());

    let retried = session
        .select(&conversation(FIRST))
        .await
        .expect("retry succeeds");

    assert!(matches!(retried, Some(OpenOutcome::Opened { history_len: 2, .. })));
    assert_eq!(session.messages().await.len(), 2);
    assert_eq!(backend.subscriber_count(), 1);
}

#[tokio::test]
async fn submitted_message_comes_back_through_the_pump() {
    let backend = backend();
    let session = session(&backend);
    session.start(None).await.expect("start succeeds");
    let mut revisions = session.revisions();

    let outcome = session.submit(" on my way ").await.expect("submit succeeds");
    assert!(matches!(outcome, SubmitOutcome::Sent(ref stored) if stored.text == "on my way"));

    tokio::time::timeout(Duration::from_secs(5), revisions.wait_for(|revision| *revision >= 1))
        .await
        .expect("pump applies the echo in time")
        .expect("pump is alive");

    let messages = session.messages().await;
    let last = messages.last().expect("echo appended");
    assert_eq!(last.text, "on my way");
    assert!(session.is_own(last));
    assert!(!session.is_own(&messages[0]));
}

#[tokio::test]
async fn blank_draft_is_ignored() {
    let backend = backend();
    let session = session(&backend);
    session.start(None).await.expect("start succeeds");

    assert_eq!(
        session.submit("   ").await.expect("submit resolves"),
        SubmitOutcome::Ignored
    );
    assert_eq!(backend.history_of(&conversation(FIRST)).len(), 2);
}

#[tokio::test]
async fn search_filters_by_participant_names() {
    let backend = backend();
    let session = session(&backend);
    session.start(None).await.expect("start succeeds");

    let found = session.search("turing");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, conversation(SECOND));
    assert_eq!(session.search("").len(), 2);
    assert_eq!(session.viewer().as_str(), BUYER);
}

#[tokio::test]
async fn shutdown_releases_the_subscription() {
    let backend = backend();
    let session = session(&backend);
    session.start(None).await.expect("start succeeds");
    assert_eq!(backend.subscriber_count(), 1);

    session.shutdown().await;

    assert_eq!(backend.subscriber_count(), 0);
}
