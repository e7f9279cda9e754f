use std::sync::Arc;
use tempfile::{tempdir, TempDir};

use mailthread_lib::{
    recovery::Error, Attachment, ContentFetcher, IdentityRecovery, MailboxConfig, Message,
    MemoryProvider, Op, Orchestrator, RawAttachment, RawBody, RawMessage, RawRecipient, Reason,
    Store, SyncConfig, SyncMode,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> SyncConfig {
    SyncConfig {
        retry_backoff_ms: Some(1),
        ..SyncConfig::default()
    }
}

fn setup() -> (TempDir, Store, Arc<MemoryProvider>) {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().join("store.sqlite")).unwrap();
    let provider = Arc::new(MemoryProvider::new());
    provider.add_mailbox("desk");
    (dir, store, provider)
}

fn mail(immutable_id: Option<&str>) -> RawMessage {
    RawMessage {
        internet_message_id: immutable_id.map(|id| format!("<{id}>")),
        subject: Some("Signed VAT return".into()),
        from: Some(RawRecipient::new("client@example.com")),
        to_recipients: vec![RawRecipient::new("desk@firm.com")],
        received_date_time: Some("2024-05-01T09:00:00Z".into()),
        body: Some(RawBody {
            content_type: "text".into(),
            content: "Please find the signed return attached.".into(),
        }),
        ..RawMessage::default()
    }
}

fn attachment(name: &str) -> RawAttachment {
    RawAttachment {
        name: name.into(),
        content_type: "application/pdf".into(),
        ..RawAttachment::default()
    }
}

/// Synchronizes the mailbox and returns the stored copy of the
/// message with the given remote id.
fn sync(store: &Store, provider: &Arc<MemoryProvider>, remote_id: &str) -> Message {
    let config = config();
    Orchestrator::new(store.clone(), provider.clone(), &config)
        .run_sync(&MailboxConfig::new("desk", "desk@firm.com"), SyncMode::Full, None)
        .unwrap();
    store.find_message_by_remote_id(remote_id).unwrap().unwrap()
}

fn fetcher(store: &Store, provider: &Arc<MemoryProvider>) -> ContentFetcher {
    ContentFetcher::new(IdentityRecovery::new(
        store.clone(),
        provider.clone(),
        &config(),
    ))
}

#[test]
fn moved_message_is_recovered_once() {
    init_logger();

    let (_dir, store, provider) = setup();
    let remote_id = provider.add_message("desk", "inbox", mail(Some("vat-1@client.com")));
    let stored = sync(&store, &provider, &remote_id);

    let moved = provider.move_message("desk", &remote_id, "archive").unwrap();
    let raw = fetcher(&store, &provider).fetch_message(&stored).unwrap();

    assert_eq!(raw.id, moved);
    assert_eq!(provider.calls(Op::FindByImmutableId), 1);
    assert_eq!(provider.calls(Op::GetMessage), 2);

    let corrected = store.get_message(&stored.id).unwrap().unwrap();
    assert_eq!(corrected.remote_id, moved);
    assert_eq!(corrected.thread_id, stored.thread_id);
}

#[test]
fn ambiguous_matches_are_not_recoverable() {
    init_logger();

    let (_dir, store, provider) = setup();
    let remote_id = provider.add_message("desk", "inbox", mail(Some("vat-2@client.com")));
    let stored = sync(&store, &provider, &remote_id);

    provider.remove_message("desk", &remote_id);
    provider.add_message("desk", "inbox", mail(Some("vat-2@client.com")));
    provider.add_message("desk", "archive", mail(Some("vat-2@client.com")));

    let err = fetcher(&store, &provider).fetch_message(&stored).unwrap_err();

    assert!(err.is_not_recoverable());
    assert!(matches!(err, Error::NotRecoverableError(_, Reason::Ambiguous(2))));
    assert_eq!(
        store.get_message(&stored.id).unwrap().unwrap().remote_id,
        remote_id
    );
}

#[test]
fn missing_immutable_id_is_not_recoverable() {
    init_logger();

    let (_dir, store, provider) = setup();
    let remote_id = provider.add_message("desk", "inbox", mail(None));
    let stored = sync(&store, &provider, &remote_id);

    provider.remove_message("desk", &remote_id);
    let err = fetcher(&store, &provider).fetch_message(&stored).unwrap_err();

    assert!(matches!(err, Error::NotRecoverableError(_, Reason::MissingImmutableId)));
    assert_eq!(provider.calls(Op::FindByImmutableId), 0);
}

#[test]
fn cached_body_is_used_when_not_recoverable() {
    init_logger();

    let (_dir, store, provider) = setup();
    let remote_id = provider.add_message("desk", "inbox", mail(Some("vat-3@client.com")));
    let stored = sync(&store, &provider, &remote_id);

    let fetcher = fetcher(&store, &provider);

    let body = fetcher.fetch_body_or_cached(&stored).unwrap();
    assert!(!body.from_cache);

    provider.remove_message("desk", &remote_id);
    let body = fetcher.fetch_body_or_cached(&stored).unwrap();

    assert!(body.from_cache);
    assert_eq!(
        body.text.as_deref(),
        Some("Please find the signed return attached.")
    );
}

#[test]
fn attachment_keeps_its_id_after_move() {
    init_logger();

    let (_dir, store, provider) = setup();
    let remote_id = provider.add_message("desk", "inbox", mail(Some("vat-4@client.com")));
    provider
        .add_attachment("desk", &remote_id, attachment("return.pdf"), b"%PDF-1".to_vec())
        .unwrap();
    let stored = sync(&store, &provider, &remote_id);

    provider.move_message("desk", &remote_id, "archive").unwrap();
    let content = fetcher(&store, &provider)
        .fetch_attachment(&stored, &stored.attachments[0])
        .unwrap();

    assert_eq!(content.bytes, b"%PDF-1".to_vec());
    assert_eq!(provider.calls(Op::ListAttachments), 0);
}

#[test]
fn rekeyed_attachment_is_matched_by_file_name() {
    init_logger();

    let (_dir, store, provider) = setup();
    let remote_id = provider.add_message("desk", "inbox", mail(Some("vat-5@client.com")));
    provider
        .add_attachment("desk", &remote_id, attachment("invoice.pdf"), b"invoice".to_vec())
        .unwrap();
    provider
        .add_attachment("desk", &remote_id, attachment("return.pdf"), b"return".to_vec())
        .unwrap();
    let stored = sync(&store, &provider, &remote_id);

    let moved = provider.move_message("desk", &remote_id, "archive").unwrap();
    provider.rekey_attachments("desk", &moved);

    let wanted = stored
        .attachments
        .iter()
        .find(|attachment| attachment.file_name == "return.pdf")
        .unwrap();
    let content = fetcher(&store, &provider)
        .fetch_attachment(&stored, wanted)
        .unwrap();

    assert_eq!(content.bytes, b"return".to_vec());

    let corrected = store.get_message(&stored.id).unwrap().unwrap();
    let corrected = corrected
        .attachments
        .iter()
        .find(|attachment| attachment.id == wanted.id)
        .unwrap();
    assert_eq!(corrected.remote_id, content.remote_id);
    assert_ne!(corrected.remote_id, wanted.remote_id);
}

#[test]
fn single_attachment_is_accepted() {
    init_logger();

    let (_dir, store, provider) = setup();
    let remote_id = provider.add_message("desk", "inbox", mail(Some("vat-6@client.com")));
    provider
        .add_attachment("desk", &remote_id, attachment("scan.pdf"), b"scan".to_vec())
        .unwrap();
    let stored = sync(&store, &provider, &remote_id);

    let moved = provider.move_message("desk", &remote_id, "archive").unwrap();
    provider.rekey_attachments("desk", &moved);

    let renamed = Attachment {
        file_name: "renamed.pdf".into(),
        ..stored.attachments[0].clone()
    };
    let content = fetcher(&store, &provider)
        .fetch_attachment(&stored, &renamed)
        .unwrap();

    assert_eq!(content.bytes, b"scan".to_vec());
}

#[test]
fn unmatched_attachment_is_not_recoverable() {
    init_logger();

    let (_dir, store, provider) = setup();
    let remote_id = provider.add_message("desk", "inbox", mail(Some("vat-7@client.com")));
    provider
        .add_attachment("desk", &remote_id, attachment("a.pdf"), b"a".to_vec())
        .unwrap();
    provider
        .add_attachment("desk", &remote_id, attachment("b.pdf"), b"b".to_vec())
        .unwrap();
    let stored = sync(&store, &provider, &remote_id);

    let moved = provider.move_message("desk", &remote_id, "archive").unwrap();
    provider.rekey_attachments("desk", &moved);

    let unknown = Attachment {
        file_name: "c.pdf".into(),
        ..stored.attachments[0].clone()
    };
    let err = fetcher(&store, &provider)
        .fetch_attachment(&stored, &unknown)
        .unwrap_err();

    assert!(matches!(err, Error::NotRecoverableError(_, Reason::AttachmentNotFound)));
}
