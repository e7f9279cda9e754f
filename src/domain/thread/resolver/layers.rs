use log::trace;

use crate::{message_key, normalize_subject, store, Message};

use super::{Context, Layer};

type LayerFn = fn(&Context, &Message) -> store::Result<Option<String>>;

/// Matching layers, in evaluation order.
pub const CASCADE: [(Layer, LayerFn); 6] = [
    (Layer::ConversationId, by_conversation_id),
    (Layer::CorrelationId, by_correlation_id),
    (Layer::ImmutableId, by_immutable_id),
    (Layer::InReplyTo, by_in_reply_to),
    (Layer::References, by_references),
    (Layer::SubjectParticipants, by_subject_participants),
];

fn by_conversation_id(ctx: &Context, candidate: &Message) -> store::Result<Option<String>> {
    match candidate.conversation_id.as_deref() {
        Some(id) => ctx.lookup.thread_by_conversation_id(id),
        None => Ok(None),
    }
}

fn by_correlation_id(ctx: &Context, candidate: &Message) -> store::Result<Option<String>> {
    match candidate.correlation_token() {
        Some(token) => ctx.lookup.thread_by_correlation_id(token),
        None => Ok(None),
    }
}

fn by_immutable_id(ctx: &Context, candidate: &Message) -> store::Result<Option<String>> {
    match candidate.in_reply_to.as_deref() {
        Some(id) => ctx.lookup.thread_by_immutable_id(id),
        None => Ok(None),
    }
}

fn by_in_reply_to(ctx: &Context, candidate: &Message) -> store::Result<Option<String>> {
    match candidate.in_reply_to.as_deref().and_then(message_key) {
        Some(key) => ctx.lookup.thread_by_message_key(&key),
        None => Ok(None),
    }
}

fn by_references(ctx: &Context, candidate: &Message) -> store::Result<Option<String>> {
    for key in candidate.references.iter().filter_map(|id| message_key(id)) {
        if let Some(thread_id) = ctx.lookup.thread_by_message_key(&key)? {
            return Ok(Some(thread_id));
        }
    }

    Ok(None)
}

fn by_subject_participants(ctx: &Context, candidate: &Message) -> store::Result<Option<String>> {
    let subject = normalize_subject(&candidate.subject);
    if subject.chars().count() < ctx.config.min_subject_len() {
        trace!("subject {:?} too short for heuristic matching", subject);
        return Ok(None);
    }

    let participants = candidate.participants();
    let min_overlap = ctx.config.min_participant_overlap();
    if participants.len() < min_overlap {
        return Ok(None);
    }

    let at = candidate.timestamp().unwrap_or(ctx.now);
    let window = ctx.config.subject_window();

    for thread_id in ctx
        .lookup
        .threads_by_subject(&subject, at - window, at + window)?
    {
        let recent = ctx
            .lookup
            .recent_participants(&thread_id, ctx.config.recent_messages())?;

        let overlaps = recent
            .iter()
            .any(|other| participants.intersection(other).count() >= min_overlap);

        if overlaps {
            return Ok(Some(thread_id));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::{BTreeSet, HashMap};

    use crate::{Layer, Lookup, ResolverConfig, ThreadResolver};

    use super::*;

    /// In-memory lookup over a handful of stored messages.
    #[derive(Default)]
    struct FakeLookup {
        messages: Vec<(String, Message)>,
        activity: HashMap<String, DateTime<Utc>>,
    }

    impl FakeLookup {
        fn add(&mut self, thread_id: &str, message: Message) {
            let at = message.timestamp().unwrap_or_else(Utc::now);
            let activity = self.activity.entry(thread_id.to_owned()).or_insert(at);
            *activity = (*activity).max(at);
            self.messages.push((thread_id.to_owned(), message));
        }

        fn find(&self, f: impl Fn(&Message) -> bool) -> store::Result<Option<String>> {
            Ok(self
                .messages
                .iter()
                .find(|(_, message)| f(message))
                .map(|(thread_id, _)| thread_id.clone()))
        }
    }

    impl Lookup for FakeLookup {
        fn thread_by_conversation_id(&self, id: &str) -> store::Result<Option<String>> {
            self.find(|m| m.conversation_id.as_deref() == Some(id))
        }

        fn thread_by_correlation_id(&self, token: &str) -> store::Result<Option<String>> {
            self.find(|m| m.correlation_id.as_deref() == Some(token))
        }

        fn thread_by_immutable_id(&self, id: &str) -> store::Result<Option<String>> {
            self.find(|m| m.immutable_id.as_deref() == Some(id))
        }

        fn thread_by_message_key(&self, key: &str) -> store::Result<Option<String>> {
            self.find(|m| {
                m.immutable_id.as_deref().and_then(message_key).as_deref() == Some(key)
                    || message_key(&m.remote_id).as_deref() == Some(key)
            })
        }

        fn threads_by_subject(
            &self,
            subject: &str,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> store::Result<Vec<String>> {
            let mut threads: Vec<String> = self
                .messages
                .iter()
                .filter(|(_, m)| normalize_subject(&m.subject) == subject)
                .map(|(thread_id, _)| thread_id.clone())
                .filter(|thread_id| {
                    let at = self.activity[thread_id];
                    at >= from && at <= to
                })
                .collect();
            threads.sort_by_key(|thread_id| std::cmp::Reverse(self.activity[thread_id]));
            threads.dedup();
            Ok(threads)
        }

        fn recent_participants(
            &self,
            thread_id: &str,
            limit: usize,
        ) -> store::Result<Vec<BTreeSet<String>>> {
            Ok(self
                .messages
                .iter()
                .rev()
                .filter(|(id, _)| id == thread_id)
                .take(limit)
                .map(|(_, m)| m.participants())
                .collect())
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, hour, 0, 0).unwrap()
    }

    fn message(remote_id: &str, subject: &str, from: &str, to: &[&str]) -> Message {
        Message {
            remote_id: remote_id.into(),
            subject: subject.into(),
            from: from.into(),
            to: to.iter().map(|addr| addr.to_string()).collect(),
            received_at: Some(at(8)),
            ..Message::default()
        }
    }

    fn resolve(lookup: &FakeLookup, candidate: &Message) -> crate::Resolution {
        let config = ResolverConfig::default();
        ThreadResolver::new(lookup, &config)
            .resolve_at(candidate, at(12))
            .unwrap()
    }

    #[test]
    fn conversation_id_wins_over_in_reply_to() {
        let mut lookup = FakeLookup::default();
        lookup.add(
            "t-conv",
            Message {
                conversation_id: Some("conv-1".into()),
                ..message("r1", "Hello", "a@x", &[])
            },
        );
        lookup.add(
            "t-reply",
            Message {
                immutable_id: Some("parent@x".into()),
                ..message("r2", "Other", "b@x", &[])
            },
        );

        let candidate = Message {
            conversation_id: Some("conv-1".into()),
            in_reply_to: Some("parent@x".into()),
            ..message("r3", "Re: Hello", "c@x", &[])
        };

        let resolution = resolve(&lookup, &candidate);
        assert_eq!(resolution.thread_id, "t-conv");
        assert_eq!(resolution.layer, Layer::ConversationId);
        assert!(!resolution.is_new);
    }

    #[test]
    fn conversation_id_wins_over_correlation_token() {
        let mut lookup = FakeLookup::default();
        lookup.add(
            "t-a",
            Message {
                conversation_id: Some("conv-a".into()),
                ..message("r1", "Hello", "a@x", &[])
            },
        );
        lookup.add(
            "t-b",
            Message {
                correlation_id: Some("TAX_B".into()),
                ..message("r2", "Other", "desk@x", &["a@x"])
            },
        );

        let candidate = Message {
            conversation_id: Some("conv-a".into()),
            correlation_ref: Some("TAX_B".into()),
            ..message("r3", "Re: Other", "a@x", &["desk@x"])
        };

        let resolution = resolve(&lookup, &candidate);
        assert_eq!(resolution.thread_id, "t-a");
        assert_eq!(resolution.layer, Layer::ConversationId);
    }

    #[test]
    fn correlation_token_from_reply() {
        let mut lookup = FakeLookup::default();
        lookup.add(
            "t-out",
            Message {
                correlation_id: Some("TAX_1".into()),
                ..message("r1", "Documents", "desk@x", &["client@y"])
            },
        );

        let candidate = Message {
            correlation_ref: Some("TAX_1".into()),
            ..message("r2", "Something else", "client@y", &["desk@x"])
        };

        let resolution = resolve(&lookup, &candidate);
        assert_eq!(resolution.thread_id, "t-out");
        assert_eq!(resolution.layer, Layer::CorrelationId);
    }

    #[test]
    fn exact_then_loose_in_reply_to() {
        let mut lookup = FakeLookup::default();
        lookup.add(
            "t1",
            Message {
                immutable_id: Some("Parent@Mail.X".into()),
                ..message("r1", "Hello", "a@x", &[])
            },
        );

        let exact = Message {
            in_reply_to: Some("Parent@Mail.X".into()),
            ..message("r2", "", "b@x", &[])
        };
        assert_eq!(resolve(&lookup, &exact).layer, Layer::ImmutableId);

        let loose = Message {
            in_reply_to: Some(" <parent@mail.x> ".into()),
            ..message("r3", "", "b@x", &[])
        };
        let resolution = resolve(&lookup, &loose);
        assert_eq!(resolution.thread_id, "t1");
        assert_eq!(resolution.layer, Layer::InReplyTo);
    }

    #[test]
    fn oldest_existing_reference_wins() {
        let mut lookup = FakeLookup::default();
        lookup.add(
            "t-old",
            Message {
                immutable_id: Some("old@x".into()),
                ..message("r1", "A", "a@x", &[])
            },
        );
        lookup.add(
            "t-new",
            Message {
                immutable_id: Some("new@x".into()),
                ..message("r2", "B", "a@x", &[])
            },
        );

        let candidate = Message {
            references: vec!["unknown@x".into(), "old@x".into(), "new@x".into()],
            ..message("r3", "", "b@x", &[])
        };

        let resolution = resolve(&lookup, &candidate);
        assert_eq!(resolution.thread_id, "t-old");
        assert_eq!(resolution.layer, Layer::References);
    }

    #[test]
    fn subject_participants_overlap() {
        let mut lookup = FakeLookup::default();
        lookup.add(
            "t1",
            message("r1", "VAT return Q1", "a@x", &["b@x", "c@x"]),
        );

        let sharing_two = message("r2", "Re: VAT return Q1", "b@x", &["a@x"]);
        let resolution = resolve(&lookup, &sharing_two);
        assert_eq!(resolution.thread_id, "t1");
        assert_eq!(resolution.layer, Layer::SubjectParticipants);

        let sharing_one = message("r3", "Re: VAT return Q1", "z@x", &["a@x"]);
        let resolution = resolve(&lookup, &sharing_one);
        assert_eq!(resolution.layer, Layer::Fallback);
        assert!(resolution.is_new);
    }

    #[test]
    fn shared_recipients_join_without_shared_sender() {
        let mut lookup = FakeLookup::default();
        lookup.add(
            "t1",
            message("r1", "Tax filing", "a@x", &["p@x", "q@x", "s@x"]),
        );

        let two_shared = Message {
            received_at: Some(at(9)),
            ..message("r2", "Tax filing", "b@x", &["p@x", "q@x", "u@x"])
        };
        let resolution = resolve(&lookup, &two_shared);
        assert_eq!(resolution.thread_id, "t1");
        assert_eq!(resolution.layer, Layer::SubjectParticipants);

        let one_shared = Message {
            received_at: Some(at(9)),
            ..message("r3", "Tax filing", "c@x", &["p@x", "u@x", "v@x"])
        };
        let resolution = resolve(&lookup, &one_shared);
        assert_eq!(resolution.layer, Layer::Fallback);
        assert!(resolution.is_new);
    }

    #[test]
    fn subject_heuristic_rejects_short_subjects() {
        let mut lookup = FakeLookup::default();
        lookup.add("t1", message("r1", "Hi", "a@x", &["b@x"]));

        let candidate = message("r2", "Re: hi", "a@x", &["b@x"]);
        assert_eq!(resolve(&lookup, &candidate).layer, Layer::Fallback);
    }

    #[test]
    fn subject_heuristic_respects_window() {
        let mut lookup = FakeLookup::default();
        lookup.add("t1", message("r1", "VAT return Q1", "a@x", &["b@x"]));

        let candidate = Message {
            received_at: Some(at(8) + Duration::hours(73)),
            ..message("r2", "Re: VAT return Q1", "a@x", &["b@x"])
        };
        assert_eq!(resolve(&lookup, &candidate).layer, Layer::Fallback);

        let candidate = Message {
            received_at: Some(at(8) + Duration::hours(71)),
            ..candidate
        };
        assert_eq!(resolve(&lookup, &candidate).thread_id, "t1");
    }
}
