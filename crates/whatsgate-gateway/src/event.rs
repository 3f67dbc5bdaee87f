//! Translation of raw protocol events into normalized [`Event`]s.
//!
//! Most events map one-to-one through the free functions below. Messages
//! need the client (attachments are downloaded eagerly) and the converter
//! (voice notes are re-encoded), so they go through a [`Translator`].

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use whatsgate_media::{Converter, MimeType, Spec};
use whatsgate_shared::Jid;

use crate::attachment::extension_by_type;
use crate::error::Result;
use crate::protocol::{
    CallMeta, ChatPresence, ChatPresenceEvent, ContactInfo, ContextInfo, GroupInfo, GroupUpdate,
    MediaPayload, MessageEvent, MessageStatus, PresenceEvent, ProtoMessage, ProtocolClient,
    ProtocolKind, ReceiptEvent, ReceiptType, StubType, WebMessageInfo,
};
use crate::types::{
    Attachment, Call, CallState, ChatState, ChatStateKind, Contact, Event, Group, GroupAffiliation,
    GroupParticipant, GroupParticipantAction, GroupSubject, Location, Message, MessageKind,
    Presence, PresenceKind, Receipt, ReceiptKind,
};

// ---------------------------------------------------------------------------
// Simple events
// ---------------------------------------------------------------------------

/// A contact with a human-readable name, or `Unknown` when it has none.
pub fn contact_event(jid: &Jid, info: &ContactInfo) -> Event {
    let name = [&info.full_name, &info.first_name, &info.business_name, &info.push_name]
        .into_iter()
        .find(|n| !n.is_empty());

    match name {
        Some(name) => Event::Contact(Contact {
            jid: jid.to_non_ad().to_string(),
            name: name.clone(),
        }),
        None => Event::Unknown,
    }
}

pub fn presence_event(evt: &PresenceEvent) -> Event {
    Event::Presence(Presence {
        jid: evt.from.to_non_ad().to_string(),
        kind: if evt.unavailable {
            PresenceKind::Unavailable
        } else {
            PresenceKind::Available
        },
        last_seen: evt.last_seen.map(|t| t.timestamp()).unwrap_or_default(),
    })
}

pub fn chat_state_event(evt: &ChatPresenceEvent) -> Event {
    let mut state = ChatState {
        jid: evt.source.sender.to_non_ad().to_string(),
        kind: match evt.state {
            ChatPresence::Composing => ChatStateKind::Composing,
            ChatPresence::Paused => ChatStateKind::Paused,
        },
        ..ChatState::default()
    };
    if evt.source.is_group {
        state.group_jid = evt.source.chat.to_non_ad().to_string();
    }
    Event::ChatState(state)
}

pub fn receipt_event(evt: &ReceiptEvent) -> Event {
    if evt.message_ids.is_empty() {
        return Event::Unknown;
    }

    let kind = match evt.kind {
        ReceiptType::Delivered => ReceiptKind::Delivered,
        ReceiptType::Read => ReceiptKind::Read,
        ReceiptType::Other(ref other) => {
            debug!(kind = %other, "ignoring receipt");
            return Event::Unknown;
        }
    };

    let source = &evt.source;
    let mut receipt = Receipt {
        kind,
        message_ids: evt.message_ids.clone(),
        jid: source.sender.to_non_ad().to_string(),
        timestamp: evt.timestamp.timestamp(),
        is_carbon: source.is_from_me,
        ..Receipt::default()
    };

    if source.chat.is_broadcast() {
        receipt.jid = source.broadcast_list_owner.to_non_ad().to_string();
    } else if source.is_group {
        receipt.group_jid = source.chat.to_non_ad().to_string();
    } else if receipt.is_carbon {
        receipt.jid = source.chat.to_non_ad().to_string();
    }

    Event::Receipt(receipt)
}

/// A partial group update. Only the fields present in `evt` are set.
pub fn group_event(evt: &GroupUpdate) -> Event {
    let mut group = Group {
        jid: evt.jid.to_non_ad().to_string(),
        name: evt.name.clone().unwrap_or_default(),
        ..Group::default()
    };

    if let Some(topic) = &evt.topic {
        group.subject = GroupSubject {
            subject: topic.topic.clone(),
            set_at: topic.set_at.map(|t| t.timestamp()).unwrap_or_default(),
            set_by_jid: topic.set_by.to_non_ad().to_string(),
        };
    }

    let deltas = [
        (&evt.join, GroupParticipantAction::Add, GroupAffiliation::None),
        (&evt.leave, GroupParticipantAction::Remove, GroupAffiliation::None),
        (&evt.promote, GroupParticipantAction::Update, GroupAffiliation::Admin),
        (&evt.demote, GroupParticipantAction::Update, GroupAffiliation::None),
    ];
    for (jids, action, affiliation) in deltas {
        group.participants.extend(jids.iter().map(|jid| GroupParticipant {
            jid: jid.to_non_ad().to_string(),
            affiliation,
            action,
        }));
    }

    Event::Group(group)
}

/// A complete group, with `nickname` as our own name in it.
pub fn group_from_info(info: &GroupInfo, nickname: &str) -> Group {
    let participants = info
        .participants
        .iter()
        .filter(|p| p.error == 0)
        .map(|p| GroupParticipant {
            jid: p.jid.to_non_ad().to_string(),
            affiliation: if p.is_super_admin {
                GroupAffiliation::Owner
            } else if p.is_admin {
                GroupAffiliation::Admin
            } else {
                GroupAffiliation::None
            },
            action: GroupParticipantAction::Add,
        })
        .collect();

    Group {
        jid: info.jid.to_non_ad().to_string(),
        name: info.name.clone(),
        subject: GroupSubject {
            subject: info.topic.clone(),
            set_at: info.topic_set_at.map(|t| t.timestamp()).unwrap_or_default(),
            set_by_jid: info.topic_set_by.to_non_ad().to_string(),
        },
        nickname: nickname.to_string(),
        participants,
    }
}

/// Only an expired or unanswered call counts as missed.
pub fn call_state_from_reason(reason: &str) -> Option<CallState> {
    match reason {
        "" | "timeout" => Some(CallState::Missed),
        _ => None,
    }
}

pub fn call_event(state: Option<CallState>, meta: &CallMeta) -> Event {
    match state {
        Some(state) if !meta.from.is_empty() => Event::Call(Call {
            state,
            jid: meta.from.to_non_ad().to_string(),
            timestamp: meta.timestamp.timestamp(),
        }),
        _ => Event::Unknown,
    }
}

/// Merge reply, forward and mention metadata into `message`.
pub fn apply_context(message: &mut Message, info: &ContextInfo) {
    message.reply_id = info.stanza_id.clone();
    message.origin_jid = info.participant.clone();
    message.is_forwarded = info.is_forwarded;

    if let Some(quoted) = &info.quoted_message {
        message.reply_body = match &quoted.extended_text {
            Some(ext) => ext.text.clone(),
            None => quoted.conversation.clone().unwrap_or_default(),
        };
    }

    if !info.mentioned_jids.is_empty() {
        message.mention_jids = info.mentioned_jids.clone();
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

pub struct Translator<'a> {
    pub client: &'a dyn ProtocolClient,
    pub converter: &'a Converter,
    pub cancel: &'a CancellationToken,
}

impl Translator<'_> {
    /// Normalize a live message.
    pub async fn message_event(&self, evt: &MessageEvent) -> Event {
        let info = &evt.info;
        let proto = &evt.message;

        let mut message = Message {
            kind: MessageKind::Plain,
            id: info.id.clone(),
            jid: info.source.sender.to_non_ad().to_string(),
            body: proto.conversation.clone().unwrap_or_default(),
            timestamp: info.timestamp.timestamp(),
            is_carbon: info.source.is_from_me,
            ..Message::default()
        };

        // Only broadcasts received from others are shown, as ordinary
        // messages from their sender.
        let chat = &info.source.chat;
        if chat.is_broadcast() {
            if chat.is_status_broadcast() || message.is_carbon {
                return Event::Unknown;
            }
        } else if info.source.is_group {
            message.group_jid = chat.to_non_ad().to_string();
        } else if message.is_carbon {
            message.jid = chat.to_non_ad().to_string();
        }

        if let Some(p) = &proto.protocol {
            match &p.kind {
                ProtocolKind::Edit { edited: Some(edited), .. } => {
                    message.kind = MessageKind::Edit;
                    message.id = p.key.id.clone();
                    message.body = edited
                        .conversation
                        .clone()
                        .or_else(|| edited.extended_text.as_ref().map(|e| e.text.clone()))
                        .unwrap_or_default();
                }
                ProtocolKind::Edit { edited: None, .. } => return Event::Unknown,
                ProtocolKind::Revoke => {
                    message.kind = MessageKind::Revoke;
                    message.id = p.key.id.clone();
                    message.origin_jid = p.key.participant.clone().unwrap_or_default();
                    return Event::message(message);
                }
                ProtocolKind::HistorySyncOnDemand { .. } | ProtocolKind::Other(_) => {}
            }
        }

        if let Some(r) = &proto.reaction {
            message.kind = MessageKind::Reaction;
            message.id = r.key.id.clone();
            message.body = r.text.clone();
            return Event::message(message);
        }

        if let Some(l) = &proto.location {
            message.location = Location {
                latitude: l.latitude,
                longitude: l.longitude,
                accuracy: l.accuracy_in_meters,
                is_live: l.is_live,
                name: l.name.clone(),
                address: l.address.clone(),
                url: l.url.clone(),
            };
            return Event::message(message);
        }

        if let Some(l) = &proto.live_location {
            message.body = l.caption.clone();
            message.location = Location {
                latitude: l.latitude,
                longitude: l.longitude,
                accuracy: l.accuracy_in_meters,
                is_live: true,
                ..Location::default()
            };
            return Event::message(message);
        }

        if !self.apply_attachments(&mut message, proto).await {
            return Event::Unknown;
        }

        finish(message, proto)
    }

    /// Normalize a message from a history backfill. Only group messages
    /// with a known sender are kept.
    pub async fn history_event(&self, info: &WebMessageInfo) -> Event {
        let remote = &info.key.remote_jid;
        if !Jid::parse(remote).is_ok_and(|jid| jid.is_group()) {
            return Event::Unknown;
        }

        let empty = ProtoMessage::default();
        let proto = info.message.as_ref().unwrap_or(&empty);
        let own = self.client.device_id().map(|jid| jid.to_non_ad().to_string());

        let mut message = Message {
            kind: MessageKind::Plain,
            id: info.key.id.clone(),
            group_jid: remote.clone(),
            body: proto.conversation.clone().unwrap_or_default(),
            timestamp: info.timestamp as i64,
            is_carbon: info.key.from_me,
            ..Message::default()
        };

        message.jid = match (&info.participant, &own) {
            (Some(participant), _) => participant.clone(),
            (None, Some(own)) if info.key.from_me => own.clone(),
            // The sender is unknown; nothing sensible can be shown.
            _ => return Event::Unknown,
        };

        match info.stub_type {
            Some(StubType::Ciphertext) => return Event::Unknown,
            Some(StubType::CallMissedVoice | StubType::CallMissedVideo) => {
                return Event::Call(Call {
                    state: CallState::Missed,
                    jid: remote.clone(),
                    timestamp: info.timestamp as i64,
                });
            }
            Some(StubType::Revoke) => {
                return match info.stub_parameters.first() {
                    Some(id) => {
                        message.kind = MessageKind::Revoke;
                        message.id = id.clone();
                        Event::message(message)
                    }
                    None => Event::Unknown,
                };
            }
            Some(StubType::Other(_)) | None => {}
        }

        message.reactions = info
            .reactions
            .iter()
            .filter(|r| !r.text.is_empty())
            .map(|r| Message {
                kind: MessageKind::Reaction,
                id: r.key.id.clone(),
                jid: r.key.remote_jid.clone(),
                body: r.text.clone(),
                timestamp: r.sender_timestamp_ms / 1000,
                is_carbon: r.key.from_me,
                ..Message::default()
            })
            .collect();

        if !self.apply_attachments(&mut message, proto).await {
            return Event::Unknown;
        }

        for r in &info.user_receipts {
            if own.as_deref() == Some(r.user_jid.as_str()) {
                continue;
            }
            let (kind, timestamp) = match info.status {
                MessageStatus::DeliveryAck => (ReceiptKind::Delivered, r.receipt_timestamp),
                MessageStatus::Read => (ReceiptKind::Read, r.read_timestamp),
                _ => continue,
            };
            message.receipts.push(Receipt {
                kind,
                message_ids: vec![message.id.clone()],
                jid: r.user_jid.clone(),
                group_jid: message.group_jid.clone(),
                timestamp,
                is_carbon: false,
            });
        }

        finish(message, proto)
    }

    /// Download any attachments into `message`. Returns `false` when a
    /// download failed and the message should be dropped.
    async fn apply_attachments(&self, message: &mut Message, proto: &ProtoMessage) -> bool {
        match self.attachments(proto).await {
            Ok((attachments, context)) => {
                if !attachments.is_empty() {
                    message.attachments.extend(attachments);
                    message.kind = MessageKind::Attachment;
                    if let Some(context) = context {
                        apply_context(message, &context);
                    }
                }
                true
            }
            Err(e) => {
                error!(error = %e, "Failed getting message attachments");
                false
            }
        }
    }

    async fn attachments(
        &self,
        proto: &ProtoMessage,
    ) -> Result<(Vec<Attachment>, Option<ContextInfo>)> {
        let mut result = Vec::new();
        let mut context: Option<ContextInfo> = None;

        // (payload, carries a caption, is audio)
        let kinds: [(&Option<MediaPayload>, bool, bool); 5] = [
            (&proto.image, true, false),
            (&proto.audio, false, true),
            (&proto.video, true, false),
            (&proto.document, true, false),
            (&proto.sticker, false, false),
        ];

        for (payload, has_caption, is_audio) in kinds {
            let Some(media) = payload else { continue };
            if media.mimetype.is_empty() {
                continue;
            }

            let data = self.client.download(media).await?;
            let mut attach = Attachment::new(media.mimetype.clone(), data);
            if has_caption {
                attach.caption = media.caption.clone();
            }
            attach.filename = media.file_name.clone();

            // Voice notes are re-encoded to AAC, which more clients can play.
            if is_audio && media.ptt {
                let spec = Spec::new(MimeType::M4A);
                match self.converter.convert(self.cancel, &attach.data, &spec).await {
                    Ok(data) => {
                        attach.data = data;
                        attach.mime = spec.mime.to_string();
                    }
                    Err(e) => debug!(error = %e, "keeping voice note as received"),
                }
            }

            if attach.filename.is_empty() {
                let hash = if media.file_sha256.is_empty() {
                    blake3::hash(&attach.data).to_hex().to_string()
                } else {
                    hex::encode(&media.file_sha256)
                };
                attach.filename = format!("{hash}{}", extension_by_type(&attach.mime));
            }

            if context.is_none() {
                context = media.context.clone();
            }
            result.push(attach);
        }

        if let Some(card) = &proto.contact {
            result.push(
                Attachment::new("text/vcard", card.vcard.clone().into_bytes())
                    .with_filename(format!("{}.vcf", card.display_name)),
            );
            if card.context.is_some() {
                context = card.context.clone();
            }
        }

        Ok((result, context))
    }
}

/// Apply extended-text metadata and drop messages with nothing to show.
fn finish(mut message: Message, proto: &ProtoMessage) -> Event {
    if let Some(ext) = &proto.extended_text {
        if message.body.is_empty() {
            message.body = ext.text.clone();
        }
        if let Some(context) = &ext.context {
            apply_context(&mut message, context);
        }
    }

    if message.kind == MessageKind::Plain && message.body.is_empty() {
        return Event::Unknown;
    }

    Event::message(message)
}
