//! 聊天领域服务单元测试
//!
//! 仓储全部用 mockall 替身，重点覆盖前置检查顺序和失败路径。

#[cfg(test)]
mod chat_service_tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use domain::{
        Dialog, DialogId, Emoji, Message, MessageContent, MessageId, MessageType,
        MockDialogRepository, MockMessageRepository, MockParticipantRepository,
        MockReactionRepository, MockReadReceiptRepository, Participant, ParticipantRole,
        Reaction, ReactionChange, RepositoryError, Timestamp, UserId,
    };
    use mockall::predicate::eq;

    use crate::clock::Clock;
    use crate::error::ErrorKind;
    use crate::services::{
        AttachmentRef, ChatService, ChatServiceDependencies, ChatSettings, CreateDialogOptions,
        SendMessageRequest,
    };
    use crate::storage::{MockBlobStorage, StoredBlob};

    struct FixedClock(Timestamp);

    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn member(dialog_id: DialogId, user_id: UserId) -> Participant {
        Participant::new(dialog_id, user_id, ParticipantRole::Member, now())
    }

    fn text_message(dialog_id: DialogId, sender_id: UserId) -> Message {
        Message::new(
            MessageId::generate(),
            dialog_id,
            sender_id,
            MessageType::Text,
            MessageContent::new("hi").unwrap(),
            None,
            None,
            now(),
        )
    }

    #[derive(Default)]
    struct Mocks {
        dialogs: MockDialogRepository,
        participants: MockParticipantRepository,
        messages: MockMessageRepository,
        receipts: MockReadReceiptRepository,
        reactions: MockReactionRepository,
        blobs: MockBlobStorage,
    }

    impl Mocks {
        fn with_dialog(dialog_id: DialogId) -> Self {
            let mut mocks = Mocks::default();
            let dialog = Dialog::new_direct(dialog_id, None, now());
            mocks
                .dialogs
                .expect_find_by_id()
                .with(eq(dialog_id))
                .returning(move |_| Ok(Some(dialog.clone())));
            mocks
        }

        fn participant(&mut self, dialog_id: DialogId, user_id: UserId, row: Option<Participant>) {
            self.participants
                .expect_find()
                .with(eq(dialog_id), eq(user_id))
                .returning(move |_, _| Ok(row.clone()));
        }

        fn message(&mut self, message: Message) {
            self.messages
                .expect_find_by_id()
                .with(eq(message.id))
                .returning(move |_| Ok(Some(message.clone())));
        }

        fn into_service(self) -> ChatService {
            ChatService::new(ChatServiceDependencies {
                dialog_repository: Arc::new(self.dialogs),
                participant_repository: Arc::new(self.participants),
                message_repository: Arc::new(self.messages),
                receipt_repository: Arc::new(self.receipts),
                reaction_repository: Arc::new(self.reactions),
                blob_storage: Arc::new(self.blobs),
                clock: Arc::new(FixedClock(now())),
                settings: ChatSettings {
                    typing_ttl: Duration::seconds(5),
                    history_page_limit: 50,
                },
            })
        }
    }

    #[tokio::test]
    async fn create_dialog_requires_someone_besides_creator() {
        let creator = UserId::generate();
        let mut mocks = Mocks::default();
        mocks.dialogs.expect_create_with_participants().never();

        let err = mocks
            .into_service()
            .create_dialog(creator, vec![creator], CreateDialogOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn create_dialog_dedupes_and_makes_creator_admin() {
        let (creator, bob, carol) = (UserId::generate(), UserId::generate(), UserId::generate());
        let mut mocks = Mocks::default();
        mocks
            .dialogs
            .expect_create_with_participants()
            .withf(move |dialog, participants| {
                dialog.is_group
                    && participants.len() == 3
                    && participants.iter().all(|p| p.dialog_id == dialog.id)
                    && participants
                        .iter()
                        .filter(|p| p.role == ParticipantRole::Admin)
                        .map(|p| p.user_id)
                        .eq([creator])
            })
            .times(1)
            .returning(|dialog, _| Ok(dialog));

        let dialog = mocks
            .into_service()
            .create_dialog(
                creator,
                vec![bob, carol, bob, creator],
                CreateDialogOptions::default(),
            )
            .await
            .unwrap();
        assert!(dialog.is_group);
    }

    #[tokio::test]
    async fn open_direct_dialog_reuses_existing() {
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let existing = Dialog::new_direct(DialogId::generate(), None, now());
        let expected = existing.clone();
        let mut mocks = Mocks::default();
        mocks
            .dialogs
            .expect_find_direct()
            .with(eq(alice), eq(bob))
            .returning(move |_, _| Ok(Some(existing.clone())));
        mocks.dialogs.expect_create_with_participants().never();

        let (dialog, created) = mocks
            .into_service()
            .open_direct_dialog(alice, bob, None)
            .await
            .unwrap();
        assert_eq!(dialog, expected);
        assert!(!created);
    }

    #[tokio::test]
    async fn non_participant_cannot_send() {
        let dialog_id = DialogId::generate();
        let outsider = UserId::generate();
        let mut mocks = Mocks::with_dialog(dialog_id);
        mocks.participant(dialog_id, outsider, None);
        mocks.messages.expect_persist_outgoing().never();

        let err = mocks
            .into_service()
            .send_message(outsider, SendMessageRequest::text(dialog_id, "hello"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[tokio::test]
    async fn left_participant_cannot_send() {
        let dialog_id = DialogId::generate();
        let user_id = UserId::generate();
        let mut left = member(dialog_id, user_id);
        left.leave(now());

        let mut mocks = Mocks::with_dialog(dialog_id);
        mocks.participant(dialog_id, user_id, Some(left));
        mocks.messages.expect_persist_outgoing().never();

        let err = mocks
            .into_service()
            .send_message(user_id, SendMessageRequest::text(dialog_id, "still here?"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[tokio::test]
    async fn missing_dialog_is_not_found() {
        let mut mocks = Mocks::default();
        mocks.dialogs.expect_find_by_id().returning(|_| Ok(None));
        mocks.participants.expect_find().never();

        let err = mocks
            .into_service()
            .send_message(
                UserId::generate(),
                SendMessageRequest::text(DialogId::generate(), "hello"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn persistence_failure_surfaces_as_internal() {
        let dialog_id = DialogId::generate();
        let sender = UserId::generate();
        let mut mocks = Mocks::with_dialog(dialog_id);
        mocks.participant(dialog_id, sender, Some(member(dialog_id, sender)));
        mocks
            .messages
            .expect_persist_outgoing()
            .times(1)
            .returning(|_| Err(RepositoryError::storage("transaction aborted")));

        let err = mocks
            .into_service()
            .send_message(sender, SendMessageRequest::text(dialog_id, "hello"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn send_records_sender_receipt_in_same_unit() {
        let dialog_id = DialogId::generate();
        let sender = UserId::generate();
        let mut mocks = Mocks::with_dialog(dialog_id);
        mocks.participant(dialog_id, sender, Some(member(dialog_id, sender)));
        mocks
            .messages
            .expect_persist_outgoing()
            .withf(move |outgoing| {
                outgoing.sender_receipt.user_id == sender
                    && outgoing.sender_receipt.message_id == outgoing.message.id
                    && outgoing.sender_receipt.read_at == now()
                    && outgoing.message.content.as_str() == "hi"
            })
            .times(1)
            .returning(|outgoing| Ok(outgoing.message));

        let message = mocks
            .into_service()
            .send_message(sender, SendMessageRequest::text(dialog_id, "hi"))
            .await
            .unwrap();
        assert_eq!(message.sender_id, sender);
        assert_eq!(message.dialog_id, dialog_id);
        assert_eq!(message.created_at, now());
    }

    #[tokio::test]
    async fn attachments_are_resolved_through_blob_storage() {
        let dialog_id = DialogId::generate();
        let sender = UserId::generate();
        let mut mocks = Mocks::with_dialog(dialog_id);
        mocks.participant(dialog_id, sender, Some(member(dialog_id, sender)));
        mocks
            .blobs
            .expect_stat()
            .withf(|url| url.ends_with("headshot.png"))
            .returning(|url| {
                Ok(Some(StoredBlob {
                    url: url.to_string(),
                    file_name: "headshot.png".into(),
                    mime_type: "image/png".into(),
                    size: 2048,
                }))
            });
        mocks
            .blobs
            .expect_stat()
            .withf(|url| url.ends_with("missing.png"))
            .returning(|_| Ok(None));
        mocks
            .messages
            .expect_persist_outgoing()
            .times(1)
            .returning(|outgoing| Ok(outgoing.message));
        let service = mocks.into_service();

        let mut request = SendMessageRequest::text(dialog_id, "");
        request.message_type = MessageType::Image;
        request.attachments = vec![AttachmentRef {
            url: "http://files/headshot.png".into(),
            file_name: None,
        }];
        let message = service.send_message(sender, request).await.unwrap();
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].message_id, message.id);
        assert_eq!(message.attachments[0].mime_type, "image/png");
        assert_eq!(message.attachments[0].size, 2048);

        let mut missing = SendMessageRequest::text(dialog_id, "");
        missing.attachments = vec![AttachmentRef {
            url: "http://files/missing.png".into(),
            file_name: Some("x.png".into()),
        }];
        let err = service.send_message(sender, missing).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn rejects_system_type_and_foreign_reply() {
        let dialog_id = DialogId::generate();
        let sender = UserId::generate();
        let foreign = text_message(DialogId::generate(), sender);
        let foreign_id = foreign.id;

        let mut mocks = Mocks::with_dialog(dialog_id);
        mocks.participant(dialog_id, sender, Some(member(dialog_id, sender)));
        mocks.message(foreign);
        mocks.messages.expect_persist_outgoing().never();
        let service = mocks.into_service();

        let mut system = SendMessageRequest::text(dialog_id, "joined");
        system.message_type = MessageType::System;
        let err = service.send_message(sender, system).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let mut reply = SendMessageRequest::text(dialog_id, "re");
        reply.reply_to_id = Some(foreign_id);
        let err = service.send_message(sender, reply).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = service
            .send_message(sender, SendMessageRequest::text(dialog_id, "   "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn mark_as_read_twice_reports_one_new_receipt() {
        let dialog_id = DialogId::generate();
        let (sender, reader) = (UserId::generate(), UserId::generate());
        let message = text_message(dialog_id, sender);
        let message_id = message.id;

        let mut mocks = Mocks::with_dialog(dialog_id);
        mocks.participant(dialog_id, reader, Some(member(dialog_id, reader)));
        mocks.message(message);
        let mut first = true;
        mocks
            .receipts
            .expect_insert_if_absent()
            .times(2)
            .returning(move |_| {
                let created = first;
                first = false;
                Ok(created)
            });
        let service = mocks.into_service();

        let marked = service.mark_as_read(reader, message_id).await.unwrap();
        assert_eq!(marked.message_ids, vec![message_id]);
        assert_eq!(marked.dialog_id, dialog_id);

        let again = service.mark_as_read(reader, message_id).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn mark_all_as_read_touches_last_seen() {
        let dialog_id = DialogId::generate();
        let reader = UserId::generate();
        let unread = vec![MessageId::generate(), MessageId::generate()];
        let expected = unread.clone();

        let mut mocks = Mocks::with_dialog(dialog_id);
        mocks.participant(dialog_id, reader, Some(member(dialog_id, reader)));
        mocks
            .receipts
            .expect_insert_missing()
            .with(eq(dialog_id), eq(reader), eq(now()))
            .returning(move |_, _, _| Ok(unread.clone()));
        mocks
            .participants
            .expect_touch_seen()
            .with(eq(dialog_id), eq(reader), eq(now()))
            .times(1)
            .returning(move |dialog_id, user_id, at| {
                let mut row = member(dialog_id, user_id);
                row.touch_seen(at);
                Ok(row)
            });

        let marked = mocks
            .into_service()
            .mark_all_as_read(reader, dialog_id)
            .await
            .unwrap();
        assert_eq!(marked.message_ids, expected);
    }

    #[tokio::test]
    async fn typing_sets_expiry_from_settings() {
        let dialog_id = DialogId::generate();
        let user_id = UserId::generate();
        let mut mocks = Mocks::with_dialog(dialog_id);
        mocks.participant(dialog_id, user_id, Some(member(dialog_id, user_id)));
        mocks
            .participants
            .expect_set_typing_until()
            .with(
                eq(dialog_id),
                eq(user_id),
                eq(Some(now() + Duration::seconds(5))),
            )
            .times(1)
            .returning(|dialog_id, user_id, until| {
                let mut row = member(dialog_id, user_id);
                row.typing_until = until;
                Ok(row)
            });

        let update = mocks
            .into_service()
            .set_typing(user_id, dialog_id, true)
            .await
            .unwrap();
        assert!(update.typing);
        assert_eq!(update.user_id, user_id);
    }

    #[tokio::test]
    async fn mute_requires_active_membership() {
        let dialog_id = DialogId::generate();
        let (member_id, stranger) = (UserId::generate(), UserId::generate());
        let mut mocks = Mocks::with_dialog(dialog_id);
        mocks.participant(dialog_id, member_id, Some(member(dialog_id, member_id)));
        mocks.participant(dialog_id, stranger, None);
        mocks
            .participants
            .expect_set_muted()
            .with(eq(dialog_id), eq(member_id), eq(true))
            .times(1)
            .returning(|dialog_id, user_id, muted| {
                let mut row = member(dialog_id, user_id);
                row.is_muted = muted;
                Ok(row)
            });

        let service = mocks.into_service();
        let participant = service.set_muted(member_id, dialog_id, true).await.unwrap();
        assert!(participant.is_muted);

        let err = service.set_muted(stranger, dialog_id, true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[tokio::test]
    async fn concurrent_leave_between_read_and_write_is_access_denied() {
        let dialog_id = DialogId::generate();
        let user_id = UserId::generate();
        let mut mocks = Mocks::with_dialog(dialog_id);
        // 读取时仍是成员，条件写入时已被另一台设备退出
        mocks.participant(dialog_id, user_id, Some(member(dialog_id, user_id)));
        mocks
            .participants
            .expect_set_typing_until()
            .times(1)
            .returning(|_, _, _| Err(RepositoryError::NotFound));
        mocks
            .participants
            .expect_mark_left()
            .times(1)
            .returning(|_, _, _| Err(RepositoryError::NotFound));

        let service = mocks.into_service();
        let err = service
            .set_typing(user_id, dialog_id, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);

        let err = service.leave_dialog(user_id, dialog_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[tokio::test]
    async fn same_emoji_toggles_reaction_off() {
        let dialog_id = DialogId::generate();
        let user_id = UserId::generate();
        let message = text_message(dialog_id, UserId::generate());
        let message_id = message.id;
        let existing = Reaction {
            message_id,
            user_id,
            emoji: Emoji::parse("👍").unwrap(),
            created_at: now(),
        };

        let mut mocks = Mocks::with_dialog(dialog_id);
        mocks.participant(dialog_id, user_id, Some(member(dialog_id, user_id)));
        mocks.message(message);
        mocks
            .reactions
            .expect_find()
            .returning(move |_, _| Ok(Some(existing.clone())));
        mocks
            .reactions
            .expect_remove()
            .with(eq(message_id), eq(user_id))
            .times(1)
            .returning(|_, _| Ok(()));
        mocks.reactions.expect_upsert().never();

        let update = mocks
            .into_service()
            .toggle_reaction(user_id, message_id, "👍")
            .await
            .unwrap();
        assert_eq!(update.change, ReactionChange::Removed);
        assert_eq!(update.dialog_id, dialog_id);
    }

    #[tokio::test]
    async fn history_limit_is_clamped() {
        let dialog_id = DialogId::generate();
        let user_id = UserId::generate();
        let mut mocks = Mocks::with_dialog(dialog_id);
        mocks.participant(dialog_id, user_id, Some(member(dialog_id, user_id)));
        mocks
            .messages
            .expect_list_recent()
            .with(eq(dialog_id), eq(50u32), eq(None::<MessageId>))
            .times(1)
            .returning(|_, _, _| Ok(Vec::new()));

        let page = mocks
            .into_service()
            .list_messages(user_id, dialog_id, Some(500), None)
            .await
            .unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn active_participants_come_from_repository() {
        let dialog_id = DialogId::generate();
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let rows = vec![member(dialog_id, alice), member(dialog_id, bob)];
        let mut mocks = Mocks::default();
        mocks
            .participants
            .expect_list_active()
            .with(eq(dialog_id))
            .returning(move |_| Ok(rows.clone()));

        let users = mocks
            .into_service()
            .active_participants(dialog_id)
            .await
            .unwrap();
        assert_eq!(users, vec![alice, bob]);
    }
}
