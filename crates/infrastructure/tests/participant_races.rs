//! 成员状态的并发写入
//!
//! 读取成员记录与写回之间插入一次退出，退出必须保持有效。

use std::sync::{Arc, Mutex};

use application::{ChatService, ChatSettings, CreateDialogOptions, ErrorKind, SystemClock};
use async_trait::async_trait;
use domain::{
    DialogId, Participant, ParticipantRepository, RepositoryResult, Timestamp, UserId,
};
use infrastructure::{Infrastructure, MemoryBlobStorage, MemoryChatStore};

/// 第一次 `find` 返回后立刻让该成员退出，模拟另一台设备上的并发请求
struct LeaveAfterRead {
    store: MemoryChatStore,
    armed: Mutex<bool>,
}

#[async_trait]
impl ParticipantRepository for LeaveAfterRead {
    async fn find(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Participant>> {
        let row = ParticipantRepository::find(&self.store, dialog_id, user_id).await?;
        let fire = std::mem::replace(&mut *self.armed.lock().unwrap(), false);
        if fire {
            self.store
                .mark_left(dialog_id, user_id, chrono::Utc::now())
                .await?;
        }
        Ok(row)
    }

    async fn list_active(&self, dialog_id: DialogId) -> RepositoryResult<Vec<Participant>> {
        self.store.list_active(dialog_id).await
    }

    async fn set_typing_until(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        until: Option<Timestamp>,
    ) -> RepositoryResult<Participant> {
        self.store.set_typing_until(dialog_id, user_id, until).await
    }

    async fn touch_seen(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<Participant> {
        self.store.touch_seen(dialog_id, user_id, at).await
    }

    async fn set_muted(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        muted: bool,
    ) -> RepositoryResult<Participant> {
        self.store.set_muted(dialog_id, user_id, muted).await
    }

    async fn mark_left(
        &self,
        dialog_id: DialogId,
        user_id: UserId,
        at: Timestamp,
    ) -> RepositoryResult<Participant> {
        self.store.mark_left(dialog_id, user_id, at).await
    }
}

fn racing_service(store: &MemoryChatStore) -> (Arc<ChatService>, Arc<LeaveAfterRead>) {
    let infra = Infrastructure::in_memory(store.clone(), Arc::new(MemoryBlobStorage::new()));
    let racing = Arc::new(LeaveAfterRead {
        store: store.clone(),
        armed: Mutex::new(false),
    });
    let mut deps = infra.chat_dependencies(Arc::new(SystemClock), ChatSettings::default());
    deps.participant_repository = racing.clone();
    (Arc::new(ChatService::new(deps)), racing)
}

async fn seeded_dialog(service: &ChatService) -> (DialogId, UserId, UserId) {
    let (alice, bob) = (UserId::generate(), UserId::generate());
    let dialog = service
        .create_dialog(alice, vec![bob], CreateDialogOptions::default())
        .await
        .expect("create dialog");
    (dialog.id, alice, bob)
}

#[tokio::test]
async fn typing_cannot_undo_a_concurrent_leave() {
    let store = MemoryChatStore::new();
    let (service, racing) = racing_service(&store);
    let (dialog_id, alice, bob) = seeded_dialog(&service).await;

    *racing.armed.lock().unwrap() = true;
    let err = service.set_typing(bob, dialog_id, true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    assert_eq!(service.active_participants(dialog_id).await.unwrap(), vec![alice]);
    let row = ParticipantRepository::find(&store, dialog_id, bob)
        .await
        .unwrap()
        .unwrap();
    assert!(row.left_at.is_some());
    assert_eq!(row.typing_until, None);
}

#[tokio::test]
async fn mute_and_read_cannot_undo_a_concurrent_leave() {
    let store = MemoryChatStore::new();
    let (service, racing) = racing_service(&store);
    let (dialog_id, alice, bob) = seeded_dialog(&service).await;

    *racing.armed.lock().unwrap() = true;
    let err = service.set_muted(bob, dialog_id, true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    *racing.armed.lock().unwrap() = true;
    let err = service.mark_all_as_read(alice, dialog_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    assert!(service.active_participants(dialog_id).await.unwrap().is_empty());
    let row = ParticipantRepository::find(&store, dialog_id, bob)
        .await
        .unwrap()
        .unwrap();
    assert!(row.left_at.is_some());
    assert!(!row.is_muted);
}
