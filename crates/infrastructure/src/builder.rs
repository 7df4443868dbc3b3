use std::path::PathBuf;
use std::sync::Arc;

use application::{BlobStorage, ChatServiceDependencies, ChatSettings, Clock};
use config::{AppConfig, StorageBackend};
use domain::{
    DialogRepository, MessageRepository, ParticipantRepository, ReactionRepository,
    ReadReceiptRepository,
};
use thiserror::Error;

use crate::{
    blob::{LocalBlobStorage, MemoryBlobStorage},
    memory::MemoryChatStore,
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 聊天服务需要的全部存储适配器
#[derive(Clone)]
pub struct Infrastructure {
    pub dialogs: Arc<dyn DialogRepository>,
    pub participants: Arc<dyn ParticipantRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub receipts: Arc<dyn ReadReceiptRepository>,
    pub reactions: Arc<dyn ReactionRepository>,
    pub blob_storage: Arc<dyn BlobStorage>,
}

impl Infrastructure {
    /// 按配置选择存储后端
    pub async fn from_config(config: &AppConfig) -> Result<Self, InfrastructureError> {
        match config.storage.backend {
            StorageBackend::Memory => {
                tracing::info!("使用内存存储后端");
                Ok(Self::in_memory(
                    MemoryChatStore::new(),
                    Arc::new(MemoryBlobStorage::new()),
                ))
            }
            StorageBackend::Postgres => {
                let blob_dir = PathBuf::from(&config.storage.blob_dir);
                tokio::fs::create_dir_all(&blob_dir).await?;
                let blob_storage = Arc::new(LocalBlobStorage::new(
                    blob_dir,
                    config.storage.public_base_url.clone(),
                ));
                Self::connect_postgres(
                    &config.database.url,
                    config.database.max_connections,
                    blob_storage,
                )
                .await
            }
        }
    }

    pub fn in_memory(store: MemoryChatStore, blob_storage: Arc<dyn BlobStorage>) -> Self {
        let store = Arc::new(store);
        Self {
            dialogs: store.clone(),
            participants: store.clone(),
            messages: store.clone(),
            receipts: store.clone(),
            reactions: store,
            blob_storage,
        }
    }

    pub async fn connect_postgres(
        database_url: &str,
        max_connections: u32,
        blob_storage: Arc<dyn BlobStorage>,
    ) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(database_url, max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!(max_connections, "PostgreSQL 连接池已就绪，迁移已执行");

        let storage = PgStorage::new(pool);
        Ok(Self {
            dialogs: storage.dialog_repository,
            participants: storage.participant_repository,
            messages: storage.message_repository,
            receipts: storage.receipt_repository,
            reactions: storage.reaction_repository,
            blob_storage,
        })
    }

    pub fn chat_dependencies(
        &self,
        clock: Arc<dyn Clock>,
        settings: ChatSettings,
    ) -> ChatServiceDependencies {
        ChatServiceDependencies {
            dialog_repository: self.dialogs.clone(),
            participant_repository: self.participants.clone(),
            message_repository: self.messages.clone(),
            receipt_repository: self.receipts.clone(),
            reaction_repository: self.reactions.clone(),
            blob_storage: self.blob_storage.clone(),
            clock,
            settings,
        }
    }
}
