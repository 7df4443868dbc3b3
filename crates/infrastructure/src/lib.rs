//! 基础设施层实现。
//!
//! 提供 PostgreSQL 与内存两套仓储、附件文件存储，以及按配置装配它们的入口。

pub mod blob;
pub mod builder;
pub mod memory;
pub mod migrations;
pub mod repository;

pub use blob::{LocalBlobStorage, MemoryBlobStorage};
pub use builder::{Infrastructure, InfrastructureError};
pub use memory::{FailurePoint, MemoryChatStore};
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgDialogRepository, PgMessageRepository, PgParticipantRepository,
    PgReactionRepository, PgReadReceiptRepository, PgStorage,
};
