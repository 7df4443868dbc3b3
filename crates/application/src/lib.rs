//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务（聊天领域服务）、实时连接的注册表与会话，
//! 以及线协议和对外部适配器（附件存储、时钟）的抽象。

pub mod clock;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod services;
pub mod session;
pub mod storage;

pub use clock::{Clock, SystemClock};
pub use dispatch::ActionDispatcher;
pub use error::{ApplicationError, ErrorKind};
pub use protocol::{
    decode, ClientAction, DecodeError, Empty, ErrorCode, ErrorFrame, OutboundFrame, ReadTarget,
    ServerEvent,
};
pub use registry::{
    ConnectionRegistry, ParticipantDirectory, RegistryHandle, RegistrySnapshot, SessionHandle,
    SessionId,
};
pub use services::{
    AttachmentRef, ChatService, ChatServiceDependencies, ChatSettings, CreateDialogOptions,
    ParticipantLeft, ReactionUpdate, ReadMarked, SendMessageRequest, TypingUpdate,
};
pub use session::{ClientSession, InboundFrame, SessionState, TransportError};
pub use storage::{BlobStorage, BlobStorageError, StoredBlob};
