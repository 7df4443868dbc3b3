mod chat_service;
mod chat_service_tests;

pub use chat_service::{
    AttachmentRef, ChatService, ChatServiceDependencies, ChatSettings, CreateDialogOptions,
    ParticipantLeft, ReactionUpdate, ReadMarked, SendMessageRequest, TypingUpdate,
    MAX_ATTACHMENTS,
};
