use std::sync::Arc;

use domain::UserId;

use crate::error::ApplicationError;
use crate::protocol::{
    AddReactionPayload, ClientAction, DialogRef, Empty, ErrorFrame, OutboundFrame, ReadTarget,
    SendMessagePayload, ServerEvent,
};
use crate::registry::RegistryHandle;
use crate::services::ChatService;

/// 入站动作处理
///
/// 每个 [`ClientAction`] 变体对应一个处理函数；持久化成功后再交给注册表广播。
/// 返回值是只回给发起会话的一帧（错误或 pong）。
pub struct ActionDispatcher {
    chat_service: Arc<ChatService>,
    registry: RegistryHandle,
}

impl ActionDispatcher {
    pub fn new(chat_service: Arc<ChatService>, registry: RegistryHandle) -> Self {
        Self {
            chat_service,
            registry,
        }
    }

    pub async fn dispatch(&self, user_id: UserId, action: ClientAction) -> Option<OutboundFrame> {
        let action_name = action.name();
        let outcome = match action {
            ClientAction::SendMessage(payload) => {
                return self.send_message(user_id, payload).await;
            }
            ClientAction::TypingStart(target) => self.typing(user_id, target, true).await,
            ClientAction::TypingStop(target) => self.typing(user_id, target, false).await,
            ClientAction::MarkAsRead(target) => self.mark_as_read(user_id, target).await,
            ClientAction::AddReaction(payload) => self.add_reaction(user_id, payload).await,
            ClientAction::Ping => return Some(ServerEvent::Pong(Empty::default()).into()),
        };

        match outcome {
            Ok(()) => None,
            Err(err) => {
                log_failure(user_id, action_name, &err);
                Some(ErrorFrame::from_error(&err).into())
            }
        }
    }

    async fn send_message(
        &self,
        user_id: UserId,
        payload: SendMessagePayload,
    ) -> Option<OutboundFrame> {
        let message = match self.chat_service.send_message(user_id, payload.into()).await {
            Ok(message) => message,
            Err(err) => {
                log_failure(user_id, "send_message", &err);
                return Some(ErrorFrame::failed_to_send(&err).into());
            }
        };

        let dialog_id = message.dialog_id;
        let message_id = message.id;
        // 消息已经落库，广播失败不再回报给发送者
        if let Err(err) = self
            .registry
            .broadcast_to_dialog(dialog_id, ServerEvent::NewMessage(message), None)
            .await
        {
            tracing::error!(
                dialog_id = %dialog_id,
                message_id = %message_id,
                error = %err,
                "消息已保存，但广播失败"
            );
        }
        None
    }

    async fn typing(
        &self,
        user_id: UserId,
        target: DialogRef,
        typing: bool,
    ) -> Result<(), ApplicationError> {
        let update = self
            .chat_service
            .set_typing(user_id, target.dialog_id, typing)
            .await?;
        self.registry
            .broadcast_to_dialog(
                target.dialog_id,
                ServerEvent::UserTyping(update),
                Some(user_id),
            )
            .await
    }

    async fn mark_as_read(
        &self,
        user_id: UserId,
        target: ReadTarget,
    ) -> Result<(), ApplicationError> {
        let marked = match target {
            ReadTarget::Dialog(dialog_id) => {
                self.chat_service.mark_all_as_read(user_id, dialog_id).await?
            }
            ReadTarget::Message(message_id) => {
                self.chat_service.mark_as_read(user_id, message_id).await?
            }
        };
        if marked.is_empty() {
            return Ok(());
        }
        self.registry
            .broadcast_to_dialog(marked.dialog_id, ServerEvent::MessagesRead(marked), None)
            .await
    }

    async fn add_reaction(
        &self,
        user_id: UserId,
        payload: AddReactionPayload,
    ) -> Result<(), ApplicationError> {
        let update = self
            .chat_service
            .toggle_reaction(user_id, payload.message_id, &payload.emoji)
            .await?;
        self.registry
            .broadcast_to_dialog(update.dialog_id, ServerEvent::ReactionUpdated(update), None)
            .await
    }
}

fn log_failure(user_id: UserId, action: &str, err: &ApplicationError) {
    if err.is_internal() {
        tracing::error!(user_id = %user_id, action, error = %err, "处理客户端动作失败");
    } else {
        tracing::debug!(user_id = %user_id, action, error = %err, "客户端动作被拒绝");
    }
}
