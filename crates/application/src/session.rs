//! 客户端会话
//!
//! 每个在线连接一个会话：读循环解码入站动作并调用领域服务，
//! 写循环把出站队列里的事件写回连接，两者之间只有一个有界队列。
//! 任一循环失败都会触发同一个拆除流程，且只执行一次。

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use domain::UserId;
use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::dispatch::ActionDispatcher;
use crate::error::ApplicationError;
use crate::protocol::{self, DecodeError, OutboundFrame};
use crate::registry::{RegistryHandle, SessionHandle, SessionId};

const CLOSE_GRACE: std::time::Duration = std::time::Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Draining,
    Closed,
}

/// 传输层交给会话的一帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    /// 无法作为文本解读的帧，例如不是合法 UTF-8 的二进制帧
    Malformed(String),
    /// 对端主动关闭
    Close,
}

#[derive(Debug, Clone, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self(message.to_string())
    }
}

struct SessionShared {
    id: SessionId,
    user_id: UserId,
    registry: RegistryHandle,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
    torn_down: AtomicBool,
}

impl SessionShared {
    async fn teardown(&self, reason: &str) {
        if self
            .torn_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.state.send_replace(SessionState::Draining);
        self.cancel.cancel();
        self.registry.unregister(self.user_id, self.id).await;
        tracing::info!(
            user_id = %self.user_id,
            session_id = %self.id,
            reason,
            "会话开始关闭"
        );
    }
}

pub struct ClientSession {
    shared: Arc<SessionShared>,
    dispatcher: Arc<ActionDispatcher>,
    outbound_capacity: usize,
}

impl ClientSession {
    /// `user_id` 必须来自已经通过认证的请求，会话本身不做任何凭证检查
    pub fn new(
        user_id: UserId,
        registry: RegistryHandle,
        dispatcher: Arc<ActionDispatcher>,
        outbound_capacity: usize,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        let cancel = registry.session_token();
        Self {
            shared: Arc::new(SessionShared {
                id: SessionId::generate(),
                user_id,
                registry,
                cancel,
                state,
                torn_down: AtomicBool::new(false),
            }),
            dispatcher,
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn user_id(&self) -> UserId {
        self.shared.user_id
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// 运行会话直到连接关闭、传输出错或注册表关闭
    pub async fn run<I, O>(self, inbound: I, outbound: O) -> Result<(), ApplicationError>
    where
        I: Stream<Item = Result<InboundFrame, TransportError>> + Send,
        O: Sink<String> + Send + 'static,
        O::Error: fmt::Display + Send,
    {
        let shared = self.shared;
        let (queue_tx, queue_rx) = mpsc::channel(self.outbound_capacity);

        let handle = SessionHandle::new(
            shared.id,
            shared.user_id,
            queue_tx.clone(),
            shared.cancel.clone(),
        );
        if let Err(err) = shared.registry.register(handle).await {
            shared.cancel.cancel();
            shared.state.send_replace(SessionState::Closed);
            return Err(err);
        }

        shared.state.send_replace(SessionState::Active);
        tracing::info!(user_id = %shared.user_id, session_id = %shared.id, "会话已建立");

        let writer = tokio::spawn(write_loop(shared.clone(), queue_rx, outbound));
        read_loop(&shared, &self.dispatcher, inbound, queue_tx).await;
        shared.teardown("read loop finished").await;

        if let Err(err) = writer.await {
            tracing::error!(session_id = %shared.id, error = %err, "写循环异常退出");
        }

        shared.state.send_replace(SessionState::Closed);
        tracing::info!(user_id = %shared.user_id, session_id = %shared.id, "会话已关闭");
        Ok(())
    }
}

async fn read_loop<I>(
    shared: &SessionShared,
    dispatcher: &ActionDispatcher,
    inbound: I,
    replies: mpsc::Sender<Arc<OutboundFrame>>,
) where
    I: Stream<Item = Result<InboundFrame, TransportError>>,
{
    let mut inbound = Box::pin(inbound);

    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            next = inbound.next() => next,
        };

        let decoded = match next {
            Some(Ok(InboundFrame::Text(text))) => protocol::decode(&text),
            Some(Ok(InboundFrame::Malformed(reason))) => Err(DecodeError::InvalidPayload(reason)),
            Some(Ok(InboundFrame::Close)) | None => {
                tracing::debug!(session_id = %shared.id, "客户端关闭连接");
                break;
            }
            Some(Err(err)) => {
                tracing::warn!(session_id = %shared.id, error = %err, "读取失败");
                break;
            }
        };

        let reply = match decoded {
            Ok(action) => dispatcher.dispatch(shared.user_id, action).await,
            Err(err) => {
                tracing::debug!(session_id = %shared.id, error = %err, "无法解析的入站帧");
                Some(err.to_frame().into())
            }
        };

        if let Some(reply) = reply {
            match replies.try_send(Arc::new(reply)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(session_id = %shared.id, "出站队列已满，断开慢客户端");
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    }
}

async fn write_loop<O>(
    shared: Arc<SessionShared>,
    mut queue: mpsc::Receiver<Arc<OutboundFrame>>,
    sink: O,
) where
    O: Sink<String>,
    O::Error: fmt::Display + Send,
{
    let mut sink = Box::pin(sink);

    loop {
        let frame = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            frame = queue.recv() => frame,
        };
        let Some(frame) = frame else { break };

        let text = match serde_json::to_string(frame.as_ref()) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(session_id = %shared.id, error = %err, "事件序列化失败");
                continue;
            }
        };

        // 对端不再读取时 send 会一直挂起，被驱逐后必须能退出
        let sent = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            sent = sink.send(text) => sent,
        };
        if let Err(err) = sent {
            tracing::warn!(session_id = %shared.id, error = %err, "写入失败");
            shared.teardown("write failed").await;
            break;
        }
    }

    // 尽量通知对端关闭
    match tokio::time::timeout(CLOSE_GRACE, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::debug!(session_id = %shared.id, error = %err, "关闭连接失败"),
        Err(_) => tracing::debug!(session_id = %shared.id, "关闭连接超时"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::registry::ConnectionRegistry;
    use crate::services::{ChatService, ChatServiceDependencies, ChatSettings};
    use crate::storage::MockBlobStorage;
    use domain::{
        MockDialogRepository, MockMessageRepository, MockParticipantRepository,
        MockReactionRepository, MockReadReceiptRepository,
    };
    use futures::channel::mpsc as fmpsc;
    use serde_json::{json, Value};
    use std::time::Duration;

    type Inbound = fmpsc::UnboundedSender<Result<InboundFrame, TransportError>>;

    fn idle_service() -> Arc<ChatService> {
        Arc::new(ChatService::new(ChatServiceDependencies {
            dialog_repository: Arc::new(MockDialogRepository::new()),
            participant_repository: Arc::new(MockParticipantRepository::new()),
            message_repository: Arc::new(MockMessageRepository::new()),
            receipt_repository: Arc::new(MockReadReceiptRepository::new()),
            reaction_repository: Arc::new(MockReactionRepository::new()),
            blob_storage: Arc::new(MockBlobStorage::new()),
            clock: Arc::new(SystemClock),
            settings: ChatSettings::default(),
        }))
    }

    fn setup() -> (RegistryHandle, Arc<ActionDispatcher>) {
        let service = idle_service();
        let (registry, _task) = ConnectionRegistry::spawn(service.clone(), 16);
        let dispatcher = Arc::new(ActionDispatcher::new(service, registry.clone()));
        (registry, dispatcher)
    }

    async fn wait_for(state: &mut watch::Receiver<SessionState>, wanted: SessionState) {
        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == wanted))
            .await
            .expect("state change timed out")
            .expect("state channel closed");
    }

    async fn next_json(rx: &mut fmpsc::UnboundedReceiver<String>) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(2), rx.next())
            .await
            .expect("no outbound frame")
            .expect("outbound closed");
        serde_json::from_str(&text).unwrap()
    }

    fn send_text(tx: &Inbound, value: Value) {
        tx.unbounded_send(Ok(InboundFrame::Text(value.to_string())))
            .unwrap();
    }

    #[tokio::test]
    async fn replies_to_ping_and_reports_bad_frames_without_closing() {
        let (registry, dispatcher) = setup();
        let user_id = UserId::generate();
        let session = ClientSession::new(user_id, registry.clone(), dispatcher, 8);
        let mut state = session.state();

        let (in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, mut out_rx) = fmpsc::unbounded::<String>();
        let task = tokio::spawn(session.run(in_rx, out_tx));
        wait_for(&mut state, SessionState::Active).await;
        assert!(registry.is_online(user_id).await.unwrap());

        send_text(&in_tx, json!({"action": "ping", "data": {}}));
        assert_eq!(
            next_json(&mut out_rx).await,
            json!({"action": "pong", "data": {}})
        );

        in_tx
            .unbounded_send(Ok(InboundFrame::Text("{oops".into())))
            .unwrap();
        assert_eq!(
            next_json(&mut out_rx).await,
            json!({"error": "invalid_payload"})
        );

        in_tx
            .unbounded_send(Ok(InboundFrame::Malformed("invalid utf-8".into())))
            .unwrap();
        assert_eq!(
            next_json(&mut out_rx).await,
            json!({"error": "invalid_payload"})
        );

        send_text(&in_tx, json!({"action": "teleport", "data": {}}));
        assert_eq!(
            next_json(&mut out_rx).await,
            json!({"error": "unknown_action"})
        );
        assert_eq!(*state.borrow(), SessionState::Active);

        in_tx.unbounded_send(Ok(InboundFrame::Close)).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(*state.borrow(), SessionState::Closed);
        assert!(!registry.is_online(user_id).await.unwrap());
    }

    #[tokio::test]
    async fn write_failure_tears_down_once() {
        let (registry, dispatcher) = setup();
        let user_id = UserId::generate();
        let session = ClientSession::new(user_id, registry.clone(), dispatcher, 8);
        let mut state = session.state();

        let broken = futures::sink::unfold((), |_, _text: String| async {
            Err::<(), _>(TransportError::new("broken pipe"))
        });
        let (in_tx, in_rx) = fmpsc::unbounded();
        let task = tokio::spawn(session.run(in_rx, broken));
        wait_for(&mut state, SessionState::Active).await;

        // 写循环失败的同时读端也报错，两边都会尝试拆除
        send_text(&in_tx, json!({"action": "ping"}));
        in_tx
            .unbounded_send(Err(TransportError::new("connection reset")))
            .unwrap();

        task.await.unwrap().unwrap();
        assert_eq!(*state.borrow(), SessionState::Closed);
        assert!(!registry.is_online(user_id).await.unwrap());
    }

    #[tokio::test]
    async fn registry_shutdown_closes_active_sessions() {
        let (registry, dispatcher) = setup();
        let session = ClientSession::new(UserId::generate(), registry.clone(), dispatcher, 8);
        let mut state = session.state();

        let (_in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, _out_rx) = fmpsc::unbounded::<String>();
        let task = tokio::spawn(session.run(in_rx, out_tx));
        wait_for(&mut state, SessionState::Active).await;

        registry.shutdown().await;
        task.await.unwrap().unwrap();
        assert_eq!(*state.borrow(), SessionState::Closed);
    }

    #[tokio::test]
    async fn session_cannot_start_after_shutdown() {
        let (registry, dispatcher) = setup();
        registry.shutdown().await;

        let session = ClientSession::new(UserId::generate(), registry, dispatcher, 8);
        let state = session.state();
        let (_in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, _out_rx) = fmpsc::unbounded::<String>();

        assert!(matches!(
            session.run(in_rx, out_tx).await,
            Err(ApplicationError::RegistryClosed)
        ));
        assert_eq!(*state.borrow(), SessionState::Closed);
    }
}
