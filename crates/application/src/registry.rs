//! 连接注册表
//!
//! 单个事件循环独占 "用户 → 在线会话" 映射，外部只能通过三个入口通道
//! （注册 / 注销 / 投递）与它通信，映射本身没有任何锁。
//!
//! 同一用户可以同时持有多个会话（多设备），注册不会挤掉已有会话。
//! 投递使用非阻塞入队：某个会话的出站队列已满时，本次事件对它丢弃，
//! 并立即把它从注册表移除，其余接收者不受影响。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{DialogId, UserId};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ApplicationError;
use crate::protocol::OutboundFrame;

/// 查询对话当前成员，每次广播都会调用，不做缓存
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    async fn active_participants(
        &self,
        dialog_id: DialogId,
    ) -> Result<Vec<UserId>, ApplicationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 注册表持有的会话句柄：出站队列发送端和会话的取消令牌
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub user_id: UserId,
    outbound: mpsc::Sender<Arc<OutboundFrame>>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        session_id: SessionId,
        user_id: UserId,
        outbound: mpsc::Sender<Arc<OutboundFrame>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            user_id,
            outbound,
            cancel,
        }
    }

    fn close(self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    /// 在线用户数
    pub users: usize,
    /// 在线会话数
    pub sessions: usize,
    #[serde(skip)]
    pub sessions_by_user: HashMap<UserId, usize>,
}

impl RegistrySnapshot {
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.sessions_of(user_id) > 0
    }

    pub fn sessions_of(&self, user_id: UserId) -> usize {
        self.sessions_by_user.get(&user_id).copied().unwrap_or(0)
    }
}

struct Registration {
    handle: SessionHandle,
    accepted: oneshot::Sender<()>,
}

enum Dispatch {
    ToUsers {
        recipients: Vec<UserId>,
        exclude: Option<UserId>,
        frame: Arc<OutboundFrame>,
    },
    Snapshot(oneshot::Sender<RegistrySnapshot>),
}

/// 注册表的对外句柄，可随意克隆并传给会话和 HTTP 处理器
#[derive(Clone)]
pub struct RegistryHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<(UserId, SessionId)>,
    dispatch_tx: mpsc::Sender<Dispatch>,
    directory: Arc<dyn ParticipantDirectory>,
    shutdown: CancellationToken,
    stopped: CancellationToken,
}

impl RegistryHandle {
    /// 为新会话派生取消令牌，注册表关闭时随之取消
    pub fn session_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// 注册会话，返回时注册表已经接纳了它
    pub async fn register(&self, handle: SessionHandle) -> Result<(), ApplicationError> {
        let (accepted, ack) = oneshot::channel();
        self.register_tx
            .send(Registration { handle, accepted })
            .await
            .map_err(|_| ApplicationError::RegistryClosed)?;
        ack.await.map_err(|_| ApplicationError::RegistryClosed)
    }

    /// 注销会话；重复注销或注册表已关闭时什么也不做
    pub async fn unregister(&self, user_id: UserId, session_id: SessionId) {
        if self
            .unregister_tx
            .send((user_id, session_id))
            .await
            .is_err()
        {
            tracing::debug!(
                user_id = %user_id,
                session_id = %session_id,
                "注册表已停止，忽略注销请求"
            );
        }
    }

    /// 向对话的当前成员广播，成员列表在本次调用时实时解析
    pub async fn broadcast_to_dialog(
        &self,
        dialog_id: DialogId,
        frame: impl Into<OutboundFrame>,
        exclude: Option<UserId>,
    ) -> Result<(), ApplicationError> {
        let recipients = self.directory.active_participants(dialog_id).await?;
        if recipients.is_empty() {
            return Ok(());
        }
        self.dispatch(Dispatch::ToUsers {
            recipients,
            exclude,
            frame: Arc::new(frame.into()),
        })
        .await
    }

    /// 发给某个用户的全部会话
    pub async fn send_to_user(
        &self,
        user_id: UserId,
        frame: impl Into<OutboundFrame>,
    ) -> Result<(), ApplicationError> {
        self.dispatch(Dispatch::ToUsers {
            recipients: vec![user_id],
            exclude: None,
            frame: Arc::new(frame.into()),
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<RegistrySnapshot, ApplicationError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Dispatch::Snapshot(reply)).await?;
        rx.await.map_err(|_| ApplicationError::RegistryClosed)
    }

    pub async fn is_online(&self, user_id: UserId) -> Result<bool, ApplicationError> {
        Ok(self.snapshot().await?.is_online(user_id))
    }

    /// 取消全部会话并等待事件循环退出
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.stopped.cancelled().await;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn dispatch(&self, dispatch: Dispatch) -> Result<(), ApplicationError> {
        self.dispatch_tx
            .send(dispatch)
            .await
            .map_err(|_| ApplicationError::RegistryClosed)
    }
}

#[derive(Default)]
struct LiveSessions {
    by_user: HashMap<UserId, HashMap<SessionId, SessionHandle>>,
}

impl LiveSessions {
    fn insert(&mut self, handle: SessionHandle) -> bool {
        let sessions = self.by_user.entry(handle.user_id).or_default();
        if sessions.contains_key(&handle.session_id) {
            return false;
        }
        sessions.insert(handle.session_id, handle);
        true
    }

    fn remove(&mut self, user_id: UserId, session_id: SessionId) -> Option<SessionHandle> {
        let sessions = self.by_user.get_mut(&user_id)?;
        let removed = sessions.remove(&session_id);
        if sessions.is_empty() {
            self.by_user.remove(&user_id);
        }
        removed
    }

    fn deliver(
        &mut self,
        recipients: Vec<UserId>,
        exclude: Option<UserId>,
        frame: Arc<OutboundFrame>,
    ) {
        let mut evicted = Vec::new();
        let mut seen = HashSet::with_capacity(recipients.len());

        for user_id in recipients {
            if Some(user_id) == exclude || !seen.insert(user_id) {
                continue;
            }
            let Some(sessions) = self.by_user.get(&user_id) else {
                continue;
            };
            for handle in sessions.values() {
                match handle.outbound.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            user_id = %user_id,
                            session_id = %handle.session_id,
                            "出站队列已满，断开慢客户端"
                        );
                        evicted.push((user_id, handle.session_id));
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        evicted.push((user_id, handle.session_id));
                    }
                }
            }
        }

        for (user_id, session_id) in evicted {
            if let Some(handle) = self.remove(user_id, session_id) {
                handle.close();
            }
        }
    }

    fn snapshot(&self) -> RegistrySnapshot {
        let sessions_by_user: HashMap<UserId, usize> = self
            .by_user
            .iter()
            .map(|(user_id, sessions)| (*user_id, sessions.len()))
            .collect();
        RegistrySnapshot {
            users: sessions_by_user.len(),
            sessions: sessions_by_user.values().sum(),
            sessions_by_user,
        }
    }

    fn close_all(&mut self) {
        for (_, sessions) in self.by_user.drain() {
            for (_, handle) in sessions {
                handle.close();
            }
        }
    }
}

/// 注册表事件循环
pub struct ConnectionRegistry {
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<(UserId, SessionId)>,
    dispatch_rx: mpsc::Receiver<Dispatch>,
    shutdown: CancellationToken,
    stopped: CancellationToken,
    sessions: LiveSessions,
}

impl ConnectionRegistry {
    /// 创建注册表并在后台运行事件循环
    pub fn spawn(
        directory: Arc<dyn ParticipantDirectory>,
        intake_capacity: usize,
    ) -> (RegistryHandle, JoinHandle<()>) {
        let capacity = intake_capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(capacity);
        let shutdown = CancellationToken::new();
        let stopped = CancellationToken::new();

        let registry = ConnectionRegistry {
            register_rx,
            unregister_rx,
            dispatch_rx,
            shutdown: shutdown.clone(),
            stopped: stopped.clone(),
            sessions: LiveSessions::default(),
        };
        let handle = RegistryHandle {
            register_tx,
            unregister_tx,
            dispatch_tx,
            directory,
            shutdown,
            stopped,
        };

        (handle, tokio::spawn(registry.run()))
    }

    async fn run(self) {
        let ConnectionRegistry {
            mut register_rx,
            mut unregister_rx,
            mut dispatch_rx,
            shutdown,
            stopped,
            mut sessions,
        } = self;

        tracing::info!("连接注册表已启动");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(registration) = register_rx.recv() => {
                    let Registration { handle, accepted } = registration;
                    let (user_id, session_id) = (handle.user_id, handle.session_id);
                    if sessions.insert(handle) {
                        tracing::debug!(user_id = %user_id, session_id = %session_id, "会话已注册");
                    }
                    // 会话在等待确认期间放弃了注册
                    if accepted.send(()).is_err() {
                        if let Some(handle) = sessions.remove(user_id, session_id) {
                            handle.close();
                        }
                    }
                }
                Some((user_id, session_id)) = unregister_rx.recv() => {
                    if let Some(handle) = sessions.remove(user_id, session_id) {
                        handle.close();
                        tracing::debug!(user_id = %user_id, session_id = %session_id, "会话已注销");
                    }
                }
                Some(dispatch) = dispatch_rx.recv() => match dispatch {
                    Dispatch::ToUsers { recipients, exclude, frame } => {
                        sessions.deliver(recipients, exclude, frame);
                    }
                    Dispatch::Snapshot(reply) => {
                        let _ = reply.send(sessions.snapshot());
                    }
                },
                else => break,
            }
        }

        // 关闭全部会话，把还在排队的请求处理掉再退出
        let open = sessions.snapshot().sessions;
        sessions.close_all();
        register_rx.close();
        unregister_rx.close();
        dispatch_rx.close();
        while let Ok(registration) = register_rx.try_recv() {
            registration.handle.close();
        }
        while unregister_rx.try_recv().is_ok() {}
        while let Ok(dispatch) = dispatch_rx.try_recv() {
            if let Dispatch::Snapshot(reply) = dispatch {
                let _ = reply.send(RegistrySnapshot::default());
            }
        }

        tracing::info!(closed_sessions = open, "连接注册表已停止");
        stopped.cancel();
    }
}
