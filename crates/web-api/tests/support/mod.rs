#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{ChatService, ChatSettings, ConnectionRegistry, SystemClock};
use axum::Router;
use config::{JwtConfig, SessionConfig};
use domain::UserId;
use infrastructure::{Infrastructure, MemoryBlobStorage, MemoryChatStore};
use tokio::{net::TcpListener, sync::oneshot};
use web_api::{router, AppState, JwtService};

pub const TEST_SECRET: &str = "test-secret-key-with-at-least-32-chars!!";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: MemoryChatStore,
}

impl TestApp {
    pub fn token(&self, user_id: UserId) -> String {
        self.state
            .jwt_service
            .generate_token(user_id)
            .expect("issue token")
    }

    pub fn bearer(&self, user_id: UserId) -> String {
        format!("Bearer {}", self.token(user_id))
    }
}

/// 内存存储上的完整应用
pub fn build_app() -> TestApp {
    let store = MemoryChatStore::new();
    let infra = Infrastructure::in_memory(store.clone(), Arc::new(MemoryBlobStorage::new()));
    let chat_service = Arc::new(ChatService::new(
        infra.chat_dependencies(Arc::new(SystemClock), ChatSettings::default()),
    ));
    let (registry, _task) = ConnectionRegistry::spawn(chat_service.clone(), 64);
    let jwt_service = Arc::new(JwtService::new(JwtConfig {
        secret: TEST_SECRET.to_string(),
        expiration_hours: 1,
    }));

    let state = AppState::new(
        chat_service,
        registry,
        infra.blob_storage.clone(),
        jwt_service,
        SessionConfig::default(),
    );

    TestApp {
        router: router(state.clone()),
        state,
        store,
    }
}

pub struct RunningServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// 在随机端口上启动服务
pub async fn spawn_server(app: &TestApp) -> RunningServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let router = app.router.clone();

    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    // allow server to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    RunningServer {
        addr,
        shutdown: Some(shutdown_tx),
    }
}
