//! 主应用程序入口
//!
//! 加载配置、装配存储与聊天服务、启动连接注册表和 Axum 服务，
//! 收到退出信号后先停止接收请求，再关闭所有实时会话。

use std::sync::Arc;

use anyhow::Context;
use application::{ChatService, ChatSettings, ConnectionRegistry, SystemClock};
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，默认 info，可用 RUST_LOG 覆盖
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    tracing::info!(
        backend = ?config.storage.backend,
        bind = %config.bind_address(),
        "配置已加载"
    );

    let infra = Infrastructure::from_config(&config)
        .await
        .context("初始化存储失败")?;

    let chat_service = Arc::new(ChatService::new(infra.chat_dependencies(
        Arc::new(SystemClock),
        ChatSettings::from(&config.chat),
    )));

    let (registry, registry_task) = ConnectionRegistry::spawn(
        chat_service.clone(),
        config.session.registry_intake_capacity,
    );

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let state = AppState::new(
        chat_service,
        registry.clone(),
        infra.blob_storage.clone(),
        jwt_service,
        config.session.clone(),
    );

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("无法监听 {}", config.bind_address()))?;

    tracing::info!("聊天服务启动在 http://{}", config.bind_address());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP 服务异常退出")?;

    // 已建立的 WebSocket 不受 graceful shutdown 管理，由注册表统一关闭
    registry.shutdown().await;
    registry_task.await.context("连接注册表任务异常退出")?;

    tracing::info!("聊天服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始关闭");
}
