//! WebSocket 接入（轮毂）
//!
//! 接受连接，从握手 URL 的 `session` 查询参数取粘性会话 ID，交给 SessionManager 绑定。
//! 每个连接一个写任务（由无界通道喂入）；文本帧解析为 ClientEvent，`"close"` 关闭连接。
//! 断开只解绑传输，会话继续存在以便重连。

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use super::manager::SessionManager;
use super::message::ClientEvent;
use super::session::{ChannelTransport, Transport};

/// Hub 配置
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// WebSocket 监听地址
    pub bind_addr: String,
}

pub struct Hub {
    config: HubConfig,
    manager: Arc<SessionManager>,
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new(config: HubConfig, manager: Arc<SessionManager>) -> Self {
        Self {
            config,
            manager,
            shutdown: CancellationToken::new(),
        }
    }

    /// 用于外部触发优雅退出
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 监听并服务，直到 shutdown 被触发
    pub async fn serve(&self) -> Result<(), String> {
        let addr: SocketAddr = self
            .config
            .bind_addr
            .parse()
            .map_err(|e| format!("Invalid bind address: {}", e))?;
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind: {}", e))?;
        tracing::info!("Gateway listening on ws://{}", addr);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        let manager = Arc::clone(&self.manager);
                        let shutdown = self.shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, manager, shutdown).await {
                                tracing::error!("Connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Accept error: {}", e),
                },
            }
        }

        self.manager.shutdown().await;
        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// 从查询串中取 `session=...`
fn session_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "session")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    manager: Arc<SessionManager>,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let mut requested: Option<String> = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        requested = session_from_query(req.uri().query());
        Ok(resp)
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .map_err(|e| format!("WebSocket handshake failed: {}", e))?;
    tracing::info!(session = ?requested, "New WebSocket connection from {}", addr);

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (transport, mut events) = ChannelTransport::new();

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if ws_tx.send(WsMessage::Text(event.to_json())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let transport: Arc<dyn Transport> = transport;
    let (session, _) = manager
        .connect(requested.as_deref(), Arc::clone(&transport))
        .await
        .map_err(|e| e.to_string())?;

    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        let msg = match msg {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                tracing::warn!("WebSocket receive error: {}", e);
                break;
            }
            None => break,
        };

        match msg {
            WsMessage::Text(text) if text.trim() == "close" => break,
            WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if let Err(e) = manager.handle_event(&session, event).await {
                        tracing::error!(session = %session.id(), error = %e, "Failed to handle client event");
                    }
                }
                Err(e) => tracing::warn!(session = %session.id(), error = %e, "Unrecognized client message"),
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    // 会话已被新连接接管时不解绑；最后一个发送端被丢弃后写任务退出
    manager.disconnect(&session, &transport);
    drop(transport);
    let _ = writer.await;
    tracing::info!("WebSocket connection closed: {}", addr);
    Ok(())
}
