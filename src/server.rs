// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 连接调度模块
//!
//! 接受循环本身是单任务顺序执行的，每个连接交给独立的 Tokio 任务处理，
//! 接受循环从不等待请求处理。收到停机信号后停止接受新连接，并等待进行中的连接自然结束。

use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, error, info};
use tokio::{net::TcpListener, sync::watch, task::JoinSet};

use crate::router::Router;

/// 接受失败后重试前的暂停时间
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub struct ConnectionSupervisor {
    listener: TcpListener,
    router: Arc<Router>,
    active_connections: Arc<AtomicUsize>,
}

impl ConnectionSupervisor {
    pub fn new(listener: TcpListener, router: Router) -> Self {
        Self {
            listener,
            router: Arc::new(router),
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 当前活跃连接数的共享计数器，供控制台 `status` 指令读取
    pub fn active_connections(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.active_connections)
    }

    /// 运行接受循环，直到 `shutdown` 变为 `true` 或其发送端被丢弃
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();
        let mut id: u128 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    let (mut stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            pause_after_accept_error(&e).await;
                            continue;
                        }
                    };
                    debug!("[ID{}]TCP连接已建立：{}", id, addr);

                    let router = Arc::clone(&self.router);
                    let active = Arc::clone(&self.active_connections);
                    active.fetch_add(1, Ordering::SeqCst);
                    tasks.spawn(async move {
                        router.handle(&mut stream, id).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        debug!("[ID{}]连接已关闭", id);
                    });
                    id += 1;
                }
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = finished {
                        error!("连接任务异常退出：{}", e);
                    }
                }
            }
        }

        info!("停止接受新连接，等待{}个进行中的连接结束...", tasks.len());
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                error!("连接任务异常退出：{}", e);
            }
        }
        info!("所有连接均已结束");
    }
}

/// 记录接受失败并暂停片刻。文件描述符耗尽之类的错误是暂时性的，不终止服务。
async fn pause_after_accept_error(e: &io::Error) {
    error!("接受连接失败：{}，{}毫秒后重试", e, ACCEPT_ERROR_BACKOFF.as_millis());
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}
