// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 本地应用托管服务器
//!
//! 把内容根目录下的每个子目录作为一个独立的 Web 应用对外提供，并附带一个编辑应用元数据的 JSON API。
//! 启动顺序：日志 -> 配置 -> 运行时 -> 清空上传暂存区 -> 绑定端口 -> 控制台 -> 接受循环。

use std::{
    env,
    net::{Ipv4Addr, SocketAddrV4},
    process,
    sync::{atomic::Ordering, Arc},
};

use log::{error, info, warn, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpListener,
    runtime::Builder,
    sync::watch,
};

use webhost::{upload::UploadStore, Config, ConnectionSupervisor, Router};

const LOG_CONFIG: &str = "config/log4rs.yaml";
const APP_CONFIG: &str = "config/development.toml";

fn main() {
    // 1. 日志：优先使用 YAML 配置，缺失时退回到控制台输出
    if let Err(e) = log4rs::init_file(LOG_CONFIG, Default::default()) {
        init_console_logger();
        warn!("无法载入日志配置{}（{}），日志将只输出到控制台", LOG_CONFIG, e);
    }

    // 2. 配置：环境变量与命令行参数可以覆盖端口
    let config = Config::from_toml(APP_CONFIG)
        .apply_env(env::vars())
        .apply_args(env::args().skip(1));
    info!("配置文件已载入");
    info!("www root: {}", config.www_root());

    // 3. 运行时
    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法构建Tokio运行时：{}", e);
            process::exit(1);
        }
    };

    let code = runtime.block_on(serve(Arc::new(config)));
    process::exit(code);
}

async fn serve(config: Arc<Config>) -> i32 {
    let root = config.www_root_path();
    if let Err(e) = tokio::fs::create_dir_all(&root).await {
        error!("无法创建内容根目录{}：{}", root.display(), e);
        return 1;
    }

    // 上一次运行遗留的暂存文件一律丢弃
    if let Err(e) = UploadStore::new(&root).purge_all().await {
        warn!("无法重建上传暂存目录：{}", e);
    }

    let port = config.port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    info!("服务端将在{}:{}上监听Socket连接", address, port);
    let listener = match TcpListener::bind(SocketAddrV4::new(address, port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            return 1;
        }
    };
    info!("端口{}绑定完成，访问 http://localhost:{}/", port, port);

    let router = match Router::new(Arc::clone(&config), port).await {
        Ok(router) => router,
        Err(e) => {
            error!("无法打开内容根目录{}：{}", root.display(), e);
            return 1;
        }
    };
    let supervisor = ConnectionSupervisor::new(listener, router);
    let active_connections = supervisor.active_connections();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Ctrl-C
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("收到Ctrl-C，正在停机...");
                let _ = shutdown_tx.send(true);
            }
        }
    });

    // 交互式管理控制台
    tokio::spawn(async move {
        let mut reader = BufReader::new(tokio::io::stdin());
        let mut input = String::new();
        loop {
            input.clear();
            match reader.read_line(&mut input).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            match input.trim() {
                "stop" => {
                    println!("停机指令已激活，服务器将在处理完进行中的请求后关闭...");
                    let _ = shutdown_tx.send(true);
                    break;
                }
                "help" => {
                    println!("== Webhost Help ==");
                    println!("stop   - 发出停机信号");
                    println!("status - 查看当前服务器运行状态");
                    println!("help   - 显示此帮助信息");
                    println!("==================");
                }
                "status" => {
                    println!("== Webhost 状态 ===");
                    println!("当前活跃连接数: {}", active_connections.load(Ordering::SeqCst));
                    println!("==================");
                }
                "" => {}
                cmd => println!("无效的命令：{}", cmd),
            }
        }
    });

    supervisor.run(shutdown_rx).await;
    info!("服务器已停止");
    0
}

fn init_console_logger() {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {m}{n}",
        )))
        .build();
    let config = log4rs::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("无法初始化日志系统：{}", e);
            }
        }
        Err(e) => eprintln!("日志配置无效：{}", e),
    }
}
