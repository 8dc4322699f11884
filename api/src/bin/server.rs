use anyhow::{anyhow, Context, Result};
use api::app_config::AppConfig;
use api::inventory::{Inventory, Item};
use api::{prometheus, router, ServiceContext};
use clap::Parser;
use std::{net::SocketAddr, time::Duration};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use volo_http::{
    context::ServerContext,
    http::StatusCode,
    server::{layer::TimeoutLayer, Router, Server},
    Address,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    config: String,
}

fn timeout_handler(_: &ServerContext) -> (StatusCode, &'static str) {
    (StatusCode::REQUEST_TIMEOUT, "Timeout!\n")
}

/// RUST_LOG 优先, 否则使用配置文件中的日志级别
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn seed_inventory() -> Inventory {
    Inventory::with_items([
        Item {
            id: 1,
            name: "cordless drill".to_string(),
            quantity: 3,
            checked_out: 0,
        },
        Item {
            id: 2,
            name: "label printer".to_string(),
            quantity: 1,
            checked_out: 0,
        },
        Item {
            id: 3,
            name: "multimeter".to_string(),
            quantity: 5,
            checked_out: 0,
        },
    ])
}

#[volo::main]
async fn main() -> Result<()> {
    // 启动命令如: cargo run --package api --bin server -- --config=api/config/app_config.yaml
    let args = Args::parse();

    // 加载配置
    let app_config = AppConfig::load_yaml(args.config.as_str())?;

    // 全局日志模块初始化
    init_tracing(app_config.log_level.as_str());
    tracing::info!("load config from {}", args.config);

    let metrics_handle = if app_config.metrics {
        Some(prometheus::setup_metrics_recorder()?)
    } else {
        None
    };

    // 限流器在这里构建一次, 通过 ServiceContext 传给所有请求
    let service_context = ServiceContext::new(&app_config.rate_limiter, seed_inventory());

    // 收到 SIGHUP 时重新读取配置文件, 刷新接口限流
    let reload_ctx = service_context.clone();
    let config_path = args.config.clone();
    let mut hangup = signal::unix::signal(signal::unix::SignalKind::hangup())
        .context("Failed to create SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("receive sighup, reload {}", config_path);
            match AppConfig::load_yaml(config_path.as_str()) {
                Ok(c) => reload_ctx.reload(&c.rate_limiter),
                Err(e) => tracing::error!("reload config failed: {:#}", e),
            }
        }
    });

    let biz_app = Router::new()
        .merge(router::build_router(service_context, metrics_handle))
        .layer(TimeoutLayer::new(
            Duration::from_secs(app_config.timeout.unwrap_or(10)),
            timeout_handler,
        ));

    let addr: SocketAddr = format!("[::]:{}", app_config.port)
        .parse()
        .context("parse listen address failed")?;
    let addr = Address::from(addr);

    tracing::info!("Listening on {addr}");

    Server::new(biz_app)
        .run(addr)
        .await
        .map_err(|e| anyhow!("server exited with error: {}", e))
}
