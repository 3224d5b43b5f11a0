//! 认证授权服务主入口

use secrecy::ExposeSecret;
use signage_auth::{
    config::AppConfig,
    middleware::AppState,
    repository::{PgStore, Store},
    routes,
    services::audit_service::spawn_audit_writer,
    telemetry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;

/// 审计队列容量
const AUDIT_QUEUE_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("signage-auth {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）；生产环境直接设置环境变量
    if let Ok(env) = std::env::var("SIGNAGE_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志
    telemetry::init_telemetry(&config);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "signage-auth starting...");

    // 3. 数据库连接池 + 迁移
    let store = Arc::new(PgStore::connect(&config.database).await?);
    store.migrate().await?;
    store.record_pool_metrics();
    let pg_store = store.clone();

    // 4. 审计写入任务（决策不等待落库）
    let (audit_sink, audit_writer) = spawn_audit_writer(store.clone(), AUDIT_QUEUE_CAPACITY);

    // 5. 构建应用状态
    let store: Arc<dyn Store> = store;
    let app_state = Arc::new(AppState::new(config.clone(), store, Arc::new(audit_sink))?);

    // 6. 首个平台管理员
    if let (Some(email), Some(password)) = (
        config.bootstrap.admin_email.as_deref(),
        config.bootstrap.admin_password.as_ref(),
    ) {
        app_state
            .user_service
            .ensure_super_user(email, password.expose_secret(), "Administrator")
            .await?;
    }

    // 7. 启动服务器
    let app = routes::create_router(app_state.clone());
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 8. 关闭审计通道并等待剩余事件落库
    drop(app_state);
    let grace = Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
    if tokio::time::timeout(grace, audit_writer).await.is_err() {
        tracing::warn!("Audit writer did not drain before shutdown timeout");
    }

    pg_store.close().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }
}

/// 打印帮助信息
fn print_help() {
    println!("signage-auth {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: signage-auth [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 SIGNAGE_ 前缀的环境变量完成，例如");
    println!("  SIGNAGE_DATABASE__URL, SIGNAGE_SECURITY__JWT_SECRET");
}
