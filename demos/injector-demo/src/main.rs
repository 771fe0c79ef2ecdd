//! # 注入器演示程序
//!
//! 演示注入器运行时的完整生命周期：根作用域注册、子作用域覆盖、
//! 单例与 multi 解析、invoke 临时作用域与级联销毁。

use async_trait::async_trait;
use clap::Parser;
use injector_core::{
    injectable, Dependency, Disposable, InjectResult, InjectorContext, InstanceValue, Provider,
    Token,
};
use std::sync::Arc;
use tracing::info;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "injector-demo")]
#[command(about = "注入器运行时演示")]
struct Args {
    /// 日志级别
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// 应用配置
#[derive(Debug)]
struct AppConfig {
    name: String,
    max_sessions: u32,
}

/// 模拟的数据库连接
struct DbConnection {
    dsn: String,
}

#[async_trait]
impl Disposable for DbConnection {
    async fn dispose(&self) -> InjectResult<()> {
        info!("关闭数据库连接: {}", self.dsn);
        Ok(())
    }
}

/// 请求处理服务
struct SessionService {
    config: Arc<AppConfig>,
    db: Arc<DbConnection>,
}

impl SessionService {
    fn describe(&self) -> String {
        format!(
            "{} (上限 {} 会话) via {}",
            self.config.name, self.config.max_sessions, self.db.dsn
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    info!("启动注入器演示");

    let root = InjectorContext::root("app")?;
    register_services(&root)?;

    demonstrate_resolution(&root).await?;
    demonstrate_scoping(&root).await?;
    demonstrate_invoke(&root).await?;

    info!("统计: {:?}", root.stats());
    root.dispose("演示结束").await?;
    info!("演示结束");
    Ok(())
}

/// 注册演示服务
fn register_services(root: &InjectorContext) -> anyhow::Result<()> {
    root.register(Provider::value(
        Token::of::<AppConfig>(),
        AppConfig {
            name: "demo".to_string(),
            max_sessions: 64,
        },
    ))?;

    // 单例数据库连接，随根作用域销毁
    root.register(
        Provider::factory(Token::of::<DbConnection>(), Vec::new(), |_deps| {
            info!("建立数据库连接");
            Ok(Arc::new(DbConnection {
                dsn: "postgres://localhost/demo".to_string(),
            }) as InstanceValue)
        })
        .singleton()
        .disposable::<DbConnection>(),
    )?;

    root.register(injectable::<SessionService, _>(
        vec![
            Dependency::required(Token::of::<AppConfig>()),
            Dependency::required(Token::of::<DbConnection>()),
        ],
        |deps| {
            Ok(SessionService {
                config: deps.get_as::<AppConfig>(0)?,
                db: deps.get_as::<DbConnection>(1)?,
            })
        },
    ))?;

    // multi 令牌聚合多个插件
    for plugin in ["audit", "metrics"] {
        root.register(Provider::value(Token::key("plugin"), plugin.to_string()).multi())?;
    }
    Ok(())
}

/// 演示基本解析
async fn demonstrate_resolution(root: &InjectorContext) -> anyhow::Result<()> {
    let service = root
        .inject::<SessionService>(&Token::of::<SessionService>())
        .await?;
    info!("解析服务: {}", service.describe());

    let plugins = root.inject_all::<String>(&Token::key("plugin")).await?;
    info!("已加载插件: {:?}", plugins);
    Ok(())
}

/// 演示子作用域覆盖与销毁
async fn demonstrate_scoping(root: &InjectorContext) -> anyhow::Result<()> {
    let request = root.create_child(
        "request",
        vec![Provider::value(
            Token::of::<AppConfig>(),
            AppConfig {
                name: "request-override".to_string(),
                max_sessions: 1,
            },
        )],
    )?;

    let service = request
        .inject::<SessionService>(&Token::of::<SessionService>())
        .await?;
    info!("请求作用域内的服务: {}", service.describe());

    request.dispose("请求处理完毕").await?;
    Ok(())
}

/// 演示 invoke 临时作用域
async fn demonstrate_invoke(root: &InjectorContext) -> anyhow::Result<()> {
    let banner = root
        .invoke(
            &[
                Dependency::required(Token::of::<AppConfig>()),
                Dependency::required(Token::key("request-id")),
            ],
            vec![Provider::value(
                Token::key("request-id"),
                "req-0001".to_string(),
            )],
            |deps| {
                let config = deps.get_as::<AppConfig>(0)?;
                let request_id = deps.get_as::<String>(1)?;
                Ok(format!("[{}] {}", request_id, config.name))
            },
        )
        .await?;
    info!("invoke 结果: {}", banner);
    Ok(())
}
