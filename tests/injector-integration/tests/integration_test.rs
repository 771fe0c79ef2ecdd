//! injector-core 的集中式集成测试
use async_trait::async_trait;
use injector_core::{
    injectable, AmbientProviders, Dependency, Disposable, InjectError, InjectResult,
    InjectorContext, InstanceValue, Provider, Token,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 测试服务
#[derive(Debug)]
struct Greeter {
    greeting: String,
}

impl Greeter {
    fn greet(&self) -> &str {
        &self.greeting
    }
}

/// 记录销毁顺序的资源
struct TrackedResource {
    id: usize,
    log: Arc<Mutex<Vec<usize>>>,
    fail: bool,
}

#[async_trait]
impl Disposable for TrackedResource {
    async fn dispose(&self) -> InjectResult<()> {
        self.log.lock().unwrap().push(self.id);
        if self.fail {
            return Err(InjectError::Construction {
                token: format!("resource-{}", self.id),
                source: anyhow::anyhow!("清理失败").into(),
            });
        }
        Ok(())
    }
}

fn tracked_provider(key: &str, id: usize, log: Arc<Mutex<Vec<usize>>>, fail: bool) -> Provider {
    Provider::factory(Token::key(key.to_string()), Vec::new(), move |_deps| {
        Ok(Arc::new(TrackedResource {
            id,
            log: log.clone(),
            fail,
        }) as InstanceValue)
    })
    .disposable::<TrackedResource>()
}

#[tokio::test]
async fn child_scope_shadows_parent_and_parent_keeps_its_own() {
    let root = InjectorContext::root("app").unwrap();
    root.register(Provider::value(Token::key("greeting"), Greeter {
        greeting: "hi".to_string(),
    }))
    .unwrap();

    // 子作用域尚未注册时沿作用域链继承父级
    let child = root.create_child("request", Vec::new()).unwrap();
    let inherited = child.inject::<Greeter>(&Token::key("greeting")).await.unwrap();
    assert_eq!(inherited.greet(), "hi");

    // 子级以单例工厂覆盖后，子级得到覆盖值，父级不受影响
    child
        .register(
            Provider::factory(Token::key("greeting"), Vec::new(), |_| {
                Ok(Arc::new(Greeter {
                    greeting: "hello".to_string(),
                }) as InstanceValue)
            })
            .singleton(),
        )
        .unwrap();

    let from_child = child.inject::<Greeter>(&Token::key("greeting")).await.unwrap();
    let from_root = root.inject::<Greeter>(&Token::key("greeting")).await.unwrap();
    assert_eq!(from_child.greet(), "hello");
    assert_eq!(from_root.greet(), "hi");

    // 单例覆盖在子级缓存，重复解析返回同一实例
    let again = child.inject::<Greeter>(&Token::key("greeting")).await.unwrap();
    assert!(Arc::ptr_eq(&from_child, &again));

    // 子作用域未注册的令牌回退到父作用域
    root.register(Provider::value(Token::key("shared"), 7u32)).unwrap();
    let shared = child.inject::<u32>(&Token::key("shared")).await.unwrap();
    assert_eq!(*shared, 7);
}

#[tokio::test]
async fn later_registration_wins_within_one_scope() {
    let root = InjectorContext::root("app").unwrap();
    root.register(Provider::value(Token::key("flag"), 1u32)).unwrap();
    root.register(Provider::value(Token::key("flag"), 2u32)).unwrap();

    let flag = root.inject::<u32>(&Token::key("flag")).await.unwrap();
    assert_eq!(*flag, 2);
}

#[tokio::test]
async fn multi_providers_aggregate_in_registration_order() {
    let root = InjectorContext::root("app").unwrap();
    for value in ["v1", "v2", "v3"] {
        root.register(
            Provider::value(Token::key("plugin"), value.to_string()).multi(),
        )
        .unwrap();
    }

    let plugins = root.inject_all::<String>(&Token::key("plugin")).await.unwrap();
    let names: Vec<&str> = plugins.iter().map(|p| p.as_str()).collect();
    assert_eq!(names, ["v1", "v2", "v3"]);

    // multi 结果拒绝单值读取
    let handle = root.resolve(&Token::key("plugin")).await.unwrap();
    assert!(handle.is_multi());
    assert!(handle.get::<String>().is_err());
}

#[tokio::test]
async fn conflicting_registration_leaves_state_unchanged() {
    let root = InjectorContext::root("app").unwrap();
    root.register(Provider::value(Token::key("svc"), 1u32)).unwrap();

    let err = root
        .register(Provider::value(Token::key("svc"), 2u32).multi())
        .unwrap_err();
    assert!(matches!(err, InjectError::ConflictingRegistration { .. }));

    // 失败的注册不影响已有条目
    let value = root.inject::<u32>(&Token::key("svc")).await.unwrap();
    assert_eq!(*value, 1);
}

#[tokio::test]
async fn singleton_is_constructed_once_under_concurrency() {
    let root = InjectorContext::root("app").unwrap();
    let constructions = Arc::new(AtomicUsize::new(0));
    let counter = constructions.clone();
    root.register(
        Provider::async_factory(Token::key("cfg"), Vec::new(), move |_deps| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok(Arc::new("loaded".to_string()) as InstanceValue)
            })
        })
        .singleton(),
    )
    .unwrap();

    let token = Token::key("cfg");
    let (a, b) = tokio::join!(
        root.inject::<String>(&token),
        root.inject::<String>(&token),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(constructions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn singleton_construction_is_exclusive_across_sync_and_async_paths() {
    let root = InjectorContext::root("app").unwrap();
    let constructions = Arc::new(AtomicUsize::new(0));
    let counter = constructions.clone();
    root.register(
        Provider::factory(Token::key("cfg"), Vec::new(), move |_deps| {
            counter.fetch_add(1, Ordering::SeqCst);
            // 拉长构造窗口，让另一条路径有机会撞上在途构造
            std::thread::sleep(std::time::Duration::from_millis(100));
            Ok(Arc::new("loaded".to_string()) as InstanceValue)
        })
        .singleton(),
    )
    .unwrap();

    let sync_root = root.clone();
    let sync_path = std::thread::spawn(move || {
        sync_root
            .resolve_sync(&Token::key("cfg"))
            .and_then(|handle| handle.get::<String>())
    });
    let from_async = root.inject::<String>(&Token::key("cfg")).await.unwrap();
    let from_sync = sync_path.join().unwrap().unwrap();

    assert!(Arc::ptr_eq(&from_async, &from_sync));
    assert_eq!(constructions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn singleton_cache_is_keyed_by_provider_not_token() {
    let root = InjectorContext::root("app").unwrap();
    root.register(
        Provider::factory(Token::key("svc"), Vec::new(), |_deps| {
            Ok(Arc::new(1u32) as InstanceValue)
        })
        .singleton(),
    )
    .unwrap();
    let first = root.inject::<u32>(&Token::key("svc")).await.unwrap();
    assert_eq!(*first, 1);

    // 覆盖注册后旧单例缓存不再命中
    root.register(
        Provider::factory(Token::key("svc"), Vec::new(), |_deps| {
            Ok(Arc::new(2u32) as InstanceValue)
        })
        .singleton(),
    )
    .unwrap();
    let second = root.inject::<u32>(&Token::key("svc")).await.unwrap();
    assert_eq!(*second, 2);
}

#[tokio::test]
async fn dependencies_resolve_in_declaration_order() {
    struct Report {
        summary: String,
    }

    let root = InjectorContext::root("app").unwrap();
    root.register(Provider::value(Token::key("title"), "日报".to_string()))
        .unwrap();
    root.register(Provider::value(Token::key("count"), 42u32)).unwrap();
    root.register(injectable::<Report, _>(
        vec![
            Dependency::required(Token::key("title")),
            Dependency::required(Token::key("count")),
            Dependency::optional(Token::key("footer")),
        ],
        |deps| {
            let title = deps.get_as::<String>(0)?;
            let count = deps.get_as::<u32>(1)?;
            let footer = deps.opt_as::<String>(2)?;
            Ok(Report {
                summary: format!("{title}:{count}:{}", footer.is_some()),
            })
        },
    ))
    .unwrap();

    let report = root.inject::<Report>(&Token::of::<Report>()).await.unwrap();
    assert_eq!(report.summary, "日报:42:false");
}

#[tokio::test]
async fn nested_providers_stay_private_to_their_owner() {
    let root = InjectorContext::root("app").unwrap();
    root.register(
        Provider::factory(
            Token::key("service"),
            vec![Dependency::required(Token::key("secret"))],
            |deps| {
                let secret = deps.get_as::<String>(0)?;
                Ok(Arc::new(format!("svc[{secret}]")) as InstanceValue)
            },
        )
        .with_providers(vec![Provider::value(
            Token::key("secret"),
            "s3cr3t".to_string(),
        )]),
    )
    .unwrap();

    let service = root.inject::<String>(&Token::key("service")).await.unwrap();
    assert_eq!(*service, "svc[s3cr3t]");

    // 私有提供者对兄弟解析不可见
    assert!(matches!(
        root.resolve(&Token::key("secret")).await,
        Err(InjectError::MissingProvider { .. })
    ));
}

#[tokio::test]
async fn nested_dep_scope_is_reused_across_resolutions() {
    let root = InjectorContext::root("app").unwrap();
    root.register(
        Provider::factory(
            Token::key("service"),
            vec![Dependency::required(Token::key("secret"))],
            |deps| {
                let secret = deps.get_as::<String>(0)?;
                Ok(Arc::new(format!("svc[{secret}]")) as InstanceValue)
            },
        )
        .with_providers(vec![Provider::value(
            Token::key("secret"),
            "s3cr3t".to_string(),
        )]),
    )
    .unwrap();

    root.inject::<String>(&Token::key("service")).await.unwrap();
    let baseline = root.stats().contexts;
    for _ in 0..10 {
        root.inject::<String>(&Token::key("service")).await.unwrap();
    }
    // 依赖作用域按提供者复用，反复解析不增殖上下文
    assert_eq!(root.stats().contexts, baseline);
}

#[tokio::test]
async fn token_scope_restriction_is_enforced() {
    let root = InjectorContext::root("app").unwrap();
    let token = Token::key("session").restrict_to("request");
    root.register(Provider::value(token.clone(), 99u32)).unwrap();

    // 限制作用域外解析失败，可选解析也一样
    assert!(matches!(
        root.resolve(&token).await,
        Err(InjectError::ScopeMismatch { .. })
    ));
    assert!(matches!(
        root.resolve_optional(&token).await,
        Err(InjectError::ScopeMismatch { .. })
    ));

    let request = root.create_child("request", Vec::new()).unwrap();
    let session = request.inject::<u32>(&token).await.unwrap();
    assert_eq!(*session, 99);
}

#[tokio::test]
async fn provider_scope_restriction_skips_outside_matching_scope() {
    let root = InjectorContext::root("app").unwrap();
    root.register(
        Provider::value(Token::key("conn"), "request-conn".to_string())
            .restrict_scope("request"),
    )
    .unwrap();

    assert!(matches!(
        root.resolve(&Token::key("conn")).await,
        Err(InjectError::MissingProvider { .. })
    ));

    let request = root.create_child("request", Vec::new()).unwrap();
    let conn = request.inject::<String>(&Token::key("conn")).await.unwrap();
    assert_eq!(*conn, "request-conn");
}

#[tokio::test]
async fn scope_disposal_runs_in_reverse_creation_order_and_cascades() {
    let root = InjectorContext::root("app").unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let scope = root.create_child("work", Vec::new()).unwrap();
    scope
        .register(tracked_provider("a", 1, log.clone(), false))
        .unwrap();
    scope
        .register(tracked_provider("b", 2, log.clone(), false))
        .unwrap();
    let grandchild = scope.create_child("inner", Vec::new()).unwrap();
    grandchild
        .register(tracked_provider("c", 3, log.clone(), false))
        .unwrap();

    scope.resolve(&Token::key("a")).await.unwrap();
    scope.resolve(&Token::key("b")).await.unwrap();
    grandchild.resolve(&Token::key("c")).await.unwrap();

    scope.dispose("测试结束").await.unwrap();

    // 子作用域先于父作用域，作用域内按创建逆序
    assert_eq!(*log.lock().unwrap(), vec![3, 2, 1]);
    assert!(scope.is_disposed());
    assert!(grandchild.is_disposed());
    assert!(!root.is_disposed());
}

#[tokio::test]
async fn disposal_is_best_effort_and_reports_first_failure() {
    let root = InjectorContext::root("app").unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let scope = root.create_child("work", Vec::new()).unwrap();
    scope
        .register(tracked_provider("a", 1, log.clone(), false))
        .unwrap();
    scope
        .register(tracked_provider("b", 2, log.clone(), true))
        .unwrap();
    scope
        .register(tracked_provider("c", 3, log.clone(), false))
        .unwrap();
    scope.resolve(&Token::key("a")).await.unwrap();
    scope.resolve(&Token::key("b")).await.unwrap();
    scope.resolve(&Token::key("c")).await.unwrap();

    let err = scope.dispose("测试结束").await.unwrap_err();
    assert!(matches!(err, InjectError::DisposalFailed { .. }));
    // 失败不中断后续实例的销毁
    assert_eq!(*log.lock().unwrap(), vec![3, 2, 1]);
}

#[tokio::test]
async fn disposed_scope_rejects_all_operations() {
    let root = InjectorContext::root("app").unwrap();
    let scope = root.create_child("work", Vec::new()).unwrap();
    scope
        .register(Provider::value(Token::key("x"), 1u32))
        .unwrap();
    scope.dispose("关闭").await.unwrap();

    assert!(matches!(
        scope.resolve(&Token::key("x")).await,
        Err(InjectError::AlreadyDisposed { .. })
    ));
    assert!(matches!(
        scope.register(Provider::value(Token::key("y"), 2u32)),
        Err(InjectError::AlreadyDisposed { .. })
    ));
    assert!(matches!(
        scope.create_child("late", Vec::new()),
        Err(InjectError::AlreadyDisposed { .. })
    ));
    // 重复销毁是致命错误
    assert!(matches!(
        scope.dispose("再次关闭").await,
        Err(InjectError::AlreadyDisposed { .. })
    ));
}

#[tokio::test]
async fn handle_release_fires_disposer_exactly_once() {
    let root = InjectorContext::root("app").unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    root.register(tracked_provider("res", 9, log.clone(), false))
        .unwrap();

    let handle = root.resolve(&Token::key("res")).await.unwrap();
    handle.release().await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec![9]);

    // 重复释放被拒绝
    assert!(matches!(
        handle.release().await,
        Err(InjectError::AlreadyDisposed { .. })
    ));

    // 已释放的实例不会在作用域销毁时二次清理
    root.dispose("关闭").await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec![9]);
}

#[tokio::test]
async fn invoke_runs_in_transient_scope() {
    let root = InjectorContext::root("app").unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    root.register(Provider::value(Token::key("base"), 10u32)).unwrap();

    let result = root
        .invoke(
            &[
                Dependency::required(Token::key("base")),
                Dependency::required(Token::key("extra")),
                Dependency::required(Token::key("res")),
            ],
            vec![
                Provider::value(Token::key("extra"), 5u32),
                tracked_provider("res", 1, log.clone(), false),
            ],
            |deps| {
                let base = deps.get_as::<u32>(0)?;
                let extra = deps.get_as::<u32>(1)?;
                Ok(*base + *extra)
            },
        )
        .await
        .unwrap();
    assert_eq!(result, 15);

    // 临时作用域随调用结束销毁，额外提供者不泄漏
    assert_eq!(*log.lock().unwrap(), vec![1]);
    assert!(matches!(
        root.resolve(&Token::key("extra")).await,
        Err(InjectError::MissingProvider { .. })
    ));
}

#[tokio::test]
async fn invoke_call_error_wins_over_disposal() {
    let root = InjectorContext::root("app").unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let err = root
        .invoke::<u32, _>(
            &[Dependency::required(Token::key("res"))],
            vec![tracked_provider("res", 1, log.clone(), true)],
            |_deps| {
                Err(InjectError::Construction {
                    token: "call".to_string(),
                    source: anyhow::anyhow!("业务失败").into(),
                })
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, InjectError::Construction { .. }));
    // 销毁仍被执行
    assert_eq!(*log.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn ambient_providers_resolve_but_never_cache_singletons() {
    let ambient = AmbientProviders::new()
        .with(Provider::value(Token::key("build"), "1.2.3".to_string()))
        .with(
            Provider::factory(Token::key("uptime"), Vec::new(), |_deps| {
                Ok(Arc::new(0u32) as InstanceValue)
            })
            .singleton(),
        );
    let root = InjectorContext::root_with_ambient("app", ambient).unwrap();
    let child = root.create_child("request", Vec::new()).unwrap();

    let build = child.inject::<String>(&Token::key("build")).await.unwrap();
    assert_eq!(*build, "1.2.3");

    // 根作用域可覆盖全局声明
    root.register(Provider::value(Token::key("build"), "dev".to_string()))
        .unwrap();
    let overridden = child.inject::<String>(&Token::key("build")).await.unwrap();
    assert_eq!(*overridden, "dev");

    // 全局声明仓库拒绝缓存单例
    assert!(matches!(
        child.resolve(&Token::key("uptime")).await,
        Err(InjectError::SingletonNotAllowed { .. })
    ));
}

#[tokio::test]
async fn opinionated_token_traits_reconcile_with_providers() {
    let root = InjectorContext::root("app").unwrap();
    let token = Token::key("handler").with_multi(true);

    // 令牌要求 multi，提供者未声明时由令牌补全
    root.register(Provider::value(token.clone(), 1u32)).unwrap();
    root.register(Provider::value(token.clone(), 2u32)).unwrap();
    let all = root.inject_all::<u32>(&token).await.unwrap();
    assert_eq!(all.len(), 2);

    // 提供者显式声明与令牌冲突时注册失败
    let err = root
        .register(Provider::value(token.clone(), 3u32).with_multi(false))
        .unwrap_err();
    assert!(matches!(err, InjectError::FlagConflict { .. }));
}

#[tokio::test]
async fn deep_chain_hits_depth_limit() {
    let root = InjectorContext::root("app").unwrap();
    for index in 0..=200u32 {
        let next = index + 1;
        root.register(Provider::factory(
            Token::key(format!("n{index}")),
            vec![Dependency::required(Token::key(format!("n{next}")))],
            |deps| deps.get(0),
        ))
        .unwrap();
    }

    let err = root.resolve(&Token::key("n0")).await.unwrap_err();
    assert!(matches!(err, InjectError::MaxDepthExceeded { .. }));
}
