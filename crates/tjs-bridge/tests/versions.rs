mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{FlakySource, SlowSource, catalogue, context, context_with};
use tjs_bridge::registry::XENOVA_PACKAGE;
use tjs_bridge::{BridgeError, ConfigError, GuestValue, InstanceEvent, LoadCause, StaticSource, VersionKey};

#[tokio::test]
async fn test_same_key_resolves_to_same_instance() {
    let ctx = context();

    let a = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let b = ctx.resolve_instance(Some("2.4.2")).await.unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.version(), "2.4.2");
    assert!(a.module().same_object(&b.module()));
}

#[tokio::test]
async fn test_url_key_is_a_separate_instance() {
    let ctx = context();
    let url = format!("{}/{}@2.4.2", common::CDN, XENOVA_PACKAGE);

    let by_version = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let by_url = ctx.resolve_instance(Some(&url)).await.unwrap();

    assert!(!Arc::ptr_eq(&by_version, &by_url));
    assert_eq!(by_url.version(), "2.4.2");
    assert_eq!(by_url.key(), &VersionKey::new(url.as_str()));
    assert_eq!(ctx.registry().len(), 2);
}

#[tokio::test]
async fn test_latest_and_wildcards_pick_newest_build() {
    let ctx = context();

    let latest = ctx.resolve_instance(None).await.unwrap();
    assert_eq!(latest.version(), "3.1.2");
    assert_eq!(latest.manifest().name, "@huggingface/transformers");

    let two = ctx.resolve_instance(Some("2.*")).await.unwrap();
    assert_eq!(two.version(), "2.17.2");
    assert_eq!(two.manifest().name, XENOVA_PACKAGE);
}

#[tokio::test]
async fn test_env_is_isolated_per_instance() {
    let ctx = context();
    let old = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let new = ctx.resolve_instance(Some("2.17.2")).await.unwrap();

    assert_eq!(old.env().get("allowLocalModels").unwrap().as_bool(), Some(false));
    old.env().set("allowLocalModels", true).unwrap();

    assert_eq!(old.env().get("allowLocalModels").unwrap().as_bool(), Some(true));
    assert_eq!(new.env().get("allowLocalModels").unwrap().as_bool(), Some(false));
    assert_eq!(old.env().get("version").unwrap().as_str(), Some("2.4.2"));
    assert_eq!(new.env().get("version").unwrap().as_str(), Some("2.17.2"));
}

#[tokio::test]
async fn test_env_rejects_invalid_writes() {
    let ctx = context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let env = tjs.env();

    let err = env.set("version", "9.9.9").unwrap_err();
    assert!(matches!(err, BridgeError::Config(ConfigError::ReadOnly(ref flag)) if flag == "version"));

    let err = env.set("allowRemoteModels", "yes").unwrap_err();
    assert!(matches!(err, BridgeError::Config(ConfigError::TypeMismatch { .. })));

    let err = env.set("cacheDir", vec![GuestValue::from(1)]).unwrap_err();
    assert!(matches!(err, BridgeError::Config(ConfigError::NotPrimitive { .. })));

    env.set("customFlag", 3).unwrap();
    assert_eq!(env.get("customFlag").unwrap().as_i64(), Some(3));
    assert!(env.has("customFlag"));
}

#[tokio::test]
async fn test_unknown_and_unsupported_versions_fail_to_load() {
    let source = catalogue().with(XENOVA_PACKAGE, "1.9.0");
    let ctx = context_with(Arc::new(source));

    match ctx.resolve_instance(Some("9.9.9")).await {
        Err(BridgeError::Load(e)) => {
            assert_eq!(e.key, "9.9.9");
            assert!(matches!(e.cause, LoadCause::NotFound(_)));
        }
        other => panic!("expected a load error, got {:?}", other.map(|i| i.version().to_string())),
    }

    match ctx.resolve_instance(Some("1.9.0")).await {
        Err(BridgeError::Load(e)) => assert!(matches!(e.cause, LoadCause::Unsupported(_))),
        other => panic!("expected a load error, got {:?}", other.map(|i| i.version().to_string())),
    }

    assert!(ctx.registry().is_empty());
}

#[tokio::test]
async fn test_failed_load_is_retried_on_next_request() {
    let source = Arc::new(FlakySource::new(catalogue(), 1));
    let ctx = context_with(source.clone());

    let err = ctx.resolve_instance(Some("2.4.2")).await.unwrap_err();
    assert!(err.is_load());
    assert!(err.to_string().contains("connection reset"));
    assert!(!ctx.registry().contains(&VersionKey::new("2.4.2")));

    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    assert_eq!(tjs.version(), "2.4.2");
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);

    let stats = ctx.registry_stats();
    assert_eq!((stats.loads, stats.failures), (1, 1));
}

#[tokio::test]
async fn test_concurrent_first_requests_share_one_load() {
    let source = Arc::new(SlowSource::new(catalogue(), Duration::from_millis(50)));
    let ctx = context_with(source.clone());

    let requests = (0..5).map(|_| ctx.resolve_instance(Some("2.4.2")));
    let instances: Vec<_> = futures::future::join_all(requests)
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    let stats = ctx.registry_stats();
    assert_eq!((stats.loads, stats.misses, stats.hits), (1, 1, 4));
}

#[tokio::test]
async fn test_lifecycle_events() {
    let ctx = context();
    let mut events = ctx.subscribe();

    ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    ctx.resolve_instance(None).await.unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        InstanceEvent::Loaded {
            key: VersionKey::new("2.4.2"),
            version: "2.4.2".to_string()
        }
    );
    assert!(matches!(events.recv().await.unwrap(), InstanceEvent::Loaded { .. }));
    assert_eq!(
        events.recv().await.unwrap(),
        InstanceEvent::DefaultChanged {
            key: VersionKey::latest(),
            previous: None
        }
    );
}

#[tokio::test]
async fn test_configured_env_applies_to_new_instances() {
    common::init_tracing();
    let mut config = tjs_bridge::BridgeConfig::default();
    config.env.insert("allowlocalmodels".to_string(), true.into());

    let ctx = tjs_bridge::BridgeContext::builder(config)
        .source(Arc::new(StaticSource::new().with(XENOVA_PACKAGE, "2.4.2")))
        .build();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();

    assert_eq!(tjs.env_config().get_bool("allowLocalModels"), Some(true));
}

#[tokio::test]
async fn test_switching_versions_returns_to_the_first_instance() {
    let ctx = context();

    let first = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let v3 = ctx.resolve_instance(Some("3.0.0")).await.unwrap();
    let back = ctx.resolve_instance(Some("2.4.2")).await.unwrap();

    assert!(Arc::ptr_eq(&first, &back));
    assert!(!Arc::ptr_eq(&first, &v3));
    assert_eq!(first.env().get("version").unwrap().as_str(), Some("2.4.2"));
    assert_eq!(v3.env().get("version").unwrap().as_str(), Some("3.0.0"));
    assert_eq!(v3.manifest().name, "@huggingface/transformers");
    assert_eq!(ctx.registry().len(), 2);
}
