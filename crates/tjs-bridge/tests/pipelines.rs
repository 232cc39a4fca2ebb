mod common;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use common::{Recorder, catalogue};
use image::{DynamicImage, RgbImage};
use tjs_bridge::{BridgeConfig, BridgeContext, BridgeError, GuestValue, ProxyKind};

fn labels(names: &[&str]) -> GuestValue {
    GuestValue::dict([(
        "candidate_labels",
        GuestValue::List(names.iter().map(|n| GuestValue::from(*n)).collect()),
    )])
}

#[tokio::test]
async fn test_zero_shot_labels_are_ranked() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let image = tjs.raw_image().unwrap().create(vec![200; 12], 2, 2, 3).unwrap();

    let classifier = tjs.pipeline("zero-shot-image-classification", None).await.unwrap();
    assert_eq!(classifier.kind(), ProxyKind::Function);
    assert_eq!(classifier.class_name(), "ZeroShotImageClassificationPipeline");

    let completion = classifier
        .call(vec![GuestValue::from(image.into_proxy()), labels(&["cat", "dog", "bird"])])
        .unwrap();
    assert!(completion.is_pending());
    let output = completion.await.unwrap();

    let records = output.as_list().unwrap();
    let ranked: Vec<&str> = records
        .iter()
        .map(|r| r.get("label").and_then(GuestValue::as_str).unwrap())
        .collect();
    assert_eq!(ranked, vec!["cat", "dog", "bird"]);

    let scores: Vec<f64> = records
        .iter()
        .map(|r| r.get("score").and_then(GuestValue::as_f64).unwrap())
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert!((scores.iter().sum::<f64>() - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_native_image_input_travels_as_blob_url() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let classifier = tjs.pipeline("zero-shot-image-classification", None).await.unwrap();
    let image = DynamicImage::ImageRgb8(RgbImage::new(3, 3));

    let output = classifier
        .call(vec![GuestValue::from(image), labels(&["night", "day"])])
        .unwrap()
        .await
        .unwrap();

    assert_eq!(output.as_list().map(<[GuestValue]>::len), Some(2));
    assert_eq!(tjs.blobs().len(), 1);
}

#[tokio::test]
async fn test_pipeline_attributes_and_model() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let pipe = tjs
        .pipeline("zero-shot-image-classification", Some("Xenova/siglip-base-patch16-224"))
        .await
        .unwrap();

    assert_eq!(pipe.get("model").unwrap().as_str(), Some("Xenova/siglip-base-patch16-224"));
    assert!(pipe.has("tokenizer"));

    let tokenizer = pipe.get_proxy("tokenizer").unwrap();
    tokenizer.set("model_max_length", 512).unwrap();

    let again = pipe.get_proxy("tokenizer").unwrap();
    assert!(again.same_object(&tokenizer));
    assert_eq!(again.get("model_max_length").unwrap().as_i64(), Some(512));

    let err = pipe.set("task", "translation").unwrap_err();
    assert!(err.to_string().contains("read only"));
}

#[tokio::test]
async fn test_task_aliases_resolve() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();

    let sentiment = tjs.pipeline("sentiment-analysis", None).await.unwrap();
    let output = sentiment
        .call(vec![GuestValue::from("I love transformers!")])
        .unwrap()
        .await
        .unwrap();

    let first = &output.as_list().unwrap()[0];
    assert_eq!(first.get("label").and_then(GuestValue::as_str), Some("POSITIVE"));
}

#[tokio::test]
async fn test_unsupported_task_lists_known_tasks() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();

    let err = tjs.pipeline("text-to-banana", None).await.unwrap_err();
    match err {
        BridgeError::ForeignCall(e) => assert_eq!(
            e.message,
            "Error: Unsupported pipeline: text-to-banana. Must be one of \
             [text-classification,zero-shot-image-classification]"
        ),
        other => panic!("expected a foreign call error, got {other}"),
    }
}

#[tokio::test]
async fn test_pipeline_refuses_when_all_model_sources_disabled() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    tjs.env().set("allowRemoteModels", false).unwrap();

    let err = tjs.pipeline("text-classification", None).await.unwrap_err();
    assert!(err.is_foreign_call());
    assert!(err.to_string().contains("both local and remote models are disabled"));

    tjs.env().set("allowLocalModels", true).unwrap();
    assert!(tjs.pipeline("text-classification", None).await.is_ok());
}

#[tokio::test]
async fn test_host_failure_surfaces_on_await() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let classifier = tjs.pipeline("zero-shot-image-classification", None).await.unwrap();

    let pending = classifier.call(vec![GuestValue::from(42)]).unwrap();
    let err = pending.await.unwrap_err();
    assert!(err.to_string().contains("Unsupported image input"));

    let err = tjs.env().call(Vec::new()).unwrap_err();
    assert!(err.to_string().contains("Env is not callable"));
}

fn recording_context(log: Arc<Mutex<Vec<u64>>>) -> Arc<BridgeContext> {
    common::init_tracing();
    BridgeContext::builder(BridgeConfig::default())
        .source(Arc::new(catalogue()))
        .task(Arc::new(Recorder { log }))
        .build()
}

#[tokio::test]
async fn test_slow_host_work_does_not_hold_back_later_calls() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let ctx = recording_context(log.clone());
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let embed = tjs.pipeline("embeddings", None).await.unwrap();

    let slow = embed.call(vec![GuestValue::from(200)]).unwrap();
    let fast = embed.call(vec![GuestValue::from(1)]).unwrap();

    assert_eq!(fast.await.unwrap().as_i64(), Some(1));
    assert_eq!(*log.lock(), vec![1]);
    assert_eq!(slow.await.unwrap().as_i64(), Some(200));
    assert_eq!(*log.lock(), vec![1, 200]);
}

#[tokio::test]
async fn test_dropped_result_still_runs() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let ctx = recording_context(log.clone());
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let embed = tjs.pipeline("embeddings", None).await.unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(5),
        embed.call(vec![GuestValue::from(60)]).unwrap().into_future(),
    )
    .await;
    assert!(abandoned.is_err());

    embed.call(vec![GuestValue::from(2)]).unwrap().await.unwrap();
    assert_eq!(*log.lock(), vec![2]);

    tokio::time::timeout(Duration::from_secs(2), async {
        while tjs.bridge().stats().discarded == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(*log.lock(), vec![2, 60]);
    assert_eq!(tjs.bridge().stats().discarded, 1);
}

#[tokio::test]
async fn test_lazy_proxy_resolves_against_default_instance() {
    let ctx = common::context();
    let lazy = ctx.lazy("pipeline");
    assert_eq!(lazy.path(), "pipeline");
    assert!(ctx.table().default_instance().is_none());

    let pipe = lazy
        .call(vec![GuestValue::from("text-classification")])
        .await
        .unwrap()
        .into_proxy()
        .unwrap();

    let default = ctx.table().default_instance().unwrap();
    assert_eq!(default.version(), "3.1.2");
    assert!(Arc::ptr_eq(pipe.instance(), &default));

    let flag = ctx.lazy("env").attr("allowLocalModels");
    assert_eq!(flag.path(), "env.allowLocalModels");
    assert_eq!(flag.resolve().await.unwrap().as_bool(), Some(false));
}

#[tokio::test]
async fn test_handles_are_released_when_proxies_drop() {
    let ctx = common::context();
    let tjs = ctx.resolve_instance(Some("2.4.2")).await.unwrap();
    let baseline = tjs.handles().live();

    {
        let t = tjs.tensor(tjs_bridge::DType::Float32, &[1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let row = t.index(1).unwrap();
        let copy = row.proxy().clone();
        assert_eq!(tjs.handles().live(), baseline + 2);
        assert_eq!(tjs.handles().refcount(copy.id()), 1);
        drop(row);
        assert_eq!(tjs.handles().live(), baseline + 2);
    }

    assert_eq!(tjs.handles().live(), baseline);
}
