use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use imgserve::config::ServerConfig;
use imgserve::pool::WorkerPool;
use imgserve::{router, AppState};
use std::path::PathBuf;
use std::time::Duration;

fn test_state(images_dir: PathBuf, cache_dir: PathBuf) -> Arc<AppState> {
    let config = ServerConfig {
        port: 9000,
        images_dir,
        cache_dir,
        precache: false,
        precache_workers: 1,
        request_timeout: Duration::from_secs(5),
        pool_size: 2,
        queue_depth: 8,
    };
    let pool_handle = WorkerPool::spawn(config.pool_size, config.queue_depth);
    Arc::new(AppState::new(config, pool_handle.pool))
}

fn sample_jpeg(w: u32, h: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(w, h, image::Rgb([10, 200, 30]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg)
        .unwrap();
    out
}

#[tokio::test]
async fn health_endpoint_reports_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path().to_path_buf(), dir.path().join("cache"));
    let app = router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn serving_an_existing_image_returns_a_transformed_payload() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cat.jpg"), sample_jpeg(50, 50)).unwrap();
    std::fs::write(
        dir.path().join("system-default.jpg"),
        sample_jpeg(20, 20),
    )
    .unwrap();

    let state = test_state(dir.path().to_path_buf(), dir.path().join("cache"));
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/img/cat.jpg/100x80/webp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-cache").unwrap(),
        "miss"
    );
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/webp"
    );
}

#[tokio::test]
async fn serving_a_repeat_request_is_a_cache_hit() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cat.jpg"), sample_jpeg(50, 50)).unwrap();
    std::fs::write(
        dir.path().join("system-default.jpg"),
        sample_jpeg(20, 20),
    )
    .unwrap();

    let state = test_state(dir.path().to_path_buf(), dir.path().join("cache"));
    let app = router(state);

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/img/cat.jpg/100x80/webp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.headers().get("x-cache").unwrap(), "miss");

    let second = app
        .oneshot(
            Request::builder()
                .uri("/img/cat.jpg/100x80/webp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.headers().get("x-cache").unwrap(), "hit");
}

#[tokio::test]
async fn missing_image_falls_back_to_system_default() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("system-default.jpg"),
        sample_jpeg(20, 20),
    )
    .unwrap();

    let state = test_state(dir.path().to_path_buf(), dir.path().join("cache"));
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/img/does-not-exist.jpg")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-resolved-fallback").unwrap(),
        "system_default"
    );
}

#[tokio::test]
async fn traversal_attempt_falls_back_to_system_default() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("system-default.jpg"),
        sample_jpeg(20, 20),
    )
    .unwrap();

    let state = test_state(dir.path().to_path_buf(), dir.path().join("cache"));
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/img/..%2f..%2f..%2fetc%2fpasswd")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-resolved-fallback").unwrap(),
        "traversal_rejected"
    );
}

#[tokio::test]
async fn admin_clear_empties_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cat.jpg"), sample_jpeg(50, 50)).unwrap();
    std::fs::write(
        dir.path().join("system-default.jpg"),
        sample_jpeg(20, 20),
    )
    .unwrap();

    let state = test_state(dir.path().to_path_buf(), dir.path().join("cache"));
    let app = router(state);

    let _ = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/img/cat.jpg/100x80/webp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/cmd/clear")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn concurrent_cold_requests_coalesce_onto_one_transform() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("new.jpg"), sample_jpeg(50, 50)).unwrap();
    std::fs::write(
        dir.path().join("system-default.jpg"),
        sample_jpeg(20, 20),
    )
    .unwrap();

    let state = test_state(dir.path().to_path_buf(), dir.path().join("cache"));
    let app = router(state);

    // Poll all ten requests concurrently on one task (rather than spawning
    // onto separate OS-scheduled tasks) so each reaches the single-flight
    // acquire point before the leader's transform settles, deterministically
    // exercising the coalescing path (spec §8 property 5, S5).
    let futures = (0..10).map(|_| {
        let app = app.clone();
        async move {
            app.oneshot(
                Request::builder()
                    .uri("/img/new.jpg/400x400/webp")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
        }
    });
    let responses = futures::future::join_all(futures).await;

    let mut statuses = Vec::new();
    let mut cache_headers = Vec::new();
    for response in responses {
        statuses.push(response.status());
        cache_headers.push(
            response
                .headers()
                .get("x-cache")
                .unwrap()
                .to_str()
                .unwrap()
                .to_string(),
        );
    }

    assert!(statuses.iter().all(|s| *s == StatusCode::OK));
    assert_eq!(cache_headers.iter().filter(|c| *c == "miss").count(), 1);
    assert_eq!(
        cache_headers.iter().filter(|c| *c == "coalesced").count(),
        9
    );
}

#[tokio::test]
async fn unknown_admin_command_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("system-default.jpg"),
        sample_jpeg(20, 20),
    )
    .unwrap();

    let state = test_state(dir.path().to_path_buf(), dir.path().join("cache"));
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/cmd/reboot")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
