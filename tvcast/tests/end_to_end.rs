//! End-to-end tests for the catalog core.
//!
//! A local HTTP server hands out shell scripts and a static playlist. The
//! scripts run under `sh`, so these tests are Unix-only.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::ServiceExt;

use tvcast::Error;
use tvcast::api::{ApiServer, ApiServerConfig, AppState};
use tvcast::config::{ARTIFACT_PLACEHOLDER, AddonConfig, AppConfig};
use tvcast::generator::Phase;
use tvcast::playlist::{PlaylistSource, RebuildOptions};
use tvcast::services::ServiceContainer;

const PLAYLIST_SCRIPT: &str = r#"cat <<'M3U'
#EXTM3U url-tvg="http://epg.example/guide.xml"
#EXTINF:-1 tvg-id="news.one" tvg-name="News One" group-title="News",News One
http://origin.example/news
#EXTINF:-1 tvg-id="film.one" group-title="Movies",Film One
http://origin.example/film
M3U
"#;

const RESOLVER_SCRIPT: &str = r#"echo "https://cdn.example/live/$1.m3u8"
"#;

const STATIC_PLAYLIST: &str = "#EXTM3U\n\
#EXTINF:-1 tvg-id=\"static.one\" group-title=\"Sport\",Static One\n\
http://origin.example/static\n";

const NEWS_PLAYLIST: &str = "#EXTM3U\n\
#EXTINF:-1 tvg-id=\"news.one\" group-title=\"News\",World News\n\
http://origin.example/news1\n\
#EXTINF:-1 tvg-id=\"news.two\" group-title=\"News\",Evening news\n\
http://origin.example/news2\n\
#EXTINF:-1 tvg-id=\"news.three\" group-title=\"News\",NEWS 24\n\
http://origin.example/news3\n\
#EXTINF:-1 tvg-id=\"film.one\" group-title=\"Movies\",Film One\n\
http://origin.example/film\n";

/// Serve the fixtures on an ephemeral port and return the base URL.
async fn fixture_server() -> String {
    let app = Router::new()
        .route("/playlist.sh", get(|| async { PLAYLIST_SCRIPT }))
        .route("/resolver.sh", get(|| async { RESOLVER_SCRIPT }))
        .route("/list.m3u", get(|| async { STATIC_PLAYLIST }))
        .route("/news.m3u", get(|| async { NEWS_PLAYLIST }))
        .route("/empty.sh", get(|| async { "   \n" }));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind fixture server");
    let addr = listener.local_addr().expect("Fixture server has no address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    format!("http://{addr}")
}

/// Container running artifacts with `sh` inside a temporary data directory.
async fn setup_services(dir: &TempDir) -> Arc<ServiceContainer> {
    let mut config = AppConfig::default();
    config.generator.data_dir = dir.path().join("data");
    config.generator.interpreter = "sh".to_string();
    config.generator.execution_timeout = Duration::from_secs(10);
    config.generator.validation_timeout = Duration::from_secs(10);
    config.generator.syntax_check_args = vec!["-n".to_string(), ARTIFACT_PLACEHOLDER.to_string()];
    config.generator.self_test_args = vec!["-n".to_string(), ARTIFACT_PLACEHOLDER.to_string()];
    config.playlist.retry_attempts = 2;
    config.playlist.retry_delay = Duration::from_millis(20);

    Arc::new(
        ServiceContainer::new(config)
            .await
            .expect("Failed to build service container"),
    )
}

mod pipeline_tests {
    use super::*;

    #[tokio::test]
    async fn test_generator_to_catalog_to_resolution() {
        let base = fixture_server().await;
        let dir = TempDir::new().unwrap();
        let services = setup_services(&dir).await;

        // Playlist generator: acquire, run, rebuild from its output.
        let generator = services.generators.playlist();
        generator
            .acquire(&format!("{base}/playlist.sh"))
            .await
            .expect("Playlist script download failed");
        assert_eq!(generator.phase(), Phase::Ready);
        assert!(generator.validate().await.unwrap());

        let output = generator.execute(&[]).await.unwrap();
        assert!(output.starts_with("#EXTM3U"));

        let outcome = services
            .playlist
            .rebuild(PlaylistSource::GeneratorOutput, RebuildOptions::forced())
            .await
            .unwrap();
        assert!(outcome.was_rebuilt());

        let snapshot = services.playlist.get();
        assert!(!snapshot.stale);
        let entry = snapshot.entry.expect("Catalog should be built");
        assert_eq!(entry.channels.len(), 2);
        assert_eq!(entry.genres, vec!["Movies", "News"]);
        assert_eq!(entry.epg_references, vec!["http://epg.example/guide.xml"]);

        // Without a resolver script nothing can be resolved.
        let err = services.resolution.resolve("news.one").await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }), "unexpected error: {err}");
        assert!(services.resolution.cache().get("news.one").is_none());

        // Unknown channels are rejected before the resolver runs.
        let err = services.resolution.resolve("missing").await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));

        // Install the resolver and resolve twice; the second call is a hit.
        let resolver = services.generators.resolver();
        resolver
            .acquire(&format!("{base}/resolver.sh"))
            .await
            .expect("Resolver script download failed");
        assert!(resolver.validate().await.unwrap());

        let url = services.resolution.resolve("news.one").await.unwrap();
        assert_eq!(&*url, "https://cdn.example/live/news.one.m3u8");

        let cached = services.resolution.cache().get("news.one").unwrap();
        assert_eq!(cached.url, url);

        let again = services.resolution.resolve("news.one").await.unwrap();
        assert_eq!(again, url);
        let still_cached = services.resolution.cache().get("news.one").unwrap();
        assert_eq!(still_cached.resolved_at, cached.resolved_at);
        assert_eq!(services.resolution.status().cached_entries, 1);

        assert_eq!(services.resolution.clear_cache(), 1);
        assert!(services.resolution.cache().get("news.one").is_none());

        services.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_download_keeps_previous_artifact() {
        let base = fixture_server().await;
        let dir = TempDir::new().unwrap();
        let services = setup_services(&dir).await;
        let generator = services.generators.playlist();

        generator.acquire(&format!("{base}/playlist.sh")).await.unwrap();
        let installed = tokio::fs::read_to_string(generator.artifact_path()).await.unwrap();

        assert!(generator.acquire(&format!("{base}/empty.sh")).await.is_err());
        assert!(generator.acquire(&format!("{base}/not-found.sh")).await.is_err());

        let after = tokio::fs::read_to_string(generator.artifact_path()).await.unwrap();
        assert_eq!(installed, after);
        assert_eq!(generator.phase(), Phase::Ready);
        assert_eq!(
            generator.source_url().as_deref(),
            Some(format!("{base}/playlist.sh").as_str())
        );

        services.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_addon_config_prefers_generator_script() {
        let base = fixture_server().await;
        let dir = TempDir::new().unwrap();
        let services = setup_services(&dir).await;

        let addon = AddonConfig::from_query(&format!(
            "m3u={base}/list.m3u&python_script_url={base}/playlist.sh\
             &resolver_enabled=true&resolver_script={base}/resolver.sh"
        ))
        .unwrap();

        let report = services.apply_addon_config(&addon).await;
        assert!(report.is_ok(), "configure errors: {:?}", report.errors);

        let entry = services.playlist.current().unwrap();
        assert_eq!(entry.source_key, PlaylistSource::GeneratorOutput.key());
        assert!(entry.channel("news.one").is_some());
        assert!(entry.channel("static.one").is_none());
        assert!(services.generators.resolver().has_artifact());

        services.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_addon_config_with_playlist_url() {
        let base = fixture_server().await;
        let dir = TempDir::new().unwrap();
        let services = setup_services(&dir).await;

        let addon = AddonConfig::from_query(&format!("m3u={base}/list.m3u")).unwrap();
        let report = services.apply_addon_config(&addon).await;
        assert!(report.is_ok(), "configure errors: {:?}", report.errors);

        let entry = services.playlist.current().unwrap();
        assert_eq!(entry.channels.len(), 1);
        assert_eq!(entry.genres, vec!["Sport"]);

        // Same source again is a no-op.
        let report = services.apply_addon_config(&addon).await;
        assert!(report.applied.iter().any(|step| step == "playlist unchanged"));

        services.shutdown().await.unwrap();
    }
}

mod api_tests {
    use super::*;

    fn router(services: Arc<ServiceContainer>) -> Router {
        ApiServer::new(ApiServerConfig::default(), AppState::new(services)).build_router()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_catalog_is_empty_before_first_build() {
        let dir = TempDir::new().unwrap();
        let services = setup_services(&dir).await;

        let response = router(Arc::clone(&services))
            .oneshot(Request::get("/catalog").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["channels"].as_array().map(Vec::len), Some(0));
        assert_eq!(body["stale"], false);
    }

    #[tokio::test]
    async fn test_stream_falls_back_to_catalog_url() {
        let base = fixture_server().await;
        let dir = TempDir::new().unwrap();
        let services = setup_services(&dir).await;
        services
            .playlist
            .rebuild(
                PlaylistSource::Url(format!("{base}/list.m3u")),
                RebuildOptions::default(),
            )
            .await
            .unwrap();

        let app = router(Arc::clone(&services));

        let response = app
            .clone()
            .oneshot(Request::get("/stream/static.one").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["url"], "http://origin.example/static");
        assert_eq!(body["resolved"], false);

        let response = app
            .oneshot(Request::get("/stream/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_catalog_search_and_skip() {
        let base = fixture_server().await;
        let dir = TempDir::new().unwrap();
        let services = setup_services(&dir).await;
        services
            .playlist
            .rebuild(
                PlaylistSource::Url(format!("{base}/news.m3u")),
                RebuildOptions::default(),
            )
            .await
            .unwrap();

        let app = router(Arc::clone(&services));
        let ids = |body: &serde_json::Value| {
            body["channels"]
                .as_array()
                .unwrap()
                .iter()
                .map(|c| c["id"].as_str().unwrap().to_string())
                .collect::<Vec<_>>()
        };

        let response = app
            .clone()
            .oneshot(Request::get("/catalog?search=news").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(ids(&body), vec!["news.one", "news.two", "news.three"]);
        assert_eq!(body["genres"], serde_json::json!(["Movies", "News"]));

        let response = app
            .clone()
            .oneshot(
                Request::get("/catalog?genre=News&search=NEWS&skip=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ids(&body_json(response).await), vec!["news.two", "news.three"]);

        let response = app
            .clone()
            .oneshot(Request::get("/catalog?skip=10").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(ids(&body_json(response).await).is_empty());

        let response = app
            .oneshot(Request::get("/catalog?skip=-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_resolver_template_download() {
        let base = fixture_server().await;
        let dir = TempDir::new().unwrap();
        let services = setup_services(&dir).await;
        let app = router(Arc::clone(&services));

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/resolver/download-template")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        services
            .generators
            .resolver()
            .acquire(&format!("{base}/resolver.sh"))
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::get("/api/resolver/download-template")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response
            .headers()
            .get("content-disposition")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(disposition.starts_with("attachment"), "{disposition}");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], RESOLVER_SCRIPT.as_bytes());
    }

    #[tokio::test]
    async fn test_generator_action_requires_url() {
        let dir = TempDir::new().unwrap();
        let services = setup_services(&dir).await;

        let response = router(services)
            .oneshot(
                Request::post("/api/generator")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"action":"download"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_reports_uptime_and_stats() {
        let dir = TempDir::new().unwrap();
        let services = setup_services(&dir).await;

        let response = router(services)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["generators"].is_array());
    }
}
