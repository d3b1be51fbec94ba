//! HTTP-level tests for `WikiClient` against a mock MediaWiki server.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wiki::{LinkStatus, TitleSink, WikiClient, WikiConfig, WikiSource};

fn test_config(server: &MockServer, cache_dir: &std::path::Path) -> WikiConfig {
    WikiConfig {
        site_template: server.uri(),
        wikidata_api: format!("{}/wd/api.php", server.uri()),
        pageviews_api: format!("{}/pageviews", server.uri()),
        baidu_base: format!("{}/baidu/", server.uri()),
        cdt_base: format!("{}/cdt/", server.uri()),
        cache_dir: cache_dir.to_path_buf(),
        requests_per_minute: 60_000,
        max_inflight: 8,
        request_timeout: Duration::from_secs(5),
        baidu_delay_secs: (0.0, 0.01),
        ..WikiConfig::default()
    }
}

#[derive(Default)]
struct RecordingSink {
    updates: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl TitleSink for RecordingSink {
    async fn update_title(&self, old: &str, new: &str) {
        self.updates.lock().await.push((old.to_string(), new.to_string()));
    }
}

#[tokio::test]
async fn get_qcode_resolves_and_caches() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .and(query_param("action", "query"))
        .and(query_param("titles", "邓小平"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"pages": [{
                "title": "邓小平",
                "pageprops": {"wikibase_item": "Q16977"}
            }]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = WikiClient::new(test_config(&server, dir.path())).unwrap();

    let hit = client.get_qcode("邓小平", "zh").await.unwrap();
    assert_eq!(hit.qcode, "Q16977");
    assert_eq!(hit.title, "邓小平");

    // Second lookup is served from the reverse map; the mock's expect(1)
    // fails the test if another request goes out.
    let hit = client.get_qcode("邓小平", "zh").await.unwrap();
    assert_eq!(hit.qcode, "Q16977");
}

#[tokio::test]
async fn get_qcode_reports_redirected_title_to_sink() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .and(query_param("titles", "鄧小平"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {
                "redirects": [{"from": "鄧小平", "to": "邓小平"}],
                "pages": [{
                    "title": "邓小平",
                    "pageprops": {"wikibase_item": "Q16977"}
                }]
            }
        })))
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let client = WikiClient::new(test_config(&server, dir.path()))
        .unwrap()
        .with_title_sink(sink.clone());

    let hit = client.get_qcode("鄧小平", "zh").await.unwrap();
    assert_eq!(hit.title, "邓小平");
    assert_eq!(
        sink.updates.lock().await.as_slice(),
        &[("鄧小平".to_string(), "邓小平".to_string())]
    );
}

#[tokio::test]
async fn get_qcode_rejects_disambiguation_pages() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"pages": [{
                "title": "李伟",
                "pageprops": {"wikibase_item": "Q999", "disambiguation": ""}
            }]}
        })))
        .mount(&server)
        .await;

    let client = WikiClient::new(test_config(&server, dir.path())).unwrap();
    assert!(client.get_qcode("李伟", "zh").await.is_none());
}

#[tokio::test]
async fn status_429_is_abandoned_not_retried() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let client = WikiClient::new(test_config(&server, dir.path())).unwrap();
    assert!(client.get_qcode("某人", "en").await.is_none());
}

#[tokio::test]
async fn link_status_classifies_and_caches_ok_pages() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/w/index.php"))
        .and(query_param("action", "raw"))
        .respond_with(ResponseTemplate::new(200).set_body_string("'''正文'''"))
        .expect(1)
        .mount(&server)
        .await;

    let client = WikiClient::new(test_config(&server, dir.path())).unwrap();

    let (status, _) = client.check_link_status("某个条目", "zh").await;
    assert_eq!(status, LinkStatus::Ok);

    // Cache hit; expect(1) guards against a second fetch.
    let (status, _) = client.check_link_status("某个条目", "zh").await;
    assert_eq!(status, LinkStatus::Ok);
}

#[tokio::test]
async fn missing_zh_page_falls_back_to_baidu() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/w/index.php"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/baidu/.+"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = WikiClient::new(test_config(&server, dir.path())).unwrap();
    let (status, _) = client.check_link_status("某企业家", "zh").await;
    assert_eq!(status, LinkStatus::Baidu);
}

#[tokio::test]
async fn missing_zh_page_falls_back_to_cdt_when_baidu_misses() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/w/index.php"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/baidu/.+"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/cdt/.+"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = WikiClient::new(test_config(&server, dir.path())).unwrap();
    let (status, _) = client.check_link_status("异议人士", "zh").await;
    assert_eq!(status, LinkStatus::Cdt);
}

#[tokio::test]
async fn wikitext_fetch_simplifies_zh_content() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"pages": [{
                "title": "邓小平",
                "pageprops": {"wikibase_item": "Q16977"}
            }]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/w/index.php"))
        .and(query_param("title", "邓小平"))
        .respond_with(ResponseTemplate::new(200).set_body_string("鄧小平是政治家"))
        .mount(&server)
        .await;

    let client = WikiClient::new(test_config(&server, dir.path())).unwrap();
    let (text, final_title) = client.get_wikitext("邓小平", "zh").await.unwrap();
    assert_eq!(final_title, "邓小平");
    assert_eq!(text, "邓小平是政治家");
}

#[tokio::test]
async fn authoritative_title_by_qcode_follows_sitelink() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/wd/api.php"))
        .and(query_param("action", "wbgetentities"))
        .and(query_param("ids", "Q16977"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entities": {"Q16977": {
                "sitelinks": {"zhwiki": {"title": "邓小平"}}
            }}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"pages": [{
                "title": "邓小平",
                "pageprops": {"wikibase_item": "Q16977"}
            }]}
        })))
        .mount(&server)
        .await;

    let client = WikiClient::new(test_config(&server, dir.path())).unwrap();
    let result = client.get_authoritative_title_by_qcode("Q16977", "zh").await;
    assert_eq!(result.title.as_deref(), Some("邓小平"));
    assert_eq!(result.status, wiki::AuthStatus::Ok);
}

#[tokio::test]
async fn caches_persist_across_clients() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"pages": [{
                "title": "邓小平",
                "pageprops": {"wikibase_item": "Q16977"}
            }]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    {
        let client = WikiClient::new(test_config(&server, dir.path())).unwrap();
        client.get_qcode("邓小平", "zh").await.unwrap();
        client.save_caches().await.unwrap();
    }

    // A fresh client must answer from the persisted cache.
    let client = WikiClient::new(test_config(&server, dir.path())).unwrap();
    let hit = client.get_qcode("邓小平", "zh").await.unwrap();
    assert_eq!(hit.qcode, "Q16977");
}
