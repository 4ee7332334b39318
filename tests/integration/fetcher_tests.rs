use super::*;
use listing_watcher::config::SearchConfig;
use listing_watcher::HttpFetcher;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn feed_body() -> String {
    json!({
        "pageProps": {
            "feed": {
                "private": [
                    {
                        "token": "t1",
                        "price": "4,500 ₪",
                        "additionalDetails": { "roomsCount": 3 },
                        "address": {
                            "street": { "text": "Herzl" },
                            "house": { "number": 12 },
                            "city": { "text": "Haifa" }
                        }
                    },
                    { "token": "t2", "price": 3900, "rooms": 2.5 },
                    { "token": "t1", "price": 100, "rooms": 1 }
                ]
            }
        }
    })
    .to_string()
}

fn search() -> SearchConfig {
    SearchConfig {
        max_price: Some(5000),
        min_rooms: Some(2.5),
        max_rooms: None,
        area_codes: vec!["5".to_string()],
        extra_params: BTreeMap::new(),
    }
}

async fn fetcher_for(server: &MockServer) -> HttpFetcher {
    HttpFetcher::new(&api_config(format!("{}/rent.json", server.uri())), &search()).expect("fetcher")
}

#[tokio::test]
async fn test_fetch_parses_feed_and_sends_search_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rent.json"))
        .and(query_param("maxPrice", "5000"))
        .and(query_param("minRooms", "2.5"))
        .and(query_param("area", "5"))
        .and(header("user-agent", "agent-a"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(feed_body(), "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let mut fetcher = fetcher_for(&server).await;
    let outcome = fetcher.fetch().await.expect("fetch ok");

    let ids: Vec<&str> = outcome.listings.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "t2"]);
    assert_eq!(outcome.listings[0].price, 4500);
    assert_eq!(outcome.listings[0].address.as_deref(), Some("Herzl 12, Haifa"));
    assert_eq!(outcome.listings[1].url, "https://listings.example.com/item/t2");
    assert_eq!(outcome.response_hash.len(), 16);
}

#[tokio::test]
async fn test_user_agent_rotates_between_requests() {
    let server = MockServer::start().await;
    for agent in ["agent-a", "agent-b"] {
        Mock::given(method("GET"))
            .and(header("user-agent", agent))
            .respond_with(ResponseTemplate::new(200).set_body_raw(feed_body(), "application/json"))
            .expect(1)
            .mount(&server)
            .await;
    }

    let mut fetcher = fetcher_for(&server).await;
    fetcher.fetch().await.expect("first fetch");
    fetcher.fetch().await.expect("second fetch");
}

#[tokio::test]
async fn test_static_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("referer", "https://listings.example.com/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(feed_body(), "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let mut api = api_config(format!("{}/rent.json", server.uri()));
    api.headers
        .insert("Referer".to_string(), "https://listings.example.com/".to_string());
    let mut fetcher = HttpFetcher::new(&api, &search()).unwrap();

    fetcher.fetch().await.expect("fetch ok");
}

#[tokio::test]
async fn test_blocked_and_rate_limited_are_distinct() {
    for (status, expected) in [(403u16, "403"), (429, "429"), (503, "503")] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let err = fetcher_for(&server).await.fetch().await.unwrap_err();
        assert!(matches!(err, AppError::Network(_)), "{:?}", err);
        assert!(err.to_string().contains(expected), "{}", err);
    }
}

#[tokio::test]
async fn test_captcha_page_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<html><head><title>ShieldSquare Captcha</title></head></html>",
            "text/html",
        ))
        .mount(&server)
        .await;

    let err = fetcher_for(&server).await.fetch().await.unwrap_err();
    assert!(matches!(err, AppError::Network(_)));
}

#[tokio::test]
async fn test_unexpected_shape_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"pageProps":{}}"#, "application/json"))
        .mount(&server)
        .await;

    let err = fetcher_for(&server).await.fetch().await.unwrap_err();
    assert!(matches!(err, AppError::Parse { .. }));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(feed_body(), "application/json")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut api = api_config(format!("{}/rent.json", server.uri()));
    api.request_timeout = 1;
    let mut fetcher = HttpFetcher::new(&api, &search()).unwrap();

    let err = fetcher.fetch().await.unwrap_err();
    assert!(matches!(err, AppError::Network(_)));
    assert!(err.to_string().contains("timed out"), "{}", err);
}
