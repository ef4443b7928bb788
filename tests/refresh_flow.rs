use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use balance_mailer::config::ConfigBuilder;
use balance_mailer::email::{MailError, Mailer};
use balance_mailer::fetch::BalanceFetcher;
use balance_mailer::job::{JobOutcome, MailJob};
use balance_mailer::server::router;
use balance_mailer::templates::Template;
use balance_mailer::AppState;

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Mailer for Outbox {
    async fn send(&self, _subject: &str, html: &str) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(html.to_string());
        Ok(())
    }
}

fn config_toml(request_url: &str) -> String {
    format!(
        r#"
cron = "30 9 * * *"

[server]
public_host = "10.1.2.3"

[smtp]
host = "smtp.example.com"
port = 465
username = "bot@example.com"
credential = "secret"

[mail]
from = "bot@example.com"
to = ["me@example.com"]
subject = "水电余额提醒"

[zhfd]
requestUrl = "{request_url}"
referer = "https://zhfd.example.com/"
host = "zhfd.example.com"
authorization = "OLD"
"#
    )
}

const BODY: &str = r#"{"success":true,"message":"","data":{"records":[{"meterAddForms":[{"residualElectricity":"88.8"}],"waterAddForms":[{"remarks":"热水","rechargeTonnage":"0.7"},{"remarks":"冷水","rechargeTonnage":"6.1"}]}]}}"#;

#[tokio::test]
async fn expired_credential_is_refreshed_and_mail_resent() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rent"))
        .and(header("Authorization", "OLD"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rent"))
        .and(header("Authorization", "NEW"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
        .expect(1)
        .mount(&upstream)
        .await;

    let config = ConfigBuilder::from_toml(&config_toml(&format!("{}/api/rent", upstream.uri())))
        .unwrap()
        .build()
        .unwrap();

    let state = AppState::new();
    state.config.initialize(config).unwrap();

    let outbox = Arc::new(Outbox::default());
    let fetcher = BalanceFetcher::new(
        state.config.clone(),
        Template::new("电 ${electricQuantity} / 冷 ${coldWater} / 热 ${hotWater}"),
    )
    .unwrap();
    let job = Arc::new(MailJob::new(
        fetcher,
        Template::new("${error}"),
        outbox.clone(),
        "水电余额提醒",
    ));
    state.job.install(job.clone());

    // Scheduled run with the stale credential.
    let outcome = job.send(false).await.unwrap();
    assert!(matches!(outcome, JobOutcome::FallbackDelivered(_)));
    {
        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("http://10.1.2.3:54321/config-refresh?re-send-mail=1&auth="));
    }

    // The user follows the link with a fresh token appended.
    let response = router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/config-refresh?re-send-mail=1&auth=NEW")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(std::str::from_utf8(&bytes).unwrap(), "配置更新成功");

    assert_eq!(state.config.get().unwrap().authorization().await, "NEW");

    let sent = outbox.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1], "电 88.8 / 冷 6.1 / 热 0.7");
}
