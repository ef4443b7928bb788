use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::IntoResponse,
};

use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use crate::AppState;
use crate::error::RefreshError;
use crate::job::JobOutcome;

pub const REFRESH_OK: &str = "配置更新成功";

#[derive(Debug, Deserialize)]
pub struct RefreshParams {
    /// `1` sends the mail again right after the update.
    #[serde(rename = "re-send-mail", default, deserialize_with = "empty_as_none")]
    pub re_send_mail: Option<i64>,
    pub auth: String,
}

/// `re-send-mail=` with no value is the same as leaving it out.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

impl RefreshParams {
    pub fn resend(&self) -> bool {
        self.re_send_mail == Some(1)
    }
}

#[derive(Debug)]
pub enum RefreshOutcome {
    Updated,
    Resent(JobOutcome),
}

impl RefreshOutcome {
    pub fn message(&self) -> String {
        match self {
            RefreshOutcome::Resent(JobOutcome::FallbackDelivered(e)) => {
                format!("{}, 但重新获取数据失败, 已发送异常通知邮件: {}", REFRESH_OK, e)
            }
            _ => REFRESH_OK.to_string(),
        }
    }
}

/// Swaps in a new upstream credential and, when asked, reruns the mail job
/// before returning.
pub async fn refresh_credential(
    state: &AppState,
    auth: String,
    resend: bool,
) -> Result<RefreshOutcome, RefreshError> {
    if auth.trim().is_empty() {
        return Err(RefreshError::BadParams);
    }

    state
        .config
        .update_credential(auth)
        .await
        .map_err(|_| RefreshError::NotReady)?;

    if !resend {
        return Ok(RefreshOutcome::Updated);
    }

    let job = state.job.get().ok_or(RefreshError::SchedulerNotReady)?;

    tracing::info!("Resending mail after credential refresh");
    let outcome = job.send(false).await?;

    Ok(RefreshOutcome::Resent(outcome))
}

pub async fn config_refresh(
    State(state): State<Arc<AppState>>,
    params: Result<Query<RefreshParams>, QueryRejection>,
) -> Result<impl IntoResponse, RefreshError> {
    let Query(params) = params.map_err(|e| {
        tracing::debug!(error = %e, "Invalid refresh parameters");
        RefreshError::BadParams
    })?;

    let resend = params.resend();
    let outcome = refresh_credential(&state, params.auth, resend).await?;

    Ok((StatusCode::OK, outcome.message()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::store::tests::sample_config;
    use crate::email::testing::MemoryMailer;
    use crate::fetch::BalanceFetcher;
    use crate::fetch::model::tests::{body_with_water, COLD_FIRST};
    use crate::job::MailJob;
    use crate::server::router;
    use crate::templates::Template;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn install_job(state: &AppState, mailer: Arc<MemoryMailer>) {
        let fetcher = BalanceFetcher::new(state.config.clone(), Template::new("${coldWater}")).unwrap();
        let job = MailJob::new(fetcher, Template::new("${error}"), mailer, "subject");
        assert!(state.job.install(Arc::new(job)));
    }

    async fn call(state: Arc<AppState>, uri: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[test]
    fn test_resend_flag() {
        let params = |v| RefreshParams { re_send_mail: v, auth: "x".into() };
        assert!(params(Some(1)).resend());
        assert!(!params(Some(0)).resend());
        assert!(!params(Some(2)).resend());
        assert!(!params(None).resend());
    }

    #[tokio::test]
    async fn test_not_ready_before_config_is_cached() {
        let state = AppState::new();

        let (status, body) = call(state, "/config-refresh?auth=NEW").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "定时器至少触发 1 次后才能刷新配置");
    }

    #[tokio::test]
    async fn test_bad_params() {
        let state = AppState::new();
        state.config.initialize(sample_config("http://localhost")).unwrap();

        for uri in [
            "/config-refresh",
            "/config-refresh?auth=",
            "/config-refresh?auth=NEW&re-send-mail=yes",
        ] {
            let (status, body) = call(state.clone(), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body, "请求参数错误");
        }

        assert_eq!(state.config.get().unwrap().authorization().await, "OLD");
    }

    #[tokio::test]
    async fn test_update_without_resend() {
        let state = AppState::new();
        state.config.initialize(sample_config("http://localhost")).unwrap();

        let (status, body) = call(state.clone(), "/config-refresh?re-send-mail=0&auth=NEW").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, REFRESH_OK);
        assert_eq!(state.config.get().unwrap().authorization().await, "NEW");
    }

    #[tokio::test]
    async fn test_empty_resend_flag_only_updates() {
        let state = AppState::new();
        state.config.initialize(sample_config("http://localhost")).unwrap();

        let (status, body) = call(state.clone(), "/config-refresh?re-send-mail=&auth=NEW").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, REFRESH_OK);
        assert_eq!(state.config.get().unwrap().authorization().await, "NEW");
    }

    #[tokio::test]
    async fn test_resend_before_job_is_installed() {
        let state = AppState::new();
        state.config.initialize(sample_config("http://localhost")).unwrap();

        let (status, body) = call(state.clone(), "/config-refresh?re-send-mail=1&auth=NEW").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "定时器未初始化完成");
        assert_eq!(state.config.get().unwrap().authorization().await, "NEW");
    }

    #[tokio::test]
    async fn test_resend_uses_new_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Authorization", "NEW"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body_with_water(COLD_FIRST)))
            .expect(1)
            .mount(&server)
            .await;

        let state = AppState::new();
        state.config.initialize(sample_config(&server.uri())).unwrap();
        let mailer = Arc::new(MemoryMailer::default());
        install_job(&state, mailer.clone());

        let (status, body) = call(state.clone(), "/config-refresh?re-send-mail=1&auth=NEW").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, REFRESH_OK);

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].html, "3.5");
    }

    #[tokio::test]
    async fn test_resend_failure_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body_with_water(COLD_FIRST)))
            .mount(&server)
            .await;

        let state = AppState::new();
        state.config.initialize(sample_config(&server.uri())).unwrap();
        install_job(&state, Arc::new(MemoryMailer::failing()));

        let (status, body) = call(state, "/config-refresh?re-send-mail=1&auth=NEW").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.starts_with("发送邮件异常: "));
    }

    #[tokio::test]
    async fn test_resend_still_failing_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let state = AppState::new();
        state.config.initialize(sample_config(&server.uri())).unwrap();
        let mailer = Arc::new(MemoryMailer::default());
        install_job(&state, mailer.clone());

        let (status, body) = call(state, "/config-refresh?re-send-mail=1&auth=STILL-BAD").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with(REFRESH_OK));
        assert!(body.contains("token 过期"));
        assert_eq!(mailer.sent().len(), 1);
    }
}
