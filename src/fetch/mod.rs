pub(crate) mod model;
pub use model::*;

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HOST, REFERER};
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::config::{ConfigStore, StoreError};
use crate::templates::Template;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Bounds `send()`, which resolves when the response headers arrive. The
/// budget therefore also covers connect and TLS setup, which are already
/// capped lower by [`CONNECT_TIMEOUT`].
pub const HEADER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Broad failure classes, used to pick how loudly a failed run is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Credential,
    Business,
    DataShape,
    Configuration,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("读取缓存配置异常: {0}")]
    Config(#[from] StoreError),
    #[error("请求失败: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("请求失败, 等待响应超过 {} 秒", .0.as_secs())]
    HeaderTimeout(Duration),
    #[error("请求失败, token 过期, 请在以下链接上拼接最新 token 后访问该链接刷新 token: \n{refresh_url}")]
    CredentialExpired { refresh_url: String },
    #[error("请求失败, 错误码：{code}")]
    UnexpectedStatus { code: u16 },
    #[error("响应体为空")]
    EmptyBody,
    #[error("无法读取响应体: {0}")]
    BodyRead(#[source] reqwest::Error),
    #[error("格式化响应体失败 ({source}), 原始响应体: {body}")]
    Malformed {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("业务响应失败: {message}")]
    Business { message: String },
    #[error("查询不到水电数据, 原始响应体: {body}")]
    NoData { body: String },
    #[error("水电数据异常, 原始响应体: {body}")]
    DataShape { body: String },
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Config(_) => ErrorKind::Configuration,
            FetchError::Transport(_)
            | FetchError::HeaderTimeout(_)
            | FetchError::UnexpectedStatus { .. }
            | FetchError::EmptyBody
            | FetchError::BodyRead(_) => ErrorKind::Transport,
            FetchError::CredentialExpired { .. } => ErrorKind::Credential,
            FetchError::Business { .. } => ErrorKind::Business,
            FetchError::Malformed { .. }
            | FetchError::NoData { .. }
            | FetchError::DataShape { .. } => ErrorKind::DataShape,
        }
    }

    /// Whether the next scheduled run may succeed without anyone acting.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

/// Queries the utility API and renders the normal email body.
#[derive(Debug, Clone)]
pub struct BalanceFetcher {
    client: Client,
    store: ConfigStore,
    template: Template,
    header_timeout: Duration,
}

impl BalanceFetcher {
    pub fn new(store: ConfigStore, template: Template) -> Result<Self, reqwest::Error> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;

        Ok(Self {
            client,
            store,
            template,
            header_timeout: HEADER_TIMEOUT,
        })
    }

    pub(crate) fn with_header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = timeout;
        self
    }

    pub async fn fetch(&self) -> Result<String, FetchError> {
        let live = self.store.get()?;
        let settings = live.settings();

        // Read at send time, a refresh may have landed since the last run.
        let authorization = live.authorization().await;

        let mut request = self
            .client
            .get(&settings.zhfd.request_url)
            .header(AUTHORIZATION, authorization);

        if !settings.zhfd.referer.is_empty() {
            request = request.header(REFERER, &settings.zhfd.referer);
        }
        // Empty means the one derived from the URL.
        if !settings.zhfd.host.is_empty() {
            request = request.header(HOST, &settings.zhfd.host);
        }

        let request = request.send();

        // `send` resolves once the response headers are in.
        let response = tokio::time::timeout(self.header_timeout, request)
            .await
            .map_err(|_| FetchError::HeaderTimeout(self.header_timeout))?
            .map_err(FetchError::Transport)?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => {
                return Err(FetchError::CredentialExpired {
                    refresh_url: live.refresh_url(),
                });
            }
            status => {
                return Err(FetchError::UnexpectedStatus {
                    code: status.as_u16(),
                });
            }
        }

        let bytes = response.bytes().await.map_err(FetchError::BodyRead)?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        let body = String::from_utf8_lossy(&bytes);
        let reading = parse_reading(&body)?;

        tracing::debug!(
            electricity = %reading.electricity,
            cold_water = %reading.cold_water,
            hot_water = %reading.hot_water,
            "Utility balance fetched"
        );

        Ok(self.render(&settings.mail.subject, &reading))
    }

    pub fn render(&self, subject: &str, reading: &UtilityReading) -> String {
        self.template
            .render()
            .set("title", subject)
            .set("electricQuantity", reading.electricity.as_str())
            .set("coldWater", reading.cold_water.as_str())
            .set("hotWater", reading.hot_water.as_str())
            .build()
    }
}
