use thiserror::Error;

use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
};

use crate::job::JobError;

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("请求参数错误")]
    BadParams,
    #[error("定时器至少触发 1 次后才能刷新配置")]
    NotReady,
    #[error("定时器未初始化完成")]
    SchedulerNotReady,
    #[error("发送邮件异常: {0}")]
    Resend(#[from] JobError),
}

impl RefreshError {
    pub fn status(&self) -> StatusCode {
        match self {
            RefreshError::BadParams => StatusCode::BAD_REQUEST,
            RefreshError::NotReady => StatusCode::BAD_REQUEST,
            RefreshError::SchedulerNotReady => StatusCode::INTERNAL_SERVER_ERROR,
            RefreshError::Resend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RefreshError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "Config refresh rejected");
        (self.status(), self.to_string()).into_response()
    }
}
