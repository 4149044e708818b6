use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;


/// 业务错误的机器可读原因码
///
/// HTTP层依据原因码映射状态码，任务运行器只负责记录。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    NotFound,
    Duplicate,
    InvalidState,
    Unauthorized,
    Forbidden,
    BadRequest,
    UserDisabled,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::NotFound => "not_found",
            ReasonCode::Duplicate => "duplicate",
            ReasonCode::InvalidState => "invalid_state",
            ReasonCode::Unauthorized => "unauthorized",
            ReasonCode::Forbidden => "forbidden",
            ReasonCode::BadRequest => "bad_request",
            ReasonCode::UserDisabled => "user_disabled",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 错误分类，决定日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 基础设施的意外故障（数据库、缓存、消息队列等）
    Internal,
    /// 违反业务规则，携带原因码
    Business,
    /// 输入格式校验失败
    Validation,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("task already exists: {name}")]
    TaskAlreadyExists { name: String },
    #[error("task not found: {name}")]
    TaskNotFound { name: String },
    #[error("invalid expression: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("无效的参数: {0}")]
    InvalidArgument(String),
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    #[error("context canceled")]
    Cancelled,
    #[error("任务发生panic: {0}")]
    Panic(String),
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("缓存错误: {0}")]
    Cache(#[from] redis::RedisError),
    #[error("消息队列错误: {0}")]
    MessageQueue(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("内部错误: {0}")]
    Internal(String),
    #[error("{message}")]
    Business { reason: ReasonCode, message: String },
    #[error("数据验证失败: {0}")]
    Validation(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn task_already_exists<S: Into<String>>(name: S) -> Self {
        Self::TaskAlreadyExists { name: name.into() }
    }
    pub fn task_not_found<S: Into<String>>(name: S) -> Self {
        Self::TaskNotFound { name: name.into() }
    }
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }
    pub fn message_queue<S: Into<String>>(msg: S) -> Self {
        Self::MessageQueue(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn business<S: Into<String>>(reason: ReasonCode, msg: S) -> Self {
        Self::Business {
            reason,
            message: msg.into(),
        }
    }
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::business(ReasonCode::NotFound, msg)
    }
    pub fn duplicate<S: Into<String>>(msg: S) -> Self {
        Self::business(ReasonCode::Duplicate, msg)
    }
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::business(ReasonCode::InvalidState, msg)
    }
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        Self::business(ReasonCode::Unauthorized, msg)
    }
    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        Self::business(ReasonCode::Forbidden, msg)
    }
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        Self::business(ReasonCode::BadRequest, msg)
    }
    pub fn user_disabled<S: Into<String>>(msg: S) -> Self {
        Self::business(ReasonCode::UserDisabled, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Business { .. }
            | AppError::TaskAlreadyExists { .. }
            | AppError::TaskNotFound { .. } => ErrorKind::Business,
            AppError::Validation(_) | AppError::InvalidArgument(_) | AppError::InvalidCron { .. } => {
                ErrorKind::Validation
            }
            _ => ErrorKind::Internal,
        }
    }

    /// 业务与校验错误附带的原因码
    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            AppError::Business { reason, .. } => Some(*reason),
            AppError::TaskAlreadyExists { .. } => Some(ReasonCode::Duplicate),
            AppError::TaskNotFound { .. } => Some(ReasonCode::NotFound),
            AppError::Validation(_) | AppError::InvalidArgument(_) | AppError::InvalidCron { .. } => {
                Some(ReasonCode::BadRequest)
            }
            _ => None,
        }
    }

    /// 上下文被取消产生的错误，生命周期管理器不会把它当作致命错误
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Cache(_)
                | AppError::MessageQueue(_)
                | AppError::Timeout(_)
                | AppError::DeadlineExceeded
        )
    }

    pub fn user_message(&self) -> &str {
        match self {
            AppError::Business { message, .. } => message,
            AppError::TaskNotFound { .. } => "请求的任务不存在",
            AppError::TaskAlreadyExists { .. } => "任务已存在",
            AppError::Validation(_) | AppError::InvalidArgument(_) => "输入数据验证失败",
            AppError::InvalidCron { .. } => "CRON表达式无效",
            AppError::Timeout(_) | AppError::DeadlineExceeded => "操作超时，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{err:#}"))
    }
}
