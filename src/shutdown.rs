//! 进程信号监听

use std::fmt;

use taskhub_errors::{AppError, AppResult};

/// 触发应用停止的进程信号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Interrupt,
    Terminate,
    Quit,
    Hangup,
}

/// 默认监听的信号：SIGINT、SIGTERM、SIGQUIT
pub const DEFAULT_SIGNALS: [Signal; 3] = [Signal::Interrupt, Signal::Terminate, Signal::Quit];

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Quit => "SIGQUIT",
            Signal::Hangup => "SIGHUP",
        }
    }

    #[cfg(unix)]
    fn kind(&self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            Signal::Interrupt => SignalKind::interrupt(),
            Signal::Terminate => SignalKind::terminate(),
            Signal::Quit => SignalKind::quit(),
            Signal::Hangup => SignalKind::hangup(),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 已安装的信号处理器，`recv` 返回最先收到的信号
pub struct SignalListener {
    #[cfg(unix)]
    streams: Vec<(Signal, tokio::signal::unix::Signal)>,
    #[cfg(not(unix))]
    signals: Vec<Signal>,
}

impl SignalListener {
    #[cfg(unix)]
    pub fn install(signals: &[Signal]) -> AppResult<Self> {
        let mut streams = Vec::with_capacity(signals.len());
        for signal in signals {
            let stream = tokio::signal::unix::signal(signal.kind())
                .map_err(|e| AppError::internal(format!("安装{signal}信号处理器失败: {e}")))?;
            streams.push((*signal, stream));
        }
        Ok(Self { streams })
    }

    #[cfg(not(unix))]
    pub fn install(signals: &[Signal]) -> AppResult<Self> {
        Ok(Self {
            signals: signals.to_vec(),
        })
    }

    /// 等待任一信号；没有配置信号时永远挂起
    #[cfg(unix)]
    pub async fn recv(&mut self) -> Option<Signal> {
        if self.streams.is_empty() {
            return std::future::pending().await;
        }

        let waits = self.streams.iter_mut().map(|(signal, stream)| {
            let signal = *signal;
            Box::pin(async move { stream.recv().await.map(|_| signal) })
        });
        let (received, _, _) = futures::future::select_all(waits).await;
        received
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> Option<Signal> {
        if !self.signals.contains(&Signal::Interrupt) {
            return std::future::pending().await;
        }
        tokio::signal::ctrl_c().await.ok().map(|_| Signal::Interrupt)
    }
}
