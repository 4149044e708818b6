use serde::{Deserialize, Serialize};

/// Redis缓存配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub url: String,
    /// 多路复用连接的数量
    pub pool_size: u32,
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            pool_size: 4,
            key_prefix: "taskhub:".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("Redis URL不能为空"));
        }

        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(anyhow::anyhow!("Redis URL必须以redis://或rediss://开头"));
        }

        if self.pool_size == 0 {
            return Err(anyhow::anyhow!("Redis连接池大小必须大于0"));
        }

        Ok(())
    }
}
