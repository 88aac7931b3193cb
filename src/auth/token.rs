// Bearer Token 提供者

use async_trait::async_trait;

/// Bearer Token 提供者
///
/// 每次网络请求前调用，返回 `None` 表示当前未登录
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_auth_token(&self) -> Option<String>;
}

/// 固定 Token
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: (!token.trim().is_empty()).then_some(token),
        }
    }

    /// 未登录状态
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_auth_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// 从环境变量读取 Token，每次调用都重新读取以便外部刷新
#[derive(Debug, Clone)]
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn get_auth_token(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .filter(|token| !token.trim().is_empty())
    }
}
