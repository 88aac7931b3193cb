// 认证模块
//
// 上传引擎只消费一个能力：获取当前的 Bearer Token

pub mod token;

pub use token::{EnvTokenProvider, StaticTokenProvider, TokenProvider};
