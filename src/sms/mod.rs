//! 短信网关客户端
//! OAuth2 令牌管理 + 类型化的发送/回调封装

pub mod gateway;
pub mod oauth;

pub use gateway::{parse_callback, CallbackInfos, SmsGateway};
pub use oauth::{AuthInfos, GatewayClient, TokenInfos};
