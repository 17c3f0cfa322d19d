//! # Client
//!
//! 负载均衡的消息发送客户端。
//!
//! - `sync` 模式：`send` 等待服务端 ack，失败按 `retry_count` 轮换 endpoint 重试
//! - `async` 模式：`send` 写入有界缓冲区，后台任务按批发送
//! - endpoint 列表可在运行中原子替换

pub mod balancer;
pub mod dispatcher;
pub mod error;
pub mod transport;

pub use balancer::{LoadBalancer, StaticLoadBalancer};
pub use dispatcher::{ClientDispatcher, ClientStats};
pub use error::ClientError;
pub use transport::Transport;
