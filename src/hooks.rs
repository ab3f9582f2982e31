//! 面向使用方的连接视图。
//!
//! 每个钩子通过 [`ConnectionManager::on`] 注册一个处理器，将载荷送入缓冲区或吞吐控制，
//! 只对外暴露派生值。丢弃钩子会释放其注册并停止其定时器。
//!
//! Consumer-side views over the connection.
//!
//! Each hook registers one handler through [`ConnectionManager::on`], feeds the
//! payloads through a buffer or throughput control, and exposes only the derived
//! value. Dropping a hook releases its registration and stops its timers.
//!
//! [`ConnectionManager::on`]: crate::manager::ConnectionManager::on

mod aggregate;
mod batched;
mod conditional;
mod history;
mod latest;
mod subscriber;
mod throttled;

pub use aggregate::{AGGREGATE_WINDOW, Aggregated};
pub use batched::Batched;
pub use conditional::Conditional;
pub use history::EventHistory;
pub use latest::{Latest, LatestValue, STALE_POLL_INTERVAL};
pub use subscriber::Subscriber;
pub use throttled::ThrottledValue;

#[cfg(test)]
mod tests;
