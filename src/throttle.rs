//! 高频事件流的吞吐控制。
//!
//! 这些工具位于入站事件与其消费者之间。它们都在当前tokio运行时上派生任务，并在被
//! 丢弃时停止各自的定时器。
//!
//! Throughput control for high-frequency event streams.
//!
//! These utilities sit between inbound events and their consumers:
//!
//! - [`debounce`] fires once the stream has been quiet for a delay.
//! - [`throttle`] fires at most once per window, keeping the latest value for a
//!   trailing call so nothing is silently lost, only coalesced.
//! - [`throttle_frame`] coalesces everything within one display frame.
//! - [`BatchProcessor`] flushes on size or on maximum wait, whichever comes first.
//!
//! All of them spawn onto the current tokio runtime and stop their timers when
//! dropped.

mod batch;
mod debounce;
mod frame;
mod limiter;

pub use batch::BatchProcessor;
pub use debounce::{Debounced, debounce};
pub use frame::{FRAME_INTERVAL, FrameThrottled, throttle_frame, throttle_frame_with};
pub use limiter::{Throttled, throttle};
