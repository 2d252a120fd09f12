//! 闪存抽象
//!
//! - [`FlashDevice`] - 驱动需要实现的底层接口（页读写、擦除、spare 读取）
//! - [`FlashDev`] - 驱动包装器，负责 tag 编码和统计
//! - [`PageTag`] - 每页 spare 区的持久化元数据
//! - [`TimeStampPolicy`] - 块代时间戳的排序策略

mod device;
mod tag;
mod timestamp;

pub use device::{FlashDev, FlashDevice, FlashGeometry, FlashStats};
pub use tag::{DecodedTag, PageTag};
pub use timestamp::{CyclicTimeStamp, TimeStampPolicy};
