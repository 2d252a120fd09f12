//! 块信息缓存模块
//!
//! 缓存每个物理块的 spare/tag 数组，页级别按需载入。
//!
//! # 主要组件
//!
//! - [`BlockInfoCache`] - 块信息缓存管理器，使用 lru crate 维护访问顺序
//! - [`BlockInfoRef`] - 一次获取得到的租约，归还前该项不会被重新分配
//! - [`PageSpare`] - 单页 spare 缓存
//! - [`SpareFlags`] - spare 状态标志
//!
//! # 使用示例
//!
//! ```rust,ignore
//! let mut bc = BlockInfoCache::new(DEFAULT_CACHED_BLOCKS, pages_per_block)?;
//!
//! let info = bc.acquire(block)?;
//! bc.load(&mut flash, &info, Pages::All)?;
//! let free = bc.free_pages_count(&info);
//! bc.release(info)?;
//! ```

mod cache;
mod spare;

pub use cache::{BlockInfoCache, BlockInfoRef};
pub use spare::{PageSpare, SpareFlags};
