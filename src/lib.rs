//! nandfs_core: NAND 闪存文件系统的缓冲核心
//!
//! 位于文件系统树索引与闪存驱动之间的缓冲层：
//! - **块信息缓存**：按物理块缓存每页 spare/tag，页级别按需载入
//! - **页缓冲池**：固定数量的页缓冲，按身份查找、按访问顺序复用
//! - **脏组刷新**：同一节点的脏页成组写入，支持追加、新建块和块恢复三种策略
//!
//! # 示例
//!
//! ```rust,ignore
//! use nandfs_core::{Device, DeviceConfig, FlashDevice, StreamType, TreeIndex, Result};
//!
//! // 实现 FlashDevice 和 TreeIndex trait
//! struct MyNand {
//!     // ...
//! }
//!
//! impl FlashDevice for MyNand {
//!     // 实现必要的方法
//!     // ...
//! }
//!
//! fn main() -> Result<()> {
//!     let mut dev = Device::new(MyNand::new(), MyTree::load(), DeviceConfig::default())?;
//!
//!     // 写一页
//!     let h = dev.buf_new(StreamType::Data, file, data_serial, 0)?;
//!     dev.buf_write(h, 0, b"hello")?;
//!     dev.buf_put(h)?;
//!
//!     dev.flush_all()?;
//!     Ok(())
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`consts`] - 常量定义
//! - [`types`] - 流类型与树节点
//! - [`flash`] - 闪存驱动抽象、tag 编解码、时间戳
//! - [`tree`] - 树索引接口
//! - [`block_info`] - 块信息缓存
//! - [`buffer`] - 页缓冲池
//! - [`flush`] - 脏组刷新
//! - [`device`] - 设备上下文

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 常量定义
pub mod consts;

/// 数据结构定义
pub mod types;

/// 闪存驱动抽象
pub mod flash;

/// 树索引接口
pub mod tree;

/// 块信息缓存
pub mod block_info;

/// 页缓冲池
pub mod buffer;

/// 脏组刷新
pub mod flush;

/// 设备上下文
pub mod device;

/// 校验和计算
pub(crate) mod crc;

#[cfg(test)]
pub(crate) mod testing;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 数据结构
pub use types::{Pages, StreamType, TreeNode};

// 闪存
pub use flash::{CyclicTimeStamp, DecodedTag, FlashDev, FlashDevice, FlashGeometry, FlashStats, PageTag, TimeStampPolicy};

// 树索引
pub use tree::TreeIndex;

// 块信息缓存
pub use block_info::{BlockInfoCache, BlockInfoRef, PageSpare, SpareFlags};

// 页缓冲池
pub use buffer::{BufHandle, BufMark, ClonedBuf, PageBuf, PageBufferPool, PoolStats, SlotState};

// 刷新
pub use flush::FlushStrategy;

// 设备
pub use device::{Device, DeviceConfig};
