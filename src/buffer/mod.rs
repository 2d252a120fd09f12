//! 页缓冲池模块
//!
//! 固定数量的页缓冲，按 (father, serial, page_id) 查找，按访问顺序复用，
//! 脏页按 (father, serial) 分组等待刷新。
//!
//! # 主要组件
//!
//! - [`PageBufferPool`] - 缓冲池：查找、引用计数、克隆、脏组
//! - [`PageBuf`] - 单个缓冲的元数据
//! - [`BufHandle`] - 池内缓冲句柄
//! - [`ClonedBuf`] - 克隆缓冲，不在池的链表中
//! - [`BufMark`] - 缓冲内容状态
//!
//! # 使用示例
//!
//! ```rust,ignore
//! let h = dev.buf_new(StreamType::File, father, serial, 0)?;
//! dev.buf_write(h, 0, b"hello")?;
//! dev.buf_put(h)?;
//!
//! // 同组脏页达到上限时自动刷新，也可以手动刷新
//! dev.flush_group(father, serial)?;
//! ```

mod dirty;
mod list;
mod page_buf;
mod pool;

pub use page_buf::{BufHandle, BufMark, ClonedBuf, PageBuf, SlotState};
pub use pool::{PageBufferPool, PoolStats};
