//! 脏组
//!
//! 同一个 (father, serial) 的脏缓冲挂在同一个组里，一起刷新到同一个块。

use super::list::{Chain, ListHead};
use super::page_buf::PageBuf;

/// 脏组槽位
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DirtyGroup {
    /// 组内脏缓冲链表，新加入的在头部
    pub list: ListHead,
    /// 组内缓冲数
    pub count: usize,
}

impl DirtyGroup {
    /// 是否空闲（没有身份）
    pub fn is_free(&self) -> bool {
        self.list.head.is_none()
    }

    /// 组身份：取链表头缓冲的 (father, serial)
    pub fn owner(&self, bufs: &[PageBuf]) -> Option<(u16, u16)> {
        self.list.head.map(|h| (bufs[h].father, bufs[h].serial))
    }

    /// 是否属于 (father, serial)
    pub fn is_owned_by(&self, bufs: &[PageBuf], father: u16, serial: u16) -> bool {
        self.owner(bufs) == Some((father, serial))
    }

    /// 缓冲是否在本组中
    pub fn contains(&self, bufs: &[PageBuf], idx: usize) -> bool {
        self.list.iter(bufs, Chain::Dirty).any(|i| i == idx)
    }

    /// 加入链表头
    pub fn link(&mut self, bufs: &mut [PageBuf], idx: usize) {
        self.list.push_front(bufs, Chain::Dirty, idx);
        self.count += 1;
    }

    /// 从组中摘下
    pub fn unlink(&mut self, bufs: &mut [PageBuf], idx: usize) {
        self.list.unlink(bufs, Chain::Dirty, idx);
        self.count = self.count.saturating_sub(1);
    }
}
