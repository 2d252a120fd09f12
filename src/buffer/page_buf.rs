//! 页缓冲结构
//!
//! 每个页缓冲描述一页大小的数据，数据本身存放在缓冲池的连续区域中，
//! 这里只保存身份、状态和链表链接。

use crate::types::StreamType;

/// 缓冲内容状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufMark {
    /// 无有效内容，身份无意义
    Empty,
    /// 与闪存一致
    Valid,
    /// 已修改，等待刷新
    Dirty,
}

/// 槽位归属
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// 在缓冲池链表中，带引用计数
    Pooled {
        /// 引用计数
        ref_count: u16,
    },
    /// 克隆出的浮动缓冲，不在任何链表中
    Detached,
}

/// 侵入式链表链接（数组下标）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Links {
    pub(crate) prev: Option<usize>,
    pub(crate) next: Option<usize>,
}

/// 页缓冲句柄
///
/// 由 `buf_get`/`buf_new`/`buf_get_ex` 返回，用完后用 `buf_put` 归还。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufHandle(pub(crate) usize);

impl BufHandle {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// 克隆缓冲
///
/// 不在缓冲池链表中，不参与驱逐和刷新。只能用 `free_clone` 释放。
#[derive(Debug, PartialEq, Eq)]
pub struct ClonedBuf(pub(crate) usize);

impl ClonedBuf {
    pub(crate) fn index(&self) -> usize {
        self.0
    }
}

/// 页缓冲元数据
#[derive(Debug, Clone)]
pub struct PageBuf {
    /// 流类型
    pub(crate) kind: StreamType,
    /// 父 serial
    pub(crate) father: u16,
    /// 自身 serial
    pub(crate) serial: u16,
    /// 逻辑页号
    pub(crate) page_id: u16,
    /// 内容状态
    pub(crate) mark: BufMark,
    /// 槽位归属与引用计数
    pub(crate) state: SlotState,
    /// 已写入的数据长度
    pub(crate) data_len: u16,
    /// 全局访问顺序链表
    pub(crate) lru: Links,
    /// 脏组链表
    pub(crate) dirty: Links,
}

impl PageBuf {
    pub(crate) fn new() -> Self {
        Self {
            kind: StreamType::Data,
            father: 0,
            serial: 0,
            page_id: 0,
            mark: BufMark::Empty,
            state: SlotState::Pooled { ref_count: 0 },
            data_len: 0,
            lru: Links::default(),
            dirty: Links::default(),
        }
    }

    /// 流类型
    pub fn kind(&self) -> StreamType {
        self.kind
    }

    /// 父 serial
    pub fn father(&self) -> u16 {
        self.father
    }

    /// 自身 serial
    pub fn serial(&self) -> u16 {
        self.serial
    }

    /// 逻辑页号
    pub fn page_id(&self) -> u16 {
        self.page_id
    }

    /// 内容状态
    pub fn mark(&self) -> BufMark {
        self.mark
    }

    /// 已写入的数据长度
    pub fn data_len(&self) -> u16 {
        self.data_len
    }

    /// 引用计数（克隆缓冲为 0）
    pub fn ref_count(&self) -> u16 {
        match self.state {
            SlotState::Pooled { ref_count } => ref_count,
            SlotState::Detached => 0,
        }
    }

    /// 是否在缓冲池中
    pub fn is_pooled(&self) -> bool {
        matches!(self.state, SlotState::Pooled { .. })
    }

    /// 是否是克隆缓冲
    pub fn is_clone(&self) -> bool {
        matches!(self.state, SlotState::Detached)
    }

    /// 是否正在被引用
    pub fn is_referenced(&self) -> bool {
        self.ref_count() > 0
    }

    /// 是否是脏缓冲
    pub fn is_dirty(&self) -> bool {
        self.mark == BufMark::Dirty
    }

    /// 可以被重新分配：未引用且不脏
    pub fn is_free(&self) -> bool {
        matches!(self.state, SlotState::Pooled { ref_count: 0 }) && !self.is_dirty()
    }

    /// 身份是否匹配（不考虑状态）
    pub fn matches(&self, father: u16, serial: u16, page_id: u16) -> bool {
        self.father == father && self.serial == serial && self.page_id == page_id
    }

    /// 增加引用计数
    pub(crate) fn get(&mut self) {
        if let SlotState::Pooled { ref_count } = &mut self.state {
            *ref_count = ref_count.saturating_add(1);
        }
    }

    /// 减少引用计数（饱和）
    pub(crate) fn put(&mut self) {
        if let SlotState::Pooled { ref_count } = &mut self.state {
            *ref_count = ref_count.saturating_sub(1);
        }
    }
}
