//! 页缓冲池实现
//!
//! # 架构
//!
//! ```text
//! struct PageBufferPool {
//!     bufs: Vec<PageBuf>,        // 缓冲元数据，下标即句柄
//!     data: Vec<u8>,             // 连续数据区：缓冲数 * page_size
//!     lru: ListHead,             // 访问顺序链表，头部为最近使用
//!     groups: Vec<DirtyGroup>,   // 脏组表
//! }
//! ```
//!
//! 每个缓冲同时挂在访问顺序链表和（变脏后）一个脏组链表上。
//! 克隆缓冲从访问顺序链表摘下，释放时挂回尾部。

use crate::consts::ERASED_BYTE;
use crate::error::{Error, ErrorKind, Result};
use crate::flash::PageTag;
use crate::types::StreamType;

use super::dirty::DirtyGroup;
use super::list::{Chain, ListHead};
use super::page_buf::{BufHandle, BufMark, ClonedBuf, PageBuf, SlotState};
use alloc::vec::Vec;

/// 缓冲池统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 查找次数
    pub lookups: u64,
    /// 命中次数
    pub hits: u64,
    /// 未命中次数
    pub misses: u64,
    /// 脏组刷新次数
    pub flushes: u64,
    /// 块恢复次数
    pub recoveries: u64,
    /// 刷新失败次数
    pub failed_flushes: u64,
}

/// 页缓冲池
pub struct PageBufferPool {
    /// 缓冲元数据
    bufs: Vec<PageBuf>,
    /// 页数据区
    data: Vec<u8>,
    /// 整页大小（含 ECC）
    page_size: usize,
    /// 每页可用数据大小
    data_size: usize,
    /// 访问顺序链表
    lru: ListHead,
    /// 脏组表
    groups: Vec<DirtyGroup>,
    /// 单组最大脏页数
    dirty_max: usize,
    /// 统计
    stats: PoolStats,
}

impl PageBufferPool {
    /// 创建缓冲池
    ///
    /// 所有缓冲和数据区在这里一次性分配，初始内容为 0xFF，状态为空。
    ///
    /// # 参数
    ///
    /// * `count` - 缓冲数
    /// * `page_size` - 整页大小（数据 + ECC）
    /// * `ecc_size` - ECC 区大小
    /// * `dirty_max` - 单组最大脏页数
    /// * `group_slots` - 脏组数
    pub fn new(count: usize, page_size: usize, ecc_size: usize, dirty_max: usize, group_slots: usize) -> Result<Self> {
        if count == 0 || group_slots == 0 || dirty_max == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Page buffer pool parameters must be non-zero"));
        }
        if ecc_size >= page_size {
            return Err(Error::new(ErrorKind::InvalidInput, "ECC size must be smaller than page size"));
        }

        let mut bufs = Vec::new();
        bufs.try_reserve_exact(count)?;
        bufs.resize(count, PageBuf::new());

        let mut data = Vec::new();
        data.try_reserve_exact(count * page_size)?;
        data.resize(count * page_size, ERASED_BYTE);

        let mut groups = Vec::new();
        groups.try_reserve_exact(group_slots)?;
        groups.resize(group_slots, DirtyGroup::default());

        let mut lru = ListHead::default();
        for idx in 0..count {
            lru.push_back(&mut bufs, Chain::Lru, idx);
        }

        log::debug!(
            "[PBUF] alloc {} page buffers ({} bytes each), {} dirty groups x {} pages",
            count, page_size, group_slots, dirty_max
        );

        Ok(Self {
            bufs,
            data,
            page_size,
            data_size: page_size - ecc_size,
            lru,
            groups,
            dirty_max,
            stats: PoolStats::default(),
        })
    }

    // ===== 查询 =====

    /// 缓冲数
    pub fn capacity(&self) -> usize {
        self.bufs.len()
    }

    /// 整页大小
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// 每页可用数据大小
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// 单组最大脏页数
    pub fn dirty_max(&self) -> usize {
        self.dirty_max
    }

    /// 脏组数
    pub fn group_slots(&self) -> usize {
        self.groups.len()
    }

    /// 统计
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut PoolStats {
        &mut self.stats
    }

    /// 缓冲元数据
    pub fn buf(&self, h: BufHandle) -> &PageBuf {
        &self.bufs[h.index()]
    }

    /// 克隆缓冲元数据
    pub fn clone_meta(&self, c: &ClonedBuf) -> &PageBuf {
        &self.bufs[c.index()]
    }

    /// 缓冲数据区（不含 ECC）
    pub fn data(&self, h: BufHandle) -> &[u8] {
        &self.page(h.index())[..self.data_size]
    }

    /// 克隆缓冲数据区（不含 ECC）
    pub fn clone_data(&self, c: &ClonedBuf) -> &[u8] {
        &self.page(c.index())[..self.data_size]
    }

    /// 克隆缓冲数据区（可写）
    pub fn clone_data_mut(&mut self, c: &ClonedBuf) -> &mut [u8] {
        let size = self.data_size;
        &mut self.page_mut(c.index())[..size]
    }

    pub(crate) fn meta(&self, idx: usize) -> &PageBuf {
        &self.bufs[idx]
    }

    pub(crate) fn meta_mut(&mut self, idx: usize) -> &mut PageBuf {
        &mut self.bufs[idx]
    }

    /// 整页（数据 + ECC）
    pub(crate) fn page(&self, idx: usize) -> &[u8] {
        let start = idx * self.page_size;
        &self.data[start..start + self.page_size]
    }

    pub(crate) fn page_mut(&mut self, idx: usize) -> &mut [u8] {
        let start = idx * self.page_size;
        &mut self.data[start..start + self.page_size]
    }

    /// 访问顺序（从最近使用到最久未使用）
    pub fn recency_order(&self) -> impl Iterator<Item = BufHandle> + '_ {
        self.lru.iter(&self.bufs, Chain::Lru).map(BufHandle)
    }

    // ===== 查找与引用 =====

    /// 按身份查找非空缓冲（不改变引用计数和访问顺序）
    pub fn find(&self, father: u16, serial: u16, page_id: u16) -> Option<BufHandle> {
        self.lru
            .iter(&self.bufs, Chain::Lru)
            .find(|&i| {
                let b = &self.bufs[i];
                b.mark != BufMark::Empty && b.matches(father, serial, page_id)
            })
            .map(BufHandle)
    }

    /// 按身份查找已被占用的缓冲
    ///
    /// 与 [`find`](Self::find) 不同，还会匹配刚分配、尚未写入但被引用的空缓冲。
    pub(crate) fn find_claimed(&self, father: u16, serial: u16, page_id: u16) -> Option<BufHandle> {
        self.lru
            .iter(&self.bufs, Chain::Lru)
            .find(|&i| {
                let b = &self.bufs[i];
                (b.mark != BufMark::Empty || b.is_referenced()) && b.matches(father, serial, page_id)
            })
            .map(BufHandle)
    }

    /// 查找并获取缓冲
    ///
    /// 命中时引用计数加一并移到访问顺序链表头部。
    pub fn get(&mut self, father: u16, serial: u16, page_id: u16) -> Option<BufHandle> {
        self.stats.lookups += 1;
        match self.find(father, serial, page_id) {
            Some(h) => {
                self.stats.hits += 1;
                self.bufs[h.index()].get();
                self.move_to_head(h.index());
                log::trace!("[PBUF] get F:{:04x} S:{:04x} P:{} HIT", father, serial, page_id);
                Some(h)
            }
            None => {
                self.stats.misses += 1;
                log::trace!("[PBUF] get F:{:04x} S:{:04x} P:{} MISS", father, serial, page_id);
                None
            }
        }
    }

    /// 归还缓冲
    ///
    /// 引用计数已为 0 时返回 `InvalidState`，计数不变。
    pub fn put(&mut self, h: BufHandle) -> Result<()> {
        let buf = &mut self.bufs[h.index()];
        if !buf.is_pooled() {
            log::error!("[PBUF] put a cloned buffer through the pool handle");
            return Err(Error::new(ErrorKind::InvalidState, "Buffer is a clone"));
        }
        if !buf.is_referenced() {
            log::error!(
                "[PBUF] unreferenced buffer F:{:04x} S:{:04x} P:{} put back?",
                buf.father, buf.serial, buf.page_id
            );
            return Err(Error::new(ErrorKind::InvalidState, "Buffer put more than get"));
        }
        buf.put();
        Ok(())
    }

    /// 引用计数加一
    pub fn inc_ref(&mut self, h: BufHandle) {
        self.bufs[h.index()].get();
    }

    /// 引用计数减一（饱和）
    pub fn dec_ref(&mut self, h: BufHandle) {
        self.bufs[h.index()].put();
    }

    /// 移到访问顺序链表头部
    pub(crate) fn move_to_head(&mut self, idx: usize) {
        if self.bufs[idx].is_pooled() {
            self.lru.move_to_front(&mut self.bufs, Chain::Lru, idx);
        }
    }

    /// 从最近使用端查找可重新分配的缓冲
    pub(crate) fn find_free(&self) -> Option<usize> {
        self.lru.iter(&self.bufs, Chain::Lru).find(|&i| self.bufs[i].is_free())
    }

    /// 把空闲缓冲分配给新身份
    ///
    /// 内容清为 0xFF，状态为空，数据长度为 0，不增加引用计数。
    pub(crate) fn assign(&mut self, idx: usize, kind: StreamType, father: u16, serial: u16, page_id: u16) {
        let buf = &mut self.bufs[idx];
        buf.kind = kind;
        buf.father = father;
        buf.serial = serial;
        buf.page_id = page_id;
        buf.mark = BufMark::Empty;
        buf.data_len = 0;
        self.page_mut(idx).fill(ERASED_BYTE);
    }

    /// 分配并获取：引用计数加一，移到头部
    pub(crate) fn claim(&mut self, idx: usize, kind: StreamType, father: u16, serial: u16, page_id: u16) -> BufHandle {
        self.assign(idx, kind, father, serial, page_id);
        self.bufs[idx].get();
        self.move_to_head(idx);
        BufHandle(idx)
    }

    // ===== 数据访问 =====

    /// 读取缓冲数据
    ///
    /// 读取范围截断到每页数据容量，返回实际复制的字节数。
    pub fn read(&self, h: BufHandle, offset: usize, out: &mut [u8]) -> usize {
        if offset >= self.data_size {
            return 0;
        }
        let n = out.len().min(self.data_size - offset);
        out[..n].copy_from_slice(&self.data(h)[offset..offset + n]);
        n
    }

    /// 写入缓冲数据（不改变状态）
    ///
    /// 数据长度扩展到 `offset + data.len()`。
    pub(crate) fn copy_in(&mut self, idx: usize, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= self.data_size)
            .ok_or(Error::new(ErrorKind::InvalidInput, "Write exceeds page data size"))?;
        self.page_mut(idx)[offset..end].copy_from_slice(data);
        let buf = &mut self.bufs[idx];
        // end <= data_size <= u16::MAX
        if end as u16 > buf.data_len {
            buf.data_len = end as u16;
        }
        Ok(())
    }

    /// 根据缓冲内容生成 tag
    pub(crate) fn make_tag(&self, idx: usize, block_ts: u8) -> PageTag {
        let buf = &self.bufs[idx];
        let len = (buf.data_len as usize).min(self.data_size);
        PageTag::new(buf.kind, buf.father, buf.serial, buf.page_id, block_ts, &self.page(idx)[..len])
    }

    /// 标记为空
    ///
    /// 只对未被引用的非空缓冲生效，脏缓冲先从脏组摘下，内容丢弃。
    pub fn mark_empty(&mut self, h: BufHandle) -> Result<()> {
        let idx = h.index();
        let buf = &self.bufs[idx];
        if buf.mark == BufMark::Empty || buf.is_referenced() || !buf.is_pooled() {
            return Ok(());
        }
        if buf.is_dirty() {
            self.break_from_dirty(idx)?;
        }
        self.bufs[idx].mark = BufMark::Empty;
        Ok(())
    }

    // ===== 克隆 =====

    /// 克隆缓冲
    ///
    /// 取一个空闲缓冲从访问顺序链表摘下。给定源缓冲时复制整页内容
    /// （含 ECC 区）和元数据，源缓冲本身不会被选中。
    pub fn clone_buf(&mut self, src: Option<BufHandle>) -> Result<ClonedBuf> {
        let skip = src.map(BufHandle::index);
        let Some(idx) = self
            .lru
            .iter(&self.bufs, Chain::Lru)
            .find(|&i| Some(i) != skip && self.bufs[i].is_free())
        else {
            log::error!("[PBUF] no free buffer for clone");
            return Err(Error::new(ErrorKind::NoSpace, "No free page buffer for clone"));
        };

        self.lru.unlink(&mut self.bufs, Chain::Lru, idx);

        match skip {
            Some(s) => {
                let ps = self.page_size;
                self.data.copy_within(s * ps..(s + 1) * ps, idx * ps);
                let src = self.bufs[s].clone();
                let dst = &mut self.bufs[idx];
                dst.kind = src.kind;
                dst.father = src.father;
                dst.serial = src.serial;
                dst.page_id = src.page_id;
                dst.mark = src.mark;
                dst.data_len = src.data_len;
            }
            None => {
                let dst = &mut self.bufs[idx];
                dst.mark = BufMark::Empty;
                dst.data_len = 0;
            }
        }
        self.bufs[idx].state = SlotState::Detached;
        log::trace!("[PBUF] clone -> slot {}", idx);

        Ok(ClonedBuf(idx))
    }

    /// 释放克隆缓冲，放回访问顺序链表尾部
    pub fn free_clone(&mut self, c: ClonedBuf) -> Result<()> {
        let idx = c.index();
        let buf = &mut self.bufs[idx];
        if !buf.is_clone() {
            log::error!("[PBUF] free_clone on a pooled buffer (slot {})", idx);
            return Err(Error::new(ErrorKind::InvalidState, "Buffer is not a clone"));
        }
        buf.state = SlotState::Pooled { ref_count: 0 };
        buf.mark = BufMark::Empty;
        buf.data_len = 0;
        self.lru.push_back(&mut self.bufs, Chain::Lru, idx);
        Ok(())
    }

    // ===== 整体状态 =====

    /// 是否没有缓冲被引用
    pub fn is_all_free(&self) -> bool {
        self.lru.iter(&self.bufs, Chain::Lru).all(|i| !self.bufs[i].is_referenced())
    }

    /// 是否所有缓冲都为空
    pub fn is_all_empty(&self) -> bool {
        self.lru.iter(&self.bufs, Chain::Lru).all(|i| self.bufs[i].mark == BufMark::Empty)
    }

    /// 所有缓冲标记为空，脏组清空
    pub fn set_all_empty(&mut self) {
        for buf in self.bufs.iter_mut().filter(|b| b.is_pooled()) {
            buf.mark = BufMark::Empty;
            buf.dirty = Default::default();
        }
        self.groups.fill(DirtyGroup::default());
    }

    /// 第一个被引用的缓冲
    pub(crate) fn first_referenced(&self) -> Option<&PageBuf> {
        self.lru
            .iter(&self.bufs, Chain::Lru)
            .map(|i| &self.bufs[i])
            .find(|b| b.is_referenced())
    }

    // ===== 脏组 =====

    /// 属于 (father, serial) 的脏组
    pub fn find_group_slot(&self, father: u16, serial: u16) -> Option<usize> {
        self.groups.iter().position(|g| g.is_owned_by(&self.bufs, father, serial))
    }

    /// 第一个空闲脏组
    pub fn find_free_group_slot(&self) -> Option<usize> {
        self.groups.iter().position(DirtyGroup::is_free)
    }

    /// 脏缓冲最多的组（并列时取下标最小的）
    pub fn most_dirty_group(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (slot, group) in self.groups.iter().enumerate() {
            if group.count > 0 && best.map_or(true, |b| group.count > self.groups[b].count) {
                best = Some(slot);
            }
        }
        best
    }

    /// 组内脏缓冲数
    pub fn group_count(&self, slot: usize) -> usize {
        self.groups[slot].count
    }

    /// 组身份
    pub fn group_owner(&self, slot: usize) -> Option<(u16, u16)> {
        self.groups[slot].owner(&self.bufs)
    }

    /// 组内缓冲（从头到尾）
    pub fn group_members(&self, slot: usize) -> impl Iterator<Item = BufHandle> + '_ {
        self.groups[slot].list.iter(&self.bufs, Chain::Dirty).map(BufHandle)
    }

    /// 缓冲是否在组中
    pub(crate) fn is_in_dirty_list(&self, slot: usize, idx: usize) -> bool {
        self.groups[slot].contains(&self.bufs, idx)
    }

    /// 加入脏组头部并标记为脏
    pub(crate) fn link_to_dirty(&mut self, slot: usize, idx: usize) {
        self.groups[slot].link(&mut self.bufs, idx);
        self.bufs[idx].mark = BufMark::Dirty;
        log::trace!(
            "[PBUF] slot {} dirty += P:{} ({} pages)",
            slot, self.bufs[idx].page_id, self.groups[slot].count
        );
    }

    /// 从所在脏组摘下（不改变状态）
    pub(crate) fn break_from_dirty(&mut self, idx: usize) -> Result<()> {
        let Some(slot) = self.groups.iter().position(|g| g.contains(&self.bufs, idx)) else {
            let buf = &self.bufs[idx];
            log::error!(
                "[PBUF] buffer F:{:04x} S:{:04x} P:{} not in any dirty list",
                buf.father, buf.serial, buf.page_id
            );
            return Err(Error::new(ErrorKind::Corrupted, "Buffer not in dirty list"));
        };
        self.groups[slot].unlink(&mut self.bufs, idx);
        Ok(())
    }

    /// 检查组内一致性
    ///
    /// 所有成员必须为脏且与组身份相同，链表长度等于计数。
    pub(crate) fn check_dirty_list(&self, slot: usize) -> Result<()> {
        let group = &self.groups[slot];
        let Some((father, serial)) = group.owner(&self.bufs) else {
            return Ok(());
        };
        let mut len = 0;
        for idx in group.list.iter(&self.bufs, Chain::Dirty) {
            let buf = &self.bufs[idx];
            if buf.father != father || buf.serial != serial || !buf.is_dirty() {
                log::error!(
                    "[PBUF] dirty group {} mixed: F:{:04x} S:{:04x} vs F:{:04x} S:{:04x}",
                    slot, buf.father, buf.serial, father, serial
                );
                return Err(Error::new(ErrorKind::Corrupted, "Dirty group members disagree"));
            }
            len += 1;
        }
        if len != group.count {
            log::error!("[PBUF] dirty group {} count {} but {} linked", slot, group.count, len);
            return Err(Error::new(ErrorKind::Corrupted, "Dirty group count mismatch"));
        }
        Ok(())
    }

    /// 组内逻辑页号最小的缓冲
    pub(crate) fn find_min_page_id(&self, slot: usize) -> Option<usize> {
        self.groups[slot]
            .list
            .iter(&self.bufs, Chain::Dirty)
            .min_by_key(|&i| self.bufs[i].page_id)
    }

    /// 组内指定逻辑页号的缓冲
    pub(crate) fn find_in_dirty(&self, slot: usize, page_id: u16) -> Option<usize> {
        self.groups[slot]
            .list
            .iter(&self.bufs, Chain::Dirty)
            .find(|&i| self.bufs[i].page_id == page_id)
    }

    /// 打印缓冲池状态
    pub fn inspect(&self) {
        let used = self.lru.iter(&self.bufs, Chain::Lru).filter(|&i| self.bufs[i].mark != BufMark::Empty).count();
        log::info!(
            "[PBUF] {} buffers ({} non-empty), lookups {} hits {} misses {}",
            self.bufs.len(), used, self.stats.lookups, self.stats.hits, self.stats.misses
        );
        for idx in self.lru.iter(&self.bufs, Chain::Lru) {
            let buf = &self.bufs[idx];
            if buf.mark == BufMark::Empty {
                continue;
            }
            log::info!(
                "[PBUF] {:?} F:{:04x} S:{:04x} P:{} ref {} len {} {:?}",
                buf.kind, buf.father, buf.serial, buf.page_id, buf.ref_count(), buf.data_len, buf.mark
            );
        }
        for (slot, group) in self.groups.iter().enumerate() {
            match group.owner(&self.bufs) {
                Some((father, serial)) => {
                    log::info!("[PBUF] dirty group {}: F:{:04x} S:{:04x} {} pages", slot, father, serial, group.count)
                }
                None => log::info!("[PBUF] dirty group {}: free", slot),
            }
        }
    }
}

impl core::fmt::Debug for PageBufferPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageBufferPool")
            .field("capacity", &self.bufs.len())
            .field("page_size", &self.page_size)
            .field("dirty_max", &self.dirty_max)
            .field("groups", &self.groups.len())
            .field("stats", &self.stats)
            .finish()
    }
}
