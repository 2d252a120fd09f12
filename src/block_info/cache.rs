//! 块信息缓存实现
//!
//! 以物理块号为键的 LRU 缓存，每项持有该块所有页的 spare 缓存。
//!
//! # 架构
//!
//! ```text
//! struct BlockInfoCache {
//!     cache: LruCache<u16, Entry>,   // 已分配的项：块号 -> (槽位, 引用计数)
//!     idle: Vec<usize>,              // 尚未分配块号的槽位
//!     spares: Vec<PageSpare>,        // 连续的 spare 区：槽位 * pages_per_block
//!     expired: Vec<u16>,             // 每个槽位中失效的页数
//! }
//! ```
//!
//! 引用计数大于 0 的项绝不会被驱逐或重新分配，
//! 因此持有 [`BlockInfoRef`] 期间槽位是稳定的。

use crate::error::{Error, ErrorKind, Result};
use crate::flash::{DecodedTag, FlashDev, FlashDevice, PageTag, TimeStampPolicy};
use crate::types::Pages;

use super::spare::PageSpare;
use alloc::vec::Vec;
use core::cmp::Ordering;
use core::num::NonZeroUsize;
use lru::LruCache;

/// 已分配的缓存项
#[derive(Debug, Clone, Copy)]
struct Entry {
    /// spare 区槽位
    slot: usize,
    /// 引用计数
    ref_count: u16,
}

/// 块信息租约
///
/// 由 [`BlockInfoCache::acquire`] 返回，必须用 [`BlockInfoCache::release`] 归还。
#[derive(Debug, PartialEq, Eq)]
pub struct BlockInfoRef {
    block: u16,
    slot: usize,
}

impl BlockInfoRef {
    /// 物理块号
    pub fn block(&self) -> u16 {
        self.block
    }
}

/// 块信息缓存
pub struct BlockInfoCache {
    /// 块号 -> 缓存项，自动维护访问顺序
    cache: LruCache<u16, Entry>,
    /// 未分配块号的槽位
    idle: Vec<usize>,
    /// 所有槽位的 spare，连续存放
    spares: Vec<PageSpare>,
    /// 每个槽位的失效页数
    expired: Vec<u16>,
    /// 每块页数
    pages_per_block: u16,
}

impl BlockInfoCache {
    /// 创建块信息缓存
    ///
    /// 整个 spare 区在这里一次性分配，之后不再增长。spare 区和槽位表的分配失败
    /// 返回 `NoSpace`；`LruCache` 的索引表由 `lru` 自己分配，不经过这条路径。
    ///
    /// # 参数
    ///
    /// * `capacity` - 缓存的块数
    /// * `pages_per_block` - 每块页数
    pub fn new(capacity: usize, pages_per_block: u16) -> Result<Self> {
        let cap = NonZeroUsize::new(capacity)
            .ok_or(Error::new(ErrorKind::InvalidInput, "Block info cache capacity must be non-zero"))?;
        let total = capacity
            .checked_mul(pages_per_block as usize)
            .ok_or(Error::new(ErrorKind::NoSpace, "Block info arena too large"))?;

        let mut spares = Vec::new();
        spares.try_reserve_exact(total)?;
        spares.resize(total, PageSpare::default());

        let mut expired = Vec::new();
        expired.try_reserve_exact(capacity)?;
        expired.resize(capacity, pages_per_block);

        let mut idle = Vec::new();
        idle.try_reserve_exact(capacity)?;
        idle.extend((0..capacity).rev());

        log::debug!(
            "[BINFO] alloc info cache: {} blocks x {} pages",
            capacity, pages_per_block
        );

        Ok(Self {
            cache: LruCache::new(cap),
            idle,
            spares,
            expired,
            pages_per_block,
        })
    }

    /// 获取块信息
    ///
    /// 命中时增加引用计数并移到最近使用；未命中时复用最久未使用且
    /// 未被引用的项，所有页标记为失效。所有项都被引用时返回 `NoSpace`。
    pub fn acquire(&mut self, block: u16) -> Result<BlockInfoRef> {
        if let Some(entry) = self.cache.get_mut(&block) {
            entry.ref_count += 1;
            log::trace!("[BINFO] acquire block {} HIT (ref {})", block, entry.ref_count);
            return Ok(BlockInfoRef { block, slot: entry.slot });
        }

        let slot = match self.idle.pop() {
            Some(slot) => slot,
            None => {
                // iter() 从最近使用到最久未使用，rev() 后从 LRU 端找
                let victim = self
                    .cache
                    .iter()
                    .rev()
                    .find(|(_, e)| e.ref_count == 0)
                    .map(|(b, _)| *b);
                let Some(victim) = victim else {
                    log::error!("[BINFO] insufficient block info cache: all {} entries referenced", self.cache.len());
                    return Err(Error::new(ErrorKind::NoSpace, "All block info entries are referenced"));
                };
                log::debug!("[BINFO] evict block {} for block {}", victim, block);
                self.cache
                    .pop(&victim)
                    .map(|e| e.slot)
                    .ok_or(Error::new(ErrorKind::Corrupted, "Evicted block info vanished"))?
            }
        };

        self.reset_slot(slot);
        self.cache.put(block, Entry { slot, ref_count: 1 });
        log::debug!("[BINFO] acquire block {} MISS -> slot {}", block, slot);

        Ok(BlockInfoRef { block, slot })
    }

    /// 在缓存中查找块信息（不改变访问顺序）
    pub fn find_in_cache(&mut self, block: u16) -> Option<BlockInfoRef> {
        let entry = self.cache.peek_mut(&block)?;
        entry.ref_count += 1;
        Some(BlockInfoRef { block, slot: entry.slot })
    }

    /// 归还块信息
    pub fn release(&mut self, info: BlockInfoRef) -> Result<()> {
        match self.cache.peek_mut(&info.block) {
            Some(entry) if entry.slot == info.slot && entry.ref_count > 0 => {
                entry.ref_count -= 1;
                Ok(())
            }
            Some(_) => {
                log::error!("[BINFO] put an unused block info (block {}) back?", info.block);
                Err(Error::new(ErrorKind::Corrupted, "Block info released more than acquired"))
            }
            None => {
                log::error!("[BINFO] release block {} not in cache", info.block);
                Err(Error::new(ErrorKind::Corrupted, "Released block info is not cached"))
            }
        }
    }

    /// 载入 spare
    ///
    /// 只读取已失效的页。校验和不匹配不算失败，只有 I/O 错误才返回 `Err`。
    pub fn load<D: FlashDevice>(&mut self, flash: &mut FlashDev<D>, info: &BlockInfoRef, pages: Pages) -> Result<()> {
        match pages {
            Pages::All => {
                for page in 0..self.pages_per_block {
                    self.load_page(flash, info, page)?;
                }
                Ok(())
            }
            Pages::One(page) => {
                if page >= self.pages_per_block {
                    log::error!("[BINFO] page {} out of range", page);
                    return Err(Error::new(ErrorKind::InvalidInput, "Page out of range"));
                }
                self.load_page(flash, info, page)
            }
        }
    }

    fn load_page<D: FlashDevice>(&mut self, flash: &mut FlashDev<D>, info: &BlockInfoRef, page: u16) -> Result<()> {
        let idx = self.index(info, page);
        if !self.spares[idx].is_expired() {
            return Ok(());
        }
        let decoded = flash.read_tag(info.block, page).map_err(|e| {
            log::error!("[BINFO] load block {} page {} spare fail", info.block, page);
            e
        })?;
        self.spares[idx].fill(decoded);
        self.expired[info.slot] -= 1;
        Ok(())
    }

    /// 标记 spare 失效（幂等）
    pub fn expire(&mut self, info: &BlockInfoRef, pages: Pages) {
        match pages {
            Pages::All => self.expire_slot(info.slot),
            Pages::One(page) if page < self.pages_per_block => {
                let idx = self.index(info, page);
                if !self.spares[idx].is_expired() {
                    self.spares[idx].expire();
                    self.expired[info.slot] += 1;
                }
            }
            Pages::One(_) => {}
        }
    }

    /// 所有缓存项的所有页失效
    pub fn expire_all(&mut self) {
        for slot in 0..self.expired.len() {
            self.expire_slot(slot);
        }
    }

    /// 记录刚写入的页，省去一次 spare 读取
    pub fn record_written(&mut self, info: &BlockInfoRef, page: u16, tag: PageTag) {
        let idx = self.index(info, page);
        if self.spares[idx].is_expired() {
            self.expired[info.slot] -= 1;
        }
        self.spares[idx].fill(DecodedTag::Written { tag, check_ok: true });
    }

    /// 单页 spare
    ///
    /// `page` 必须小于每块页数。
    pub fn spare(&self, info: &BlockInfoRef, page: u16) -> &PageSpare {
        &self.spares[self.index(info, page)]
    }

    /// 失效页数
    pub fn expired_count(&self, info: &BlockInfoRef) -> u16 {
        self.expired[info.slot]
    }

    /// 块尾部连续的空白页数（需要先载入）
    pub fn free_pages_count(&self, info: &BlockInfoRef) -> u16 {
        (0..self.pages_per_block)
            .rev()
            .take_while(|p| {
                let spare = self.spare(info, *p);
                !spare.is_expired() && spare.is_erased()
            })
            .count() as u16
    }

    /// 查找保存逻辑页 `page_id` 的第一个物理页
    pub fn find_page_with_id<D: FlashDevice>(
        &mut self,
        flash: &mut FlashDev<D>,
        info: &BlockInfoRef,
        page_id: u16,
    ) -> Result<Option<u16>> {
        for page in 0..self.pages_per_block {
            self.load_page(flash, info, page)?;
            let spare = self.spare(info, page);
            if spare.is_erased() {
                break;
            }
            if spare.is_valid() && spare.tag.page_id == page_id as u8 {
                return Ok(Some(page));
            }
        }
        Ok(None)
    }

    /// 从 `page` 开始查找同一逻辑页最新的物理副本
    pub fn find_best_page<D: FlashDevice, S: TimeStampPolicy>(
        &mut self,
        flash: &mut FlashDev<D>,
        info: &BlockInfoRef,
        page: u16,
        ts: &S,
    ) -> Result<u16> {
        self.load_page(flash, info, page)?;
        let target = self.spare(info, page).tag.page_id;
        let mut best = page;
        let mut best_ts = self.spare(info, page).tag.block_ts;

        for candidate in page + 1..self.pages_per_block {
            self.load_page(flash, info, candidate)?;
            let spare = self.spare(info, candidate);
            if spare.is_erased() {
                break;
            }
            if spare.is_valid()
                && spare.tag.page_id == target
                && ts.compare((spare.tag.block_ts, candidate), (best_ts, best)) == Ordering::Greater
            {
                best = candidate;
                best_ts = spare.tag.block_ts;
            }
        }
        Ok(best)
    }

    /// 块的代时间戳（取 0 号页）
    pub fn block_time_stamp<D: FlashDevice, S: TimeStampPolicy>(
        &mut self,
        flash: &mut FlashDev<D>,
        info: &BlockInfoRef,
        ts: &S,
    ) -> Result<u8> {
        self.load_page(flash, info, 0)?;
        let spare = self.spare(info, 0);
        if spare.is_erased() {
            Ok(ts.first())
        } else {
            Ok(spare.tag.block_ts)
        }
    }

    /// 块当前引用计数（未缓存返回 None）
    pub fn ref_count(&self, block: u16) -> Option<u16> {
        self.cache.peek(&block).map(|e| e.ref_count)
    }

    /// 是否没有任何项被引用
    pub fn is_all_free(&self) -> bool {
        self.cache.iter().all(|(_, e)| e.ref_count == 0)
    }

    /// 释放缓存（卸载时调用）
    ///
    /// 仍有项被引用时失败，缓存保持不变。
    pub fn release_all(&mut self) -> Result<()> {
        if let Some((block, _)) = self.cache.iter().find(|(_, e)| e.ref_count != 0) {
            log::error!("[BINFO] block {} info still referenced, release cache fail", block);
            return Err(Error::new(ErrorKind::Busy, "Block info cache still referenced"));
        }
        while let Some((_, entry)) = self.cache.pop_lru() {
            self.idle.push(entry.slot);
        }
        self.expire_all();
        Ok(())
    }

    /// 缓存容量（块数）
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    /// 已分配块号的项数
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// 是否没有已分配的项
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// 每块页数
    pub fn pages_per_block(&self) -> u16 {
        self.pages_per_block
    }

    fn index(&self, info: &BlockInfoRef, page: u16) -> usize {
        info.slot * self.pages_per_block as usize + page as usize
    }

    fn reset_slot(&mut self, slot: usize) {
        let start = slot * self.pages_per_block as usize;
        let end = start + self.pages_per_block as usize;
        self.spares[start..end].fill(PageSpare::default());
        self.expired[slot] = self.pages_per_block;
    }

    fn expire_slot(&mut self, slot: usize) {
        let start = slot * self.pages_per_block as usize;
        let end = start + self.pages_per_block as usize;
        let mut newly = 0;
        for spare in &mut self.spares[start..end] {
            if !spare.is_expired() {
                spare.expire();
                newly += 1;
            }
        }
        self.expired[slot] += newly;
    }
}

impl core::fmt::Debug for BlockInfoCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockInfoCache")
            .field("capacity", &self.cache.cap())
            .field("len", &self.cache.len())
            .field("idle", &self.idle.len())
            .field("pages_per_block", &self.pages_per_block)
            .finish()
    }
}
