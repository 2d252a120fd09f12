//! 缓冲操作
//!
//! 需要闪存、块信息缓存或刷新参与的缓冲操作放在设备上下文上：
//! 分配、按节点载入、写入、物理页载入。

use super::Device;
use crate::block_info::BlockInfoRef;
use crate::buffer::{BufHandle, BufMark, ClonedBuf};
use crate::error::{Error, ErrorKind, Result};
use crate::flash::{FlashDevice, TimeStampPolicy};
use crate::tree::TreeIndex;
use crate::types::{StreamType, TreeNode};

impl<F: FlashDevice, T: TreeIndex, S: TimeStampPolicy> Device<F, T, S> {
    /// 按身份查找非空缓冲（不获取）
    pub fn buf_find(&self, father: u16, serial: u16, page_id: u16) -> Option<BufHandle> {
        self.pool.find(father, serial, page_id)
    }

    /// 按身份查找并获取缓冲
    pub fn buf_get(&mut self, father: u16, serial: u16, page_id: u16) -> Option<BufHandle> {
        self.pool.get(father, serial, page_id)
    }

    /// 归还缓冲
    pub fn buf_put(&mut self, h: BufHandle) -> Result<()> {
        self.pool.put(h)
    }

    /// 读取缓冲数据，返回复制的字节数
    pub fn buf_read(&self, h: BufHandle, offset: usize, out: &mut [u8]) -> usize {
        self.pool.read(h, offset, out)
    }

    /// 克隆缓冲
    pub fn buf_clone(&mut self, src: Option<BufHandle>) -> Result<ClonedBuf> {
        self.pool.clone_buf(src)
    }

    /// 释放克隆缓冲
    pub fn buf_free_clone(&mut self, c: ClonedBuf) -> Result<()> {
        self.pool.free_clone(c)
    }

    /// 标记缓冲为空
    pub fn buf_mark_empty(&mut self, h: BufHandle) -> Result<()> {
        self.pool.mark_empty(h)
    }

    /// 引用计数加一
    pub fn buf_inc_ref(&mut self, h: BufHandle) {
        self.pool.inc_ref(h)
    }

    /// 引用计数减一（饱和）
    pub fn buf_dec_ref(&mut self, h: BufHandle) {
        self.pool.dec_ref(h)
    }

    /// 为新页准备缓冲
    ///
    /// 已有同身份缓冲时直接返回它（引用计数加一），唯一持有者会把数据长度清零。
    /// 否则取一个空闲缓冲；没有空闲缓冲时先刷新脏页最多的组再试一次。
    /// 新缓冲内容为 0xFF，状态为空，引用计数为 1。
    pub fn buf_new(&mut self, kind: StreamType, father: u16, serial: u16, page_id: u16) -> Result<BufHandle> {
        self.check_page_id(page_id)?;
        if let Some(h) = self.pool.find_claimed(father, serial, page_id) {
            self.pool.inc_ref(h);
            self.pool.move_to_head(h.index());
            let buf = self.pool.meta_mut(h.index());
            if buf.ref_count() > 1 {
                log::error!(
                    "[PBUF] new buffer F:{:04x} S:{:04x} P:{} already referenced ({})",
                    father, serial, page_id, buf.ref_count()
                );
            } else {
                buf.data_len = 0;
            }
            return Ok(h);
        }

        let idx = self.take_free_buf()?;
        Ok(self.pool.claim(idx, kind, father, serial, page_id))
    }

    /// 按树节点获取缓冲，未缓存时从闪存载入
    ///
    /// 在节点所在块中找到保存 `page_id` 的最新物理页，读入并做 ECC 检查。
    /// 找不到页时返回 `NotFound`，读取或 ECC 失败时缓冲保持空闲。
    /// 已被 [`buf_new`](Self::buf_new) 占用但还是空的同身份缓冲直接载入，不另取缓冲。
    pub fn buf_get_ex(&mut self, node: &TreeNode, page_id: u16) -> Result<BufHandle> {
        let (kind, father, serial, block) = (node.kind(), node.father(), node.serial(), node.block());
        self.check_page_id(page_id)?;

        if let Some(h) = self.pool.get(father, serial, page_id) {
            return Ok(h);
        }

        let claimed = self.pool.find_claimed(father, serial, page_id);
        let idx = match claimed {
            Some(h) => h.index(),
            None => self.take_free_buf()?,
        };

        let info = self.bc.acquire(block)?;
        let located = self.locate_page(&info, page_id);
        let released = self.bc.release(info);
        let located = located?;
        released?;

        let Some((page, data_len)) = located else {
            log::error!(
                "[PBUF] can't find page F:{:04x} S:{:04x} P:{} in block {}",
                father, serial, page_id, block
            );
            return Err(Error::new(ErrorKind::NotFound, "Logical page not found in block"));
        };

        if claimed.is_none() {
            self.pool.assign(idx, kind, father, serial, page_id);
        }
        self.load_into(idx, block, page, true)?;

        let data_size = self.pool.data_size();
        let buf = self.pool.meta_mut(idx);
        if data_len as usize > data_size {
            log::warn!("[PBUF] page data length {} exceeds page size, truncated", data_len);
        }
        buf.data_len = data_len.min(data_size as u16);
        buf.get();
        self.pool.move_to_head(idx);

        Ok(BufHandle(idx))
    }

    /// 写入缓冲
    ///
    /// 数据复制到 `offset` 处，缓冲加入所属脏组。没有所属脏组且没有空闲组时
    /// 先刷新脏页最多的组。写入后组内脏页数达到上限则立即刷新该组。
    pub fn buf_write(&mut self, h: BufHandle, offset: usize, data: &[u8]) -> Result<()> {
        let idx = h.index();
        let data_size = self.pool.data_size();
        if offset.checked_add(data.len()).map_or(true, |end| end > data_size) {
            log::error!(
                "[PBUF] write {} bytes at {} exceeds page data size {}",
                data.len(), offset, data_size
            );
            return Err(Error::new(ErrorKind::InvalidInput, "Write exceeds page data size"));
        }
        if !self.pool.meta(idx).is_pooled() {
            return Err(Error::new(ErrorKind::InvalidState, "Buffer is a clone"));
        }

        let (father, serial, page_id) = {
            let buf = self.pool.meta(idx);
            (buf.father(), buf.serial(), buf.page_id())
        };
        self.check_page_id(page_id)?;

        let slot = match self.pool.find_group_slot(father, serial) {
            Some(slot) => slot,
            None => match self.pool.find_free_group_slot() {
                Some(slot) => slot,
                None => {
                    self.flush_most_dirty_group()?;
                    self.pool.find_free_group_slot().ok_or_else(|| {
                        log::error!("[PBUF] no free dirty group slot after flush");
                        Error::new(ErrorKind::NoSpace, "No free dirty group slot")
                    })?
                }
            },
        };

        self.pool.copy_in(idx, offset, data)?;
        if !self.pool.is_in_dirty_list(slot, idx) {
            self.pool.link_to_dirty(slot, idx);
        }

        if self.pool.group_count(slot) >= self.pool.dirty_max() {
            log::debug!("[PBUF] dirty group {} reached {} pages, flush", slot, self.pool.dirty_max());
            self.flush_group(father, serial)?;
        }
        Ok(())
    }

    /// 从物理页载入缓冲（带 ECC 检查）
    ///
    /// 成功时缓冲为有效，失败时为空。
    pub fn load_phy_data(&mut self, h: BufHandle, block: u16, page: u16) -> Result<()> {
        self.load_into(h.index(), block, page, true)
    }

    /// 从物理页载入缓冲，忽略 ECC 结果
    ///
    /// 只有 I/O 失败才返回错误；ECC 不通过时缓冲状态不变。
    pub fn load_phy_data_ecc_uncare(&mut self, h: BufHandle, block: u16, page: u16) -> Result<()> {
        self.load_into(h.index(), block, page, false)
    }

    /// 从物理页载入克隆缓冲（带 ECC 检查）
    pub fn load_clone_phy_data(&mut self, c: &ClonedBuf, block: u16, page: u16) -> Result<()> {
        self.load_into(c.index(), block, page, true)
    }

    pub(crate) fn load_into(&mut self, idx: usize, block: u16, page: u16, ecc_care: bool) -> Result<()> {
        if self.pool.meta(idx).is_dirty() {
            log::error!("[PBUF] load block {} page {} over a dirty buffer", block, page);
            return Err(Error::new(ErrorKind::InvalidState, "Buffer is dirty"));
        }

        let data = self.pool.page_mut(idx);
        if let Err(e) = self.flash.read_page(block, page, data) {
            self.pool.meta_mut(idx).mark = BufMark::Empty;
            return Err(e);
        }

        let data = self.pool.page(idx);
        match self.flash.check_bad_block(block, data) {
            Ok(()) => {
                self.pool.meta_mut(idx).mark = BufMark::Valid;
                Ok(())
            }
            Err(e) if ecc_care => {
                log::warn!("[PBUF] block {} page {} ECC check failed: {}", block, page, e);
                self.pool.meta_mut(idx).mark = BufMark::Empty;
                Err(e)
            }
            Err(e) => {
                log::debug!("[PBUF] block {} page {} ECC ignored: {}", block, page, e);
                Ok(())
            }
        }
    }

    /// 取一个空闲缓冲，没有时刷新脏页最多的组再试一次
    fn take_free_buf(&mut self) -> Result<usize> {
        if let Some(idx) = self.pool.find_free() {
            return Ok(idx);
        }
        if let Err(e) = self.flush_most_dirty_group() {
            log::warn!("[PBUF] flush for free buffer failed: {}", e);
        }
        self.pool.find_free().ok_or_else(|| {
            log::error!("[PBUF] insufficient page buffers");
            Error::new(ErrorKind::NoSpace, "No free page buffer")
        })
    }

    /// 逻辑页号必须落在一个块内，tag 中只保存一个字节的页位置
    fn check_page_id(&self, page_id: u16) -> Result<()> {
        let pages_per_block = self.flash.pages_per_block();
        if page_id >= pages_per_block {
            log::error!("[PBUF] page id {} out of range (pages per block {})", page_id, pages_per_block);
            return Err(Error::new(ErrorKind::InvalidInput, "Page id exceeds pages per block"));
        }
        Ok(())
    }

    /// 在块中定位逻辑页：返回 (物理页, 数据长度)
    fn locate_page(&mut self, info: &BlockInfoRef, page_id: u16) -> Result<Option<(u16, u16)>> {
        let Some(first) = self.bc.find_page_with_id(&mut self.flash, info, page_id)? else {
            return Ok(None);
        };
        let best = self.bc.find_best_page(&mut self.flash, info, first, &self.ts)?;
        Ok(Some((best, self.bc.spare(info, best).tag.data_len)))
    }
}
