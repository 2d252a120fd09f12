//! 刷新策略实现
//!
//! 所有策略都按逻辑页号递增的顺序写页。追加写入每写成功一页就提交一页；
//! 新建块和块恢复要等整块写完、节点登记之后才把缓冲标记为有效，
//! 中途失败时缓冲保持为脏，节点不变。

use crate::block_info::BlockInfoRef;
use crate::buffer::BufMark;
use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::flash::{FlashDevice, TimeStampPolicy};
use crate::tree::TreeIndex;
use crate::types::{Pages, StreamType, TreeNode};

/// 刷新策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStrategy {
    /// 追加到节点现有块的空白页
    Append,
    /// 节点不存在，写入新块并登记节点
    AllocateNew,
    /// 合并新旧内容写入新块，回收旧块
    Recover,
}

impl FlushStrategy {
    /// 选择策略
    ///
    /// # 参数
    ///
    /// * `node_exists` - 树中是否已有该节点
    /// * `free_pages` - 节点块尾部空白页数
    /// * `dirty` - 组内脏页数
    /// * `force_recover` - 强制块恢复
    pub fn choose(node_exists: bool, free_pages: u16, dirty: usize, force_recover: bool) -> Self {
        if !node_exists {
            Self::AllocateNew
        } else if !force_recover && free_pages as usize >= dirty {
            Self::Append
        } else {
            Self::Recover
        }
    }
}

/// 脏组身份
#[derive(Debug, Clone, Copy)]
struct GroupId {
    kind: StreamType,
    father: u16,
    serial: u16,
}

impl<F: FlashDevice, T: TreeIndex, S: TimeStampPolicy> Device<F, T, S> {
    /// 刷新一个脏组
    pub(crate) fn flush_slot(&mut self, slot: usize, force_recover: bool) -> Result<()> {
        if self.pool.group_count(slot) == 0 {
            return Ok(());
        }
        self.pool.check_dirty_list(slot)?;

        let Some(head) = self.pool.group_members(slot).next() else {
            return Ok(());
        };
        let buf = self.pool.buf(head);
        let id = GroupId {
            kind: buf.kind(),
            father: buf.father(),
            serial: buf.serial(),
        };

        self.pool.stats_mut().flushes += 1;
        let result = match self.tree.find_node(id.kind, id.father, id.serial) {
            None => {
                log::debug!(
                    "[FLUSH] F:{:04x} S:{:04x} {} dirty -> {:?}",
                    id.father,
                    id.serial,
                    self.pool.group_count(slot),
                    FlushStrategy::AllocateNew
                );
                self.flush_new_block(slot, id)
            }
            Some(node) => self.flush_existing(slot, node, force_recover),
        };

        if let Err(e) = &result {
            self.pool.stats_mut().failed_flushes += 1;
            log::warn!("[FLUSH] F:{:04x} S:{:04x} flush failed: {}", id.father, id.serial, e);
        }
        result
    }

    fn flush_existing(&mut self, slot: usize, node: TreeNode, force_recover: bool) -> Result<()> {
        let old = self.bc.acquire(node.block())?;
        let result = self.flush_existing_with(slot, node, &old, force_recover);
        let released = self.bc.release(old);
        result?;
        released
    }

    fn flush_existing_with(&mut self, slot: usize, node: TreeNode, old: &BlockInfoRef, force_recover: bool) -> Result<()> {
        self.bc.load(&mut self.flash, old, Pages::All)?;
        let free = self.bc.free_pages_count(old);
        let count = self.pool.group_count(slot);

        let strategy = FlushStrategy::choose(true, free, count, force_recover);
        log::debug!(
            "[FLUSH] F:{:04x} S:{:04x} {} dirty, block {} has {} free pages -> {:?}",
            node.father(),
            node.serial(),
            count,
            old.block(),
            free,
            strategy
        );

        match strategy {
            FlushStrategy::Append => self.flush_append(slot, old, free),
            _ => self.flush_recover(slot, node, old),
        }
    }

    // ===== 追加写入 =====

    fn flush_append(&mut self, slot: usize, info: &BlockInfoRef, free: u16) -> Result<()> {
        let ppb = self.flash.pages_per_block();
        let block_ts = self.bc.block_time_stamp(&mut self.flash, info, &self.ts)?;
        let mut page = ppb - free;

        while self.pool.group_count(slot) > 0 {
            let Some(idx) = self.pool.find_min_page_id(slot) else {
                log::error!("[FLUSH] dirty group {} count {} but no buffer", slot, self.pool.group_count(slot));
                return Err(Error::new(ErrorKind::Corrupted, "Dirty group count mismatch"));
            };
            if page >= ppb {
                log::error!("[FLUSH] block {} ran out of free pages", info.block());
                return Err(Error::new(ErrorKind::Corrupted, "Free page count was wrong"));
            }

            self.write_buf_page(idx, info, page, block_ts)?;
            self.commit_buf(idx)?;
            page += 1;
        }
        Ok(())
    }

    // ===== 新建块 =====

    fn flush_new_block(&mut self, slot: usize, id: GroupId) -> Result<()> {
        let (block, info) = self.take_erased_block()?;

        let written = match self.write_new_block(slot, &info) {
            Ok(n) => n,
            Err(e) => {
                self.abandon_block(info);
                return Err(e);
            }
        };

        if written == 0 {
            log::error!(
                "[FLUSH] F:{:04x} S:{:04x} has no dirty page 0, can't create node",
                id.father,
                id.serial
            );
            self.release_info(info);
            self.tree.put_erased_head(block);
            return Err(Error::new(ErrorKind::InvalidState, "New node needs page 0"));
        }
        if self.pool.group_count(slot) > written as usize {
            log::warn!(
                "[FLUSH] F:{:04x} S:{:04x} still has dirty buffers after new block {}",
                id.father,
                id.serial,
                block
            );
        }

        let checksum = self.bc.spare(&info, 0).tag.data_sum;
        self.tree.insert_node(TreeNode::new(id.kind, id.father, id.serial, block, checksum));

        let committed = self.commit_pages(slot, written);
        let released = self.bc.release(info);
        committed?;
        released
    }

    /// 把组内 0 号页开始连续的脏页写入新块，返回写入页数
    fn write_new_block(&mut self, slot: usize, info: &BlockInfoRef) -> Result<u16> {
        let ts = self.ts.first();
        let mut written = 0;
        for page in 0..self.flash.pages_per_block() {
            let Some(idx) = self.pool.find_in_dirty(slot, page) else {
                break;
            };
            self.write_buf_page(idx, info, page, ts)?;
            written += 1;
        }
        Ok(written)
    }

    // ===== 块恢复 =====

    fn flush_recover(&mut self, slot: usize, node: TreeNode, old: &BlockInfoRef) -> Result<()> {
        let id = GroupId {
            kind: node.kind(),
            father: node.father(),
            serial: node.serial(),
        };
        let (new_block, new) = self.take_erased_block()?;

        let written = match self.copy_to_new_block(slot, id, old, &new) {
            Ok(0) => {
                log::error!("[FLUSH] recover block {}: nothing to write", old.block());
                self.release_info(new);
                self.tree.put_erased_head(new_block);
                return Err(Error::new(ErrorKind::InvalidState, "Nothing to recover"));
            }
            Ok(n) => n,
            Err(e) => {
                log::warn!(
                    "[FLUSH] recover block {} -> {} aborted: {}",
                    old.block(),
                    new_block,
                    e
                );
                self.abandon_block(new);
                return Err(e);
            }
        };

        let mut updated = node;
        updated.relocate(new_block, self.bc.spare(&new, 0).tag.data_sum);
        self.tree.update_node(updated);
        let committed = self.commit_pages(slot, written);

        let old_block = old.block();
        self.bc.expire(old, Pages::All);
        if self.flash.pending_bad_block() == Some(old_block) {
            log::warn!("[FLUSH] old block {} is bad, hand over to bad block processing", old_block);
            self.tree.process_bad_block(old_block);
            self.flash.clear_bad_block();
        } else {
            self.reclaim_block(old_block);
        }

        self.pool.stats_mut().recoveries += 1;
        log::debug!("[FLUSH] recovered block {} -> {} ({} pages)", old_block, new_block, written);

        let released = self.bc.release(new);
        committed?;
        released
    }

    /// 把脏页和旧块中的有效页按逻辑页号合并写入新块，返回写入页数
    ///
    /// 遇到既没有脏缓冲、旧块中也没有的逻辑页时停止。
    fn copy_to_new_block(&mut self, slot: usize, id: GroupId, old: &BlockInfoRef, new: &BlockInfoRef) -> Result<u16> {
        let old_ts = self.bc.block_time_stamp(&mut self.flash, old, &self.ts)?;
        let ts = self.ts.next(old_ts);

        let mut written = 0;
        for page in 0..self.flash.pages_per_block() {
            if let Some(idx) = self.pool.find_in_dirty(slot, page) {
                self.write_buf_page(idx, new, page, ts)?;
            } else {
                let Some(found) = self.bc.find_page_with_id(&mut self.flash, old, page)? else {
                    break;
                };
                let best = self.bc.find_best_page(&mut self.flash, old, found, &self.ts)?;
                self.copy_old_page(id, old, best, new, page, ts)?;
            }
            written += 1;
        }
        Ok(written)
    }

    /// 用克隆缓冲把旧块的一页搬到新块
    ///
    /// 旧页 ECC 不通过时照原样搬走，驱动已记下坏块，提交时旧块交给坏块处理。
    fn copy_old_page(
        &mut self,
        id: GroupId,
        old: &BlockInfoRef,
        src_page: u16,
        new: &BlockInfoRef,
        page: u16,
        ts: u8,
    ) -> Result<()> {
        let clone = self.pool.clone_buf(None)?;
        let result = self.write_clone_page(clone.index(), id, old, src_page, new, page, ts);
        let freed = self.pool.free_clone(clone);
        result?;
        freed
    }

    fn write_clone_page(
        &mut self,
        idx: usize,
        id: GroupId,
        old: &BlockInfoRef,
        src_page: u16,
        new: &BlockInfoRef,
        page: u16,
        ts: u8,
    ) -> Result<()> {
        match self.load_into(idx, old.block(), src_page, true) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Ecc => {
                log::warn!("[FLUSH] block {} page {} ECC failed, copy without ECC check", old.block(), src_page);
                self.load_into(idx, old.block(), src_page, false)?;
            }
            Err(e) => return Err(e),
        }

        let data_len = self.bc.spare(old, src_page).tag.data_len;
        let data_size = self.pool.data_size() as u16;
        if data_len > data_size {
            log::warn!("[FLUSH] block {} page {} data length {} too large", old.block(), src_page, data_len);
        }

        let buf = self.pool.meta_mut(idx);
        buf.kind = id.kind;
        buf.father = id.father;
        buf.serial = id.serial;
        buf.page_id = page;
        buf.data_len = data_len.min(data_size);

        self.write_buf_page(idx, new, page, ts)
    }

    // ===== 公共步骤 =====

    /// 写一页并记录 spare，失败时该页 spare 失效
    fn write_buf_page(&mut self, idx: usize, info: &BlockInfoRef, page: u16, block_ts: u8) -> Result<()> {
        let tag = self.pool.make_tag(idx, block_ts);
        if let Err(e) = self.flash.write_data_to_new_page(info.block(), page, &tag, self.pool.page(idx)) {
            log::error!("[FLUSH] write block {} page {} failed: {}", info.block(), page, e);
            self.bc.expire(info, Pages::One(page));
            return Err(e);
        }
        self.bc.record_written(info, page, tag);
        Ok(())
    }

    /// 缓冲已落盘：摘出脏组，标记有效，移到头部
    fn commit_buf(&mut self, idx: usize) -> Result<()> {
        self.pool.break_from_dirty(idx)?;
        self.pool.meta_mut(idx).mark = BufMark::Valid;
        self.pool.move_to_head(idx);
        Ok(())
    }

    /// 提交写入新块的前 `written` 个逻辑页对应的脏缓冲
    fn commit_pages(&mut self, slot: usize, written: u16) -> Result<()> {
        for page in 0..written {
            if let Some(idx) = self.pool.find_in_dirty(slot, page) {
                self.commit_buf(idx)?;
            }
        }
        Ok(())
    }

    /// 从擦除块队列取一块并获取它的块信息
    fn take_erased_block(&mut self) -> Result<(u16, BlockInfoRef)> {
        let Some(block) = self.tree.take_erased() else {
            log::error!("[FLUSH] no erased block available");
            return Err(Error::new(ErrorKind::NoSpace, "No erased block"));
        };
        match self.bc.acquire(block) {
            Ok(info) => {
                // 块可能在上一轮使用时被缓存过
                self.bc.expire(&info, Pages::All);
                Ok((block, info))
            }
            Err(e) => {
                self.tree.put_erased_head(block);
                Err(e)
            }
        }
    }

    /// 放弃写了一半的新块：信息失效并归还，块擦除后回收
    fn abandon_block(&mut self, info: BlockInfoRef) {
        let block = info.block();
        self.bc.expire(&info, Pages::All);
        self.release_info(info);
        self.reclaim_block(block);
    }

    /// 擦除块并放回擦除队列尾部，擦除失败交给坏块处理
    fn reclaim_block(&mut self, block: u16) {
        match self.flash.erase_block(block) {
            Ok(()) => self.tree.put_erased_tail(block),
            Err(e) => {
                log::warn!("[FLUSH] erase block {} failed: {}, treat as bad", block, e);
                self.tree.process_bad_block(block);
            }
        }
    }

    fn release_info(&mut self, info: BlockInfoRef) {
        let block = info.block();
        if let Err(e) = self.bc.release(info) {
            log::error!("[FLUSH] release block {} info failed: {}", block, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::sum16;
    use crate::device::DeviceConfig;
    use crate::flash::DecodedTag;
    use crate::testing::{test_config, test_device, MemTree, RamFlash, TEST_PAGES_PER_BLOCK};
    use alloc::vec::Vec;

    type Dev = Device<RamFlash, MemTree>;

    const FATHER: u16 = 1;
    const SERIAL: u16 = 2;

    fn write_page(dev: &mut Dev, kind: StreamType, serial: u16, page_id: u16, fill: u8, len: usize) {
        let h = dev.buf_new(kind, FATHER, serial, page_id).unwrap();
        let data = alloc::vec![fill; len];
        dev.buf_write(h, 0, &data).unwrap();
        dev.buf_put(h).unwrap();
    }

    fn mark(dev: &Dev, page_id: u16) -> Option<BufMark> {
        dev.buf_find(FATHER, SERIAL, page_id).map(|h| dev.pool().buf(h).mark())
    }

    fn node(dev: &Dev) -> TreeNode {
        dev.tree().find_node(StreamType::Data, FATHER, SERIAL).unwrap()
    }

    fn write_log(dev: &Dev) -> Vec<(u16, u16, u8)> {
        dev.flash().device().write_log.clone()
    }

    /// 新建一个写满整块的数据节点（逻辑页 0..8）
    fn full_block(dev: &mut Dev) {
        for page_id in 0..TEST_PAGES_PER_BLOCK {
            write_page(dev, StreamType::Data, SERIAL, page_id, page_id as u8, 10);
        }
        assert_eq!(dev.flash().device().programmed_pages(0), 8);
        assert_eq!(node(dev).block(), 0);
    }

    #[test]
    fn test_choose_strategy() {
        assert_eq!(FlushStrategy::choose(false, 0, 3, true), FlushStrategy::AllocateNew);
        assert_eq!(FlushStrategy::choose(true, 3, 3, false), FlushStrategy::Append);
        assert_eq!(FlushStrategy::choose(true, 2, 3, false), FlushStrategy::Recover);
        assert_eq!(FlushStrategy::choose(true, 8, 3, true), FlushStrategy::Recover);
    }

    #[test]
    fn test_allocate_new_then_append() {
        let mut dev = test_device(test_config(8, 4, 2, 4));
        write_page(&mut dev, StreamType::Data, SERIAL, 1, 0xA1, 5);
        write_page(&mut dev, StreamType::Data, SERIAL, 0, 0xA0, 5);
        dev.flush_group(FATHER, SERIAL).unwrap();

        assert_eq!(node(&dev).block(), 0);
        assert_eq!(write_log(&dev), [(0, 0, 0), (0, 1, 1)]);
        assert_eq!(mark(&dev, 0), Some(BufMark::Valid));
        assert_eq!(mark(&dev, 1), Some(BufMark::Valid));
        assert_eq!(dev.find_group_slot(FATHER, SERIAL), None);

        // 新块的时间戳是第一代
        match dev.flash().device().tag(0, 0) {
            DecodedTag::Written { tag, check_ok } => {
                assert!(check_ok);
                assert_eq!(tag.block_ts, 0);
                assert_eq!(tag.data_len, 5);
            }
            DecodedTag::Erased => panic!("page 0 not written"),
        }

        write_page(&mut dev, StreamType::Data, SERIAL, 2, 0xB2, 6);
        write_page(&mut dev, StreamType::Data, SERIAL, 1, 0xB1, 7);
        dev.flush_group(FATHER, SERIAL).unwrap();

        // 追加按逻辑页号递增
        assert_eq!(&write_log(&dev)[2..], [(0, 2, 1), (0, 3, 2)]);
        assert_eq!(node(&dev).block(), 0);
        assert_eq!(dev.stats().recoveries, 0);

        // 丢弃缓存后重新载入，得到最新副本
        let h = dev.buf_find(FATHER, SERIAL, 1).unwrap();
        dev.buf_mark_empty(h).unwrap();
        let n = node(&dev);
        let h = dev.buf_get_ex(&n, 1).unwrap();
        assert_eq!(dev.pool().buf(h).data_len(), 7);
        assert_eq!(dev.pool().data(h)[0], 0xB1);
        dev.buf_put(h).unwrap();
    }

    #[test]
    fn test_dirty_limit_triggers_flush() {
        let mut dev = test_device(test_config(4, 4, 2, 4));
        for page_id in 0..3 {
            write_page(&mut dev, StreamType::Data, SERIAL, page_id, 0x10, 8);
        }
        assert_eq!(dev.pool().group_count(0), 3);
        assert_eq!(dev.flash().stats().page_writes, 0);

        write_page(&mut dev, StreamType::Data, SERIAL, 3, 0x10, 8);
        assert_eq!(dev.find_group_slot(FATHER, SERIAL), None);
        assert_eq!(dev.flash().stats().page_writes, 4);

        write_page(&mut dev, StreamType::Data, SERIAL, 4, 0x10, 8);
        let slot = dev.find_group_slot(FATHER, SERIAL).unwrap();
        assert!(dev.pool().group_count(slot) <= 1);
        assert_eq!(dev.tree().nodes.len(), 1);
    }

    #[test]
    fn test_file_node_checksum() {
        let mut dev = test_device(test_config(4, 4, 2, 4));
        write_page(&mut dev, StreamType::File, SERIAL, 0, 0x77, 9);
        dev.flush_all().unwrap();

        let n = dev.tree().find_node(StreamType::File, FATHER, SERIAL).unwrap();
        assert_eq!(n.checksum(), Some(sum16(&[0x77; 9])));
    }

    #[test]
    fn test_append_write_failure() {
        let mut dev = test_device(test_config(10, 8, 2, 4));
        write_page(&mut dev, StreamType::Data, SERIAL, 0, 0x00, 4);
        dev.flush_all().unwrap();

        for page_id in 1..6 {
            write_page(&mut dev, StreamType::Data, SERIAL, page_id, page_id as u8, 4);
        }
        dev.flash_mut().device_mut().fail_nth_write(3);

        let err = dev.flush_group(FATHER, SERIAL).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(dev.stats().failed_flushes, 1);

        // 已写入的两页提交，其余仍为脏
        assert_eq!(mark(&dev, 1), Some(BufMark::Valid));
        assert_eq!(mark(&dev, 2), Some(BufMark::Valid));
        for page_id in 3..6 {
            assert_eq!(mark(&dev, page_id), Some(BufMark::Dirty));
        }
        let slot = dev.find_group_slot(FATHER, SERIAL).unwrap();
        assert_eq!(dev.pool().group_count(slot), 3);

        // 重试从失败的页继续
        dev.flush_group(FATHER, SERIAL).unwrap();
        assert_eq!(&write_log(&dev)[3..], [(0, 3, 3), (0, 4, 4), (0, 5, 5)]);
        assert_eq!(dev.find_group_slot(FATHER, SERIAL), None);
    }

    #[test]
    fn test_recover_when_block_full() {
        let mut dev = test_device(test_config(10, 8, 2, 4));
        full_block(&mut dev);

        write_page(&mut dev, StreamType::Data, SERIAL, 3, 0xC3, 12);
        dev.flush_group(FATHER, SERIAL).unwrap();

        assert_eq!(node(&dev).block(), 1);
        assert_eq!(dev.stats().recoveries, 1);
        assert_eq!(mark(&dev, 3), Some(BufMark::Valid));
        assert_eq!(dev.pool().recency_order().count(), 10);

        let flash = dev.flash().device();
        assert_eq!(flash.programmed_pages(1), 8);
        assert_eq!(flash.programmed_pages(0), 0);
        assert_eq!(flash.data(1, 3)[..12], [0xC3; 12]);
        assert_eq!(flash.data(1, 5)[..10], [5; 10]);
        match flash.tag(1, 5) {
            DecodedTag::Written { tag, .. } => {
                assert_eq!(tag.page_id, 5);
                assert_eq!(tag.data_len, 10);
                // 新块时间戳为旧块的下一代
                assert_eq!(tag.block_ts, 1);
            }
            DecodedTag::Erased => panic!("page 5 not copied"),
        }

        // 旧块擦除后放回队尾
        assert_eq!(dev.tree().erased.back(), Some(&0));
    }

    #[test]
    fn test_force_recover() {
        let mut dev = test_device(test_config(10, 8, 2, 4));
        write_page(&mut dev, StreamType::Data, SERIAL, 0, 0x01, 4);
        dev.flush_all().unwrap();

        write_page(&mut dev, StreamType::Data, SERIAL, 1, 0x02, 4);
        dev.flush_group_ex(FATHER, SERIAL, true).unwrap();
        assert_eq!(node(&dev).block(), 1);
        assert_eq!(dev.flash().device().programmed_pages(1), 2);
    }

    #[test]
    fn test_recover_write_failure_leaves_node() {
        let mut dev = test_device(test_config(10, 8, 2, 4));
        full_block(&mut dev);

        write_page(&mut dev, StreamType::Data, SERIAL, 2, 0xD2, 4);
        write_page(&mut dev, StreamType::Data, SERIAL, 3, 0xD3, 4);
        dev.flash_mut().device_mut().fail_nth_write(4);

        let err = dev.flush_group(FATHER, SERIAL).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);

        assert_eq!(node(&dev).block(), 0);
        assert_eq!(dev.flash().device().programmed_pages(0), 8);
        assert_eq!(mark(&dev, 2), Some(BufMark::Dirty));
        assert_eq!(mark(&dev, 3), Some(BufMark::Dirty));
        assert_eq!(dev.pool().group_count(0), 2);
        assert_eq!(dev.stats().recoveries, 0);

        // 新块擦除回收，克隆全部归还
        assert_eq!(dev.flash().device().programmed_pages(1), 0);
        assert_eq!(dev.tree().erased.back(), Some(&1));
        assert_eq!(dev.pool().recency_order().count(), 10);
        assert!(dev.block_info().is_all_free());

        dev.flush_group(FATHER, SERIAL).unwrap();
        assert_eq!(node(&dev).block(), 2);
        assert_eq!(dev.flash().device().data(2, 2)[..4], [0xD2; 4]);
    }

    #[test]
    fn test_recover_ecc_failure_and_bad_block() {
        let mut dev = test_device(test_config(10, 8, 2, 4));
        full_block(&mut dev);

        // 旧块第 0 页一直读不对，恢复照样把它搬走
        dev.flash_mut().device_mut().corrupt_reads.push((0, 0));
        write_page(&mut dev, StreamType::Data, SERIAL, 4, 0xE4, 4);

        dev.flush_group(FATHER, SERIAL).unwrap();
        assert_eq!(node(&dev).block(), 1);
        assert_eq!(mark(&dev, 4), Some(BufMark::Valid));
        assert_eq!(dev.find_group_slot(FATHER, SERIAL), None);
        assert_eq!(dev.stats().recoveries, 1);

        let flash = dev.flash().device();
        assert_eq!(flash.programmed_pages(1), 8);
        assert_eq!(flash.data(1, 4)[..4], [0xE4; 4]);
        assert_eq!(flash.data(1, 1)[..10], [1; 10]);

        // 旧块交给坏块处理，不再回到擦除队列
        assert_eq!(dev.tree().bad, [0]);
        assert!(!dev.tree().erased.contains(&0));
        assert_eq!(dev.flash().pending_bad_block(), None);
        assert_eq!(dev.pool().recency_order().count(), 10);
    }

    #[test]
    fn test_recover_routes_known_bad_block() {
        let mut dev = test_device(test_config(10, 8, 2, 4));
        full_block(&mut dev);
        dev.flash_mut().device_mut().set_bad_block(0);

        write_page(&mut dev, StreamType::Data, SERIAL, 2, 0xB2, 4);
        dev.flush_group(FATHER, SERIAL).unwrap();

        assert_eq!(node(&dev).block(), 1);
        assert_eq!(dev.tree().bad, [0]);
        assert!(!dev.tree().erased.contains(&0));
        assert_eq!(dev.flash().pending_bad_block(), None);
        // 坏块不擦除
        assert_eq!(dev.flash().device().programmed_pages(0), 8);
    }

    #[test]
    fn test_recover_without_free_buffer() {
        let mut dev = test_device(test_config(3, 8, 2, 4));
        for page_id in 0..3 {
            write_page(&mut dev, StreamType::Data, SERIAL, page_id, 0x01, 4);
        }
        dev.flush_all().unwrap();

        // 两个脏页 + 一个被引用的缓冲，克隆没有可用缓冲
        write_page(&mut dev, StreamType::Data, SERIAL, 1, 0x02, 4);
        write_page(&mut dev, StreamType::Data, SERIAL, 2, 0x02, 4);
        let held = dev.buf_new(StreamType::Data, 7, 7, 0).unwrap();

        let err = dev.flush_group_ex(FATHER, SERIAL, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSpace);
        assert_eq!(node(&dev).block(), 0);
        assert_eq!(mark(&dev, 1), Some(BufMark::Dirty));
        assert_eq!(dev.tree().erased.back(), Some(&1));
        dev.buf_put(held).unwrap();
    }

    #[test]
    fn test_allocate_new_needs_page_zero() {
        let mut dev = test_device(test_config(4, 4, 2, 4));
        write_page(&mut dev, StreamType::Data, SERIAL, 1, 0x01, 4);

        let err = dev.flush_all().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(dev.tree().nodes.is_empty());
        assert_eq!(dev.tree().erased.front(), Some(&0));
        assert_eq!(dev.flash().stats().page_writes, 0);
        assert_eq!(mark(&dev, 1), Some(BufMark::Dirty));
    }

    #[test]
    fn test_allocate_new_write_failure() {
        let mut dev = test_device(test_config(4, 4, 2, 4));
        write_page(&mut dev, StreamType::Data, SERIAL, 0, 0x01, 4);
        write_page(&mut dev, StreamType::Data, SERIAL, 1, 0x01, 4);
        dev.flash_mut().device_mut().fail_nth_write(2);

        let err = dev.flush_all().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(dev.tree().nodes.is_empty());
        // 已写入的页不提交，块擦除后回收
        assert_eq!(mark(&dev, 0), Some(BufMark::Dirty));
        assert_eq!(mark(&dev, 1), Some(BufMark::Dirty));
        assert_eq!(dev.flash().device().programmed_pages(0), 0);
        assert_eq!(dev.tree().erased.back(), Some(&0));
    }

    #[test]
    fn test_allocate_new_erase_failure_goes_bad() {
        let mut dev = test_device(test_config(4, 4, 2, 4));
        write_page(&mut dev, StreamType::Data, SERIAL, 0, 0x01, 4);
        let flash = dev.flash_mut().device_mut();
        flash.fail_all_writes = true;
        flash.fail_erases.push(0);

        assert!(dev.flush_all().is_err());
        assert_eq!(dev.tree().bad, [0]);
        assert!(!dev.tree().erased.contains(&0));
    }

    #[test]
    fn test_no_erased_block() {
        let mut dev = test_device(test_config(4, 4, 2, 4));
        dev.tree_mut().erased.clear();
        write_page(&mut dev, StreamType::Data, SERIAL, 0, 0x01, 4);

        let err = dev.flush_all().unwrap_err();
        assert!(err.is_exhaustion());
        assert_eq!(mark(&dev, 0), Some(BufMark::Dirty));
    }

    #[test]
    fn test_flush_group_match_father() {
        let mut dev = test_device(test_config(8, 4, 3, 4));
        write_page(&mut dev, StreamType::Data, 2, 0, 0x01, 4);
        write_page(&mut dev, StreamType::Data, 3, 0, 0x01, 4);
        let h = dev.buf_new(StreamType::Data, 9, 4, 0).unwrap();
        dev.buf_write(h, 0, b"x").unwrap();
        dev.buf_put(h).unwrap();

        dev.flush_group_match_father(FATHER).unwrap();
        assert_eq!(dev.find_group_slot(FATHER, 2), None);
        assert_eq!(dev.find_group_slot(FATHER, 3), None);
        assert!(dev.find_group_slot(9, 4).is_some());
        assert_eq!(dev.tree().nodes.len(), 2);
    }

    #[test]
    fn test_flush_only_when_groups_full() {
        let mut dev = test_device(test_config(8, 4, 2, 4));
        write_page(&mut dev, StreamType::Data, 2, 0, 0x01, 4);
        dev.flush().unwrap();
        assert!(dev.find_group_slot(FATHER, 2).is_some());

        write_page(&mut dev, StreamType::Data, 3, 0, 0x01, 4);
        write_page(&mut dev, StreamType::Data, 3, 1, 0x01, 4);
        assert_eq!(dev.find_free_group_slot(), None);

        dev.flush().unwrap();
        // 脏页最多的组被刷新
        assert!(dev.find_group_slot(FATHER, 2).is_some());
        assert_eq!(dev.find_group_slot(FATHER, 3), None);
    }

    #[test]
    fn test_write_evicts_group_when_slots_full() {
        let mut dev = test_device(test_config(8, 4, 1, 4));
        write_page(&mut dev, StreamType::Data, 2, 0, 0x01, 4);
        write_page(&mut dev, StreamType::Data, 3, 0, 0x01, 4);

        assert!(dev.tree().find_node(StreamType::Data, FATHER, 2).is_some());
        assert_eq!(dev.find_group_slot(FATHER, 3), Some(0));
    }

    #[test]
    fn test_uniqueness_after_flushes() {
        let mut dev = test_device(DeviceConfig::default());
        for round in 0..3u8 {
            for page_id in 0..4 {
                write_page(&mut dev, StreamType::Data, SERIAL, page_id, round, 4);
            }
            dev.flush_all().unwrap();
        }
        for page_id in 0..4 {
            let count = dev
                .pool()
                .recency_order()
                .filter(|h| {
                    let b = dev.pool().buf(*h);
                    b.mark() != BufMark::Empty && b.matches(FATHER, SERIAL, page_id)
                })
                .count();
            assert_eq!(count, 1);
        }
        dev.release_all().unwrap();
    }
}
