//! 脏组刷新模块
//!
//! 把一个脏组的所有缓冲写入闪存，按目标块的状态选择策略：
//!
//! - [`FlushStrategy::Append`] - 节点已有块且尾部空白页足够，追加写入
//! - [`FlushStrategy::AllocateNew`] - 节点还不存在，取一个擦除块新建
//! - [`FlushStrategy::Recover`] - 空白页不够（或强制），把新旧内容合并写入新块，
//!   成功后提交节点并回收旧块
//!
//! # 使用示例
//!
//! ```rust,ignore
//! // 刷新某个文件的脏页
//! dev.flush_group(father, serial)?;
//!
//! // 刷新某个目录下所有条目
//! dev.flush_group_match_father(dir_serial)?;
//!
//! // 卸载前刷新全部
//! dev.flush_all()?;
//! ```

mod strategy;

pub use strategy::FlushStrategy;

use crate::device::Device;
use crate::error::Result;
use crate::flash::{FlashDevice, TimeStampPolicy};
use crate::tree::TreeIndex;

impl<F: FlashDevice, T: TreeIndex, S: TimeStampPolicy> Device<F, T, S> {
    /// 有空闲脏组时什么都不做，否则刷新脏页最多的组
    pub fn flush(&mut self) -> Result<()> {
        self.flush_ex(false)
    }

    /// 同 [`flush`](Self::flush)，`force_recover` 为真时强制走块恢复
    pub fn flush_ex(&mut self, force_recover: bool) -> Result<()> {
        if self.pool.find_free_group_slot().is_some() {
            return Ok(());
        }
        match self.pool.most_dirty_group() {
            Some(slot) => self.flush_slot(slot, force_recover),
            None => Ok(()),
        }
    }

    /// 刷新脏页最多的组，没有脏组时直接返回
    pub fn flush_most_dirty_group(&mut self) -> Result<()> {
        match self.pool.most_dirty_group() {
            Some(slot) => self.flush_slot(slot, false),
            None => Ok(()),
        }
    }

    /// 刷新 (father, serial) 的脏组
    pub fn flush_group(&mut self, father: u16, serial: u16) -> Result<()> {
        self.flush_group_ex(father, serial, false)
    }

    /// 同 [`flush_group`](Self::flush_group)，可以强制走块恢复
    pub fn flush_group_ex(&mut self, father: u16, serial: u16, force_recover: bool) -> Result<()> {
        match self.pool.find_group_slot(father, serial) {
            Some(slot) => self.flush_slot(slot, force_recover),
            None => Ok(()),
        }
    }

    /// 刷新所有 father 匹配的脏组，遇到失败即停止
    pub fn flush_group_match_father(&mut self, father: u16) -> Result<()> {
        for slot in 0..self.pool.group_slots() {
            if matches!(self.pool.group_owner(slot), Some((f, _)) if f == father) {
                self.flush_slot(slot, false)?;
            }
        }
        Ok(())
    }

    /// 刷新所有脏组，遇到失败即停止
    pub fn flush_all(&mut self) -> Result<()> {
        for slot in 0..self.pool.group_slots() {
            if self.pool.group_count(slot) > 0 {
                self.flush_slot(slot, false)?;
            }
        }
        Ok(())
    }

    /// 第一个空闲脏组
    pub fn find_free_group_slot(&self) -> Option<usize> {
        self.pool.find_free_group_slot()
    }

    /// 属于 (father, serial) 的脏组
    pub fn find_group_slot(&self, father: u16, serial: u16) -> Option<usize> {
        self.pool.find_group_slot(father, serial)
    }
}
