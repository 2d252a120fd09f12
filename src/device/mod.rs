//! 设备上下文
//!
//! [`Device`] 把闪存驱动、树索引、块信息缓存和页缓冲池绑在一起，
//! 所有缓冲操作和刷新都以它为入口。单线程使用，调用方负责串行化。
//!
//! # 主要组件
//!
//! - [`Device`] - 设备上下文
//! - [`DeviceConfig`] - 缓冲层配置
//!
//! # 使用示例
//!
//! ```rust,ignore
//! use nandfs_core::{Device, DeviceConfig, StreamType};
//!
//! let mut dev = Device::new(my_nand, my_tree, DeviceConfig::default())?;
//!
//! let h = dev.buf_new(StreamType::Data, file, data_serial, 0)?;
//! dev.buf_write(h, 0, &payload)?;
//! dev.buf_put(h)?;
//!
//! dev.flush_all()?;
//! dev.release_all()?;
//! ```

mod buffer_ops;
mod config;

pub use config::DeviceConfig;

use crate::block_info::BlockInfoCache;
use crate::buffer::{PageBufferPool, PoolStats};
use crate::error::{Error, ErrorKind, Result};
use crate::flash::{CyclicTimeStamp, FlashDev, FlashDevice, TimeStampPolicy};
use crate::tree::TreeIndex;

/// 设备上下文
pub struct Device<F, T, S = CyclicTimeStamp> {
    /// 闪存驱动
    pub(crate) flash: FlashDev<F>,
    /// 树索引
    pub(crate) tree: T,
    /// 时间戳策略
    pub(crate) ts: S,
    /// 块信息缓存
    pub(crate) bc: BlockInfoCache,
    /// 页缓冲池
    pub(crate) pool: PageBufferPool,
    /// 配置
    config: DeviceConfig,
}

impl<F: FlashDevice, T: TreeIndex> Device<F, T> {
    /// 使用默认时间戳策略创建设备
    pub fn new(flash: F, tree: T, config: DeviceConfig) -> Result<Self> {
        Self::with_time_stamp(flash, tree, CyclicTimeStamp, config)
    }
}

impl<F: FlashDevice, T: TreeIndex, S: TimeStampPolicy> Device<F, T, S> {
    /// 创建设备
    ///
    /// 校验配置，分配块信息缓存和页缓冲池。单组脏页上限截断到每块页数。
    pub fn with_time_stamp(flash: F, tree: T, ts: S, config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let flash = FlashDev::new(flash)?;
        let ppb = flash.pages_per_block();

        let bc = BlockInfoCache::new(config.max_cached_blocks, ppb)?;
        let pool = PageBufferPool::new(
            config.max_page_buffers,
            flash.page_size(),
            flash.ecc_size(),
            config.dirty_limit(ppb),
            config.max_dirty_groups,
        )?;

        log::info!(
            "[PBUF] device ready: {} pages/block, {} bytes/page, {} buffers",
            ppb,
            flash.page_size(),
            config.max_page_buffers
        );

        Ok(Self { flash, tree, ts, bc, pool, config })
    }

    /// 配置
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// 闪存驱动包装器
    pub fn flash(&self) -> &FlashDev<F> {
        &self.flash
    }

    /// 闪存驱动包装器（可变）
    pub fn flash_mut(&mut self) -> &mut FlashDev<F> {
        &mut self.flash
    }

    /// 树索引
    pub fn tree(&self) -> &T {
        &self.tree
    }

    /// 树索引（可变）
    pub fn tree_mut(&mut self) -> &mut T {
        &mut self.tree
    }

    /// 块信息缓存
    pub fn block_info(&self) -> &BlockInfoCache {
        &self.bc
    }

    /// 块信息缓存（可变）
    pub fn block_info_mut(&mut self) -> &mut BlockInfoCache {
        &mut self.bc
    }

    /// 页缓冲池
    pub fn pool(&self) -> &PageBufferPool {
        &self.pool
    }

    /// 缓冲池统计
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// 打印缓冲池、块信息缓存与闪存统计
    pub fn inspect(&self) {
        self.pool.inspect();
        log::info!(
            "[BINFO] {} / {} block info entries in use",
            self.bc.len(),
            self.bc.capacity()
        );
        let fs = self.flash.stats();
        log::info!(
            "[FLASH] reads {} writes {} spare reads {} erases {}",
            fs.page_reads, fs.page_writes, fs.spare_reads, fs.erases
        );
        let ps = self.pool.stats();
        log::info!(
            "[FLUSH] flushes {} recoveries {} failed {}",
            ps.flushes, ps.recoveries, ps.failed_flushes
        );
    }

    /// 卸载前释放缓冲层
    ///
    /// 仍有缓冲被引用时返回 `Busy`，不做任何刷新。否则刷新所有脏组，
    /// 释放块信息缓存，所有缓冲标记为空。
    pub fn release_all(&mut self) -> Result<()> {
        if let Some(buf) = self.pool.first_referenced() {
            log::error!(
                "[PBUF] buffer F:{:04x} S:{:04x} P:{} still referenced (ref {})",
                buf.father(),
                buf.serial(),
                buf.page_id(),
                buf.ref_count()
            );
            return Err(Error::new(ErrorKind::Busy, "Page buffer still referenced"));
        }

        self.flush_all()?;
        self.bc.release_all()?;
        self.pool.set_all_empty();
        Ok(())
    }

    /// 取回闪存驱动和树索引
    pub fn into_parts(self) -> (F, T) {
        (self.flash.into_inner(), self.tree)
    }
}

impl<F, T, S> core::fmt::Debug for Device<F, T, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("flash", &self.flash)
            .field("bc", &self.bc)
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish()
    }
}
