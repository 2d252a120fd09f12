//! 设备配置

use crate::consts::{DEFAULT_CACHED_BLOCKS, DEFAULT_DIRTY_GROUPS, DEFAULT_DIRTY_PAGES, DEFAULT_PAGE_BUFFERS};
use crate::error::{Error, ErrorKind, Result};

/// 缓冲层配置
///
/// # 示例
///
/// ```rust,ignore
/// let config = DeviceConfig {
///     max_page_buffers: 40,
///     ..DeviceConfig::default()
/// };
/// let dev = Device::new(flash, tree, config)?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// 页缓冲数
    pub max_page_buffers: usize,
    /// 单个脏组最大脏页数（会被截断到每块页数）
    pub max_dirty_pages: usize,
    /// 脏组数
    pub max_dirty_groups: usize,
    /// 块信息缓存项数
    pub max_cached_blocks: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            max_page_buffers: DEFAULT_PAGE_BUFFERS,
            max_dirty_pages: DEFAULT_DIRTY_PAGES,
            max_dirty_groups: DEFAULT_DIRTY_GROUPS,
            max_cached_blocks: DEFAULT_CACHED_BLOCKS,
        }
    }
}

impl DeviceConfig {
    /// 校验配置
    ///
    /// 块恢复同时持有新旧两个块的信息，所以块信息缓存至少要 2 项。
    pub fn validate(&self) -> Result<()> {
        if self.max_page_buffers == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "max_page_buffers must be non-zero"));
        }
        if self.max_dirty_pages == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "max_dirty_pages must be non-zero"));
        }
        if self.max_dirty_groups == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "max_dirty_groups must be non-zero"));
        }
        if self.max_cached_blocks < 2 {
            return Err(Error::new(ErrorKind::InvalidInput, "max_cached_blocks must be at least 2"));
        }
        Ok(())
    }

    /// 实际使用的单组脏页上限
    pub fn dirty_limit(&self, pages_per_block: u16) -> usize {
        self.max_dirty_pages.min(pages_per_block as usize)
    }
}
