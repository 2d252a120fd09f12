//! 闪存驱动接口

use crate::consts::{MAX_PAGES_PER_BLOCK, TAG_SIZE};
use crate::error::{Error, ErrorKind, Result};
use super::tag::{DecodedTag, PageTag};

/// 闪存几何参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    /// 每块页数
    pub pages_per_block: u16,
    /// 每页字节数（数据区 + ECC 区，不含 spare）
    pub page_size: usize,
    /// 总块数
    pub total_blocks: u16,
}

/// 闪存驱动接口
///
/// 实现此 trait 以提供底层 NAND/NOR 访问。所有调用都是阻塞的，
/// 本层不做超时也不支持取消。
///
/// # 示例
///
/// ```rust,ignore
/// use nandfs_core::{FlashDevice, FlashGeometry, Result};
///
/// struct MyNand {
///     // ...
/// }
///
/// impl FlashDevice for MyNand {
///     fn geometry(&self) -> FlashGeometry {
///         FlashGeometry { pages_per_block: 32, page_size: 512, total_blocks: 1024 }
///     }
///
///     fn ecc_size(&self) -> usize {
///         6
///     }
///
///     fn read_page(&mut self, block: u16, page: u16, buf: &mut [u8]) -> Result<()> {
///         // 读取整页（数据 + ECC）
///         Ok(())
///     }
///
///     // ...
/// }
/// ```
pub trait FlashDevice {
    /// 几何参数
    fn geometry(&self) -> FlashGeometry;

    /// 每页末尾保留给 ECC 的字节数
    fn ecc_size(&self) -> usize;

    /// 读取整页（数据区 + ECC 区）
    fn read_page(&mut self, block: u16, page: u16, buf: &mut [u8]) -> Result<()>;

    /// 编程一页及其 spare
    ///
    /// 页在擦除前只能编程一次。
    fn write_page(&mut self, block: u16, page: u16, spare: &[u8; TAG_SIZE], data: &[u8]) -> Result<()>;

    /// 擦除整块
    fn erase_block(&mut self, block: u16) -> Result<()>;

    /// 只读取 spare
    fn read_spare(&mut self, block: u16, page: u16, spare: &mut [u8; TAG_SIZE]) -> Result<()>;

    /// 对刚读出的页做 ECC/坏块检查
    ///
    /// 检查失败时驱动应记住该块，之后通过 [`FlashDevice::pending_bad_block`] 报告。
    fn check_bad_block(&mut self, _block: u16, _page: &[u8]) -> Result<()> {
        Ok(())
    }

    /// 最近一次检查发现的坏块
    fn pending_bad_block(&self) -> Option<u16> {
        None
    }

    /// 坏块已交给上层处理
    fn clear_bad_block(&mut self) {}
}

/// 物理操作统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlashStats {
    /// 页读取次数
    pub page_reads: u64,
    /// 页编程次数
    pub page_writes: u64,
    /// spare 读取次数
    pub spare_reads: u64,
    /// 块擦除次数
    pub erases: u64,
}

/// 闪存驱动包装器
///
/// 负责 tag 编码、几何参数校验与统计。
pub struct FlashDev<D> {
    /// 底层设备
    device: D,
    /// 几何参数
    geometry: FlashGeometry,
    /// ECC 区大小
    ecc_size: usize,
    /// 统计
    stats: FlashStats,
}

impl<D: FlashDevice> FlashDev<D> {
    /// 创建包装器并校验几何参数
    pub fn new(device: D) -> Result<Self> {
        let geometry = device.geometry();
        let ecc_size = device.ecc_size();

        if geometry.pages_per_block == 0 || geometry.pages_per_block > MAX_PAGES_PER_BLOCK {
            return Err(Error::new(ErrorKind::InvalidInput, "pages_per_block out of range"));
        }
        if ecc_size >= geometry.page_size {
            return Err(Error::new(ErrorKind::InvalidInput, "ECC size must be smaller than page size"));
        }
        if geometry.page_size - ecc_size > u16::MAX as usize {
            return Err(Error::new(ErrorKind::InvalidInput, "Page data size too large"));
        }

        Ok(Self {
            device,
            geometry,
            ecc_size,
            stats: FlashStats::default(),
        })
    }

    /// 几何参数
    pub fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    /// 每块页数
    pub fn pages_per_block(&self) -> u16 {
        self.geometry.pages_per_block
    }

    /// 整页大小（数据 + ECC）
    pub fn page_size(&self) -> usize {
        self.geometry.page_size
    }

    /// ECC 区大小
    pub fn ecc_size(&self) -> usize {
        self.ecc_size
    }

    /// 每页可用数据容量
    pub fn page_data_size(&self) -> usize {
        self.geometry.page_size - self.ecc_size
    }

    /// 读取整页
    pub fn read_page(&mut self, block: u16, page: u16, buf: &mut [u8]) -> Result<()> {
        self.stats.page_reads += 1;
        let len = self.geometry.page_size;
        self.device.read_page(block, page, &mut buf[..len]).map_err(|e| {
            log::error!("[FLASH] read block {} page {} failed: {}", block, page, e);
            e
        })
    }

    /// 读取并解码 spare
    pub fn read_tag(&mut self, block: u16, page: u16) -> Result<DecodedTag> {
        self.stats.spare_reads += 1;
        let mut raw = [0u8; TAG_SIZE];
        self.device.read_spare(block, page, &mut raw)?;
        Ok(PageTag::decode(&raw))
    }

    /// 将一页数据连同 tag 写入空白页
    pub fn write_data_to_new_page(&mut self, block: u16, page: u16, tag: &PageTag, buf: &[u8]) -> Result<()> {
        self.stats.page_writes += 1;
        log::trace!(
            "[FLASH] write block {} page {} (F:{:04x} S:{:04x} P:{} len {})",
            block, page, tag.father, tag.serial, tag.page_id, tag.data_len
        );
        let raw = tag.encode();
        let len = self.geometry.page_size;
        self.device.write_page(block, page, &raw, &buf[..len])
    }

    /// 擦除块
    pub fn erase_block(&mut self, block: u16) -> Result<()> {
        self.stats.erases += 1;
        log::debug!("[FLASH] erase block {}", block);
        self.device.erase_block(block)
    }

    /// ECC/坏块检查
    pub fn check_bad_block(&mut self, block: u16, page: &[u8]) -> Result<()> {
        self.device.check_bad_block(block, page)
    }

    /// 已知坏块
    pub fn pending_bad_block(&self) -> Option<u16> {
        self.device.pending_bad_block()
    }

    /// 清除已处理的坏块记录
    pub fn clear_bad_block(&mut self) {
        self.device.clear_bad_block()
    }

    /// 物理操作统计
    pub fn stats(&self) -> FlashStats {
        self.stats
    }

    /// 底层设备引用
    pub fn device(&self) -> &D {
        &self.device
    }

    /// 底层设备可变引用
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// 取回底层设备
    pub fn into_inner(self) -> D {
        self.device
    }
}

impl<D> core::fmt::Debug for FlashDev<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlashDev")
            .field("geometry", &self.geometry)
            .field("ecc_size", &self.ecc_size)
            .field("stats", &self.stats)
            .finish()
    }
}
