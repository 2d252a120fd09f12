//! 测试用模拟设备
//!
//! - [`RamFlash`] - 内存 NAND：页只能编程一次，支持读/写/擦除故障注入
//! - [`MemTree`] - 内存树索引：节点表 + 擦除块队列 + 坏块表

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::consts::{ERASED_BYTE, TAG_SIZE};
use crate::crc::sum16;
use crate::device::{Device, DeviceConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::flash::{DecodedTag, FlashDevice, FlashGeometry, PageTag};
use crate::tree::TreeIndex;
use crate::types::{StreamType, TreeNode};

/// 内存 NAND
pub(crate) struct RamFlash {
    blocks: u16,
    pages_per_block: u16,
    page_size: usize,
    ecc_size: usize,
    pages: Vec<Vec<u8>>,
    spares: Vec<[u8; TAG_SIZE]>,
    programmed: Vec<bool>,
    /// 第 n 次写失败（从设置时开始计数，1 起）
    write_countdown: Option<usize>,
    /// 所有写都失败
    pub fail_all_writes: bool,
    /// 读页失败的位置
    pub fail_reads: Vec<(u16, u16)>,
    /// 读 spare 失败的位置
    pub fail_spare_reads: Vec<(u16, u16)>,
    /// 读出时翻转数据位的位置
    pub corrupt_reads: Vec<(u16, u16)>,
    /// 擦除失败的块
    pub fail_erases: Vec<u16>,
    /// 成功写入的页：(块, 页, 逻辑页号)
    pub write_log: Vec<(u16, u16, u8)>,
    bad_block: Option<u16>,
}

impl RamFlash {
    pub fn new(blocks: u16, pages_per_block: u16, page_size: usize, ecc_size: usize) -> Self {
        let total = blocks as usize * pages_per_block as usize;
        Self {
            blocks,
            pages_per_block,
            page_size,
            ecc_size,
            pages: (0..total).map(|_| alloc::vec![ERASED_BYTE; page_size]).collect(),
            spares: alloc::vec![[ERASED_BYTE; TAG_SIZE]; total],
            programmed: alloc::vec![false; total],
            write_countdown: None,
            fail_all_writes: false,
            fail_reads: Vec::new(),
            fail_spare_reads: Vec::new(),
            corrupt_reads: Vec::new(),
            fail_erases: Vec::new(),
            write_log: Vec::new(),
            bad_block: None,
        }
    }

    /// 让接下来的第 n 次写失败
    pub fn fail_nth_write(&mut self, n: usize) {
        self.write_countdown = Some(n);
    }

    /// 标记一个已知坏块
    pub fn set_bad_block(&mut self, block: u16) {
        self.bad_block = Some(block);
    }

    pub fn tag(&self, block: u16, page: u16) -> DecodedTag {
        PageTag::decode(&self.spares[self.index(block, page)])
    }

    pub fn data(&self, block: u16, page: u16) -> &[u8] {
        &self.pages[self.index(block, page)][..self.page_size - self.ecc_size]
    }

    pub fn is_programmed(&self, block: u16, page: u16) -> bool {
        self.programmed[self.index(block, page)]
    }

    pub fn programmed_pages(&self, block: u16) -> usize {
        (0..self.pages_per_block).filter(|p| self.is_programmed(block, *p)).count()
    }

    fn index(&self, block: u16, page: u16) -> usize {
        block as usize * self.pages_per_block as usize + page as usize
    }

    fn check_range(&self, block: u16, page: u16) -> Result<()> {
        if block >= self.blocks || page >= self.pages_per_block {
            return Err(Error::new(ErrorKind::InvalidInput, "Address out of range"));
        }
        Ok(())
    }

    fn data_size(&self) -> usize {
        self.page_size - self.ecc_size
    }
}

impl FlashDevice for RamFlash {
    fn geometry(&self) -> FlashGeometry {
        FlashGeometry {
            pages_per_block: self.pages_per_block,
            page_size: self.page_size,
            total_blocks: self.blocks,
        }
    }

    fn ecc_size(&self) -> usize {
        self.ecc_size
    }

    fn read_page(&mut self, block: u16, page: u16, buf: &mut [u8]) -> Result<()> {
        self.check_range(block, page)?;
        if self.fail_reads.contains(&(block, page)) {
            return Err(Error::new(ErrorKind::Io, "Injected read failure"));
        }
        let idx = self.index(block, page);
        buf[..self.page_size].copy_from_slice(&self.pages[idx]);
        if self.corrupt_reads.contains(&(block, page)) {
            buf[0] ^= 0x01;
        }
        Ok(())
    }

    fn write_page(&mut self, block: u16, page: u16, spare: &[u8; TAG_SIZE], data: &[u8]) -> Result<()> {
        self.check_range(block, page)?;
        if self.fail_all_writes {
            return Err(Error::new(ErrorKind::Io, "Injected write failure"));
        }
        if let Some(n) = self.write_countdown {
            if n <= 1 {
                self.write_countdown = None;
                return Err(Error::new(ErrorKind::Io, "Injected write failure"));
            }
            self.write_countdown = Some(n - 1);
        }
        let idx = self.index(block, page);
        if self.programmed[idx] {
            return Err(Error::new(ErrorKind::Io, "Page programmed twice without erase"));
        }
        if page > 0 && !self.programmed[idx - 1] {
            return Err(Error::new(ErrorKind::Io, "Pages must be programmed in order"));
        }

        let data_size = self.data_size();
        let stored = &mut self.pages[idx];
        stored[..data_size].copy_from_slice(&data[..data_size]);
        if self.ecc_size >= 2 {
            let ecc = sum16(&data[..data_size]).to_le_bytes();
            stored[data_size..data_size + 2].copy_from_slice(&ecc);
        }
        self.spares[idx] = *spare;
        self.programmed[idx] = true;
        self.write_log.push((block, page, spare[crate::consts::TAG_OFS_PAGE_ID]));
        Ok(())
    }

    fn erase_block(&mut self, block: u16) -> Result<()> {
        self.check_range(block, 0)?;
        if self.fail_erases.contains(&block) {
            return Err(Error::new(ErrorKind::Io, "Injected erase failure"));
        }
        for page in 0..self.pages_per_block {
            let idx = self.index(block, page);
            self.pages[idx].fill(ERASED_BYTE);
            self.spares[idx] = [ERASED_BYTE; TAG_SIZE];
            self.programmed[idx] = false;
        }
        Ok(())
    }

    fn read_spare(&mut self, block: u16, page: u16, spare: &mut [u8; TAG_SIZE]) -> Result<()> {
        self.check_range(block, page)?;
        if self.fail_spare_reads.contains(&(block, page)) {
            return Err(Error::new(ErrorKind::Io, "Injected spare read failure"));
        }
        *spare = self.spares[self.index(block, page)];
        Ok(())
    }

    fn check_bad_block(&mut self, block: u16, page: &[u8]) -> Result<()> {
        if self.ecc_size < 2 {
            return Ok(());
        }
        let data_size = self.data_size();
        let stored = u16::from_le_bytes([page[data_size], page[data_size + 1]]);
        let erased = page[..self.page_size].iter().all(|b| *b == ERASED_BYTE);
        if !erased && stored != sum16(&page[..data_size]) {
            self.bad_block = Some(block);
            return Err(Error::new(ErrorKind::Ecc, "ECC mismatch"));
        }
        Ok(())
    }

    fn pending_bad_block(&self) -> Option<u16> {
        self.bad_block
    }

    fn clear_bad_block(&mut self) {
        self.bad_block = None;
    }
}

/// 内存树索引
#[derive(Debug, Default)]
pub(crate) struct MemTree {
    pub nodes: Vec<TreeNode>,
    pub erased: VecDeque<u16>,
    pub bad: Vec<u16>,
}

impl MemTree {
    pub fn with_erased(blocks: core::ops::Range<u16>) -> Self {
        Self {
            nodes: Vec::new(),
            erased: blocks.collect(),
            bad: Vec::new(),
        }
    }

    fn position(&self, kind: StreamType, father: u16, serial: u16) -> Option<usize> {
        self.nodes.iter().position(|n| {
            n.kind() == kind
                && n.serial() == serial
                && (kind != StreamType::Data || n.father() == father)
        })
    }
}

impl TreeIndex for MemTree {
    fn find_node(&self, kind: StreamType, father: u16, serial: u16) -> Option<TreeNode> {
        self.position(kind, father, serial).map(|i| self.nodes[i])
    }

    fn insert_node(&mut self, node: TreeNode) {
        self.nodes.push(node);
    }

    fn update_node(&mut self, node: TreeNode) {
        if let Some(i) = self.position(node.kind(), node.father(), node.serial()) {
            self.nodes[i] = node;
        }
    }

    fn take_erased(&mut self) -> Option<u16> {
        self.erased.pop_front()
    }

    fn put_erased_head(&mut self, block: u16) {
        self.erased.push_front(block);
    }

    fn put_erased_tail(&mut self, block: u16) {
        self.erased.push_back(block);
    }

    fn process_bad_block(&mut self, block: u16) {
        self.bad.push(block);
    }
}

/// 测试设备：16 块 × 8 页，每页 64 字节（4 字节 ECC，60 字节数据）
pub(crate) const TEST_BLOCKS: u16 = 16;
pub(crate) const TEST_PAGES_PER_BLOCK: u16 = 8;
pub(crate) const TEST_PAGE_SIZE: usize = 64;
pub(crate) const TEST_ECC_SIZE: usize = 4;
pub(crate) const TEST_DATA_SIZE: usize = TEST_PAGE_SIZE - TEST_ECC_SIZE;

pub(crate) fn test_flash() -> RamFlash {
    RamFlash::new(TEST_BLOCKS, TEST_PAGES_PER_BLOCK, TEST_PAGE_SIZE, TEST_ECC_SIZE)
}

pub(crate) fn test_config(buffers: usize, dirty_pages: usize, groups: usize, cached_blocks: usize) -> DeviceConfig {
    DeviceConfig {
        max_page_buffers: buffers,
        max_dirty_pages: dirty_pages,
        max_dirty_groups: groups,
        max_cached_blocks: cached_blocks,
    }
}

pub(crate) fn test_device(config: DeviceConfig) -> Device<RamFlash, MemTree> {
    Device::new(test_flash(), MemTree::with_erased(0..TEST_BLOCKS), config).unwrap()
}
