//! 常量定义
//!
//! 这个模块包含了缓冲核心用到的常量，包括：
//! - 默认的缓冲池、脏组和块信息缓存尺寸
//! - 页 spare/tag 的持久化布局
//! - 擦除态填充值

//=============================================================================
// 默认配置
//=============================================================================

/// 默认页缓冲数量
pub const DEFAULT_PAGE_BUFFERS: usize = 10;

/// 默认单个流允许的最大脏页数
pub const DEFAULT_DIRTY_PAGES: usize = 7;

/// 默认并发脏组数量
pub const DEFAULT_DIRTY_GROUPS: usize = 3;

/// 默认缓存的块信息数量
pub const DEFAULT_CACHED_BLOCKS: usize = 10;

//=============================================================================
// 闪存相关
//=============================================================================

/// 擦除后闪存的填充值
pub const ERASED_BYTE: u8 = 0xFF;

/// 单块最多可寻址的页数（tag 中页位置只有 1 字节）
pub const MAX_PAGES_PER_BLOCK: u16 = 256;

//=============================================================================
// Tag 布局（16 字节，小端）
//=============================================================================

/// tag 总长度
pub const TAG_SIZE: usize = 16;

/// 块代时间戳偏移
pub const TAG_OFS_BLOCK_TS: usize = 0;

/// 类型偏移
pub const TAG_OFS_TYPE: usize = 1;

/// 页位置偏移
pub const TAG_OFS_PAGE_ID: usize = 2;

/// 数据长度偏移
pub const TAG_OFS_DATA_LEN: usize = 4;

/// 数据校验和偏移
pub const TAG_OFS_DATA_SUM: usize = 6;

/// father 偏移
pub const TAG_OFS_FATHER: usize = 8;

/// serial 偏移
pub const TAG_OFS_SERIAL: usize = 10;

/// tag 校验和偏移（覆盖 0..12）
pub const TAG_OFS_CHECKSUM: usize = 12;
