//! 数据结构定义
//!
//! 缓冲核心与树索引共用的类型：流类型、树节点和页选择器。

/// 逻辑流类型
///
/// 持久化到 tag 的类型字节就是该枚举的判别值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamType {
    /// 目录
    Dir = 0,
    /// 文件
    File = 1,
    /// 数据块
    Data = 2,
}

impl StreamType {
    /// 从 tag 的类型字节解析
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Dir),
            1 => Some(Self::File),
            2 => Some(Self::Data),
            _ => None,
        }
    }

    /// 转换为 tag 的类型字节
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// 目录和文件的 0 号页保存元信息，树节点需要记录其校验和
    pub const fn has_checksum(self) -> bool {
        matches!(self, Self::Dir | Self::File)
    }
}

/// 树节点
///
/// 每种流类型携带各自的字段：目录与文件记录内容校验和，数据块只记录位置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeNode {
    /// 目录节点
    Dir {
        /// 父目录 serial
        father: u16,
        /// 自身 serial
        serial: u16,
        /// 物理块号
        block: u16,
        /// 0 号页内容校验和
        checksum: u16,
    },
    /// 文件节点
    File {
        /// 父目录 serial
        father: u16,
        /// 自身 serial
        serial: u16,
        /// 物理块号
        block: u16,
        /// 0 号页内容校验和
        checksum: u16,
    },
    /// 数据块节点
    Data {
        /// 所属文件 serial
        father: u16,
        /// 自身 serial
        serial: u16,
        /// 物理块号
        block: u16,
    },
}

impl TreeNode {
    /// 根据流类型构造节点
    pub const fn new(kind: StreamType, father: u16, serial: u16, block: u16, checksum: u16) -> Self {
        match kind {
            StreamType::Dir => Self::Dir { father, serial, block, checksum },
            StreamType::File => Self::File { father, serial, block, checksum },
            StreamType::Data => Self::Data { father, serial, block },
        }
    }

    /// 节点类型
    pub const fn kind(&self) -> StreamType {
        match self {
            Self::Dir { .. } => StreamType::Dir,
            Self::File { .. } => StreamType::File,
            Self::Data { .. } => StreamType::Data,
        }
    }

    /// 父 serial
    pub const fn father(&self) -> u16 {
        match *self {
            Self::Dir { father, .. } | Self::File { father, .. } | Self::Data { father, .. } => father,
        }
    }

    /// 自身 serial
    pub const fn serial(&self) -> u16 {
        match *self {
            Self::Dir { serial, .. } | Self::File { serial, .. } | Self::Data { serial, .. } => serial,
        }
    }

    /// 物理块号
    pub const fn block(&self) -> u16 {
        match *self {
            Self::Dir { block, .. } | Self::File { block, .. } | Self::Data { block, .. } => block,
        }
    }

    /// 内容校验和（数据块节点没有）
    pub const fn checksum(&self) -> Option<u16> {
        match *self {
            Self::Dir { checksum, .. } | Self::File { checksum, .. } => Some(checksum),
            Self::Data { .. } => None,
        }
    }

    /// 指向新块并刷新校验和，用于块回收提交
    pub fn relocate(&mut self, new_block: u16, new_checksum: u16) {
        match self {
            Self::Dir { block, checksum, .. } | Self::File { block, checksum, .. } => {
                *block = new_block;
                *checksum = new_checksum;
            }
            Self::Data { block, .. } => *block = new_block,
        }
    }
}

/// 页选择器：单页或整块所有页
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pages {
    /// 块内所有页
    All,
    /// 指定页
    One(u16),
}
