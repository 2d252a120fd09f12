//! 树索引接口
//!
//! 目录/文件树由上层维护，缓冲核心只通过这个 trait 查找和登记节点，
//! 以及借用它管理的擦除块队列与坏块处理。

use crate::types::{StreamType, TreeNode};

/// 树索引
pub trait TreeIndex {
    /// 查找节点
    ///
    /// 目录和文件按 `serial` 查找；数据块还需要匹配 `father`。
    fn find_node(&self, kind: StreamType, father: u16, serial: u16) -> Option<TreeNode>;

    /// 登记一次刷新新建的节点
    fn insert_node(&mut self, node: TreeNode);

    /// 更新已有节点（按类型 + father + serial 匹配）
    fn update_node(&mut self, node: TreeNode);

    /// 从擦除块队列取一个块
    fn take_erased(&mut self) -> Option<u16>;

    /// 放回擦除块队列头部（未被使用过的块）
    fn put_erased_head(&mut self, block: u16);

    /// 放回擦除块队列尾部（刚擦除的块）
    fn put_erased_tail(&mut self, block: u16);

    /// 坏块处理
    fn process_bad_block(&mut self, block: u16);
}
