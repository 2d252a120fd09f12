//! 错误类型定义
//!
//! 提供页缓冲、块信息缓存与刷新引擎的错误类型。
//!
//! 所有失败最终都以二元的成功/失败结果返回给上层文件系统，
//! `ErrorKind` 只用于区分失败的类别（资源耗尽、I/O、一致性缺陷……）。

use core::fmt;

/// 核心操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 物理读/写/擦除失败
    Io,
    /// ECC 校验失败（数据不可信）
    Ecc,
    /// 无效参数（偏移越界、几何参数错误等）
    InvalidInput,
    /// 一致性缺陷（重复释放、脏链表混杂等）
    Corrupted,
    /// 逻辑页不存在
    NotFound,
    /// 资源耗尽（无空闲缓冲、无块信息项、无空闲脏组、无擦除块）
    NoSpace,
    /// 仍有引用，无法释放
    Busy,
    /// 无效状态（句柄误用等）
    InvalidState,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }

    /// 是否是资源耗尽类错误
    ///
    /// 这类错误只对当前请求致命，释放引用或刷新后可以重试。
    pub const fn is_exhaustion(&self) -> bool {
        matches!(self.kind, ErrorKind::NoSpace)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<alloc::collections::TryReserveError> for Error {
    fn from(_err: alloc::collections::TryReserveError) -> Self {
        Error::new(ErrorKind::NoSpace, "Arena allocation failed")
    }
}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_error_display() {
        let err = Error::new(ErrorKind::NoSpace, "no free page buffer");
        assert_eq!(err.to_string(), "NoSpace: no free page buffer");
        assert!(err.is_exhaustion());
    }

    #[test]
    fn test_error_kind() {
        let err = Error::new(ErrorKind::Io, "write failed");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.message(), "write failed");
        assert!(!err.is_exhaustion());
    }

    #[test]
    fn test_try_reserve_maps_to_no_space() {
        let mut v: alloc::vec::Vec<u8> = alloc::vec::Vec::new();
        let err: Error = v.try_reserve_exact(usize::MAX).unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::NoSpace);
    }
}
