//! 校验和计算
//!
//! tag 校验和与页内容校验和都取 CRC32 的低 16 位。

/// 计算 CRC32 校验和（一次性计算）
#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// 16 位校验和：CRC32 的低 16 位
#[inline]
pub fn sum16(data: &[u8]) -> u16 {
    (crc32(data) & 0xFFFF) as u16
}
