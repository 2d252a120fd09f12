//! 块代时间戳
//!
//! 块回收后，同一逻辑块的新旧占用者靠代时间戳区分。
//! 核心只使用比较关系，不假设具体的回绕方式，因此排序策略以 trait 注入。

use core::cmp::Ordering;

/// 代时间戳排序策略
pub trait TimeStampPolicy {
    /// 新块的第一个时间戳
    fn first(&self) -> u8;

    /// `ts` 的下一个时间戳
    fn next(&self, ts: u8) -> u8;

    /// `(代时间戳, 物理页位置)` 上的全序，越大越新
    fn compare(&self, a: (u8, u16), b: (u8, u16)) -> Ordering;
}

/// 默认策略：0 → 1 → 2 → 0 循环，后继视为更新
#[derive(Debug, Clone, Copy, Default)]
pub struct CyclicTimeStamp;

impl CyclicTimeStamp {
    const PERIOD: u8 = 3;
}

impl TimeStampPolicy for CyclicTimeStamp {
    fn first(&self) -> u8 {
        0
    }

    fn next(&self, ts: u8) -> u8 {
        (ts % Self::PERIOD + 1) % Self::PERIOD
    }

    fn compare(&self, a: (u8, u16), b: (u8, u16)) -> Ordering {
        if a.0 == b.0 {
            a.1.cmp(&b.1)
        } else if a.0 == self.next(b.0) {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }
}
