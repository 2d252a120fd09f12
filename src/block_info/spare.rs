//! 页 spare 缓存项

use crate::flash::{DecodedTag, PageTag};
use bitflags::bitflags;

bitflags! {
    /// spare 缓存标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpareFlags: u8 {
        /// 尚未从闪存载入（或已失效）
        const EXPIRED  = 0x01;
        /// tag 校验和匹配
        const CHECK_OK = 0x02;
        /// 页未编程
        const ERASED   = 0x04;
    }
}

/// 单页 spare 缓存
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpare {
    /// 缓存的 tag（仅在已载入且非擦除态时有意义）
    pub tag: PageTag,
    /// 状态标志
    pub flags: SpareFlags,
}

impl Default for PageSpare {
    fn default() -> Self {
        Self {
            tag: PageTag::default(),
            flags: SpareFlags::EXPIRED,
        }
    }
}

impl PageSpare {
    /// 是否已失效
    pub fn is_expired(&self) -> bool {
        self.flags.contains(SpareFlags::EXPIRED)
    }

    /// tag 是否通过校验
    pub fn check_ok(&self) -> bool {
        self.flags.contains(SpareFlags::CHECK_OK)
    }

    /// 页是否未编程
    pub fn is_erased(&self) -> bool {
        self.flags.contains(SpareFlags::ERASED)
    }

    /// 已载入、已编程且校验通过
    pub fn is_valid(&self) -> bool {
        !self.is_expired() && !self.is_erased() && self.check_ok()
    }

    /// 用解码结果填充
    pub fn fill(&mut self, decoded: DecodedTag) {
        match decoded {
            DecodedTag::Erased => {
                self.tag = PageTag::default();
                self.flags = SpareFlags::ERASED;
            }
            DecodedTag::Written { tag, check_ok } => {
                self.tag = tag;
                self.flags = if check_ok { SpareFlags::CHECK_OK } else { SpareFlags::empty() };
            }
        }
    }

    /// 标记失效
    pub fn expire(&mut self) {
        self.flags.insert(SpareFlags::EXPIRED);
    }
}
