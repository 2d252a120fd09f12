//! 页 tag 编解码
//!
//! tag 存放在每个物理页的 spare 区，布局见 [`crate::consts`] 中的 `TAG_OFS_*`。
//! 全 0xFF 的 spare 表示该页尚未编程。

use crate::consts::*;
use crate::crc::sum16;
use crate::types::StreamType;
use byteorder::{ByteOrder, LittleEndian};

/// 页 tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageTag {
    /// 块代时间戳
    pub block_ts: u8,
    /// 类型字节，见 [`StreamType`]
    pub kind: u8,
    /// 逻辑页号（低 8 位）
    pub page_id: u8,
    /// 数据长度
    pub data_len: u16,
    /// 内容校验和
    pub data_sum: u16,
    /// 父 serial
    pub father: u16,
    /// 自身 serial
    pub serial: u16,
}

/// 解码结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedTag {
    /// 页未编程
    Erased,
    /// 已编程；`check_ok` 表示 tag 校验和是否匹配
    Written {
        /// 解析出的 tag
        tag: PageTag,
        /// 校验和是否匹配
        check_ok: bool,
    },
}

impl PageTag {
    /// 为一页数据生成 tag
    pub fn new(kind: StreamType, father: u16, serial: u16, page_id: u16, block_ts: u8, data: &[u8]) -> Self {
        Self {
            block_ts,
            kind: kind.as_u8(),
            page_id: page_id as u8,
            data_len: data.len() as u16,
            data_sum: sum16(data),
            father,
            serial,
        }
    }

    /// 流类型
    pub fn stream_type(&self) -> Option<StreamType> {
        StreamType::from_u8(self.kind)
    }

    /// 编码为 spare 字节
    pub fn encode(&self) -> [u8; TAG_SIZE] {
        let mut raw = [ERASED_BYTE; TAG_SIZE];
        raw[TAG_OFS_BLOCK_TS] = self.block_ts;
        raw[TAG_OFS_TYPE] = self.kind;
        raw[TAG_OFS_PAGE_ID] = self.page_id;
        LittleEndian::write_u16(&mut raw[TAG_OFS_DATA_LEN..], self.data_len);
        LittleEndian::write_u16(&mut raw[TAG_OFS_DATA_SUM..], self.data_sum);
        LittleEndian::write_u16(&mut raw[TAG_OFS_FATHER..], self.father);
        LittleEndian::write_u16(&mut raw[TAG_OFS_SERIAL..], self.serial);
        let sum = sum16(&raw[..TAG_OFS_CHECKSUM]);
        LittleEndian::write_u16(&mut raw[TAG_OFS_CHECKSUM..], sum);
        raw
    }

    /// 从 spare 字节解码
    ///
    /// 校验和不匹配不算错误，只是 `check_ok` 为假。
    pub fn decode(raw: &[u8; TAG_SIZE]) -> DecodedTag {
        if raw.iter().all(|b| *b == ERASED_BYTE) {
            return DecodedTag::Erased;
        }

        let tag = Self {
            block_ts: raw[TAG_OFS_BLOCK_TS],
            kind: raw[TAG_OFS_TYPE],
            page_id: raw[TAG_OFS_PAGE_ID],
            data_len: LittleEndian::read_u16(&raw[TAG_OFS_DATA_LEN..]),
            data_sum: LittleEndian::read_u16(&raw[TAG_OFS_DATA_SUM..]),
            father: LittleEndian::read_u16(&raw[TAG_OFS_FATHER..]),
            serial: LittleEndian::read_u16(&raw[TAG_OFS_SERIAL..]),
        };
        let stored = LittleEndian::read_u16(&raw[TAG_OFS_CHECKSUM..]);
        let check_ok = stored == sum16(&raw[..TAG_OFS_CHECKSUM]) && tag.stream_type().is_some();

        DecodedTag::Written { tag, check_ok }
    }
}
