//! 侵入式双向链表
//!
//! 节点是缓冲数组中的下标，链接保存在 [`PageBuf`] 内。同一个缓冲
//! 同时挂在访问顺序链表和脏组链表上，用 [`Chain`] 区分。

use super::page_buf::{Links, PageBuf};

/// 链表种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Chain {
    /// 全局访问顺序链表
    Lru,
    /// 脏组链表
    Dirty,
}

impl Chain {
    fn links(self, buf: &PageBuf) -> &Links {
        match self {
            Chain::Lru => &buf.lru,
            Chain::Dirty => &buf.dirty,
        }
    }

    fn links_mut(self, buf: &mut PageBuf) -> &mut Links {
        match self {
            Chain::Lru => &mut buf.lru,
            Chain::Dirty => &mut buf.dirty,
        }
    }
}

/// 链表头尾
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ListHead {
    pub head: Option<usize>,
    pub tail: Option<usize>,
}

impl ListHead {
    /// 从链表中摘下节点
    pub fn unlink(&mut self, bufs: &mut [PageBuf], chain: Chain, idx: usize) {
        let Links { prev, next } = *chain.links(&bufs[idx]);

        if let Some(n) = next {
            chain.links_mut(&mut bufs[n]).prev = prev;
        }
        if let Some(p) = prev {
            chain.links_mut(&mut bufs[p]).next = next;
        }
        if self.head == Some(idx) {
            self.head = next;
        }
        if self.tail == Some(idx) {
            self.tail = prev;
        }

        *chain.links_mut(&mut bufs[idx]) = Links::default();
    }

    /// 插入链表头
    pub fn push_front(&mut self, bufs: &mut [PageBuf], chain: Chain, idx: usize) {
        *chain.links_mut(&mut bufs[idx]) = Links { prev: None, next: self.head };
        match self.head {
            Some(h) => chain.links_mut(&mut bufs[h]).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    /// 插入链表尾
    pub fn push_back(&mut self, bufs: &mut [PageBuf], chain: Chain, idx: usize) {
        *chain.links_mut(&mut bufs[idx]) = Links { prev: self.tail, next: None };
        match self.tail {
            Some(t) => chain.links_mut(&mut bufs[t]).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    /// 移到链表头
    pub fn move_to_front(&mut self, bufs: &mut [PageBuf], chain: Chain, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(bufs, chain, idx);
        self.push_front(bufs, chain, idx);
    }

    /// 从头到尾遍历
    pub fn iter<'a>(&self, bufs: &'a [PageBuf], chain: Chain) -> ListIter<'a> {
        ListIter { bufs, chain, cur: self.head }
    }
}

/// 链表迭代器，产出缓冲下标
pub(crate) struct ListIter<'a> {
    bufs: &'a [PageBuf],
    chain: Chain,
    cur: Option<usize>,
}

impl Iterator for ListIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let idx = self.cur?;
        self.cur = self.chain.links(&self.bufs[idx]).next;
        Some(idx)
    }
}
