use std::collections::BTreeSet;

/// 当前要素已访问像素的集合
///
/// 以 `(col, row)` 为元素的有序集合，只在一个要素的处理过程中有效：
/// 遍历器在开始处理每个要素前清空它，同一像素在同一要素内只会被报告一次，
/// 而在不同要素中可以各报告一次。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PixelVisitedSet {
    set: BTreeSet<(i64, i64)>,
}

impl PixelVisitedSet {
    pub fn new() -> Self {
        PixelVisitedSet::default()
    }

    /// 记录一个像素，若之前未记录则返回 `true`
    pub fn insert(&mut self, col: i64, row: i64) -> bool {
        self.set.insert((col, row))
    }

    pub fn contains(&self, col: i64, row: i64) -> bool {
        self.set.contains(&(col, row))
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn clear(&mut self) {
        self.set.clear();
    }

    /// 按 `(col, row)` 字典序迭代已访问的像素
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.set.iter().copied()
    }
}
