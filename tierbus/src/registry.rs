//! 注册索引：priority → 事件类型 → 处理器集合，外加降序的 priority 列表
//!
//! 不变量：
//! - 存在的 priority 下至少有一个非空的类型桶，且在列表中恰好出现一次；
//! - 同一处理器在同一 (priority, type) 桶中至多出现一次；
//! - 列表始终降序，是发布时唯一的遍历顺序来源。
//!
use crate::event::EventTypeId;
use crate::handler::{HandlerId, HandlerRef};
use std::collections::HashMap;

type Bucket = Vec<HandlerRef>;

#[derive(Default)]
pub(crate) struct RegistrationIndex {
    tiers: HashMap<i64, HashMap<EventTypeId, Bucket>>,
    priorities: Vec<i64>,
}

impl RegistrationIndex {
    /// 插入处理器；返回是否至少新增了一个桶条目
    pub(crate) fn insert(&mut self, handler: &HandlerRef) -> bool {
        let priority = handler.priority();
        if !self.tiers.contains_key(&priority) {
            if let Err(pos) = self.priorities.binary_search_by(|probe| priority.cmp(probe)) {
                self.priorities.insert(pos, priority);
            }
        }
        let tier = self.tiers.entry(priority).or_default();

        let mut added = false;
        for ty in handler.targets() {
            let bucket = tier.entry(*ty).or_default();
            if !bucket.iter().any(|h| h.id() == handler.id()) {
                bucket.push(handler.clone());
                added = true;
            }
        }

        // 没有任何目标类型的处理器不应留下空的 tier
        if tier.is_empty() {
            self.drop_tier(priority);
        }
        added
    }

    /// 移除处理器；priority 不存在时返回 `None`，
    /// 否则返回是否真的移除了桶条目
    pub(crate) fn remove(&mut self, handler: &HandlerRef) -> Option<bool> {
        let priority = handler.priority();
        let tier = self.tiers.get_mut(&priority)?;

        let mut removed = false;
        for ty in handler.targets() {
            let Some(bucket) = tier.get_mut(ty) else {
                continue;
            };
            let before = bucket.len();
            bucket.retain(|h| h.id() != handler.id());
            removed |= bucket.len() != before;
            if bucket.is_empty() {
                tier.remove(ty);
            }
        }

        if tier.is_empty() {
            self.drop_tier(priority);
        }
        Some(removed)
    }

    fn drop_tier(&mut self, priority: i64) {
        self.tiers.remove(&priority);
        self.priorities.retain(|p| *p != priority);
    }

    /// 当前 priority 列表的拷贝（降序）
    pub(crate) fn priorities(&self) -> Vec<i64> {
        self.priorities.clone()
    }

    /// 汇总某 priority 下匹配任一类型的处理器（按 HandlerId 去重）；
    /// priority 已不存在时返回 `None`
    pub(crate) fn collect(&self, priority: i64, types: &[EventTypeId]) -> Option<Vec<HandlerRef>> {
        let tier = self.tiers.get(&priority)?;
        let mut bag: Vec<HandlerRef> = Vec::new();
        for ty in types {
            if let Some(bucket) = tier.get(ty) {
                for handler in bucket {
                    if !bag.iter().any(|h| h.id() == handler.id()) {
                        bag.push(handler.clone());
                    }
                }
            }
        }
        Some(bag)
    }

    /// 批量清理：仅当 priority 仍不在索引中时才从列表移除
    pub(crate) fn prune(&mut self, stale: &[i64]) {
        if stale.is_empty() {
            return;
        }
        let tiers = &self.tiers;
        self.priorities
            .retain(|p| !stale.contains(p) || tiers.contains_key(p));
    }

    pub(crate) fn contains(&self, handler: &HandlerRef) -> bool {
        self.tiers.get(&handler.priority()).is_some_and(|tier| {
            tier.values()
                .any(|bucket| bucket.iter().any(|h| h.id() == handler.id()))
        })
    }

    /// 已索引的不同处理器数量
    pub(crate) fn handler_count(&self) -> usize {
        let mut ids: Vec<HandlerId> = self
            .tiers
            .values()
            .flat_map(|tier| tier.values())
            .flat_map(|bucket| bucket.iter().map(|h| h.id()))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;

    fn handler(types: &[EventTypeId], priority: i64) -> HandlerRef {
        Handler::on_types(types.iter().copied())
            .priority(priority)
            .handle(|_| async { Ok(true) })
    }

    #[test]
    fn priorities_stay_sorted_descending() {
        let mut index = RegistrationIndex::default();
        for p in [1, 10, 5, 10, -3] {
            index.insert(&handler(&[1], p));
        }
        assert_eq!(index.priorities(), vec![10, 5, 1, -3]);
    }

    #[test]
    fn duplicate_insert_is_idempotent() {
        let mut index = RegistrationIndex::default();
        let h = handler(&[1, 2], 0);
        assert!(index.insert(&h));
        assert!(!index.insert(&h));
        assert_eq!(index.collect(0, &[1, 2]).unwrap().len(), 1);
        assert_eq!(index.handler_count(), 1);
    }

    #[test]
    fn removing_last_handler_drops_priority() {
        let mut index = RegistrationIndex::default();
        let keep = handler(&[1], 5);
        let only = handler(&[2], 3);
        index.insert(&keep);
        index.insert(&only);

        assert_eq!(index.remove(&only), Some(true));
        assert_eq!(index.priorities(), vec![5]);
        assert!(index.collect(3, &[2]).is_none());

        // priority 已不存在，再次移除不报错
        assert_eq!(index.remove(&only), None);
        assert!(index.contains(&keep));
    }

    #[test]
    fn remove_keeps_other_types_in_tier() {
        let mut index = RegistrationIndex::default();
        let a = handler(&[1], 0);
        let b = handler(&[2], 0);
        index.insert(&a);
        index.insert(&b);

        assert_eq!(index.remove(&a), Some(true));
        // priority 仍在，但处理器已不在任何桶中
        assert_eq!(index.remove(&a), Some(false));
        assert_eq!(index.priorities(), vec![0]);
        assert!(index.collect(0, &[1]).unwrap().is_empty());
        assert_eq!(index.collect(0, &[2]).unwrap().len(), 1);
    }

    #[test]
    fn handler_without_targets_leaves_no_tier() {
        let mut index = RegistrationIndex::default();
        assert!(!index.insert(&handler(&[], 9)));
        assert!(index.priorities().is_empty());
    }

    #[test]
    fn prune_skips_priorities_that_came_back() {
        let mut index = RegistrationIndex::default();
        index.insert(&handler(&[1], 2));
        index.priorities.push(1);
        index.prune(&[1, 2]);
        assert_eq!(index.priorities(), vec![2]);
    }
}
