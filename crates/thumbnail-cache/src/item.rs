//! Items of a collection as the pipeline sees them

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Externally assigned, stable item identifier
pub type ItemId = i64;

/// One image reference in a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    /// Path of the source image relative to the collection root
    pub relative_path: PathBuf,
    pub order: i64,
    pub visible: bool,
}

impl Item {
    pub fn new(id: ItemId, relative_path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            relative_path: relative_path.into(),
            order: 0,
            visible: true,
        }
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Absolute path of the source image under `collection_root`
    pub fn source_path(&self, collection_root: &Path) -> PathBuf {
        collection_root.join(&self.relative_path)
    }
}

/// Items a load has completed, out of how many were requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

impl Progress {
    pub fn completion_percentage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.current as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.total
    }
}

/// Visible items, highest `order` first. A derived view: the full list stays
/// the source of truth.
pub fn visible_view(items: &[Item]) -> Vec<Item> {
    let mut visible: Vec<Item> = items.iter().filter(|i| i.visible).cloned().collect();
    visible.sort_by(|a, b| b.order.cmp(&a.order));
    visible
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_path_joins_root() {
        let item = Item::new(1, "work1/a.jpg");
        assert_eq!(
            item.source_path(Path::new("/root")),
            PathBuf::from("/root/work1/a.jpg")
        );
    }

    #[test]
    fn test_visible_view_filters_and_sorts() {
        let items = vec![
            Item::new(1, "a.jpg").with_order(1),
            Item::new(2, "b.jpg").with_order(3).with_visible(false),
            Item::new(3, "c.jpg").with_order(2),
            Item::new(4, "d.jpg").with_order(5),
        ];

        let ids: Vec<ItemId> = visible_view(&items).iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![4, 3, 1]);
    }

    #[test]
    fn test_progress_calculations() {
        let progress = Progress { current: 25, total: 100 };
        assert_eq!(progress.completion_percentage(), 25.0);
        assert!(!progress.is_complete());

        let empty = Progress { current: 0, total: 0 };
        assert_eq!(empty.completion_percentage(), 100.0);
        assert!(empty.is_complete());
    }
}
