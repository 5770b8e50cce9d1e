//! Root-to-leaf navigation paths over the view forest.
//!
//! Views live in an arena indexed by position; successors are a derived
//! reverse index built from each view's predecessor link. Traversal uses an
//! explicit stack, so a single very long chain does not grow the call stack.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::db::models::{View, ViewId};
use crate::log_warn;

const ENABLE_LOGS: bool = true;

/// Views from a root to a leaf, ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationPath {
    pub views: Vec<View>,
}

impl NavigationPath {
    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn ids(&self) -> Vec<&ViewId> {
        self.views.iter().map(|view| &view.id).collect()
    }
}

pub struct ViewForest {
    views: Vec<View>,
    successors: Vec<Vec<usize>>,
    roots: Vec<usize>,
}

impl ViewForest {
    /// Index `views`. A view whose predecessor is missing (deleted, or never
    /// loaded) counts as a root.
    pub fn build(mut views: Vec<View>) -> Self {
        views.sort_by(|a, b| a.viewed_at.cmp(&b.viewed_at).then_with(|| a.id.cmp(&b.id)));

        let positions: HashMap<ViewId, usize> = views
            .iter()
            .enumerate()
            .map(|(index, view)| (view.id.clone(), index))
            .collect();

        let mut successors = vec![Vec::new(); views.len()];
        let mut roots = Vec::new();
        for (index, view) in views.iter().enumerate() {
            let parent = view
                .predecessor_id
                .as_ref()
                .and_then(|id| positions.get(id))
                .copied();
            match parent {
                Some(parent) if parent != index => successors[parent].push(index),
                _ => roots.push(index),
            }
        }

        Self {
            views,
            successors,
            roots,
        }
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = &View> + '_ {
        self.roots.iter().map(move |&index| &self.views[index])
    }

    pub fn leaves(&self) -> impl Iterator<Item = &View> + '_ {
        self.successors
            .iter()
            .enumerate()
            .filter(|(_, next)| next.is_empty())
            .map(move |(index, _)| &self.views[index])
    }

    /// Every root-to-leaf path, depth first. `limit` caps how many paths are
    /// materialized; `None` enumerates all of them.
    pub fn paths(&self, limit: Option<usize>) -> Vec<NavigationPath> {
        let mut paths = Vec::new();
        if limit == Some(0) {
            return paths;
        }

        let mut visited = 0usize;
        let mut current: Vec<usize> = Vec::new();
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for &root in &self.roots {
            stack.push((root, 0));

            while let Some((index, depth)) = stack.pop() {
                visited += 1;
                current.truncate(depth);
                current.push(index);

                let next = &self.successors[index];
                if next.is_empty() {
                    paths.push(self.materialize(&current));
                    if limit.is_some_and(|limit| paths.len() >= limit) {
                        return paths;
                    }
                } else {
                    // Reversed so the earliest successor is explored first.
                    stack.extend(next.iter().rev().map(|&child| (child, depth + 1)));
                }
            }
        }

        // Nodes only become unreachable through a predecessor cycle, which
        // insert-time linking cannot produce.
        if limit.is_none() && visited < self.views.len() {
            log_warn!(
                "{} views are unreachable from any root; predecessor links form a cycle",
                self.views.len() - visited
            );
        }

        paths
    }

    fn materialize(&self, indices: &[usize]) -> NavigationPath {
        let mut views: Vec<View> = indices.iter().map(|&i| self.views[i].clone()).collect();
        // Stable: equal timestamps keep root-to-leaf order.
        views.sort_by(|a, b| a.viewed_at.cmp(&b.viewed_at));
        NavigationPath { views }
    }
}
