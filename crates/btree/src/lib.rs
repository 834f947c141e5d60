//! On-disk B+Tree mapping `i32` keys to page references.
//!
//! Leaves hold the data pointers and form a forward sibling chain; internal
//! nodes route. All navigation is by page number through the shared page
//! cache, so nodes hold no memory pointers and survive eviction. A handle
//! owns nothing on disk: it carries the current root page number, which can
//! change on root splits and height collapses, and callers must re-read
//! `root_page` after any mutation.
//!
//! Conventions: keys in child *i* are ≤ separator *i* and keys in child
//! *i+1* are greater, so descent picks the smallest separator ≥ the key and
//! equal keys route left. A leaf split promotes a copy of the left half's
//! largest key; an internal split extracts the median, which descends into
//! neither half.

mod node;


pub use node::{Key, MAX_CELLS, MIN_CELLS, ORDER};

use buffer::PageCache;
use common::{DbError, DbResult, PageId};
use node::Node;

/// Handle to one tree: the current root page plus the shared cache.
#[derive(Debug)]
pub struct BTree<'c> {
    cache: &'c PageCache,
    /// Current root. Updated in place by mutations; callers persisting the
    /// root elsewhere must re-read it after every insert or delete.
    pub root_page: PageId,
}

impl<'c> BTree<'c> {
    /// Allocate a single empty leaf as the root of a new tree.
    pub fn create(cache: &'c PageCache) -> DbResult<Self> {
        let guard = cache.allocate_page()?;
        Node::empty_leaf().encode(&mut guard.write());
        Ok(Self {
            cache,
            root_page: guard.page(),
        })
    }

    /// Reconstruct a handle over an existing root page.
    pub fn open(cache: &'c PageCache, root_page: PageId) -> Self {
        Self { cache, root_page }
    }

    /// Look up the value stored for `key`.
    pub fn search(&self, key: Key) -> DbResult<Option<PageId>> {
        let mut current = self.root_page;
        loop {
            match self.read_node(current)? {
                Node::Internal { keys, children, .. } => {
                    current = children[keys.partition_point(|k| *k < key)];
                }
                Node::Leaf { cells, .. } => {
                    return Ok(cells
                        .binary_search_by_key(&key, |(k, _)| *k)
                        .ok()
                        .map(|i| cells[i].1));
                }
            }
        }
    }

    /// Insert a key, overwriting the stored value if the key exists.
    /// Splits full nodes on the way back up; the root page may change.
    pub fn insert(&mut self, key: Key, value: PageId) -> DbResult<()> {
        let (leaf_page, mut leaf, path) = self.descend_to_leaf(key)?;
        let Node::Leaf { cells, .. } = &mut leaf else {
            unreachable!("descend_to_leaf returns a leaf");
        };

        match cells.binary_search_by_key(&key, |(k, _)| *k) {
            Ok(i) => {
                cells[i].1 = value;
                return self.write_node(leaf_page, &leaf);
            }
            Err(i) => cells.insert(i, (key, value)),
        }

        if leaf.len() <= MAX_CELLS {
            return self.write_node(leaf_page, &leaf);
        }
        self.split_leaf(leaf_page, leaf, path)
    }

    /// Remove a key. Returns whether it was present. Underfull nodes borrow
    /// from or merge with a sibling; the root collapses when an internal
    /// root is left with a single child.
    pub fn delete(&mut self, key: Key) -> DbResult<bool> {
        let (leaf_page, mut leaf, path) = self.descend_to_leaf(key)?;
        let Node::Leaf { cells, .. } = &mut leaf else {
            unreachable!("descend_to_leaf returns a leaf");
        };

        let Ok(i) = cells.binary_search_by_key(&key, |(k, _)| *k) else {
            return Ok(false);
        };
        cells.remove(i);
        let remaining = leaf.len();
        self.write_node(leaf_page, &leaf)?;

        if leaf_page != self.root_page && remaining < MIN_CELLS {
            self.rebalance(leaf_page, path)?;
        }
        Ok(true)
    }

    /// Position a cursor on the smallest key by descending the leftmost
    /// spine. The cursor is not stable under concurrent mutation of the
    /// tree; deletions during iteration must collect first, then delete.
    pub fn cursor_first(&self) -> DbResult<Cursor> {
        let mut current = self.root_page;
        loop {
            match self.read_node(current)? {
                Node::Internal { children, .. } => current = children[0],
                Node::Leaf { cells, right, .. } => {
                    return Ok(Cursor {
                        cells,
                        at: 0,
                        next_leaf: right,
                    });
                }
            }
        }
    }

    // ---- descent ----

    /// Walk from the root to the leaf responsible for `key`, recording the
    /// internal pages and the child index taken at each.
    fn descend_to_leaf(&self, key: Key) -> DbResult<(PageId, Node, Vec<(PageId, usize)>)> {
        let mut path = Vec::new();
        let mut current = self.root_page;
        loop {
            match self.read_node(current)? {
                Node::Internal { keys, children, .. } => {
                    let idx = keys.partition_point(|k| *k < key);
                    path.push((current, idx));
                    current = children[idx];
                }
                leaf @ Node::Leaf { .. } => return Ok((current, leaf, path)),
            }
        }
    }

    // ---- splitting ----

    fn split_leaf(
        &mut self,
        page: PageId,
        leaf: Node,
        path: Vec<(PageId, usize)>,
    ) -> DbResult<()> {
        let Node::Leaf {
            parent,
            right,
            mut cells,
        } = leaf
        else {
            return Err(DbError::Corruption("leaf split on internal node".into()));
        };

        let mid = cells.len() / 2;
        let right_cells = cells.split_off(mid);
        // Promote a copy of the left half's largest key: equal keys route
        // left during descent.
        let separator = cells
            .last()
            .map(|(k, _)| *k)
            .ok_or_else(|| DbError::Corruption("split produced an empty left leaf".into()))?;

        let right_node = Node::Leaf {
            parent,
            right,
            cells: right_cells,
        };
        let right_page = self.alloc_node(&right_node)?;

        let left_node = Node::Leaf {
            parent,
            right: right_page,
            cells,
        };
        self.write_node(page, &left_node)?;

        self.insert_into_parent(page, separator, right_page, path)
    }

    /// Install a separator and a freshly split-off right sibling in the
    /// parent, splitting upward as needed.
    fn insert_into_parent(
        &mut self,
        left_page: PageId,
        separator: Key,
        right_page: PageId,
        mut path: Vec<(PageId, usize)>,
    ) -> DbResult<()> {
        let Some((parent_page, child_idx)) = path.pop() else {
            // The root itself split: grow the tree by one level.
            let new_root = Node::Internal {
                parent: PageId::NONE,
                keys: vec![separator],
                children: vec![left_page, right_page],
            };
            let new_root_page = self.alloc_node(&new_root)?;
            self.set_parent(left_page, new_root_page)?;
            self.set_parent(right_page, new_root_page)?;
            self.root_page = new_root_page;
            return Ok(());
        };

        let Node::Internal {
            parent: grandparent,
            mut keys,
            mut children,
        } = self.read_node(parent_page)?
        else {
            return Err(DbError::Corruption("leaf on the descent path".into()));
        };

        keys.insert(child_idx, separator);
        children.insert(child_idx + 1, right_page);
        self.set_parent(right_page, parent_page)?;

        if keys.len() <= MAX_CELLS {
            return self.write_node(
                parent_page,
                &Node::Internal {
                    parent: grandparent,
                    keys,
                    children,
                },
            );
        }

        // Internal split: the median key moves up and descends into
        // neither half.
        let mid = keys.len() / 2;
        let promoted = keys[mid];
        let right_keys = keys.split_off(mid + 1);
        keys.pop();
        let right_children = children.split_off(mid + 1);

        let right_node = Node::Internal {
            parent: grandparent,
            keys: right_keys,
            children: right_children,
        };
        let new_right_page = self.alloc_node(&right_node)?;
        self.adopt_children(new_right_page, &right_node)?;

        self.write_node(
            parent_page,
            &Node::Internal {
                parent: grandparent,
                keys,
                children,
            },
        )?;

        self.insert_into_parent(parent_page, promoted, new_right_page, path)
    }

    // ---- rebalancing ----

    /// Restore minimum occupancy of `page` after a delete. `path` holds the
    /// internal ancestors; the immediate parent is its last entry.
    fn rebalance(&mut self, page: PageId, mut path: Vec<(PageId, usize)>) -> DbResult<()> {
        let Some((parent_page, child_idx)) = path.pop() else {
            return Err(DbError::Corruption("rebalance reached above the root".into()));
        };

        let Node::Internal {
            parent: grandparent,
            mut keys,
            mut children,
        } = self.read_node(parent_page)?
        else {
            return Err(DbError::Corruption("leaf on the descent path".into()));
        };

        let node = self.read_node(page)?;

        // Borrow from the left sibling when it has spare cells.
        if child_idx > 0 {
            let left_page = children[child_idx - 1];
            let left = self.read_node(left_page)?;
            if left.len() > MIN_CELLS {
                let separator = &mut keys[child_idx - 1];
                self.borrow_from_left(page, node, left_page, left, separator)?;
                return self.write_node(
                    parent_page,
                    &Node::Internal {
                        parent: grandparent,
                        keys,
                        children,
                    },
                );
            }
        }

        // Then the right sibling.
        if child_idx + 1 < children.len() {
            let right_page = children[child_idx + 1];
            let right = self.read_node(right_page)?;
            if right.len() > MIN_CELLS {
                let separator = &mut keys[child_idx];
                self.borrow_from_right(page, node, right_page, right, separator)?;
                return self.write_node(
                    parent_page,
                    &Node::Internal {
                        parent: grandparent,
                        keys,
                        children,
                    },
                );
            }
        }

        // No sibling can spare a cell: merge. The separator between the
        // merged pair collapses out of the parent; the emptied page leaks.
        if child_idx > 0 {
            let left_page = children[child_idx - 1];
            let left = self.read_node(left_page)?;
            let separator = keys.remove(child_idx - 1);
            children.remove(child_idx);
            self.merge_nodes(left_page, left, node, separator)?;
        } else {
            let right_page = children[child_idx + 1];
            let right = self.read_node(right_page)?;
            let separator = keys.remove(child_idx);
            children.remove(child_idx + 1);
            self.merge_nodes(page, node, right, separator)?;
        }

        if parent_page == self.root_page {
            if keys.is_empty() {
                // Height shrinks: the lone child becomes the root.
                let new_root = children[0];
                self.set_parent(new_root, PageId::NONE)?;
                self.root_page = new_root;
                return Ok(());
            }
            return self.write_node(
                parent_page,
                &Node::Internal {
                    parent: grandparent,
                    keys,
                    children,
                },
            );
        }

        let deficient = keys.len() < MIN_CELLS;
        self.write_node(
            parent_page,
            &Node::Internal {
                parent: grandparent,
                keys,
                children,
            },
        )?;
        if deficient {
            self.rebalance(parent_page, path)?;
        }
        Ok(())
    }

    /// Move one cell from the tail of the left sibling into `node` and
    /// refresh the separator between them.
    fn borrow_from_left(
        &mut self,
        page: PageId,
        node: Node,
        left_page: PageId,
        left: Node,
        separator: &mut Key,
    ) -> DbResult<()> {
        match (node, left) {
            (
                Node::Leaf {
                    parent,
                    right,
                    mut cells,
                },
                Node::Leaf {
                    parent: l_parent,
                    right: l_right,
                    cells: mut l_cells,
                },
            ) => {
                let moved = l_cells
                    .pop()
                    .ok_or_else(|| DbError::Corruption("borrow from empty leaf".into()))?;
                cells.insert(0, moved);
                *separator = l_cells
                    .last()
                    .map(|(k, _)| *k)
                    .ok_or_else(|| DbError::Corruption("borrow emptied the left leaf".into()))?;
                self.write_node(
                    left_page,
                    &Node::Leaf {
                        parent: l_parent,
                        right: l_right,
                        cells: l_cells,
                    },
                )?;
                self.write_node(
                    page,
                    &Node::Leaf {
                        parent,
                        right,
                        cells,
                    },
                )
            }
            (
                Node::Internal {
                    parent,
                    mut keys,
                    mut children,
                },
                Node::Internal {
                    parent: l_parent,
                    keys: mut l_keys,
                    children: mut l_children,
                },
            ) => {
                // Rotate through the parent: the separator comes down, the
                // left sibling's last key goes up, its last child moves over.
                let moved_child = l_children
                    .pop()
                    .ok_or_else(|| DbError::Corruption("borrow from childless node".into()))?;
                keys.insert(0, *separator);
                children.insert(0, moved_child);
                *separator = l_keys
                    .pop()
                    .ok_or_else(|| DbError::Corruption("borrow from keyless node".into()))?;
                self.set_parent(moved_child, page)?;
                self.write_node(
                    left_page,
                    &Node::Internal {
                        parent: l_parent,
                        keys: l_keys,
                        children: l_children,
                    },
                )?;
                self.write_node(
                    page,
                    &Node::Internal {
                        parent,
                        keys,
                        children,
                    },
                )
            }
            _ => Err(DbError::Corruption(
                "sibling nodes disagree on kind".into(),
            )),
        }
    }

    /// Move one cell from the head of the right sibling into `node` and
    /// refresh the separator between them.
    fn borrow_from_right(
        &mut self,
        page: PageId,
        node: Node,
        right_page: PageId,
        right: Node,
        separator: &mut Key,
    ) -> DbResult<()> {
        match (node, right) {
            (
                Node::Leaf {
                    parent,
                    right: next,
                    mut cells,
                },
                Node::Leaf {
                    parent: r_parent,
                    right: r_right,
                    cells: mut r_cells,
                },
            ) => {
                if r_cells.is_empty() {
                    return Err(DbError::Corruption("borrow from empty leaf".into()));
                }
                let moved = r_cells.remove(0);
                *separator = moved.0;
                cells.push(moved);
                self.write_node(
                    right_page,
                    &Node::Leaf {
                        parent: r_parent,
                        right: r_right,
                        cells: r_cells,
                    },
                )?;
                self.write_node(
                    page,
                    &Node::Leaf {
                        parent,
                        right: next,
                        cells,
                    },
                )
            }
            (
                Node::Internal {
                    parent,
                    mut keys,
                    mut children,
                },
                Node::Internal {
                    parent: r_parent,
                    keys: mut r_keys,
                    children: mut r_children,
                },
            ) => {
                if r_keys.is_empty() || r_children.is_empty() {
                    return Err(DbError::Corruption("borrow from deficient node".into()));
                }
                let moved_child = r_children.remove(0);
                keys.push(*separator);
                children.push(moved_child);
                *separator = r_keys.remove(0);
                self.set_parent(moved_child, page)?;
                self.write_node(
                    right_page,
                    &Node::Internal {
                        parent: r_parent,
                        keys: r_keys,
                        children: r_children,
                    },
                )?;
                self.write_node(
                    page,
                    &Node::Internal {
                        parent,
                        keys,
                        children,
                    },
                )
            }
            _ => Err(DbError::Corruption(
                "sibling nodes disagree on kind".into(),
            )),
        }
    }

    /// Fold `right` into `left`. For internal nodes the collapsed parent
    /// separator comes down between the two key runs. The right page is
    /// abandoned (no free list).
    fn merge_nodes(
        &mut self,
        left_page: PageId,
        left: Node,
        right: Node,
        separator: Key,
    ) -> DbResult<()> {
        match (left, right) {
            (
                Node::Leaf {
                    parent,
                    mut cells,
                    ..
                },
                Node::Leaf {
                    right: r_right,
                    cells: r_cells,
                    ..
                },
            ) => {
                cells.extend(r_cells);
                self.write_node(
                    left_page,
                    &Node::Leaf {
                        parent,
                        right: r_right,
                        cells,
                    },
                )
            }
            (
                Node::Internal {
                    parent,
                    mut keys,
                    mut children,
                },
                Node::Internal {
                    keys: r_keys,
                    children: r_children,
                    ..
                },
            ) => {
                keys.push(separator);
                keys.extend(r_keys);
                for child in &r_children {
                    self.set_parent(*child, left_page)?;
                }
                children.extend(r_children);
                self.write_node(
                    left_page,
                    &Node::Internal {
                        parent,
                        keys,
                        children,
                    },
                )
            }
            _ => Err(DbError::Corruption(
                "sibling nodes disagree on kind".into(),
            )),
        }
    }

    // ---- page plumbing ----

    fn read_node(&self, page: PageId) -> DbResult<Node> {
        let guard = self.cache.get_page(page)?;
        let node = Node::decode(&guard.read())?;
        Ok(node)
    }

    fn write_node(&self, page: PageId, node: &Node) -> DbResult<()> {
        let guard = self.cache.get_page(page)?;
        self.cache.mark_dirty(&guard)?;
        node.encode(&mut guard.write());
        Ok(())
    }

    fn alloc_node(&self, node: &Node) -> DbResult<PageId> {
        let guard = self.cache.allocate_page()?;
        node.encode(&mut guard.write());
        Ok(guard.page())
    }

    fn set_parent(&self, page: PageId, parent: PageId) -> DbResult<()> {
        let mut node = self.read_node(page)?;
        if node.parent() == parent {
            return Ok(());
        }
        node.set_parent(parent);
        self.write_node(page, &node)
    }

    fn adopt_children(&self, parent_page: PageId, node: &Node) -> DbResult<()> {
        if let Node::Internal { children, .. } = node {
            for child in children {
                self.set_parent(*child, parent_page)?;
            }
        }
        Ok(())
    }
}

/// Forward iterator over `(key, value)` pairs in ascending key order.
///
/// Holds the current leaf's cells by value and the page number of the next
/// leaf, so it pins nothing between calls.
#[derive(Debug)]
pub struct Cursor {
    cells: Vec<(Key, PageId)>,
    at: usize,
    next_leaf: PageId,
}

impl Cursor {
    /// Advance and return the next pair, or `None` past the last leaf.
    pub fn next_entry(&mut self, cache: &PageCache) -> DbResult<Option<(Key, PageId)>> {
        loop {
            if self.at < self.cells.len() {
                let entry = self.cells[self.at];
                self.at += 1;
                return Ok(Some(entry));
            }
            if self.next_leaf.is_none() {
                return Ok(None);
            }
            let guard = cache.get_page(self.next_leaf)?;
            let node = Node::decode(&guard.read())?;
            let Node::Leaf { cells, right, .. } = node else {
                return Err(DbError::Corruption(
                    "leaf chain points at an internal node".into(),
                ));
            };
            self.cells = cells;
            self.at = 0;
            self.next_leaf = right;
        }
    }
}
