//! Open-path bookkeeping for pivot trees.
//!
//! A [PathTree] records which tree nodes a client has expanded. Children
//! keep insertion order, so the generated UNION arms (and thus row order
//! within a depth) stay stable across edits.

use indexmap::IndexMap;

/// A prefix-closed set of open paths.
///
/// Immutable: `open`/`close` return a new tree. The empty path (the root)
/// is implicitly always open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTree {
    children: IndexMap<String, PathTree>,
}

impl PathTree {
    pub fn new() -> PathTree {
        PathTree::default()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// New tree with `path` (and every prefix of it) open.
    pub fn open(&self, path: &[String]) -> PathTree {
        let mut next = self.clone();
        let mut node = &mut next;
        for component in path {
            node = node
                .children
                .entry(component.clone())
                .or_default();
        }
        next
    }

    /// New tree with `path` closed; the whole subtree below it goes too.
    pub fn close(&self, path: &[String]) -> PathTree {
        let mut next = self.clone();
        match path.split_last() {
            None => next.children.clear(),
            Some((last, prefix)) => {
                let mut node = &mut next;
                for component in prefix {
                    match node.children.get_mut(component) {
                        Some(child) => node = child,
                        None => return next,
                    }
                }
                node.children.shift_remove(last);
            }
        }
        next
    }

    pub fn is_open(&self, path: &[String]) -> bool {
        let mut node = self;
        for component in path {
            match node.children.get(component) {
                Some(child) => node = child,
                None => return false,
            }
        }
        true
    }

    /// New tree truncated to `depth` levels below the root.
    pub fn trim_to_depth(&self, depth: usize) -> PathTree {
        if depth == 0 {
            return PathTree::new();
        }
        PathTree {
            children: self
                .children
                .iter()
                .map(|(k, v)| (k.clone(), v.trim_to_depth(depth - 1)))
                .collect(),
        }
    }

    /// All open paths in pre-order: a parent before its descendants,
    /// siblings in insertion order. The empty root path is not yielded.
    pub fn iter_paths(&self) -> PathIter<'_> {
        PathIter {
            stack: vec![self.children.iter()],
            prefix: Vec::new(),
        }
    }
}

pub struct PathIter<'a> {
    stack: Vec<indexmap::map::Iter<'a, String, PathTree>>,
    prefix: Vec<String>,
}

impl<'a> Iterator for PathIter<'a> {
    type Item = Vec<String>;

    fn next(&mut self) -> Option<Vec<String>> {
        loop {
            let frame = self.stack.last_mut()?;
            match frame.next() {
                Some((name, child)) => {
                    self.prefix.push(name.clone());
                    let path = self.prefix.clone();
                    self.stack.push(child.children.iter());
                    return Some(path);
                }
                None => {
                    self.stack.pop();
                    self.prefix.pop();
                }
            }
        }
    }
}
