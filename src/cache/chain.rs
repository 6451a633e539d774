use std::fmt;

/// Stable handle of a collection inside its policy's chain arena.
///
/// Handles are recycled once the collection they named is destroyed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CollectionId(usize);

impl CollectionId {
    pub fn get(&self) -> usize {
        self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Link {
    // not part of the chain: fresh or evicted
    Unlinked,
    // `prev == None` is the head, `next == None` the tail
    Linked {
        prev: Option<CollectionId>,
        next: Option<CollectionId>,
    },
}

struct Node<T> {
    link: Link,
    value: T,
}

/// Doubly linked LRU ordering over the resident collections of a policy.
///
/// Nodes live in an arena addressed by [`CollectionId`]; every registered
/// collection has a node, but only resident ones are linked. The head is the
/// most recently used collection, the tail the next eviction victim.
///
/// ```text
///   head                                     tail
///    |                                        |
///    v                                        v
///  [ #3 ] <--> [ #0 ] <--> [ #4 ] <--> [ #1 ]        [ #2 ] (unlinked)
/// ```
pub(crate) struct LruChain<T> {
    nodes: Vec<Option<Node<T>>>,
    free_list: Vec<usize>,
    head: Option<CollectionId>,
    tail: Option<CollectionId>,
    linked: usize,
}

impl<T> LruChain<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free_list: Vec::new(),
            head: None,
            tail: None,
            linked: 0,
        }
    }

    /// Registers a new, unlinked node.
    pub fn insert(&mut self, value: T) -> CollectionId {
        let node = Some(Node {
            link: Link::Unlinked,
            value,
        });

        if let Some(idx) = self.free_list.pop() {
            self.nodes[idx] = node;
            CollectionId(idx)
        } else {
            self.nodes.push(node);
            CollectionId(self.nodes.len() - 1)
        }
    }

    /// Unlinks and unregisters a node, returning its value.
    pub fn remove(&mut self, id: CollectionId) -> Option<T> {
        self.unlink(id);
        let node = self.nodes.get_mut(id.0)?.take()?;
        self.free_list.push(id.0);
        Some(node.value)
    }

    pub fn get(&self, id: CollectionId) -> Option<&T> {
        self.node(id).map(|node| &node.value)
    }

    pub fn head(&self) -> Option<CollectionId> {
        self.head
    }

    pub fn tail(&self) -> Option<CollectionId> {
        self.tail
    }

    /// Number of linked (resident) nodes.
    pub fn len(&self) -> usize {
        self.linked
    }

    /// The next more recently used node.
    pub fn prev(&self, id: CollectionId) -> Option<CollectionId> {
        match self.node(id)?.link {
            Link::Linked { prev, .. } => prev,
            Link::Unlinked => None,
        }
    }

    #[cfg(test)]
    pub fn is_linked(&self, id: CollectionId) -> bool {
        matches!(self.node(id), Some(node) if node.link != Link::Unlinked)
    }

    /// Detaches a node from the chain.
    ///
    /// Returns `false` if the node was not linked.
    pub fn unlink(&mut self, id: CollectionId) -> bool {
        let Some(Link::Linked { prev, next }) = self.node(id).map(|node| node.link) else {
            return false;
        };

        match prev {
            Some(prev) => self.set_next(prev, next),
            None => self.head = next,
        }
        match next {
            Some(next) => self.set_prev(next, prev),
            None => self.tail = prev,
        }

        if let Some(node) = self.node_mut(id) {
            node.link = Link::Unlinked;
        }
        self.linked -= 1;
        true
    }

    /// Makes `id` the most recently used node, linking it if needed.
    ///
    /// Returns `true` if the node was already linked.
    pub fn move_to_front(&mut self, id: CollectionId) -> bool {
        if self.node(id).is_none() {
            return false;
        }
        if self.head == Some(id) {
            return true;
        }

        let was_linked = self.unlink(id);
        let old_head = self.head;
        if let Some(node) = self.node_mut(id) {
            node.link = Link::Linked {
                prev: None,
                next: old_head,
            };
        }
        match old_head {
            Some(old_head) => self.set_prev(old_head, Some(id)),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.linked += 1;

        was_linked
    }

    /// Ids from most to least recently used.
    pub fn iter_ids(&self) -> impl Iterator<Item = CollectionId> + '_ {
        std::iter::successors(self.head, |id| match self.node(*id)?.link {
            Link::Linked { next, .. } => next,
            Link::Unlinked => None,
        })
    }

    fn node(&self, id: CollectionId) -> Option<&Node<T>> {
        self.nodes.get(id.0)?.as_ref()
    }

    fn node_mut(&mut self, id: CollectionId) -> Option<&mut Node<T>> {
        self.nodes.get_mut(id.0)?.as_mut()
    }

    fn set_prev(&mut self, id: CollectionId, prev: Option<CollectionId>) {
        if let Some(Node {
            link: Link::Linked { prev: p, .. },
            ..
        }) = self.node_mut(id)
        {
            *p = prev;
        }
    }

    fn set_next(&mut self, id: CollectionId, next: Option<CollectionId>) {
        if let Some(Node {
            link: Link::Linked { next: n, .. },
            ..
        }) = self.node_mut(id)
        {
            *n = next;
        }
    }

    #[cfg(test)]
    pub fn check_invariants(&self) {
        let forward: Vec<_> = self.iter_ids().collect();
        assert_eq!(forward.len(), self.linked);
        assert_eq!(forward.first().copied(), self.head);
        assert_eq!(forward.last().copied(), self.tail);

        let mut prev = None;
        for id in &forward {
            match self.node(*id).unwrap().link {
                Link::Linked { prev: p, .. } => assert_eq!(p, prev),
                Link::Unlinked => panic!("unlinked node {id} reachable from head"),
            }
            prev = Some(*id);
        }

        let linked = self
            .nodes
            .iter()
            .flatten()
            .filter(|node| node.link != Link::Unlinked)
            .count();
        assert_eq!(linked, self.linked);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(chain: &LruChain<char>) -> Vec<char> {
        chain
            .iter_ids()
            .map(|id| *chain.get(id).unwrap())
            .collect()
    }

    #[test]
    fn lru_chain_ordering() {
        let mut chain = LruChain::new();
        let a = chain.insert('a');
        let b = chain.insert('b');
        let c = chain.insert('c');
        assert_eq!(chain.len(), 0);
        assert!(!chain.is_linked(a));

        assert!(!chain.move_to_front(a));
        assert!(!chain.move_to_front(b));
        assert!(!chain.move_to_front(c));
        assert_eq!(ids(&chain), ['c', 'b', 'a']);
        assert_eq!(chain.tail(), Some(a));
        chain.check_invariants();

        // touching the middle moves it to the front
        assert!(chain.move_to_front(b));
        assert_eq!(ids(&chain), ['b', 'c', 'a']);
        // touching the tail too
        assert!(chain.move_to_front(a));
        assert_eq!(ids(&chain), ['a', 'b', 'c']);
        assert_eq!(chain.tail(), Some(c));
        assert_eq!(chain.prev(c), Some(b));
        assert_eq!(chain.prev(a), None);
        // and the head is a no-op
        assert!(chain.move_to_front(a));
        assert_eq!(ids(&chain), ['a', 'b', 'c']);
        chain.check_invariants();
    }

    #[test]
    fn lru_chain_unlink_ends() {
        let mut chain = LruChain::new();
        let a = chain.insert('a');
        let b = chain.insert('b');
        let c = chain.insert('c');
        for id in [a, b, c] {
            chain.move_to_front(id);
        }

        assert!(chain.unlink(c));
        assert_eq!(chain.head(), Some(b));
        assert!(chain.unlink(a));
        assert_eq!(chain.tail(), Some(b));
        assert!(!chain.unlink(a));
        assert_eq!(ids(&chain), ['b']);
        chain.check_invariants();

        assert!(chain.unlink(b));
        assert_eq!(chain.head(), None);
        assert_eq!(chain.tail(), None);
        assert_eq!(chain.len(), 0);
        chain.check_invariants();
    }

    #[test]
    fn lru_chain_remove_recycles_ids() {
        let mut chain = LruChain::new();
        let a = chain.insert('a');
        let b = chain.insert('b');
        chain.move_to_front(a);
        chain.move_to_front(b);

        assert_eq!(chain.remove(a), Some('a'));
        assert_eq!(chain.remove(a), None);
        assert_eq!(ids(&chain), ['b']);
        chain.check_invariants();

        let c = chain.insert('c');
        assert_eq!(c, a);
        assert!(!chain.is_linked(c));
        assert!(!chain.move_to_front(c));
        assert_eq!(ids(&chain), ['c', 'b']);
        chain.check_invariants();
    }
}
