//! Intrusive list tests
//!
//! Nodes live in boxed storage owned by the test; the lists only thread
//! pointers through them.

#[cfg(test)]
mod tests {
    use nexa_alloc::list::{DList, DListNode, SList, SListNode};

    fn dnodes(count: usize) -> Vec<Box<DListNode>> {
        (0..count).map(|_| Box::new(DListNode::new())).collect()
    }

    // =========================================================================
    // Doubly-Linked List Tests
    // =========================================================================

    #[test]
    fn test_dlist_starts_empty() {
        let list = DList::new();
        assert!(list.is_empty());
    }

    #[test]
    fn test_dlist_push_head_pops_lifo() {
        let mut list = DList::new();
        let mut nodes = dnodes(3);

        unsafe {
            for node in &mut nodes {
                list.push_head(&mut **node);
            }

            assert!(!list.is_empty());
            assert_eq!(list.pop_head().unwrap().as_ptr(), &mut *nodes[2] as *mut _);
            assert_eq!(list.pop_head().unwrap().as_ptr(), &mut *nodes[1] as *mut _);
            assert_eq!(list.pop_head().unwrap().as_ptr(), &mut *nodes[0] as *mut _);
            assert!(list.pop_head().is_none());
        }
        assert!(list.is_empty());
    }

    #[test]
    fn test_dlist_push_tail_keeps_order() {
        let mut list = DList::new();
        let mut nodes = dnodes(3);

        unsafe {
            for node in &mut nodes {
                list.push_tail(&mut **node);
            }

            for node in &mut nodes {
                assert_eq!(list.pop_head().unwrap().as_ptr(), &mut **node as *mut _);
            }
        }
        assert!(list.is_empty());
    }

    #[test]
    fn test_dlist_unlink_any_position() {
        // Unlink the middle node, then the current head, then the tail.
        let mut list = DList::new();
        let mut nodes = dnodes(3);

        unsafe {
            for node in &mut nodes {
                list.push_tail(&mut **node);
            }

            list.unlink(&mut *nodes[1]);
            list.unlink(&mut *nodes[0]);
            list.unlink(&mut *nodes[2]);
        }
        assert!(list.is_empty());

        // Unlinked nodes are reusable immediately.
        unsafe {
            list.push_head(&mut *nodes[1]);
            assert_eq!(list.pop_head().unwrap().as_ptr(), &mut *nodes[1] as *mut _);
        }
    }

    // =========================================================================
    // Singly-Linked List Tests
    // =========================================================================

    #[test]
    fn test_slist_push_pop_lifo() {
        let mut list = SList::new();
        let mut nodes: Vec<Box<SListNode>> =
            (0..3).map(|_| Box::new(SListNode::new())).collect();

        assert!(list.is_empty());

        unsafe {
            for node in &mut nodes {
                list.push_head(&mut **node);
            }

            assert_eq!(list.pop_head().unwrap().as_ptr(), &mut *nodes[2] as *mut _);
            assert_eq!(list.pop_head().unwrap().as_ptr(), &mut *nodes[1] as *mut _);
            assert_eq!(list.pop_head().unwrap().as_ptr(), &mut *nodes[0] as *mut _);
            assert!(list.pop_head().is_none());
        }
        assert!(list.is_empty());
    }
}
