//! Ordered collections of request handles.
//!
//! Both the engine-wide pending queue and each caller's completed queue are
//! LIFO: new entries go to the head, so traversal visits the most recent
//! first. Entries are linked through a map keyed by handle, so membership
//! tests and removal by handle are constant time.

use crate::request::RequestHandle;

use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: Option<RequestHandle>,
    next: Option<RequestHandle>,
}

#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    links: HashMap<RequestHandle, Link>,
    head: Option<RequestHandle>,
}

impl RequestQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, handle: RequestHandle) {
        debug_assert!(!self.contains(handle), "{handle:?} queued twice");

        let link = Link {
            prev: None,
            next: self.head,
        };
        if let Some(old_head) = self.head.and_then(|head| self.links.get_mut(&head)) {
            old_head.prev = Some(handle);
        }

        self.links.insert(handle, link);
        self.head = Some(handle);
    }

    pub(crate) fn pop(&mut self) -> Option<RequestHandle> {
        let head = self.head?;
        self.remove(head);
        Some(head)
    }

    /// Removes `handle`, returning whether it was queued.
    pub(crate) fn remove(&mut self, handle: RequestHandle) -> bool {
        let Some(link) = self.links.remove(&handle) else {
            return false;
        };

        match link.prev.and_then(|prev| self.links.get_mut(&prev)) {
            Some(prev) => prev.next = link.next,
            None => self.head = link.next,
        }
        if let Some(next) = link.next.and_then(|next| self.links.get_mut(&next)) {
            next.prev = link.prev;
        }

        true
    }

    pub(crate) fn contains(&self, handle: RequestHandle) -> bool {
        self.links.contains_key(&handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.links.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub(crate) fn iter(&self) -> Iter<'_> {
        Iter {
            queue: self,
            cursor: self.head,
        }
    }

    /// Copies the current order so the queue can be mutated while walking it.
    pub(crate) fn snapshot(&self) -> Vec<RequestHandle> {
        let mut handles = Vec::with_capacity(self.len());
        handles.extend(self.iter());
        handles
    }

    /// Empties the queue, returning its entries head first.
    pub(crate) fn drain(&mut self) -> Vec<RequestHandle> {
        let handles = self.snapshot();
        self.links.clear();
        self.head = None;
        handles
    }
}

pub(crate) struct Iter<'a> {
    queue: &'a RequestQueue,
    cursor: Option<RequestHandle>,
}

impl Iterator for Iter<'_> {
    type Item = RequestHandle;

    fn next(&mut self) -> Option<RequestHandle> {
        let current = self.cursor?;
        self.cursor = self.queue.links.get(&current).and_then(|link| link.next);
        Some(current)
    }
}
