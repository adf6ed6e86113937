// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CyclicDependencyError;
use crate::runtime::{NodeCell, NodeHandle, RuntimeNode};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Active,
    Done,
}

struct Frame<'a> {
    handle: &'a NodeHandle,
    edges: Vec<&'a NodeHandle>,
    next: usize,
}

impl<'a> Frame<'a> {
    fn new(handle: &'a NodeHandle) -> Self {
        Self {
            handle,
            edges: handle.runtime().map(RuntimeNode::edges).unwrap_or_default(),
            next: 0,
        }
    }
}

/// Walks the compiled graph reachable from `roots` and reports the first cycle found.
///
/// Dependency, owner and delegate edges are followed. Delegates are left out of the reported
/// path since they share the key of the service they forward to or rename it.
pub(crate) fn detect<'a>(roots: impl IntoIterator<Item = &'a NodeHandle>) -> Result<(), CyclicDependencyError> {
    let mut visits: HashMap<*const NodeCell, Visit> = HashMap::new();

    for root in roots {
        if visits.contains_key(&Arc::as_ptr(root)) {
            continue;
        }

        visits.insert(Arc::as_ptr(root), Visit::Active);
        let mut stack = vec![Frame::new(root)];

        while let Some(frame) = stack.last_mut() {
            let Some(&target) = frame.edges.get(frame.next) else {
                visits.insert(Arc::as_ptr(frame.handle), Visit::Done);
                stack.pop();
                continue;
            };
            frame.next += 1;

            match visits.get(&Arc::as_ptr(target)) {
                Some(Visit::Done) => {}
                Some(Visit::Active) => return Err(cycle(&stack, target)),
                None => {
                    visits.insert(Arc::as_ptr(target), Visit::Active);
                    stack.push(Frame::new(target));
                }
            }
        }
    }

    Ok(())
}

fn cycle(stack: &[Frame<'_>], target: &NodeHandle) -> CyclicDependencyError {
    let start = stack
        .iter()
        .position(|frame| Arc::ptr_eq(frame.handle, target))
        .unwrap_or_default();
    let frames = stack.get(start..).unwrap_or_default();

    let mut path: Vec<_> = frames
        .iter()
        .filter(|frame| !matches!(frame.handle.runtime(), Some(RuntimeNode::Delegate(_))))
        .map(|frame| frame.handle.key().clone())
        .collect();

    if path.is_empty() {
        path = frames.iter().map(|frame| frame.handle.key().clone()).collect();
    }
    if let Some(first) = path.first().cloned() {
        path.push(first);
    }

    CyclicDependencyError::new(path)
}
