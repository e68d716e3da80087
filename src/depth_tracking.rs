use crate::error::{Error, Result};

/// Explicit stack of open frames, shared by the reader and the writer.
///
/// Nesting lives here rather than on the call stack, so deep documents cost heap, not recursion.
#[derive(Clone, Debug)]
pub struct DepthTracker<F> {
    tracking: Vec<F>,
    max_depth: usize,
}

impl<F> DepthTracker<F> {
    /// Create a new depth tracker
    pub fn new(max_depth: usize) -> Self {
        Self {
            tracking: Vec::new(),
            max_depth,
        }
    }

    /// Open a new frame, failing if that would go past the depth limit.
    pub fn push(&mut self, frame: F) -> Result<()> {
        if self.tracking.len() >= self.max_depth {
            return Err(Error::ParseLimit(format!(
                "Depth limit of {} exceeded",
                self.max_depth
            )));
        }
        self.tracking.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<F> {
        self.tracking.pop()
    }

    pub fn last(&self) -> Option<&F> {
        self.tracking.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut F> {
        self.tracking.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.tracking.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracking.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn limit() {
        let mut tracker = DepthTracker::new(2);
        tracker.push(1u8).unwrap();
        tracker.push(2u8).unwrap();
        assert!(matches!(tracker.push(3u8), Err(Error::ParseLimit(_))));
        assert_eq!(tracker.depth(), 2);
        assert_eq!(tracker.pop(), Some(2));
        tracker.push(4u8).unwrap();
        assert_eq!(tracker.last(), Some(&4));
    }
}
