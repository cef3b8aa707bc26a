//! Pure-count break/resume coordination (C11). Multiple independent
//! requesters may ask for a break at once; the tool only needs to act
//! at the 0-to-1 and 1-to-0 edges, not on every request.

/// What the 0/1 edge of the counter implies the caller should now do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The count moved but stayed on the same side of zero.
    None,
    /// The count left zero: application places should pause.
    Paused,
    /// The count returned to zero: application places should resume.
    Resumed,
}

#[derive(Debug, Default)]
pub struct BreakCounter {
    count: i64,
}

impl BreakCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn request(&mut self) -> Transition {
        self.count += 1;
        if self.count == 1 {
            Transition::Paused
        } else {
            Transition::None
        }
    }

    pub fn remove(&mut self) -> Transition {
        self.count -= 1;
        if self.count == 0 {
            Transition::Resumed
        } else {
            Transition::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_request_pauses() {
        let mut counter = BreakCounter::new();
        assert_eq!(counter.request(), Transition::Paused);
        assert_eq!(counter.request(), Transition::None);
        assert_eq!(counter.request(), Transition::None);
        assert_eq!(counter.count(), 3);
    }

    #[test]
    fn only_the_last_remove_resumes() {
        let mut counter = BreakCounter::new();
        counter.request();
        counter.request();
        assert_eq!(counter.remove(), Transition::None);
        assert_eq!(counter.remove(), Transition::Resumed);
        assert_eq!(counter.count(), 0);
    }
}
