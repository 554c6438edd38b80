//! Holds the strategy currently attached to the controller. At most one
//! strategy is active at a time; attaching a new one replaces the old.

use tracing::info;

use crate::strategy::Strategy;

#[derive(Debug, Default)]
pub struct Selector {
    active: Option<Strategy>,
}

impl Selector {
    pub fn new(initial: Option<Strategy>) -> Selector {
        Selector { active: initial }
    }

    /// Make `strategy` the active one, returning whichever it replaced.
    pub fn attach(&mut self, strategy: Strategy) -> Option<Strategy> {
        let previous = self.active.replace(strategy);
        match previous {
            Some(old) if old != strategy => {
                info!("detached strategy {}, attached {}", old, strategy)
            }
            Some(_) => (),
            None => info!("attached strategy {}", strategy),
        }
        previous
    }

    /// Detach the active strategy, if any. Packets are dropped until the
    /// next attach.
    pub fn detach(&mut self) -> Option<Strategy> {
        let previous = self.active.take();
        if let Some(old) = previous {
            info!("detached strategy {}", old);
        }
        previous
    }

    pub fn active(&self) -> Option<Strategy> {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_the_initial_strategy() {
        let sel = Selector::new(Some(Strategy::DumbHub));
        assert_eq!(sel.active(), Some(Strategy::DumbHub));
        assert_eq!(Selector::new(None).active(), None);
    }

    #[test]
    fn attach_replaces_the_active_strategy() {
        let mut sel = Selector::new(Some(Strategy::DumbHub));
        assert_eq!(sel.attach(Strategy::PairSwitch), Some(Strategy::DumbHub));
        assert_eq!(sel.active(), Some(Strategy::PairSwitch));
    }

    #[test]
    fn detach_leaves_nothing_attached() {
        let mut sel = Selector::new(Some(Strategy::LazyHub));
        assert_eq!(sel.detach(), Some(Strategy::LazyHub));
        assert_eq!(sel.active(), None);
        assert_eq!(sel.detach(), None);
    }
}
