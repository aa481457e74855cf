/// Field locator: resolve a target to an interactable control within a
/// bounded wait.
///
/// Absence is a normal outcome here. `wait_for` returns `None` on timeout and
/// never propagates page errors; callers decide whether a missing control
/// skips one item or a whole step.

use std::thread;
use std::time::{Duration, Instant};

use super::{Element, Page, Target};
use crate::config::MAX_WAIT;
use crate::logging::{self, Stage};

pub struct FieldLocator {
    timeout: Duration,
    poll_interval: Duration,
}

impl FieldLocator {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Polls until `target` is present, displayed and enabled. The page is
    /// checked at least once even with a zero timeout. Timeouts beyond
    /// `MAX_WAIT` are cut to it.
    pub fn wait_for(&self, page: &mut dyn Page, target: &Target) -> Option<Element> {
        let deadline = Instant::now() + self.timeout.min(MAX_WAIT);
        loop {
            match Self::probe(page, target) {
                Ok(Some(element)) => return Some(element),
                Ok(None) => {}
                Err(e) => logging::debug(Stage::Web, None, &format!("{}: {}", target, e)),
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn probe(
        page: &mut dyn Page,
        target: &Target,
    ) -> Result<Option<Element>, super::BrowserError> {
        match page.find(target)? {
            Some(element) if page.is_interactable(&element)? => Ok(Some(element)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserError;

    /// Page whose single control appears after `appears_after` lookups and
    /// becomes enabled `enabled_after` lookups later.
    struct SlowPage {
        lookups: usize,
        appears_after: usize,
        enabled_after: usize,
        fail_lookups: bool,
    }

    impl Page for SlowPage {
        fn navigate(&mut self, _url: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        fn find(&mut self, _target: &Target) -> Result<Option<Element>, BrowserError> {
            self.lookups += 1;
            if self.fail_lookups {
                return Err(BrowserError::Http("connection reset".into()));
            }
            Ok((self.lookups > self.appears_after).then(|| Element("e1".into())))
        }
        fn is_interactable(&mut self, _element: &Element) -> Result<bool, BrowserError> {
            Ok(self.lookups > self.appears_after + self.enabled_after)
        }
        fn attribute(&mut self, _e: &Element, _n: &str) -> Result<Option<String>, BrowserError> {
            Ok(None)
        }
        fn click(&mut self, _e: &Element) -> Result<(), BrowserError> {
            Ok(())
        }
        fn script_click(&mut self, _e: &Element) -> Result<(), BrowserError> {
            Ok(())
        }
        fn clear(&mut self, _e: &Element) -> Result<(), BrowserError> {
            Ok(())
        }
        fn type_text(&mut self, _e: &Element, _t: &str) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    fn page(appears_after: usize, enabled_after: usize) -> SlowPage {
        SlowPage {
            lookups: 0,
            appears_after,
            enabled_after,
            fail_lookups: false,
        }
    }

    fn target() -> Target {
        Target::Id("startDt_d".into())
    }

    #[test]
    fn test_present_control_found_on_first_probe() {
        let locator = FieldLocator::new(Duration::ZERO, Duration::from_millis(1));
        let mut page = page(0, 0);
        assert_eq!(locator.wait_for(&mut page, &target()), Some(Element("e1".into())));
        assert_eq!(page.lookups, 1);
    }

    #[test]
    fn test_unbounded_timeout_is_cut_not_overflowed() {
        let locator = FieldLocator::new(Duration::MAX, Duration::from_millis(1));
        let mut page = page(1, 0);
        assert!(locator.wait_for(&mut page, &target()).is_some());
        assert_eq!(page.lookups, 2);
    }

    #[test]
    fn test_waits_until_control_becomes_interactable() {
        let locator = FieldLocator::new(Duration::from_secs(2), Duration::from_millis(1));
        let mut page = page(3, 2);
        assert!(locator.wait_for(&mut page, &target()).is_some());
        assert_eq!(page.lookups, 6);
    }

    #[test]
    fn test_times_out_with_none() {
        let locator = FieldLocator::new(Duration::from_millis(20), Duration::from_millis(2));
        let mut page = page(usize::MAX - 10, 0);
        let started = Instant::now();
        assert_eq!(locator.wait_for(&mut page, &target()), None);
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(page.lookups > 1, "locator should poll more than once");
    }

    #[test]
    fn test_page_errors_are_absorbed() {
        let locator = FieldLocator::new(Duration::from_millis(5), Duration::from_millis(1));
        let mut page = page(0, 0);
        page.fail_lookups = true;
        assert_eq!(locator.wait_for(&mut page, &target()), None);
    }
}
