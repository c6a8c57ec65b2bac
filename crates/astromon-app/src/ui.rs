//! Page model and UI collaborator seams.
//!
//! The renderer is an external collaborator; the scheduler only needs the
//! handful of signals modeled by [`UiLink`]. Pages are ordered
//! `Summary, Nina(0..n), SysInfo` and addressed by that index in the
//! auto-rotate bitmask.

use astromon_core::telemetry::InstanceState;

/// One display page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    /// All-instances overview.
    Summary,
    /// Live detail page of one instance.
    Nina(usize),
    /// Device diagnostics (WiFi, uptime, firmware).
    SysInfo,
}

impl Page {
    /// Total page count for `instance_count` configured instances.
    pub fn total(instance_count: usize) -> usize {
        instance_count + 2
    }

    /// Position in the page order.
    pub fn index(&self, instance_count: usize) -> usize {
        match *self {
            Page::Summary => 0,
            Page::Nina(i) => 1 + i.min(instance_count.saturating_sub(1)),
            Page::SysInfo => instance_count + 1,
        }
    }

    /// Page at `index`, wrapping modulo the page count.
    pub fn from_index(index: usize, instance_count: usize) -> Page {
        match index % Self::total(instance_count) {
            0 => Page::Summary,
            i if i <= instance_count => Page::Nina(i - 1),
            _ => Page::SysInfo,
        }
    }

    /// The page after this one (button advance).
    pub fn next(&self, instance_count: usize) -> Page {
        Page::from_index(self.index(instance_count) + 1, instance_count)
    }

    /// Whether this page's bit is set in the auto-rotate mask.
    pub fn in_mask(&self, mask: u8, instance_count: usize) -> bool {
        let index = self.index(instance_count);
        index < 8 && mask & (1 << index) != 0
    }
}

/// Pick the auto-rotate destination after `current`.
///
/// Walks the page ring once, returning the first page whose mask bit is set,
/// skipping disconnected instance pages when `skip_disconnected` is on.
/// Returns `None` when no eligible page exists (including "only the current
/// page is eligible").
pub fn next_rotation_page(
    current: Page,
    instance_count: usize,
    mask: u8,
    skip_disconnected: bool,
    connected: &[bool],
) -> Option<Page> {
    let total = Page::total(instance_count);
    let start = current.index(instance_count);

    for step in 1..total {
        let candidate = Page::from_index(start + step, instance_count);
        if !candidate.in_mask(mask, instance_count) {
            continue;
        }
        if skip_disconnected {
            if let Page::Nina(i) = candidate {
                if !connected.get(i).copied().unwrap_or(false) {
                    continue;
                }
            }
        }
        return Some(candidate);
    }
    None
}

/// Signals exchanged with the renderer.
///
/// Repaint calls happen while the scheduler holds the per-instance read
/// locks, so implementations must not block.
pub trait UiLink: Send + Sync {
    /// The page currently shown.
    fn active_page(&self) -> Page;

    /// Consume the "page changed" edge (true at most once per change).
    fn take_page_changed(&self) -> bool;

    /// Ask the renderer to animate to `page`.
    fn animate_to(&self, page: Page);

    /// Repaint the summary page from a consistent snapshot of every
    /// instance.
    fn repaint_summary(&self, states: &[&InstanceState]);

    /// Repaint one instance detail page.
    fn repaint_instance(&self, instance: usize, state: &InstanceState);

    /// The thumbnail overlay is currently visible.
    fn thumbnail_visible(&self) -> bool;

    /// Consume an explicit thumbnail request.
    fn take_thumbnail_request(&self) -> bool;

    /// Hand a fetched JPEG to the decode-and-show collaborator.
    fn show_thumbnail(&self, instance: usize, jpeg: Vec<u8>);
}

/// Radio collaborator: one signal read per scheduler cycle.
pub trait WifiLink: Send + Sync {
    /// RSSI in dBm, `None` while unassociated.
    fn signal_strength(&self) -> Option<i8>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_order_and_total() {
        assert_eq!(Page::total(1), 3);
        assert_eq!(Page::total(3), 5);

        assert_eq!(Page::Summary.index(2), 0);
        assert_eq!(Page::Nina(0).index(2), 1);
        assert_eq!(Page::Nina(1).index(2), 2);
        assert_eq!(Page::SysInfo.index(2), 3);
    }

    #[test]
    fn test_from_index_round_trip() {
        for count in 1..=3 {
            for index in 0..Page::total(count) {
                let page = Page::from_index(index, count);
                assert_eq!(page.index(count), index, "count={count} index={index}");
            }
        }
    }

    #[test]
    fn test_next_wraps_around() {
        assert_eq!(Page::Summary.next(1), Page::Nina(0));
        assert_eq!(Page::Nina(0).next(1), Page::SysInfo);
        assert_eq!(Page::SysInfo.next(1), Page::Summary);
    }

    #[test]
    fn test_in_mask() {
        // Mask with Summary (bit 0) and Nina(1) (bit 2) for two instances.
        let mask = 0b0000_0101;
        assert!(Page::Summary.in_mask(mask, 2));
        assert!(!Page::Nina(0).in_mask(mask, 2));
        assert!(Page::Nina(1).in_mask(mask, 2));
        assert!(!Page::SysInfo.in_mask(mask, 2));
    }

    #[test]
    fn test_rotation_picks_next_masked_page() {
        let connected = [true, true];
        let page = next_rotation_page(Page::Summary, 2, 0xFF, false, &connected);
        assert_eq!(page, Some(Page::Nina(0)));

        let page = next_rotation_page(Page::SysInfo, 2, 0xFF, false, &connected);
        assert_eq!(page, Some(Page::Summary));
    }

    #[test]
    fn test_rotation_skips_unmasked_pages() {
        // Only Summary and SysInfo rotate.
        let mask = 0b0000_1001;
        let connected = [true, true];
        let page = next_rotation_page(Page::Summary, 2, mask, false, &connected);
        assert_eq!(page, Some(Page::SysInfo));
    }

    #[test]
    fn test_rotation_skips_disconnected_instances() {
        let connected = [false, true];
        let page = next_rotation_page(Page::Summary, 2, 0xFF, true, &connected);
        assert_eq!(page, Some(Page::Nina(1)));

        // With skipping off the disconnected page is still eligible.
        let page = next_rotation_page(Page::Summary, 2, 0xFF, false, &connected);
        assert_eq!(page, Some(Page::Nina(0)));
    }

    #[test]
    fn test_rotation_none_when_nothing_eligible() {
        let connected = [false];
        // Mask allows only the instance page, which is disconnected.
        let mask = 0b0000_0010;
        assert_eq!(next_rotation_page(Page::Summary, 1, mask, true, &connected), None);
        // Empty mask rotates nowhere.
        assert_eq!(next_rotation_page(Page::Summary, 1, 0, false, &[true]), None);
    }
}
