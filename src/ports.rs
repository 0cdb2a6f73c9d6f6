//! # Loopback port leasing for playout channels.
//!
//! A [`PortPool`] owns a single inclusive `[low, high]` range of TCP ports.
//! [`PortPool::lease`] hands out the lowest free port; [`PortPool::release`]
//! returns a port to the pool. The registry leases a port per playout input
//! when a config is accepted and releases it when the task is removed or
//! re-resolved.

use std::sync::Mutex;

use crate::error::Error;

/// Inclusive port range with lowest-free-first leasing.
pub struct PortPool {
    low: u16,
    in_use: Mutex<Vec<bool>>,
}

impl PortPool {
    /// Creates a pool covering `[low, high]`.
    pub fn new(low: u16, high: u16) -> Result<Self, Error> {
        if low == 0 || high < low {
            return Err(Error::invalid_config(format!(
                "invalid port range [{low}, {high}]"
            )));
        }

        Ok(Self {
            low,
            in_use: Mutex::new(vec![false; (high - low) as usize + 1]),
        })
    }

    /// Leases the lowest free port, or `None` when the range is exhausted.
    pub fn lease(&self) -> Option<u16> {
        let mut in_use = self.in_use.lock().ok()?;
        for (i, used) in in_use.iter_mut().enumerate() {
            if !*used {
                *used = true;
                return Some(self.low + i as u16);
            }
        }
        None
    }

    /// Returns a leased port to the pool.
    ///
    /// Ports outside the range are ignored.
    pub fn release(&self, port: u16) {
        if port < self.low {
            return;
        }
        if let Ok(mut in_use) = self.in_use.lock() {
            if let Some(slot) = in_use.get_mut((port - self.low) as usize) {
                *slot = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PortPool;

    #[test]
    fn leases_lowest_free_first() {
        let pool = PortPool::new(3000, 3001).unwrap();
        assert_eq!(pool.lease(), Some(3000));
        assert_eq!(pool.lease(), Some(3001));
        assert_eq!(pool.lease(), None);

        pool.release(3000);
        assert_eq!(pool.lease(), Some(3000));
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(PortPool::new(3001, 3000).is_err());
        assert!(PortPool::new(0, 10).is_err());
    }

    #[test]
    fn release_outside_range_is_ignored() {
        let pool = PortPool::new(3000, 3000).unwrap();
        pool.release(2999);
        pool.release(4000);
        assert_eq!(pool.lease(), Some(3000));
        assert_eq!(pool.lease(), None);
    }
}
