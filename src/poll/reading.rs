use crate::dexcom::Reading;
use tokio::sync::watch;

/// The most recently published reading, wrapped in a
/// [`tokio::sync::watch`] Receiver.
///
/// Updated by the [`Poller`] whenever a tick fetches a reading. Cloning is
/// cheap, and every clone observes the same updates.
///
/// [`Poller`]: crate::poll::Poller
#[derive(Debug, Clone)]
pub struct SharedReading(watch::Receiver<Option<Reading>>);

impl From<watch::Receiver<Option<Reading>>> for SharedReading {
    fn from(inner: watch::Receiver<Option<Reading>>) -> Self {
        Self(inner)
    }
}

impl SharedReading {
    /// The latest reading, if one has been published yet.
    pub fn get(&self) -> Option<Reading> {
        *self.0.borrow()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;

    #[test]
    fn observes_updates() {
        let (tx, rx) = watch::channel(None);
        let shared = SharedReading::from(rx);
        assert_eq!(shared.get(), None);

        let reading = Reading {
            value: 100,
            timestamp: Utc::now(),
        };
        tx.send_replace(Some(reading));

        assert_eq!(shared.get(), Some(reading));
        assert_eq!(shared.clone().get(), Some(reading));
    }
}
