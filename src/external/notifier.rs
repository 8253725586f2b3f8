use async_channel::{Receiver, Sender, TrySendError};

use super::{Notifier, OfferNotice};
use crate::error::{delivery_error, Error};

/// Hands notices to whatever consumes the receiving end (a push gateway, the
/// simulation's driver agents, a test).
#[derive(Clone, Debug)]
pub struct ChannelNotifier {
    tx: Sender<OfferNotice>,
}

impl ChannelNotifier {
    pub fn new(tx: Sender<OfferNotice>) -> Self {
        Self { tx }
    }

    pub fn unbounded() -> (Self, Receiver<OfferNotice>) {
        let (tx, rx) = async_channel::unbounded();
        (Self::new(tx), rx)
    }

    pub fn bounded(capacity: usize) -> (Self, Receiver<OfferNotice>) {
        let (tx, rx) = async_channel::bounded(capacity);
        (Self::new(tx), rx)
    }
}

impl Notifier for ChannelNotifier {
    fn send_offer(&self, notice: OfferNotice) -> Result<(), Error> {
        match self.tx.try_send(notice) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(notice)) => Err(delivery_error(format!(
                "notification queue full, dropping notice for driver {}",
                notice.driver_id
            ))),
            Err(TrySendError::Closed(notice)) => Err(delivery_error(format!(
                "notification queue closed, dropping notice for driver {}",
                notice.driver_id
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn send_offer(&self, notice: OfferNotice) -> Result<(), Error> {
        tracing::info!(
            driver_id = %notice.driver_id,
            ride_id = %notice.ride_id,
            eta_minutes = notice.eta_minutes,
            kind = ?notice.kind,
            "notifying driver"
        );

        Ok(())
    }
}
