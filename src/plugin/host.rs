use crate::core::{ObjectId, Selector};
use crossbeam_channel::{unbounded, Receiver, Sender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange {
    pub object: ObjectId,
    pub selectors: Vec<Selector>,
}

/// Callbacks into the host that loaded the plug-in.
pub trait Host: Send + Sync {
    fn properties_changed(&self, object: ObjectId, selectors: &[Selector]);
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl Host for NullHost {
    fn properties_changed(&self, _object: ObjectId, _selectors: &[Selector]) {}
}

/// Forwards notifications over a channel.
#[derive(Debug, Clone)]
pub struct ChannelHost {
    tx: Sender<PropertyChange>,
}

impl ChannelHost {
    pub fn new() -> (Self, Receiver<PropertyChange>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl Host for ChannelHost {
    fn properties_changed(&self, object: ObjectId, selectors: &[Selector]) {
        let change = PropertyChange {
            object,
            selectors: selectors.to_vec(),
        };
        if self.tx.send(change).is_err() {
            tracing::trace!(object = %object, "host notification receiver is gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_host_forwards_changes() {
        let (host, rx) = ChannelHost::new();
        host.properties_changed(ObjectId::PLUGIN, &[Selector::DEVICE_LIST]);

        let change = rx.try_recv().unwrap();
        assert_eq!(change.object, ObjectId::PLUGIN);
        assert_eq!(change.selectors, vec![Selector::DEVICE_LIST]);
    }

    #[test]
    fn test_channel_host_survives_dropped_receiver() {
        let (host, rx) = ChannelHost::new();
        drop(rx);
        host.properties_changed(ObjectId::new(32), &[Selector::NAME]);
    }
}
