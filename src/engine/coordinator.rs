// Single owner of the asset root: updates, deletes and serving take turns through a lease.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::asset_root::AssetRoot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Updating,
    Deleting,
    Serving,
}

impl Activity {
    pub fn label(self) -> &'static str {
        match self {
            Activity::Updating => "update in progress",
            Activity::Deleting => "delete in progress",
            Activity::Serving => "local server running",
        }
    }
}

pub struct AssetCoordinator {
    root: AssetRoot,
    active: Mutex<Option<Activity>>,
    released: Notify,
}

impl AssetCoordinator {
    pub fn new(root: AssetRoot) -> Arc<Self> {
        Arc::new(Self {
            root,
            active: Mutex::new(None),
            released: Notify::new(),
        })
    }

    pub fn root(&self) -> &AssetRoot {
        &self.root
    }

    /// The activity currently holding the root, if any.
    pub fn current(&self) -> Option<Activity> {
        *self.active.lock()
    }

    /// Take exclusive use of the asset root. On conflict, returns the activity
    /// that currently holds it.
    pub fn try_acquire(self: &Arc<Self>, activity: Activity) -> Result<AssetLease, Activity> {
        let mut active = self.active.lock();
        if let Some(held) = *active {
            debug!("asset root busy: want={:?} held={:?}", activity, held);
            return Err(held);
        }
        *active = Some(activity);
        debug!("asset root acquired for {:?}", activity);
        Ok(AssetLease {
            coordinator: Arc::clone(self),
            activity,
        })
    }

    /// Wait until no activity holds the root.
    pub async fn wait_idle(&self) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // Register before checking so a release in between is not missed.
            released.as_mut().enable();
            if self.current().is_none() {
                return;
            }
            released.await;
        }
    }
}

/// Exclusive right to touch the asset root. Released on drop.
pub struct AssetLease {
    coordinator: Arc<AssetCoordinator>,
    activity: Activity,
}

impl AssetLease {
    pub fn root(&self) -> &AssetRoot {
        &self.coordinator.root
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }
}

impl Drop for AssetLease {
    fn drop(&mut self) {
        *self.coordinator.active.lock() = None;
        self.coordinator.released.notify_waiters();
        debug!("asset root released from {:?}", self.activity);
    }
}
