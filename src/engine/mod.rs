// Engine orchestration — asset-root ownership, the update pipeline and the host façade.

pub mod archive;
pub mod asset_root;
pub mod coordinator;
pub mod host;
pub mod stats;
pub mod updater;
