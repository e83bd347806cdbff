pub mod hash_id;
pub mod peer_id;
pub mod spawn_utils;

pub use hash_id::Id20;
