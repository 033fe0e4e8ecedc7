pub mod file;
pub mod slot;
pub mod store;

pub use file::FileStore;
pub use slot::{TabSlotStore, WindowNameStore};
pub use store::{PeerStateStore, PrioritizedStore};
