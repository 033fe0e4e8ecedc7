pub mod channel;
pub mod memory;

pub use channel::{
    decode, read_json, write_json, ChangeNotification, ChangeSink, SharedChannel, SubscriptionId,
};
pub use memory::{MemoryChannel, MemoryChannelClient};
