mod store;

pub use store::client::*;
pub use store::document;
pub use store::memory::{MemoryStatusStore, StoreOperation, StoreOperationKind};
pub use store::mqtt::{
    DEFAULT_ROOT_TOPIC, MqttStatusStore, MqttStoreOptions, MqttStoreOptionsBuilder,
};
pub use store::status::*;
