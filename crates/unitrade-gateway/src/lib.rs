pub mod bus;
pub mod connection;
pub mod dispatcher;

pub use bus::{Author, BusError, ConversationBus, Delivered, EphemeralRooms, PersistedChats};
pub use connection::{GatewayContext, handle_connection};
pub use dispatcher::Dispatcher;
