pub mod models;
pub mod network;
pub mod value;

pub use models::*;
pub use network::Network;
pub use value::DecodedValue;
