//! Bridging logic between HTTP requests and the broker
//!
//! - `naming` - topic → storage unit / cursor names
//! - `provision` - idempotent creation of broker resources
//! - `publish` - publish with create-and-retry-once
//! - `fetch` - bounded single-message pull with ack before return
//! - `codec` - payload encoding and decoding

pub mod codec;
pub mod error;
pub mod fetch;
pub mod naming;
pub mod provision;
pub mod publish;

#[cfg(test)]
pub(crate) mod testing;

pub use codec::{DecodedPayload, Payload, PayloadEncoding};
pub use error::BridgeError;
pub use fetch::FetchBridge;
pub use provision::{CursorTemplate, Provisioned, ProvisioningCoordinator, StorageUnitTemplate};
pub use publish::{PublishBridge, Published};
