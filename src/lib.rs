//! Observable persistent key-value store.
//!
//! `ObservableStore` is the single gateway to a durable key-value medium. It
//! persists JSON values and notifies per-key listeners on every change, both
//! changes made through it and changes made by other contexts (in-process
//! handles or peer processes) that share the same medium.

pub mod error;
pub mod storesync;
pub mod tlv;

pub use error::{ErrorCode, Result, StoreError};
pub use storesync::binding::KeyBinding;
pub use storesync::medium::{BackingMedium, FileMedium, MemoryMedium, RelayedMedium};
pub use storesync::store::{ObservableStore, Subscription};
pub use storesync::types::ChangeEvent;
