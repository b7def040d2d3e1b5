//! Policy state shared by the validation loops
//!
//! ```text
//! Authority ──GetConstraints──► PolicySynchronizer ──replace──► PolicyCache
//!                                                                   │
//!                                   ProcessValidator ◄──snapshot────┤
//!                             FileIntegrityValidator ◄──snapshot────┘
//! ```

pub mod cache;
pub mod sync;

pub use cache::{PolicyCache, PolicySnapshot};
pub use sync::PolicySynchronizer;
