//! Dependency cache layer
//!
//! Stores compiled dependency trees keyed by manifest fingerprint and
//! compile settings key. Entries are immutable once published; a changed
//! manifest means a different fingerprint and therefore a different entry.
//!
//! # Entry States
//!
//! | State | On disk | Description |
//! |-------|---------|-------------|
//! | Miss | nothing | Never built, or removed |
//! | Building | `staging/<fp>-*` | In progress or interrupted; lookups miss |
//! | Complete | `entries/<fp>/<key>` | Published, reused by the artifact pass |

pub mod entry;
pub mod lock;
pub mod store;

pub use entry::{CacheEntry, CacheState, ENTRY_FILE, TARGET_DIR};
pub use lock::{EntryLock, LockMode};
pub use store::{DependencyCache, GcReport, Population};
