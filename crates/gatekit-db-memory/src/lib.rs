//! # gatekit-db-memory
//!
//! In-memory implementations of the gatekit-abac storage traits, backed by
//! concurrent maps. Used by the engine's integration tests and for local
//! development without a database.
//!
//! ```ignore
//! use gatekit_db_memory::MemoryStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! store.add_subject(SubjectKind::User, "tom", 1);
//! store.add_action("iam", "job:view", 9, vec![ActionResourceType::new("iam", "job")]);
//! ```

mod store;

pub use store::MemoryStore;
