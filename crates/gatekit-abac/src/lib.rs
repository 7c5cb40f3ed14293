//! # gatekit-abac
//!
//! The policy decision and retrieval core of the gatekit permission
//! center. Given an authorization request `(system, subject, action,
//! resources)` the engine answers:
//!
//! - **Eval**: a boolean pass/deny decision,
//! - **Query**: a normalized boolean expression over resource attributes
//!   for caller-side pre-filtering,
//! - **QueryByExtResources**: the same, after resolving attributes for
//!   externally-owned resource instances,
//! - **QueryAuthPolicies**: the raw effective policy list.
//!
//! ## Architecture
//!
//! ```text
//!           ┌─────────────┐
//!           │  PolicyEngine (pdp)  │   entrance & pipelines
//!           └──────┬──────┘
//!        ┌─────────┼──────────┐
//!   ┌────▼───┐ ┌───▼────┐ ┌───▼─────┐
//!   │  pip   │ │  prp   │ │ remote  │   enrichment / retrieval / ext attrs
//!   └────┬───┘ └───┬────┘ └─────────┘
//!        │     ┌───▼────┐
//!        └────►│ cache  │  L1 (moka) + L2 (redis), single-flight
//!              └───┬────┘
//!              ┌───▼────┐
//!              │storage │  traits implemented by backends
//!              └────────┘
//! ```
//!
//! Evaluation itself (the [`condition`] algebra, the [`evaluation`] walk,
//! and the [`translate`] output tree) is pure and non-blocking once
//! policies and attributes are in hand.
//!
//! ## Modules
//!
//! - [`pdp`] - The decision entrance ([`PolicyEngine`])
//! - [`condition`] - Typed predicate trees with JSON codec
//! - [`translate`] - Stored expression → public [`ExprCell`] tree
//! - [`evaluation`] - Policy walks over attribute contexts
//! - [`context`] - Attribute resolution for one request+resource pair
//! - [`prp`] - Policy retrieval, effective subjects, invalidation surface
//! - [`pip`] - Request enrichment (subject/action fillers)
//! - [`cache`] - Two-tier policy caches
//! - [`remote`] - Remote resource provider
//! - [`storage`] - Persistence traits the engine consumes
//! - [`debug`] - Per-request decision traces
//!
//! [`PolicyEngine`]: pdp::PolicyEngine
//! [`ExprCell`]: translate::ExprCell

pub mod cache;
pub mod condition;
pub mod config;
pub mod context;
pub mod debug;
pub mod error;
pub mod evaluation;
pub mod pdp;
pub mod pip;
pub mod prp;
pub mod remote;
pub mod request;
pub mod storage;
pub mod translate;
pub mod types;

pub use config::AbacConfig;
pub use debug::DebugEntry;
pub use error::{AbacError, ApiError};
pub use pdp::{expression_to_json, PolicyEngine};
pub use request::Request;
pub use translate::{ExprCell, ExprOp, LogicOp};
pub use types::{
    Action, ActionResourceType, AttrValue, AuthPolicy, ExpressionRecord, ExtResource,
    ExtResourceWithAttribute, Instance, PolicyRecord, Resource, Subject, SubjectDetail,
    SubjectGroup, SubjectKind,
};

/// Type alias for engine results.
pub type AbacResult<T> = Result<T, AbacError>;
