//! # Relato
//!
//! A report engine over a CRM-style upstream API: a registry of report
//! definitions, each validating caller filters, fetching paginated order
//! data, shaping it in memory and caching the finished result.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │             Engine (registry, run/export/list)           │
//! │        validation ▸ filter normalization ▸ meta          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [report spec]
//! ┌─────────────────────────────────────────────────────────┐
//! │     ReportSpec (class-like structs, closure variants)    │
//! │          cache signature + remember() wrapping           │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [harvester / client]
//! ┌─────────────────────────────────────────────────────────┐
//! │       CrmClient (blocking HTTP, {data, meta, links})     │
//! │       Harvester (follows links.next, hard page cap)      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [pipeline]
//! ┌─────────────────────────────────────────────────────────┐
//! │    Pipeline (filter/map/group/sort/paginate) + rules     │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod filters;
pub mod harvest;
pub mod pipeline;
pub mod report;
pub mod reports;
pub mod rules;

pub use engine::{Engine, Export};
pub use error::{EngineError, EngineResult};
pub use filters::FilterSet;
pub use report::{ClosureReport, Meta, ReportContext, ReportResult, ReportSpec, ReportSummary};
