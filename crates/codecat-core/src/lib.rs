//! # Core scanning pipeline
//!
//! Everything between "here is a platform target" and "here is an
//! `intermediate_<platform>_<target>.json` file": platform adapters,
//! the classification cascade, the organization resolver, the labor
//! estimator, the finalizer, the per-target orchestrator, and the merge
//! phase that unions per-target intermediates into the final catalog.
//!
//! Modules are layered leaves-first, matching the components table in
//! the system overview: [`ratelimit`] and [`fetch`] and [`cache`] are
//! leaves; [`classify`], [`ai`], [`org`], and [`labor`] build on them;
//! [`platform`] implements the per-platform adapter contract against all
//! of the above; [`finalize`] closes out a single record; [`orchestrate`]
//! and [`merge`] drive the whole pipeline end to end.

pub mod ai;
pub mod cache;
pub mod classify;
pub mod fetch;
pub mod finalize;
pub mod labor;
pub mod merge;
pub mod org;
pub mod orchestrate;
pub mod platform;
pub mod ratelimit;

pub use platform::{EnumerationFilters, EnumerationResult, PlatformAdapter, RepoMeta};
