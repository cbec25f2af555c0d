//! buildpkg-lib: the package build script execution engine.
//!
//! A package definition (`buildpkg.lua`) is loaded into a restricted Lua state
//! that can only reach the outside world through a fixed set of host functions.
//! The engine then drives the definition's lifecycle hooks
//! (`SOURCES → VERSION → PREPARE → BUILD → PACKAGE`) once per target
//! architecture and returns a [`build::PackageRecord`] describing the staged
//! package tree.
//!
//! - [`definition`]: validated `INFO` metadata and definition sources
//! - [`sandbox`]: the Lua sandbox that loads definitions and invokes hooks
//! - [`host`]: the host API bound into the sandbox
//! - [`fetch`], [`verify`], [`unpack`], [`stage`]: the components behind the host API
//! - [`build`]: the orchestrator, worker pool and package records

pub mod arch;
pub mod build;
pub mod consts;
pub mod definition;
pub mod error;
pub mod fetch;
pub mod host;
pub mod interrupt;
pub mod paths;
pub mod sandbox;
pub mod stage;
pub mod unpack;
pub mod util;
pub mod verify;
