//! Chrono Core
//!
//! This crate provides a versioned, incremental computation graph.
//! It implements:
//!
//! - Immutable node versions with time-travel reads
//! - Stable references and observable value cells
//! - Calculation nodes over keyed or positional inputs
//! - Transactional propagation passes with effect suspension
//! - Entities: groups of fields propagated together through a replica
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `chrono`: Node primitives (atoms, versions, references, mutations, effects)
//! - `graph`: The node arena, scheduling and propagation passes
//! - `replica`: Entity bookkeeping on top of a graph
//! - `config`: Propagation tunables
//! - `error`: The crate-wide error type
//!
//! # Example
//!
//! ```rust
//! use chrono_core::chrono::{Atom, Mutation};
//! use chrono_core::graph::ChronoGraph;
//! use serde_json::json;
//!
//! let mut graph = ChronoGraph::new();
//! let root = graph.root();
//!
//! // Two inputs and an output
//! let a = graph.create_atom(Atom::observable());
//! let b = graph.create_atom(Atom::observable());
//! let sum = graph.create_atom(Atom::observable());
//!
//! // A calculation over named inputs
//! let add = graph
//!     .create_mutation(Mutation::keyed([("a", a), ("b", b)], [sum], |inputs| {
//!         let total = inputs["a"].as_i64().unwrap_or(0) + inputs["b"].as_i64().unwrap_or(0);
//!         Ok(json!(total).into())
//!     }))
//!     .unwrap();
//! graph.add_nodes(root, &[a, b, sum, add]).unwrap();
//!
//! // Write, then propagate
//! graph.write(a, json!(2)).unwrap();
//! graph.write(b, json!(3)).unwrap();
//! graph.propagate().unwrap();
//! assert_eq!(graph.get(sum), Some(&json!(5)));
//! ```

pub mod chrono;
pub mod config;
pub mod error;
pub mod graph;
pub mod replica;

pub use config::{CycleCheck, PropagationConfig};
pub use error::{ChronoError, ChronoResult};
