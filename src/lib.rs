//! Osprey: a points-to analysis library.
//!
//! Osprey computes, for every pointer-valued node of a *pointer subgraph*,
//! the set of abstract memory locations the pointer may denote. A front-end
//! translates a program into subgraph nodes (allocation sites, loads,
//! stores, offset adjustments, control-flow merges, calls through function
//! pointers) wired along the program's control flow; the solver then
//! propagates points-to information over the graph to a fixpoint. The
//! solution feeds clients such as program slicing and dead-code detection.
//!
//! A quick synopsis of Osprey's modules:
//!
//! * **memory** - Abstract memory objects consulted by dereferencing
//!   transfers, keyed by byte offset.
//! * **pointer** - Pointers, byte offsets with an unknown sentinel, and the
//!   canonicalizing points-to set lattice.
//! * **solver** - The worklist fixpoint solver, its analysis-policy trait,
//!   and a flow-insensitive policy implementation.
//! * **subgraph** - The arena of pointer-subgraph nodes, per-kind node
//!   factories, and structural editing operations.
//!
//! ```
//! use osprey::solver::{FlowInsensitiveAnalysis, PointerAnalysis};
//! use osprey::subgraph::Subgraph;
//!
//! # fn example() -> Result<(), osprey::Error> {
//! let mut subgraph = Subgraph::new();
//! let root = subgraph.entry();
//! let a = subgraph.alloc();
//! let b = subgraph.alloc();
//! let p = subgraph.phi(&[a, b]);
//! subgraph.add_edge(root, a)?;
//! subgraph.add_edge(a, b)?;
//! subgraph.add_edge(b, p)?;
//!
//! let mut analysis = PointerAnalysis::new(root, FlowInsensitiveAnalysis::new());
//! analysis.run(&mut subgraph)?;
//!
//! assert_eq!(subgraph.points_to(p)?.len(), 2);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod error;
pub mod memory;
pub mod pointer;
pub mod solver;
pub mod subgraph;

pub use crate::error::Error;
