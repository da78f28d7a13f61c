//! Built-in entity graphs.
//!
//! A configuration without an `entities` section migrates the graph of the
//! tracker named by [`mantis`]. Custom graphs are declared in YAML with the
//! same types.

pub mod mantis;
