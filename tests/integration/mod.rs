//! Integration tests for storetree

mod closure_properties;
mod index_lifecycle;
mod operations_flow;
mod queue_lifecycle;
mod secure_tree;
