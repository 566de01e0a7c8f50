//! Integration tests: the full flywheel against paper collaborators.

mod harness;
mod pipeline;
