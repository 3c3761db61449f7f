//! Discover nearby devices, enumerate their object-push endpoints and push
//! a small object to one of them.

pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod presentation;
