//! [`FlowsService`](crate::traits::FlowsService) implementations.

pub mod http;
pub mod in_memory;

pub use http::{HttpFlowsService, HttpServiceConfig};
pub use in_memory::InMemoryFlowsService;
