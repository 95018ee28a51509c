// ABOUTME: Reference provider adapters implementing the contract over backend REST APIs
// ABOUTME: Backend vocabulary (states, endpoints, auth) stays inside each adapter

pub mod daytona;
pub mod e2b;

pub use daytona::DaytonaProvider;
pub use e2b::E2bProvider;
