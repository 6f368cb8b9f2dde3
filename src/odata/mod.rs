//! OData module
//!
//! Request assembly and the HTTP client for the D365 Web API

pub mod client;
pub mod request;

pub use client::{ODataClient, ODataError, ProtocolError};
pub use request::{ODataRequest, RequestBuilder};
