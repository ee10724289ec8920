#![warn(rust_2018_idioms)]
#![allow(dead_code)]

#[cfg(feature = "marshal")]
pub mod marshal;

pub mod error;
pub(crate) mod transport;
pub mod util;

pub use transport::{TransportContext, TransportMessage, TransportProtocol};
