#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod compound_packet;
pub mod extended_report;
pub mod goodbye;
pub mod header;
pub mod packet;
pub mod payload_feedbacks;
pub mod raw_packet;
pub mod receiver_report;
pub mod reception_report;
pub mod sender_report;
pub mod transport_feedbacks;
mod util;
