//! A small DNS wire codec: enough of RFC 1035/2782/3596 for the `dns`
//! backend to write queries and read answers.

mod message;
mod name;

pub(crate) use message::{build_query, parse_message, Message, RData, ResourceRecord};
pub(crate) use name::{read_name, write_name};

pub(crate) const CLASS_IN: u16 = 1;

pub(crate) const TYPE_A: u16 = 1;
pub(crate) const TYPE_CNAME: u16 = 5;
pub(crate) const TYPE_PTR: u16 = 12;
pub(crate) const TYPE_AAAA: u16 = 28;
pub(crate) const TYPE_SRV: u16 = 33;

pub(crate) const RCODE_NXDOMAIN: u8 = 3;
