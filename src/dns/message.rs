//! Message assembly and parsing.

use super::{name, TYPE_A, TYPE_AAAA, TYPE_CNAME, TYPE_PTR, TYPE_SRV};
use crate::{Error, Result};
use std::net::{Ipv4Addr, Ipv6Addr};

const FLAG_RD: u16 = 0x0100;

/// Builds a single-question query with recursion desired.
pub(crate) fn build_query(id: u16, qname: &str, qtype: u16, qclass: u16) -> Result<Vec<u8>> {
    let mut msg = Vec::with_capacity(qname.len() + 18);
    msg.extend_from_slice(&id.to_be_bytes());
    msg.extend_from_slice(&FLAG_RD.to_be_bytes());
    msg.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    msg.extend_from_slice(&[0; 6]); // ancount, nscount, arcount
    name::write_name(&mut msg, qname)?;
    msg.extend_from_slice(&qtype.to_be_bytes());
    msg.extend_from_slice(&qclass.to_be_bytes());
    Ok(msg)
}

/// Typed record data of the types the resolver consumes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(String),
    Ptr(String),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Other(u16),
}

#[derive(Clone, Debug)]
pub(crate) struct ResourceRecord {
    pub(crate) name: String,
    pub(crate) ttl: u32,
    pub(crate) data: RData,
}

/// A parsed answer message, questions skipped, answer section decoded.
#[derive(Clone, Debug)]
pub(crate) struct Message {
    pub(crate) id: u16,
    pub(crate) rcode: u8,
    pub(crate) answers: Vec<ResourceRecord>,
}

fn truncated() -> Error {
    Error::BadRequest("truncated DNS message")
}

fn read_u16(msg: &[u8], pos: &mut usize) -> Result<u16> {
    let bytes = msg.get(*pos..*pos + 2).ok_or_else(truncated)?;
    *pos += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(msg: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = msg.get(*pos..*pos + 4).ok_or_else(truncated)?;
    *pos += 4;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn parse_message(msg: &[u8]) -> Result<Message> {
    let mut pos = 0;
    let id = read_u16(msg, &mut pos)?;
    let flags = read_u16(msg, &mut pos)?;
    let qdcount = read_u16(msg, &mut pos)?;
    let ancount = read_u16(msg, &mut pos)?;
    let _nscount = read_u16(msg, &mut pos)?;
    let _arcount = read_u16(msg, &mut pos)?;

    for _ in 0..qdcount {
        name::read_name(msg, &mut pos)?;
        pos += 4;
        if pos > msg.len() {
            return Err(truncated());
        }
    }

    let mut answers = Vec::with_capacity(ancount as usize);
    for _ in 0..ancount {
        let name = name::read_name(msg, &mut pos)?;
        let rtype = read_u16(msg, &mut pos)?;
        let _class = read_u16(msg, &mut pos)?;
        let ttl = read_u32(msg, &mut pos)?;
        let rdlength = read_u16(msg, &mut pos)? as usize;
        let rdata_end = pos + rdlength;
        if rdata_end > msg.len() {
            return Err(truncated());
        }

        let data = match rtype {
            TYPE_A if rdlength == 4 => {
                let b = &msg[pos..rdata_end];
                RData::A(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
            }
            TYPE_AAAA if rdlength == 16 => {
                let mut b = [0u8; 16];
                b.copy_from_slice(&msg[pos..rdata_end]);
                RData::Aaaa(Ipv6Addr::from(b))
            }
            TYPE_CNAME => {
                let mut rpos = pos;
                RData::Cname(name::read_name(msg, &mut rpos)?)
            }
            TYPE_PTR => {
                let mut rpos = pos;
                RData::Ptr(name::read_name(msg, &mut rpos)?)
            }
            TYPE_SRV => {
                let mut rpos = pos;
                let priority = read_u16(msg, &mut rpos)?;
                let weight = read_u16(msg, &mut rpos)?;
                let port = read_u16(msg, &mut rpos)?;
                let target = name::read_name(msg, &mut rpos)?;
                RData::Srv {
                    priority,
                    weight,
                    port,
                    target,
                }
            }
            other => RData::Other(other),
        };

        pos = rdata_end;
        answers.push(ResourceRecord { name, ttl, data });
    }

    Ok(Message {
        id,
        rcode: (flags & 0x000f) as u8,
        answers,
    })
}
