//! `hosts`: resolves against a hosts file, `/etc/hosts` by default. The
//! first settings argument overrides the file path. Works in both
//! directions: names to addresses and addresses back to the first name on
//! the matching line.

use super::{Backend, BackendCtx};
use crate::path::parse_numeric_host;
use std::net::IpAddr;

struct HostEntry {
    address: IpAddr,
    ifindex: u32,
    names: Vec<String>,
}

#[derive(Default)]
pub(super) struct HostsBackend {
    entries: Option<Vec<HostEntry>>,
}

const HOSTS_FILE: &str = "/etc/hosts";

fn parse_hosts(data: &str) -> Vec<HostEntry> {
    let mut entries = Vec::new();
    for line in data.lines() {
        let line = match line.split_once('#') {
            Some((before, _)) => before,
            None => line,
        };
        let mut fields = line.split_whitespace();
        let Some(address) = fields.next() else {
            continue;
        };
        let Some((address, ifindex)) = parse_numeric_host(address) else {
            continue;
        };
        let names: Vec<String> = fields.map(str::to_string).collect();
        if names.is_empty() {
            continue;
        }
        entries.push(HostEntry {
            address,
            ifindex,
            names,
        });
    }
    entries
}

impl HostsBackend {
    fn entries(&mut self, settings: &[String]) -> &[HostEntry] {
        self.entries.get_or_insert_with(|| {
            let path = settings.first().map(String::as_str).unwrap_or(HOSTS_FILE);
            match std::fs::read_to_string(path) {
                Ok(data) => parse_hosts(&data),
                Err(e) => {
                    log::warn!("can't read {}: {}", path, e);
                    Vec::new()
                }
            }
        })
    }
}

impl Backend for HostsBackend {
    fn setup_forward(&mut self, ctx: &mut BackendCtx<'_>, settings: &[String]) {
        let Some(node) = ctx.request().nodename().map(str::to_string) else {
            ctx.fail();
            return;
        };

        let mut matches: Vec<(IpAddr, u32)> = Vec::new();
        let mut canonical: Option<String> = None;
        for entry in self.entries(settings) {
            if !entry.names.iter().any(|name| *name == node) {
                continue;
            }
            if canonical.is_none() {
                canonical = Some(entry.names[0].clone());
            }
            matches.push((entry.address, entry.ifindex));
        }

        if matches.is_empty() {
            ctx.fail();
            return;
        }

        for (address, ifindex) in matches {
            ctx.add_address(address, ifindex, None);
        }
        if let Some(name) = canonical {
            ctx.set_canonical_name(&name);
        }
        ctx.finish();
    }

    fn setup_reverse(&mut self, ctx: &mut BackendCtx<'_>, settings: &[String]) {
        let Some(address) = ctx.request().address() else {
            ctx.fail();
            return;
        };

        let name = self
            .entries(settings)
            .iter()
            .find(|entry| entry.address == address)
            .map(|entry| entry.names[0].clone());

        match name {
            Some(name) => {
                ctx.set_canonical_name(&name);
                ctx.finish();
            }
            None => ctx.fail(),
        }
    }
}
