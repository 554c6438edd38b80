//! Line-oriented operator console, read from stdin. Strategies are
//! attached and detached, firewall rules edited, and switch flow tables
//! flushed from here while the controller runs.

use std::io::{self, BufRead};
use std::process;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::firewall::{RuleKey, TpPort};
use crate::lab::SwitchLab;
use crate::ofp_controller::{MessageSink, SwitchRegistry};
use crate::openflow0x01::message::{delete_all_flows, Message};
use crate::openflow0x01::{dpid_str, DatapathId};
use crate::packet::{ETH_TYPE_IP, IP_PROTO_ICMP, IP_PROTO_TCP, IP_PROTO_UDP};
use crate::strategy::Strategy;

const FW_USAGE: &str = "usage: fw add|del <switch> <proto> <in-port> <tp-src|any> [deny]";

#[derive(Debug)]
enum Outcome {
    Done,
    Quit,
}

/// Read commands until stdin closes or the operator quits. `quit` stops
/// the whole controller; end of input only stops the console.
pub fn run(lab: Arc<SwitchLab>, registry: Arc<SwitchRegistry>) {
    println!("switchlab console; type `help` for commands");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        match dispatch(&lab, &registry, &line) {
            Ok(Outcome::Done) => (),
            Ok(Outcome::Quit) => {
                info!("console quit; stopping controller");
                process::exit(0);
            }
            Err(err) => println!("error: {}", err),
        }
    }
    debug!("console input closed");
}

fn dispatch(lab: &SwitchLab, registry: &SwitchRegistry, line: &str) -> Result<Outcome> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [] => (),
        ["help"] => print_help(),
        ["strategies"] => print_strategies(lab),
        ["attach", name] => {
            let strategy: Strategy = name.parse()?;
            match lab.attach(strategy) {
                Some(old) if old != strategy => {
                    println!("attached {} (replaced {})", strategy, old)
                }
                Some(_) => println!("{} is already attached", strategy),
                None => println!("attached {}", strategy),
            }
        }
        ["detach"] => match lab.detach() {
            Some(old) => println!("detached {}; packets are dropped until the next attach", old),
            None => println!("no strategy attached"),
        },
        ["switches"] => {
            let dpids = registry.dpids();
            if dpids.is_empty() {
                println!("no switches connected");
            }
            for sw in dpids {
                println!("{}", dpid_str(sw));
            }
        }
        ["fw", "add", args @ ..] => fw_add(lab, args)?,
        ["fw", "del", args @ ..] => fw_del(lab, args)?,
        ["fw", "list"] => print_rules(lab),
        ["flush", target] => flush(registry, target)?,
        ["quit"] | ["exit"] => return Ok(Outcome::Quit),
        _ => return Err(Error::BadCommand(line.trim().to_string())),
    }
    Ok(Outcome::Done)
}

fn print_help() {
    println!("  strategies                  list forwarding strategies");
    println!("  attach <strategy>           make a strategy active");
    println!("  detach                      drop packets until the next attach");
    println!("  switches                    list connected switches");
    println!("  fw add <switch> <proto> <in-port> <tp-src|any> [deny]");
    println!("  fw del <switch> <proto> <in-port> <tp-src|any>");
    println!("  fw list                     list firewall rules");
    println!("  flush <switch|all>          delete every flow on a switch");
    println!("  quit                        stop the controller");
}

fn print_strategies(lab: &SwitchLab) {
    let active = lab.active_strategy();
    for strategy in lab.strategies() {
        let marker = if active == Some(*strategy) { '*' } else { ' ' };
        println!("{} {:<18} {}", marker, strategy.name(), strategy.describe());
    }
    if active.is_none() {
        println!("(no strategy attached)");
    }
}

fn print_rules(lab: &SwitchLab) {
    if !lab.firewall_enabled() {
        println!("firewall is disabled; rules are kept but not enforced");
    }
    let rules = lab.firewall_rules();
    if rules.is_empty() {
        println!("no rules; ip traffic is denied by default");
    }
    for (key, allow) in rules {
        println!("{} {}", if allow { "allow" } else { "deny " }, key);
    }
}

fn fw_add(lab: &SwitchLab, args: &[&str]) -> Result<()> {
    let (key_args, allow) = match args {
        [head @ .., "deny"] => (head, false),
        [head @ .., "allow"] => (head, true),
        _ => (args, true),
    };
    let key = parse_rule_key(key_args)?;
    lab.add_firewall_rule(key, allow);
    println!("added {} rule {}", if allow { "allow" } else { "deny" }, key);
    Ok(())
}

fn fw_del(lab: &SwitchLab, args: &[&str]) -> Result<()> {
    let key = parse_rule_key(args)?;
    lab.remove_firewall_rule(&key)?;
    println!("removed rule {}", key);
    Ok(())
}

fn flush(registry: &SwitchRegistry, target: &str) -> Result<()> {
    if target == "all" {
        let sinks = registry.sinks();
        if sinks.is_empty() {
            println!("no switches connected");
        }
        for (sw, mut sink) in sinks {
            sink.send(0, Message::FlowMod(delete_all_flows()))?;
            println!("flushed flows on {}", dpid_str(sw));
        }
    } else {
        let sw = parse_dpid(target)?;
        let mut sink = registry.sink(sw)
                               .ok_or_else(|| Error::SwitchNotConnected(dpid_str(sw)))?;
        sink.send(0, Message::FlowMod(delete_all_flows()))?;
        println!("flushed flows on {}", dpid_str(sw));
    }
    Ok(())
}

/// The firewall key, as positional words: switch, ip protocol, ingress
/// port, transport source port. The console only edits ipv4 rules.
fn parse_rule_key(args: &[&str]) -> Result<RuleKey> {
    match args {
        [switch, proto, in_port, tp_src] => Ok(RuleKey {
            dpid: parse_dpid(switch)?,
            dl_typ: ETH_TYPE_IP,
            nw_proto: parse_proto(proto)?,
            in_port: parse_num(in_port, "port")?,
            tp_src: parse_tp_port(tp_src)?,
        }),
        _ => Err(Error::BadCommand(FW_USAGE.to_string())),
    }
}

/// Datapath ids come in three spellings: decimal, `0x` hex, and the dashed
/// hex form the controller logs them in.
fn parse_dpid(word: &str) -> Result<DatapathId> {
    if let Some(hex) = word.strip_prefix("0x") {
        return u64::from_str_radix(hex, 16)
            .map_err(|_| Error::BadCommand(format!("bad switch id {}", word)));
    }
    if word.contains('-') {
        let digits: String = word.split('-').collect();
        return u64::from_str_radix(&digits, 16)
            .map_err(|_| Error::BadCommand(format!("bad switch id {}", word)));
    }
    word.parse()
        .map_err(|_| Error::BadCommand(format!("bad switch id {}", word)))
}

fn parse_proto(word: &str) -> Result<u8> {
    match word {
        "icmp" => Ok(IP_PROTO_ICMP),
        "tcp" => Ok(IP_PROTO_TCP),
        "udp" => Ok(IP_PROTO_UDP),
        other => parse_num(other, "protocol"),
    }
}

fn parse_tp_port(word: &str) -> Result<TpPort> {
    if word == "any" {
        Ok(TpPort::Any)
    } else {
        parse_num(word, "port").map(TpPort::Port)
    }
}

fn parse_num<T: std::str::FromStr>(word: &str, what: &str) -> Result<T> {
    word.parse()
        .map_err(|_| Error::BadCommand(format!("bad {} {}", what, word)))
}
