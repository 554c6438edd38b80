//! OpenFlow 0x01 switching laboratory.
//!
//! A small controller that speaks OpenFlow 1.0 to any number of switches
//! and forwards their packets through one of six interchangeable
//! strategies, from a dumb repeating hub up to an ideal pair-learning
//! switch. An optional inbound firewall vets packets per switch port
//! before any forwarding decision is made, and an operator console can
//! swap strategies, edit firewall rules, and flush installed flows at
//! runtime.

mod bits;

pub mod console;
pub mod error;
pub mod firewall;
pub mod lab;
pub mod ofp_controller;
pub mod ofp_header;
pub mod ofp_message;
pub mod openflow0x01;
pub mod packet;
pub mod selector;
pub mod strategy;
pub mod table;
