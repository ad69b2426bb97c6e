#![allow(dead_code)]

pub mod oai;
pub mod socket_guard;
