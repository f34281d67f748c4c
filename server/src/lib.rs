//! File-transfer server: a single-socket dispatcher that demultiplexes
//! datagrams to per-peer session workers.

mod dispatch;
mod session;

pub use dispatch::Server;
