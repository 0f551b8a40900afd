pub mod element;
pub mod edge;
pub mod error;
pub mod hasher;
pub mod feed;
pub mod resolver;
pub mod graph;
pub mod snapshot;
pub mod history;
pub mod change;
pub mod selector;
pub mod ports;
