pub mod executor;
pub mod job;
pub mod pipeline;
pub mod slack;
pub mod storage;
pub mod terminal;
pub mod webhook;
