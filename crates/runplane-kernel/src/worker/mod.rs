mod client;
mod proxy;

pub use client::{strip_query_param, TaskRequest, WorkerClient, WorkerReply, OWNER_HEADER};
pub use proxy::WorkerProxy;
