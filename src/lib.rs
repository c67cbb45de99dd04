//! runplane command line: serve the control plane, inspect model routing and
//! operate on session vault blobs.

pub mod cli;
