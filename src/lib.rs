// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! ## mlt-agent
//! In-process stack sampling attributed to logical scopes, recorded in a compact binary trace
//! format (MLT).
//!
//! ### Usage
//!
//! A thread opens a scope (a request, a transaction, a job) through its [`ThreadScopeManager`]
//! or the process-wide [`ThreadScopeMapper`]. While the scope is open, the [`Sampler`]
//! periodically asks a [`ThreadStackProvider`] for the thread's stack and records it into the
//! innermost open scope. Ending the scope yields a self-contained MLT chunk:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use mlt_agent::{registry::ThreadScopeMapper, provider::PublishedStackProvider,
//! #     reporter::local::LocalReporter, sampler::SamplerBuilder, frame::StackFrame};
//! # #[tokio::main]
//! # async fn main() {
//! let mapper = Arc::new(ThreadScopeMapper::new());
//! let provider = Arc::new(PublishedStackProvider::new());
//!
//! SamplerBuilder::default()
//!     .with_provider(provider.clone())
//!     .with_reporter(LocalReporter::new("/tmp/scopes"))
//!     .build()
//!     .spawn(mapper.clone());
//!
//! let scope = mapper.start_scope(1, "worker-1", "GET /users");
//! provider.publish(1, "worker-1", vec![StackFrame::new("Users", "list", 42)]);
//! // ... handle the request ...
//! let chunk: Vec<u8> = scope.end();
//! # }
//! ```
//!
//! Every thread interns the frames it sees into string, frame and stack pools shared by all
//! of its scopes; a stack is a single integer and stacks sharing callers share pool entries.
//! Consecutive identical samples are run-length encoded. A chunk only carries the pool
//! entries its own samples reach. See [`chunk`] for the byte layout and [`reader`] to
//! decode it.
//!
//! With a reporter configured, the sampler also hands every ended scope to it. This crate
//! includes [`LocalReporter`] that writes to a directory, and a [`MultiReporter`] that allows
//! combining reporters. You can also write your own reporter via the [`Reporter`] trait.
//!
//! [`ThreadScopeManager`]: manager::ThreadScopeManager
//! [`ThreadScopeMapper`]: registry::ThreadScopeMapper
//! [`Sampler`]: sampler::Sampler
//! [`ThreadStackProvider`]: provider::ThreadStackProvider
//! [`LocalReporter`]: reporter::local::LocalReporter
//! [`MultiReporter`]: reporter::multi::MultiReporter
//! [`Reporter`]: reporter::Reporter
//!
//! #### Sample program
//!
//! ```notrust
//! cargo run --release --example simple -- --local /tmp/scopes --duration 10s
//! cargo run --manifest-path decoder/Cargo.toml -- summary /tmp/scopes/<file>.mlt
//! ```
mod leb128;

pub mod chunk;
pub mod frame;
pub mod manager;
pub mod metadata;
pub mod pool;
pub mod provider;
pub mod reader;
pub mod registry;
pub mod reporter;
pub mod sampler;
pub mod scope;
pub mod stack;
