//! Eventide: a client for streamed agent turns.
//!
//! Talks to an agent playground backend: invokes agents, follows each turn's
//! live event stream, folds the events into message text and paired tool
//! calls, and keeps the multi-turn session/thread bookkeeping.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use eventide::prelude::*;
//!
//! # async fn example() -> eventide::error::Result<()> {
//! let config = EventideConfig::load()?;
//! let orchestrator = TurnOrchestrator::new(
//!     Arc::new(HttpAgentClient::new(&config)?),
//!     Arc::new(HttpEventStreamClient::new(&config)?),
//!     SessionStore::new().with_ttl(config.session_ttl),
//!     OrchestratorSettings::from_config(&config, Some(AgentRef::named("echo"))),
//! );
//! let result = orchestrator.send("hello").await?.wait().await;
//! if let Some(message) = result.message {
//!     println!("{}", message.content);
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod prelude;
pub mod reducer;
pub mod session;
pub mod stream;
pub mod types;

mod http;

#[cfg(feature = "cli")]
pub mod cli;
