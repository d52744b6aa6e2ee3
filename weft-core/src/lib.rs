//! Weft Core
//!
//! This crate provides the runtime of an observable graph for UI state.
//! It implements:
//!
//! - Mutable cells and memoized derivations with automatic dependency
//!   tracking
//! - Adapters that bridge external push sources and async streams
//! - Consumers that rerender through an ordered, batching scheduler
//! - Reference-counted disposal of nodes nobody observes
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Graph objects, dependency tracking and propagation
//! - `graph`: Node bookkeeping and the render scheduler
//! - `identity`: Pointer-identity wrapper for values without cheap equality
//! - `config`: Per-thread runtime settings
//! - `error`: Error types shared by every operation
//!
//! # Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use weft_core::graph::RenderScheduler;
//! use weft_core::reactive::{Consumer, Derivation, TrackedCell};
//!
//! let scheduler = Rc::new(RenderScheduler::new());
//! let count = TrackedCell::new(1);
//!
//! let count_in = count.clone();
//! let doubled = Derivation::new(move || count_in.deref() * 2);
//!
//! let view = Consumer::new(scheduler.clone(), move |this| {
//!     let value = this.render(|| doubled.deref().map_err(Into::into))?;
//!     println!("doubled = {value}");
//!     Ok(())
//! });
//! view.refresh_now()?;    // prints "doubled = 2"
//!
//! count.reset(5)?;
//! scheduler.flush()?;     // prints "doubled = 10"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod identity;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{BoxError, GraphError, Result};
