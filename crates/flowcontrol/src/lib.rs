//! Configuration model for API Priority and Fairness.
//!
//! The crate covers the pieces of the flow-control admission layer that carry
//! real design weight:
//!
//! * the [`FlowSchema`] and [`PriorityLevelConfiguration`] objects and the
//!   [`validation`] rules applied to them,
//! * [`shufflesharding`], which maps a flow to a hand of candidate queues and
//!   picks the shortest one,
//! * [`matching`], which selects the flow schema for an incoming request and
//!   computes its flow hash,
//! * the [`bootstrap`] configuration every cluster starts with.
//!
//! # Example
//! ```rust
//! use flowcontrol::shufflesharding::Dealer;
//! use flowcontrol::validation::validate_priority_level_configuration;
//!
//! let system = flowcontrol::bootstrap::suggested_priority_levels()
//!     .into_iter()
//!     .find(|pl| pl.metadata.name.as_deref() == Some("system"))
//!     .unwrap();
//! assert!(validate_priority_level_configuration(&system).is_empty());
//!
//! let dealer = Dealer::new(128, 6).unwrap();
//! let lengths = vec![0usize; 128];
//! let queue = dealer.pick_shortest(0xdead_beef, |i| lengths[i]);
//! assert!(queue < 128);
//! ```

#![warn(missing_docs)]

#[macro_use]
mod macros;

pub mod bootstrap;
pub mod concurrency;
pub mod matching;
pub mod shufflesharding;
pub mod types;
pub mod validation;

#[doc(inline)]
pub use types::{FlowControlObject, FlowSchema, PriorityLevelConfiguration};
#[doc(inline)]
pub use validation::{ErrorList, FieldError};
