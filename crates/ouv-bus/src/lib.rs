//! Ouvidoria event plumbing
//!
//! Two primitives shared by every other dashboard crate:
//!
//! - [`EventBus`]: publish/subscribe keyed by event name, with per-listener
//!   failure isolation
//! - [`Debouncer`]: trailing-edge delayed task that coalesces bursts
//!
//! # Example
//!
//! ```rust
//! use ouv_bus::EventBus;
//!
//! let bus: EventBus<String> = EventBus::new();
//! let sub = bus.on("filters:changed", |payload: &String| {
//!     println!("filters now {payload}");
//!     Ok(())
//! });
//!
//! assert_eq!(bus.emit("filters:changed", &"tema=Saneamento".to_string()), 1);
//! sub.unsubscribe();
//! assert_eq!(bus.listener_count("filters:changed"), 0);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod bus;
pub mod debounce;

pub use bus::{EventBus, Listener, Subscription};
pub use debounce::Debouncer;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
