//! Countdown, state synchronization and the shade mode controller.

pub mod controller;
pub mod countdown;
pub mod error;
pub mod synchronizer;
pub mod view;

pub use controller::{ControllerConfig, Intent, RetractPolicy, ShadeController};
pub use countdown::{Countdown, CountdownState, format_remaining};
pub use error::{ControllerError, ValidationError};
pub use view::ViewEvent;
