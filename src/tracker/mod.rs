//! Blink tracker seam.
//!
//! The tracking engine that turns accumulated point lists into blink frequency
//! estimates sits behind `BlinkTracker`. `TransitionTracker` is the in-crate
//! baseline implementation; production deployments can plug in a Hough-based
//! engine through the same trait.

mod backend;
mod result;
mod transition;

pub use backend::BlinkTracker;
pub use result::{PixelPoint, TrackedBlinker, TrackerParams};
pub use transition::TransitionTracker;
