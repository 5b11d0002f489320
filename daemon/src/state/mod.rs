//! Mode state and the controller that drives it

mod display;
mod machine;
mod mode;
mod stage;
mod timer;

pub use display::Display;
pub use machine::ModeController;
pub use mode::Mode;
pub use stage::Stage;
