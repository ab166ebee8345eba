/*!
 * Signals Module
 * Child-exit notification bridged from signal context to normal control flow
 */

pub mod child;

pub use child::{install, is_installed, take_pending};
