/*!
 * Monitoring Module
 * Logging setup for applications embedding the crate
 */

pub mod tracer;

pub use tracer::init_tracing;
